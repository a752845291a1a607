//! Coverage target configuration, stored as JSON next to the project.
//!
//! ```json
//! {
//!   "healthy":   { "LINE": 80.0, "FUNCTION": 80.0 },
//!   "unhealthy": { "LINE": 50.0 },
//!   "unstable":  { "LINE": 60.0 },
//!   "fail_unhealthy": false,
//!   "fail_unstable": false,
//!   "auto_update_health": false,
//!   "auto_update_stability": false
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classify::OrphanPolicy;
use crate::error::{CoverError, Result};
use crate::ingest::IngestOptions;
use crate::model::CoverageMetric;
use crate::target::CoverageTarget;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetsConfig {
    /// Percentages at or above which a metric scores 100% health.
    pub healthy: CoverageTarget,
    /// Percentages at or below which a metric scores 0% health.
    pub unhealthy: CoverageTarget,
    /// Percentages below which the build is marked unstable.
    pub unstable: CoverageTarget,
    /// Fail the build when a metric is below its unhealthy target.
    pub fail_unhealthy: bool,
    /// Fail (rather than mark unstable) when a metric is below its unstable
    /// target.
    pub fail_unstable: bool,
    /// Raise unhealthy targets to the observed coverage after a good build.
    pub auto_update_health: bool,
    /// Raise unstable targets to the observed coverage after a good build.
    pub auto_update_stability: bool,
    /// Attach bumps without a preceding module declaration to a placeholder
    /// module instead of rejecting the file.
    pub allow_orphan_bumps: bool,
}

impl TargetsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    /// Load `path`, or the default configuration when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json + "\n")?;
        Ok(())
    }

    /// Replace all targets with `entries`.
    pub fn set_targets(&mut self, entries: &[MetricTargets]) {
        self.healthy.clear();
        self.unhealthy.clear();
        self.unstable.clear();
        for entry in entries {
            if let Some(v) = entry.healthy {
                self.healthy.set_target(entry.metric, v);
            }
            if let Some(v) = entry.unhealthy {
                self.unhealthy.set_target(entry.metric, v);
            }
            if let Some(v) = entry.unstable {
                self.unstable.set_target(entry.metric, v);
            }
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            orphan_policy: if self.allow_orphan_bumps {
                OrphanPolicy::Placeholder
            } else {
                OrphanPolicy::Reject
            },
            fail_fast: false,
        }
    }
}

/// The three thresholds of one metric, written `metric:healthy:unhealthy:unstable`
/// on the command line. Empty fields leave a threshold unset, e.g.
/// `line:80:50:` or `function:90::`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricTargets {
    pub metric: CoverageMetric,
    pub healthy: Option<f32>,
    pub unhealthy: Option<f32>,
    pub unstable: Option<f32>,
}

impl std::str::FromStr for MetricTargets {
    type Err = CoverError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let metric = parts.next().unwrap_or_default().parse::<CoverageMetric>()?;
        let mut next = || -> std::result::Result<Option<f32>, CoverError> {
            match parts.next().map(str::trim) {
                None | Some("") => Ok(None),
                Some(v) => v
                    .parse::<f32>()
                    .map(Some)
                    .map_err(|_| CoverError::Other(format!("Invalid percentage '{v}' in '{s}'"))),
            }
        };
        let healthy = next()?;
        let unhealthy = next()?;
        let unstable = next()?;
        Ok(MetricTargets {
            metric,
            healthy,
            unhealthy,
            unstable,
        })
    }
}
