//! Coverage targets: threshold checks, health scoring and ratcheting.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TargetsConfig;
use crate::model::{CoverageMetric, MetricMap, Ratio};

/// Round to two decimal places.
#[must_use]
pub fn round_decimal(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// Where `observed` falls within `[min, max]`, scaled to 0–100.
///
/// A missing or negative `min` is 0, a missing `max` or one above 100 is 100.
/// When the band is empty or inverted, `min` is moved just below `max`.
#[must_use]
pub fn range_score(max: Option<f32>, min: Option<f32>, observed: i32) -> i32 {
    let min = min.filter(|m| *m >= 0.0).unwrap_or(0.0);
    let max = max.filter(|m| *m <= 100.0).unwrap_or(100.0);
    let min = if min >= max { max - 1.0 } else { min };
    let score = (100.0 * (observed as f32 - min) / (max - min)).round() as i32;
    score.clamp(0, 100)
}

/// Target percentage per metric. Metrics without an entry are unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageTarget {
    targets: BTreeMap<CoverageMetric, f32>,
}

impl CoverageTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_target(&mut self, metric: CoverageMetric, percent: f32) {
        self.targets.insert(metric, percent);
    }

    pub fn target(&self, metric: CoverageMetric) -> Option<f32> {
        self.targets.get(&metric).copied()
    }

    /// Constrained metrics in declaration order.
    pub fn targets(&self) -> Vec<CoverageMetric> {
        self.targets.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// True when no target asks for more than 0%.
    pub fn is_always_met(&self) -> bool {
        self.targets.values().all(|&t| t <= 0.0)
    }

    /// Metrics whose observed percentage, rounded to two decimals, is below
    /// the target. Metrics with no observed ratio never fail.
    pub fn failing_metrics(&self, results: &MetricMap) -> BTreeSet<CoverageMetric> {
        self.targets
            .iter()
            .filter(|(metric, &target)| {
                results
                    .get(metric)
                    .is_some_and(|observed| round_decimal(observed.percentage_float()) < target)
            })
            .map(|(&metric, _)| metric)
            .collect()
    }

    /// Constrained metrics that have an observed ratio.
    pub fn all_metrics(&self, results: &MetricMap) -> BTreeSet<CoverageMetric> {
        self.targets
            .keys()
            .filter(|metric| results.contains_key(metric))
            .copied()
            .collect()
    }

    /// Observed percentage rounded to two decimals, 0 when unconstrained or
    /// unobserved.
    pub fn observed_percent(&self, results: &MetricMap, metric: CoverageMetric) -> f32 {
        if !self.targets.contains_key(&metric) {
            return 0.0;
        }
        results
            .get(&metric)
            .map_or(0.0, |observed| round_decimal(observed.percentage_float()))
    }

    /// Configured percentage, 0 when unconstrained.
    pub fn set_percent(&self, metric: CoverageMetric) -> f32 {
        self.target(metric).unwrap_or(0.0)
    }

    /// Health score of every metric constrained by both `self` (healthy) and
    /// `min` (unhealthy) that has an observed ratio.
    pub fn range_scores(&self, min: &CoverageTarget, results: &MetricMap) -> BTreeMap<CoverageMetric, i32> {
        self.targets
            .iter()
            .filter_map(|(&metric, &max)| {
                let floor = min.target(metric)?;
                let observed = results.get(&metric)?;
                Some((metric, range_score(Some(max), Some(floor), observed.percentage())))
            })
            .collect()
    }

    /// Raise the stored target of `metric` to `observed` when it is higher.
    /// An unset target counts as 0. Targets never go down.
    pub fn ratchet(&mut self, metric: CoverageMetric, observed: f32) -> bool {
        if observed > self.set_percent(metric) {
            self.targets.insert(metric, observed);
            true
        } else {
            false
        }
    }

    /// Ratchet every metric tracked by `guide` to its observed percentage.
    /// Returns the metrics that moved with their new targets.
    pub fn ratchet_from(&mut self, guide: &CoverageTarget, results: &MetricMap) -> Vec<(CoverageMetric, f32)> {
        guide
            .all_metrics(results)
            .into_iter()
            .filter_map(|metric| {
                let observed = guide.observed_percent(results, metric);
                self.ratchet(metric, observed).then_some((metric, observed))
            })
            .collect()
    }
}

impl FromIterator<(CoverageMetric, f32)> for CoverageTarget {
    fn from_iter<I: IntoIterator<Item = (CoverageMetric, f32)>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Health of a build: the worst score among metrics with both a healthy and
/// an unhealthy target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub score: i32,
    pub metric: CoverageMetric,
    pub ratio: Ratio,
    pub description: String,
}

/// `None` when no metric has both targets (or none is observed).
pub fn build_health(
    healthy: &CoverageTarget,
    unhealthy: &CoverageTarget,
    results: &MetricMap,
) -> Option<HealthReport> {
    let scores = healthy.range_scores(unhealthy, results);
    // Iteration is in metric declaration order; only a strictly lower score
    // replaces the current worst, so ties go to the earlier metric.
    let (metric, score) = scores
        .into_iter()
        .reduce(|worst, next| if next.1 < worst.1 { next } else { worst })?;
    let ratio = *results.get(&metric)?;
    Some(HealthReport {
        score,
        metric,
        ratio,
        description: format!(
            "Cover coverage: {} {}% ({})",
            metric.display_name(),
            ratio.percentage(),
            ratio
        ),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuildOutcome {
    Success,
    Unstable,
    Failure,
}

/// A target that was raised by ratcheting.
#[derive(Debug, Clone, PartialEq)]
pub struct Ratchet {
    pub kind: RatchetKind,
    pub metric: CoverageMetric,
    pub percent: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatchetKind {
    /// The unhealthy threshold.
    Health,
    /// The unstable threshold.
    Stability,
}

/// Result of checking one build against its configured targets.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub outcome: BuildOutcome,
    /// Metrics below the unstable target.
    pub unstable: BTreeSet<CoverageMetric>,
    /// Metrics below the unhealthy target (only checked with `fail_unhealthy`).
    pub unhealthy: BTreeSet<CoverageMetric>,
    pub health: Option<HealthReport>,
    pub ratchets: Vec<Ratchet>,
}

/// Check `results` against `config` and, for a successful build, ratchet the
/// unhealthy and unstable targets as the auto-update flags ask.
///
/// Results that are missing some cover files (`complete == false`) fail the
/// build and never ratchet.
pub fn evaluate_build(
    config: &mut TargetsConfig,
    results: &MetricMap,
    complete: bool,
) -> Evaluation {
    let mut outcome = BuildOutcome::Success;

    let unstable = config.unstable.failing_metrics(results);
    if !unstable.is_empty() {
        outcome = if config.fail_unstable {
            BuildOutcome::Failure
        } else {
            BuildOutcome::Unstable
        };
    }

    let mut unhealthy = BTreeSet::new();
    if config.fail_unhealthy {
        unhealthy = config.unhealthy.failing_metrics(results);
        if !unhealthy.is_empty() {
            outcome = BuildOutcome::Failure;
        }
    }

    if !complete {
        outcome = BuildOutcome::Failure;
    }

    let health = build_health(&config.healthy, &config.unhealthy, results);

    let mut ratchets = Vec::new();
    if outcome == BuildOutcome::Success {
        if config.auto_update_health {
            for (metric, percent) in config.unhealthy.ratchet_from(&config.healthy, results) {
                info!(%metric, percent, "new health minimum");
                ratchets.push(Ratchet {
                    kind: RatchetKind::Health,
                    metric,
                    percent,
                });
            }
        }
        if config.auto_update_stability {
            for (metric, percent) in config.unstable.ratchet_from(&config.healthy, results) {
                info!(%metric, percent, "new stability minimum");
                ratchets.push(Ratchet {
                    kind: RatchetKind::Stability,
                    metric,
                    percent,
                });
            }
        }
    }

    Evaluation {
        outcome,
        unstable,
        unhealthy,
        health,
        ratchets,
    }
}
