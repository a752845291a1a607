//! Value types shared by the coverage tree, the aggregation rules and the
//! target evaluation: ratios, element kinds, metrics and line paint.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoverError;

/// Represents `x/y` where x is the number of covered units and y the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u64,
    pub denominator: u64,
}

impl Ratio {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Percentage as a float.
    ///
    /// `0/0` is 100% (nothing was expected), `x/0` is 0% (x is unexpected).
    /// A numerator larger than the denominator is clamped to 100%.
    #[must_use]
    pub fn percentage_float(&self) -> f32 {
        if self.denominator == 0 {
            return if self.numerator == 0 { 100.0 } else { 0.0 };
        }
        let pct = 100.0 * self.numerator as f32 / self.denominator as f32;
        pct.min(100.0)
    }

    /// Percentage rounded to an integer.
    #[must_use]
    pub fn percentage(&self) -> i32 {
        self.percentage_float().round() as i32
    }

    /// Fixed-width percentage (`"066.67"`), sorts lexically.
    #[must_use]
    pub fn percentage_string(&self) -> String {
        format!("{:06.2}", self.percentage_float())
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Type of program construct being covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageElement {
    Project,
    Module,
    Function,
}

impl CoverageElement {
    pub const ALL: [CoverageElement; 3] = [
        CoverageElement::Project,
        CoverageElement::Module,
        CoverageElement::Function,
    ];

    pub fn parent(&self) -> Option<CoverageElement> {
        match self {
            CoverageElement::Project => None,
            CoverageElement::Module => Some(CoverageElement::Project),
            CoverageElement::Function => Some(CoverageElement::Module),
        }
    }

    pub fn child(&self) -> Option<CoverageElement> {
        Self::ALL.into_iter().find(|e| e.parent() == Some(*self))
    }

    /// Only modules and functions carry per-line paint.
    pub fn has_paint(&self) -> bool {
        !matches!(self, CoverageElement::Project)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CoverageElement::Project => "Project",
            CoverageElement::Module => "Module",
            CoverageElement::Function => "Function",
        }
    }
}

impl fmt::Display for CoverageElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Independent measurement axes. Declaration order is the tie-break order
/// used by health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageMetric {
    Modules,
    Function,
    Line,
}

impl CoverageMetric {
    pub const ALL: [CoverageMetric; 3] = [
        CoverageMetric::Modules,
        CoverageMetric::Function,
        CoverageMetric::Line,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CoverageMetric::Modules => "MODULES",
            CoverageMetric::Function => "FUNCTION",
            CoverageMetric::Line => "LINE",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            CoverageMetric::Modules => "Modules",
            CoverageMetric::Function => "Functions",
            CoverageMetric::Line => "Lines",
        }
    }
}

impl fmt::Display for CoverageMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl std::str::FromStr for CoverageMetric {
    type Err = CoverError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modules" | "module" => Ok(CoverageMetric::Modules),
            "function" | "functions" => Ok(CoverageMetric::Function),
            "line" | "lines" => Ok(CoverageMetric::Line),
            _ => Err(CoverError::UnknownMetric(s.to_string())),
        }
    }
}

/// Metric ratios of one node, ordered by metric declaration order.
pub type MetricMap = BTreeMap<CoverageMetric, Ratio>;

/// Line-by-line hit counts of a module or function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoveragePaint {
    lines: BTreeMap<u32, u64>,
    first_line: Option<u32>,
}

impl CoveragePaint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `hits` to `line`. Painting the same line twice sums the counts.
    pub fn paint(&mut self, line: u32, hits: u64) {
        let entry = self.lines.entry(line).or_insert(0);
        *entry = entry.saturating_add(hits);

        if self.first_line.map_or(true, |first| line < first) {
            self.first_line = Some(line);
        }
    }

    /// Paint every line of `other` onto this paint.
    pub fn merge(&mut self, other: &CoveragePaint) {
        for (&line, &hits) in &other.lines {
            self.paint(line, hits);
        }
    }

    pub fn first_line(&self) -> Option<u32> {
        self.first_line
    }

    pub fn is_painted(&self, line: u32) -> bool {
        self.lines.contains_key(&line)
    }

    pub fn hits(&self, line: u32) -> u64 {
        self.lines.get(&line).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `(line, hits)` pairs in ascending line order.
    pub fn lines(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.lines.iter().map(|(&line, &hits)| (line, hits))
    }

    /// Distinct painted lines with at least one hit over all painted lines.
    #[must_use]
    pub fn line_coverage(&self) -> Ratio {
        let covered = self.lines.values().filter(|&&hits| hits > 0).count();
        Ratio::new(covered as u64, self.lines.len() as u64)
    }
}
