//! Rules that determine how the coverage ratios of children are folded
//! into the ratios of their parent.

use crate::model::{CoverageElement, CoverageMetric, MetricMap, Ratio};

/// Ways of aggregating a series `{x1, x2, ..., xn}`, evaluated as
/// `f(...f(f(ZERO, x1), x2)..., xn)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMode {
    /// Produces no value at all.
    None,
    /// Adds numerators and denominators separately.
    Sum,
    /// Treats `x/0` as "no data", then computes
    /// `# of non-zero data / # of data`.
    CountNonZero,
}

impl AggregationMode {
    /// Output of the aggregation over an empty series.
    pub fn zero(&self) -> Option<Ratio> {
        match self {
            AggregationMode::None => None,
            AggregationMode::Sum | AggregationMode::CountNonZero => Some(Ratio::new(0, 0)),
        }
    }

    /// Combinator. Left-associative; `f(a, b)` need not equal `f(b, a)`.
    pub fn aggregate(&self, a: Ratio, b: Ratio) -> Option<Ratio> {
        match self {
            AggregationMode::None => None,
            AggregationMode::Sum => Some(Ratio::new(
                a.numerator + b.numerator,
                a.denominator + b.denominator,
            )),
            AggregationMode::CountNonZero => {
                if b.denominator == 0 {
                    return Some(a);
                }
                Some(Ratio::new(
                    a.numerator + u64::from(b.numerator > 0),
                    a.denominator + 1,
                ))
            }
        }
    }
}

/// Read `(source, input, mode, output)` as "the `input` metric of a `source`
/// element is aggregated into the `output` metric of its parent using
/// `mode`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationRule {
    pub source: CoverageElement,
    pub input: CoverageMetric,
    pub mode: AggregationMode,
    pub output: CoverageMetric,
}

impl AggregationRule {
    pub const fn new(
        source: CoverageElement,
        input: CoverageMetric,
        mode: AggregationMode,
        output: CoverageMetric,
    ) -> Self {
        Self {
            source,
            input,
            mode,
            output,
        }
    }
}

/// Folds child metrics into parent metrics with an immutable rule table.
#[derive(Debug, Clone)]
pub struct AggregationEngine {
    rules: Vec<AggregationRule>,
}

impl AggregationEngine {
    pub fn new(rules: Vec<AggregationRule>) -> Self {
        Self { rules }
    }

    /// The rule set for Erlang projects:
    /// line coverage of a function is summed into the line coverage of its
    /// module, the function coverage of a module is the number of functions
    /// with some covered line among the functions with any line, and so on.
    pub fn standard() -> Self {
        use AggregationMode::{CountNonZero, Sum};
        use CoverageElement::{Function as Fun, Module as Mod};
        use CoverageMetric::{Function, Line, Modules};

        Self::new(vec![
            AggregationRule::new(Fun, Line, Sum, Line),
            AggregationRule::new(Fun, Line, CountNonZero, Function),
            AggregationRule::new(Mod, Line, Sum, Line),
            AggregationRule::new(Mod, Function, Sum, Function),
            AggregationRule::new(Mod, Line, CountNonZero, Modules),
        ])
    }

    /// Apply every rule matching `(source, input)` to `running`.
    pub fn aggregate(
        &self,
        source: CoverageElement,
        input: CoverageMetric,
        value: Ratio,
        running: &mut MetricMap,
    ) {
        for rule in self
            .rules
            .iter()
            .filter(|r| r.source == source && r.input == input)
        {
            let previous = running.get(&rule.output).copied().or(rule.mode.zero());
            match previous.and_then(|prev| rule.mode.aggregate(prev, value)) {
                Some(next) => {
                    running.insert(rule.output, next);
                }
                None => {
                    running.remove(&rule.output);
                }
            }
        }
    }

    /// Results of a node: its local metrics, then every child's results folded
    /// in child order.
    pub fn fold<'a, I>(&self, local: &MetricMap, children: I) -> MetricMap
    where
        I: IntoIterator<Item = (CoverageElement, &'a MetricMap)>,
    {
        let mut running = local.clone();
        for (element, results) in children {
            for (&metric, &ratio) in results {
                self.aggregate(element, metric, ratio, &mut running);
            }
        }
        running
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::standard()
    }
}
