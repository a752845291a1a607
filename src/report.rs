//! Build summaries and their text, markdown and JSON renderings.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::config::TargetsConfig;
use crate::model::{CoverageMetric, MetricMap, Ratio};
use crate::target::{build_health, HealthReport};
use crate::tree::CoverageTree;

/// Coverage of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub name: String,
    pub source: Option<String>,
    pub functions: usize,
    pub results: MetricMap,
    /// Instrumented lines that were never hit, ascending.
    pub uncovered_lines: Vec<u32>,
    /// Every instrumented line, ascending.
    pub instrumented_lines: Vec<u32>,
}

impl ModuleSummary {
    pub fn ratio(&self, metric: CoverageMetric) -> Option<Ratio> {
        self.results.get(&metric).copied()
    }

    /// Line percentage used for sorting; modules without lines sort last.
    fn line_rate(&self) -> f32 {
        self.ratio(CoverageMetric::Line)
            .map_or(f32::MAX, |r| r.percentage_float())
    }
}

/// Snapshot of one build: root ratios, health and per-module detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub build: String,
    /// RFC 3339 timestamp.
    pub recorded_at: String,
    pub results: MetricMap,
    pub health: Option<HealthReport>,
    #[serde(default)]
    pub modules: Vec<ModuleSummary>,
}

impl BuildSummary {
    pub fn from_tree(build: &str, tree: &CoverageTree, config: &TargetsConfig) -> Self {
        let root = tree.root();
        let results = root.results().clone();
        let health = build_health(&config.healthy, &config.unhealthy, &results);

        let modules = root
            .children()
            .map(|module| {
                let mut instrumented_lines = Vec::new();
                let mut uncovered_lines = Vec::new();
                if let Some(paint) = module.paint() {
                    for (line, hits) in paint.lines() {
                        instrumented_lines.push(line);
                        if hits == 0 {
                            uncovered_lines.push(line);
                        }
                    }
                }
                ModuleSummary {
                    name: module.name().to_string(),
                    source: module.relative_source_path().map(str::to_string),
                    functions: module.child_count(),
                    results: module.results().clone(),
                    uncovered_lines,
                    instrumented_lines,
                }
            })
            .collect();

        Self {
            build: build.to_string(),
            recorded_at: chrono::Utc::now().to_rfc3339(),
            results,
            health,
            modules,
        }
    }

    pub fn ratio(&self, metric: CoverageMetric) -> Option<Ratio> {
        self.results.get(&metric).copied()
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSummary> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Modules, worst line coverage first when `by_coverage` is set.
    pub fn sorted_modules(&self, by_coverage: bool) -> Vec<&ModuleSummary> {
        let mut modules: Vec<&ModuleSummary> = self.modules.iter().collect();
        if by_coverage {
            modules.sort_by(|a, b| a.line_rate().total_cmp(&b.line_rate()));
        }
        modules
    }

    #[must_use]
    pub fn format(&self, formatter: &dyn ReportFormatter) -> String {
        formatter.format(self)
    }
}

/// Renders a [`BuildSummary`].
pub trait ReportFormatter {
    fn render(&self, summary: &BuildSummary, out: &mut dyn fmt::Write) -> fmt::Result;

    fn format(&self, summary: &BuildSummary) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.render(summary, &mut out);
        out
    }
}

fn ratio_cell(ratio: Option<Ratio>) -> String {
    match ratio {
        Some(r) => format!("{r} ({:.2}%)", r.percentage_float()),
        None => "-".to_string(),
    }
}

/// Plain text formatter.
pub struct TextFormatter;

impl ReportFormatter for TextFormatter {
    fn render(&self, summary: &BuildSummary, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "Build:      {}", summary.build)?;
        writeln!(out, "Recorded:   {}", summary.recorded_at)?;
        for metric in CoverageMetric::ALL {
            if let Some(ratio) = summary.ratio(metric) {
                let label = format!("{}:", metric.display_name());
                writeln!(out, "{label:<12}{}", ratio_cell(Some(ratio)))?;
            }
        }
        if let Some(health) = &summary.health {
            writeln!(out, "Health:     {}% ({})", health.score, health.description)?;
        }
        Ok(())
    }
}

/// Markdown formatter.
pub struct MarkdownFormatter;

impl ReportFormatter for MarkdownFormatter {
    fn render(&self, summary: &BuildSummary, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "### Cover coverage: build {}\n", summary.build)?;

        if let Some(health) = &summary.health {
            writeln!(
                out,
                "**Health {}%**, weakest metric: {} ({})\n",
                health.score,
                health.metric.display_name(),
                health.ratio
            )?;
        }

        writeln!(out, "| Metric | Covered | Rate |")?;
        writeln!(out, "|:-------|--------:|-----:|")?;
        for metric in CoverageMetric::ALL {
            if let Some(ratio) = summary.ratio(metric) {
                writeln!(
                    out,
                    "| {} | {} | {:.2}% |",
                    metric.display_name(),
                    ratio,
                    ratio.percentage_float()
                )?;
            }
        }

        let weak: Vec<&ModuleSummary> = summary
            .sorted_modules(true)
            .into_iter()
            .filter(|m| !m.uncovered_lines.is_empty())
            .collect();
        if weak.is_empty() {
            writeln!(out, "\nAll instrumented lines are covered.")?;
            return Ok(());
        }

        writeln!(out, "\n| Module | Functions | Lines | Uncovered |")?;
        writeln!(out, "|:-------|----------:|------:|:----------|")?;
        for module in weak {
            writeln!(
                out,
                "| `{}` | {} | {} | {} |",
                module.name,
                ratio_cell(module.ratio(CoverageMetric::Function)),
                ratio_cell(module.ratio(CoverageMetric::Line)),
                format_line_ranges(&module.uncovered_lines, &module.instrumented_lines)
            )?;
        }
        Ok(())
    }
}

/// Pretty-printed JSON, the same shape stored in the history database.
pub struct JsonFormatter;

impl ReportFormatter for JsonFormatter {
    fn render(&self, summary: &BuildSummary, out: &mut dyn fmt::Write) -> fmt::Result {
        let json = serde_json::to_string_pretty(summary).map_err(|_| fmt::Error)?;
        writeln!(out, "{json}")
    }
}

/// Per-module table.
#[must_use]
pub fn module_table(modules: &[&ModuleSummary]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40} {:>10} {:>18} {:>18}",
        "MODULE", "FUNCTIONS", "FUNCTION RATE", "LINE RATE"
    );
    let _ = writeln!(out, "{}", "-".repeat(89));
    for m in modules {
        let _ = writeln!(
            out,
            "{:<40} {:>10} {:>18} {:>18}",
            m.name,
            m.functions,
            ratio_cell(m.ratio(CoverageMetric::Function)),
            ratio_cell(m.ratio(CoverageMetric::Line)),
        );
    }
    out
}

/// One point of a metric's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub build: String,
    pub recorded_at: String,
    pub ratio: Ratio,
}

const TREND_BAR_WIDTH: usize = 40;

/// Text chart of `points`, oldest first.
#[must_use]
pub fn format_trend(metric: CoverageMetric, points: &[TrendPoint]) -> String {
    if points.is_empty() {
        return format!("No {} history recorded.\n", metric.display_name().to_lowercase());
    }

    let mut out = String::new();
    let _ = writeln!(out, "{} coverage by build:", metric.display_name());
    for point in points {
        let pct = point.ratio.percentage_float();
        let filled = ((pct / 100.0) * TREND_BAR_WIDTH as f32).round() as usize;
        let _ = writeln!(
            out,
            "{:<12} {:>7.2}% {:<width$} {}",
            point.build,
            pct,
            "#".repeat(filled.min(TREND_BAR_WIDTH)),
            point.ratio,
            width = TREND_BAR_WIDTH
        );
    }
    out
}

/// Maximum number of consecutive non-instrumented lines that can be bridged
/// when coalescing uncovered ranges.
const MAX_BRIDGE_GAP: u32 = 2;

/// Coalesce sorted line numbers into `(start, end)` ranges, bridging gaps of
/// at most [`MAX_BRIDGE_GAP`] lines when none of the gap lines is
/// instrumented.
///
/// Both slices must be sorted and deduplicated.
#[must_use]
pub fn coalesce_ranges(lines: &[u32], instrumented: &[u32]) -> Vec<(u32, u32)> {
    let Some((&first, rest)) = lines.split_first() else {
        return Vec::new();
    };

    debug_assert!(
        lines.windows(2).all(|w| w[0] < w[1]),
        "coalesce_ranges requires sorted, deduplicated input"
    );

    let mut ranges = Vec::new();
    let (mut start, mut end) = (first, first);
    for &line in rest {
        let gap = line.saturating_sub(end).saturating_sub(1);
        if gap <= MAX_BRIDGE_GAP && (end + 1..line).all(|l| instrumented.binary_search(&l).is_err()) {
            end = line;
        } else {
            ranges.push((start, end));
            start = line;
            end = line;
        }
    }
    ranges.push((start, end));
    ranges
}

/// Compact range notation, e.g. "1, 3-5, 8".
#[must_use]
pub fn format_line_ranges(lines: &[u32], instrumented: &[u32]) -> String {
    coalesce_ranges(lines, instrumented)
        .iter()
        .map(|&(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}-{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::CoverageTarget;

    fn sample_tree() -> CoverageTree {
        let mut tree = CoverageTree::default();
        let root = tree.root_id();
        let m = tree
            .create_child(root, crate::model::CoverageElement::Module, "sip_ua")
            .unwrap();
        tree.set_relative_source_path(m, "sip_ua.erl");
        tree.bump("sip_ua", "init/1", 10, 1);
        tree.bump("sip_ua", "init/1", 11, 0);
        tree.bump("sip_ua", "init/1", 12, 3);
        tree.bump("sip_ua", "stop/0", 20, 0);
        tree.bump("sip_ua", "stop/0", 21, 0);
        tree.bump("sip_ua", "stop/0", 24, 0);
        tree.bump("codec", "decode/2", 5, 9);
        tree
    }

    fn config() -> TargetsConfig {
        TargetsConfig {
            healthy: [(CoverageMetric::Line, 80.0)].into_iter().collect::<CoverageTarget>(),
            unhealthy: [(CoverageMetric::Line, 0.0)].into_iter().collect::<CoverageTarget>(),
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_from_tree() {
        let summary = BuildSummary::from_tree("12", &sample_tree(), &config());
        assert_eq!(summary.ratio(CoverageMetric::Line), Some(Ratio::new(3, 7)));
        assert_eq!(summary.ratio(CoverageMetric::Modules), Some(Ratio::new(2, 2)));
        assert_eq!(summary.ratio(CoverageMetric::Function), Some(Ratio::new(2, 3)));

        let ua = summary.module("sip_ua").unwrap();
        assert_eq!(ua.source.as_deref(), Some("sip_ua.erl"));
        assert_eq!(ua.functions, 2);
        assert_eq!(ua.uncovered_lines, vec![11, 20, 21, 24]);

        // 3/7 = 42.86% -> 43, 100 * 43 / 80 = 53.75
        let health = summary.health.as_ref().unwrap();
        assert_eq!(health.score, 54);
        assert_eq!(health.metric, CoverageMetric::Line);
    }

    #[test]
    fn test_sorted_modules_worst_first() {
        let summary = BuildSummary::from_tree("1", &sample_tree(), &config());
        let names: Vec<&str> = summary.sorted_modules(false).iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sip_ua", "codec"]);
        let names: Vec<&str> = summary.sorted_modules(true).iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["sip_ua", "codec"]);
        let table = module_table(&summary.sorted_modules(true));
        assert!(table.contains("2/6 (33.33%)"));
    }

    #[test]
    fn test_text_format() {
        let summary = BuildSummary::from_tree("12", &sample_tree(), &config());
        let text = summary.format(&TextFormatter);
        assert!(text.contains("Build:      12"));
        assert!(text.contains("Lines:      3/7 (42.86%)"));
        assert!(text.contains("Functions:  2/3 (66.67%)"));
        assert!(text.contains("Health:     54% (Cover coverage: Lines 43% (3/7))"));
    }

    #[test]
    fn test_markdown_format() {
        let summary = BuildSummary::from_tree("12", &sample_tree(), &config());
        let md = summary.format(&MarkdownFormatter);
        assert!(md.contains("### Cover coverage: build 12"));
        assert!(md.contains("| Lines | 3/7 | 42.86% |"));
        assert!(md.contains("`sip_ua`"));
        // 20, 21 and 24 bridge over the uninstrumented 22-23.
        assert!(md.contains("11, 20-24"));
        assert!(!md.contains("`codec`"));
    }

    #[test]
    fn test_json_round_trip() {
        let summary = BuildSummary::from_tree("12", &sample_tree(), &config());
        let json = summary.format(&JsonFormatter);
        let back: BuildSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back.results, summary.results);
        assert_eq!(back.health, summary.health);
        assert_eq!(back.modules[0].uncovered_lines, vec![11, 20, 21, 24]);
        assert!(json.contains("\"LINE\""));
    }

    #[test]
    fn test_format_trend() {
        let points = vec![
            TrendPoint {
                build: "1".into(),
                recorded_at: "t1".into(),
                ratio: Ratio::new(1, 2),
            },
            TrendPoint {
                build: "2".into(),
                recorded_at: "t2".into(),
                ratio: Ratio::new(1, 1),
            },
        ];
        let chart = format_trend(CoverageMetric::Line, &points);
        assert!(chart.starts_with("Lines coverage by build:"));
        assert!(chart.contains(&format!(" 50.00% {:<40} 1/2", "#".repeat(20))));
        assert!(chart.contains(&"#".repeat(40)));
        assert_eq!(format_trend(CoverageMetric::Function, &[]), "No functions history recorded.\n");
    }

    #[test]
    fn test_coalesce_ranges() {
        assert_eq!(coalesce_ranges(&[], &[]), Vec::<(u32, u32)>::new());
        assert_eq!(coalesce_ranges(&[1, 2, 3], &[1, 2, 3]), vec![(1, 3)]);
        assert_eq!(coalesce_ranges(&[1, 2, 5, 6], &[1, 2, 5, 6]), vec![(1, 6)]);
        assert_eq!(coalesce_ranges(&[1, 2, 6, 7], &[1, 2, 6, 7]), vec![(1, 2), (6, 7)]);
        assert_eq!(coalesce_ranges(&[1, 2, 4, 5], &[1, 2, 3, 4, 5]), vec![(1, 2), (4, 5)]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "sorted, deduplicated")]
    fn test_coalesce_ranges_rejects_unsorted() {
        coalesce_ranges(&[5, 3], &[3, 5]);
    }

    #[test]
    fn test_format_line_ranges() {
        assert_eq!(format_line_ranges(&[5], &[5]), "5");
        assert_eq!(
            format_line_ranges(&[1, 3, 4, 5, 10], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]),
            "1, 3-5, 10"
        );
    }
}
