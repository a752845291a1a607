//! Command handler functions for the beamcov CLI.
//!
//! Each `cmd_*` function returns its output as a `String`, making them easy
//! to test without capturing stdout.

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use rusqlite::Connection;

use crate::config::TargetsConfig;
use crate::db;
use crate::ingest::{ingest_files, Ingestion};
use crate::model::CoverageMetric;
use crate::report::{
    self, BuildSummary, JsonFormatter, MarkdownFormatter, ReportFormatter, TextFormatter,
};
use crate::target::{evaluate_build, BuildOutcome, RatchetKind};

/// Output style for summaries.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Style {
    Text,
    Markdown,
    Json,
}

impl Style {
    fn formatter(self) -> &'static dyn ReportFormatter {
        match self {
            Style::Text => &TextFormatter,
            Style::Markdown => &MarkdownFormatter,
            Style::Json => &JsonFormatter,
        }
    }
}

/// Where the cover files come from and how they are folded.
#[derive(Debug, Clone)]
pub struct Inputs {
    pub files: Vec<PathBuf>,
    pub targets: PathBuf,
    pub fail_fast: bool,
}

impl Inputs {
    pub fn new(files: Vec<PathBuf>, targets: impl Into<PathBuf>) -> Self {
        Self {
            files,
            targets: targets.into(),
            fail_fast: false,
        }
    }

    fn config(&self) -> Result<TargetsConfig> {
        TargetsConfig::load_or_default(&self.targets)
            .with_context(|| format!("Failed to read targets from {}", self.targets.display()))
    }

    fn ingest(&self, config: &TargetsConfig) -> Result<Ingestion> {
        if self.files.is_empty() {
            bail!("No cover data files given");
        }
        let mut options = config.ingest_options();
        options.fail_fast = self.fail_fast;
        let ingestion = ingest_files(&self.files, options)?;
        if ingestion.files == 0 {
            bail!("None of the {} cover data file(s) could be read", self.files.len());
        }
        Ok(ingestion)
    }
}

fn skipped_note(out: &mut String, ingestion: &Ingestion) -> std::fmt::Result {
    for failure in &ingestion.failures {
        writeln!(out, "Skipped {}: {}", failure.file, failure.error)?;
    }
    Ok(())
}

pub fn cmd_summary(inputs: &Inputs, build: &str, style: Style) -> Result<String> {
    let config = inputs.config()?;
    let ingestion = inputs.ingest(&config)?;
    let summary = BuildSummary::from_tree(build, &ingestion.tree, &config);

    let mut out = summary.format(style.formatter());
    if matches!(style, Style::Text) {
        for path in &ingestion.source_paths {
            writeln!(out, "Sources:    {}", path.display())?;
        }
        skipped_note(&mut out, &ingestion)?;
    }
    Ok(out)
}

pub fn cmd_modules(inputs: &Inputs, sort_by_coverage: bool) -> Result<String> {
    let config = inputs.config()?;
    let ingestion = inputs.ingest(&config)?;
    let summary = BuildSummary::from_tree("", &ingestion.tree, &config);

    let mut out = report::module_table(&summary.sorted_modules(sort_by_coverage));
    skipped_note(&mut out, &ingestion)?;
    Ok(out)
}

pub fn cmd_lines(inputs: &Inputs, module: &str, uncovered: bool) -> Result<String> {
    let config = inputs.config()?;
    let ingestion = inputs.ingest(&config)?;
    let Some(node) = ingestion.tree.module(module) else {
        bail!("No coverage data for module '{module}'");
    };
    let Some(paint) = node.paint().filter(|p| !p.is_empty()) else {
        return Ok(format!("No coverage data for '{module}'\n"));
    };

    let mut out = String::new();
    if uncovered {
        let instrumented: Vec<u32> = paint.lines().map(|(line, _)| line).collect();
        let missed: Vec<u32> = paint
            .lines()
            .filter(|&(_, hits)| hits == 0)
            .map(|(line, _)| line)
            .collect();
        if missed.is_empty() {
            return Ok(format!("All instrumented lines are covered in '{module}'\n"));
        }
        writeln!(out, "Uncovered lines in '{module}':")?;
        writeln!(out, "  {}", report::format_line_ranges(&missed, &instrumented))?;
        writeln!(out, "  ({} lines)", missed.len())?;
    } else {
        writeln!(out, "{:>6}  {:>10}", "LINE", "HITS")?;
        writeln!(out, "{}", "-".repeat(18))?;
        for (line, hits) in paint.lines() {
            let marker = if hits > 0 { "✓" } else { "✗" };
            writeln!(out, "{line:>6}  {hits:>10}  {marker}")?;
        }
    }
    Ok(out)
}

/// Output of `check`: the report and the verdict that decides the exit code.
#[derive(Debug)]
pub struct CheckOutput {
    pub text: String,
    pub outcome: BuildOutcome,
}

/// Evaluate the targets. Raised thresholds are written back to the targets
/// file unless `dry_run` is set.
pub fn cmd_check(inputs: &Inputs, dry_run: bool) -> Result<CheckOutput> {
    let mut config = inputs.config()?;
    let ingestion = inputs.ingest(&config)?;
    let results = ingestion.tree.root().results().clone();
    let eval = evaluate_build(&mut config, &results, ingestion.is_complete());

    let mut text = String::new();
    for metric in &eval.unstable {
        writeln!(
            text,
            "Unstable: {} below {:.2}%",
            metric.display_name(),
            config.unstable.set_percent(*metric)
        )?;
    }
    for metric in &eval.unhealthy {
        writeln!(
            text,
            "Unhealthy: {} below {:.2}%",
            metric.display_name(),
            config.unhealthy.set_percent(*metric)
        )?;
    }
    if let Some(health) = &eval.health {
        writeln!(text, "Health: {}% ({})", health.score, health.description)?;
    }
    for ratchet in &eval.ratchets {
        let kind = match ratchet.kind {
            RatchetKind::Health => "health",
            RatchetKind::Stability => "stability",
        };
        writeln!(
            text,
            "Raised {} minimum for {} to {:.2}%",
            kind,
            ratchet.metric.display_name(),
            ratchet.percent
        )?;
    }
    writeln!(text, "Result: {:?}", eval.outcome)?;
    skipped_note(&mut text, &ingestion)?;

    if !eval.ratchets.is_empty() && !dry_run {
        config
            .save(&inputs.targets)
            .with_context(|| format!("Failed to write targets to {}", inputs.targets.display()))?;
    }

    Ok(CheckOutput {
        text,
        outcome: eval.outcome,
    })
}

pub fn cmd_record(conn: &mut Connection, inputs: &Inputs, build: &str, overwrite: bool) -> Result<String> {
    let config = inputs.config()?;
    let ingestion = inputs.ingest(&config)?;
    let summary = BuildSummary::from_tree(build, &ingestion.tree, &config);
    let id = db::insert_build(conn, &summary, overwrite)?;

    let mut out = format!(
        "Recorded build '{}' from {} file(s) → id {}\n",
        build, ingestion.files, id
    );
    skipped_note(&mut out, &ingestion)?;
    Ok(out)
}

/// List recorded builds, or show one of them.
pub fn cmd_history(conn: &Connection, build: Option<&str>, style: Style) -> Result<String> {
    if let Some(build) = build {
        let summary = db::get_build(conn, build)?;
        return Ok(summary.format(style.formatter()));
    }

    let builds = db::list_builds(conn)?;
    if builds.is_empty() {
        return Ok("No builds recorded.\n".to_string());
    }
    let mut out = String::new();
    writeln!(out, "{:<20} {:>7}  RECORDED", "BUILD", "HEALTH")?;
    writeln!(out, "{}", "-".repeat(70))?;
    for row in &builds {
        let health = row
            .health
            .map_or_else(|| "-".to_string(), |h| format!("{h}%"));
        writeln!(out, "{:<20} {:>7}  {}", row.name, health, row.recorded_at)?;
    }
    Ok(out)
}

pub fn cmd_trend(
    conn: &Connection,
    metric: CoverageMetric,
    module: Option<&str>,
    limit: Option<usize>,
) -> Result<String> {
    let points = db::metric_series(conn, metric, module, limit)?;
    let mut out = String::new();
    if let Some(module) = module {
        writeln!(out, "Module: {module}")?;
    }
    out.push_str(&report::format_trend(metric, &points));
    Ok(out)
}

pub fn cmd_delete(conn: &mut Connection, build: &str) -> Result<String> {
    db::delete_build(conn, build)?;
    Ok(format!("Deleted build '{build}'\n"))
}
