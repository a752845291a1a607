mod common;

use std::path::{Path, PathBuf};

use beamcov::cli::{self, Inputs, Style};
use beamcov::config::TargetsConfig;
use beamcov::model::CoverageMetric;
use beamcov::target::BuildOutcome;

use common::CoverFile;

fn inputs(dir: &Path) -> Inputs {
    let data = common::sample_cover()
        .module("n", "/proj/app/ebin/n.beam")
        .bump("n", "g", 0, 3, 0)
        .bump("n", "g", 0, 4, 0)
        .bump("n", "g", 0, 7, 0)
        .write_to(dir, "all.coverdata");
    Inputs::new(vec![data], dir.join("beamcov.json"))
}

fn write_targets(path: &Path, config: &TargetsConfig) {
    config.save(path).unwrap();
}

#[test]
fn summary_text() {
    let dir = tempfile::tempdir().unwrap();
    let out = cli::cmd_summary(&inputs(dir.path()), "42", Style::Text).unwrap();
    assert!(out.contains("Build:      42"));
    assert!(out.contains("Lines:      2/6 (33.33%)"));
    assert!(out.contains("Modules:    1/2 (50.00%)"));
    assert!(out.contains("Sources:    /proj/app/src"));
    assert!(!out.contains("Health"));
}

#[test]
fn summary_json_is_parseable() {
    let dir = tempfile::tempdir().unwrap();
    let out = cli::cmd_summary(&inputs(dir.path()), "42", Style::Json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(value["build"], "42");
    assert_eq!(value["results"]["LINE"]["numerator"], 2);
    assert_eq!(value["results"]["LINE"]["denominator"], 6);
}

#[test]
fn modules_sorted_by_coverage() {
    let dir = tempfile::tempdir().unwrap();
    let out = cli::cmd_modules(&inputs(dir.path()), true).unwrap();
    let n = out.find("\nn ").unwrap();
    let m = out.find("\nm ").unwrap();
    assert!(n < m);
    assert!(out.contains("0/3 (0.00%)"));
}

#[test]
fn lines_and_uncovered() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());

    let out = cli::cmd_lines(&inputs, "m", false).unwrap();
    assert!(out.contains("    11           0  ✗"));
    assert!(out.contains("    12           3  ✓"));

    let out = cli::cmd_lines(&inputs, "n", true).unwrap();
    assert!(out.contains("Uncovered lines in 'n':"));
    assert!(out.contains("  3-7"));
    assert!(out.contains("(3 lines)"));

    let err = cli::cmd_lines(&inputs, "nope", false).unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[test]
fn check_reports_failure_and_keeps_targets() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    let mut config = TargetsConfig {
        fail_unstable: true,
        auto_update_stability: true,
        ..Default::default()
    };
    config.set_targets(&["line:80:0:50".parse().unwrap()]);
    write_targets(&inputs.targets, &config);

    let check = cli::cmd_check(&inputs, false).unwrap();
    assert_eq!(check.outcome, BuildOutcome::Failure);
    assert!(check.text.contains("Unstable: Lines below 50.00%"));
    assert!(check.text.contains("Result: Failure"));
    assert_eq!(TargetsConfig::load(&inputs.targets).unwrap(), config);
}

#[test]
fn check_ratchets_and_saves() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = inputs(dir.path());
    let mut config = TargetsConfig {
        auto_update_health: true,
        ..Default::default()
    };
    config.set_targets(&["line:80:10:".parse().unwrap()]);
    write_targets(&inputs.targets, &config);

    let dry = cli::cmd_check(&inputs, true).unwrap();
    assert_eq!(dry.outcome, BuildOutcome::Success);
    assert!(dry.text.contains("Raised health minimum for Lines to 33.33%"));
    assert_eq!(TargetsConfig::load(&inputs.targets).unwrap(), config);

    cli::cmd_check(&inputs, false).unwrap();
    let saved = TargetsConfig::load(&inputs.targets).unwrap();
    assert_eq!(saved.unhealthy.target(CoverageMetric::Line), Some(33.33));
}

#[test]
fn check_with_unreadable_file_fails_and_keeps_targets() {
    let dir = tempfile::tempdir().unwrap();
    let good = common::sample_cover().write_to(dir.path(), "good.coverdata");
    let bad = CoverFile::new()
        .module("t", "/p/ebin/t.beam")
        .raw(&[9, 131])
        .write_to(dir.path(), "bad.coverdata");
    let inputs = Inputs::new(vec![good, bad], dir.path().join("beamcov.json"));

    let mut config = TargetsConfig {
        auto_update_health: true,
        auto_update_stability: true,
        ..Default::default()
    };
    config.set_targets(&["line:80:10:".parse().unwrap()]);
    write_targets(&inputs.targets, &config);

    let check = cli::cmd_check(&inputs, false).unwrap();
    assert_eq!(check.outcome, BuildOutcome::Failure);
    assert!(!check.text.contains("Raised"));
    assert!(check.text.contains("Skipped"));
    assert!(check.text.contains("bad.coverdata"));
    assert_eq!(TargetsConfig::load(&inputs.targets).unwrap(), config);
}

#[test]
fn check_without_targets_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let check = cli::cmd_check(&inputs(dir.path()), false).unwrap();
    assert_eq!(check.outcome, BuildOutcome::Success);
    assert!(!dir.path().join("beamcov.json").exists());
}

#[test]
fn unreadable_inputs_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let bad = CoverFile::new().raw(&[5, 131]).write_to(dir.path(), "bad.coverdata");
    let good = common::sample_cover().write_to(dir.path(), "good.coverdata");

    let only_bad = Inputs::new(vec![bad.clone()], dir.path().join("t.json"));
    let err = cli::cmd_summary(&only_bad, "1", Style::Text).unwrap_err();
    assert!(err.to_string().contains("could be read"));

    let both = Inputs::new(vec![bad, good], dir.path().join("t.json"));
    let out = cli::cmd_summary(&both, "1", Style::Text).unwrap();
    assert!(out.contains("Skipped"));
    assert!(out.contains("bad.coverdata"));

    let mut strict = both.clone();
    strict.fail_fast = true;
    assert!(cli::cmd_summary(&strict, "1", Style::Text).is_err());

    let none = Inputs::new(Vec::<PathBuf>::new(), dir.path().join("t.json"));
    assert!(cli::cmd_modules(&none, false).is_err());
}

#[test]
fn record_history_trend_delete() {
    let dir = tempfile::tempdir().unwrap();
    let (mut conn, _db_dir, _) = common::setup_db();
    let inputs = inputs(dir.path());

    assert_eq!(
        cli::cmd_history(&conn, None, Style::Text).unwrap(),
        "No builds recorded.\n"
    );

    let out = cli::cmd_record(&mut conn, &inputs, "100", false).unwrap();
    assert!(out.starts_with("Recorded build '100' from 1 file(s)"));
    assert!(cli::cmd_record(&mut conn, &inputs, "100", false).is_err());
    cli::cmd_record(&mut conn, &inputs, "100", true).unwrap();

    let history = cli::cmd_history(&conn, None, Style::Text).unwrap();
    assert!(history.contains("100"));

    let shown = cli::cmd_history(&conn, Some("100"), Style::Markdown).unwrap();
    assert!(shown.contains("### Cover coverage: build 100"));
    assert!(shown.contains("`n`"));

    let trend = cli::cmd_trend(&conn, CoverageMetric::Line, None, None).unwrap();
    assert!(trend.contains("Lines coverage by build:"));
    assert!(trend.contains("33.33%"));

    let trend = cli::cmd_trend(&conn, CoverageMetric::Function, Some("m"), Some(5)).unwrap();
    assert!(trend.starts_with("Module: m\n"));
    assert!(trend.contains("100.00%"));

    assert_eq!(
        cli::cmd_delete(&mut conn, "100").unwrap(),
        "Deleted build '100'\n"
    );
    assert!(cli::cmd_history(&conn, Some("100"), Style::Text).is_err());
}
