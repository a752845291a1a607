use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use beamcov::cli::{self, Inputs, Style};
use beamcov::db;
use beamcov::model::CoverageMetric;
use beamcov::target::BuildOutcome;

/// beamcov: Erlang cover data aggregation, coverage targets and history.
#[derive(Parser)]
#[command(name = "beamcov", version, about)]
struct Cli {
    /// Path to the SQLite history database.
    #[arg(long, global = true, default_value = ".beamcov.db")]
    db: PathBuf,

    /// Log debug output to stderr (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Cover export files (`cover:export/1`), folded in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// JSON file with coverage targets and publisher flags.
    #[arg(long, default_value = "beamcov.json")]
    targets: PathBuf,

    /// Stop at the first unreadable file instead of skipping it.
    #[arg(long)]
    fail_fast: bool,
}

impl InputArgs {
    fn into_inputs(self) -> Inputs {
        Inputs {
            files: self.files,
            targets: self.targets,
            fail_fast: self.fail_fast,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show project-wide coverage of a set of cover files.
    Summary {
        #[command(flatten)]
        input: InputArgs,

        /// Build identifier shown in the summary.
        #[arg(long, default_value = "local")]
        build: String,

        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },

    /// List per-module coverage.
    Modules {
        #[command(flatten)]
        input: InputArgs,

        /// Sort by line coverage ascending (show worst modules first).
        #[arg(long)]
        sort_by_coverage: bool,
    },

    /// Show line-level coverage of one module.
    Lines {
        #[command(flatten)]
        input: InputArgs,

        /// Module name.
        #[arg(long)]
        module: String,

        /// Only list the lines that were never hit.
        #[arg(long)]
        uncovered: bool,
    },

    /// Check coverage against the configured targets and ratchet them.
    Check {
        #[command(flatten)]
        input: InputArgs,

        /// Do not write raised targets back to the targets file.
        #[arg(long)]
        dry_run: bool,
    },

    /// Record a build snapshot in the history database.
    Record {
        #[command(flatten)]
        input: InputArgs,

        /// Build identifier.
        #[arg(long)]
        build: String,

        /// Replace an existing snapshot of the same build.
        #[arg(long)]
        overwrite: bool,
    },

    /// List recorded builds, or show one with --build.
    History {
        #[arg(long)]
        build: Option<String>,

        #[arg(long, value_enum, default_value = "text")]
        style: Style,
    },

    /// Show how a metric evolved over the recorded builds.
    Trend {
        /// modules, function or line.
        #[arg(long, default_value = "line")]
        metric: CoverageMetric,

        /// Restrict to one module.
        #[arg(long)]
        module: Option<String>,

        /// Only the most recent builds.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Delete a build from the history database.
    Delete {
        build: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_db(path: &std::path::Path) -> Result<rusqlite::Connection> {
    let conn = db::open(path).context("Failed to open database")?;
    db::init_schema(&conn).context("Failed to initialize schema")?;
    Ok(conn)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let output = match cli.command {
        Commands::Summary { input, build, style } => {
            cli::cmd_summary(&input.into_inputs(), &build, style)?
        }
        Commands::Modules {
            input,
            sort_by_coverage,
        } => cli::cmd_modules(&input.into_inputs(), sort_by_coverage)?,
        Commands::Lines {
            input,
            module,
            uncovered,
        } => cli::cmd_lines(&input.into_inputs(), &module, uncovered)?,
        Commands::Check { input, dry_run } => {
            let check = cli::cmd_check(&input.into_inputs(), dry_run)?;
            print!("{}", check.text);
            return Ok(match check.outcome {
                BuildOutcome::Failure => ExitCode::FAILURE,
                BuildOutcome::Success | BuildOutcome::Unstable => ExitCode::SUCCESS,
            });
        }
        Commands::Record {
            input,
            build,
            overwrite,
        } => {
            let mut conn = open_db(&cli.db)?;
            cli::cmd_record(&mut conn, &input.into_inputs(), &build, overwrite)?
        }
        Commands::History { build, style } => {
            let conn = open_db(&cli.db)?;
            cli::cmd_history(&conn, build.as_deref(), style)?
        }
        Commands::Trend {
            metric,
            module,
            limit,
        } => {
            let conn = open_db(&cli.db)?;
            cli::cmd_trend(&conn, metric, module.as_deref(), limit)?
        }
        Commands::Delete { build } => {
            let mut conn = open_db(&cli.db)?;
            cli::cmd_delete(&mut conn, &build)?
        }
    };
    print!("{output}");
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    run(cli)
}
