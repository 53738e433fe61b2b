//! Quality Gate CLI
//!
//! Compares a "current" scanner build against the "latest release" build
//! for every configured result set and fails the pipeline on regressions.
//!
//! # Exit Codes
//!
//! - `0` every result set passed
//! - `1` at least one result set failed the gate
//! - `2` a result set could not be evaluated
//!
//! Running without arguments validates the result sets listed in the
//! embedded configuration.

use clap::{Parser, Subcommand, ValueEnum};
use gate_contract::{
    ContractError, Driver, GateConfig, GateReport, GateSummary, TextRenderer, EXIT_ERROR,
};
use label_comparison::FixtureStore;
use std::path::PathBuf;
use tracing::Level;

const DEFAULT_CONFIG: &str = include_str!("../config/quality-gate.json");

/// Output format for results
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable console report
    Text,
    /// JSON report for machine processing
    Json,
}

/// Verbosity level
#[derive(Debug, Clone, ValueEnum)]
enum Verbosity {
    /// Errors only
    Quiet,
    /// Warnings and gate failures
    Normal,
    /// Progress of each validation run
    Verbose,
    /// Internal state
    Debug,
}

impl Verbosity {
    fn level(&self) -> Level {
        match self {
            Verbosity::Quiet => Level::ERROR,
            Verbosity::Normal => Level::WARN,
            Verbosity::Verbose => Level::INFO,
            Verbosity::Debug => Level::DEBUG,
        }
    }
}

#[derive(Parser)]
#[command(name = "quality-gate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quality gate for vulnerability scanner results")]
#[command(long_about = r#"
Quality Gate - regression checks for vulnerability scanner output

OVERVIEW
  For each configured result set, compares the current scanner build with
  the latest release build against a labeled ground truth. The gate fails
  when, for any image, the current build has:
    - a lower F1 score than the latest release (or an indeterminate one)
    - more than 10% indeterminate matches
    - more false negatives than the latest release

EXAMPLES
  quality-gate                                  # Validate configured result sets
  quality-gate --result-set pr-vs-latest-via-sbom
  quality-gate --format json > gate.json
  quality-gate list                             # Result sets in the store

EXIT CODES
  0  Quality gate passed
  1  Quality gate failed
  2  Error during evaluation
"#)]
struct Cli {
    /// Output verbosity level
    #[arg(short, long, value_enum, default_value = "normal", global = true)]
    verbosity: Verbosity,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Gate configuration file (JSON); defaults to the embedded configuration
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding result set documents (overrides the configuration)
    #[arg(short, long, global = true)]
    store: Option<PathBuf>,

    /// Result set to validate; repeat to validate several (replaces the configured list)
    #[arg(short, long = "result-set", global = true)]
    result_sets: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate result sets and apply the quality gate (default)
    #[command(visible_alias = "r")]
    Run,

    /// List result sets available in the store
    #[command(visible_alias = "l")]
    List,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Generate man page
    Man,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.level())
        .with_writer(std::io::stderr)
        .with_ansi(!cli.no_color)
        .init();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let exit_code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => match load_config(cli.config, cli.store, cli.result_sets) {
            Ok(config) => run_gate(&config, &cli.format, !cli.no_color),
            Err(e) => {
                eprintln!("error: {}", e);
                EXIT_ERROR
            }
        },
        Commands::List => match load_config(cli.config, cli.store, cli.result_sets) {
            Ok(config) => list_result_sets(&config),
            Err(e) => {
                eprintln!("error: {}", e);
                EXIT_ERROR
            }
        },
        Commands::Completions { shell } => {
            generate_completions(shell);
            0
        }
        Commands::Man => generate_man_page(),
    };

    std::process::exit(exit_code);
}

fn load_config(
    path: Option<PathBuf>,
    store: Option<PathBuf>,
    result_sets: Vec<String>,
) -> Result<GateConfig, ContractError> {
    let mut config = match path {
        Some(path) => GateConfig::load(&path)?,
        None => GateConfig::from_json(DEFAULT_CONFIG)?,
    };
    if let Some(store) = store {
        config.store = store;
    }
    if !result_sets.is_empty() {
        config.result_sets = result_sets;
    }
    Ok(config)
}

fn run_gate(config: &GateConfig, format: &OutputFormat, color: bool) -> i32 {
    let store = FixtureStore::new(&config.store);
    let driver = Driver::new(&store, config);
    let renderer = TextRenderer::new(color);

    let mut reports = Vec::with_capacity(config.result_sets.len());
    for name in &config.result_sets {
        match driver.validate(name) {
            Ok(report) => {
                if matches!(format, OutputFormat::Text) {
                    print!("{}", renderer.render_run(&report));
                    println!();
                }
                reports.push(report);
            }
            Err(e) => {
                eprintln!("error: validating {:?}: {}", name, e);
                return EXIT_ERROR;
            }
        }
    }

    let summary = GateSummary::from_reports(&reports);
    match format {
        OutputFormat::Text => print!("{}", renderer.render_summary(&reports)),
        OutputFormat::Json => match GateReport::new(reports).to_json_pretty() {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("error: failed to serialize report: {}", e);
                return EXIT_ERROR;
            }
        },
    }

    summary.exit_code()
}

fn list_result_sets(config: &GateConfig) -> i32 {
    let store = FixtureStore::new(&config.store);
    match store.list_result_sets() {
        Ok(names) => {
            for name in names {
                let marker = if config.result_sets.contains(&name) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}", marker, name);
            }
            0
        }
        Err(e) => {
            eprintln!("error: listing {}: {}", store.root().display(), e);
            EXIT_ERROR
        }
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    clap_complete::generate(
        shell,
        &mut Cli::command(),
        "quality-gate",
        &mut std::io::stdout(),
    );
}

fn generate_man_page() -> i32 {
    use clap::CommandFactory;
    let man = clap_mangen::Man::new(Cli::command());
    let mut buffer: Vec<u8> = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        eprintln!("Failed to generate man page: {}", e);
        return EXIT_ERROR;
    }
    print!("{}", String::from_utf8_lossy(&buffer));
    0
}
