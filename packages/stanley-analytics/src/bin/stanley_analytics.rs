//! Stanley Analytics CLI - portfolio performance and risk reports as JSON.
//!
//! Every command prints an `ApiResponse` envelope on stdout; logs go to stderr
//! and are filtered with `RUST_LOG`.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use stanley_analytics::{
    drawdown::analyze,
    export::{export_table, Table, ToRows},
    ingest::parse_prices,
    returns::{aggregate, annualized_series_return, cumulative_return, simple_returns},
    AnalyticsReport, ApiResponse, EngineConfig, EvaluationWindow, Frequency, InputBundle,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "stanley-analytics")]
#[command(about = "Stanley analytics CLI - portfolio performance and risk reports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the full analytics report
    Report {
        /// JSON input bundle
        #[arg(short, long)]
        input: PathBuf,
        /// Config file (defaults to STANLEY_ANALYTICS_CONFIG or ~/.zee/stanley/analytics.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Portfolio returns from the valuation history
    Returns {
        #[arg(short, long)]
        input: PathBuf,
        /// Aggregate daily returns to this frequency
        #[arg(short, long, value_enum, default_value = "daily")]
        frequency: Frequency,
    },
    /// Drawdown episodes of the portfolio valuation
    Drawdown {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Number of deepest episodes to list
        #[arg(short = 'n', long, default_value = "5")]
        top: usize,
    },
    /// Export one report table as rows
    Export {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long, value_enum)]
        table: Table,
        /// Benchmark id for the active-returns table
        #[arg(short, long)]
        benchmark: Option<String>,
    },
    /// Engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starting config file
    Init {
        #[arg(short, long)]
        path: Option<PathBuf>,
        /// Evaluation window start (YYYY-MM-DD), defaults to January 1 of this year
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Evaluation window end (YYYY-MM-DD), defaults to December 31 of this year
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the active config
    Show {
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let response = match run(cli.command) {
        Ok(data) => ApiResponse::ok(data),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            ApiResponse::err(format!("{:#}", e))
        }
    };
    let failed = !response.ok;

    match serde_json::to_string_pretty(&response) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("failed to serialize response: {}", e);
            std::process::exit(2);
        }
    }
    if failed {
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<Value> {
    match command {
        Commands::Report { input, config } => {
            let report = build_report(&input, config.as_deref())?;
            Ok(serde_json::to_value(report)?)
        }
        Commands::Returns { input, frequency } => handle_returns(&input, frequency),
        Commands::Drawdown { input, config, top } => {
            handle_drawdown(&input, config.as_deref(), top)
        }
        Commands::Export {
            input,
            config,
            table,
            benchmark,
        } => {
            let report = build_report(&input, config.as_deref())?;
            let rows = export_table(&report, table, benchmark.as_deref())?;
            Ok(json!({
                "table": table,
                "row_count": rows.len(),
                "rows": rows,
            }))
        }
        Commands::Config { action } => handle_config(action),
    }
}

fn load_bundle(input: &Path) -> Result<InputBundle> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("reading input bundle {}", input.display()))?;
    InputBundle::from_json(&content)
        .with_context(|| format!("parsing input bundle {}", input.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::load_default()?,
    };
    Ok(config)
}

fn build_report(input: &Path, config: Option<&Path>) -> Result<AnalyticsReport> {
    let config = load_config(config)?;
    let bundle = load_bundle(input)?;
    Ok(AnalyticsReport::compute(&bundle, &config)?)
}

fn handle_returns(input: &Path, frequency: Frequency) -> Result<Value> {
    let bundle = load_bundle(input)?;
    let valuation = parse_prices(&bundle.prices)?.valuation()?;
    let returns = aggregate(&simple_returns(&valuation)?, frequency)?;

    Ok(json!({
        "frequency": frequency,
        "periods": returns.len(),
        "cumulative_return": cumulative_return(returns.values()),
        "annualized_return": annualized_series_return(&returns).ok(),
        "returns": returns.to_rows(),
    }))
}

fn handle_drawdown(input: &Path, config: Option<&Path>, top: usize) -> Result<Value> {
    let config = load_config(config)?;
    let bundle = load_bundle(input)?;
    let valuation = parse_prices(&bundle.prices)?.valuation()?;
    let analysis = analyze(&valuation, config.drawdown_basis)?;

    Ok(json!({
        "basis": analysis.basis,
        "max_drawdown": analysis.max_drawdown,
        "current_drawdown": analysis.current_drawdown(),
        "longest_underwater": analysis.longest_underwater(),
        "episode_count": analysis.episodes.len(),
        "worst_episodes": analysis.worst_episodes(top),
    }))
}

fn handle_config(action: ConfigAction) -> Result<Value> {
    match action {
        ConfigAction::Init {
            path,
            start,
            end,
            force,
        } => {
            let path = path.unwrap_or_else(EngineConfig::default_path);
            if path.exists() && !force {
                bail!(
                    "config already exists at {}; pass --force to overwrite",
                    path.display()
                );
            }

            let year = Utc::now().date_naive().year();
            let start = match start {
                Some(date) => date,
                None => NaiveDate::from_ymd_opt(year, 1, 1).context("invalid start date")?,
            };
            let end = match end {
                Some(date) => date,
                None => NaiveDate::from_ymd_opt(year, 12, 31).context("invalid end date")?,
            };

            let config = EngineConfig::template(EvaluationWindow::new(start, end)?);
            config.save(&path)?;
            tracing::info!(path = %path.display(), "Wrote config template");
            Ok(json!({
                "path": path,
                "config": config,
            }))
        }
        ConfigAction::Show { path } => {
            let path = path.unwrap_or_else(EngineConfig::default_path);
            let config = EngineConfig::load(&path)
                .with_context(|| format!("loading config {}", path.display()))?;
            Ok(json!({
                "path": path,
                "config": config,
            }))
        }
    }
}
