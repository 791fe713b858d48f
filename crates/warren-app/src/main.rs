//! Command-line driver for the Warren rabbit population simulator.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;
use warren_core::{BatchConfig, BatchReport, MetricSummary, SurvivalModel, run_batch};

#[derive(Parser, Debug)]
#[command(
    name = "warren",
    version,
    about = "Monte Carlo simulation of rabbit population dynamics"
)]
struct Cli {
    /// Month horizon for every run.
    #[arg(long, default_value_t = 240)]
    months: u32,

    /// Rabbits seeded per run; exactly 2 uses the founder-pair mode.
    #[arg(long, default_value_t = 100_000)]
    population: u32,

    /// Number of independent runs to aggregate.
    #[arg(long, default_value_t = 100)]
    runs: u32,

    /// Base seed; each run derives its own stream from this and its index.
    #[arg(long, default_value_t = 1_234_997_890_123_456_700)]
    seed: u64,

    /// Survival model applied to every run.
    #[arg(long, value_enum, default_value_t = ModelArg::Static)]
    model: ModelArg,

    /// Record per-month snapshots for the first N runs.
    #[arg(long, default_value_t = 0)]
    snapshot_runs: u32,

    /// Directory to export CSV artifacts into.
    #[arg(long)]
    csv_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Static,
    Gaussian,
    Exponential,
}

impl From<ModelArg> for SurvivalModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Static => Self::Static,
            ModelArg::Gaussian => Self::Gaussian,
            ModelArg::Exponential => Self::Exponential,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = BatchConfig {
        months: cli.months,
        initial_population: cli.population,
        runs: cli.runs,
        base_seed: cli.seed,
        survival_model: cli.model.into(),
        snapshot_runs: cli.snapshot_runs,
        ..BatchConfig::default()
    };

    let report = run_batch(&config).context("batch rejected")?;
    print_report(&report);

    if let Some(dir) = cli.csv_dir {
        let written = warren_storage::export_batch(&report, &dir)
            .with_context(|| format!("exporting CSV files to {}", dir.display()))?;
        info!(files = written.len(), dir = %dir.display(), "CSV export complete");
        println!("Exported {} CSV file(s) to {}", written.len(), dir.display());
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn print_metric(label: &str, summary: &MetricSummary) {
    println!("\n{label}:");
    println!("  mean                : {:.2}", summary.mean);
    println!("  std dev             : {:.2}", summary.std_dev);
    println!("  min / max           : {:.0} / {:.0}", summary.min, summary.max);
    println!(
        "  95% CI (mean)       : [{:.2} ; {:.2}]",
        summary.ci_low, summary.ci_high
    );
}

fn print_report(report: &BatchReport) {
    println!("\nInput:");
    println!("  months              : {}", report.config.months);
    println!("  initial population  : {}", report.config.initial_population);
    println!("  simulations         : {}", report.config.runs);
    println!("  survival model      : {:?}", report.config.survival_model);
    println!("  base seed           : {}", report.config.base_seed);

    print_metric("Final alive rabbits", &report.final_alive);
    print_metric("Final dead rabbits", &report.final_dead);
    print_metric("Peak population", &report.peak_population);
    print_metric("Peak month", &report.peak_month);
    print_metric("Trough population", &report.trough_population);
    print_metric("Trough month", &report.trough_month);
    print_metric("Extinction month (extinct runs)", &report.extinction_month);

    println!("\nExtinctions:");
    println!("  count               : {}", report.extinctions);
    println!("  percent             : {:.2}%", report.extinction_rate);
    if report.failures > 0 {
        println!("\nFailed runs           : {}", report.failures);
    }
    println!();
}
