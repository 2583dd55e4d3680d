//! Compare training runs in a single HTML report
//!
//! The configuration is a JSON file listing experiment directories relative
//! to the experiments base directory:
//!
//! ```json
//! {
//!   "experiments": [{"rel_dir": "mnist/run-000", "name": "lr 5e-5", "description": "baseline"}],
//!   "common_description": "EPS (4,6),(3,6) + linear"
//! }
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use dctn::utils::logging::init_logging;
use dctn::viz::{load_experiments, load_run_config, write_report, ReportOptions};

#[derive(Parser, Debug)]
#[command(name = "plot_training")]
#[command(about = "Plot training curves of several experiments")]
struct Args {
    /// Comparison configuration JSON
    config_path: PathBuf,

    /// Where to write the HTML report
    output_path: PathBuf,

    /// Directory the experiments' rel_dir entries are relative to
    #[arg(long, default_value = "/mnt/important/experiments")]
    experiments_base_dir: PathBuf,

    /// One large chart per row
    #[arg(long)]
    big_plots: bool,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let config = load_run_config(&args.config_path)
        .with_context(|| format!("Failed to load {}", args.config_path.display()))?;
    let experiments = load_experiments(&config, &args.experiments_base_dir)
        .context("Failed to load experiments")?;
    info!(count = experiments.len(), "loaded experiments");

    write_report(
        &args.output_path,
        &config,
        &experiments,
        ReportOptions {
            big_plots: args.big_plots,
        },
    )
    .context("Failed to write report")?;
    Ok(())
}
