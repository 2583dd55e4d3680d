//! Learning-rate sweep over an external training command
//!
//! Candidates are spaced evenly in log space, shuffled, and run a fixed number
//! at a time. Each run receives `--lr <candidate> --experiments-dir <dir>`
//! appended to the given command, with its own directory under
//! `--experiments-dir`.
//!
//! ```text
//! lr_random_search --num 6 -- python -m small_experiments.mnist_eps_plus_linear.runner --epses-specs "(4,6),(3,6)"
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};

use dctn::search::{shuffled_log_space, CommandLauncher, Supervisor, DEFAULT_SLOTS};
use dctn::utils::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "lr_random_search")]
#[command(about = "Run a training command over log-spaced learning rates")]
struct Args {
    /// Smallest learning rate
    #[arg(long, default_value_t = 5e-5)]
    min_lr: f64,

    /// Largest learning rate
    #[arg(long, default_value_t = 1.5e-4)]
    max_lr: f64,

    /// Number of candidates
    #[arg(long, default_value_t = 3)]
    num: usize,

    /// Jobs running at the same time
    #[arg(long, default_value_t = DEFAULT_SLOTS)]
    slots: usize,

    /// Seed for the candidate order
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Parent directory of the per-run directories
    #[arg(long, default_value = "/tmp/runner")]
    experiments_dir: PathBuf,

    /// Do not set CUDA_VISIBLE_DEVICES to the slot index
    #[arg(long)]
    no_device_pinning: bool,

    /// Training command and its arguments
    #[arg(trailing_var_arg = true, required = true)]
    command: Vec<String>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if args.num < args.slots {
        bail!(
            "need at least as many candidates as slots ({} < {})",
            args.num,
            args.slots
        );
    }

    let candidates = shuffled_log_space(args.min_lr, args.max_lr, args.num, args.seed)
        .context("Failed to generate candidates")?;
    info!(?candidates, "learning rate candidates");

    let Some((program, common_args)) = args.command.split_first() else {
        bail!("no training command given");
    };
    let launcher = CommandLauncher::new(program, common_args)
        .with_experiments_dir(&args.experiments_dir)
        .with_device_pinning(!args.no_device_pinning);
    let supervisor = Supervisor::new(args.slots).context("Invalid slot count")?;

    let report = supervisor.run(&launcher, candidates);
    let failures = report.failures();
    if failures > 0 {
        error!(failures, total = report.launches.len(), "some runs failed");
    } else {
        info!(total = report.launches.len(), "all runs finished");
    }
    for launch in &report.launches {
        info!(
            candidate = launch.job.candidate,
            slot = launch.job.slot,
            dir = %launcher.run_dir(&launch.job).display(),
            ok = launch.succeeded(),
            "run"
        );
    }
    Ok(())
}
