//! Fixed-slot supervisor for training processes

use std::any::Any;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::Command;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, Scope};

use tracing::{error, info};

use crate::{DctnError, Result};

/// Worker slots used unless configured otherwise
pub const DEFAULT_SLOTS: usize = 2;

/// One unit of work: a candidate value run in a slot
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Job {
    /// Launch order, starting at 0; unique within a search
    pub index: usize,
    /// Slot the job runs in
    pub slot: usize,
    /// Candidate learning rate
    pub candidate: f64,
}

/// How a finished process exited
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl Outcome {
    /// True for exit code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a job to completion, blocking the calling thread
pub trait JobLauncher: Sync {
    /// Start the job and wait for it to exit
    fn run(&self, job: &Job) -> io::Result<Outcome>;
}

/// A job and how it ended; `outcome` is `None` if it never started or its
/// launcher failed
#[derive(Clone, Debug, PartialEq)]
pub struct Launch {
    /// The job
    pub job: Job,
    /// Exit status, if the process started and was waited for
    pub outcome: Option<Outcome>,
}

impl Launch {
    /// Started and exited with code 0
    pub fn succeeded(&self) -> bool {
        self.outcome.is_some_and(|o| o.success())
    }
}

/// Every launch of a search, in completion order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchReport {
    /// Finished launches
    pub launches: Vec<Launch>,
}

impl SearchReport {
    /// Launches that failed to start or exited non-zero
    pub fn failures(&self) -> usize {
        self.launches.iter().filter(|l| !l.succeeded()).count()
    }
}

/// Hands candidates to a fixed number of slots until none remain
#[derive(Clone, Copy, Debug)]
pub struct Supervisor {
    slots: usize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Supervisor {
            slots: DEFAULT_SLOTS,
        }
    }
}

impl Supervisor {
    /// Supervisor with `slots` concurrent jobs
    pub fn new(slots: usize) -> Result<Self> {
        if slots == 0 {
            return Err(DctnError::Search("need at least one slot".to_string()));
        }
        Ok(Supervisor { slots })
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Run every candidate, taking them from the end of `candidates`.
    ///
    /// Each job runs on its own thread and reports back over a channel, so
    /// the supervisor sleeps until some job exits. A failed job is logged and
    /// its slot reused; the search returns once all candidates have been
    /// launched and every launched job has exited.
    pub fn run<L: JobLauncher>(&self, launcher: &L, mut candidates: Vec<f64>) -> SearchReport {
        let (done_tx, done_rx) = mpsc::channel();
        thread::scope(|scope| {
            let mut next_index = 0;
            let mut running = 0;
            let mut launches = Vec::new();

            let mut start = |slot: usize, candidate: f64| {
                let job = Job {
                    index: next_index,
                    slot,
                    candidate,
                };
                next_index += 1;
                info!(index = job.index, slot, candidate, "launching job");
                spawn_job(scope, launcher, &done_tx, job);
            };

            for slot in 0..self.slots {
                match candidates.pop() {
                    Some(candidate) => {
                        start(slot, candidate);
                        running += 1;
                    }
                    None => break,
                }
            }

            while running > 0 {
                let Ok((job, result)) = done_rx.recv() else {
                    break;
                };
                running -= 1;
                let outcome = match result {
                    Ok(outcome) if outcome.success() => {
                        info!(index = job.index, slot = job.slot, "job finished");
                        Some(outcome)
                    }
                    Ok(outcome) => {
                        error!(
                            index = job.index,
                            slot = job.slot,
                            candidate = job.candidate,
                            code = ?outcome.code,
                            "JOB FAILED"
                        );
                        Some(outcome)
                    }
                    Err(err) => {
                        error!(
                            index = job.index,
                            slot = job.slot,
                            candidate = job.candidate,
                            error = %err,
                            "JOB DID NOT RUN TO COMPLETION"
                        );
                        None
                    }
                };
                launches.push(Launch { job, outcome });

                if let Some(candidate) = candidates.pop() {
                    start(job.slot, candidate);
                    running += 1;
                }
            }

            SearchReport { launches }
        })
    }
}

fn spawn_job<'scope, 'env, L: JobLauncher>(
    scope: &'scope Scope<'scope, 'env>,
    launcher: &'env L,
    done: &Sender<(Job, io::Result<Outcome>)>,
    job: Job,
) {
    let done = done.clone();
    scope.spawn(move || {
        // A panicking launcher still has to report, or the supervisor would
        // wait for it forever.
        let result = panic::catch_unwind(AssertUnwindSafe(|| launcher.run(&job)))
            .unwrap_or_else(|payload| {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("launcher panicked: {}", panic_message(payload.as_ref())),
                ))
            });
        // The receiver outlives every job thread.
        let _ = done.send((job, result));
    });
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Runs each job as `program args... --lr <candidate> --experiments-dir <dir>`.
///
/// Every job gets its own directory under the experiments directory, so
/// concurrent jobs never write to the same paths.
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    program: OsString,
    args: Vec<OsString>,
    experiments_dir: PathBuf,
    pin_devices: bool,
}

impl CommandLauncher {
    /// Launcher for `program` with the arguments shared by all jobs
    pub fn new<I, S>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        CommandLauncher {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            experiments_dir: std::env::temp_dir().join("runner"),
            pin_devices: true,
        }
    }

    /// Parent directory of the per-job directories
    pub fn with_experiments_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.experiments_dir = dir.into();
        self
    }

    /// Whether to set `CUDA_VISIBLE_DEVICES` to the job's slot
    pub fn with_device_pinning(mut self, pin: bool) -> Self {
        self.pin_devices = pin;
        self
    }

    /// Directory a job writes into
    pub fn run_dir(&self, job: &Job) -> PathBuf {
        self.experiments_dir.join(format!("run-{:03}", job.index))
    }

    /// The command for a job, not yet started
    pub fn command(&self, job: &Job) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--lr")
            .arg(job.candidate.to_string())
            .arg("--experiments-dir")
            .arg(self.run_dir(job));
        if self.pin_devices {
            command.env("CUDA_VISIBLE_DEVICES", job.slot.to_string());
        }
        command
    }
}

impl JobLauncher for CommandLauncher {
    fn run(&self, job: &Job) -> io::Result<Outcome> {
        fs::create_dir_all(self.run_dir(job))?;
        let status = self.command(job).status()?;
        Ok(Outcome {
            code: status.code(),
        })
    }
}
