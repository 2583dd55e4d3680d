//! Training logs, run configuration and comparison reports

mod records;
mod run_config;

#[cfg(feature = "viz")]
mod report;

pub use records::{load_records, parse_records, Record};
pub use run_config::{
    load_experiments, load_run_config, load_run_info, Experiment, ExperimentEntry, RunConfig,
    LOG_FILE_NAME, RUN_INFO_EXCLUDED_KEYS, RUN_INFO_FILE_NAME,
};

#[cfg(feature = "viz")]
pub use report::{render_report, write_report, ReportOptions};
