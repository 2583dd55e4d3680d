//! Which experiments to compare and what is known about each run

use std::collections::BTreeSet;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::records::{load_records, Record};
use crate::utils::load_json;
use crate::Result;

/// Training log inside an experiment directory
pub const LOG_FILE_NAME: &str = "log.log";

/// Run info JSON inside an experiment directory
pub const RUN_INFO_FILE_NAME: &str = "run_info.txt";

/// Run info keys that say nothing about the experiment itself
pub static RUN_INFO_EXCLUDED_KEYS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "breakpoint_on_nan_loss",
        "commit",
        "device",
        "ds_path",
        "es_train_acc",
        "es_train_mean_ce",
        "es_val_acc",
        "es_val_mean_ce",
        "experiments_dir",
        "keep_last_models",
        "max_num_iters",
        "patience",
        "tb_batches",
        "verbosity",
    ]
    .into_iter()
    .collect()
});

/// One experiment of a comparison
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentEntry {
    /// Directory relative to the experiments base directory
    pub rel_dir: String,
    /// Legend label
    pub name: String,
    /// Free-form description
    pub description: String,
}

/// Comparison configuration file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Experiments in legend order
    pub experiments: Vec<ExperimentEntry>,
    /// Shown above the per-experiment descriptions
    pub common_description: String,
}

/// Read a [`RunConfig`] from JSON
pub fn load_run_config(path: impl AsRef<Path>) -> Result<RunConfig> {
    load_json(path)
}

/// Read a run info object, dropping `excluded` keys.
///
/// The remaining keys keep the order they have in the file.
pub fn load_run_info(
    path: impl AsRef<Path>,
    excluded: &BTreeSet<&str>,
) -> Result<Map<String, Value>> {
    let mut info: Map<String, Value> = load_json(path)?;
    info.retain(|key, _| !excluded.contains(key.as_str()));
    Ok(info)
}

/// An experiment with its logs and run info loaded
#[derive(Clone, Debug, PartialEq)]
pub struct Experiment {
    /// Configuration entry
    pub entry: ExperimentEntry,
    /// Run info without the excluded keys, in file order
    pub run_info: Map<String, Value>,
    /// All records
    pub records: Vec<Record>,
    /// Records with strictly increasing train accuracy
    pub increasing_tracc_records: Vec<Record>,
}

/// Load every experiment of `config` from under `base_dir`
pub fn load_experiments(config: &RunConfig, base_dir: impl AsRef<Path>) -> Result<Vec<Experiment>> {
    let base_dir = base_dir.as_ref();
    config
        .experiments
        .iter()
        .map(|entry| {
            let dir = base_dir.join(&entry.rel_dir);
            debug!(dir = %dir.display(), "loading experiment");
            let run_info = load_run_info(dir.join(RUN_INFO_FILE_NAME), &RUN_INFO_EXCLUDED_KEYS)?;
            let log_path = dir.join(LOG_FILE_NAME);
            Ok(Experiment {
                entry: entry.clone(),
                run_info,
                records: load_records(&log_path, false)?,
                increasing_tracc_records: load_records(&log_path, true)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DctnError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_run_info_filtering() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(RUN_INFO_FILE_NAME);
        fs::write(
            &path,
            r#"{"lr": 0.0001, "commit": "abc", "device": "cuda", "epses_specs": "(4,6),(3,6)", "batch_size": 128}"#,
        )
        .unwrap();

        let info = load_run_info(&path, &RUN_INFO_EXCLUDED_KEYS).unwrap();
        let keys: Vec<&str> = info.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["lr", "epses_specs", "batch_size"]);
        assert_eq!(
            serde_json::to_string(&info).unwrap(),
            r#"{"lr":0.0001,"epses_specs":"(4,6),(3,6)","batch_size":128}"#
        );
    }

    #[test]
    fn test_load_experiments() {
        let base = tempdir().unwrap();
        let run = base.path().join("mnist/run-000");
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join(RUN_INFO_FILE_NAME), r#"{"lr": 0.0001, "patience": 5}"#).unwrap();
        fs::write(
            run.join(LOG_FILE_NAME),
            "nitd=0 tracc=0.2 vacc=0.2 trmce=2 vmce=2\nnitd=10 tracc=0.1 vacc=0.3 trmce=1 vmce=1\n",
        )
        .unwrap();

        let config: RunConfig = serde_json::from_str(
            r#"{
                "experiments": [{"rel_dir": "mnist/run-000", "name": "lr 1e-4", "description": "baseline"}],
                "common_description": "learning rates"
            }"#,
        )
        .unwrap();
        let experiments = load_experiments(&config, base.path()).unwrap();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0].records.len(), 2);
        assert_eq!(experiments[0].increasing_tracc_records.len(), 1);
        assert!(!experiments[0].run_info.contains_key("patience"));

        let missing = RunConfig {
            experiments: vec![ExperimentEntry {
                rel_dir: "nope".to_string(),
                name: "nope".to_string(),
                description: String::new(),
            }],
            common_description: String::new(),
        };
        assert!(matches!(
            load_experiments(&missing, base.path()),
            Err(DctnError::Io(_))
        ));
    }

    #[test]
    fn test_malformed_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"experiments": [{"name": "x"}]}"#).unwrap();
        assert!(matches!(load_run_config(&path), Err(DctnError::Json(_))));
    }
}
