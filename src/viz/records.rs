//! Evaluation records parsed from training logs
//!
//! A record line carries whitespace-separated `key=value` tokens, e.g.
//!
//! ```text
//! 2020-05-01 12:00:00 INFO nitd=1000 tracc=0.912 vacc=0.905 trmce=0.31 vmce=0.33
//! ```
//!
//! Tokens without `=` and unknown keys are ignored. Lines without `nitd=` are
//! not records at all.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::{DctnError, Result};

/// One evaluation point of a training run
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record {
    /// Number of iterations done
    pub nitd: u64,
    /// Train accuracy
    pub tracc: f64,
    /// Validation accuracy
    pub vacc: f64,
    /// Train mean cross-entropy
    pub trmce: f64,
    /// Validation mean cross-entropy
    pub vmce: f64,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nitd={} tracc={} vacc={} trmce={} vmce={}",
            self.nitd, self.tracc, self.vacc, self.trmce, self.vmce
        )
    }
}

fn is_record_line(line: &str) -> bool {
    line.split_whitespace().any(|token| token.starts_with("nitd="))
}

fn parse_line(line: &str, number: usize) -> Result<Record> {
    let err = |message: String| DctnError::LogParse {
        line: number,
        message,
    };

    let mut nitd = None;
    let mut floats: [Option<f64>; 4] = [None; 4];
    const FLOAT_KEYS: [&str; 4] = ["tracc", "vacc", "trmce", "vmce"];

    for token in line.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key == "nitd" {
            let parsed = value
                .parse::<u64>()
                .map_err(|e| err(format!("bad nitd {:?}: {}", value, e)))?;
            nitd = Some(parsed);
        } else if let Some(slot) = FLOAT_KEYS.iter().position(|k| *k == key) {
            let parsed = value
                .parse::<f64>()
                .map_err(|e| err(format!("bad {} {:?}: {}", key, value, e)))?;
            floats[slot] = Some(parsed);
        }
    }

    let nitd = nitd.ok_or_else(|| err("missing nitd".to_string()))?;
    let mut values = [0.0; 4];
    for (i, value) in floats.iter().enumerate() {
        values[i] = value.ok_or_else(|| err(format!("missing {}", FLOAT_KEYS[i])))?;
    }
    let [tracc, vacc, trmce, vmce] = values;

    Ok(Record {
        nitd,
        tracc,
        vacc,
        trmce,
        vmce,
    })
}

/// Parse every record in `text`, in order.
///
/// With `increasing_tracc` only records whose train accuracy is strictly
/// greater than that of every earlier record are kept.
pub fn parse_records(text: &str, increasing_tracc: bool) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut best_tracc = f64::NEG_INFINITY;

    for (i, line) in text.lines().enumerate() {
        if !is_record_line(line) {
            continue;
        }
        let record = parse_line(line, i + 1)?;
        if increasing_tracc {
            if record.tracc <= best_tracc {
                continue;
            }
            best_tracc = record.tracc;
        }
        records.push(record);
    }

    Ok(records)
}

/// Read and parse a log file
pub fn load_records(path: impl AsRef<Path>, increasing_tracc: bool) -> Result<Vec<Record>> {
    let text = fs::read_to_string(path)?;
    parse_records(&text, increasing_tracc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LOG_FILE: &str = "log.log";

    const LOG: &str = "\
starting run
INFO nitd=0 tracc=0.1 vacc=0.11 trmce=2.3 vmce=2.31
INFO loss=0.5
INFO nitd=100 tracc=0.8 vacc=0.78 trmce=0.6 vmce=0.65
INFO nitd=200 tracc=0.75 vacc=0.8 trmce=0.55 vmce=0.6
INFO nitd=300 tracc=0.9 vacc=0.85 trmce=0.3 vmce=0.4 lr=0.0001
";

    #[test]
    fn test_parse_all() {
        let records = parse_records(LOG, false).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records[1],
            Record {
                nitd: 100,
                tracc: 0.8,
                vacc: 0.78,
                trmce: 0.6,
                vmce: 0.65
            }
        );
        assert_eq!(records[3].nitd, 300);
    }

    #[test]
    fn test_increasing_tracc() {
        let records = parse_records(LOG, true).unwrap();
        let nitds: Vec<u64> = records.iter().map(|r| r.nitd).collect();
        assert_eq!(nitds, vec![0, 100, 300]);
    }

    #[test]
    fn test_equal_tracc_is_dropped() {
        let text = "nitd=1 tracc=0.5 vacc=0 trmce=1 vmce=1\nnitd=2 tracc=0.5 vacc=0 trmce=1 vmce=1";
        assert_eq!(parse_records(text, true).unwrap().len(), 1);
        assert_eq!(parse_records(text, false).unwrap().len(), 2);
    }

    #[test]
    fn test_display_parses_back() {
        let record = Record {
            nitd: 42,
            tracc: 0.25,
            vacc: 0.5,
            trmce: 1.5,
            vmce: 1.75,
        };
        let parsed = parse_records(&record.to_string(), false).unwrap();
        assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn test_malformed_lines() {
        let missing = "ok\nnitd=5 tracc=0.5 vacc=0.5 trmce=1.0";
        match parse_records(missing, false) {
            Err(DctnError::LogParse { line, message }) => {
                assert_eq!(line, 2);
                assert!(message.contains("vmce"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let bad = "nitd=five tracc=0.5 vacc=0.5 trmce=1.0 vmce=1.0";
        assert!(matches!(
            parse_records(bad, false),
            Err(DctnError::LogParse { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_records() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();
        file.flush().unwrap();
        assert_eq!(load_records(file.path(), true).unwrap().len(), 3);

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(LOG_FILE);
        assert!(matches!(load_records(&missing, false), Err(DctnError::Io(_))));
    }
}
