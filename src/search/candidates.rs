//! Candidate learning rates

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{DctnError, Result};

/// `num` values from `min` to `max` inclusive, evenly spaced in log10
pub fn log_space(min: f64, max: f64, num: usize) -> Result<Vec<f64>> {
    if !(min > 0.0 && max >= min && max.is_finite()) {
        return Err(DctnError::Search(format!(
            "log space needs 0 < min <= max, got [{}, {}]",
            min, max
        )));
    }
    let (lo, hi) = (min.log10(), max.log10());
    Ok(match num {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..num)
            .map(|i| 10f64.powf(lo + (hi - lo) * i as f64 / (num - 1) as f64))
            .collect(),
    })
}

/// [`log_space`] shuffled with a generator seeded from `seed`
pub fn shuffled_log_space(min: f64, max: f64, num: usize, seed: u64) -> Result<Vec<f64>> {
    let mut values = log_space(min, max, num)?;
    values.shuffle(&mut StdRng::seed_from_u64(seed));
    Ok(values)
}
