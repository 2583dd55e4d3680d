//! Classification metrics over logits

use ndarray::ArrayView2;

use crate::{DctnError, Result};

fn check_labels(logits: &ArrayView2<'_, f32>, labels: &[usize]) -> Result<()> {
    if logits.nrows() != labels.len() {
        return Err(DctnError::LengthMismatch {
            left: logits.nrows(),
            right: labels.len(),
        });
    }
    if logits.nrows() == 0 {
        return Err(DctnError::ShapeMismatch("empty batch".to_string()));
    }
    if let Some(&label) = labels.iter().find(|&&l| l >= logits.ncols()) {
        return Err(DctnError::ShapeMismatch(format!(
            "label {} out of range for {} classes",
            label,
            logits.ncols()
        )));
    }
    Ok(())
}

/// Fraction of rows whose largest logit is at the label.
/// Ties resolve to the lowest class index.
pub fn accuracy(logits: ArrayView2<'_, f32>, labels: &[usize]) -> Result<f32> {
    check_labels(&logits, labels)?;
    let correct = logits
        .outer_iter()
        .zip(labels)
        .filter(|(row, label)| {
            let predicted = row
                .iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &x)| {
                    if x > best.1 {
                        (i, x)
                    } else {
                        best
                    }
                })
                .0;
            predicted == **label
        })
        .count();
    Ok(correct as f32 / labels.len() as f32)
}

/// Mean negative log-likelihood of the labels under softmax(logits)
pub fn mean_cross_entropy(logits: ArrayView2<'_, f32>, labels: &[usize]) -> Result<f32> {
    check_labels(&logits, labels)?;
    let total: f32 = logits
        .outer_iter()
        .zip(labels)
        .map(|(row, &label)| {
            let max = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
            let log_sum_exp = max + row.mapv(|x| (x - max).exp()).sum().ln();
            log_sum_exp - row[label]
        })
        .sum();
    Ok(total / labels.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_accuracy() {
        let logits = array![[0.1, 2.0, -1.0], [3.0, 0.0, 0.0], [0.0, 0.0, 5.0]];
        assert_eq!(accuracy(logits.view(), &[1, 0, 0]).unwrap(), 2.0 / 3.0);
    }

    #[test]
    fn test_cross_entropy_uniform() {
        let logits = Array2::<f32>::zeros((4, 10));
        let ce = mean_cross_entropy(logits.view(), &[0, 3, 9, 5]).unwrap();
        assert!((ce - 10f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn test_cross_entropy_confident() {
        let logits = array![[20.0f32, 0.0], [0.0, 20.0]];
        assert!(mean_cross_entropy(logits.view(), &[0, 1]).unwrap() < 1e-6);
        assert!(mean_cross_entropy(logits.view(), &[1, 0]).unwrap() > 19.0);
    }

    #[test]
    fn test_bad_labels() {
        let logits = Array2::<f32>::zeros((2, 3));
        assert!(accuracy(logits.view(), &[0]).is_err());
        assert!(accuracy(logits.view(), &[0, 3]).is_err());
        assert!(mean_cross_entropy(Array2::<f32>::zeros((0, 3)).view(), &[]).is_err());
    }
}
