//! Operations over a whole sequence of EPS cores

use ndarray::{Array4, ArrayView4, Zip};
use rand::Rng;
use rand_distr::Bernoulli;

use super::contraction::{contract, output_extent, CoreShape, Tiling};
use crate::{DctnError, Result};

/// Shape of the feature map produced by contracting `input_dim` with every
/// core in order. Validates the whole chain without touching any values.
pub fn output_dim(
    cores: &[Array4<f32>],
    input_dim: (usize, usize, usize, usize),
    tiling: Tiling,
) -> Result<(usize, usize, usize, usize)> {
    if cores.is_empty() {
        return Err(DctnError::InvalidSpec(
            "a composition needs at least one core".to_string(),
        ));
    }
    let (batch, mut height, mut width, mut channels) = input_dim;
    for core in cores {
        let shape = CoreShape::of(&core.view())?;
        if shape.in_channels != channels {
            return Err(DctnError::ChannelMismatch {
                expected: shape.in_channels,
                found: channels,
            });
        }
        height = output_extent(height, shape.kernel, tiling)?;
        width = output_extent(width, shape.kernel, tiling)?;
        channels = shape.out_channels;
    }
    Ok((batch, height, width, channels))
}

/// Contract every core with the feature map in order, starting from `input`
pub fn contract_with_input(
    cores: &[Array4<f32>],
    input: ArrayView4<'_, f32>,
    tiling: Tiling,
) -> Result<Array4<f32>> {
    contract_with_input_observed(cores, input, tiling, |_, _| {})
}

/// Same as [`contract_with_input`], calling `on_step(i, output)` after core `i`
pub fn contract_with_input_observed<F>(
    cores: &[Array4<f32>],
    input: ArrayView4<'_, f32>,
    tiling: Tiling,
    mut on_step: F,
) -> Result<Array4<f32>>
where
    F: FnMut(usize, &Array4<f32>),
{
    output_dim(cores, input.dim(), tiling)?;

    let mut features = contract(cores[0].view(), input, tiling)?;
    on_step(0, &features);
    for (i, core) in cores.iter().enumerate().skip(1) {
        features = contract(core.view(), features.view(), tiling)?;
        on_step(i, &features);
    }
    Ok(features)
}

/// Sum over all cores of the sum of their squared entries
pub fn epswise_squared_fro_norm(cores: &[Array4<f32>]) -> f32 {
    cores
        .iter()
        .map(|core| core.iter().map(|x| x * x).sum::<f32>())
        .sum()
}

/// Sum over corresponding core pairs of their elementwise product sums
pub fn inner_product(lhs: &[Array4<f32>], rhs: &[Array4<f32>]) -> Result<f32> {
    if lhs.len() != rhs.len() {
        return Err(DctnError::LengthMismatch {
            left: lhs.len(),
            right: rhs.len(),
        });
    }
    if let Some((i, (a, b))) = lhs
        .iter()
        .zip(rhs)
        .enumerate()
        .find(|(_, (a, b))| a.dim() != b.dim())
    {
        return Err(DctnError::ShapeMismatch(format!(
            "core {}: {:?} vs {:?}",
            i,
            a.dim(),
            b.dim()
        )));
    }
    Ok(lhs
        .iter()
        .zip(rhs)
        .map(|(a, b)| Zip::from(a).and(b).fold(0.0f32, |acc, &x, &y| acc + x * y))
        .sum())
}

/// Inverted dropout over core entries.
///
/// Each entry is kept with probability `p` and divided by `p`, or zeroed.
/// A fresh mask is drawn on every call; `p == 1.0` returns the cores as-is.
pub fn dropout_masked<R: Rng + ?Sized>(
    cores: &[Array4<f32>],
    p: f32,
    rng: &mut R,
) -> Result<Vec<Array4<f32>>> {
    if !(p > 0.0 && p <= 1.0) {
        return Err(DctnError::InvalidDropout(p));
    }
    if p == 1.0 {
        return Ok(cores.to_vec());
    }
    let keep = Bernoulli::new(p as f64).map_err(|_| DctnError::InvalidDropout(p))?;
    Ok(cores
        .iter()
        .map(|core| core.mapv(|x| if rng.sample(keep) { x / p } else { 0.0 }))
        .collect())
}
