//! Affine classifier head

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use rand_distr::{StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

use crate::eps::OneTensorInitialization;
use crate::{DctnError, Result};

/// Dense layer computing `x · Wᵀ + b`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    /// `(out_features, in_features)`
    weight: Array2<f32>,
    /// `(out_features,)`
    bias: Array1<f32>,
}

impl Linear {
    /// Default initialization: weight `N(0, 1) · in^-0.5 / 4`, bias `U(-in^-0.5, in^-0.5)`
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        rng: &mut R,
    ) -> Result<Self> {
        check_features(in_features, out_features)?;
        let scale = (in_features as f32).powf(-0.5);
        let weight = Array2::from_shape_simple_fn((out_features, in_features), || {
            rng.sample::<f32, _>(StandardNormal) * scale / 4.0
        });
        let bound = Uniform::new_inclusive(-scale, scale);
        let bias = Array1::from_shape_simple_fn(out_features, || rng.sample(bound));
        Ok(Linear { weight, bias })
    }

    /// Weight and bias drawn from the given distributions
    pub fn from_initializations<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        weight: &OneTensorInitialization,
        bias: &OneTensorInitialization,
        rng: &mut R,
    ) -> Result<Self> {
        check_features(in_features, out_features)?;
        Ok(Linear {
            weight: weight.sample((out_features, in_features), rng)?,
            bias: bias.sample(out_features, rng)?,
        })
    }

    /// Build from existing parameters
    pub fn from_parts(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if weight.nrows() != bias.len() {
            return Err(DctnError::ShapeMismatch(format!(
                "weight has {} rows but bias has {} entries",
                weight.nrows(),
                bias.len()
            )));
        }
        check_features(weight.ncols(), weight.nrows())?;
        Ok(Linear { weight, bias })
    }

    /// Number of input features
    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    /// Number of outputs
    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    /// Weight matrix `(out, in)`
    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    /// Bias vector
    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    /// Mutable weight, for optimizers
    pub fn weight_mut(&mut self) -> &mut Array2<f32> {
        &mut self.weight
    }

    /// Mutable bias, for optimizers
    pub fn bias_mut(&mut self) -> &mut Array1<f32> {
        &mut self.bias
    }

    /// Squared Frobenius norm of the weight (bias excluded)
    pub fn weight_squared_fro_norm(&self) -> f32 {
        self.weight.iter().map(|x| x * x).sum()
    }

    /// Apply to a `(batch, in_features)` input
    pub fn forward(&self, input: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if input.ncols() != self.in_features() {
            return Err(DctnError::ShapeMismatch(format!(
                "linear layer expects {} features, got {}",
                self.in_features(),
                input.ncols()
            )));
        }
        Ok(input.dot(&self.weight.t()) + &self.bias)
    }
}

fn check_features(in_features: usize, out_features: usize) -> Result<()> {
    if in_features == 0 || out_features == 0 {
        return Err(DctnError::InvalidSpec(format!(
            "linear layer needs positive sizes, got {} -> {}",
            in_features, out_features
        )));
    }
    Ok(())
}
