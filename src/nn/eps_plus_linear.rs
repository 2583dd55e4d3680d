//! EPS composition followed by a linear classifier

use std::path::Path;

use ndarray::{Array2, Array4, ArrayView4};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::context::ForwardContext;
use super::linear::Linear;
use super::observer::Component;
use crate::eps::{
    self, contract_with_input_observed, dropout_masked, epswise_squared_fro_norm, inner_product,
    make_epses, EpsesSpec, Initialization, Tiling, INPUT_CHANNELS,
};
use crate::utils::{load_json, save_json};
use crate::{DctnError, Result};

/// Number of classes predicted by the head
pub const NUM_CLASSES: usize = 10;

/// Side of the square input images the default geometry expects
pub const IMAGE_SIDE: usize = 28;

/// Spatial layout of the input images and how cores are tiled over them
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Input height
    pub height: usize,
    /// Input width
    pub width: usize,
    /// Patch placement used by every core
    pub tiling: Tiling,
}

impl Default for ImageGeometry {
    fn default() -> Self {
        ImageGeometry {
            height: IMAGE_SIDE,
            width: IMAGE_SIDE,
            tiling: Tiling::Sliding,
        }
    }
}

impl ImageGeometry {
    /// `(height, width)` of the feature map after all cores of `spec`
    pub fn pre_linear_extent(&self, spec: &EpsesSpec) -> Result<(usize, usize)> {
        Ok((
            spec.output_extent(self.height, self.tiling)?,
            spec.output_extent(self.width, self.tiling)?,
        ))
    }
}

/// EPS cores followed by a dense layer producing [`NUM_CLASSES`] logits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EpsesPlusLinear {
    spec: EpsesSpec,
    cores: Vec<Array4<f32>>,
    linear: Linear,
    /// Probability of keeping a core entry under dropout
    p: f32,
    geometry: ImageGeometry,
}

impl EpsesPlusLinear {
    /// Model for 28x28 images with sliding tiling.
    ///
    /// `p` is the probability of not dropping a core entry during training.
    pub fn new<R: Rng + ?Sized>(
        spec: &EpsesSpec,
        initialization: &Initialization,
        p: f32,
        rng: &mut R,
    ) -> Result<Self> {
        Self::with_geometry(spec, initialization, p, ImageGeometry::default(), rng)
    }

    /// Model for an explicit image geometry
    pub fn with_geometry<R: Rng + ?Sized>(
        spec: &EpsesSpec,
        initialization: &Initialization,
        p: f32,
        geometry: ImageGeometry,
        rng: &mut R,
    ) -> Result<Self> {
        check_p(p)?;
        let (height, width) = geometry.pre_linear_extent(spec)?;
        if let Initialization::UnitEmpiricalOutputStd { input, .. } = initialization {
            let (_, h, w, _) = input.dim();
            if (h, w) != (geometry.height, geometry.width) {
                return Err(DctnError::ShapeMismatch(format!(
                    "calibration images are {}x{}, model expects {}x{}",
                    h, w, geometry.height, geometry.width
                )));
            }
        }
        let cores = make_epses(spec, initialization, INPUT_CHANNELS, geometry.tiling, rng)?;

        let in_features = height * width * spec.out_channels();
        let linear = match initialization {
            Initialization::ManuallyChosen {
                linear_weight,
                linear_bias,
                ..
            } => Linear::from_initializations(
                in_features,
                NUM_CLASSES,
                linear_weight,
                linear_bias,
                rng,
            )?,
            _ => Linear::new(in_features, NUM_CLASSES, rng)?,
        };
        info!(
            spec = %spec,
            initialization = initialization.name(),
            p,
            pre_linear_height = height,
            pre_linear_width = width,
            in_features,
            "built epses plus linear model"
        );
        Ok(EpsesPlusLinear {
            spec: spec.clone(),
            cores,
            linear,
            p,
            geometry,
        })
    }

    /// Spec the cores were built from
    pub fn spec(&self) -> &EpsesSpec {
        &self.spec
    }

    /// The cores, in contraction order
    pub fn cores(&self) -> &[Array4<f32>] {
        &self.cores
    }

    /// Mutable cores, for optimizers. Shapes must not change.
    pub fn cores_mut(&mut self) -> &mut [Array4<f32>] {
        &mut self.cores
    }

    /// The classifier head
    pub fn linear(&self) -> &Linear {
        &self.linear
    }

    /// Mutable classifier head, for optimizers
    pub fn linear_mut(&mut self) -> &mut Linear {
        &mut self.linear
    }

    /// Keep probability of core dropout
    pub fn p(&self) -> f32 {
        self.p
    }

    /// Input geometry
    pub fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    /// Total number of trainable values
    pub fn num_parameters(&self) -> usize {
        self.cores.iter().map(|c| c.len()).sum::<usize>()
            + self.linear.weight().len()
            + self.linear.bias().len()
    }

    /// Logits `(batch, NUM_CLASSES)` for images `(batch, height, width, 2)`.
    ///
    /// Core dropout is applied only in training mode with `p < 1`; the
    /// observer in `ctx`, if any, sees every core output and the logits.
    pub fn forward(
        &self,
        input: ArrayView4<'_, f32>,
        ctx: &mut ForwardContext<'_>,
    ) -> Result<Array2<f32>> {
        let (batch, height, width, _) = input.dim();
        if (height, width) != (self.geometry.height, self.geometry.width) {
            return Err(DctnError::ShapeMismatch(format!(
                "model expects {}x{} images, got {}x{}",
                self.geometry.height, self.geometry.width, height, width
            )));
        }

        let masked;
        let cores: &[Array4<f32>] = if ctx.is_training() && self.p < 1.0 {
            masked = dropout_masked(&self.cores, self.p, ctx.rng())?;
            &masked
        } else {
            &self.cores
        };

        let features =
            contract_with_input_observed(cores, input, self.geometry.tiling, |i, output| {
                ctx.observe(Component::Eps(i), output.view().into_dyn())
            })?;
        let flat = features.to_shape((batch, self.linear.in_features()))?;
        let logits = self.linear.forward(flat.view())?;
        ctx.observe(Component::Linear, logits.view().into_dyn());
        Ok(logits)
    }

    /// Sum of squared Frobenius norms of the cores plus that of the head weight.
    /// The head bias is not included.
    pub fn epswise_l2_regularizer(&self) -> f32 {
        self.linear.weight_squared_fro_norm() + epswise_squared_fro_norm(&self.cores)
    }

    /// Self inner product of the core sequence plus the head weight's squared norm
    pub fn epses_composition_l2_regularizer(&self) -> Result<f32> {
        Ok(self.linear.weight_squared_fro_norm() + inner_product(&self.cores, &self.cores)?)
    }

    /// Write the model as JSON
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        save_json(self, path)
    }

    /// Read a model written by [`save_checkpoint`](Self::save_checkpoint),
    /// checking that its parts still fit together
    pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<Self> {
        let model: EpsesPlusLinear = load_json(path)?;
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        check_p(self.p)?;
        let expected = self.spec.core_shapes(INPUT_CHANNELS);
        let found: Vec<_> = self.cores.iter().map(|c| c.dim()).collect();
        if expected != found {
            return Err(DctnError::ShapeMismatch(format!(
                "cores {:?} do not match spec {}",
                found, self.spec
            )));
        }
        let (_, height, width, channels) = eps::output_dim(
            &self.cores,
            (0, self.geometry.height, self.geometry.width, INPUT_CHANNELS),
            self.geometry.tiling,
        )?;
        let in_features = height * width * channels;
        if self.linear.in_features() != in_features || self.linear.out_features() != NUM_CLASSES {
            return Err(DctnError::ShapeMismatch(format!(
                "linear layer is {}x{}, expected {}x{}",
                self.linear.out_features(),
                self.linear.in_features(),
                NUM_CLASSES,
                in_features
            )));
        }
        Ok(())
    }
}

fn check_p(p: f32) -> Result<()> {
    if p > 0.0 && p <= 1.0 {
        Ok(())
    } else {
        Err(DctnError::InvalidDropout(p))
    }
}
