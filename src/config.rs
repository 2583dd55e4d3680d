//! Model configuration for EPS + linear experiments

use std::path::Path;

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::eps::{
    EpsesSpec, Initialization, OneTensorInitialization, DEFAULT_CALIBRATION_BATCH_SIZE,
};
use crate::nn::{EpsesPlusLinear, ImageGeometry};
use crate::utils::load_json;
use crate::{DctnError, Result};

fn default_batch_size() -> usize {
    DEFAULT_CALIBRATION_BATCH_SIZE
}

/// Initialization policy as stored in configuration files.
///
/// The empirical policy needs sample images, which are supplied when the
/// model is built rather than stored here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitializationChoice {
    /// See [`Initialization::UnitEmpiricalOutputStd`]
    UnitEmpiricalOutputStd {
        /// Number of sample images to calibrate on
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    /// See [`Initialization::UnitTheoreticalOutputStd`]
    UnitTheoreticalOutputStd,
    /// See [`Initialization::ManuallyChosen`]
    ManuallyChosen {
        /// One distribution per core
        epses: Vec<OneTensorInitialization>,
        /// Head weight distribution
        linear_weight: OneTensorInitialization,
        /// Head bias distribution
        linear_bias: OneTensorInitialization,
    },
}

/// Everything needed to build an [`EpsesPlusLinear`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Core kernel sizes and channels
    pub epses_specs: EpsesSpec,
    /// Initialization policy
    pub initialization: InitializationChoice,
    /// Probability of keeping a core entry under dropout
    pub p: f32,
    /// Input images and tiling
    #[serde(default)]
    pub geometry: ImageGeometry,
    /// Seed for every random draw made while building the model
    pub seed: u64,
}

impl ModelConfig {
    /// The two-core MNIST setup: `(4,6),(3,6)`, theoretical init, no dropout
    pub fn mnist_default() -> Self {
        ModelConfig {
            epses_specs: EpsesSpec(vec![(4, 6).into(), (3, 6).into()]),
            initialization: InitializationChoice::UnitTheoreticalOutputStd,
            p: 1.0,
            geometry: ImageGeometry::default(),
            seed: 0,
        }
    }

    /// Read a configuration from a JSON file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: ModelConfig = load_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.p > 0.0 && self.p <= 1.0) {
            return Err(DctnError::InvalidDropout(self.p));
        }
        self.geometry.pre_linear_extent(&self.epses_specs)?;

        match &self.initialization {
            InitializationChoice::UnitEmpiricalOutputStd { batch_size } => {
                if *batch_size == 0 {
                    return Err(DctnError::InvalidSpec(
                        "calibration batch size must be positive".to_string(),
                    ));
                }
            }
            InitializationChoice::UnitTheoreticalOutputStd => {}
            InitializationChoice::ManuallyChosen {
                epses,
                linear_weight,
                linear_bias,
            } => {
                if epses.len() != self.epses_specs.len() {
                    return Err(DctnError::LengthMismatch {
                        left: self.epses_specs.len(),
                        right: epses.len(),
                    });
                }
                for init in epses.iter().chain([linear_weight, linear_bias]) {
                    init.validate()?;
                }
            }
        }

        Ok(())
    }

    /// Resolve the initialization, attaching `sample` for empirical calibration
    pub fn initialization(&self, sample: Option<Array4<f32>>) -> Result<Initialization> {
        Ok(match &self.initialization {
            InitializationChoice::UnitEmpiricalOutputStd { batch_size } => {
                let input = sample.ok_or_else(|| {
                    DctnError::Calibration(
                        "empirical initialization needs sample images".to_string(),
                    )
                })?;
                Initialization::UnitEmpiricalOutputStd {
                    input,
                    batch_size: *batch_size,
                }
            }
            InitializationChoice::UnitTheoreticalOutputStd => {
                Initialization::UnitTheoreticalOutputStd
            }
            InitializationChoice::ManuallyChosen {
                epses,
                linear_weight,
                linear_bias,
            } => Initialization::ManuallyChosen {
                epses: epses.clone(),
                linear_weight: *linear_weight,
                linear_bias: *linear_bias,
            },
        })
    }

    /// Build the model, seeding all randomness from `seed`
    pub fn build(&self, sample: Option<Array4<f32>>) -> Result<EpsesPlusLinear> {
        self.validate()?;
        let initialization = self.initialization(sample)?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        EpsesPlusLinear::with_geometry(
            &self.epses_specs,
            &initialization,
            self.p,
            self.geometry,
            &mut rng,
        )
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::mnist_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eps::Tiling;

    #[test]
    fn test_config_validation() {
        let mut config = ModelConfig::default();
        assert!(config.validate().is_ok());

        config.p = 0.0;
        assert!(config.validate().is_err());

        config.p = 0.9;
        config.geometry.tiling = Tiling::NonOverlapping;
        assert!(matches!(config.validate(), Err(DctnError::NotDivisible { .. })));

        config.geometry.tiling = Tiling::Sliding;
        config.initialization = InitializationChoice::ManuallyChosen {
            epses: vec![OneTensorInitialization::ZeroCenteredNormal { std: 1.0 }],
            linear_weight: OneTensorInitialization::ZeroCenteredNormal { std: 1.0 },
            linear_bias: OneTensorInitialization::ZeroCenteredNormal { std: 1.0 },
        };
        assert!(matches!(config.validate(), Err(DctnError::LengthMismatch { .. })));
    }

    #[test]
    fn test_json_format() {
        let json = r#"{
            "epses_specs": [[4, 6], [3, 6]],
            "initialization": {"kind": "unit_empirical_output_std"},
            "p": 0.75,
            "seed": 3
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.initialization,
            InitializationChoice::UnitEmpiricalOutputStd { batch_size: 128 }
        );
        assert_eq!(config.geometry, ImageGeometry::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_policy_named_in_error() {
        let json = r#"{
            "epses_specs": [[4, 6]],
            "initialization": {"kind": "orthogonal"},
            "p": 1.0,
            "seed": 0
        }"#;
        let err = serde_json::from_str::<ModelConfig>(json).unwrap_err();
        assert!(err.to_string().contains("orthogonal"), "{}", err);
    }

    #[test]
    fn test_build() {
        let model = ModelConfig::default().build(None).unwrap();
        assert_eq!(model.linear().in_features(), 23 * 23 * 6);

        let again = ModelConfig::default().build(None).unwrap();
        assert_eq!(model.cores(), again.cores());

        let empirical = ModelConfig {
            initialization: InitializationChoice::UnitEmpiricalOutputStd { batch_size: 4 },
            ..ModelConfig::default()
        };
        assert!(matches!(empirical.build(None), Err(DctnError::Calibration(_))));
        let sample = Array4::from_shape_fn((4, 28, 28, 2), |(b, i, j, c)| {
            ((b + 2 * i + 3 * j + 5 * c) % 11) as f32 - 5.0
        });
        assert!(empirical.build(Some(sample)).is_ok());
    }
}
