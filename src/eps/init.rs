//! Epses specs, initialization policies and the core factory

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array, Array4, ArrayView4, Dimension, ShapeBuilder};
use rand::Rng;
use rand_distr::{StandardNormal, Uniform};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::contraction::{contract, output_extent, Tiling};
use crate::{DctnError, Result};

/// Number of sample images used by empirical calibration unless told otherwise
pub const DEFAULT_CALIBRATION_BATCH_SIZE: usize = 128;

/// One entry of an epses spec: kernel side and output channels of a core
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(usize, usize)", into = "(usize, usize)")]
pub struct EpsSpec {
    /// Side of the square kernel
    pub kernel_size: usize,
    /// Channels produced by the core
    pub out_channels: usize,
}

impl From<(usize, usize)> for EpsSpec {
    fn from((kernel_size, out_channels): (usize, usize)) -> Self {
        EpsSpec {
            kernel_size,
            out_channels,
        }
    }
}

impl From<EpsSpec> for (usize, usize) {
    fn from(spec: EpsSpec) -> Self {
        (spec.kernel_size, spec.out_channels)
    }
}

/// Ordered `(kernel_size, out_channels)` pairs, one per core
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<EpsSpec>", into = "Vec<EpsSpec>")]
pub struct EpsesSpec(pub(crate) Vec<EpsSpec>);

impl EpsesSpec {
    /// Create a spec, rejecting empty specs and zero-sized entries
    pub fn new<I, T>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<EpsSpec>,
    {
        let entries: Vec<EpsSpec> = entries.into_iter().map(Into::into).collect();
        if entries.is_empty() {
            return Err(DctnError::InvalidSpec(
                "epses spec must contain at least one core".to_string(),
            ));
        }
        if let Some((i, entry)) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.kernel_size == 0 || e.out_channels == 0)
        {
            return Err(DctnError::InvalidSpec(format!(
                "entry {} has a zero dimension: ({}, {})",
                i, entry.kernel_size, entry.out_channels
            )));
        }
        Ok(EpsesSpec(entries))
    }

    /// Number of cores
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a constructed spec
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over entries
    pub fn iter(&self) -> std::slice::Iter<'_, EpsSpec> {
        self.0.iter()
    }

    /// Output channels of the last core
    pub fn out_channels(&self) -> usize {
        self.0.last().map_or(0, |e| e.out_channels)
    }

    /// Shapes `(k, k, in, out)` of the cores, chaining channels from `in_channels`
    pub fn core_shapes(&self, in_channels: usize) -> Vec<(usize, usize, usize, usize)> {
        let mut in_channels = in_channels;
        self.0
            .iter()
            .map(|e| {
                let shape = (e.kernel_size, e.kernel_size, in_channels, e.out_channels);
                in_channels = e.out_channels;
                shape
            })
            .collect()
    }

    /// Spatial extent left after every core has been applied to `extent`
    pub fn output_extent(&self, extent: usize, tiling: Tiling) -> Result<usize> {
        self.0
            .iter()
            .try_fold(extent, |extent, e| output_extent(extent, e.kernel_size, tiling))
    }
}

impl TryFrom<Vec<EpsSpec>> for EpsesSpec {
    type Error = DctnError;

    fn try_from(entries: Vec<EpsSpec>) -> Result<Self> {
        EpsesSpec::new(entries)
    }
}

impl From<EpsesSpec> for Vec<EpsSpec> {
    fn from(spec: EpsesSpec) -> Self {
        spec.0
    }
}

impl fmt::Display for EpsesSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("({},{})", e.kernel_size, e.out_channels))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for EpsesSpec {
    type Err = DctnError;

    /// Parse the command-line form `"(4,6),(3,6)"`
    fn from_str(s: &str) -> Result<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let invalid = || DctnError::InvalidSpec(format!("cannot parse epses spec {:?}", s));
        let inner = compact
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let entries = inner
            .split("),(")
            .map(|pair| -> Result<(usize, usize)> {
                let (kernel, out) = pair.split_once(',').ok_or_else(invalid)?;
                let kernel = kernel.parse::<usize>().map_err(|_| invalid())?;
                let out = out.parse::<usize>().map_err(|_| invalid())?;
                Ok((kernel, out))
            })
            .collect::<Result<Vec<_>>>()?;
        EpsesSpec::new(entries)
    }
}

/// Distribution for the entries of a single tensor
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OneTensorInitialization {
    /// `N(0, std^2)`
    ZeroCenteredNormal {
        /// Standard deviation
        std: f32,
    },
    /// `U(-maximum, maximum)`
    ZeroCenteredUniform {
        /// Largest magnitude
        maximum: f32,
    },
}

impl OneTensorInitialization {
    /// Check the distribution parameter is finite and non-negative
    pub fn validate(&self) -> Result<()> {
        let (name, value) = match *self {
            OneTensorInitialization::ZeroCenteredNormal { std } => ("std", std),
            OneTensorInitialization::ZeroCenteredUniform { maximum } => ("maximum", maximum),
        };
        if !value.is_finite() || value < 0.0 {
            return Err(DctnError::InvalidSpec(format!(
                "{} must be finite and non-negative, got {}",
                name, value
            )));
        }
        Ok(())
    }

    /// Draw an array of the given shape
    pub fn sample<Sh, D, R>(&self, shape: Sh, rng: &mut R) -> Result<Array<f32, D>>
    where
        Sh: ShapeBuilder<Dim = D>,
        D: Dimension,
        R: Rng + ?Sized,
    {
        self.validate()?;
        Ok(match *self {
            OneTensorInitialization::ZeroCenteredNormal { std } => {
                Array::from_shape_simple_fn(shape, || rng.sample::<f32, _>(StandardNormal) * std)
            }
            OneTensorInitialization::ZeroCenteredUniform { maximum } => {
                let uniform = Uniform::new_inclusive(-maximum, maximum);
                Array::from_shape_simple_fn(shape, || rng.sample(uniform))
            }
        })
    }
}

/// How the cores (and possibly the linear head) get their initial values
#[derive(Clone, Debug)]
pub enum Initialization {
    /// Calibrate each core so its output on sample images has unit std
    UnitEmpiricalOutputStd {
        /// Sample images `(batch, height, width, channels)`
        input: Array4<f32>,
        /// How many of the sample images to use
        batch_size: usize,
    },
    /// Closed-form scale assuming unit-variance inputs
    UnitTheoreticalOutputStd,
    /// Explicit distributions for every core and for the head
    ManuallyChosen {
        /// One distribution per core
        epses: Vec<OneTensorInitialization>,
        /// Distribution of the head weight
        linear_weight: OneTensorInitialization,
        /// Distribution of the head bias
        linear_bias: OneTensorInitialization,
    },
}

impl Initialization {
    /// Empirical calibration on `input` with the default batch size
    pub fn unit_empirical_output_std(input: Array4<f32>) -> Self {
        Initialization::UnitEmpiricalOutputStd {
            input,
            batch_size: DEFAULT_CALIBRATION_BATCH_SIZE,
        }
    }

    /// Short name of the policy
    pub fn name(&self) -> &'static str {
        match self {
            Initialization::UnitEmpiricalOutputStd { .. } => "unit_empirical_output_std",
            Initialization::UnitTheoreticalOutputStd => "unit_theoretical_output_std",
            Initialization::ManuallyChosen { .. } => "manually_chosen",
        }
    }
}

/// Std of core entries giving unit-variance outputs for unit-variance inputs
pub fn theoretical_std(kernel_size: usize, in_channels: usize) -> f32 {
    ((kernel_size * kernel_size * in_channels) as f32).powf(-0.5)
}

/// Build one core per spec entry according to `initialization`
pub fn make_epses<R: Rng + ?Sized>(
    spec: &EpsesSpec,
    initialization: &Initialization,
    in_channels: usize,
    tiling: Tiling,
    rng: &mut R,
) -> Result<Vec<Array4<f32>>> {
    let cores = match initialization {
        Initialization::UnitEmpiricalOutputStd { input, batch_size } => {
            let found = input.dim().3;
            if found != in_channels {
                return Err(DctnError::ChannelMismatch {
                    expected: in_channels,
                    found,
                });
            }
            make_unit_empirical_output_std(spec, input.view(), *batch_size, tiling, rng)?
        }
        Initialization::UnitTheoreticalOutputStd => {
            make_unit_theoretical_output_std(spec, in_channels, rng)?
        }
        Initialization::ManuallyChosen { epses, .. } => {
            make_manually_chosen(spec, epses, in_channels, rng)?
        }
    };
    debug!(
        policy = initialization.name(),
        cores = cores.len(),
        spec = %spec,
        "initialized epses"
    );
    Ok(cores)
}

/// Cores with entries `N(0, theoretical_std(k, in)^2)`
pub fn make_unit_theoretical_output_std<R: Rng + ?Sized>(
    spec: &EpsesSpec,
    in_channels: usize,
    rng: &mut R,
) -> Result<Vec<Array4<f32>>> {
    check_in_channels(in_channels)?;
    spec.core_shapes(in_channels)
        .into_iter()
        .map(|shape| {
            let std = theoretical_std(shape.0, shape.2);
            OneTensorInitialization::ZeroCenteredNormal { std }.sample(shape, rng)
        })
        .collect()
}

/// Cores drawn from explicitly given distributions, one per spec entry
pub fn make_manually_chosen<R: Rng + ?Sized>(
    spec: &EpsesSpec,
    initializations: &[OneTensorInitialization],
    in_channels: usize,
    rng: &mut R,
) -> Result<Vec<Array4<f32>>> {
    check_in_channels(in_channels)?;
    if initializations.len() != spec.len() {
        return Err(DctnError::LengthMismatch {
            left: spec.len(),
            right: initializations.len(),
        });
    }
    spec.core_shapes(in_channels)
        .into_iter()
        .zip(initializations)
        .map(|(shape, init)| init.sample(shape, rng))
        .collect()
}

/// Cores calibrated one at a time on the first `batch_size` images of `input`.
///
/// Core `i` starts from the theoretical scale, the sample is contracted
/// through cores `0..=i`, and core `i` is divided by the std of the result.
pub fn make_unit_empirical_output_std<R: Rng + ?Sized>(
    spec: &EpsesSpec,
    input: ArrayView4<'_, f32>,
    batch_size: usize,
    tiling: Tiling,
    rng: &mut R,
) -> Result<Vec<Array4<f32>>> {
    let (available, height, width, in_channels) = input.dim();
    check_in_channels(in_channels)?;
    let n = batch_size.min(available);
    if n == 0 {
        return Err(DctnError::Calibration(
            "no sample images to calibrate on".to_string(),
        ));
    }
    spec.output_extent(height, tiling)?;
    spec.output_extent(width, tiling)?;

    let mut features = input.slice(s![..n, .., .., ..]).to_owned();
    let mut cores = Vec::with_capacity(spec.len());
    for (i, shape) in spec.core_shapes(in_channels).into_iter().enumerate() {
        let std = theoretical_std(shape.0, shape.2);
        let mut core =
            OneTensorInitialization::ZeroCenteredNormal { std }.sample(shape, rng)?;
        let output = contract(core.view(), features.view(), tiling)?;
        let measured = output.std(0.0);
        if !measured.is_finite() || measured <= 0.0 {
            return Err(DctnError::Calibration(format!(
                "core {} produced output std {} on the sample batch",
                i, measured
            )));
        }
        debug!(core = i, measured_std = measured, "calibrated eps core");
        core.mapv_inplace(|x| x / measured);
        features = output.mapv(|x| x / measured);
        cores.push(core);
    }
    Ok(cores)
}

fn check_in_channels(in_channels: usize) -> Result<()> {
    if in_channels == 0 {
        return Err(DctnError::InvalidSpec(
            "input must have at least one channel".to_string(),
        ));
    }
    Ok(())
}
