//! EPS cores: construction, contraction and composition
//!
//! An EPS core is a 4-dimensional array indexed by
//! `(kernel_row, kernel_col, in_channels, out_channels)`. A composition is an
//! ordered sequence of cores where each core's input channels equal the
//! previous core's output channels.

mod contraction;
mod composition;
mod init;

pub use contraction::{contract, matrix_shape, output_extent, CoreShape, Tiling};
pub use composition::{
    contract_with_input, contract_with_input_observed, dropout_masked, epswise_squared_fro_norm,
    inner_product, output_dim,
};
pub use init::{
    make_epses, make_manually_chosen, make_unit_empirical_output_std,
    make_unit_theoretical_output_std, theoretical_std, EpsSpec, EpsesSpec, Initialization,
    OneTensorInitialization, DEFAULT_CALIBRATION_BATCH_SIZE,
};

/// Channels of the input image encoding fed to the first core
pub const INPUT_CHANNELS: usize = 2;
