//! # dctn: EPS compositions meet linear classifiers
//!
//! This library implements image classifiers built from a chain of
//! entangled-plaquette-state (EPS) cores contracted patch by patch against
//! the input, followed by a dense linear head, together with the tooling
//! around training them.
//!
//! ## Features
//!
//! - **EPS cores**: initialization policies and the contraction engine
//! - **Model**: EPS composition + linear head with explicit instrumentation
//! - **Search**: a fixed-slot supervisor for learning-rate sweeps
//! - **Visualization**: training-log comparison reports (feature `viz`)

#![warn(missing_docs)]
#![warn(clippy::all)]

/// EPS cores, their construction and contraction
pub mod eps;

/// Neural network layers, the composite model and instrumentation
pub mod nn;

/// Model configuration
pub mod config;

/// Hyperparameter search over external training processes
pub mod search;

/// Training logs, run configuration and report rendering
pub mod viz;

/// Utility functions and helpers
pub mod utils;

// Re-export commonly used types
pub use eps::{EpsSpec, EpsesSpec, Initialization, OneTensorInitialization, Tiling};
pub use nn::{EpsesPlusLinear, ForwardContext, ImageGeometry};
pub use config::ModelConfig;

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum DctnError {
    /// Invalid epses spec or core shape
    #[error("Invalid spec: {0}")]
    InvalidSpec(String),

    /// Channel count of a core does not match its input
    #[error("Channel mismatch: core expects {expected} input channels, input has {found}")]
    ChannelMismatch {
        /// Input channels the core was built for
        expected: usize,
        /// Channels present in the feature map
        found: usize,
    },

    /// Spatial extent not divisible by the kernel size
    #[error("Dimension mismatch: extent {extent} is not divisible by kernel size {kernel}")]
    NotDivisible {
        /// Height or width of the feature map
        extent: usize,
        /// Kernel size of the core
        kernel: usize,
    },

    /// Kernel does not fit into the feature map
    #[error("Dimension mismatch: kernel size {kernel} exceeds extent {extent}")]
    KernelTooLarge {
        /// Height or width of the feature map
        extent: usize,
        /// Kernel size of the core
        kernel: usize,
    },

    /// Two sequences that must pair up have different lengths
    #[error("Length mismatch: {left} vs {right}")]
    LengthMismatch {
        /// Length of the first sequence
        left: usize,
        /// Length of the second sequence
        right: usize,
    },

    /// Array shapes that must agree do not
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Keep probability outside (0, 1]
    #[error("Invalid dropout keep probability {0}, must be in (0, 1]")]
    InvalidDropout(f32),

    /// Empirical calibration produced an unusable scale
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Malformed training log line
    #[error("Log parse error at line {line}: {message}")]
    LogParse {
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    /// Search supervisor misconfiguration
    #[error("Search error: {0}")]
    Search(String),

    /// Report rendering failure
    #[error("Render error: {0}")]
    Render(String),

    /// Array reshape failure
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for the library
pub type Result<T> = std::result::Result<T, DctnError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        eps::{EpsSpec, EpsesSpec, Initialization, OneTensorInitialization, Tiling},
        nn::{
            Component, EpsesPlusLinear, ForwardContext, ForwardObserver, ImageGeometry,
            IntermediateOutputsLogger, LoggingContext, MetricsSink, ScalarReduction,
        },
        config::ModelConfig,
        DctnError, Result,
    };
}
