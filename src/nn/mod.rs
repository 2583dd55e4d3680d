//! Neural network layers, the composite model and its instrumentation

mod context;
mod eps_plus_linear;
mod linear;
mod metrics;
mod observer;

pub use context::{ForwardContext, Mode};
pub use eps_plus_linear::{EpsesPlusLinear, ImageGeometry, IMAGE_SIDE, NUM_CLASSES};
pub use linear::Linear;
pub use metrics::{accuracy, mean_cross_entropy};
pub use observer::{
    Component, ForwardObserver, IntermediateOutputsLogger, LoggingContext, MemorySink,
    MetricsSink, Recording, ScalarEvent, ScalarReduction, TracingSink, DEFAULT_REDUCTIONS,
};
