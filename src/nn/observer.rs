//! Explicit instrumentation of forward passes
//!
//! A [`ForwardObserver`] is handed to the model through the
//! [`ForwardContext`](super::ForwardContext) of a single forward call and sees
//! the output of every sub-component. [`IntermediateOutputsLogger`] turns
//! those outputs into scalar summaries written to a [`MetricsSink`].
//!
//! Usage:
//! 1. Create a logger once with a sink, a component filter and reductions.
//! 2. For a pass that should be logged, build a [`LoggingContext`] with the
//!    tag prefix and step and attach `logger.recording(context)` to the
//!    forward context.
//! 3. Passes without an attached recording log nothing.

use std::fmt;

use ndarray::ArrayViewD;
use tracing::info;

/// Sub-component of the composite model whose output is observed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
    /// Output of the `i`-th EPS contraction
    Eps(usize),
    /// Logits produced by the linear head
    Linear,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Eps(i) => write!(f, "epses.{}", i),
            Component::Linear => write!(f, "linear"),
        }
    }
}

/// Receives sub-component outputs during a forward pass
pub trait ForwardObserver {
    /// Called once per component, in execution order
    fn observe(&mut self, component: Component, output: ArrayViewD<'_, f32>);
}

/// Consumer of `(tag, value, step)` scalars
pub trait MetricsSink {
    /// Record one scalar
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64);
}

impl<T: MetricsSink + ?Sized> MetricsSink for &mut T {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) {
        (**self).add_scalar(tag, value, step)
    }
}

/// One recorded scalar
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarEvent {
    /// Full tag
    pub tag: String,
    /// Value
    pub value: f32,
    /// Step it was recorded at
    pub step: u64,
}

/// Sink keeping every scalar in memory
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    events: Vec<ScalarEvent>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded events in order
    pub fn events(&self) -> &[ScalarEvent] {
        &self.events
    }

    /// Take the recorded events
    pub fn into_events(self) -> Vec<ScalarEvent> {
        self.events
    }
}

impl MetricsSink for MemorySink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) {
        self.events.push(ScalarEvent {
            tag: tag.to_string(),
            value,
            step,
        });
    }
}

/// Sink emitting every scalar as a `tracing` event
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) {
        info!(target: "dctn::metrics", tag, value, step, "scalar");
    }
}

/// Scalar summary of an output tensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarReduction {
    /// Mean of absolute values
    MeanOfAbs,
    /// Minimum of absolute values
    MinOfAbs,
    /// Maximum of absolute values
    MaxOfAbs,
}

/// Reductions recorded unless configured otherwise
pub const DEFAULT_REDUCTIONS: [ScalarReduction; 3] = [
    ScalarReduction::MeanOfAbs,
    ScalarReduction::MinOfAbs,
    ScalarReduction::MaxOfAbs,
];

impl ScalarReduction {
    /// Name used as the last tag segment
    pub fn name(self) -> &'static str {
        match self {
            ScalarReduction::MeanOfAbs => "dumb_mean_of_abs",
            ScalarReduction::MinOfAbs => "dumb_min_of_abs",
            ScalarReduction::MaxOfAbs => "dumb_max_of_abs",
        }
    }

    /// Reduce `output` to a scalar; NaN for an empty tensor
    pub fn apply(self, output: &ArrayViewD<'_, f32>) -> f32 {
        if output.is_empty() {
            return f32::NAN;
        }
        let abs = output.iter().map(|x| x.abs());
        match self {
            ScalarReduction::MeanOfAbs => abs.sum::<f32>() / output.len() as f32,
            ScalarReduction::MinOfAbs => abs.fold(f32::INFINITY, f32::min),
            ScalarReduction::MaxOfAbs => abs.fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

/// Tag prefix and step for one logged forward pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingContext {
    /// Prepended to every tag
    pub tag_prefix: String,
    /// Step the scalars are recorded at
    pub step: u64,
}

impl LoggingContext {
    /// Create a context
    pub fn new(tag_prefix: impl Into<String>, step: u64) -> Self {
        LoggingContext {
            tag_prefix: tag_prefix.into(),
            step,
        }
    }
}

/// Records scalar reductions of selected component outputs
pub struct IntermediateOutputsLogger<S> {
    sink: S,
    filter: Box<dyn Fn(Component) -> bool>,
    reductions: Vec<ScalarReduction>,
}

impl<S: MetricsSink> IntermediateOutputsLogger<S> {
    /// Logger recording [`DEFAULT_REDUCTIONS`] for components accepted by `filter`
    pub fn new(sink: S, filter: impl Fn(Component) -> bool + 'static) -> Self {
        IntermediateOutputsLogger {
            sink,
            filter: Box::new(filter),
            reductions: DEFAULT_REDUCTIONS.to_vec(),
        }
    }

    /// Replace the reductions
    pub fn with_reductions(mut self, reductions: Vec<ScalarReduction>) -> Self {
        self.reductions = reductions;
        self
    }

    /// Observer recording one forward pass under `context`
    pub fn recording(&mut self, context: LoggingContext) -> Recording<'_, S> {
        Recording {
            logger: self,
            context,
        }
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Give back the sink
    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// A [`ForwardObserver`] bound to one [`LoggingContext`]
pub struct Recording<'l, S> {
    logger: &'l mut IntermediateOutputsLogger<S>,
    context: LoggingContext,
}

impl<S> Recording<'_, S> {
    /// Context this recording writes under
    pub fn context(&self) -> &LoggingContext {
        &self.context
    }
}

impl<S: MetricsSink> ForwardObserver for Recording<'_, S> {
    fn observe(&mut self, component: Component, output: ArrayViewD<'_, f32>) {
        if !(self.logger.filter)(component) {
            return;
        }
        for reduction in &self.logger.reductions {
            let tag = format!("{}/{}", self.context.tag_prefix, reduction.name());
            self.logger
                .sink
                .add_scalar(&tag, reduction.apply(&output), self.context.step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, ArrayD, IxDyn};

    #[test]
    fn test_component_names() {
        assert_eq!(Component::Eps(1).to_string(), "epses.1");
        assert_eq!(Component::Linear.to_string(), "linear");
    }

    #[test]
    fn test_reductions() {
        let output = array![[-3.0f32, 1.0], [0.5, 2.5]].into_dyn();
        let view = output.view();
        assert_eq!(ScalarReduction::MeanOfAbs.apply(&view), 1.75);
        assert_eq!(ScalarReduction::MinOfAbs.apply(&view), 0.5);
        assert_eq!(ScalarReduction::MaxOfAbs.apply(&view), 3.0);

        let empty = ArrayD::<f32>::zeros(IxDyn(&[0, 3]));
        assert!(ScalarReduction::MeanOfAbs.apply(&empty.view()).is_nan());
    }

    #[test]
    fn test_recording_tags_and_steps() {
        let mut logger =
            IntermediateOutputsLogger::new(MemorySink::new(), |c| matches!(c, Component::Eps(_)));
        let output = array![[1.0f32, -2.0]].into_dyn();
        {
            let mut recording = logger.recording(LoggingContext::new("train/epses", 7));
            recording.observe(Component::Eps(0), output.view());
            recording.observe(Component::Linear, output.view());
        }
        let events = logger.into_sink().into_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].tag, "train/epses/dumb_mean_of_abs");
        assert_eq!(events[1].tag, "train/epses/dumb_min_of_abs");
        assert_eq!(events[2].tag, "train/epses/dumb_max_of_abs");
        assert!(events.iter().all(|e| e.step == 7));
        assert_eq!(events[0].value, 1.5);
    }

    #[test]
    fn test_contexts_do_not_leak() {
        let mut logger = IntermediateOutputsLogger::new(MemorySink::new(), |_| true)
            .with_reductions(vec![ScalarReduction::MaxOfAbs]);
        let output = array![4.0f32].into_dyn();
        logger
            .recording(LoggingContext::new("a", 1))
            .observe(Component::Linear, output.view());
        logger
            .recording(LoggingContext::new("b", 2))
            .observe(Component::Linear, output.view());
        let events = logger.sink().events();
        assert_eq!(events[0].tag, "a/dumb_max_of_abs");
        assert_eq!(events[0].step, 1);
        assert_eq!(events[1].tag, "b/dumb_max_of_abs");
        assert_eq!(events[1].step, 2);
    }

    #[derive(Clone, Default)]
    struct CapturedOutput(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_tracing_sink_emits_events() {
        let output = CapturedOutput::default();
        let writer = output.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            let mut logger = IntermediateOutputsLogger::new(TracingSink, |_| true)
                .with_reductions(vec![ScalarReduction::MaxOfAbs]);
            logger
                .recording(LoggingContext::new("val/epses", 3))
                .observe(Component::Eps(0), array![-2.5f32, 1.0].into_dyn().view());
        });

        let logged = String::from_utf8(output.0.lock().unwrap().clone()).unwrap();
        assert_eq!(logged.lines().count(), 1, "{}", logged);
        assert!(logged.contains("dctn::metrics"), "{}", logged);
        assert!(logged.contains("val/epses/dumb_max_of_abs"), "{}", logged);
        assert!(logged.contains("value=2.5"), "{}", logged);
        assert!(logged.contains("step=3"), "{}", logged);
    }

    #[test]
    fn test_sink_through_mut_ref() {
        let mut sink = MemorySink::new();
        {
            let mut logger = IntermediateOutputsLogger::new(&mut sink, |_| true);
            logger
                .recording(LoggingContext::new("x", 0))
                .observe(Component::Eps(3), array![1.0f32].into_dyn().view());
        }
        assert_eq!(sink.events().len(), 3);
    }
}
