//! Per-call forward pass context

use ndarray::ArrayViewD;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::observer::{Component, ForwardObserver};

/// Whether a forward pass is part of training
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Stochastic regularization (dropout) is active
    Train,
    /// Deterministic evaluation
    Eval,
}

/// Everything a single forward call needs besides the input:
/// the mode, the randomness for dropout and an optional observer.
pub struct ForwardContext<'a> {
    mode: Mode,
    rng: StdRng,
    observer: Option<&'a mut dyn ForwardObserver>,
}

impl<'a> ForwardContext<'a> {
    /// Evaluation pass
    pub fn eval() -> Self {
        ForwardContext {
            mode: Mode::Eval,
            rng: StdRng::seed_from_u64(0),
            observer: None,
        }
    }

    /// Training pass with dropout masks drawn from `seed`
    pub fn train(seed: u64) -> Self {
        Self::train_with_rng(StdRng::seed_from_u64(seed))
    }

    /// Training pass with dropout masks drawn from `rng`
    pub fn train_with_rng(rng: StdRng) -> Self {
        ForwardContext {
            mode: Mode::Train,
            rng,
            observer: None,
        }
    }

    /// Attach an observer for this pass
    pub fn with_observer(mut self, observer: &'a mut dyn ForwardObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Mode of the pass
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True in [`Mode::Train`]
    pub fn is_training(&self) -> bool {
        self.mode == Mode::Train
    }

    /// Random source for dropout masks; advances across calls
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn observe(&mut self, component: Component, output: ArrayViewD<'_, f32>) {
        if let Some(observer) = self.observer.as_mut() {
            observer.observe(component, output);
        }
    }
}

impl Default for ForwardContext<'_> {
    fn default() -> Self {
        Self::eval()
    }
}
