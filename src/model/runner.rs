use candle_core::Tensor;
use std::path::Path;

use crate::error::RunnerResult;
use crate::testdata::TestCase;

/// Outcome of one `inference` call.
#[derive(Debug, Clone)]
pub enum Inference<T> {
    /// One output per input item, in input order.
    Completed(Vec<T>),
    /// The runner was handed nothing to do.
    EmptyInput,
}

impl<T> Inference<T> {
    pub fn is_empty_input(&self) -> bool {
        matches!(self, Inference::EmptyInput)
    }
}

/// Lifecycle shared by every benchmarked model: construct, then
/// `preprocess` → `inference` → `postprocess`.
pub trait ModelRunner {
    type Input;
    type Output: CapturedOutput;

    fn name(&self) -> &str;
    fn model_path(&self) -> &Path;
    fn test_data_dir(&self) -> &Path;

    /// Decimal places reference outputs must agree to.
    fn validate_decimal(&self) -> u32 {
        4
    }

    /// Build one input item from a loaded test case.
    fn input_from_case(case: &TestCase) -> Option<Self::Input>;

    fn preprocess(&self) {}

    fn inference(&mut self, batch: &[Self::Input]) -> RunnerResult<Inference<Self::Output>>;

    fn postprocess(&self) {}
}

/// Tensors making up one captured output.
pub trait CapturedOutput {
    fn tensors(&self) -> &[Tensor];
}

impl CapturedOutput for Tensor {
    fn tensors(&self) -> &[Tensor] {
        std::slice::from_ref(self)
    }
}

impl CapturedOutput for [Tensor; 1] {
    fn tensors(&self) -> &[Tensor] {
        self
    }
}

/// Outputs the driver keeps between runs.
#[derive(Debug, Clone)]
pub struct OutputCollection<T> {
    items: Vec<T>,
}

impl<T> Default for OutputCollection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> OutputCollection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a completed run. `EmptyInput` leaves them as-is.
    pub fn apply(&mut self, inference: Inference<T>) {
        if let Inference::Completed(items) = inference {
            self.items = items;
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
