use ndarray::{Array2, Array4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("session mutex poisoned: {0}")]
    Poisoned(String),
    #[error("failed to build tensor: {0}")]
    Tensor(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected output shape {0:?}, expected [1, num_classes]")]
    OutputShape(Vec<usize>),
}

pub trait ModelService: Send + Sync + Clone + 'static {
    /// Runs one forward pass over a `[1, 3, H, W]` batch and returns the
    /// `[1, num_classes]` logits. Blocking; callers run it off the async executor.
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError>;
}
