mod average;
mod error;
mod gradient;
mod sparse;

pub use average::average_grads;
pub use error::{GradErr, Result};
pub use gradient::{GradKind, GradVar, Gradient};
pub use sparse::SparseGrad;
