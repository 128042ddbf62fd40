pub mod checkpoint;
pub mod config;
pub mod gradients;
pub mod placement;

pub use checkpoint::{CheckpointLoader, SafetensorsSaver, VarStore};
pub use gradients::{GradErr, GradVar, Gradient, SparseGrad, average_grads};
pub use placement::{GpuAssignment, NodeDef, Placement, assign_to_gpu};
