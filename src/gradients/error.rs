use std::{
    error::Error,
    fmt::{self, Display},
};

use super::GradKind;

/// The result type used across the gradients module.
pub type Result<T> = std::result::Result<T, GradErr>;

/// Errors raised while combining tower gradients.
///
/// Every variant points to towers that were built inconsistently upstream, so
/// none of them is recoverable for the current training step.
#[derive(Debug, Clone, PartialEq)]
pub enum GradErr {
    NoTowers,
    TowerLengthMismatch {
        tower: usize,
        got: usize,
        expected: usize,
    },
    StructuralMismatch {
        param: usize,
        tower: usize,
        got: GradKind,
        expected: GradKind,
    },
    ShapeMismatch {
        param: usize,
        tower: usize,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidSparse {
        reason: String,
    },
}

impl Display for GradErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradErr::NoTowers => f.write_str("there are no tower gradients to combine"),
            GradErr::TowerLengthMismatch {
                tower,
                got,
                expected,
            } => write!(
                f,
                "tower {tower} has {got} gradient/variable pairs, expected {expected}"
            ),
            GradErr::StructuralMismatch {
                param,
                tower,
                got,
                expected,
            } => write!(
                f,
                "structural mismatch at parameter {param}: tower {tower} has a {got} gradient, expected {expected}"
            ),
            GradErr::ShapeMismatch {
                param,
                tower,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch at parameter {param}: tower {tower} has shape {got:?}, expected {expected:?}"
            ),
            GradErr::InvalidSparse { reason } => write!(f, "invalid sparse gradient: {reason}"),
        }
    }
}

impl Error for GradErr {}
