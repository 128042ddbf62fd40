use std::{
    error::Error,
    fmt::{self, Display},
    io,
    path::PathBuf,
};

use ndarray::ShapeError;
use safetensors::SafeTensorError;

/// The result type used across the checkpoint module.
pub type Result<T> = std::result::Result<T, CkptErr>;

/// Checkpoint discovery and restoration failures.
#[derive(Debug)]
pub enum CkptErr {
    Io(io::Error),
    Safetensors(SafeTensorError),
    Shape(ShapeError),
    Pattern(regex::Error),
    Corrupt { path: PathBuf, reason: String },
    ReservedName(String),
}

impl CkptErr {
    pub(super) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl Display for CkptErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CkptErr::Io(e) => write!(f, "io error: {e}"),
            CkptErr::Safetensors(e) => write!(f, "safetensors error: {e}"),
            CkptErr::Shape(e) => write!(f, "shape error: {e}"),
            CkptErr::Pattern(e) => write!(f, "invalid variable key: {e}"),
            CkptErr::Corrupt { path, reason } => {
                write!(f, "corrupt checkpoint {}: {reason}", path.display())
            }
            CkptErr::ReservedName(name) => write!(f, "variable name {name:?} is reserved"),
        }
    }
}

impl Error for CkptErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CkptErr::Io(e) => Some(e),
            CkptErr::Safetensors(e) => Some(e),
            CkptErr::Shape(e) => Some(e),
            CkptErr::Pattern(e) => Some(e),
            CkptErr::Corrupt { .. } | CkptErr::ReservedName(_) => None,
        }
    }
}

impl From<io::Error> for CkptErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<SafeTensorError> for CkptErr {
    fn from(value: SafeTensorError) -> Self {
        Self::Safetensors(value)
    }
}

impl From<ShapeError> for CkptErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<regex::Error> for CkptErr {
    fn from(value: regex::Error) -> Self {
        Self::Pattern(value)
    }
}
