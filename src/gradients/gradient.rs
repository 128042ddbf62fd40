use std::fmt::{self, Display};

use ndarray::ArrayD;

use super::SparseGrad;

/// A gradient paired with the handle of the parameter it belongs to.
pub type GradVar<V> = (Gradient, V);

/// The gradient a single tower computed for a single parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Gradient {
    /// No gradient flows into the parameter on this tower.
    Absent,
    Dense(ArrayD<f32>),
    /// Row slices of a large (usually embedding) gradient.
    Sparse(SparseGrad),
}

/// The representation of a `Gradient`, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradKind {
    Absent,
    Dense,
    Sparse,
}

impl Display for GradKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GradKind::Absent => "absent",
            GradKind::Dense => "dense",
            GradKind::Sparse => "sparse",
        };

        f.write_str(s)
    }
}

impl Gradient {
    /// Returns the representation of this gradient.
    pub fn kind(&self) -> GradKind {
        match self {
            Gradient::Absent => GradKind::Absent,
            Gradient::Dense(_) => GradKind::Dense,
            Gradient::Sparse(_) => GradKind::Sparse,
        }
    }

    /// Whether a gradient flows into the parameter.
    pub fn is_present(&self) -> bool {
        !matches!(self, Gradient::Absent)
    }

    /// Returns the shape of the dense tensor this gradient represents.
    ///
    /// # Returns
    /// The tensor's shape, or `None` if the gradient is absent.
    pub fn dense_shape(&self) -> Option<&[usize]> {
        match self {
            Gradient::Absent => None,
            Gradient::Dense(grad) => Some(grad.shape()),
            Gradient::Sparse(grad) => Some(grad.dense_shape()),
        }
    }
}

impl From<ArrayD<f32>> for Gradient {
    fn from(value: ArrayD<f32>) -> Self {
        Self::Dense(value)
    }
}

impl From<SparseGrad> for Gradient {
    fn from(value: SparseGrad) -> Self {
        Self::Sparse(value)
    }
}

impl From<Option<ArrayD<f32>>> for Gradient {
    fn from(value: Option<ArrayD<f32>>) -> Self {
        value.map_or(Self::Absent, Self::Dense)
    }
}
