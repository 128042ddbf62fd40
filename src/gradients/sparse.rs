use ndarray::{ArrayD, Axis, IxDyn};

use super::{GradErr, Result};

/// A gradient that only touches some rows of its parameter.
///
/// Row `indices[k]` of the dense gradient is `values[k]`. Indices may repeat,
/// in which case the rows add up (see `coalesce`).
#[derive(Debug, Clone, PartialEq)]
pub struct SparseGrad {
    values: ArrayD<f32>,
    indices: Vec<usize>,
    dense_shape: Vec<usize>,
}

impl SparseGrad {
    /// Creates a new `SparseGrad`.
    ///
    /// # Arguments
    /// * `values` - The gradient rows, stacked along the first axis.
    /// * `indices` - The row of the dense gradient each value row belongs to.
    /// * `dense_shape` - The shape of the dense gradient.
    ///
    /// # Returns
    /// A new `SparseGrad` or `GradErr::InvalidSparse` if the layout is inconsistent.
    pub fn new(values: ArrayD<f32>, indices: Vec<usize>, dense_shape: Vec<usize>) -> Result<Self> {
        let Some((&rows, row_shape)) = dense_shape.split_first() else {
            return Err(invalid("the dense shape has no dimensions".into()));
        };

        let Some((&nvalues, value_shape)) = values.shape().split_first() else {
            return Err(invalid("the values tensor is a scalar".into()));
        };

        if nvalues != indices.len() {
            return Err(invalid(format!(
                "there are {nvalues} value rows for {} indices",
                indices.len()
            )));
        }

        if value_shape != row_shape {
            return Err(invalid(format!(
                "value rows have shape {value_shape:?} but dense rows have shape {row_shape:?}"
            )));
        }

        if let Some(idx) = indices.iter().find(|&&idx| idx >= rows) {
            return Err(invalid(format!("index {idx} is out of bounds for {rows} rows")));
        }

        Ok(Self {
            values,
            indices,
            dense_shape,
        })
    }

    /// Builds a `SparseGrad` from parts already known to be consistent.
    pub(super) fn from_parts(values: ArrayD<f32>, indices: Vec<usize>, dense_shape: Vec<usize>) -> Self {
        Self {
            values,
            indices,
            dense_shape,
        }
    }

    pub fn values(&self) -> &ArrayD<f32> {
        &self.values
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn dense_shape(&self) -> &[usize] {
        &self.dense_shape
    }

    /// Returns the amount of value rows, counting repeated indices.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Splits the gradient into its values, indices and dense shape.
    pub fn into_parts(self) -> (ArrayD<f32>, Vec<usize>, Vec<usize>) {
        (self.values, self.indices, self.dense_shape)
    }

    /// Merges repeated indices by adding up their rows.
    ///
    /// # Returns
    /// An equivalent `SparseGrad` with unique indices sorted in ascending order.
    pub fn coalesce(&self) -> SparseGrad {
        let mut unique = self.indices.clone();
        unique.sort_unstable();
        unique.dedup();

        let mut shape = self.values.shape().to_vec();
        shape[0] = unique.len();
        let mut values = ArrayD::zeros(IxDyn(&shape));

        for (row, idx) in self.values.outer_iter().zip(&self.indices) {
            if let Ok(pos) = unique.binary_search(idx) {
                let mut out = values.index_axis_mut(Axis(0), pos);
                out += &row;
            }
        }

        Self::from_parts(values, unique, self.dense_shape.clone())
    }

    /// Scatters the rows into a dense gradient, adding up repeated indices.
    pub fn to_dense(&self) -> ArrayD<f32> {
        let mut dense = ArrayD::zeros(IxDyn(&self.dense_shape));

        for (row, &idx) in self.values.outer_iter().zip(&self.indices) {
            let mut out = dense.index_axis_mut(Axis(0), idx);
            out += &row;
        }

        dense
    }
}

fn invalid(reason: String) -> GradErr {
    GradErr::InvalidSparse { reason }
}
