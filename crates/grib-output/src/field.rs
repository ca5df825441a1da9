//! In-memory field arrays handed over by the model runner.

use crate::error::{OutputError, Result};

/// An N-dimensional field of values in row-major order.
///
/// A rank-1 field is an unstructured or reduced grid; a rank-2 field of
/// shape `(nj, ni)` is a regular lat/lon grid with `nj` rows of `ni` points.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldArray {
    shape: Vec<usize>,
    values: Vec<f32>,
}

impl FieldArray {
    /// Create a field, checking that the shape covers exactly the values given.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        if shape.is_empty() {
            return Err(OutputError::invalid_field("shape must have at least one dimension"));
        }

        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(OutputError::invalid_field(format!(
                "shape {:?} describes {} values but {} were given",
                shape,
                expected,
                values.len()
            )));
        }

        Ok(Self { shape, values })
    }

    /// Create a regular lat/lon field with `nj` rows and `ni` columns.
    pub fn regular(nj: usize, ni: usize, values: Vec<f32>) -> Result<Self> {
        Self::new(vec![nj, ni], values)
    }

    /// Create a rank-1 (unstructured) field.
    pub fn unstructured(values: Vec<f32>) -> Self {
        Self {
            shape: vec![values.len()],
            values,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of points, the product of the shape.
    pub fn global_size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Minimum and maximum of the non-NaN values, if any.
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}
