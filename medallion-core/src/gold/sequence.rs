//! Overlapping fixed-length windows.

use super::select::FeatureMatrix;
use crate::error::{Error, Result};
use crate::tensor::Tensor3;

/// All `rows - length + 1` windows of `length` consecutive rows, oldest first.
pub fn windows(matrix: &FeatureMatrix, length: usize) -> Result<Tensor3> {
    let rows = matrix.rows();
    if length == 0 || rows < length {
        return Err(Error::InsufficientData {
            needed: length.max(1),
            available: rows,
        });
    }
    let samples = rows - length + 1;
    let width = matrix.width();
    let mut data = Vec::with_capacity(samples * length * width);
    for start in 0..samples {
        data.extend_from_slice(&matrix.values()[start * width..(start + length) * width]);
    }
    Tensor3::from_vec([samples, length, width], data)
}

/// The single most recent window, shape `(1, length, features)`.
pub fn latest_window(matrix: &FeatureMatrix, length: usize) -> Result<Tensor3> {
    let rows = matrix.rows();
    windows(&matrix.slice(rows.saturating_sub(length), rows), length)
}
