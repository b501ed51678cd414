//! Tensor files on disk.
//!
//! A tensor is stored long-form: one parquet row per (sample, step) with a
//! `sample` and a `step` column followed by one `f64` column per feature in
//! contract order. The window length is carried by the batch metadata.

use super::batch::GoldBatch;
use crate::contract::FeatureContract;
use crate::error::{Error, Result};
use crate::storage::{self, WriteMode};
use crate::tensor::Tensor3;
use polars::prelude::*;
use serde::Serialize;
use std::path::Path;

pub(crate) const SAMPLE_COLUMN: &str = "sample";
pub(crate) const STEP_COLUMN: &str = "step";

/// JSON sidecar written next to the tensor files.
#[derive(Serialize)]
struct Sidecar<'a> {
    batch: &'a GoldBatch,
    contract: &'a FeatureContract,
}

pub(crate) fn tensor_to_dataframe(tensor: &Tensor3, features: &[String]) -> Result<DataFrame> {
    let [samples, steps, width] = tensor.shape();
    if width != features.len() {
        return Err(Error::ContractMismatch {
            contract: "tensor file".into(),
            reason: format!("{width} feature columns but {} names", features.len()),
        });
    }
    let rows = samples * steps;
    let data = tensor.as_slice();

    let mut columns = Vec::with_capacity(width + 2);
    columns.push(Column::new(
        SAMPLE_COLUMN.into(),
        (0..rows).map(|r| (r / steps.max(1)) as u32).collect::<Vec<u32>>(),
    ));
    columns.push(Column::new(
        STEP_COLUMN.into(),
        (0..rows).map(|r| (r % steps.max(1)) as u32).collect::<Vec<u32>>(),
    ));
    for (j, name) in features.iter().enumerate() {
        let values: Vec<f64> = (0..rows).map(|r| data[r * width + j]).collect();
        columns.push(Column::new(name.as_str().into(), values));
    }
    DataFrame::new(columns).map_err(|e| Error::Parquet(format!("tensor dataframe: {e}")))
}

pub(crate) fn tensor_from_dataframe(
    df: &DataFrame,
    steps: usize,
    features: &[String],
) -> Result<Tensor3> {
    let rows = df.height();
    if steps == 0 || rows % steps != 0 {
        return Err(Error::Parquet(format!(
            "tensor file has {rows} rows, not a multiple of window length {steps}"
        )));
    }
    let width = features.len();
    let mut data = vec![0.0; rows * width];
    for (j, name) in features.iter().enumerate() {
        let column = df
            .column(name)
            .map_err(|e| Error::Parquet(format!("tensor column '{name}': {e}")))?
            .cast(&DataType::Float64)
            .map_err(|e| Error::Parquet(format!("tensor column '{name}' cast: {e}")))?;
        let ca = column
            .f64()
            .map_err(|e| Error::Parquet(format!("tensor column '{name}' type: {e}")))?;
        for (r, value) in ca.into_iter().enumerate() {
            data[r * width + j] = value
                .ok_or_else(|| Error::Parquet(format!("null in tensor column '{name}' row {r}")))?;
        }
    }
    Tensor3::from_vec([rows / steps, steps, width], data)
}

pub(crate) fn write_tensor(path: &Path, tensor: &Tensor3, features: &[String]) -> Result<()> {
    storage::write_parquet(&tensor_to_dataframe(tensor, features)?, path, WriteMode::Immutable)
}

pub(crate) fn read_tensor(path: &Path, steps: usize, features: &[String]) -> Result<Tensor3> {
    tensor_from_dataframe(&storage::read_parquet(path)?, steps, features)
}

pub(crate) fn write_sidecar(path: &Path, batch: &GoldBatch, contract: &FeatureContract) -> Result<()> {
    storage::write_json(&Sidecar { batch, contract }, path, WriteMode::Immutable)
}
