//! Dense 3-D tensor `(samples, sequence_length, features)` in row-major order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor3 {
    shape: [usize; 3],
    data: Vec<f64>,
}

impl Tensor3 {
    pub fn zeros(samples: usize, steps: usize, features: usize) -> Self {
        Self {
            shape: [samples, steps, features],
            data: vec![0.0; samples * steps * features],
        }
    }

    pub fn from_vec(shape: [usize; 3], data: Vec<f64>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if data.len() != expected {
            return Err(Error::Parquet(format!(
                "tensor of shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Empty tensor with fixed window and feature width.
    pub fn empty(steps: usize, features: usize) -> Self {
        Self::zeros(0, steps, features)
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn samples(&self) -> usize {
        self.shape[0]
    }

    pub fn steps(&self) -> usize {
        self.shape[1]
    }

    pub fn features(&self) -> usize {
        self.shape[2]
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn offset(&self, sample: usize, step: usize, feature: usize) -> usize {
        (sample * self.shape[1] + step) * self.shape[2] + feature
    }

    pub fn get(&self, sample: usize, step: usize, feature: usize) -> Option<f64> {
        if sample >= self.shape[0] || step >= self.shape[1] || feature >= self.shape[2] {
            return None;
        }
        Some(self.data[self.offset(sample, step, feature)])
    }

    /// One feature vector.
    pub fn row(&self, sample: usize, step: usize) -> &[f64] {
        let start = self.offset(sample, step, 0);
        &self.data[start..start + self.shape[2]]
    }

    /// One `(steps, features)` window, flattened.
    pub fn sample(&self, sample: usize) -> &[f64] {
        let width = self.shape[1] * self.shape[2];
        &self.data[sample * width..(sample + 1) * width]
    }

    /// Stack along the sample axis. All parts must share steps and features.
    pub fn concat(parts: &[Tensor3]) -> Result<Tensor3> {
        let Some(first) = parts.first() else {
            return Ok(Tensor3::empty(0, 0));
        };
        let [_, steps, features] = first.shape;
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.data.len()).sum());
        let mut samples = 0;
        for part in parts {
            if part.shape[1] != steps || part.shape[2] != features {
                return Err(Error::ContractMismatch {
                    contract: "tensor".into(),
                    reason: format!(
                        "cannot stack shape {:?} onto (_, {steps}, {features})",
                        part.shape
                    ),
                });
            }
            samples += part.shape[0];
            data.extend_from_slice(&part.data);
        }
        Ok(Tensor3 {
            shape: [samples, steps, features],
            data,
        })
    }
}
