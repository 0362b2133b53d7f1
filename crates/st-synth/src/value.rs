// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Typed tensor handles flowing along graph edges.

use ndarray::ArrayD;

use crate::error::{SynthError, SynthResult};

/// Element type carried by a graph edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    I32,
}

/// Static description of a tensor produced by a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorSpec {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn f32(shape: Vec<usize>) -> Self {
        Self::new(shape, DType::F32)
    }

    pub fn i32(shape: Vec<usize>) -> Self {
        Self::new(shape, DType::I32)
    }

    /// Spatial extent, i.e. every axis except the trailing channel axis.
    pub fn spatial(&self) -> &[usize] {
        let n = self.shape.len().saturating_sub(1);
        &self.shape[..n]
    }

    /// Number of channels stored on the trailing axis.
    pub fn channels(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Checks that `other` agrees with this spec, naming the offending edge.
    pub fn check(&self, label: &str, other: &TensorSpec) -> SynthResult<()> {
        if self.dtype != other.dtype {
            return Err(SynthError::DTypeMismatch {
                label: label.to_string(),
                expected: self.dtype,
                got: other.dtype,
            });
        }
        if self.shape != other.shape {
            return Err(SynthError::ShapeMismatch {
                label: label.to_string(),
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }
}

/// Concrete tensor materialised during graph execution.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    F32(ArrayD<f32>),
    I32(ArrayD<i32>),
}

impl Value {
    pub fn dtype(&self) -> DType {
        match self {
            Value::F32(_) => DType::F32,
            Value::I32(_) => DType::I32,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Value::F32(a) => a.shape(),
            Value::I32(a) => a.shape(),
        }
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::new(self.shape().to_vec(), self.dtype())
    }

    pub fn as_f32(&self, label: &str) -> SynthResult<&ArrayD<f32>> {
        match self {
            Value::F32(a) => Ok(a),
            Value::I32(_) => Err(SynthError::DTypeMismatch {
                label: label.to_string(),
                expected: DType::F32,
                got: DType::I32,
            }),
        }
    }

    pub fn as_i32(&self, label: &str) -> SynthResult<&ArrayD<i32>> {
        match self {
            Value::I32(a) => Ok(a),
            Value::F32(_) => Err(SynthError::DTypeMismatch {
                label: label.to_string(),
                expected: DType::I32,
                got: DType::F32,
            }),
        }
    }

    pub fn into_f32(self, label: &str) -> SynthResult<ArrayD<f32>> {
        match self {
            Value::F32(a) => Ok(a),
            Value::I32(_) => Err(SynthError::DTypeMismatch {
                label: label.to_string(),
                expected: DType::F32,
                got: DType::I32,
            }),
        }
    }

    pub fn into_i32(self, label: &str) -> SynthResult<ArrayD<i32>> {
        match self {
            Value::I32(a) => Ok(a),
            Value::F32(_) => Err(SynthError::DTypeMismatch {
                label: label.to_string(),
                expected: DType::I32,
                got: DType::F32,
            }),
        }
    }
}

impl From<ArrayD<f32>> for Value {
    fn from(value: ArrayD<f32>) -> Self {
        Value::F32(value)
    }
}

impl From<ArrayD<i32>> for Value {
    fn from(value: ArrayD<i32>) -> Self {
        Value::I32(value)
    }
}
