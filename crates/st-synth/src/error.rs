// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::path::PathBuf;

use thiserror::Error;

use crate::value::DType;

pub type SynthResult<T> = std::result::Result<T, SynthError>;

/// Failures raised while planning, building or executing a generation graph.
#[derive(Debug, Error)]
pub enum SynthError {
    /// A per-axis vector disagrees with the spatial rank of the label map.
    #[error("{label} has {got} entries but the label map has {expected} spatial dimensions")]
    DimensionMismatch {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    /// Generic configuration violation.
    #[error("invalid {label}: {reason}")]
    InvalidValue { label: &'static str, reason: String },
    #[error("flipping requires a reference orientation matrix")]
    MissingOrientation,
    #[error("orientation matrix is singular and cannot locate the left/right axis")]
    SingularOrientation,
    #[error("output label {label} is not part of the generation labels")]
    OutputLabelNotGenerated { label: i32 },
    #[error("generation label {label} appears more than once")]
    DuplicateLabel { label: i32 },
    /// Sided labels must split into two equally long, same-order halves.
    #[error("{sided} sided labels after {neutral} neutral ones cannot be split into left/right halves")]
    UnevenSidedLabels { neutral: usize, sided: usize },
    #[error("shape mismatch for {label}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        label: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("dtype mismatch for {label}: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        label: String,
        expected: DType,
        got: DType,
    },
    #[error("stage {stage} expects {expected} inputs, got {got}")]
    Arity {
        stage: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("required graph input `{name}` was not fed")]
    MissingInput { name: String },
    #[error("graph has no input named `{name}`")]
    UnknownInput { name: String },
    #[error("label value {value} is not a generation label")]
    UnknownLabel { value: i32 },
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn invalid(label: &'static str, reason: impl Into<String>) -> SynthError {
    SynthError::InvalidValue {
        label,
        reason: reason.into(),
    }
}

pub(crate) fn ensure_rank(label: &'static str, expected: usize, got: usize) -> SynthResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(SynthError::DimensionMismatch {
            label,
            expected,
            got,
        })
    }
}
