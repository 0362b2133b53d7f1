// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Stage catalogue wired together by the generation graph builder.

mod image;
mod labels;
mod spatial;

pub use image::{
    BackgroundPolicy, BiasField, Blur, Clip, Concat, ForegroundMask, Gamma, MinMaxNormalise,
    Multiply, PassThrough, RestrictSlab, SampleGmm, SelectChannel,
};
pub use labels::{RemapLabels, ResetLabels};
pub use spatial::{Deform, NonlinearDeformation, Pad, RandomCrop, RandomFlip, Resample, ResampleLabels};

use crate::error::{SynthError, SynthResult};
use crate::value::{DType, TensorSpec, Value};

pub(crate) fn expect_arity<T>(stage: &'static str, inputs: &[T], expected: usize) -> SynthResult<()> {
    if inputs.len() == expected {
        Ok(())
    } else {
        Err(SynthError::Arity {
            stage,
            expected,
            got: inputs.len(),
        })
    }
}

pub(crate) fn required<'a>(
    stage: &'static str,
    inputs: &[Option<&'a Value>],
    index: usize,
) -> SynthResult<&'a Value> {
    inputs
        .get(index)
        .copied()
        .flatten()
        .ok_or_else(|| SynthError::MissingInput {
            name: format!("{stage}[{index}]"),
        })
}

pub(crate) fn expect_dtype(stage: &'static str, spec: &TensorSpec, dtype: DType) -> SynthResult<()> {
    if spec.dtype == dtype {
        Ok(())
    } else {
        Err(SynthError::DTypeMismatch {
            label: stage.to_string(),
            expected: dtype,
            got: spec.dtype,
        })
    }
}

pub(crate) fn expect_shape(label: &str, expected: &[usize], got: &[usize]) -> SynthResult<()> {
    if expected == got {
        Ok(())
    } else {
        Err(SynthError::ShapeMismatch {
            label: label.to_string(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        })
    }
}

pub(crate) fn with_channels(spatial: &[usize], channels: usize) -> Vec<usize> {
    let mut shape = spatial.to_vec();
    shape.push(channels);
    shape
}
