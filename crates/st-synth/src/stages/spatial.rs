// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::ArrayD;

use super::{expect_arity, expect_dtype, expect_shape, required, with_channels};
use crate::error::{invalid, SynthError, SynthResult};
use crate::graph::Stage;
use crate::ops::{intensity, spatial, warp};
use crate::random::RandomSource;
use crate::value::{DType, TensorSpec, Value};

/// Symmetric zero padding of the spatial axes.
pub struct Pad {
    margin: Vec<usize>,
}

impl Pad {
    pub fn new(margin: Vec<usize>) -> Self {
        Self { margin }
    }
}

impl Stage for Pad {
    fn name(&self) -> &'static str {
        "pad"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        let input = inputs[0];
        if input.spatial().len() != self.margin.len() {
            return Err(invalid("padding_margin", "rank differs from the padded tensor"));
        }
        let padded: Vec<usize> = input
            .spatial()
            .iter()
            .zip(&self.margin)
            .map(|(&len, &m)| len + 2 * m)
            .collect();
        Ok(TensorSpec::new(
            with_channels(&padded, input.channels()),
            input.dtype,
        ))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        Ok(match required(self.name(), inputs, 0)? {
            Value::F32(a) => Value::F32(spatial::pad(a, &self.margin)),
            Value::I32(a) => Value::I32(spatial::pad(a, &self.margin)),
        })
    }
}

/// Settings of the nonlinear part of [`Deform`].
#[derive(Clone, Debug, PartialEq)]
pub struct NonlinearDeformation {
    /// Shape of the coarse velocity field, without the trailing vector axis.
    pub coarse_shape: Vec<usize>,
    /// Standard deviation used when no coarse field is fed.
    pub std: f32,
    /// Scaling-and-squaring steps.
    pub integration_steps: u32,
}

/// Affine and/or diffeomorphic deformation of a label map with
/// nearest-neighbour sampling.
///
/// Inputs: labels, then the affine matrix when `linear` is set, then the
/// optional coarse velocity field when a nonlinear part is configured.
pub struct Deform {
    n_dims: usize,
    linear: bool,
    nonlinear: Option<NonlinearDeformation>,
}

impl Deform {
    pub fn new(n_dims: usize, linear: bool, nonlinear: Option<NonlinearDeformation>) -> Self {
        Self {
            n_dims,
            linear,
            nonlinear,
        }
    }

    fn arity(&self) -> usize {
        1 + usize::from(self.linear) + usize::from(self.nonlinear.is_some())
    }
}

impl Stage for Deform {
    fn name(&self) -> &'static str {
        "deform"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, self.arity())?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        let mut next = 1;
        if self.linear {
            expect_shape("affine", &[self.n_dims + 1, self.n_dims + 1], &inputs[next].shape)?;
            expect_dtype(self.name(), inputs[next], DType::F32)?;
            next += 1;
        }
        if let Some(nonlinear) = &self.nonlinear {
            let expected = with_channels(&nonlinear.coarse_shape, self.n_dims);
            expect_shape("nonlinear_field", &expected, &inputs[next].shape)?;
            expect_dtype(self.name(), inputs[next], DType::F32)?;
        }
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        let spatial_shape = labels.shape()[..self.n_dims].to_vec();
        let mut next = 1;
        let affine = if self.linear {
            let matrix = required(self.name(), inputs, next)?.as_f32("affine")?;
            next += 1;
            Some(matrix)
        } else {
            None
        };
        let displacement = match &self.nonlinear {
            Some(nonlinear) => {
                let velocity = match inputs.get(next).copied().flatten() {
                    Some(field) => field.as_f32("nonlinear_field")?.clone(),
                    None => intensity::normal_field(
                        &with_channels(&nonlinear.coarse_shape, self.n_dims),
                        0.0,
                        nonlinear.std,
                        rng,
                    ),
                };
                let velocity = spatial::resize_linear(&velocity, &spatial_shape);
                Some(warp::integrate_velocity(
                    &velocity,
                    nonlinear.integration_steps,
                ))
            }
            None => None,
        };
        Ok(Value::I32(warp::warp_labels(
            labels,
            affine,
            displacement.as_ref(),
        )))
    }
}

/// Crops a window of `shape` at a uniformly drawn offset.
pub struct RandomCrop {
    shape: Vec<usize>,
}

impl RandomCrop {
    pub fn new(shape: Vec<usize>) -> Self {
        Self { shape }
    }
}

impl Stage for RandomCrop {
    fn name(&self) -> &'static str {
        "random_crop"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        let input = inputs[0];
        let fits = input.spatial().len() == self.shape.len()
            && input
                .spatial()
                .iter()
                .zip(&self.shape)
                .all(|(&have, &want)| want <= have);
        if !fits {
            return Err(invalid(
                "crop_shape",
                format!("{:?} does not fit in {:?}", self.shape, input.spatial()),
            ));
        }
        Ok(TensorSpec::new(
            with_channels(&self.shape, input.channels()),
            input.dtype,
        ))
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let input = required(self.name(), inputs, 0)?;
        let offsets: Vec<usize> = input
            .shape()
            .iter()
            .zip(&self.shape)
            .map(|(&have, &want)| rng.index(have - want))
            .collect();
        Ok(match input {
            Value::F32(a) => Value::F32(spatial::crop(a, &offsets, &self.shape)),
            Value::I32(a) => Value::I32(spatial::crop(a, &offsets, &self.shape)),
        })
    }
}

/// Left/right mirroring that keeps sided labels anatomically consistent.
pub struct RandomFlip {
    axis: usize,
    swap: Vec<i32>,
    probability: f32,
}

impl RandomFlip {
    /// `swap[i]` is the dense index label `i` becomes once mirrored.
    pub fn new(axis: usize, swap: Vec<i32>, probability: f32) -> Self {
        Self {
            axis,
            swap,
            probability,
        }
    }

    /// Mirrors `labels` and exchanges contralateral indices.
    pub fn apply(&self, labels: &ArrayD<i32>) -> SynthResult<ArrayD<i32>> {
        let mut flipped = spatial::flip(labels, self.axis);
        for value in flipped.iter_mut() {
            *value = usize::try_from(*value)
                .ok()
                .and_then(|idx| self.swap.get(idx).copied())
                .ok_or(SynthError::UnknownLabel { value: *value })?;
        }
        Ok(flipped)
    }
}

impl Stage for RandomFlip {
    fn name(&self) -> &'static str {
        "random_flip"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        if self.axis >= inputs[0].spatial().len() {
            return Err(invalid("flip axis", format!("{} is out of range", self.axis)));
        }
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        if rng.bernoulli(self.probability) {
            Ok(Value::I32(self.apply(labels)?))
        } else {
            Ok(Value::I32(labels.clone()))
        }
    }
}

/// Linear resampling of an image to `shape`, optionally through the grid of
/// a simulated acquisition first.
pub struct Resample {
    shape: Vec<usize>,
    acquisition: Option<Vec<usize>>,
}

impl Resample {
    pub fn new(shape: Vec<usize>, acquisition: Option<Vec<usize>>) -> Self {
        Self { shape, acquisition }
    }
}

impl Stage for Resample {
    fn name(&self) -> &'static str {
        "resample"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        let rank = inputs[0].spatial().len();
        let acquisition_rank = self.acquisition.as_ref().map_or(rank, Vec::len);
        if self.shape.len() != rank || acquisition_rank != rank {
            return Err(invalid("resample shape", "rank differs from the input"));
        }
        Ok(TensorSpec::f32(with_channels(&self.shape, inputs[0].channels())))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let image = required(self.name(), inputs, 0)?.as_f32("image")?;
        let resampled = match &self.acquisition {
            Some(acquired) => {
                spatial::resize_linear(&spatial::resize_nearest(image, acquired), &self.shape)
            }
            None => spatial::resize_linear(image, &self.shape),
        };
        Ok(Value::F32(resampled))
    }
}

/// Nearest-neighbour resampling of a label map to `shape`.
pub struct ResampleLabels {
    shape: Vec<usize>,
}

impl ResampleLabels {
    pub fn new(shape: Vec<usize>) -> Self {
        Self { shape }
    }
}

impl Stage for ResampleLabels {
    fn name(&self) -> &'static str {
        "resample_labels"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        if self.shape.len() != inputs[0].spatial().len() {
            return Err(invalid("resample shape", "rank differs from the input"));
        }
        Ok(TensorSpec::i32(with_channels(&self.shape, inputs[0].channels())))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        Ok(Value::I32(spatial::resize_nearest(labels, &self.shape)))
    }
}
