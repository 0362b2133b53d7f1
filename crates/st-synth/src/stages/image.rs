// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, Axis, Slice, Zip};

use super::{expect_arity, expect_dtype, expect_shape, required, with_channels};
use crate::error::{invalid, SynthResult};
use crate::graph::Stage;
use crate::ops::{filter, intensity, spatial};
use crate::random::RandomSource;
use crate::value::{DType, TensorSpec, Value};

/// Samples the per-label Gaussian mixture conditioned on a dense label map.
///
/// Inputs: dense labels, means `[n_labels, n_channels]`, std devs (same).
pub struct SampleGmm {
    n_labels: usize,
    n_channels: usize,
}

impl SampleGmm {
    pub fn new(n_labels: usize, n_channels: usize) -> Self {
        Self {
            n_labels,
            n_channels,
        }
    }
}

impl Stage for SampleGmm {
    fn name(&self) -> &'static str {
        "sample_gmm"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 3)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        let params = [self.n_labels, self.n_channels];
        expect_shape("means", &params, &inputs[1].shape)?;
        expect_shape("std_devs", &params, &inputs[2].shape)?;
        Ok(TensorSpec::f32(with_channels(
            inputs[0].spatial(),
            self.n_channels,
        )))
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        let means = required(self.name(), inputs, 1)?.as_f32("means")?;
        let std_devs = required(self.name(), inputs, 2)?.as_f32("std_devs")?;
        Ok(Value::F32(intensity::sample_gmm(labels, means, std_devs, rng)?))
    }
}

/// Binary foreground mask of a dense label map.
pub struct ForegroundMask;

impl Stage for ForegroundMask {
    fn name(&self) -> &'static str {
        "foreground_mask"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        Ok(TensorSpec::f32(inputs[0].shape.clone()))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        Ok(Value::F32(intensity::foreground_mask(labels)))
    }
}

/// Extracts one channel, keeping the channel axis.
pub struct SelectChannel {
    index: usize,
}

impl SelectChannel {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl Stage for SelectChannel {
    fn name(&self) -> &'static str {
        "select_channel"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        if self.index >= inputs[0].channels() {
            return Err(invalid(
                "channel",
                format!("{} of {}", self.index, inputs[0].channels()),
            ));
        }
        Ok(TensorSpec::f32(with_channels(inputs[0].spatial(), 1)))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let image = required(self.name(), inputs, 0)?.as_f32("image")?;
        let last = Axis(image.ndim() - 1);
        Ok(Value::F32(
            image
                .slice_axis(last, Slice::from(self.index..self.index + 1))
                .to_owned(),
        ))
    }
}

/// Draws a slab-restriction mask: a random share of the front and of the back
/// of one axis is zeroed.
///
/// `bounds` are `[front_low, front_high, back_low, back_high]` fractions of the
/// axis length.
#[derive(Clone, Debug)]
pub struct RestrictSlab {
    axis: usize,
    bounds: [f32; 4],
}

impl RestrictSlab {
    pub fn new(axis: usize, bounds: [f32; 4]) -> SynthResult<Self> {
        let [front_low, front_high, back_low, back_high] = bounds;
        let valid_range = |low: f32, high: f32| (0.0..=1.0).contains(&low) && (low..=1.0).contains(&high);
        if !valid_range(front_low, front_high) || !valid_range(back_low, back_high) {
            return Err(invalid(
                "crop_channel2",
                format!("{bounds:?} must be ordered fractions within [0, 1]"),
            ));
        }
        Ok(Self { axis, bounds })
    }
}

impl Stage for RestrictSlab {
    fn name(&self) -> &'static str {
        "restrict_slab"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        if self.axis >= inputs[0].spatial().len() {
            return Err(invalid(
                "crop_channel2_axis",
                format!("{} is out of range", self.axis),
            ));
        }
        Ok(TensorSpec::f32(with_channels(inputs[0].spatial(), 1)))
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let input = required(self.name(), inputs, 0)?;
        let spatial_shape = &input.shape()[..input.shape().len() - 1];
        let len = spatial_shape[self.axis];
        let [front_low, front_high, back_low, back_high] = self.bounds;
        let front = (rng.uniform(front_low, front_high) * len as f32).floor() as usize;
        let back = (rng.uniform(back_low, back_high) * len as f32).floor() as usize;
        let front = front.min(len);
        let back = back.min(len - front);
        Ok(Value::F32(spatial::slab_mask(spatial_shape, self.axis, front, back)))
    }
}

/// Element-wise product of two tensors of identical spec.
pub struct Multiply;

impl Stage for Multiply {
    fn name(&self) -> &'static str {
        "multiply"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 2)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        inputs[0].check("multiply", inputs[1])?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let a = required(self.name(), inputs, 0)?.as_f32("lhs")?;
        let b = required(self.name(), inputs, 1)?.as_f32("rhs")?;
        Ok(Value::F32(a * b))
    }
}

/// How background voxels are treated by [`Blur`].
#[derive(Clone, Debug, PartialEq)]
pub enum BackgroundPolicy {
    /// Background is blurred with the foreground, then zeroed with
    /// probability `reset_prob`.
    Blurred { reset_prob: f32 },
    /// Background is excluded from the blur sums. It is then either zero
    /// (probability `zero_prob`) or replaced by smooth low-intensity noise
    /// with mean in `[0, mean_max)` and std in `[0, std_max)`.
    Excluded {
        zero_prob: f32,
        mean_max: f32,
        std_max: f32,
    },
}

/// Separable Gaussian blur of one channel.
///
/// Inputs: the channel and the shared foreground mask.
pub struct Blur {
    sigma: Vec<f32>,
    blur_range: Option<f32>,
    background: BackgroundPolicy,
}

impl Blur {
    pub fn new(sigma: Vec<f32>, blur_range: Option<f32>, background: BackgroundPolicy) -> Self {
        Self {
            sigma,
            blur_range,
            background,
        }
    }

    fn kernels(&self, rng: &mut dyn RandomSource) -> Vec<Option<Vec<f32>>> {
        self.sigma
            .iter()
            .map(|&sigma| {
                let scale = match self.blur_range {
                    Some(range) => {
                        let (low, high) = if range >= 1.0 {
                            (1.0 / range, range)
                        } else {
                            (range, 1.0 / range)
                        };
                        rng.uniform(low, high)
                    }
                    None => 1.0,
                };
                Some(filter::gaussian_kernel(sigma * scale))
            })
            .collect()
    }
}

impl Stage for Blur {
    fn name(&self) -> &'static str {
        "blur"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 2)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        inputs[0].check("blur mask", inputs[1])?;
        if self.sigma.len() != inputs[0].spatial().len() {
            return Err(invalid("blur sigma", "rank differs from the channel"));
        }
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let channel = required(self.name(), inputs, 0)?.as_f32("channel")?;
        let mask = required(self.name(), inputs, 1)?.as_f32("mask")?;
        let kernels = self.kernels(rng);
        let blurred = match &self.background {
            BackgroundPolicy::Blurred { reset_prob } => {
                let blurred = filter::blur_separable(channel, &kernels);
                if rng.bernoulli(*reset_prob) {
                    blurred * mask
                } else {
                    blurred
                }
            }
            BackgroundPolicy::Excluded {
                zero_prob,
                mean_max,
                std_max,
            } => {
                let numerator = filter::blur_separable(&(channel * mask), &kernels);
                let denominator = filter::blur_separable(mask, &kernels);
                let foreground = Zip::from(&numerator)
                    .and(&denominator)
                    .map_collect(|&n, &d| n / (d + f32::EPSILON));
                let background = if rng.bernoulli(*zero_prob) {
                    ArrayD::zeros(channel.raw_dim())
                } else {
                    let mean = rng.uniform(0.0, *mean_max);
                    let std = rng.uniform(0.0, *std_max);
                    let noise = intensity::normal_field(channel.shape(), mean, std, rng);
                    let smooth: Vec<Option<Vec<f32>>> = self
                        .sigma
                        .iter()
                        .map(|_| Some(filter::gaussian_kernel(1.0)))
                        .collect();
                    filter::blur_separable(&noise, &smooth)
                };
                Zip::from(&foreground)
                    .and(mask)
                    .and(&background)
                    .map_collect(|&fg, &m, &bg| if m > 0.0 { fg } else { bg })
            }
        };
        Ok(Value::F32(blurred))
    }
}

/// Multiplies a channel by a freshly drawn smooth bias field.
pub struct BiasField {
    std: f32,
    coarse_shape: Vec<usize>,
}

impl BiasField {
    pub fn new(std: f32, coarse_shape: Vec<usize>) -> Self {
        Self { std, coarse_shape }
    }
}

impl Stage for BiasField {
    fn name(&self) -> &'static str {
        "bias_field"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        if inputs[0].channels() != 1 || self.coarse_shape.len() != inputs[0].spatial().len() {
            return Err(invalid("bias_field", "expects one channel of matching rank"));
        }
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let channel = required(self.name(), inputs, 0)?.as_f32("channel")?;
        let spatial_shape = &channel.shape()[..channel.ndim() - 1];
        let field = intensity::bias_field(spatial_shape, &self.coarse_shape, self.std, rng);
        Ok(Value::F32(channel * &field))
    }
}

/// Clamps intensities to `[low, high]`.
pub struct Clip {
    low: f32,
    high: f32,
}

impl Clip {
    pub fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }
}

impl Stage for Clip {
    fn name(&self) -> &'static str {
        "clip"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let x = required(self.name(), inputs, 0)?.as_f32("channel")?;
        Ok(Value::F32(intensity::clip(x, self.low, self.high)))
    }
}

/// Rescales a channel to `[0, 1]`.
pub struct MinMaxNormalise;

impl Stage for MinMaxNormalise {
    fn name(&self) -> &'static str {
        "min_max_normalise"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let x = required(self.name(), inputs, 0)?.as_f32("channel")?;
        Ok(Value::F32(intensity::min_max_normalise(x)))
    }
}

/// Raises intensities to `exp(N(0, std))`.
pub struct Gamma {
    std: f32,
}

impl Gamma {
    pub fn new(std: f32) -> Self {
        Self { std }
    }
}

impl Stage for Gamma {
    fn name(&self) -> &'static str {
        "gamma"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::F32)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let x = required(self.name(), inputs, 0)?.as_f32("channel")?;
        let exponent = rng.normal(0.0, self.std).exp();
        Ok(Value::F32(intensity::gamma(x, exponent)))
    }
}

/// Stacks single-channel tensors along the channel axis.
pub struct Concat;

impl Stage for Concat {
    fn name(&self) -> &'static str {
        "concat"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        let first = inputs
            .first()
            .ok_or_else(|| invalid("concat", "needs at least one input"))?;
        let mut channels = 0;
        for spec in inputs {
            expect_dtype(self.name(), spec, DType::F32)?;
            expect_shape("concat", first.spatial(), spec.spatial())?;
            channels += spec.channels();
        }
        Ok(TensorSpec::f32(with_channels(first.spatial(), channels)))
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let mut views = Vec::with_capacity(inputs.len());
        for index in 0..inputs.len() {
            views.push(required(self.name(), inputs, index)?.as_f32("channel")?.view());
        }
        let axis = Axis(views[0].ndim() - 1);
        let stacked = ndarray::concatenate(axis, &views).map_err(|_| {
            invalid("concat", "channels disagree on their spatial shape")
        })?;
        Ok(Value::F32(stacked))
    }
}

/// Forwards its first input while depending on the second, so both are
/// produced by the same execution.
pub struct PassThrough;

impl Stage for PassThrough {
    fn name(&self) -> &'static str {
        "pass_through"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 2)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        required(self.name(), inputs, 1)?;
        Ok(required(self.name(), inputs, 0)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, IxDyn};

    struct Scripted {
        uniforms: Vec<f32>,
        coin: bool,
    }

    impl RandomSource for Scripted {
        fn uniform(&mut self, low: f32, _high: f32) -> f32 {
            if self.uniforms.is_empty() {
                low
            } else {
                self.uniforms.remove(0)
            }
        }

        fn normal(&mut self, mean: f32, _std: f32) -> f32 {
            mean
        }

        fn index(&mut self, _upper: usize) -> usize {
            0
        }

        fn bernoulli(&mut self, _p: f32) -> bool {
            self.coin
        }
    }

    fn quiet() -> Scripted {
        Scripted {
            uniforms: Vec::new(),
            coin: false,
        }
    }

    #[test]
    fn restrict_slab_zeroes_requested_fractions() {
        let stage = RestrictSlab::new(1, [0.2, 0.3, 0.1, 0.2]).unwrap();
        let channel = Value::F32(ArrayD::ones(IxDyn(&[2, 10, 1])));
        let mut rng = Scripted {
            uniforms: vec![0.25, 0.15],
            coin: false,
        };
        let mask = stage
            .forward(&[Some(&channel)], &mut rng)
            .unwrap()
            .into_f32("mask")
            .unwrap();
        let row: Vec<f32> = (0..10).map(|i| mask[[0, i, 0]]).collect();
        assert_eq!(row, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
        assert!(RestrictSlab::new(0, [0.5, 0.2, 0.0, 0.1]).is_err());
    }

    #[test]
    fn excluded_background_keeps_foreground_level() {
        let mut channel = ArrayD::zeros(IxDyn(&[7, 7, 1]));
        let mut mask = ArrayD::zeros(IxDyn(&[7, 7, 1]));
        for i in 0..7 {
            for j in 0..4 {
                channel[[i, j, 0]] = 50.0f32;
                mask[[i, j, 0]] = 1.0f32;
            }
        }
        let stage = Blur::new(
            vec![1.0, 1.0],
            None,
            BackgroundPolicy::Excluded {
                zero_prob: 0.5,
                mean_max: 10.0,
                std_max: 5.0,
            },
        );
        let mut rng = Scripted {
            uniforms: Vec::new(),
            coin: true,
        };
        let out = stage
            .forward(&[Some(&Value::F32(channel)), Some(&Value::F32(mask))], &mut rng)
            .unwrap()
            .into_f32("blurred")
            .unwrap();
        assert!((out[[3, 3, 0]] - 50.0).abs() < 1e-3);
        assert_eq!(out[[3, 5, 0]], 0.0);
    }

    #[test]
    fn blurred_background_reset_uses_mask() {
        let channel = ArrayD::from_elem(IxDyn(&[5, 1]), 10.0f32);
        let mask = Array::from_shape_vec(IxDyn(&[5, 1]), vec![0.0, 1.0, 1.0, 1.0, 0.0]).unwrap();
        let stage = Blur::new(vec![0.5], Some(1.15), BackgroundPolicy::Blurred { reset_prob: 0.2 });
        let mut reset = Scripted {
            uniforms: vec![1.0],
            coin: true,
        };
        let out = stage
            .forward(
                &[Some(&Value::F32(channel)), Some(&Value::F32(mask))],
                &mut reset,
            )
            .unwrap()
            .into_f32("blurred")
            .unwrap();
        assert_eq!(out[[0, 0]], 0.0);
        assert!((out[[2, 0]] - 10.0).abs() < 1e-4);
    }

    #[test]
    fn concat_and_select_are_inverse() {
        let a = Value::F32(ArrayD::from_elem(IxDyn(&[2, 2, 1]), 1.0));
        let b = Value::F32(ArrayD::from_elem(IxDyn(&[2, 2, 1]), 2.0));
        let spec = Concat
            .output_spec(&[&a.spec(), &b.spec()])
            .unwrap();
        assert_eq!(spec.shape, vec![2, 2, 2]);
        let stacked = Concat.forward(&[Some(&a), Some(&b)], &mut quiet()).unwrap();
        let second = SelectChannel::new(1)
            .forward(&[Some(&stacked)], &mut quiet())
            .unwrap();
        assert_eq!(second, b);
    }

    #[test]
    fn gamma_with_zero_draw_is_identity() {
        let x = Value::F32(Array::from_shape_vec(IxDyn(&[3, 1]), vec![0.0, 0.5, 1.0]).unwrap());
        let out = Gamma::new(0.5).forward(&[Some(&x)], &mut quiet()).unwrap();
        assert_eq!(out, x);
    }
}
