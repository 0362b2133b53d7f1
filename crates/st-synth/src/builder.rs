// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Assembly of the label-to-image generation graph.
//!
//! The builder plans every shape up front, then appends stages only when
//! their driving option is set or the planned shapes say they do work. The
//! resulting [`Graph`] consumes
//!
//! * `labels`: raw label values, `labels_shape + [1]`, `I32`
//! * `means` / `std_devs`: `[n_labels, n_channels]`, `F32`
//! * `affine`: `[n_dims + 1, n_dims + 1]`, required iff linear deformation is on
//! * `nonlinear_field`: optional coarse velocity field
//!
//! and emits `image` (`output_shape + [n_channels]`) and `labels`
//! (`output_shape + [1]`).

use tracing::{debug, info, warn};

use crate::error::{ensure_rank, invalid, SynthError, SynthResult};
use crate::graph::{Graph, GraphBuilder, NodeId};
use crate::labels::LabelSpec;
use crate::ops::orientation::left_right_axis;
use crate::resolution::ResolutionSpec;
use crate::shapes::{plan_shapes, ShapePlan};
use crate::stages::{
    BackgroundPolicy, BiasField, Blur, Clip, Concat, Deform, ForegroundMask, Gamma,
    MinMaxNormalise, Multiply, NonlinearDeformation, Pad, PassThrough, RandomCrop, RandomFlip,
    RemapLabels, Resample, ResampleLabels, ResetLabels, RestrictSlab, SampleGmm, SelectChannel,
};
use crate::value::TensorSpec;

pub const LABELS_INPUT: &str = "labels";
pub const MEANS_INPUT: &str = "means";
pub const STD_DEVS_INPUT: &str = "std_devs";
pub const AFFINE_INPUT: &str = "affine";
pub const NONLINEAR_FIELD_INPUT: &str = "nonlinear_field";
pub const IMAGE_OUTPUT: &str = "image";
pub const LABELS_OUTPUT: &str = "labels";

/// Upper bound on scaling-and-squaring steps of the velocity field.
pub const MAX_INTEGRATION_STEPS: u32 = 16;

/// Feature switches and constants of a generation graph.
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOptions {
    pub output_shape: Option<Vec<usize>>,
    pub output_div_by_n: Option<usize>,
    pub padding_margin: Option<Vec<usize>>,
    pub flipping: bool,
    /// Orientation matrix of the label map, `(n_dims + 1)` square rows.
    pub reference_orientation: Option<Vec<Vec<f64>>>,
    pub apply_linear_trans: bool,
    pub apply_nonlin_trans: bool,
    pub nonlin_std: f32,
    pub nonlin_shape_factor: f64,
    pub blur_background: bool,
    /// Simulate acquisition at `data_res` before resampling to the output.
    pub downsample: bool,
    pub blur_range: Option<f32>,
    /// `[front_low, front_high, back_low, back_high]` fractions for channel 1.
    pub crop_channel2: Option<Vec<f32>>,
    /// Axis restricted by `crop_channel2`; the last spatial axis when absent.
    pub crop_channel2_axis: Option<usize>,
    pub apply_bias_field: bool,
    pub bias_field_std: f32,
    pub bias_shape_factor: f64,
    pub background_reset_prob: f32,
    pub background_zero_prob: f32,
    pub background_mean_max: f32,
    pub background_std_max: f32,
    pub gamma_std: f32,
    pub flip_prob: f32,
    pub intensity_clip: [f32; 2],
    pub svf_integration_steps: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            output_shape: None,
            output_div_by_n: None,
            padding_margin: None,
            flipping: true,
            reference_orientation: None,
            apply_linear_trans: true,
            apply_nonlin_trans: true,
            nonlin_std: 3.0,
            nonlin_shape_factor: 0.0625,
            blur_background: true,
            downsample: false,
            blur_range: Some(1.15),
            crop_channel2: None,
            crop_channel2_axis: None,
            apply_bias_field: true,
            bias_field_std: 0.3,
            bias_shape_factor: 0.025,
            background_reset_prob: 0.2,
            background_zero_prob: 0.5,
            background_mean_max: 10.0,
            background_std_max: 5.0,
            gamma_std: 0.5,
            flip_prob: 0.5,
            intensity_clip: [0.0, 300.0],
            svf_integration_steps: 7,
        }
    }
}

impl GenerationOptions {
    /// Options with every optional stage switched off.
    pub fn minimal() -> Self {
        Self {
            flipping: false,
            apply_linear_trans: false,
            apply_nonlin_trans: false,
            blur_range: None,
            apply_bias_field: false,
            ..Self::default()
        }
    }

    fn validate(&self, n_dims: usize) -> SynthResult<()> {
        if let Some(shape) = &self.output_shape {
            ensure_rank("output_shape", n_dims, shape.len())?;
        }
        if let Some(margin) = &self.padding_margin {
            ensure_rank("padding_margin", n_dims, margin.len())?;
        }
        if let Some(range) = self.blur_range {
            if !(range.is_finite() && range > 0.0) {
                return Err(invalid("blur_range", format!("{range} must be positive")));
            }
        }
        for (label, factor) in [
            ("nonlin_shape_factor", self.nonlin_shape_factor),
            ("bias_shape_factor", self.bias_shape_factor),
        ] {
            if !(factor.is_finite() && factor > 0.0) {
                return Err(invalid(label, format!("{factor} must be positive")));
            }
        }
        if !(1..=MAX_INTEGRATION_STEPS).contains(&self.svf_integration_steps) {
            return Err(invalid(
                "svf_integration_steps",
                format!(
                    "{} is outside 1..={MAX_INTEGRATION_STEPS}",
                    self.svf_integration_steps
                ),
            ));
        }
        for (label, std) in [
            ("nonlin_std", self.nonlin_std),
            ("bias_field_std", self.bias_field_std),
            ("gamma_std", self.gamma_std),
            ("background_mean_max", self.background_mean_max),
            ("background_std_max", self.background_std_max),
        ] {
            if !(std.is_finite() && std >= 0.0) {
                return Err(invalid(label, format!("{std} must be non-negative")));
            }
        }
        for (label, p) in [
            ("background_reset_prob", self.background_reset_prob),
            ("background_zero_prob", self.background_zero_prob),
            ("flip_prob", self.flip_prob),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid(label, format!("{p} is not a probability")));
            }
        }
        let [low, high] = self.intensity_clip;
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(invalid("intensity_clip", format!("[{low}, {high}] is empty")));
        }
        Ok(())
    }

    fn background_policy(&self) -> BackgroundPolicy {
        if self.blur_background {
            BackgroundPolicy::Blurred {
                reset_prob: self.background_reset_prob,
            }
        } else {
            BackgroundPolicy::Excluded {
                zero_prob: self.background_zero_prob,
                mean_max: self.background_mean_max,
                std_max: self.background_std_max,
            }
        }
    }

    fn slab_restriction(&self, n_dims: usize, n_channels: usize) -> SynthResult<Option<RestrictSlab>> {
        let Some(bounds) = &self.crop_channel2 else {
            return Ok(None);
        };
        let bounds: [f32; 4] = bounds.as_slice().try_into().map_err(|_| {
            invalid("crop_channel2", format!("needs 4 values, got {}", bounds.len()))
        })?;
        let axis = self.crop_channel2_axis.unwrap_or(n_dims - 1);
        if axis >= n_dims {
            return Err(invalid(
                "crop_channel2_axis",
                format!("{axis} is out of range for {n_dims} dimensions"),
            ));
        }
        let stage = RestrictSlab::new(axis, bounds)?;
        if n_channels < 2 {
            warn!("crop_channel2 is set but the graph has a single channel; ignoring it");
            return Ok(None);
        }
        Ok(Some(stage))
    }
}

/// A built graph together with the shapes it was planned for.
#[derive(Debug)]
pub struct GenerationGraph {
    graph: Graph,
    plan: ShapePlan,
    n_channels: usize,
}

impl GenerationGraph {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn plan(&self) -> &ShapePlan {
        &self.plan
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }
}

/// Shared, read-only state handed to every per-channel pipeline.
struct ChannelContext<'a> {
    resolution: &'a ResolutionSpec,
    options: &'a GenerationOptions,
    plan: &'a ShapePlan,
    restriction: Option<&'a RestrictSlab>,
}

/// Builds the generation graph for label maps of spatial shape `labels_shape`.
///
/// The channel count is the number of `data_res` rows of `resolution`.
pub fn build_generation_graph(
    labels_shape: &[usize],
    labels: &LabelSpec,
    resolution: &ResolutionSpec,
    options: &GenerationOptions,
) -> SynthResult<GenerationGraph> {
    let n_dims = resolution.n_dims();
    let n_channels = resolution.n_channels();
    ensure_rank("labels_shape", n_dims, labels_shape.len())?;
    if labels_shape.contains(&0) {
        return Err(invalid("labels_shape", format!("{labels_shape:?} has an empty axis")));
    }
    options.validate(n_dims)?;

    // Orientation and the sided split are checked before any node exists.
    let flip = if options.flipping {
        let aff = options
            .reference_orientation
            .as_ref()
            .ok_or(SynthError::MissingOrientation)?;
        let axis = left_right_axis(aff, n_dims)?;
        Some(RandomFlip::new(axis, labels.contralateral_swap()?, options.flip_prob))
    } else {
        None
    };
    let restriction = options.slab_restriction(n_dims, n_channels)?;

    let plan = plan_shapes(
        labels_shape,
        options.output_shape.as_deref(),
        resolution.atlas_res(),
        resolution.target_res(),
        options.padding_margin.as_deref(),
        options.output_div_by_n,
    )?;

    let n_labels = labels.len();
    let mut builder = GraphBuilder::new();
    let raw_labels = builder.input(
        LABELS_INPUT,
        TensorSpec::i32(with_channel_axis(labels_shape, 1)),
        true,
    )?;
    let means = builder.input(MEANS_INPUT, TensorSpec::f32(vec![n_labels, n_channels]), true)?;
    let std_devs = builder.input(
        STD_DEVS_INPUT,
        TensorSpec::f32(vec![n_labels, n_channels]),
        true,
    )?;
    let affine = if options.apply_linear_trans {
        Some(builder.input(
            AFFINE_INPUT,
            TensorSpec::f32(vec![n_dims + 1, n_dims + 1]),
            true,
        )?)
    } else {
        None
    };
    let nonlinear = if options.apply_nonlin_trans {
        let coarse_shape = scaled_shape(&plan.padded_shape, options.nonlin_shape_factor);
        let field = builder.input(
            NONLINEAR_FIELD_INPUT,
            TensorSpec::f32(with_channel_axis(&coarse_shape, n_dims)),
            false,
        )?;
        Some((
            field,
            NonlinearDeformation {
                coarse_shape,
                std: options.nonlin_std,
                integration_steps: options.svf_integration_steps,
            },
        ))
    } else {
        None
    };

    // Label side.
    let mut dense = builder.push(RemapLabels::new(labels.forward_table()), &[raw_labels])?;
    if let Some(margin) = &plan.padding_margin {
        dense = builder.push(Pad::new(margin.clone()), &[dense])?;
    }
    if affine.is_some() || nonlinear.is_some() {
        let mut inputs = vec![dense];
        inputs.extend(affine);
        inputs.extend(nonlinear.as_ref().map(|(field, _)| *field));
        let stage = Deform::new(n_dims, affine.is_some(), nonlinear.map(|(_, settings)| settings));
        dense = builder.push(stage, &inputs)?;
    }
    if plan.needs_crop() {
        dense = builder.push(RandomCrop::new(plan.crop_shape.clone()), &[dense])?;
    }
    if let Some(flip) = flip {
        dense = builder.push(flip, &[dense])?;
    }

    // Image side.
    let image = builder.push(
        SampleGmm::new(n_labels, n_channels),
        &[dense, means, std_devs],
    )?;
    let mask = builder.push(ForegroundMask, &[dense])?;
    let context = ChannelContext {
        resolution,
        options,
        plan: &plan,
        restriction: restriction.as_ref(),
    };
    let mut channels = Vec::with_capacity(n_channels);
    for index in 0..n_channels {
        channels.push(channel_pipeline(&mut builder, &context, index, image, mask)?);
    }
    let image = if channels.len() > 1 {
        builder.push(Concat, &channels)?
    } else {
        channels[0]
    };

    // Labels back to output space.
    if plan.needs_resample() {
        dense = builder.push(ResampleLabels::new(plan.output_shape.clone()), &[dense])?;
    }
    let mut out_labels = builder.push_named(
        "restore_labels",
        RemapLabels::new(labels.inverse_table()),
        &[dense],
    )?;
    let to_reset = labels.labels_to_reset();
    if !to_reset.is_empty() {
        out_labels = builder.push(ResetLabels::new(to_reset), &[out_labels])?;
    }
    let image = builder.push(PassThrough, &[image, out_labels])?;

    let graph = builder.finish(vec![
        (IMAGE_OUTPUT.to_string(), image),
        (LABELS_OUTPUT.to_string(), out_labels),
    ])?;
    info!(
        stages = graph.describe().len(),
        n_channels,
        crop_shape = ?plan.crop_shape,
        output_shape = ?plan.output_shape,
        "built generation graph"
    );
    Ok(GenerationGraph {
        graph,
        plan,
        n_channels,
    })
}

/// Photometric pipeline of one channel, a function of the sampled image,
/// the shared foreground mask and the static configuration only.
fn channel_pipeline(
    builder: &mut GraphBuilder,
    ctx: &ChannelContext<'_>,
    index: usize,
    image: NodeId,
    mask: NodeId,
) -> SynthResult<NodeId> {
    let tag = |stage: &str| format!("{stage}/ch{index}");
    let mut channel = builder.push_named(tag("select_channel"), SelectChannel::new(index), &[image])?;

    let slab = match ctx.restriction {
        Some(restriction) if index == 1 => {
            let slab = builder.push_named(tag("restrict_slab"), restriction.clone(), &[channel])?;
            channel = builder.push_named(tag("restrict"), Multiply, &[channel, slab])?;
            Some(slab)
        }
        _ => None,
    };

    let blur = Blur::new(
        ctx.resolution.blur_sigma(index),
        ctx.options.blur_range,
        ctx.options.background_policy(),
    );
    channel = builder.push_named(tag("blur"), blur, &[channel, mask])?;
    if let Some(slab) = slab {
        channel = builder.push_named(tag("restrict_blurred"), Multiply, &[channel, slab])?;
    }

    let acquisition = if ctx.options.downsample {
        ctx.resolution.acquisition_shape(index, &ctx.plan.crop_shape)
    } else {
        None
    };
    if ctx.plan.needs_resample() || acquisition.is_some() {
        let stage = Resample::new(ctx.plan.output_shape.clone(), acquisition);
        channel = builder.push_named(tag("resample"), stage, &[channel])?;
    }

    if ctx.options.apply_bias_field {
        let coarse = scaled_shape(&ctx.plan.output_shape, ctx.options.bias_shape_factor);
        let stage = BiasField::new(ctx.options.bias_field_std, coarse);
        channel = builder.push_named(tag("bias_field"), stage, &[channel])?;
    }

    let [low, high] = ctx.options.intensity_clip;
    channel = builder.push_named(tag("clip"), Clip::new(low, high), &[channel])?;
    channel = builder.push_named(tag("min_max_normalise"), MinMaxNormalise, &[channel])?;
    channel = builder.push_named(tag("gamma"), Gamma::new(ctx.options.gamma_std), &[channel])?;
    debug!(channel = index, "channel pipeline assembled");
    Ok(channel)
}

fn with_channel_axis(spatial: &[usize], channels: usize) -> Vec<usize> {
    let mut shape = spatial.to_vec();
    shape.push(channels);
    shape
}

/// `ceil(len * factor)` per axis, never below one voxel.
fn scaled_shape(shape: &[usize], factor: f64) -> Vec<usize> {
    shape
        .iter()
        .map(|&len| ((len as f64 * factor).ceil() as usize).max(1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSpec {
        LabelSpec::new(vec![0, 2, 3, 41, 42], vec![0, 2, 41], 1).unwrap()
    }

    fn identity(n_dims: usize) -> Vec<Vec<f64>> {
        (0..=n_dims)
            .map(|r| (0..=n_dims).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn scaled_shape_never_collapses() {
        assert_eq!(scaled_shape(&[16, 40, 3], 0.0625), vec![1, 3, 1]);
        assert_eq!(scaled_shape(&[160], 0.025), vec![4]);
    }

    #[test]
    fn minimal_graph_skips_optional_stages() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0], 1).unwrap();
        let built = build_generation_graph(
            &[8, 8],
            &labels(),
            &resolution,
            &GenerationOptions::minimal(),
        )
        .unwrap();
        assert_eq!(
            built.graph().describe(),
            vec![
                "remap_labels",
                "sample_gmm",
                "foreground_mask",
                "select_channel/ch0",
                "blur/ch0",
                "clip/ch0",
                "min_max_normalise/ch0",
                "gamma/ch0",
                "restore_labels",
                "reset_labels",
                "pass_through",
            ]
        );
        assert_eq!(built.graph().input_names(), vec!["labels", "means", "std_devs"]);
    }

    #[test]
    fn flipping_without_orientation_fails_eagerly() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0], 1).unwrap();
        let options = GenerationOptions {
            flipping: true,
            ..GenerationOptions::minimal()
        };
        let err = build_generation_graph(&[8, 8], &labels(), &resolution, &options).unwrap_err();
        assert!(matches!(err, SynthError::MissingOrientation));
    }

    #[test]
    fn uneven_sided_labels_are_rejected_when_flipping() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0], 1).unwrap();
        let spec = LabelSpec::new(vec![0, 2, 41, 42], vec![0, 2], 1).unwrap();
        let options = GenerationOptions {
            flipping: true,
            reference_orientation: Some(identity(2)),
            ..GenerationOptions::minimal()
        };
        let err = build_generation_graph(&[8, 8], &spec, &resolution, &options).unwrap_err();
        assert!(matches!(err, SynthError::UnevenSidedLabels { neutral: 1, sided: 3 }));
    }

    #[test]
    fn integration_steps_are_bounded() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0], 1).unwrap();
        for steps in [0, MAX_INTEGRATION_STEPS + 1, 64] {
            let options = GenerationOptions {
                svf_integration_steps: steps,
                ..GenerationOptions::minimal()
            };
            assert!(matches!(
                build_generation_graph(&[8, 8], &labels(), &resolution, &options),
                Err(SynthError::InvalidValue { label: "svf_integration_steps", .. })
            ));
        }
    }

    #[test]
    fn crop_channel2_is_validated() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0], 2).unwrap();
        let options = GenerationOptions {
            crop_channel2: Some(vec![0.1, 0.2, 0.3]),
            ..GenerationOptions::minimal()
        };
        assert!(build_generation_graph(&[8, 8], &labels(), &resolution, &options).is_err());

        let options = GenerationOptions {
            crop_channel2: Some(vec![0.0, 0.1, 0.0, 0.1]),
            ..GenerationOptions::minimal()
        };
        let built = build_generation_graph(&[8, 8], &labels(), &resolution, &options).unwrap();
        let stages = built.graph().describe();
        assert!(stages.contains(&"restrict_slab/ch1"));
        assert!(!stages.contains(&"restrict_slab/ch0"));
        assert!(stages.contains(&"concat"));
    }

    #[test]
    fn rank_mismatch_is_reported() {
        let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0, 1.0], 1).unwrap();
        let err = build_generation_graph(
            &[8, 8],
            &labels(),
            &resolution,
            &GenerationOptions::minimal(),
        )
        .unwrap_err();
        assert!(matches!(err, SynthError::DimensionMismatch { expected: 3, got: 2, .. }));
    }
}
