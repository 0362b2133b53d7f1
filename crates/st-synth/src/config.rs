// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Serde-driven generator configuration.
//!
//! A [`GeneratorConfig`] can be read from a TOML or JSON document, or from a
//! stack of such files merged in order so that later layers override the
//! keys of earlier ones.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::builder::{build_generation_graph, GenerationGraph, GenerationOptions};
use crate::error::{ensure_rank, invalid, SynthError, SynthResult};
use crate::labels::LabelSpec;
use crate::resolution::ResolutionSpec;

/// A scalar broadcast to every spatial axis, or one value per axis.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerAxis<T> {
    Uniform(T),
    Axes(Vec<T>),
}

impl<T: Clone> PerAxis<T> {
    pub fn resolve(&self, label: &'static str, n_dims: usize) -> SynthResult<Vec<T>> {
        match self {
            PerAxis::Uniform(value) => Ok(vec![value.clone(); n_dims]),
            PerAxis::Axes(values) => {
                ensure_rank(label, n_dims, values.len())?;
                Ok(values.clone())
            }
        }
    }
}

/// One resolution row shared by every channel, or one row per channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerChannel {
    Channels(Vec<Vec<f64>>),
    Shared(PerAxis<f64>),
}

impl PerChannel {
    pub fn resolve(
        &self,
        label: &'static str,
        n_dims: usize,
        n_channels: usize,
    ) -> SynthResult<Vec<Vec<f64>>> {
        match self {
            PerChannel::Shared(row) => Ok(vec![row.resolve(label, n_dims)?; n_channels]),
            PerChannel::Channels(rows) => {
                if rows.len() != n_channels {
                    return Err(invalid(
                        label,
                        format!("has {} rows for {n_channels} channels", rows.len()),
                    ));
                }
                for row in rows {
                    ensure_rank(label, n_dims, row.len())?;
                }
                Ok(rows.clone())
            }
        }
    }
}

/// Every parameter of a generation graph in one serialisable record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub labels_shape: Vec<usize>,
    pub n_channels: usize,
    pub generation_labels: Vec<i32>,
    /// Labels kept in the output; every generation label when absent.
    pub output_labels: Option<Vec<i32>>,
    /// Neutral label count; every label is neutral when absent.
    pub n_neutral_labels: Option<usize>,
    pub atlas_res: PerAxis<f64>,
    pub target_res: Option<PerAxis<f64>>,
    pub data_res: Option<PerChannel>,
    pub thickness: Option<PerChannel>,
    pub output_shape: Option<PerAxis<usize>>,
    pub output_div_by_n: Option<usize>,
    pub padding_margin: Option<PerAxis<usize>>,
    pub flipping: bool,
    pub reference_orientation: Option<Vec<Vec<f64>>>,
    pub apply_linear_trans: bool,
    pub apply_nonlin_trans: bool,
    pub nonlin_std: f32,
    pub nonlin_shape_factor: f64,
    pub blur_background: bool,
    pub downsample: bool,
    pub blur_range: Option<f32>,
    pub crop_channel2: Option<Vec<f32>>,
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

impl Default for GeneratorConfig {
    fn default() -> Self {
        let options = GenerationOptions::default();
        Self {
            labels_shape: Vec::new(),
            n_channels: 1,
            generation_labels: Vec::new(),
            output_labels: None,
            n_neutral_labels: None,
            atlas_res: PerAxis::Uniform(1.0),
            target_res: None,
            data_res: None,
            thickness: None,
            output_shape: None,
            output_div_by_n: options.output_div_by_n,
            padding_margin: None,
            flipping: options.flipping,
            reference_orientation: options.reference_orientation,
            apply_linear_trans: options.apply_linear_trans,
            apply_nonlin_trans: options.apply_nonlin_trans,
            nonlin_std: options.nonlin_std,
            nonlin_shape_factor: options.nonlin_shape_factor,
            blur_background: options.blur_background,
            downsample: options.downsample,
            blur_range: options.blur_range,
            crop_channel2: options.crop_channel2,
            crop_channel2_axis: options.crop_channel2_axis,
            apply_bias_field: options.apply_bias_field,
            bias_field_std: options.bias_field_std,
            bias_shape_factor: options.bias_shape_factor,
            background_reset_prob: options.background_reset_prob,
            background_zero_prob: options.background_zero_prob,
            background_mean_max: options.background_mean_max,
            background_std_max: options.background_std_max,
            gamma_std: options.gamma_std,
            flip_prob: options.flip_prob,
            intensity_clip: options.intensity_clip,
            svf_integration_steps: options.svf_integration_steps,
        }
    }
}

impl GeneratorConfig {
    pub fn from_toml_str(text: &str) -> SynthResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json_str(text: &str) -> SynthResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads `paths` in order and deep-merges them. Files ending in `.json`
    /// are parsed as JSON, everything else as TOML.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> SynthResult<Self> {
        let mut merged = JsonValue::Object(Default::default());
        for path in paths {
            let path = path.as_ref();
            let layer = load_layer(path)?;
            let mut changed = Vec::new();
            diff_keys(&merged_view(&merged, &layer), &merged, &mut String::new(), &mut changed);
            merge(&mut merged, &layer);
            debug!(layer = %path.display(), keys = ?changed, "applied configuration layer");
        }
        Ok(serde_json::from_value(merged)?)
    }

    fn n_dims(&self) -> SynthResult<usize> {
        if self.labels_shape.is_empty() {
            return Err(invalid("labels_shape", "must be set"));
        }
        Ok(self.labels_shape.len())
    }

    pub fn label_spec(&self) -> SynthResult<LabelSpec> {
        let output = self
            .output_labels
            .clone()
            .unwrap_or_else(|| self.generation_labels.clone());
        let neutral = self.n_neutral_labels.unwrap_or(self.generation_labels.len());
        LabelSpec::new(self.generation_labels.clone(), output, neutral)
    }

    pub fn resolution_spec(&self) -> SynthResult<ResolutionSpec> {
        let n_dims = self.n_dims()?;
        if self.n_channels == 0 {
            return Err(invalid("n_channels", "must be at least 1"));
        }
        let atlas = self.atlas_res.resolve("atlas_res", n_dims)?;
        let target = match &self.target_res {
            Some(res) => res.resolve("target_res", n_dims)?,
            None => atlas.clone(),
        };
        let data = match &self.data_res {
            Some(rows) => rows.resolve("data_res", n_dims, self.n_channels)?,
            None => vec![atlas.clone(); self.n_channels],
        };
        let thickness = self
            .thickness
            .as_ref()
            .map(|rows| rows.resolve("thickness", n_dims, self.n_channels))
            .transpose()?;
        ResolutionSpec::new(atlas, target, data, thickness)
    }

    pub fn options(&self) -> SynthResult<GenerationOptions> {
        let n_dims = self.n_dims()?;
        let resolve = |value: &Option<PerAxis<usize>>, label: &'static str| {
            value.as_ref().map(|v| v.resolve(label, n_dims)).transpose()
        };
        Ok(GenerationOptions {
            output_shape: resolve(&self.output_shape, "output_shape")?,
            output_div_by_n: self.output_div_by_n,
            padding_margin: resolve(&self.padding_margin, "padding_margin")?,
            flipping: self.flipping,
            reference_orientation: self.reference_orientation.clone(),
            apply_linear_trans: self.apply_linear_trans,
            apply_nonlin_trans: self.apply_nonlin_trans,
            nonlin_std: self.nonlin_std,
            nonlin_shape_factor: self.nonlin_shape_factor,
            blur_background: self.blur_background,
            downsample: self.downsample,
            blur_range: self.blur_range,
            crop_channel2: self.crop_channel2.clone(),
            crop_channel2_axis: self.crop_channel2_axis,
            apply_bias_field: self.apply_bias_field,
            bias_field_std: self.bias_field_std,
            bias_shape_factor: self.bias_shape_factor,
            background_reset_prob: self.background_reset_prob,
            background_zero_prob: self.background_zero_prob,
            background_mean_max: self.background_mean_max,
            background_std_max: self.background_std_max,
            gamma_std: self.gamma_std,
            flip_prob: self.flip_prob,
            intensity_clip: self.intensity_clip,
            svf_integration_steps: self.svf_integration_steps,
        })
    }

    /// Resolves every descriptor and builds the graph.
    pub fn build(&self) -> SynthResult<GenerationGraph> {
        let labels = self.label_spec()?;
        let resolution = self.resolution_spec()?;
        let options = self.options()?;
        build_generation_graph(&self.labels_shape, &labels, &resolution, &options)
    }
}

fn load_layer(path: &Path) -> SynthResult<JsonValue> {
    let text = fs::read_to_string(path).map_err(|source| SynthError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        let value: toml::Value = toml::from_str(&text)?;
        Ok(serde_json::to_value(value)?)
    }
}

fn merge(dest: &mut JsonValue, src: &JsonValue) {
    match (dest, src) {
        (JsonValue::Object(dest_map), JsonValue::Object(src_map)) => {
            for (key, value) in src_map {
                match dest_map.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        dest_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (dest_slot, src_value) => {
            *dest_slot = src_value.clone();
        }
    }
}

fn merged_view(base: &JsonValue, layer: &JsonValue) -> JsonValue {
    let mut view = base.clone();
    merge(&mut view, layer);
    view
}

/// Dotted paths whose value differs between `after` and `before`.
fn diff_keys(after: &JsonValue, before: &JsonValue, path: &mut String, out: &mut Vec<String>) {
    if after == before {
        return;
    }
    match (after, before) {
        (JsonValue::Object(after_map), JsonValue::Object(before_map)) => {
            for (key, value) in after_map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                diff_keys(value, before_map.get(key).unwrap_or(&JsonValue::Null), path, out);
                path.truncate(len);
            }
        }
        _ => out.push(path.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_generation_options() {
        let config = GeneratorConfig::default();
        assert!(config.flipping);
        assert_eq!(config.nonlin_std, 3.0);
        assert_eq!(config.bias_shape_factor, 0.025);
        assert_eq!(config.blur_range, Some(1.15));
        assert_eq!(config.intensity_clip, [0.0, 300.0]);
    }

    #[test]
    fn per_axis_and_per_channel_broadcast() {
        let config = GeneratorConfig::from_json_str(
            r#"{
                "labels_shape": [4, 4, 4],
                "n_channels": 2,
                "generation_labels": [0, 1],
                "atlas_res": 1.0,
                "target_res": [1.0, 1.0, 2.0],
                "data_res": [[1.0, 1.0, 3.0], [2.0, 2.0, 2.0]],
                "thickness": 2.0
            }"#,
        )
        .unwrap();
        let resolution = config.resolution_spec().unwrap();
        assert_eq!(resolution.target_res(), &[1.0, 1.0, 2.0]);
        assert_eq!(resolution.data_res(0), &[1.0, 1.0, 3.0]);
        assert_eq!(resolution.thickness(1), Some(&[2.0, 2.0, 2.0][..]));
    }

    #[test]
    fn per_axis_rank_is_checked() {
        let config = GeneratorConfig {
            labels_shape: vec![4, 4],
            atlas_res: PerAxis::Axes(vec![1.0, 1.0, 1.0]),
            ..GeneratorConfig::default()
        };
        assert!(matches!(
            config.resolution_spec(),
            Err(SynthError::DimensionMismatch { label: "atlas_res", .. })
        ));
    }

    #[test]
    fn merge_overrides_nested_keys() {
        let mut base: JsonValue = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let layer = serde_json::json!({"a": {"c": 5}, "e": 6});
        let mut changed = Vec::new();
        diff_keys(&merged_view(&base, &layer), &base, &mut String::new(), &mut changed);
        merge(&mut base, &layer);
        assert_eq!(base, serde_json::json!({"a": {"b": 1, "c": 5}, "d": 3, "e": 6}));
        changed.sort();
        assert_eq!(changed, vec!["a.c".to_string(), "e".to_string()]);
    }
}
