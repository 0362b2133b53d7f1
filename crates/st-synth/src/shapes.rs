// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Shape planning shared by every stage of a generation graph.
//!
//! The planner fixes three shapes before any node is created: the working
//! shape labels are cropped to after deformation, the shape finally emitted
//! and the padding margin applied to the raw labels. Stage insertion in the
//! builder is decided by comparing these shapes.

use tracing::warn;

use crate::error::{ensure_rank, invalid, SynthResult};

/// Result of [`plan_shapes`].
#[derive(Clone, Debug, PartialEq)]
pub struct ShapePlan {
    /// Shape of the labels once padded, i.e. the shape deformation runs at.
    pub padded_shape: Vec<usize>,
    /// Working shape after random cropping, at atlas resolution.
    pub crop_shape: Vec<usize>,
    /// Shape of the emitted image and label map, at target resolution.
    pub output_shape: Vec<usize>,
    /// Padding applied on both sides of every axis, if any.
    pub padding_margin: Option<Vec<usize>>,
    /// `atlas_res / target_res` per axis, absent when both agree.
    pub resample_factor: Option<Vec<f64>>,
}

impl ShapePlan {
    pub fn n_dims(&self) -> usize {
        self.crop_shape.len()
    }

    /// Whether the deformed labels need to be cropped.
    pub fn needs_crop(&self) -> bool {
        self.crop_shape != self.padded_shape
    }

    /// Whether image and labels must be resampled to reach the output shape.
    pub fn needs_resample(&self) -> bool {
        self.crop_shape != self.output_shape
    }
}

/// Computes the crop shape, output shape and padding margin for a label map.
///
/// An explicit `output_shape` is clamped to what the padded labels can
/// provide at target resolution, then rounded down to `output_div_by_n`.
/// Without one, the output follows the padded labels and is rounded up.
pub fn plan_shapes(
    labels_shape: &[usize],
    output_shape: Option<&[usize]>,
    atlas_res: &[f64],
    target_res: &[f64],
    padding_margin: Option<&[usize]>,
    output_div_by_n: Option<usize>,
) -> SynthResult<ShapePlan> {
    let n_dims = atlas_res.len();
    ensure_rank("labels_shape", n_dims, labels_shape.len())?;
    ensure_rank("target_res", n_dims, target_res.len())?;
    if labels_shape.iter().any(|&len| len == 0) {
        return Err(invalid("labels_shape", "every axis must be non-empty"));
    }
    if output_div_by_n == Some(0) {
        return Err(invalid("output_div_by_n", "must be at least 1"));
    }

    let padding_margin = match padding_margin {
        Some(margin) => {
            ensure_rank("padding_margin", n_dims, margin.len())?;
            Some(margin.to_vec())
        }
        None => None,
    };
    let padded_shape: Vec<usize> = match &padding_margin {
        Some(margin) => labels_shape
            .iter()
            .zip(margin)
            .map(|(&len, &pad)| len + 2 * pad)
            .collect(),
        None => labels_shape.to_vec(),
    };

    let resample_factor = if atlas_res == target_res {
        None
    } else {
        Some(
            atlas_res
                .iter()
                .zip(target_res)
                .map(|(&atlas, &target)| atlas / target)
                .collect::<Vec<f64>>(),
        )
    };

    let (crop_shape, output_shape) = match output_shape {
        Some(requested) => {
            ensure_rank("output_shape", n_dims, requested.len())?;
            let available: Vec<usize> = match &resample_factor {
                Some(factor) => padded_shape
                    .iter()
                    .zip(factor)
                    .map(|(&len, &f)| (len as f64 * f) as usize)
                    .collect(),
                None => padded_shape.clone(),
            };
            let mut output: Vec<usize> = requested
                .iter()
                .zip(&available)
                .map(|(&want, &max)| want.min(max))
                .collect();

            if let Some(n) = output_div_by_n {
                let rounded: Vec<usize> = output.iter().map(|&len| round_down(len, n)).collect();
                if rounded.iter().any(|&len| len == 0) {
                    return Err(invalid(
                        "output_div_by_n",
                        format!("rounding {output:?} down to a multiple of {n} leaves an empty axis"),
                    ));
                }
                if rounded != output {
                    warn!(
                        requested = ?output,
                        adjusted = ?rounded,
                        divisor = n,
                        "output shape not divisible, rounding down"
                    );
                    output = rounded;
                }
            }

            let crop = match &resample_factor {
                Some(factor) => output
                    .iter()
                    .zip(factor)
                    .map(|(&len, &f)| (len as f64 / f).round_ties_even() as usize)
                    .collect(),
                None => output.clone(),
            };
            (crop, output)
        }
        None => {
            let crop = padded_shape.clone();
            let mut output: Vec<usize> = match &resample_factor {
                Some(factor) => crop
                    .iter()
                    .zip(factor)
                    .map(|(&len, &f)| (len as f64 * f).round_ties_even() as usize)
                    .collect(),
                None => crop.clone(),
            };
            if let Some(n) = output_div_by_n {
                output = output.iter().map(|&len| round_up(len, n)).collect();
            }
            (crop, output)
        }
    };

    if crop_shape.iter().chain(&output_shape).any(|&len| len == 0) {
        return Err(invalid(
            "output_shape",
            format!("planned crop {crop_shape:?} / output {output_shape:?} has an empty axis"),
        ));
    }

    Ok(ShapePlan {
        padded_shape,
        crop_shape,
        output_shape,
        padding_margin,
        resample_factor,
    })
}

fn round_down(len: usize, n: usize) -> usize {
    len - len % n
}

fn round_up(len: usize, n: usize) -> usize {
    match len % n {
        0 => len,
        rem => len + (n - rem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_helpers() {
        assert_eq!(round_down(37, 8), 32);
        assert_eq!(round_down(32, 8), 32);
        assert_eq!(round_up(33, 8), 40);
        assert_eq!(round_up(40, 8), 40);
    }

    #[test]
    fn padding_enlarges_the_working_shape() {
        let plan = plan_shapes(&[10, 12], None, &[1.0, 1.0], &[1.0, 1.0], Some(&[2, 3]), None)
            .unwrap();
        assert_eq!(plan.padded_shape, vec![14, 18]);
        assert_eq!(plan.crop_shape, vec![14, 18]);
        assert_eq!(plan.output_shape, vec![14, 18]);
        assert_eq!(plan.padding_margin, Some(vec![2, 3]));
        assert!(!plan.needs_crop());
        assert!(!plan.needs_resample());
    }

    #[test]
    fn explicit_output_rounds_down_to_divisor() {
        let plan = plan_shapes(&[40, 40], Some(&[37, 30]), &[1.0, 1.0], &[1.0, 1.0], None, Some(8))
            .unwrap();
        assert_eq!(plan.output_shape, vec![32, 24]);
        assert_eq!(plan.crop_shape, vec![32, 24]);
        assert!(plan.needs_crop());
    }

    #[test]
    fn implicit_output_rounds_up_to_divisor() {
        let plan =
            plan_shapes(&[30, 17], None, &[1.0, 1.0], &[0.5, 0.5], None, Some(16)).unwrap();
        assert_eq!(plan.crop_shape, vec![30, 17]);
        assert_eq!(plan.output_shape, vec![64, 48]);
    }

    #[test]
    fn crop_uses_round_half_to_even() {
        let plan =
            plan_shapes(&[20, 20], Some(&[5, 7]), &[1.0, 1.0], &[0.5, 0.5], None, None).unwrap();
        assert_eq!(plan.output_shape, vec![5, 7]);
        assert_eq!(plan.crop_shape, vec![2, 4]);
    }

    #[test]
    fn decimal_target_resolution_keeps_the_exact_ratio() {
        let plan = plan_shapes(&[10], Some(&[100]), &[1.0], &[0.1], None, None).unwrap();
        assert_eq!(plan.output_shape, vec![100]);
        assert_eq!(plan.crop_shape, vec![10]);

        let plan = plan_shapes(&[10, 10], None, &[1.0, 1.0], &[0.1, 0.1], None, None).unwrap();
        assert_eq!(plan.output_shape, vec![100, 100]);
    }

    #[test]
    fn divisor_that_empties_an_axis_is_rejected() {
        let err = plan_shapes(&[6], Some(&[6]), &[1.0], &[1.0], None, Some(8)).unwrap_err();
        assert!(err.to_string().contains("output_div_by_n"));
    }
}
