// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, Ix2, IxDyn};

use super::spatial::{resize_linear, spatial_indices};
use crate::error::{SynthError, SynthResult};
use crate::random::RandomSource;

/// Draws one intensity per voxel and channel from the Gaussian of the voxel's
/// dense label: `means[label, c] + std_devs[label, c] * N(0, 1)`.
pub fn sample_gmm(
    labels: &ArrayD<i32>,
    means: &ArrayD<f32>,
    std_devs: &ArrayD<f32>,
    rng: &mut dyn RandomSource,
) -> SynthResult<ArrayD<f32>> {
    let means = means.view().into_dimensionality::<Ix2>().map_err(|_| {
        SynthError::ShapeMismatch {
            label: "means".to_string(),
            expected: vec![0, 0],
            got: means.shape().to_vec(),
        }
    })?;
    let std_devs = std_devs.view().into_dimensionality::<Ix2>().map_err(|_| {
        SynthError::ShapeMismatch {
            label: "std_devs".to_string(),
            expected: vec![0, 0],
            got: std_devs.shape().to_vec(),
        }
    })?;
    let (n_labels, channels) = means.dim();
    let n = labels.ndim() - 1;
    let spatial = labels.shape()[..n].to_vec();
    let mut shape = spatial.clone();
    shape.push(channels);
    let mut image = ArrayD::zeros(IxDyn(&shape));
    for x in spatial_indices(&spatial) {
        let mut index = x;
        index.push(0);
        let label = labels[IxDyn(&index)];
        if label < 0 || label as usize >= n_labels {
            return Err(SynthError::UnknownLabel { value: label });
        }
        for c in 0..channels {
            index[n] = c;
            let row = label as usize;
            image[IxDyn(&index)] = rng.normal(means[[row, c]], std_devs[[row, c]]);
        }
    }
    Ok(image)
}

/// `1` where the dense label is foreground, `0` on background.
pub fn foreground_mask(labels: &ArrayD<i32>) -> ArrayD<f32> {
    labels.mapv(|label| if label > 0 { 1.0 } else { 0.0 })
}

pub fn clip(x: &ArrayD<f32>, low: f32, high: f32) -> ArrayD<f32> {
    x.mapv(|v| v.clamp(low, high))
}

/// Rescales to `[0, 1]`. A constant volume maps to zero.
pub fn min_max_normalise(x: &ArrayD<f32>) -> ArrayD<f32> {
    let (min, max) = x
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !min.is_finite() || !max.is_finite() {
        return x.clone();
    }
    let span = (max - min).max(f32::EPSILON);
    x.mapv(|v| (v - min) / span)
}

/// Raises intensities to `gamma`. Expects values in `[0, 1]`.
pub fn gamma(x: &ArrayD<f32>, gamma: f32) -> ArrayD<f32> {
    x.mapv(|v| v.max(0.0).powf(gamma))
}

/// Fills an array with independent normal draws.
pub fn normal_field(shape: &[usize], mean: f32, std: f32, rng: &mut dyn RandomSource) -> ArrayD<f32> {
    let mut field = ArrayD::zeros(IxDyn(shape));
    field.iter_mut().for_each(|v| *v = rng.normal(mean, std));
    field
}

/// Smooth positive multiplicative field of shape `spatial + [1]`: a coarse
/// normal tensor upsampled linearly and exponentiated.
pub fn bias_field(
    spatial: &[usize],
    coarse: &[usize],
    std: f32,
    rng: &mut dyn RandomSource,
) -> ArrayD<f32> {
    let mut coarse_shape = coarse.to_vec();
    coarse_shape.push(1);
    let small = normal_field(&coarse_shape, 0.0, std, rng);
    resize_linear(&small, spatial).mapv(f32::exp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::RandomSource;
    use ndarray::Array;

    /// Returns the mean of every normal draw and midpoints for uniforms.
    struct MeanOnly;

    impl RandomSource for MeanOnly {
        fn uniform(&mut self, low: f32, high: f32) -> f32 {
            0.5 * (low + high)
        }

        fn normal(&mut self, mean: f32, _std: f32) -> f32 {
            mean
        }

        fn index(&mut self, _upper: usize) -> usize {
            0
        }
    }

    #[test]
    fn gmm_reads_the_row_of_each_label() {
        let labels = Array::from_shape_vec(IxDyn(&[2, 2, 1]), vec![0, 1, 2, 1]).unwrap();
        let means =
            Array::from_shape_vec(IxDyn(&[3, 2]), vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]).unwrap();
        let stds = ArrayD::from_elem(IxDyn(&[3, 2]), 1.0);
        let image = sample_gmm(&labels, &means, &stds, &mut MeanOnly).unwrap();
        assert_eq!(image.shape(), &[2, 2, 2]);
        assert_eq!(image[[0, 1, 0]], 10.0);
        assert_eq!(image[[1, 0, 1]], 21.0);
    }

    #[test]
    fn gmm_rejects_out_of_range_labels() {
        let labels = ArrayD::from_elem(IxDyn(&[1, 1]), 4);
        let means = ArrayD::zeros(IxDyn(&[3, 1]));
        let err = sample_gmm(&labels, &means, &means, &mut MeanOnly).unwrap_err();
        assert!(matches!(err, SynthError::UnknownLabel { value: 4 }));
    }

    #[test]
    fn normalisation_spans_unit_interval() {
        let x = Array::from_shape_vec(IxDyn(&[4, 1]), vec![-5.0, 100.0, 400.0, 50.0]).unwrap();
        let y = min_max_normalise(&clip(&x, 0.0, 300.0));
        assert_eq!(y[[0, 0]], 0.0);
        assert_eq!(y[[2, 0]], 1.0);
        let g = gamma(&y, 2.0);
        assert!((g[[1, 0]] - (1.0f32 / 3.0).powi(2)).abs() < 1e-6);
    }

    #[test]
    fn flat_bias_field_is_unity() {
        let field = bias_field(&[4, 5], &[1, 1], 0.3, &mut MeanOnly);
        assert_eq!(field.shape(), &[4, 5, 1]);
        assert!(field.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }
}
