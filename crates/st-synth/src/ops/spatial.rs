// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, Axis, Dimension, IxDyn, Slice};

/// Iterates every spatial index of `shape` in row-major order.
pub fn spatial_indices(shape: &[usize]) -> impl Iterator<Item = Vec<usize>> {
    ndarray::indices(IxDyn(shape))
        .into_iter()
        .map(|ix| ix.slice().to_vec())
}

fn with_channel(spatial: &[usize], channels: usize) -> Vec<usize> {
    let mut shape = spatial.to_vec();
    shape.push(channels);
    shape
}

fn split_shape(a_shape: &[usize]) -> (&[usize], usize) {
    let n = a_shape.len() - 1;
    (&a_shape[..n], a_shape[n])
}

/// Zero-pads every spatial axis by `margin` on both sides.
pub fn pad<T: Clone + Default>(a: &ArrayD<T>, margin: &[usize]) -> ArrayD<T> {
    let (spatial, channels) = split_shape(a.shape());
    let padded: Vec<usize> = spatial
        .iter()
        .zip(margin)
        .map(|(&len, &m)| len + 2 * m)
        .collect();
    let mut out = ArrayD::from_elem(IxDyn(&with_channel(&padded, channels)), T::default());
    out.slice_each_axis_mut(|ax| match margin.get(ax.axis.index()) {
        Some(&m) => Slice::from(m..m + spatial[ax.axis.index()]),
        None => Slice::from(..),
    })
    .assign(a);
    out
}

/// Extracts the `shape` window starting at `offsets` on the spatial axes.
pub fn crop<T: Clone>(a: &ArrayD<T>, offsets: &[usize], shape: &[usize]) -> ArrayD<T> {
    a.slice_each_axis(|ax| {
        let axis = ax.axis.index();
        match (offsets.get(axis), shape.get(axis)) {
            (Some(&start), Some(&len)) => Slice::from(start..start + len),
            _ => Slice::from(..),
        }
    })
    .to_owned()
}

/// Mirrors the array along one spatial axis.
pub fn flip<T: Clone>(a: &ArrayD<T>, axis: usize) -> ArrayD<T> {
    let mut view = a.view();
    view.invert_axis(Axis(axis));
    view.to_owned()
}

/// Single-channel mask that is zero over the first `front` and last `back`
/// voxels of `axis`, one elsewhere.
pub fn slab_mask(spatial: &[usize], axis: usize, front: usize, back: usize) -> ArrayD<f32> {
    let len = spatial[axis];
    let mut mask = ArrayD::from_elem(IxDyn(&with_channel(spatial, 1)), 1.0f32);
    for (i, mut plane) in mask.axis_iter_mut(Axis(axis)).enumerate() {
        if i < front || i + back >= len {
            plane.fill(0.0);
        }
    }
    mask
}

/// Continuous source coordinate of output voxel `dst` when an axis of length
/// `src_len` is resampled to `dst_len`, voxel centres aligned.
fn source_coordinate(dst: usize, src_len: usize, dst_len: usize) -> f64 {
    let scale = src_len as f64 / dst_len as f64;
    ((dst as f64 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f64)
}

/// N-linear interpolation of every channel at a continuous spatial
/// coordinate. Coordinates are clamped to the volume.
pub fn interpolate_linear(a: &ArrayD<f32>, coord: &[f64], out: &mut [f32]) {
    let (spatial, channels) = split_shape(a.shape());
    let n = spatial.len();
    let mut base = vec![0usize; n];
    let mut frac = vec![0.0f64; n];
    for axis in 0..n {
        let max = (spatial[axis] - 1) as f64;
        let c = coord[axis].clamp(0.0, max);
        let floor = c.floor();
        base[axis] = floor as usize;
        frac[axis] = c - floor;
    }
    out.iter_mut().for_each(|v| *v = 0.0);
    let mut index = vec![0usize; n + 1];
    for corner in 0..(1usize << n) {
        let mut weight = 1.0f64;
        for axis in 0..n {
            let upper = (corner >> axis) & 1 == 1;
            let pos = if upper {
                (base[axis] + 1).min(spatial[axis] - 1)
            } else {
                base[axis]
            };
            index[axis] = pos;
            weight *= if upper { frac[axis] } else { 1.0 - frac[axis] };
        }
        if weight == 0.0 {
            continue;
        }
        for (c, slot) in out.iter_mut().enumerate().take(channels) {
            index[n] = c;
            *slot += (weight * a[IxDyn(&index)] as f64) as f32;
        }
    }
}

/// Nearest-neighbour lookup; `None` when the rounded coordinate leaves the
/// volume.
pub fn nearest_index(spatial: &[usize], coord: &[f64]) -> Option<Vec<usize>> {
    let mut index = Vec::with_capacity(spatial.len() + 1);
    for (&len, &c) in spatial.iter().zip(coord) {
        let rounded = c.round();
        if rounded < 0.0 || rounded > (len - 1) as f64 {
            return None;
        }
        index.push(rounded as usize);
    }
    Some(index)
}

/// Resamples the spatial axes to `shape` with n-linear interpolation.
pub fn resize_linear(a: &ArrayD<f32>, shape: &[usize]) -> ArrayD<f32> {
    let (spatial, channels) = split_shape(a.shape());
    if spatial == shape {
        return a.clone();
    }
    let mut out = ArrayD::zeros(IxDyn(&with_channel(shape, channels)));
    let mut buffer = vec![0.0f32; channels];
    let mut coord = vec![0.0f64; shape.len()];
    for dst in spatial_indices(shape) {
        for axis in 0..shape.len() {
            coord[axis] = source_coordinate(dst[axis], spatial[axis], shape[axis]);
        }
        interpolate_linear(a, &coord, &mut buffer);
        let mut index = dst;
        index.push(0);
        let last = index.len() - 1;
        for (c, &v) in buffer.iter().enumerate() {
            index[last] = c;
            out[IxDyn(&index)] = v;
        }
    }
    out
}

/// Resamples the spatial axes to `shape` picking the nearest source voxel.
pub fn resize_nearest<T: Copy + Default>(a: &ArrayD<T>, shape: &[usize]) -> ArrayD<T> {
    let (spatial, channels) = split_shape(a.shape());
    if spatial == shape {
        return a.clone();
    }
    let mut out = ArrayD::from_elem(IxDyn(&with_channel(shape, channels)), T::default());
    for dst in spatial_indices(shape) {
        let mut src: Vec<usize> = (0..shape.len())
            .map(|axis| {
                let c = source_coordinate(dst[axis], spatial[axis], shape[axis]);
                (c.round() as usize).min(spatial[axis] - 1)
            })
            .collect();
        let mut index = dst;
        index.push(0);
        src.push(0);
        let last = index.len() - 1;
        for c in 0..channels {
            index[last] = c;
            src[last] = c;
            out[IxDyn(&index)] = a[IxDyn(&src)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp(shape: &[usize]) -> ArrayD<f32> {
        let total: usize = shape.iter().product();
        Array::from_shape_vec(IxDyn(shape), (0..total).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn pad_then_crop_restores_the_volume() {
        let a = ramp(&[3, 4, 1]);
        let padded = pad(&a, &[2, 1]);
        assert_eq!(padded.shape(), &[7, 6, 1]);
        assert_eq!(padded[[0, 0, 0]], 0.0);
        assert_eq!(crop(&padded, &[2, 1], &[3, 4]), a);
    }

    #[test]
    fn flip_twice_is_identity() {
        let a = ramp(&[3, 2, 2, 1]);
        let once = flip(&a, 1);
        assert_eq!(once[[0, 0, 0, 0]], a[[0, 1, 0, 0]]);
        assert_eq!(flip(&once, 1), a);
    }

    #[test]
    fn slab_mask_zeroes_both_ends() {
        let mask = slab_mask(&[2, 6], 1, 1, 2);
        let row: Vec<f32> = (0..6).map(|i| mask[[0, i, 0]]).collect();
        assert_eq!(row, vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn linear_interpolation_is_exact_on_ramps() {
        let a = ramp(&[4, 1]);
        let mut out = [0.0f32];
        interpolate_linear(&a, &[1.25], &mut out);
        assert!((out[0] - 1.25).abs() < 1e-6);
        interpolate_linear(&a, &[10.0], &mut out);
        assert_eq!(out[0], 3.0);
    }

    #[test]
    fn resize_preserves_constant_volumes() {
        let a = ArrayD::from_elem(IxDyn(&[4, 4, 2]), 3.5f32);
        let up = resize_linear(&a, &[8, 6]);
        assert_eq!(up.shape(), &[8, 6, 2]);
        assert!(up.iter().all(|&v| (v - 3.5).abs() < 1e-6));
        let labels = ArrayD::from_elem(IxDyn(&[4, 4, 1]), 7i32);
        let down = resize_nearest(&labels, &[2, 3]);
        assert_eq!(down.shape(), &[2, 3, 1]);
        assert!(down.iter().all(|&v| v == 7));
    }

    #[test]
    fn nearest_index_rejects_outside_points() {
        assert_eq!(nearest_index(&[4, 4], &[0.4, 2.6]), Some(vec![0, 3]));
        assert_eq!(nearest_index(&[4, 4], &[-0.6, 1.0]), None);
        assert_eq!(nearest_index(&[4, 4], &[1.0, 3.6]), None);
    }
}
