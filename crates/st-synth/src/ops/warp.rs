// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Geometric deformation of label maps.
//!
//! Output voxel `x` samples the input at `A · (x + d(x) - c) + t + c`, where
//! `d` is the integrated displacement, `c` the volume centre and `(A, t)` the
//! linear part and translation of the affine matrix.

use ndarray::{ArrayD, IxDyn};

use super::spatial::{interpolate_linear, nearest_index, spatial_indices};

/// Integrates a stationary velocity field (`spatial + [n_dims]`, in voxels)
/// into a displacement field by scaling and squaring.
pub fn integrate_velocity(velocity: &ArrayD<f32>, steps: u32) -> ArrayD<f32> {
    let scale = 0.5f32.powi(i32::try_from(steps).unwrap_or(i32::MAX));
    let mut disp = velocity.mapv(|v| v * scale);
    let n = velocity.ndim() - 1;
    let spatial = velocity.shape()[..n].to_vec();
    let mut sample = vec![0.0f32; n];
    let mut coord = vec![0.0f64; n];
    for _ in 0..steps {
        let mut next = disp.clone();
        for x in spatial_indices(&spatial) {
            let mut index = x.clone();
            index.push(0);
            for axis in 0..n {
                index[n] = axis;
                coord[axis] = x[axis] as f64 + disp[IxDyn(&index)] as f64;
            }
            interpolate_linear(&disp, &coord, &mut sample);
            for axis in 0..n {
                index[n] = axis;
                next[IxDyn(&index)] += sample[axis];
            }
        }
        disp = next;
    }
    disp
}

/// Resamples a label map through the affine and/or displacement field using
/// nearest-neighbour lookup. Points falling outside the volume read as `0`.
pub fn warp_labels(
    labels: &ArrayD<i32>,
    affine: Option<&ArrayD<f32>>,
    displacement: Option<&ArrayD<f32>>,
) -> ArrayD<i32> {
    let n = labels.ndim() - 1;
    let spatial = labels.shape()[..n].to_vec();
    let centre: Vec<f64> = spatial.iter().map(|&len| (len as f64 - 1.0) / 2.0).collect();
    let mut out = ArrayD::zeros(labels.raw_dim());
    let mut moved = vec![0.0f64; n];
    let mut source = vec![0.0f64; n];
    for x in spatial_indices(&spatial) {
        let mut index = x.clone();
        index.push(0);
        for axis in 0..n {
            moved[axis] = x[axis] as f64;
            if let Some(field) = displacement {
                index[n] = axis;
                moved[axis] += field[IxDyn(&index)] as f64;
            }
        }
        match affine {
            Some(matrix) => {
                for row in 0..n {
                    let mut acc = matrix[[row, n]] as f64 + centre[row];
                    for col in 0..n {
                        acc += matrix[[row, col]] as f64 * (moved[col] - centre[col]);
                    }
                    source[row] = acc;
                }
            }
            None => source.copy_from_slice(&moved),
        }
        if let Some(mut src) = nearest_index(&spatial, &source) {
            src.push(0);
            index[n] = 0;
            out[IxDyn(&index)] = labels[IxDyn(&src)];
        }
    }
    out
}
