// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::{ArrayD, Axis};

/// Normalised 1-D Gaussian of half-width `ceil(2.5 * sigma)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let sigma = sigma.max(1e-3);
    let radius = (2.5 * sigma).ceil() as i64;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f32 / sigma).powi(2)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= total);
    kernel
}

/// Centred convolution along `axis` with zero padding.
pub fn convolve_axis(x: &ArrayD<f32>, axis: usize, kernel: &[f32]) -> ArrayD<f32> {
    let radius = (kernel.len() / 2) as isize;
    let len = x.shape()[axis] as isize;
    let mut out = ArrayD::zeros(x.raw_dim());
    for (src, mut dst) in x.lanes(Axis(axis)).into_iter().zip(out.lanes_mut(Axis(axis))) {
        for i in 0..len {
            let mut acc = 0.0f32;
            for (k, &w) in kernel.iter().enumerate() {
                let j = i + k as isize - radius;
                if j < 0 || j >= len {
                    continue;
                }
                acc += w * src[j as usize];
            }
            dst[i as usize] = acc;
        }
    }
    out
}

/// Applies one kernel per spatial axis. `kernels[axis]` of `None` leaves that
/// axis untouched.
pub fn blur_separable(x: &ArrayD<f32>, kernels: &[Option<Vec<f32>>]) -> ArrayD<f32> {
    let mut out = x.clone();
    for (axis, kernel) in kernels.iter().enumerate() {
        if let Some(kernel) = kernel {
            out = convolve_axis(&out, axis, kernel);
        }
    }
    out
}
