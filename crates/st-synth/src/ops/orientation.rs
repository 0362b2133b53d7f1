// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use nalgebra::DMatrix;

use crate::error::{invalid, SynthError, SynthResult};

/// Image axis carrying the left/right direction of a voxel-to-world matrix.
///
/// `aff` is the row-major `(n_dims + 1) x (n_dims + 1)` matrix. Inverting its
/// linear part gives world-to-voxel; the voxel axis that contributes most to
/// the first world axis (R/L) is the one to mirror.
pub fn left_right_axis(aff: &[Vec<f64>], n_dims: usize) -> SynthResult<usize> {
    if aff.len() != n_dims + 1 || aff.iter().any(|row| row.len() != n_dims + 1) {
        return Err(invalid(
            "aff",
            format!("expected a {0}x{0} orientation matrix", n_dims + 1),
        ));
    }
    let linear = DMatrix::from_fn(n_dims, n_dims, |r, c| aff[r][c]);
    let inverse = linear.try_inverse().ok_or(SynthError::SingularOrientation)?;
    let column = inverse.column(0);
    let (axis, _) = column
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |best, (idx, v)| {
            if v.abs() > best.1 {
                (idx, v.abs())
            } else {
                best
            }
        });
    Ok(axis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_orientation_flips_first_axis() {
        let aff = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(left_right_axis(&aff, 3).unwrap(), 0);
    }

    #[test]
    fn permuted_orientation_is_followed() {
        // voxel axis 2 maps to world x.
        let aff = vec![
            vec![0.0, 0.0, -1.0, 90.0],
            vec![1.0, 0.0, 0.0, -126.0],
            vec![0.0, 1.0, 0.0, 72.0],
            vec![0.0, 0.0, 0.0, 1.0],
        ];
        assert_eq!(left_right_axis(&aff, 3).unwrap(), 2);
    }

    #[test]
    fn singular_and_malformed_matrices_fail() {
        let singular = vec![vec![0.0; 3]; 3];
        assert!(matches!(
            left_right_axis(&singular, 2),
            Err(SynthError::SingularOrientation)
        ));
        assert!(left_right_axis(&singular, 3).is_err());
    }
}
