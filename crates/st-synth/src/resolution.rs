// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Resolutions of the atlas, the generated output and the simulated
//! acquisitions.

use crate::error::{ensure_rank, invalid, SynthResult};

/// Per-channel resolution descriptor. All vectors are expressed in the same
/// physical unit (usually millimetres) and have one entry per spatial axis.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolutionSpec {
    atlas_res: Vec<f64>,
    target_res: Vec<f64>,
    data_res: Vec<Vec<f64>>,
    thickness: Option<Vec<Vec<f64>>>,
}

impl ResolutionSpec {
    /// Builds a spec where every channel is acquired at the atlas resolution
    /// and the output is generated at the atlas resolution.
    pub fn isotropic(atlas_res: Vec<f64>, n_channels: usize) -> SynthResult<Self> {
        let target = atlas_res.clone();
        let data = vec![atlas_res.clone(); n_channels];
        Self::new(atlas_res, target, data, None)
    }

    pub fn new(
        atlas_res: Vec<f64>,
        target_res: Vec<f64>,
        data_res: Vec<Vec<f64>>,
        thickness: Option<Vec<Vec<f64>>>,
    ) -> SynthResult<Self> {
        let n_dims = atlas_res.len();
        if n_dims == 0 {
            return Err(invalid("atlas_res", "must name at least one axis"));
        }
        check_positive("atlas_res", &atlas_res)?;
        ensure_rank("target_res", n_dims, target_res.len())?;
        check_positive("target_res", &target_res)?;
        if data_res.is_empty() {
            return Err(invalid("data_res", "needs one row per channel"));
        }
        for row in &data_res {
            ensure_rank("data_res", n_dims, row.len())?;
            check_positive("data_res", row)?;
        }
        if let Some(rows) = &thickness {
            if rows.len() != data_res.len() {
                return Err(invalid(
                    "thickness",
                    format!("has {} rows for {} channels", rows.len(), data_res.len()),
                ));
            }
            for row in rows {
                ensure_rank("thickness", n_dims, row.len())?;
                check_positive("thickness", row)?;
            }
        }
        Ok(Self {
            atlas_res,
            target_res,
            data_res,
            thickness,
        })
    }

    pub fn n_dims(&self) -> usize {
        self.atlas_res.len()
    }

    pub fn n_channels(&self) -> usize {
        self.data_res.len()
    }

    pub fn atlas_res(&self) -> &[f64] {
        &self.atlas_res
    }

    pub fn target_res(&self) -> &[f64] {
        &self.target_res
    }

    pub fn data_res(&self, channel: usize) -> &[f64] {
        &self.data_res[channel]
    }

    pub fn thickness(&self, channel: usize) -> Option<&[f64]> {
        self.thickness.as_ref().map(|rows| rows[channel].as_slice())
    }

    /// Standard deviation (in atlas voxels) of the Gaussian that mimics the
    /// point spread of an acquisition at the channel's resolution.
    pub fn blur_sigma(&self, channel: usize) -> Vec<f32> {
        let data = self.data_res(channel);
        let thickness = self.thickness(channel);
        self.atlas_res
            .iter()
            .enumerate()
            .map(|(axis, &atlas)| {
                let mut res = data[axis];
                if let Some(thick) = thickness {
                    res = res.min(thick[axis]);
                }
                let sigma = if res != atlas { 0.75 * res / atlas } else { 0.5 };
                sigma as f32
            })
            .collect()
    }

    /// Shape of a volume at `shape` once subsampled to the channel's
    /// acquisition resolution, or `None` when that would be a no-op.
    ///
    /// Each axis becomes `len * atlas / data` truncated towards zero, kept at
    /// one voxel or more. Unlike the planner there is no round-half-to-even:
    /// `7` voxels at half resolution acquire `3`, not `4`.
    pub fn acquisition_shape(&self, channel: usize, shape: &[usize]) -> Option<Vec<usize>> {
        let data = self.data_res(channel);
        if data == self.atlas_res.as_slice() {
            return None;
        }
        let acquired: Vec<usize> = shape
            .iter()
            .zip(self.atlas_res.iter().zip(data.iter()))
            .map(|(&len, (&atlas, &res))| ((len as f64 * atlas / res) as usize).max(1))
            .collect();
        if acquired == shape {
            None
        } else {
            Some(acquired)
        }
    }
}

fn check_positive(label: &'static str, values: &[f64]) -> SynthResult<()> {
    match values.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        Some(bad) => Err(invalid(label, format!("{bad} is not a positive resolution"))),
        None => Ok(()),
    }
}
