// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reference CPU kernels used by the generation stages.
//!
//! Every array handled here carries a trailing channel axis: labels are
//! `spatial + [1]`, images are `spatial + [channels]`. Kernels preserve the
//! shapes the stages declare for them.

pub mod filter;
pub mod intensity;
pub mod orientation;
pub mod spatial;
pub mod warp;
