// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Ambient runtime settings: the global tracing subscriber and the seeds used
//! to make synthetic generation reproducible.

pub mod determinism;
pub mod tracing;
