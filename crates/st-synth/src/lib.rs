// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Label-conditioned synthetic image generation.
//!
//! `st-synth` turns discrete anatomical label maps into `(image, labels)`
//! training pairs. A [`GenerationGraph`] is planned and assembled once from a
//! [`LabelSpec`], a [`ResolutionSpec`] and [`GenerationOptions`], then executed
//! any number of times with fresh Gaussian mixture parameters, deformation
//! matrices and random draws.
//!
//! ```no_run
//! use st_synth::{build_generation_graph, GenerationOptions, LabelSpec, ResolutionSpec};
//!
//! let labels = LabelSpec::new(vec![0, 2, 41], vec![0, 2, 41], 1)?;
//! let resolution = ResolutionSpec::isotropic(vec![1.0, 1.0, 1.0], 1)?;
//! let options = GenerationOptions::minimal();
//! let generator = build_generation_graph(&[32, 32, 32], &labels, &resolution, &options)?;
//! println!("{:?}", generator.graph().describe());
//! # Ok::<(), st_synth::SynthError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod graph;
pub mod labels;
pub mod ops;
pub mod random;
pub mod resolution;
pub mod shapes;
pub mod stages;
pub mod telemetry;
pub mod value;

pub use builder::{build_generation_graph, GenerationGraph, GenerationOptions};
pub use config::{GeneratorConfig, PerAxis, PerChannel};
pub use error::{SynthError, SynthResult};
pub use graph::{Feeds, Graph, GraphBuilder, GraphOutputs, NodeId, Stage};
pub use labels::{LabelSpec, LabelTable};
pub use random::{RandomSource, RngSource};
pub use resolution::ResolutionSpec;
pub use shapes::{plan_shapes, ShapePlan};
pub use telemetry::init_tracing;
pub use value::{DType, TensorSpec, Value};
