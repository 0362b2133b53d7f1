// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Minimal static computation graph.
//!
//! Nodes are appended in dependency order by a [`GraphBuilder`], which asks
//! every [`Stage`] for the spec of its output while the graph is assembled.
//! Shape errors therefore surface at build time. The finished [`Graph`] is
//! immutable and can be executed any number of times, from any number of
//! threads, each execution drawing from its own [`RandomSource`].

use std::collections::BTreeMap;

use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use spiral_config::determinism::{derive_seed, rng_from_optional};
use tracing::{debug, debug_span};

use crate::error::{invalid, SynthError, SynthResult};
use crate::random::{RandomSource, RngSource};
use crate::value::{TensorSpec, Value};

/// Index of a node inside its graph.
pub type NodeId = usize;

/// Values fed to a graph execution, keyed by input name.
pub type Feeds = BTreeMap<String, Value>;

/// A tensor-producing operation.
pub trait Stage: Send + Sync {
    /// Short identifier used in logs and [`Graph::describe`].
    fn name(&self) -> &'static str;

    /// Validates the input specs and returns the spec of the produced tensor.
    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec>;

    /// Computes the output. Optional graph inputs that were not fed arrive as
    /// `None`.
    fn forward(&self, inputs: &[Option<&Value>], rng: &mut dyn RandomSource)
        -> SynthResult<Value>;
}

enum NodeKind {
    Input { required: bool },
    Stage(Box<dyn Stage>),
}

struct Node {
    label: String,
    kind: NodeKind,
    inputs: Vec<NodeId>,
    spec: TensorSpec,
}

/// Incrementally assembles a [`Graph`].
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    inputs: Vec<(String, NodeId)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a graph input.
    pub fn input(
        &mut self,
        name: impl Into<String>,
        spec: TensorSpec,
        required: bool,
    ) -> SynthResult<NodeId> {
        let name = name.into();
        if self.inputs.iter().any(|(existing, _)| *existing == name) {
            return Err(invalid("graph input", format!("`{name}` declared twice")));
        }
        let id = self.nodes.len();
        debug!(input = %name, shape = ?spec.shape, required, "declared graph input");
        self.nodes.push(Node {
            label: name.clone(),
            kind: NodeKind::Input { required },
            inputs: Vec::new(),
            spec,
        });
        self.inputs.push((name, id));
        Ok(id)
    }

    /// Appends a stage fed by `inputs`, labelled with the stage name.
    pub fn push<S: Stage + 'static>(&mut self, stage: S, inputs: &[NodeId]) -> SynthResult<NodeId> {
        let label = stage.name().to_string();
        self.push_named(label, stage, inputs)
    }

    /// Appends a stage under an explicit label.
    pub fn push_named<S: Stage + 'static>(
        &mut self,
        label: impl Into<String>,
        stage: S,
        inputs: &[NodeId],
    ) -> SynthResult<NodeId> {
        let label = label.into();
        let mut specs = Vec::with_capacity(inputs.len());
        for &id in inputs {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| invalid("node id", format!("{id} does not exist yet")))?;
            specs.push(&node.spec);
        }
        let spec = stage.output_spec(&specs)?;
        debug!(stage = %label, shape = ?spec.shape, dtype = ?spec.dtype, "appended stage");
        let id = self.nodes.len();
        self.nodes.push(Node {
            label,
            kind: NodeKind::Stage(Box::new(stage)),
            inputs: inputs.to_vec(),
            spec,
        });
        Ok(id)
    }

    pub fn spec(&self, id: NodeId) -> Option<&TensorSpec> {
        self.nodes.get(id).map(|node| &node.spec)
    }

    /// Seals the graph, exposing the given nodes as named outputs.
    pub fn finish(self, outputs: Vec<(String, NodeId)>) -> SynthResult<Graph> {
        if let Some((name, id)) = outputs.iter().find(|(_, id)| *id >= self.nodes.len()) {
            return Err(invalid(
                "graph output",
                format!("`{name}` refers to missing node {id}"),
            ));
        }
        Ok(Graph {
            nodes: self.nodes,
            inputs: self.inputs,
            outputs,
        })
    }
}

/// Executable, immutable generation graph.
pub struct Graph {
    nodes: Vec<Node>,
    inputs: Vec<(String, NodeId)>,
    outputs: Vec<(String, NodeId)>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("inputs", &self.input_names())
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl Graph {
    /// Names of the declared inputs, in declaration order.
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn input_spec(&self, name: &str) -> Option<&TensorSpec> {
        self.find(&self.inputs, name)
    }

    pub fn output_spec(&self, name: &str) -> Option<&TensorSpec> {
        self.find(&self.outputs, name)
    }

    /// Stage labels in execution order, inputs excluded.
    pub fn describe(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|node| matches!(node.kind, NodeKind::Stage(_)))
            .map(|node| node.label.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn find<'a>(&'a self, table: &[(String, NodeId)], name: &str) -> Option<&'a TensorSpec> {
        table
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, id)| &self.nodes[*id].spec)
    }

    /// Executes the graph once.
    pub fn run(&self, feeds: &Feeds, rng: &mut dyn RandomSource) -> SynthResult<GraphOutputs> {
        for name in feeds.keys() {
            if !self.inputs.iter().any(|(declared, _)| declared == name) {
                return Err(SynthError::UnknownInput { name: name.clone() });
            }
        }

        let mut values: Vec<Option<Value>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            let value = match &node.kind {
                NodeKind::Input { required } => match feeds.get(&node.label) {
                    Some(value) => {
                        node.spec.check(&node.label, &value.spec())?;
                        Some(value.clone())
                    }
                    None if *required => {
                        return Err(SynthError::MissingInput {
                            name: node.label.clone(),
                        })
                    }
                    None => None,
                },
                NodeKind::Stage(stage) => {
                    let _span = debug_span!("stage", name = %node.label).entered();
                    let args: Vec<Option<&Value>> =
                        node.inputs.iter().map(|&id| values[id].as_ref()).collect();
                    let value = stage.forward(&args, rng)?;
                    node.spec.check(&node.label, &value.spec())?;
                    Some(value)
                }
            };
            values.push(value);
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for (name, id) in &self.outputs {
            let value = values[*id]
                .clone()
                .ok_or_else(|| SynthError::MissingInput { name: name.clone() })?;
            outputs.push((name.clone(), value));
        }
        Ok(GraphOutputs { values: outputs })
    }

    /// Executes the graph once with a generator seeded from `seed`.
    pub fn run_seeded(&self, feeds: &Feeds, seed: u64) -> SynthResult<GraphOutputs> {
        let mut source = RngSource::new(StdRng::seed_from_u64(seed));
        self.run(feeds, &mut source)
    }

    /// Executes the graph once. Without an explicit seed the process-wide
    /// determinism settings (`SPIRAL_DETERMINISTIC*`) decide between a
    /// reproducible stream and OS entropy.
    pub fn run_with_seed(&self, feeds: &Feeds, seed: Option<u64>) -> SynthResult<GraphOutputs> {
        let mut source = RngSource::new(rng_from_optional(seed, "st-synth.graph"));
        self.run(feeds, &mut source)
    }

    /// Executes independent invocations in parallel. Invocation `i` draws from
    /// a stream derived from `(seed, i)`, so results do not depend on how the
    /// work is scheduled.
    pub fn run_batch(&self, batch: &[Feeds], seed: u64) -> SynthResult<Vec<GraphOutputs>> {
        batch
            .par_iter()
            .enumerate()
            .map(|(index, feeds)| self.run_seeded(feeds, derive_seed(seed, index)))
            .collect()
    }
}

/// Named values returned by [`Graph::run`].
#[derive(Clone, Debug, PartialEq)]
pub struct GraphOutputs {
    values: Vec<(String, Value)>,
}

impl GraphOutputs {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, value)| value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self.values.iter().position(|(candidate, _)| candidate == name)?;
        Some(self.values.remove(position).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::DType;
    use ndarray::ArrayD;

    struct AddOne;

    impl Stage for AddOne {
        fn name(&self) -> &'static str {
            "add_one"
        }

        fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
            Ok(inputs[0].clone())
        }

        fn forward(
            &self,
            inputs: &[Option<&Value>],
            _rng: &mut dyn RandomSource,
        ) -> SynthResult<Value> {
            let input = inputs[0].ok_or_else(|| SynthError::MissingInput {
                name: "x".to_string(),
            })?;
            Ok(Value::F32(input.as_f32("x")?.mapv(|v| v + 1.0)))
        }
    }

    fn chain() -> Graph {
        let mut builder = GraphBuilder::new();
        let x = builder.input("x", TensorSpec::f32(vec![2, 1]), true).unwrap();
        let a = builder.push(AddOne, &[x]).unwrap();
        let b = builder.push_named("again", AddOne, &[a]).unwrap();
        builder.finish(vec![("y".to_string(), b)]).unwrap()
    }

    fn feeds(shape: &[usize]) -> Feeds {
        let mut feeds = Feeds::new();
        feeds.insert(
            "x".to_string(),
            Value::F32(ArrayD::zeros(ndarray::IxDyn(shape))),
        );
        feeds
    }

    #[test]
    fn executes_in_insertion_order() {
        let graph = chain();
        assert_eq!(graph.describe(), vec!["add_one", "again"]);
        let outputs = graph.run_seeded(&feeds(&[2, 1]), 0).unwrap();
        let y = outputs.get("y").unwrap().as_f32("y").unwrap();
        assert!(y.iter().all(|&v| v == 2.0));
    }

    #[test]
    fn feed_shapes_are_checked() {
        let graph = chain();
        let err = graph.run_seeded(&feeds(&[3, 1]), 0).unwrap_err();
        assert!(matches!(err, SynthError::ShapeMismatch { .. }));
        let mut wrong_type = Feeds::new();
        wrong_type.insert("x".to_string(), Value::I32(ArrayD::zeros(ndarray::IxDyn(&[2, 1]))));
        assert!(matches!(
            graph.run_seeded(&wrong_type, 0).unwrap_err(),
            SynthError::DTypeMismatch {
                expected: DType::F32,
                ..
            }
        ));
    }

    #[test]
    fn missing_and_unknown_inputs_are_rejected() {
        let graph = chain();
        assert!(matches!(
            graph.run_seeded(&Feeds::new(), 0).unwrap_err(),
            SynthError::MissingInput { .. }
        ));
        let mut extra = feeds(&[2, 1]);
        extra.insert("z".to_string(), Value::F32(ArrayD::zeros(ndarray::IxDyn(&[1]))));
        assert!(matches!(
            graph.run_seeded(&extra, 0).unwrap_err(),
            SynthError::UnknownInput { .. }
        ));
    }

    #[test]
    fn duplicate_inputs_fail_at_build_time() {
        let mut builder = GraphBuilder::new();
        builder.input("x", TensorSpec::f32(vec![1]), true).unwrap();
        assert!(builder.input("x", TensorSpec::f32(vec![1]), true).is_err());
    }
}
