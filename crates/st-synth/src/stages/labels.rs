// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::collections::HashSet;

use super::{expect_arity, expect_dtype, required};
use crate::error::SynthResult;
use crate::graph::Stage;
use crate::labels::LabelTable;
use crate::random::RandomSource;
use crate::value::{DType, TensorSpec, Value};

/// Voxel-wise label lookup, used both to reach the dense index space and to
/// return to raw label values.
pub struct RemapLabels {
    table: LabelTable,
}

impl RemapLabels {
    pub fn new(table: LabelTable) -> Self {
        Self { table }
    }
}

impl Stage for RemapLabels {
    fn name(&self) -> &'static str {
        "remap_labels"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        let mut out = labels.clone();
        for value in out.iter_mut() {
            *value = self.table.get(*value)?;
        }
        Ok(Value::I32(out))
    }
}

/// Sets the listed label values to background.
pub struct ResetLabels {
    values: HashSet<i32>,
}

impl ResetLabels {
    pub fn new(values: impl IntoIterator<Item = i32>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl Stage for ResetLabels {
    fn name(&self) -> &'static str {
        "reset_labels"
    }

    fn output_spec(&self, inputs: &[&TensorSpec]) -> SynthResult<TensorSpec> {
        expect_arity(self.name(), inputs, 1)?;
        expect_dtype(self.name(), inputs[0], DType::I32)?;
        Ok(inputs[0].clone())
    }

    fn forward(&self, inputs: &[Option<&Value>], _rng: &mut dyn RandomSource) -> SynthResult<Value> {
        let labels = required(self.name(), inputs, 0)?.as_i32("labels")?;
        Ok(Value::I32(labels.mapv(|label| {
            if self.values.contains(&label) {
                0
            } else {
                label
            }
        })))
    }
}
