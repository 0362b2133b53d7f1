// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Anatomical label descriptors and the dense index lookups derived from them.

use std::collections::{HashMap, HashSet};

use crate::error::{invalid, SynthError, SynthResult};

/// Ordered label set driving generation.
///
/// `generation_labels` lists the background first, then the non-sided
/// structures, then one hemisphere, then the contralateral hemisphere in the
/// same order. The position of a label in that list is its dense index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSpec {
    generation_labels: Vec<i32>,
    output_labels: Vec<i32>,
    n_neutral_labels: usize,
}

impl LabelSpec {
    pub fn new(
        generation_labels: Vec<i32>,
        output_labels: Vec<i32>,
        n_neutral_labels: usize,
    ) -> SynthResult<Self> {
        if generation_labels.is_empty() {
            return Err(invalid("generation_labels", "must not be empty"));
        }
        let mut seen = HashSet::with_capacity(generation_labels.len());
        for &label in &generation_labels {
            if !seen.insert(label) {
                return Err(SynthError::DuplicateLabel { label });
            }
        }
        for &label in &output_labels {
            if !seen.contains(&label) {
                return Err(SynthError::OutputLabelNotGenerated { label });
            }
        }
        if n_neutral_labels > generation_labels.len() {
            return Err(invalid(
                "n_neutral_labels",
                format!(
                    "{n_neutral_labels} exceeds the {} generation labels",
                    generation_labels.len()
                ),
            ));
        }
        Ok(Self {
            generation_labels,
            output_labels,
            n_neutral_labels,
        })
    }

    pub fn generation_labels(&self) -> &[i32] {
        &self.generation_labels
    }

    pub fn output_labels(&self) -> &[i32] {
        &self.output_labels
    }

    pub fn n_neutral_labels(&self) -> usize {
        self.n_neutral_labels
    }

    /// Number of generation labels, i.e. the size of the dense index space.
    pub fn len(&self) -> usize {
        self.generation_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generation_labels.is_empty()
    }

    /// Raw value → dense index.
    pub fn forward_table(&self) -> LabelTable {
        LabelTable::new(
            self.generation_labels
                .iter()
                .enumerate()
                .map(|(idx, &label)| (label, idx as i32)),
        )
    }

    /// Dense index → raw value.
    pub fn inverse_table(&self) -> LabelTable {
        LabelTable::new(
            self.generation_labels
                .iter()
                .enumerate()
                .map(|(idx, &label)| (idx as i32, label)),
        )
    }

    /// Generation labels that must be zeroed in the emitted label map.
    pub fn labels_to_reset(&self) -> Vec<i32> {
        let keep: HashSet<i32> = self.output_labels.iter().copied().collect();
        self.generation_labels
            .iter()
            .copied()
            .filter(|label| !keep.contains(label))
            .collect()
    }

    /// Dense-index permutation exchanging each sided label with its
    /// contralateral counterpart. Neutral indices map to themselves.
    pub fn contralateral_swap(&self) -> SynthResult<Vec<i32>> {
        let total = self.generation_labels.len();
        let neutral = self.n_neutral_labels;
        let sided = total - neutral;
        if sided % 2 != 0 {
            return Err(SynthError::UnevenSidedLabels { neutral, sided });
        }
        let half = sided / 2;
        let mut swap: Vec<i32> = (0..total as i32).collect();
        for offset in 0..half {
            let left = neutral + offset;
            let right = neutral + half + offset;
            swap[left] = right as i32;
            swap[right] = left as i32;
        }
        Ok(swap)
    }
}

/// Value-to-value lookup applied voxel-wise. Values outside the table are
/// rejected at execution time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    map: HashMap<i32, i32>,
}

impl LabelTable {
    pub fn new(entries: impl IntoIterator<Item = (i32, i32)>) -> Self {
        Self {
            map: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, value: i32) -> SynthResult<i32> {
        self.map
            .get(&value)
            .copied()
            .ok_or(SynthError::UnknownLabel { value })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LabelSpec {
        LabelSpec::new(vec![0, 24, 2, 3, 41, 42], vec![0, 2, 41], 2).unwrap()
    }

    #[test]
    fn tables_are_mutual_inverses() {
        let spec = spec();
        let forward = spec.forward_table();
        let inverse = spec.inverse_table();
        for &label in spec.generation_labels() {
            let dense = forward.get(label).unwrap();
            assert_eq!(inverse.get(dense).unwrap(), label);
        }
        assert_eq!(forward.get(24).unwrap(), 1);
        assert!(matches!(
            forward.get(7),
            Err(SynthError::UnknownLabel { value: 7 })
        ));
    }

    #[test]
    fn reset_list_is_complement_of_output_labels() {
        assert_eq!(spec().labels_to_reset(), vec![24, 3, 42]);
    }

    #[test]
    fn swap_exchanges_matching_hemispheres() {
        let swap = spec().contralateral_swap().unwrap();
        assert_eq!(swap, vec![0, 1, 4, 5, 2, 3]);
    }

    #[test]
    fn odd_sided_block_is_rejected() {
        let spec = LabelSpec::new(vec![0, 2, 3, 41], vec![0], 1).unwrap();
        assert!(matches!(
            spec.contralateral_swap(),
            Err(SynthError::UnevenSidedLabels { neutral: 1, sided: 3 })
        ));
    }

    #[test]
    fn output_labels_must_be_generated() {
        let err = LabelSpec::new(vec![0, 2], vec![0, 5], 2).unwrap_err();
        assert!(matches!(err, SynthError::OutputLabelNotGenerated { label: 5 }));
        let err = LabelSpec::new(vec![0, 2, 2], vec![0], 3).unwrap_err();
        assert!(matches!(err, SynthError::DuplicateLabel { label: 2 }));
    }
}
