// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-invocation random draws, injected into every stage that needs them.

use rand::Rng;
use rand_distr::StandardNormal;

/// Source of the random decisions taken while executing a graph.
///
/// Stages never own a generator; the caller passes one per invocation so that
/// tests can script the draws and batches can be seeded independently.
pub trait RandomSource {
    /// Uniform sample in `[low, high)`. Returns `low` when the range is empty.
    fn uniform(&mut self, low: f32, high: f32) -> f32;

    /// Standard normal sample scaled by `std` and shifted by `mean`.
    fn normal(&mut self, mean: f32, std: f32) -> f32;

    /// Uniform integer in `0..=upper`.
    fn index(&mut self, upper: usize) -> usize;

    /// `true` with probability `p`.
    fn bernoulli(&mut self, p: f32) -> bool {
        self.uniform(0.0, 1.0) < p
    }
}

/// Adapts any `rand` generator to [`RandomSource`].
#[derive(Clone, Debug)]
pub struct RngSource<R> {
    rng: R,
}

impl<R: Rng> RngSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    pub fn into_inner(self) -> R {
        self.rng
    }
}

impl<R: Rng> RandomSource for RngSource<R> {
    fn uniform(&mut self, low: f32, high: f32) -> f32 {
        if high > low {
            self.rng.gen_range(low..high)
        } else {
            low
        }
    }

    fn normal(&mut self, mean: f32, std: f32) -> f32 {
        let z: f32 = self.rng.sample(StandardNormal);
        mean + std * z
    }

    fn index(&mut self, upper: usize) -> usize {
        self.rng.gen_range(0..=upper)
    }

    fn bernoulli(&mut self, p: f32) -> bool {
        self.rng.gen::<f32>() < p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn uniform_respects_bounds() {
        let mut source = RngSource::new(StdRng::seed_from_u64(3));
        for _ in 0..256 {
            let value = source.uniform(0.5, 2.0);
            assert!((0.5..2.0).contains(&value));
        }
        assert_eq!(source.uniform(1.0, 1.0), 1.0);
    }

    #[test]
    fn index_is_inclusive() {
        let mut source = RngSource::new(StdRng::seed_from_u64(5));
        let mut seen = [false; 3];
        for _ in 0..256 {
            seen[source.index(2)] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
        assert_eq!(source.index(0), 0);
    }

    #[test]
    fn bernoulli_extremes() {
        let mut source = RngSource::new(StdRng::seed_from_u64(9));
        assert!((0..64).all(|_| !source.bernoulli(0.0)));
        assert!((0..64).all(|_| source.bernoulli(1.0)));
    }
}
