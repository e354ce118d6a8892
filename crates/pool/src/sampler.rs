//! Weighted random index selection (Vose alias method)
//!
//! Construction is O(n); every draw is O(1) and allocation free: one uniform
//! column pick and one biased coin flip against that column's threshold.
//! The sampler knows nothing about node health. Callers zero out the weight
//! of unhealthy members and rebuild it.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

/// Alias table over `n` outcomes.
pub struct Sampler {
    probabilities: Vec<f64>,
    alias: Vec<usize>,
    rng: Mutex<StdRng>,
}

impl Sampler {
    /// Build the table for `probabilities` (expected to sum to 1, or be all zero).
    pub fn new(probabilities: &[f64], rng: StdRng) -> Self {
        let n = probabilities.len();
        let mut prob = vec![0.0; n];
        let mut alias = vec![0usize; n];

        let mut scaled: Vec<f64> = probabilities.iter().map(|p| p * n as f64).collect();
        let (mut small, mut large): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|&i| scaled[i] < 1.0);

        loop {
            let (Some(&l), Some(&g)) = (small.last(), large.last()) else {
                break;
            };
            small.pop();
            large.pop();

            prob[l] = scaled[l];
            alias[l] = g;
            scaled[g] = scaled[g] + scaled[l] - 1.0;

            if scaled[g] < 1.0 {
                small.push(g);
            } else {
                large.push(g);
            }
        }

        // Leftovers in `small` only happen through float rounding
        for i in large.into_iter().chain(small) {
            prob[i] = 1.0;
        }

        Self {
            probabilities: prob,
            alias,
            rng: Mutex::new(rng),
        }
    }

    /// Sampler with a deterministic draw sequence.
    pub fn with_seed(probabilities: &[f64], seed: u64) -> Self {
        Self::new(probabilities, StdRng::seed_from_u64(seed))
    }

    /// Sampler seeded from the thread RNG.
    pub fn from_entropy(probabilities: &[f64]) -> Self {
        Self::with_seed(probabilities, rand::rng().random::<u64>())
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    /// Draw an index. `None` only for an empty table.
    pub fn next(&self) -> Option<usize> {
        let n = self.probabilities.len();
        if n == 0 {
            return None;
        }

        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let column = rng.random_range(0..n);
        let coin = rng.random::<f64>();
        if coin < self.probabilities[column] {
            Some(column)
        } else {
            Some(self.alias[column])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frequencies(sampler: &Sampler, draws: usize) -> Vec<f64> {
        let mut counts = vec![0usize; sampler.len()];
        for _ in 0..draws {
            counts[sampler.next().unwrap()] += 1;
        }
        counts
            .into_iter()
            .map(|c| c as f64 / draws as f64)
            .collect()
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let weights = [0.5, 0.3, 0.15, 0.05];
        let sampler = Sampler::with_seed(&weights, 42);
        let observed = frequencies(&sampler, 200_000);
        for (want, got) in weights.iter().zip(&observed) {
            assert!((want - got).abs() < 0.01, "want {want}, got {got}");
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let weights = [0.2, 0.2, 0.6];
        let a = Sampler::with_seed(&weights, 7);
        let b = Sampler::with_seed(&weights, 7);
        let seq_a: Vec<_> = (0..100).map(|_| a.next()).collect();
        let seq_b: Vec<_> = (0..100).map(|_| b.next()).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn zero_weight_is_never_drawn() {
        let sampler = Sampler::with_seed(&[0.0, 1.0, 0.0], 3);
        for _ in 0..10_000 {
            assert_eq!(sampler.next(), Some(1));
        }
    }

    #[test]
    fn single_outcome() {
        let sampler = Sampler::with_seed(&[1.0], 1);
        assert_eq!(sampler.next(), Some(0));
    }

    #[test]
    fn all_zero_weights_still_draw_in_range() {
        let sampler = Sampler::with_seed(&[0.0, 0.0, 0.0], 5);
        for _ in 0..1_000 {
            assert!(sampler.next().unwrap() < 3);
        }
    }

    #[test]
    fn empty_table_draws_nothing() {
        let sampler = Sampler::from_entropy(&[]);
        assert!(sampler.is_empty());
        assert_eq!(sampler.next(), None);
    }
}
