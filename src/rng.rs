//! Seedable random source for reproducible matches.
//!
//! Every draw a match makes goes through one `SeededRandom`. The stream is
//! ChaCha8, so a seed replays identically across platforms and builds.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Clone, Debug)]
pub struct SeededRandom {
    seed: u64,
    rng: ChaCha8Rng,
}

impl SeededRandom {
    /// Seeded generator, or a fresh entropy seed when `seed` is `None`.
    /// The chosen seed is kept so an unseeded run can still be replayed.
    pub fn new(seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Uniform float in [0, 1).
    pub fn random(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform float in [a, b].
    pub fn uniform(&mut self, a: f64, b: f64) -> f64 {
        a + (b - a) * self.random()
    }

    /// Uniform integer in [a, b] inclusive.
    pub fn randint(&mut self, a: i64, b: i64) -> i64 {
        if a >= b {
            return a;
        }
        self.rng.gen_range(a..=b)
    }

    pub fn choice<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let i = self.rng.gen_range(0..items.len());
        items.get(i)
    }

    /// Draw `k` distinct items without replacement, in draw order.
    ///
    /// Partial Fisher-Yates over an index vector: position `i` is swapped
    /// with a uniform pick from `i..n`. `None` when `k > items.len()`.
    pub fn sample<T: Clone>(&mut self, items: &[T], k: usize) -> Option<Vec<T>> {
        let n = items.len();
        if k > n {
            return None;
        }
        let mut idx: Vec<usize> = (0..n).collect();
        for i in 0..k {
            let j = self.rng.gen_range(i..n);
            idx.swap(i, j);
        }
        Some(idx[..k].iter().map(|&i| items[i].clone()).collect())
    }

    /// One draw scaled by the total weight, located by bisecting the
    /// cumulative weights. Weights need not be normalised.
    pub fn weighted_choice<'a, T>(&mut self, items: &'a [T], weights: &[f64]) -> Option<&'a T> {
        if items.is_empty() || items.len() != weights.len() {
            return None;
        }
        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        for w in weights {
            total += w.max(0.0);
            cumulative.push(total);
        }
        if total <= 0.0 {
            return None;
        }
        let r = self.random() * total;
        let i = cumulative.partition_point(|&c| c <= r).min(items.len() - 1);
        items.get(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_determinism() {
        let mut r1 = SeededRandom::new(Some(42));
        let mut r2 = SeededRandom::new(Some(42));
        for _ in 0..100 {
            assert_eq!(r1.random(), r2.random());
        }
    }

    #[test]
    fn test_different_seeds() {
        let mut r1 = SeededRandom::new(Some(1));
        let mut r2 = SeededRandom::new(Some(2));
        let v1: Vec<f64> = (0..10).map(|_| r1.random()).collect();
        let v2: Vec<f64> = (0..10).map(|_| r2.random()).collect();
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_unseeded_records_seed() {
        let mut a = SeededRandom::new(None);
        let mut b = SeededRandom::new(Some(a.seed()));
        assert_eq!(a.random(), b.random());
    }

    #[test]
    fn test_random_range() {
        let mut rng = SeededRandom::new(Some(7));
        for _ in 0..1000 {
            let x = rng.random();
            assert!((0.0..1.0).contains(&x));
            let u = rng.uniform(5.0, 10.0);
            assert!((5.0..=10.0).contains(&u));
            let i = rng.randint(1, 3);
            assert!((1..=3).contains(&i));
        }
        assert_eq!(rng.randint(4, 4), 4);
    }

    #[test]
    fn test_sample_distinct_and_bounded() {
        let mut rng = SeededRandom::new(Some(9));
        let pool: Vec<i64> = (1..=10).collect();
        for k in 0..=10 {
            let picked = rng.sample(&pool, k).unwrap();
            assert_eq!(picked.len(), k);
            let uniq: HashSet<_> = picked.iter().collect();
            assert_eq!(uniq.len(), k);
        }
        assert!(rng.sample(&pool, 11).is_none());
    }

    #[test]
    fn test_choice_empty() {
        let mut rng = SeededRandom::new(Some(1));
        let empty: Vec<u8> = Vec::new();
        assert!(rng.choice(&empty).is_none());
    }

    #[test]
    fn test_weighted_choice_respects_zero_weight() {
        let mut rng = SeededRandom::new(Some(3));
        let items = ["a", "b", "c"];
        for _ in 0..500 {
            let pick = rng.weighted_choice(&items, &[0.5, 0.0, 0.5]).unwrap();
            assert_ne!(*pick, "b");
        }
        assert!(rng.weighted_choice(&items, &[0.0, 0.0, 0.0]).is_none());
        assert!(rng.weighted_choice(&items, &[1.0]).is_none());
    }

    #[test]
    fn test_weighted_choice_distribution() {
        let mut rng = SeededRandom::new(Some(11));
        let items = [0usize, 1];
        let mut counts = [0u32; 2];
        for _ in 0..10_000 {
            counts[*rng.weighted_choice(&items, &[0.8, 0.2]).unwrap()] += 1;
        }
        let share = counts[0] as f64 / 10_000.0;
        assert!(share > 0.75 && share < 0.85, "share {}", share);
    }
}
