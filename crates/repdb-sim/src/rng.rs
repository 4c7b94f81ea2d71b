//! Deterministic random number generation for workload simulation.
//!
//! Given the same seed, [`SimRng`] produces the same sequence of values, so
//! a failing workload can be replayed from its seed alone.
//!
//! # Example
//!
//! ```
//! use repdb_sim::SimRng;
//!
//! let mut rng = SimRng::new(42);
//! let a = rng.next_u64();
//!
//! let mut again = SimRng::new(42);
//! assert_eq!(again.next_u64(), a);
//! ```

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Seeded random number generator.
#[derive(Debug, Clone)]
pub struct SimRng {
    inner: SmallRng,
    seed: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: SmallRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Returns the seed used to create this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // `gen` is a reserved keyword in Rust 2024
        self.inner.r#gen()
    }

    /// Generates a random `f64` in `[0.0, 1.0)`.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        self.inner.r#gen()
    }

    /// Returns true with the given probability.
    #[inline]
    pub fn next_bool_with_probability(&mut self, probability: f64) -> bool {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be 0.0 to 1.0"
        );
        self.next_f64() < probability
    }

    /// Generates a random `usize` in `[0, max)`.
    ///
    /// # Panics
    ///
    /// Panics if `max` is 0.
    #[inline]
    pub fn next_usize(&mut self, max: usize) -> usize {
        debug_assert!(max > 0, "max must be > 0");
        self.inner.gen_range(0..max)
    }

    /// Generates a random `u32` in `[min, max]`.
    #[inline]
    pub fn next_u32_inclusive(&mut self, min: u32, max: u32) -> u32 {
        debug_assert!(min <= max, "min must be <= max");
        self.inner.gen_range(min..=max)
    }

    /// Generates a random `i64` in `[min, max)`.
    #[inline]
    pub fn next_i64_range(&mut self, min: i64, max: i64) -> i64 {
        debug_assert!(min < max, "min must be < max");
        self.inner.gen_range(min..max)
    }

    /// Selects a random element from a slice.
    ///
    /// # Panics
    ///
    /// Panics if the slice is empty.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        debug_assert!(!items.is_empty(), "cannot choose from empty slice");
        let idx = self.next_usize(items.len());
        &items[idx]
    }
}
