//! Randomness abstraction for the cleanup coin-flip.

use std::sync::Arc;

use rand::Rng;

/// Uniform `[0, 1)` sampler.
///
/// Quality only needs to support a fair Bernoulli trial at small
/// probabilities; implementations must be usable from concurrent tasks.
pub trait RandomSource: Send + Sync {
    /// Next sample in `[0, 1)`.
    fn next_unit(&self) -> f64;
}

impl<R: RandomSource + ?Sized> RandomSource for Arc<R> {
    fn next_unit(&self) -> f64 {
        (**self).next_unit()
    }
}

/// Thread-local RNG backed sampler.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Sampler that always returns the same value; for tests.
///
/// `FixedRandom(0.0)` makes every probabilistic cleanup fire,
/// `FixedRandom(1.0 - f64::EPSILON)` suppresses it.
#[derive(Clone, Copy, Debug)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn next_unit(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_random_stays_in_unit_range() {
        let random = ThreadRandom;
        for _ in 0..1_000 {
            let sample = random.next_unit();
            assert!((0.0..1.0).contains(&sample));
        }
    }

    #[test]
    fn fixed_random_is_constant() {
        let random = FixedRandom(0.25);
        assert_eq!(random.next_unit(), 0.25);
        assert_eq!(random.next_unit(), 0.25);
    }
}
