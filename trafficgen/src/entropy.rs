//! Random decisions made during a generation run.
//!
//! Every random choice the generator makes, from the coin flip deciding
//! whether a user authenticates to the value a `@variable` resolves to, goes
//! through [`Entropy`]. Production code uses [`StdRng`], tests substitute
//! scripted sources.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

/// A source of random decisions.
pub trait Entropy {
    /// A uniform index in `0..len`. `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize;
    /// A uniform integer in the inclusive range `lo..=hi`. `lo` must not
    /// exceed `hi`.
    fn integer(&mut self, lo: i64, hi: i64) -> i64;
    /// A fair coin flip.
    fn coin(&mut self) -> bool;
    /// A uniform duration in the inclusive range `lo..=hi`, millisecond
    /// granularity.
    fn duration(&mut self, lo: Duration, hi: Duration) -> Duration;
}

impl Entropy for StdRng {
    fn index(&mut self, len: usize) -> usize {
        self.random_range(0..len)
    }

    fn integer(&mut self, lo: i64, hi: i64) -> i64 {
        self.random_range(lo..=hi)
    }

    fn coin(&mut self) -> bool {
        self.random_bool(0.5)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn duration(&mut self, lo: Duration, hi: Duration) -> Duration {
        let lo = lo.as_millis() as u64;
        let hi = hi.as_millis() as u64;
        Duration::from_millis(self.random_range(lo..=hi.max(lo)))
    }
}

/// Choose one member of `items` uniformly, `None` if `items` is empty.
pub fn choose<'a, T, E>(entropy: &mut E, items: &'a [T]) -> Option<&'a T>
where
    E: Entropy + ?Sized,
{
    if items.is_empty() {
        return None;
    }
    items.get(entropy.index(items.len()))
}

/// Build the root random source of a run.
///
/// A configured seed makes the run reproducible, otherwise the thread RNG
/// seeds it.
#[must_use]
pub fn seeded(seed: Option<[u8; 32]>) -> StdRng {
    match seed {
        Some(seed) => StdRng::from_seed(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Derive an independent random source from `parent`.
pub fn fork(parent: &mut StdRng) -> StdRng {
    StdRng::from_rng(parent)
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::{Entropy, choose, seeded};

    #[test]
    fn same_seed_same_decisions() {
        let mut left = seeded(Some([7; 32]));
        let mut right = seeded(Some([7; 32]));
        for _ in 0..64 {
            assert_eq!(left.integer(-50, 50), right.integer(-50, 50));
        }
    }

    #[test]
    fn choose_empty_is_none() {
        let mut rng = seeded(Some([1; 32]));
        let empty: [u8; 0] = [];
        assert!(choose(&mut rng, &empty).is_none());
    }

    proptest! {
        #[test]
        fn integer_stays_in_bounds(seed: [u8; 32], lo in -1_000i64..1_000, width in 0i64..1_000) {
            let mut rng = seeded(Some(seed));
            let hi = lo + width;
            let value = rng.integer(lo, hi);
            prop_assert!(lo <= value && value <= hi);
        }

        #[test]
        fn duration_stays_in_bounds(seed: [u8; 32]) {
            let mut rng = seeded(Some(seed));
            let lo = Duration::from_millis(100);
            let hi = Duration::from_millis(1_000);
            let value = rng.duration(lo, hi);
            prop_assert!(lo <= value && value <= hi);
        }
    }
}
