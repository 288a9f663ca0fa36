//! Choosing one of several configured DSNs.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use sqldao_core::{Error, Result};

/// Picks the candidate a connection binds to.
///
/// A single candidate is always chosen. Among several, one that already has
/// a live session wins; otherwise the pick is uniform over all of them.
pub struct Selector {
    rng: Box<dyn RngCore + Send>,
}

impl Selector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Use a caller-supplied randomness source, e.g. a seeded `StdRng`.
    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self { rng: Box::new(rng) }
    }

    /// `ready[i]` tells whether candidate `i` is already connected.
    pub fn pick(&mut self, ready: &[bool]) -> Result<usize> {
        match ready.len() {
            0 => Err(Error::connection_empty()),
            1 => Ok(0),
            n => Ok(ready
                .iter()
                .position(|&is_ready| is_ready)
                .unwrap_or_else(|| self.rng.gen_range(0..n))),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqldao_core::ErrorKind;

    #[test]
    fn test_empty_is_connection_empty() {
        let err = Selector::new().pick(&[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionEmpty);
        assert_eq!(err.message(), "connection-is-empty");
    }

    #[test]
    fn test_single_candidate() {
        let mut selector = Selector::new();
        assert_eq!(selector.pick(&[false]).unwrap(), 0);
        assert_eq!(selector.pick(&[true]).unwrap(), 0);
    }

    #[test]
    fn test_ready_candidate_preferred() {
        let mut selector = Selector::with_rng(StdRng::seed_from_u64(1));
        for _ in 0..20 {
            assert_eq!(selector.pick(&[false, false, true, true]).unwrap(), 2);
        }
    }

    #[test]
    fn test_seeded_pick_is_deterministic() {
        let picks = |seed| {
            let mut selector = Selector::with_rng(StdRng::seed_from_u64(seed));
            (0..16)
                .map(|_| selector.pick(&[false; 3]).unwrap())
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
        assert!(picks(42).iter().all(|&i| i < 3));
    }

    #[test]
    fn test_random_pick_covers_candidates() {
        let mut selector = Selector::with_rng(StdRng::seed_from_u64(7));
        let mut seen = [false; 3];
        for _ in 0..200 {
            seen[selector.pick(&[false; 3]).unwrap()] = true;
        }
        assert_eq!(seen, [true; 3]);
    }
}
