use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// A fixed permutation of `0..n`, drawn once and consumed left to right to
/// pick removal candidates (and, at training time, the used subset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ordering {
    indices: Vec<usize>,
}

impl Ordering {
    /// Deterministic permutation of `0..n` for `seed`.
    pub fn generate(n: usize, seed: u64) -> Ordering {
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
        Ordering { indices }
    }

    pub fn from_indices(indices: Vec<usize>) -> Result<Ordering, String> {
        let ordering = Ordering { indices };
        ordering.validate()?;
        Ok(ordering)
    }

    /// Checks that the indices are a permutation of `0..len`.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = vec![false; self.indices.len()];
        for &idx in &self.indices {
            match seen.get_mut(idx) {
                Some(slot) if !*slot => *slot = true,
                Some(_) => return Err(format!("index {} appears twice", idx)),
                None => return Err(format!("index {} is out of range for {} entries", idx, self.indices.len())),
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    /// The first `k` entries (all of them when `k` exceeds the length).
    pub fn prefix(&self, k: usize) -> &[usize] {
        &self.indices[..k.min(self.indices.len())]
    }
}

/// Read position into an `Ordering`. Only ever moves forward.
#[derive(Debug, Clone)]
pub struct OrderingCursor {
    ordering: Ordering,
    position: usize,
}

impl OrderingCursor {
    pub fn new(ordering: Ordering) -> Self {
        OrderingCursor { ordering, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_exhausted(&self) -> bool {
        self.position >= self.ordering.len()
    }
}

impl Iterator for OrderingCursor {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let idx = self.ordering.indices.get(self.position).copied()?;
        self.position += 1;
        Some(idx)
    }
}
