//! Global permutation table
//!
//! All N entries are sorted by `(fingerprint, original_index)`; the rank of
//! each entry is its final output position. The table is O(N) and stays
//! resident for the whole run, whatever the memory step. It is built once
//! and then handed, read-only, to each later phase.

use crate::error::{ShuffleError, ShuffleResult};
use crate::fingerprint::Fingerprint;
use crate::label::Label;
use log::debug;

/// One record's ordering key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationEntry {
    pub fingerprint: Fingerprint,
    pub original_index: u64,
    pub label: Label,
}

impl PermutationEntry {
    pub fn new(fingerprint: Fingerprint, original_index: u64, label: Label) -> Self {
        Self {
            fingerprint,
            original_index,
            label,
        }
    }

    /// Total order key; equal fingerprints fall back to the original index
    #[inline]
    pub fn sort_key(&self) -> (Fingerprint, u64) {
        (self.fingerprint, self.original_index)
    }
}

/// `original_index -> final position`, a bijection over `[0, N)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    positions: Vec<u64>,
}

impl Permutation {
    /// Sort the entries and rank them
    pub fn resolve(mut entries: Vec<PermutationEntry>) -> ShuffleResult<Self> {
        let n = entries.len();
        entries.sort_unstable_by_key(PermutationEntry::sort_key);

        const UNSET: u64 = u64::MAX;
        let mut positions = vec![UNSET; n];
        for (rank, entry) in entries.iter().enumerate() {
            let slot = usize::try_from(entry.original_index)
                .ok()
                .and_then(|i| positions.get_mut(i))
                .ok_or_else(|| {
                    ShuffleError::internal(&format!(
                        "original index {} outside [0, {n})",
                        entry.original_index
                    ))
                })?;
            if *slot != UNSET {
                return Err(ShuffleError::internal(&format!(
                    "original index {} assigned twice",
                    entry.original_index
                )));
            }
            *slot = rank as u64;
        }

        debug!("Resolved permutation over {} records", n);
        Ok(Self { positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Final position of the record first read at `original_index`
    #[inline]
    pub fn position_of(&self, original_index: u64) -> ShuffleResult<u64> {
        usize::try_from(original_index)
            .ok()
            .and_then(|i| self.positions.get(i))
            .copied()
            .ok_or_else(|| {
                ShuffleError::input_changed(
                    self.positions.len() as u64,
                    original_index.saturating_add(1),
                )
            })
    }

    /// Positions indexed by original index
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    /// Inverse table: original index for each final position
    pub fn order(&self) -> Vec<u64> {
        let mut order = vec![0u64; self.positions.len()];
        for (index, &position) in self.positions.iter().enumerate() {
            order[position as usize] = index as u64;
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn entries(keys: &[u64]) -> Vec<PermutationEntry> {
        keys.iter()
            .enumerate()
            .map(|(i, &k)| PermutationEntry::new(Fingerprint::from_u64(k), i as u64, 0))
            .collect()
    }

    #[test]
    fn test_ranks_by_fingerprint() -> ShuffleResult<()> {
        let perm = Permutation::resolve(entries(&[30, 10, 20]))?;
        assert_eq!(perm.positions(), &[2, 0, 1]);
        assert_eq!(perm.order(), vec![1, 2, 0]);
        assert_eq!(perm.position_of(0)?, 2);
        Ok(())
    }

    #[test]
    fn test_collisions_break_ties_by_index() -> ShuffleResult<()> {
        let perm = Permutation::resolve(entries(&[5, 1, 5, 1, 5]))?;
        assert_eq!(perm.positions(), &[2, 0, 3, 1, 4]);
        Ok(())
    }

    #[test]
    fn test_bijection_for_random_keys() -> ShuffleResult<()> {
        let mut rng = StdRng::seed_from_u64(7);
        for n in [0usize, 1, 2, 17, 1000] {
            let keys: Vec<u64> = (0..n).map(|_| rng.gen_range(0..50)).collect();
            let perm = Permutation::resolve(entries(&keys))?;

            let mut seen = vec![false; n];
            for &p in perm.positions() {
                assert!(!seen[p as usize], "position {p} produced twice");
                seen[p as usize] = true;
            }
            assert!(seen.iter().all(|&s| s));
        }
        Ok(())
    }

    #[test]
    fn test_entry_order_does_not_matter() -> ShuffleResult<()> {
        let mut shuffled = entries(&[4, 8, 1, 8]);
        shuffled.reverse();
        assert_eq!(
            Permutation::resolve(shuffled)?,
            Permutation::resolve(entries(&[4, 8, 1, 8]))?
        );
        Ok(())
    }

    #[test]
    fn test_rejects_bad_indices() {
        let mut dup = entries(&[1, 2]);
        dup[1].original_index = 0;
        assert!(Permutation::resolve(dup).is_err());

        let mut out_of_range = entries(&[1, 2]);
        out_of_range[1].original_index = 9;
        assert!(Permutation::resolve(out_of_range).is_err());
    }

    #[test]
    fn test_unknown_index_means_input_changed() -> ShuffleResult<()> {
        let perm = Permutation::resolve(entries(&[1, 2]))?;
        assert!(matches!(
            perm.position_of(2),
            Err(ShuffleError::InputChanged { expected: 2, actual: 3 })
        ));
        Ok(())
    }
}
