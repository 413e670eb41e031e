use std::cmp::Ordering;
use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::model::{Pair, TokenId};
use crate::trainer::sequence::{adjacent_pairs, IdSequence};

/// Total weighted frequency of every adjacent symbol pair across all id sequences.
///
/// Pairs whose total drops to zero are removed, so the index always equals a fresh count
/// over the current sequences.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PairFrequencyIndex {
    counts: FxHashMap<Pair, u64>,
}

impl PairFrequencyIndex {
    /// Counts every adjacent pair of every sequence, weighted by the sequence frequency.
    pub(crate) fn from_sequences(sequences: &[IdSequence]) -> Self {
        let mut index = Self::default();
        for sequence in sequences {
            index.add(sequence.ids(), sequence.frequency());
        }
        index
    }

    pub(crate) fn len(&self) -> usize {
        self.counts.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, pair: Pair) -> u64 {
        self.counts.get(&pair).copied().unwrap_or(0)
    }

    /// Highest-frequency pair. Ties go to the lexicographically greatest
    /// `(left bytes, right bytes)` tuple, looked up in `token_bytes`.
    pub(crate) fn best(&self, token_bytes: &[Vec<u8>]) -> Option<(Pair, u64)> {
        let mut best: Option<(Pair, u64)> = None;
        for (&pair, &count) in &self.counts {
            let replace = match best {
                None => true,
                Some((current, current_count)) => match count.cmp(&current_count) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => {
                        pair_bytes(token_bytes, pair) > pair_bytes(token_bytes, current)
                    }
                },
            };
            if replace {
                best = Some((pair, count));
            }
        }
        best
    }

    /// Updates the index after a merge round.
    ///
    /// `changed[k]` is the index of a rewritten sequence in `sequences` and `previous[k]` its
    /// symbols before the rewrite. Every old adjacency of the changed sequences is subtracted
    /// before the new ones are added; untouched sequences are never visited.
    pub(crate) fn apply_merge(
        &mut self,
        previous: &[Vec<TokenId>],
        sequences: &[IdSequence],
        changed: &[usize],
    ) {
        debug_assert_eq!(previous.len(), changed.len());
        for (old, &idx) in previous.iter().zip(changed) {
            self.subtract(old, sequences[idx].frequency());
        }
        for &idx in changed {
            let sequence = &sequences[idx];
            self.add(sequence.ids(), sequence.frequency());
        }
    }

    fn add(&mut self, ids: &[TokenId], frequency: u64) {
        if frequency == 0 {
            return;
        }
        for pair in adjacent_pairs(ids) {
            *self.counts.entry(pair).or_insert(0) += frequency;
        }
    }

    fn subtract(&mut self, ids: &[TokenId], frequency: u64) {
        for pair in adjacent_pairs(ids) {
            if let Entry::Occupied(mut occupied) = self.counts.entry(pair) {
                let remaining = occupied.get().saturating_sub(frequency);
                if remaining == 0 {
                    occupied.remove();
                } else {
                    *occupied.get_mut() = remaining;
                }
            }
        }
    }
}

fn pair_bytes(token_bytes: &[Vec<u8>], pair: Pair) -> (&[u8], &[u8]) {
    (
        token_bytes[pair.0 as usize].as_slice(),
        token_bytes[pair.1 as usize].as_slice(),
    )
}
