use crate::model::{Pair, TokenId};

/// One distinct pre-token shape and the number of times it occurs in the corpus.
///
/// Symbols are rewritten in place as merges are applied; the frequency never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IdSequence {
    ids: Vec<TokenId>,
    frequency: u64,
}

impl IdSequence {
    pub(crate) fn new(ids: Vec<TokenId>, frequency: u64) -> Self {
        Self { ids, frequency }
    }

    pub(crate) fn ids(&self) -> &[TokenId] {
        &self.ids
    }

    pub(crate) fn frequency(&self) -> u64 {
        self.frequency
    }

    /// Adjacent symbol pairs, left to right. Overlapping pairs are all reported.
    pub(crate) fn pairs(&self) -> impl Iterator<Item = Pair> + '_ {
        adjacent_pairs(&self.ids)
    }

    /// Replaces every non-overlapping occurrence of `pair`, scanning left to right, with
    /// `replacement`. Returns `true` when at least one occurrence was replaced.
    ///
    /// `[a, a, a]` merged on `(a, a)` becomes `[aa, a]`.
    pub(crate) fn merge(&mut self, pair: Pair, replacement: TokenId) -> bool {
        let len = self.ids.len();
        if len < 2 {
            return false;
        }

        let mut read = 0usize;
        let mut write = 0usize;
        let mut changed = false;
        while read < len {
            if read + 1 < len && self.ids[read] == pair.0 && self.ids[read + 1] == pair.1 {
                self.ids[write] = replacement;
                read += 2;
                changed = true;
            } else {
                if write != read {
                    self.ids[write] = self.ids[read];
                }
                read += 1;
            }
            write += 1;
        }

        self.ids.truncate(write);
        changed
    }
}

pub(crate) fn adjacent_pairs(ids: &[TokenId]) -> impl Iterator<Item = Pair> + '_ {
    ids.windows(2).map(|window| (window[0], window[1]))
}
