//! Encoding text into token ids and decoding ids back into text.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::bytes::decode_utf8_dropping_invalid;
use crate::error::{BpeError, Result};
use crate::model::{BpeModel, MergeRule, TokenId, Vocabulary};
use crate::pretokenize::{PreToken, PreTokenizer};

/// Applies a learned merge list to new text.
///
/// All state is immutable after construction, so one instance can be shared across threads
/// and used for concurrent `encode`/`decode` calls.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    vocab: Vocabulary,
    merge_ranks: FxHashMap<Vec<u8>, FxHashMap<Vec<u8>, usize>>,
    num_merges: usize,
    pretokenizer: PreTokenizer,
}

impl Tokenizer {
    /// Builds a tokenizer from a vocabulary, its merge list in learning order, and the special
    /// tokens to keep whole.
    ///
    /// Fails with [`BpeError::InvalidConfig`] when any of the 256 single bytes lacks an id,
    /// since such a vocabulary cannot represent arbitrary text.
    pub fn new<S: AsRef<str>>(
        vocab: Vocabulary,
        merges: Vec<MergeRule>,
        special_tokens: &[S],
    ) -> Result<Self> {
        if !vocab.covers_all_bytes() {
            return Err(BpeError::InvalidConfig(
                "vocabulary must contain every single-byte token".into(),
            ));
        }
        let pretokenizer = PreTokenizer::new(special_tokens)?;

        let num_merges = merges.len();
        let mut merge_ranks: FxHashMap<Vec<u8>, FxHashMap<Vec<u8>, usize>> = FxHashMap::default();
        for (rank, (left, right)) in merges.into_iter().enumerate() {
            merge_ranks
                .entry(left)
                .or_default()
                .entry(right)
                .or_insert(rank);
        }

        Ok(Self {
            vocab,
            merge_ranks,
            num_merges,
            pretokenizer,
        })
    }

    /// Loads `vocab.json` and `merges.txt` written by [`BpeModel::save`].
    pub fn from_files<P, Q, S>(vocab_path: P, merges_path: Q, special_tokens: &[S]) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        S: AsRef<str>,
    {
        let (vocab, merges) = BpeModel::load(vocab_path, merges_path, special_tokens)?.into_parts();
        Self::new(vocab, merges, special_tokens)
    }

    /// Builds a tokenizer from a trained model, reusing its special tokens.
    pub fn from_model(model: &BpeModel) -> Result<Self> {
        model.tokenizer()
    }

    /// Encodes `text` into token ids.
    ///
    /// Special tokens map straight to their ids. Every other pre-token starts as single bytes
    /// and repeatedly merges the adjacent pair learned earliest (leftmost on ties), one merge
    /// per scan, until no adjacent pair has a rule.
    pub fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let mut ids = Vec::with_capacity(text.len() / 3 + 1);
        for piece in self.pretokenizer.split(text)? {
            match piece {
                PreToken::Special(token) => {
                    if let Some(id) = self.vocab.id_of(token.as_bytes()) {
                        ids.push(id);
                    }
                }
                PreToken::Text(span) => self.encode_piece(span.as_bytes(), &mut ids),
            }
        }
        Ok(ids)
    }

    /// Lazily encodes each fragment in turn, yielding one flat stream of ids.
    ///
    /// Only the ids of the current fragment are buffered. The first error ends the stream.
    pub fn encode_iterable<I>(&self, fragments: I) -> EncodeIter<'_, I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        EncodeIter {
            tokenizer: self,
            fragments: fragments.into_iter(),
            pending: Vec::new().into_iter(),
            finished: false,
        }
    }

    /// Concatenates the bytes of `ids`, skipping unknown ids, and decodes them as UTF-8.
    /// Malformed sequences are dropped.
    #[must_use]
    pub fn decode(&self, ids: &[TokenId]) -> String {
        decode_utf8_dropping_invalid(&self.decode_bytes(ids))
    }

    /// Concatenated bytes of `ids`; unknown ids are skipped.
    #[must_use]
    pub fn decode_bytes(&self, ids: &[TokenId]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ids.len() * 4);
        for &id in ids {
            if let Some(token) = self.vocab.get(id) {
                out.extend_from_slice(token);
            }
        }
        out
    }

    /// Underlying vocabulary.
    #[must_use]
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Number of vocabulary entries.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Number of merge rules.
    #[must_use]
    pub fn num_merges(&self) -> usize {
        self.num_merges
    }

    /// Id of an exact byte string.
    #[must_use]
    pub fn token_to_id(&self, token: &[u8]) -> Option<TokenId> {
        self.vocab.id_of(token)
    }

    /// Byte string of `id`.
    #[must_use]
    pub fn id_to_token(&self, id: TokenId) -> Option<&[u8]> {
        self.vocab.get(id)
    }

    /// Special tokens kept whole during encoding.
    #[must_use]
    pub fn special_tokens(&self) -> &[String] {
        self.pretokenizer.special_tokens()
    }

    fn rank(&self, left: &[u8], right: &[u8]) -> Option<usize> {
        self.merge_ranks.get(left)?.get(right).copied()
    }

    fn encode_piece(&self, piece: &[u8], out: &mut Vec<TokenId>) {
        // Symbol `i` spans piece[starts[i]..starts[i + 1]], the last one runs to the end.
        let mut starts: Vec<usize> = (0..piece.len()).collect();
        let symbol_end =
            |starts: &[usize], i: usize| starts.get(i + 1).copied().unwrap_or(piece.len());

        loop {
            let mut best: Option<(usize, usize)> = None;
            for i in 0..starts.len().saturating_sub(1) {
                let left = &piece[starts[i]..starts[i + 1]];
                let right = &piece[starts[i + 1]..symbol_end(starts.as_slice(), i + 1)];
                if let Some(rank) = self.rank(left, right) {
                    if best.map_or(true, |(best_rank, _)| rank < best_rank) {
                        best = Some((rank, i));
                    }
                }
            }
            let Some((_, position)) = best else {
                break;
            };
            starts.remove(position + 1);
        }

        for i in 0..starts.len() {
            let symbol = &piece[starts[i]..symbol_end(starts.as_slice(), i)];
            if let Some(id) = self.vocab.id_of(symbol) {
                out.push(id);
            }
        }
    }
}

/// Iterator returned by [`Tokenizer::encode_iterable`].
#[derive(Debug)]
pub struct EncodeIter<'a, I> {
    tokenizer: &'a Tokenizer,
    fragments: I,
    pending: std::vec::IntoIter<TokenId>,
    finished: bool,
}

impl<I> Iterator for EncodeIter<'_, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = Result<TokenId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.pending.next() {
                return Some(Ok(id));
            }
            if self.finished {
                return None;
            }
            let Some(fragment) = self.fragments.next() else {
                self.finished = true;
                return None;
            };
            match self.tokenizer.encode(fragment.as_ref()) {
                Ok(ids) => self.pending = ids.into_iter(),
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<I> std::iter::FusedIterator for EncodeIter<'_, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOT: &str = "<|endoftext|>";

    fn byte_tokens(special_tokens: &[&str]) -> Vec<Vec<u8>> {
        let mut tokens: Vec<Vec<u8>> = special_tokens
            .iter()
            .map(|token| token.as_bytes().to_vec())
            .collect();
        tokens.extend((0u8..=255).map(|b| vec![b]));
        tokens
    }

    fn rule(left: &str, right: &str) -> MergeRule {
        (left.as_bytes().to_vec(), right.as_bytes().to_vec())
    }

    fn sample_merges() -> Vec<MergeRule> {
        vec![
            rule(" ", "t"),
            rule("t", "h"),
            rule(" t", "h"),
            rule("th", "e"),
            rule(" th", "e"),
        ]
    }

    /// Vocabulary with `<|endoftext|>` at id 0 and merges ` t`, `th`, ` th`, `the`, ` the`.
    fn sample() -> Tokenizer {
        let mut tokens = byte_tokens(&[EOT]);
        for token in [" t", "th", " th", "the", " the"] {
            tokens.push(token.as_bytes().to_vec());
        }
        Tokenizer::new(Vocabulary::new(tokens).unwrap(), sample_merges(), &[EOT]).unwrap()
    }

    fn ids_of(tokenizer: &Tokenizer, tokens: &[&str]) -> Vec<TokenId> {
        tokens
            .iter()
            .map(|token| tokenizer.token_to_id(token.as_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn applies_earliest_merge_first() {
        let tokenizer = sample();
        let ids = tokenizer.encode("the the").unwrap();
        assert_eq!(ids, ids_of(&tokenizer, &["the", " the"]));
        assert_eq!(tokenizer.decode(&ids), "the the");
    }

    #[test]
    fn one_merge_per_scan_prefers_leftmost_on_equal_rank() {
        let mut tokens = byte_tokens(&[]);
        tokens.push(b"aa".to_vec());
        let tokenizer = Tokenizer::new(
            Vocabulary::new(tokens).unwrap(),
            vec![rule("a", "a")],
            &[] as &[&str],
        )
        .unwrap();
        let ids = tokenizer.encode("aaa").unwrap();
        assert_eq!(ids, ids_of(&tokenizer, &["aa", "a"]));
    }

    #[test]
    fn special_tokens_map_to_reserved_ids() {
        let tokenizer = sample();
        let ids = tokenizer.encode("the<|endoftext|> the").unwrap();
        assert_eq!(
            ids,
            vec![
                tokenizer.token_to_id(b"the").unwrap(),
                0,
                tokenizer.token_to_id(b" the").unwrap(),
            ]
        );
        assert_eq!(tokenizer.decode(&ids), "the<|endoftext|> the");
    }

    #[test]
    fn special_tokens_outside_the_vocabulary_are_skipped() {
        let tokenizer = Tokenizer::new(
            Vocabulary::new(byte_tokens(&[])).unwrap(),
            Vec::new(),
            &["<sep>"],
        )
        .unwrap();
        let ids = tokenizer.encode("a<sep>b").unwrap();
        assert_eq!(ids, vec![u32::from(b'a'), u32::from(b'b')]);
    }

    #[test]
    fn round_trips_multibyte_text() {
        let tokenizer = sample();
        let text = "thé 🦀 the\n\n  then théâtre";
        let ids = tokenizer.encode(text).unwrap();
        assert_eq!(tokenizer.decode(&ids), text);
    }

    #[test]
    fn decode_skips_unknown_ids_and_drops_invalid_utf8() {
        let tokenizer = sample();
        let t = tokenizer.token_to_id(b"t").unwrap();
        let invalid = tokenizer.token_to_id(&[0xFF]).unwrap();
        assert_eq!(tokenizer.decode(&[t, 999_999, invalid, t]), "tt");
        assert_eq!(tokenizer.decode_bytes(&[t, invalid]), vec![b't', 0xFF]);
    }

    #[test]
    fn encode_iterable_matches_concatenated_encodes() {
        let tokenizer = sample();
        let fragments = ["the cat\n", "sat on the", " mat<|endoftext|>"];
        let streamed: Vec<TokenId> = tokenizer
            .encode_iterable(fragments)
            .collect::<Result<_>>()
            .unwrap();
        let expected: Vec<TokenId> = fragments
            .iter()
            .flat_map(|fragment| tokenizer.encode(fragment).unwrap())
            .collect();
        assert_eq!(streamed, expected);
        assert_eq!(tokenizer.encode_iterable(Vec::<String>::new()).count(), 0);
    }

    #[test]
    fn encode_iterable_pulls_fragments_on_demand() {
        let tokenizer = sample();
        let head: Vec<TokenId> = tokenizer
            .encode_iterable(std::iter::repeat("ab"))
            .take(3)
            .collect::<Result<_>>()
            .unwrap();
        let expected = tokenizer.encode("abab").unwrap();
        assert_eq!(head, expected[..3]);
    }

    #[test]
    fn vocabulary_missing_bytes_is_rejected() {
        let vocab = Vocabulary::new(vec![b"a".to_vec()]).unwrap();
        let err = Tokenizer::new(vocab, Vec::new(), &[] as &[&str]).unwrap_err();
        assert!(matches!(err, BpeError::InvalidConfig(_)));
    }

    #[test]
    fn shared_across_threads() {
        let tokenizer = sample();
        let expected = tokenizer.encode("the theme of the thesis").unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| tokenizer.encode("the theme of the thesis").unwrap()))
                .collect();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), expected);
            }
        });
    }

    #[test]
    fn accessors_reflect_the_model() {
        let tokenizer = sample();
        assert_eq!(tokenizer.vocab_size(), 1 + 256 + 5);
        assert_eq!(tokenizer.num_merges(), 5);
        assert_eq!(tokenizer.id_to_token(0), Some(EOT.as_bytes()));
        assert_eq!(tokenizer.special_tokens(), &[EOT.to_string()]);
    }

    #[test]
    fn loads_from_saved_files() {
        let tokenizer = sample();
        let model = BpeModel::new(
            tokenizer.vocab().clone(),
            sample_merges(),
            vec![EOT.into()],
        );
        let dir = tempfile::tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.json");
        let merges_path = dir.path().join("merges.txt");
        model.save(&vocab_path, &merges_path).unwrap();

        let loaded = Tokenizer::from_files(&vocab_path, &merges_path, &[EOT]).unwrap();
        let text = "the<|endoftext|> then";
        assert_eq!(loaded.encode(text).unwrap(), tokenizer.encode(text).unwrap());
        assert_eq!(
            Tokenizer::from_model(&model).unwrap().encode(text).unwrap(),
            tokenizer.encode(text).unwrap()
        );
    }
}
