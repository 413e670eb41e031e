//! Model types: the learned vocabulary and the ordered merge list.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::{BpeError, Result};
use crate::serialization;
use crate::tokenizer::Tokenizer;

/// Token identifier used throughout the crate.
pub type TokenId = u32;
/// Adjacent symbol pair encoded as `(left, right)` token identifiers.
pub type Pair = (TokenId, TokenId);
/// Learned merge rule encoded as the `(left, right)` byte strings it joins.
pub type MergeRule = (Vec<u8>, Vec<u8>);

/// Bijective mapping between dense token ids and byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    tokens: Vec<Vec<u8>>,
    ids: FxHashMap<Vec<u8>, TokenId>,
}

impl Vocabulary {
    /// Builds a vocabulary where `tokens[i]` is the byte string of id `i`.
    ///
    /// Fails when two ids would share a byte string or the id space overflows [`TokenId`].
    pub fn new(tokens: Vec<Vec<u8>>) -> Result<Self> {
        if TokenId::try_from(tokens.len()).is_err() {
            return Err(BpeError::InvalidConfig(format!(
                "vocabulary of {} entries exceeds the TokenId range",
                tokens.len()
            )));
        }
        let mut ids = FxHashMap::default();
        ids.reserve(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            if let Some(previous) = ids.insert(token.clone(), id as TokenId) {
                return Err(BpeError::InvalidConfig(format!(
                    "byte string {:?} is assigned to both id {previous} and id {id}",
                    bstr::BStr::new(token)
                )));
            }
        }
        Ok(Self { tokens, ids })
    }

    /// Initial training vocabulary: special tokens in order, then the 256 single bytes.
    pub fn with_special_tokens<S: AsRef<str>>(special_tokens: &[S]) -> Result<Self> {
        let mut tokens: Vec<Vec<u8>> = special_tokens
            .iter()
            .map(|token| token.as_ref().as_bytes().to_vec())
            .collect();
        tokens.extend((0u8..=u8::MAX).map(|byte| vec![byte]));
        Self::new(tokens)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` when the vocabulary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Byte string for `id`, if assigned.
    #[must_use]
    pub fn get(&self, id: TokenId) -> Option<&[u8]> {
        self.tokens.get(id as usize).map(Vec::as_slice)
    }

    /// Id assigned to `bytes`, if any.
    #[must_use]
    pub fn id_of(&self, bytes: &[u8]) -> Option<TokenId> {
        self.ids.get(bytes).copied()
    }

    /// Entries in id order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (TokenId, &[u8])> + '_ {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (id as TokenId, token.as_slice()))
    }

    /// Returns `true` when each of the 256 single bytes has an id.
    #[must_use]
    pub fn covers_all_bytes(&self) -> bool {
        (0u8..=u8::MAX).all(|byte| self.ids.contains_key([byte].as_slice()))
    }

    /// Longest entry by byte length; the lowest id wins ties.
    #[must_use]
    pub fn longest_entry(&self) -> Option<(TokenId, &[u8])> {
        self.iter()
            .fold(None, |best: Option<(TokenId, &[u8])>, (id, token)| match best {
                Some((_, current)) if current.len() >= token.len() => best,
                _ => Some((id, token)),
            })
    }
}

/// Trained BPE model: vocabulary, merge list in learning order, and its special tokens.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpeModel {
    vocab: Vocabulary,
    merges: Vec<MergeRule>,
    special_tokens: Vec<String>,
}

impl BpeModel {
    /// Constructs a model from its parts.
    pub fn new(vocab: Vocabulary, merges: Vec<MergeRule>, special_tokens: Vec<String>) -> Self {
        Self {
            vocab,
            merges,
            special_tokens,
        }
    }

    /// The id to byte string mapping.
    #[must_use]
    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Merge rules; earlier rules take priority when encoding.
    #[must_use]
    pub fn merges(&self) -> &[MergeRule] {
        &self.merges
    }

    /// Special tokens occupying the lowest ids.
    #[must_use]
    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    /// Total vocabulary size including special tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    /// Splits the model into its vocabulary and merge list.
    #[must_use]
    pub fn into_parts(self) -> (Vocabulary, Vec<MergeRule>) {
        (self.vocab, self.merges)
    }

    /// Writes `vocab.json` and `merges.txt` to the given paths.
    pub fn save<P: AsRef<Path>, Q: AsRef<Path>>(&self, vocab_path: P, merges_path: Q) -> Result<()> {
        serialization::save_vocab(&self.vocab, vocab_path)?;
        serialization::save_merges(&self.merges, merges_path)
    }

    /// Loads a model previously written by [`BpeModel::save`].
    pub fn load<P, Q, S>(vocab_path: P, merges_path: Q, special_tokens: &[S]) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
        S: AsRef<str>,
    {
        let vocab = serialization::load_vocab(vocab_path)?;
        let merges = serialization::load_merges(merges_path)?;
        let special_tokens = special_tokens
            .iter()
            .map(|token| token.as_ref().to_owned())
            .collect();
        Ok(Self::new(vocab, merges, special_tokens))
    }

    /// Builds a [`Tokenizer`] sharing this model's special tokens.
    pub fn tokenizer(&self) -> Result<Tokenizer> {
        Tokenizer::new(
            self.vocab.clone(),
            self.merges.clone(),
            &self.special_tokens,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_tokens_precede_bytes() {
        let vocab = Vocabulary::with_special_tokens(&["<|endoftext|>", "<pad>"]).unwrap();
        assert_eq!(vocab.len(), 258);
        assert_eq!(vocab.get(0), Some(b"<|endoftext|>".as_slice()));
        assert_eq!(vocab.get(1), Some(b"<pad>".as_slice()));
        assert_eq!(vocab.get(2), Some([0u8].as_slice()));
        assert_eq!(vocab.id_of(b"a"), Some(2 + u32::from(b'a')));
        assert!(vocab.covers_all_bytes());
    }

    #[test]
    fn duplicate_byte_strings_are_rejected() {
        let err = Vocabulary::with_special_tokens(&["a"]).unwrap_err();
        assert!(matches!(err, BpeError::InvalidConfig(_)));
    }

    #[test]
    fn longest_entry_prefers_lowest_id() {
        let vocab = Vocabulary::new(vec![b"ab".to_vec(), b"c".to_vec(), b"de".to_vec()]).unwrap();
        assert_eq!(vocab.longest_entry(), Some((0, b"ab".as_slice())));
        assert!(!vocab.covers_all_bytes());
        assert_eq!(vocab.get(3), None);
    }

    #[test]
    fn model_round_trips_through_files() {
        let mut tokens: Vec<Vec<u8>> = vec![b"<|endoftext|>".to_vec()];
        tokens.extend((0u8..=255).map(|b| vec![b]));
        tokens.push(b" t".to_vec());
        tokens.push(b" th".to_vec());
        let vocab = Vocabulary::new(tokens).unwrap();
        let merges = vec![
            (b" ".to_vec(), b"t".to_vec()),
            (b" t".to_vec(), b"h".to_vec()),
        ];
        let model = BpeModel::new(vocab, merges, vec!["<|endoftext|>".into()]);

        let dir = tempfile::tempdir().unwrap();
        let vocab_path = dir.path().join("vocab.json");
        let merges_path = dir.path().join("merges.txt");
        model.save(&vocab_path, &merges_path).unwrap();
        let loaded = BpeModel::load(&vocab_path, &merges_path, &["<|endoftext|>"]).unwrap();
        assert_eq!(loaded, model);
    }
}
