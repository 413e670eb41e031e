//! Splitting raw text into pre-tokens and counting them over a corpus.
//!
//! Text is first cut on special tokens (longest match wins), then every remaining span is
//! split with [`PRETOKENIZE_PATTERN`]. For training, each pre-token's UTF-8 bytes form the
//! key of a [`FrequencyTable`]; special-token spans act purely as separators and are not
//! counted. Files are scanned shard by shard in parallel and the per-shard tables are summed,
//! which yields exactly the table a serial scan of the whole file would produce.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use fancy_regex::Regex;
use log::{debug, info};
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::boundaries::shard_ranges;
use crate::bytes::decode_utf8_dropping_invalid;
use crate::config::validate_special_tokens;
use crate::error::{BpeError, Result};

/// Pattern splitting non-special text into pre-tokens: English contractions, letter runs,
/// digit runs and punctuation runs (each with an optional leading space), then whitespace.
pub const PRETOKENIZE_PATTERN: &str =
    r"'(?:[sdmt]|ll|ve|re)| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+(?!\S)|\s+";

/// Occurrence count of every distinct pre-token, keyed by its byte sequence.
pub type FrequencyTable = FxHashMap<Vec<u8>, u64>;

/// One span produced by [`PreTokenizer::split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreToken<'t> {
    /// An exact occurrence of a special token; never split further.
    Special(&'t str),
    /// A pattern-delimited span of ordinary text.
    Text(&'t str),
}

impl<'t> PreToken<'t> {
    /// Raw UTF-8 bytes of the span.
    #[must_use]
    pub fn as_bytes(&self) -> &'t [u8] {
        match self {
            Self::Special(text) | Self::Text(text) => text.as_bytes(),
        }
    }

    /// Returns `true` for special-token spans.
    #[must_use]
    pub fn is_special(&self) -> bool {
        matches!(self, Self::Special(_))
    }
}

/// Compiled pre-tokenization rules for a fixed set of special tokens.
#[derive(Debug, Clone)]
pub struct PreTokenizer {
    pattern: Regex,
    special_splitter: Option<Regex>,
    special_tokens: Vec<String>,
}

impl PreTokenizer {
    /// Compiles the splitter for `special_tokens`.
    ///
    /// Alternatives are tried longest first, so a special token that is a prefix of another
    /// never shadows the longer one.
    pub fn new<S: AsRef<str>>(special_tokens: &[S]) -> Result<Self> {
        let special_tokens: Vec<String> = special_tokens
            .iter()
            .map(|token| token.as_ref().to_owned())
            .collect();
        validate_special_tokens(&special_tokens)?;

        let special_splitter = if special_tokens.is_empty() {
            None
        } else {
            let mut by_length: Vec<&str> = special_tokens.iter().map(String::as_str).collect();
            by_length.sort_by_key(|token| std::cmp::Reverse(token.len()));
            let alternation = by_length
                .iter()
                .map(|token| fancy_regex::escape(token))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&alternation)?)
        };

        Ok(Self {
            pattern: Regex::new(PRETOKENIZE_PATTERN)?,
            special_splitter,
            special_tokens,
        })
    }

    /// Special tokens recognised by this pre-tokenizer, in caller order.
    #[must_use]
    pub fn special_tokens(&self) -> &[String] {
        &self.special_tokens
    }

    /// Splits `text` into special-token and pattern spans, in input order.
    pub fn split<'t>(&self, text: &'t str) -> Result<Vec<PreToken<'t>>> {
        let mut pieces = Vec::new();
        self.for_each_piece(text, |piece| pieces.push(piece))?;
        Ok(pieces)
    }

    /// Adds every non-special pre-token of `text` to `table`.
    pub fn count_into(&self, text: &str, table: &mut FrequencyTable) -> Result<()> {
        self.for_each_piece(text, |piece| {
            if let PreToken::Text(span) = piece {
                match table.get_mut(span.as_bytes()) {
                    Some(count) => *count += 1,
                    None => {
                        table.insert(span.as_bytes().to_vec(), 1);
                    }
                }
            }
        })
    }

    fn for_each_piece<'t, F>(&self, text: &'t str, mut f: F) -> Result<()>
    where
        F: FnMut(PreToken<'t>),
    {
        let Some(splitter) = &self.special_splitter else {
            return self.for_each_pattern_match(text, &mut f);
        };

        let mut segment_start = 0;
        for found in splitter.find_iter(text) {
            let found = found?;
            if found.start() > segment_start {
                self.for_each_pattern_match(&text[segment_start..found.start()], &mut f)?;
            }
            f(PreToken::Special(found.as_str()));
            segment_start = found.end();
        }
        if segment_start < text.len() {
            self.for_each_pattern_match(&text[segment_start..], &mut f)?;
        }
        Ok(())
    }

    fn for_each_pattern_match<'t, F>(&self, segment: &'t str, f: &mut F) -> Result<()>
    where
        F: FnMut(PreToken<'t>),
    {
        for found in self.pattern.find_iter(segment) {
            let found = found?;
            if !found.as_str().is_empty() {
                f(PreToken::Text(found.as_str()));
            }
        }
        Ok(())
    }
}

/// Adds every count of `other` into `into`.
pub fn merge_tables(mut into: FrequencyTable, other: FrequencyTable) -> FrequencyTable {
    if into.len() < other.len() {
        return merge_tables(other, into);
    }
    for (key, count) in other {
        *into.entry(key).or_insert(0) += count;
    }
    into
}

/// Counts the pre-tokens of an in-memory string.
pub fn count_text<S: AsRef<str>>(text: &str, special_tokens: &[S]) -> Result<FrequencyTable> {
    let pretokenizer = PreTokenizer::new(special_tokens)?;
    let mut table = FrequencyTable::default();
    pretokenizer.count_into(text, &mut table)?;
    Ok(table)
}

/// Counts the pre-tokens of a file, scanning up to `num_shards` delimiter-aligned shards in
/// parallel.
///
/// The first special token delimits shards, so at least one is required when `num_shards`
/// exceeds one. Bytes that are not valid UTF-8 are dropped. The first failing shard aborts the
/// whole scan.
pub fn count_file<P, S>(
    path: P,
    special_tokens: &[S],
    num_shards: usize,
    read_window: usize,
) -> Result<FrequencyTable>
where
    P: AsRef<Path>,
    S: AsRef<str>,
{
    let path = path.as_ref();
    let pretokenizer = PreTokenizer::new(special_tokens)?;
    let delimiter: &[u8] = match pretokenizer.special_tokens().first() {
        Some(token) => token.as_bytes(),
        None if num_shards > 1 => {
            return Err(BpeError::InvalidConfig(
                "sharded pre-tokenization requires a special token delimiter".into(),
            ))
        }
        None => &[],
    };

    let ranges = shard_ranges(path, num_shards, delimiter, read_window)?;
    info!(
        "pre-tokenizing {} in {} shard(s)",
        path.display(),
        ranges.len()
    );

    ranges
        .par_iter()
        .map(|range| count_shard(path, range.clone(), &pretokenizer))
        .try_reduce(FrequencyTable::default, |acc, local| {
            Ok(merge_tables(acc, local))
        })
}

fn count_shard(
    path: &Path,
    range: Range<u64>,
    pretokenizer: &PreTokenizer,
) -> Result<FrequencyTable> {
    let io_err = |err: std::io::Error| BpeError::io(err, Some(path.to_path_buf()));
    let mut file = File::open(path).map_err(io_err)?;
    file.seek(SeekFrom::Start(range.start)).map_err(io_err)?;
    let mut raw = Vec::with_capacity((range.end - range.start) as usize);
    file.take(range.end - range.start)
        .read_to_end(&mut raw)
        .map_err(io_err)?;

    let text = decode_utf8_dropping_invalid(&raw);
    let mut table = FrequencyTable::default();
    pretokenizer.count_into(&text, &mut table)?;
    debug!(
        "shard {}..{}: {} distinct pre-tokens",
        range.start,
        range.end,
        table.len()
    );
    Ok(table)
}

/// Counts pre-tokens from either a file or raw text.
///
/// A file path takes precedence when both are supplied; [`BpeError::MissingInput`] is
/// returned when neither is.
pub fn count_corpus<S: AsRef<str>>(
    path: Option<&Path>,
    text: Option<&str>,
    special_tokens: &[S],
    num_shards: usize,
    read_window: usize,
) -> Result<FrequencyTable> {
    match (path, text) {
        (Some(path), _) => count_file(path, special_tokens, num_shards, read_window),
        (None, Some(text)) => count_text(text, special_tokens),
        (None, None) => Err(BpeError::MissingInput),
    }
}
