//! Configuration builders controlling vocabulary training.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{BpeError, Result};

/// Default size of the read window used while snapping shard boundaries.
pub const DEFAULT_READ_WINDOW: usize = 4096;

/// Strategy used to keep adjacent pair frequencies current between merge rounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PairCounting {
    /// Adjust counts using only the sequences touched by each merge.
    #[default]
    Incremental,
    /// Recount every pair from scratch after each merge. Slow; used as a reference.
    FullRecount,
}

/// Configuration for BPE vocabulary training.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainerConfig {
    /// Target vocabulary size including special tokens and the 256 byte tokens.
    pub vocab_size: usize,
    /// Special tokens in id order. The first one also delimits corpus shards.
    pub special_tokens: Vec<String>,
    /// Number of shards the corpus file is split into for the parallel pre-scan.
    pub num_shards: usize,
    /// Read window, in bytes, used when scanning for shard delimiters.
    pub read_window: usize,
    /// How pair frequencies are maintained across merge rounds.
    pub pair_counting: PairCounting,
    /// Enables per-merge logging through the `log` facade.
    pub show_progress: bool,
}

impl TrainerConfig {
    /// Returns a builder initialised with [`TrainerConfig::default`].
    #[must_use]
    pub fn builder() -> TrainerBuilder {
        TrainerBuilder::default()
    }

    /// Number of ids reserved before any merge product: special tokens plus 256 bytes.
    #[must_use]
    pub fn reserved_ids(&self) -> usize {
        self.special_tokens.len() + 256
    }

    /// Number of merge rounds requested; zero when `vocab_size` does not exceed the reserved ids.
    #[must_use]
    pub fn requested_merges(&self) -> usize {
        self.vocab_size.saturating_sub(self.reserved_ids())
    }

    /// Validates the invariants required for training.
    pub fn validate(&self) -> Result<()> {
        if self.num_shards == 0 {
            return Err(BpeError::InvalidConfig(
                "num_shards must be greater than zero".into(),
            ));
        }
        if self.read_window == 0 {
            return Err(BpeError::InvalidConfig(
                "read_window must be greater than zero".into(),
            ));
        }
        if self.num_shards > 1 && self.special_tokens.is_empty() {
            return Err(BpeError::InvalidConfig(format!(
                "num_shards ({}) > 1 requires at least one special token to delimit shards",
                self.num_shards
            )));
        }
        validate_special_tokens(&self.special_tokens)?;
        let max_vocab = usize::try_from(u32::MAX).unwrap_or(usize::MAX);
        if self.vocab_size > max_vocab {
            return Err(BpeError::InvalidConfig(format!(
                "vocab_size ({}) exceeds {max_vocab}, the maximum representable TokenId",
                self.vocab_size
            )));
        }
        Ok(())
    }
}

/// Rejects empty or repeated special tokens.
pub(crate) fn validate_special_tokens(tokens: &[String]) -> Result<()> {
    let mut seen = FxHashSet::default();
    for token in tokens {
        if token.is_empty() {
            return Err(BpeError::InvalidConfig(
                "special tokens must not be empty".into(),
            ));
        }
        if !seen.insert(token.as_str()) {
            return Err(BpeError::InvalidConfig(format!(
                "special token {token:?} is listed more than once"
            )));
        }
    }
    Ok(())
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            vocab_size: 10_000,
            special_tokens: vec!["<|endoftext|>".into()],
            num_shards: rayon::current_num_threads().max(1),
            read_window: DEFAULT_READ_WINDOW,
            pair_counting: PairCounting::Incremental,
            show_progress: true,
        }
    }
}

/// Builder for [`TrainerConfig`].
#[derive(Debug, Default, Clone)]
pub struct TrainerBuilder {
    cfg: TrainerConfig,
}

impl TrainerBuilder {
    /// Creates a builder with [`TrainerConfig::default`] settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the desired vocabulary size (including special and byte tokens).
    #[must_use]
    pub fn vocab_size(mut self, value: usize) -> Self {
        self.cfg.vocab_size = value;
        self
    }

    /// Overrides the ordered list of special tokens.
    #[must_use]
    pub fn special_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cfg.special_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the number of corpus shards scanned in parallel.
    #[must_use]
    pub fn num_shards(mut self, value: usize) -> Self {
        self.cfg.num_shards = value;
        self
    }

    /// Sets the boundary scan read window in bytes.
    #[must_use]
    pub fn read_window(mut self, value: usize) -> Self {
        self.cfg.read_window = value;
        self
    }

    /// Selects how pair frequencies are maintained between rounds.
    #[must_use]
    pub fn pair_counting(mut self, value: PairCounting) -> Self {
        self.cfg.pair_counting = value;
        self
    }

    /// Enables or disables per-merge logging.
    #[must_use]
    pub fn show_progress(mut self, enabled: bool) -> Self {
        self.cfg.show_progress = enabled;
        self
    }

    /// Finalises the builder, returning a validated [`TrainerConfig`].
    pub fn build(self) -> Result<TrainerConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
