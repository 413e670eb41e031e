//! Byte-level byte pair encoding (BPE) trainer and tokenizer for text corpora.
//!
//! The crate exposes both a library API and a `textbpe` command line interface.
//! Training pre-tokenizes a UTF-8 corpus (in parallel, shard by shard), learns a
//! vocabulary and an ordered merge list, and persists them as `vocab.json` and
//! `merges.txt`. A [`Tokenizer`] then applies the merges to new text.
//!
//! ```no_run
//! use textbpe::{Tokenizer, Trainer, TrainerConfig};
//!
//! # fn main() -> textbpe::Result<()> {
//! let cfg = TrainerConfig::builder()
//!     .vocab_size(10_000)
//!     .special_tokens(["<|endoftext|>"])
//!     .num_shards(8)
//!     .show_progress(false)
//!     .build()?;
//! let artifacts = Trainer::new(cfg).train_from_path("/path/to/corpus.txt")?;
//! artifacts.model.save("vocab.json", "merges.txt")?;
//!
//! let tokenizer = Tokenizer::from_files("vocab.json", "merges.txt", &["<|endoftext|>"])?;
//! let ids = tokenizer.encode("Hello world<|endoftext|>")?;
//! assert_eq!(tokenizer.decode(&ids), "Hello world<|endoftext|>");
//! # Ok(())
//! # }
//! ```
//!
//! The CLI is enabled by default through the `cli` feature.  Users targeting the
//! library portion only can disable default features to avoid the CLI
//! dependencies: `textbpe = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod boundaries;
pub mod bytes;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pretokenize;
pub mod serialization;
pub mod tokenizer;
pub mod trainer;

pub use config::{PairCounting, TrainerBuilder, TrainerConfig};
pub use error::{BpeError, Result};
pub use metrics::{IterationMetrics, StopReason, TrainingMetrics};
pub use model::{BpeModel, MergeRule, TokenId, Vocabulary};
pub use pretokenize::{FrequencyTable, PreToken, PreTokenizer};
pub use tokenizer::{EncodeIter, Tokenizer};
pub use trainer::{Trainer, TrainerArtifacts};
