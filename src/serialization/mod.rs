//! Helpers for persisting vocabularies and merge lists.

pub mod files;

pub use files::{load_merges, load_vocab, save_merges, save_vocab};
