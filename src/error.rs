//! Error handling utilities shared across the crate.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the crate.
pub type Result<T, E = BpeError> = std::result::Result<T, E>;

/// Domain-specific error describing failures during configuration, IO, training or tokenization.
#[derive(Debug, Error)]
pub enum BpeError {
    /// Training or tokenizer configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Pre-tokenization was requested without a file path or raw text.
    #[error("either a file path or raw text must be provided")]
    MissingInput,
    /// Filesystem IO error with optional context path.
    #[error("io error while processing {path:?}: {source}")]
    Io {
        /// Underlying IO error returned by the standard library.
        source: std::io::Error,
        /// Target path associated with the IO failure if available.
        path: Option<PathBuf>,
    },
    /// Regex compilation or matching failure raised by `fancy-regex`.
    #[error("pattern error: {0}")]
    Pattern(String),
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Catch-all variant for invariants that should not occur.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<fancy_regex::Error> for BpeError {
    fn from(err: fancy_regex::Error) -> Self {
        Self::Pattern(err.to_string())
    }
}

impl From<serde_json::Error> for BpeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl BpeError {
    /// Helper constructor that attaches an optional path when wrapping IO errors.
    pub fn io(source: std::io::Error, path: Option<PathBuf>) -> Self {
        Self::Io { source, path }
    }

    /// Returns the underlying IO error when this error originated from the filesystem.
    #[must_use]
    pub fn io_source(&self) -> Option<&std::io::Error> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn io_errors_keep_their_kind() {
        let err = BpeError::io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            Some(PathBuf::from("corpus.txt")),
        );
        assert_eq!(
            err.io_source().map(io::Error::kind),
            Some(io::ErrorKind::NotFound)
        );
        assert!(err.to_string().contains("corpus.txt"));
    }

    #[test]
    fn non_io_errors_have_no_source() {
        assert!(BpeError::MissingInput.io_source().is_none());
    }
}
