//! Metrics describing the evolution of the training process.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Merge rounds between two resident set size samples.
pub const RSS_SAMPLE_INTERVAL: usize = 64;

/// Reason a training run terminated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StopReason {
    /// The configured vocabulary size was reached.
    TargetVocabReached,
    /// Every merge round allowed by the vocabulary size ran, but some merges reused an
    /// existing id so the vocabulary ended below the target.
    MergeRoundsExhausted,
    /// Every sequence collapsed to a single symbol before the target was reached.
    NoPairsRemaining,
    /// The vocabulary size left no room for merges.
    NoMergesRequested,
}

/// Metrics captured for each merge round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationMetrics {
    /// Sequential round number (1-indexed).
    pub iteration: usize,
    /// Frequency of the pair merged in this round.
    pub best_frequency: u64,
    /// Number of distinct id sequences rewritten by the merge.
    pub sequences_changed: usize,
    /// Count of distinct pairs remaining after the round.
    pub distinct_pairs: usize,
    /// Whether the merge added a vocabulary entry or reused an existing id.
    pub new_token: bool,
    /// Execution time for the round.
    pub elapsed_iteration: Duration,
    /// Total time elapsed since the merge loop started.
    pub elapsed_total: Duration,
    /// Resident set size, sampled on the first round and every
    /// [`RSS_SAMPLE_INTERVAL`] rounds after it.
    pub rss_kb: Option<usize>,
}

/// Aggregate metrics produced by a training session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingMetrics {
    /// Number of distinct pre-tokens the merge loop started from.
    pub distinct_pretokens: usize,
    /// Per-round snapshots accrued during training.
    pub iterations: Vec<IterationMetrics>,
    /// Total duration of the merge loop.
    pub total_duration: Duration,
    /// Reason training terminated.
    pub stop_reason: StopReason,
}

impl TrainingMetrics {
    /// Creates an empty metrics container with pre-allocated capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            distinct_pretokens: 0,
            iterations: Vec::with_capacity(capacity),
            total_duration: Duration::ZERO,
            stop_reason: StopReason::TargetVocabReached,
        }
    }

    /// Number of rounds whose merge reused an id that already existed.
    #[must_use]
    pub fn reused_ids(&self) -> usize {
        self.iterations.iter().filter(|it| !it.new_token).count()
    }

    /// Largest resident set size sampled during the run.
    #[must_use]
    pub fn peak_rss_kb(&self) -> Option<usize> {
        self.iterations.iter().filter_map(|it| it.rss_kb).max()
    }
}

/// Samples RSS when `iteration` (1-indexed) falls on the sampling interval.
pub fn sample_rss_kb_at(iteration: usize) -> Option<usize> {
    if iteration % RSS_SAMPLE_INTERVAL == 1 {
        sample_rss_kb()
    } else {
        None
    }
}

/// Extracts the `VmRSS` value (in KiB) from the text of `/proc/<pid>/status`.
fn parse_vm_rss(status: &str) -> Option<usize> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| {
            rest.split_whitespace()
                .find_map(|part| part.parse::<usize>().ok())
        })
}

#[cfg(target_os = "linux")]
fn current_rss_kb() -> Option<usize> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn current_rss_kb() -> Option<usize> {
    None
}

/// Samples the current resident set size (RSS) on supported platforms.
pub fn sample_rss_kb() -> Option<usize> {
    current_rss_kb()
}
