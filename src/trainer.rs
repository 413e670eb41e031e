//! Core training loop that learns a vocabulary and merge list from pre-token counts.

use std::time::Instant;
use std::{fmt, path::Path};

use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::config::{PairCounting, TrainerBuilder, TrainerConfig};
use crate::error::{BpeError, Result};
use crate::metrics::{sample_rss_kb_at, IterationMetrics, StopReason, TrainingMetrics};
use crate::model::{BpeModel, MergeRule, Pair, TokenId, Vocabulary};
use crate::pretokenize::{count_corpus, count_file, count_text, FrequencyTable};

mod pair_index;
mod sequence;

use pair_index::PairFrequencyIndex;
use sequence::IdSequence;

/// High-level façade configuring and executing BPE training runs.
#[derive(Debug, Clone)]
pub struct Trainer {
    cfg: TrainerConfig,
}

/// Artifacts returned after a training session completes.
#[must_use]
#[derive(Debug, Clone)]
pub struct TrainerArtifacts {
    /// Trained BPE model.
    pub model: BpeModel,
    /// Detailed metrics captured during training.
    pub metrics: TrainingMetrics,
}

impl Trainer {
    /// Creates a new trainer for the supplied configuration.
    #[must_use]
    pub fn new(cfg: TrainerConfig) -> Self {
        Self { cfg }
    }

    /// Returns a [`TrainerBuilder`] with default settings.
    #[must_use]
    pub fn builder() -> TrainerBuilder {
        TrainerConfig::builder()
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TrainerConfig {
        &self.cfg
    }

    /// Trains on a corpus file, pre-tokenizing its shards in parallel.
    pub fn train_from_path<P: AsRef<Path>>(&self, path: P) -> Result<TrainerArtifacts> {
        self.cfg.validate()?;
        let table = count_file(
            path,
            &self.cfg.special_tokens,
            self.cfg.num_shards,
            self.cfg.read_window,
        )?;
        self.train_from_frequencies(&table)
    }

    /// Trains on an in-memory corpus.
    pub fn train_from_text(&self, text: &str) -> Result<TrainerArtifacts> {
        self.cfg.validate()?;
        let table = count_text(text, &self.cfg.special_tokens)?;
        self.train_from_frequencies(&table)
    }

    /// Trains on a file when `path` is given, otherwise on `text`.
    ///
    /// Returns [`BpeError::MissingInput`] when neither is supplied.
    pub fn train_from_source(
        &self,
        path: Option<&Path>,
        text: Option<&str>,
    ) -> Result<TrainerArtifacts> {
        self.cfg.validate()?;
        let table = count_corpus(
            path,
            text,
            &self.cfg.special_tokens,
            self.cfg.num_shards,
            self.cfg.read_window,
        )?;
        self.train_from_frequencies(&table)
    }

    /// Runs the merge loop over an already aggregated pre-token frequency table.
    pub fn train_from_frequencies(&self, table: &FrequencyTable) -> Result<TrainerArtifacts> {
        self.cfg.validate()?;
        let initial = Vocabulary::with_special_tokens(&self.cfg.special_tokens)?;
        let target = self.cfg.vocab_size;
        let requested = self.cfg.requested_merges();

        let mut builder = VocabBuilder::new(&initial, table, self.cfg.pair_counting)?;
        let mut metrics = TrainingMetrics::new(requested.min(16_384));
        metrics.distinct_pretokens = table.len();
        info!(
            "training on {} distinct pre-tokens: {} reserved ids, target vocab {}",
            table.len(),
            initial.len(),
            target
        );

        let training_start = Instant::now();
        if requested == 0 {
            metrics.stop_reason = StopReason::NoMergesRequested;
        }
        let mut iteration = 0usize;
        while iteration < requested {
            let iteration_start = Instant::now();
            let Some(step) = builder.step()? else {
                metrics.stop_reason = StopReason::NoPairsRemaining;
                break;
            };
            iteration += 1;

            if self.cfg.show_progress {
                info!(
                    "iter {:>6} pair ({}, {}) -> {:>6} freq {:>8} changed {:>8} distinct_pairs {:>8} vocab {:>8}",
                    iteration,
                    step.pair.0,
                    step.pair.1,
                    step.token,
                    step.frequency,
                    step.sequences_changed,
                    builder.distinct_pairs(),
                    builder.vocab_len()
                );
            }

            metrics.iterations.push(IterationMetrics {
                iteration,
                best_frequency: step.frequency,
                sequences_changed: step.sequences_changed,
                distinct_pairs: builder.distinct_pairs(),
                new_token: step.new_token,
                elapsed_iteration: iteration_start.elapsed(),
                elapsed_total: training_start.elapsed(),
                rss_kb: sample_rss_kb_at(iteration),
            });
        }
        if iteration == requested && builder.vocab_len() < target {
            metrics.stop_reason = StopReason::MergeRoundsExhausted;
        }
        metrics.total_duration = training_start.elapsed();

        let model = builder.finish(self.cfg.special_tokens.clone())?;
        info!(
            "completed {} merges ({} reusing an existing id) in {:.2?}; vocab size {}",
            model.merges().len(),
            metrics.reused_ids(),
            metrics.total_duration,
            model.vocab_size()
        );
        Ok(TrainerArtifacts { model, metrics })
    }
}

/// Outcome of one merge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MergeStep {
    pair: Pair,
    frequency: u64,
    token: TokenId,
    new_token: bool,
    sequences_changed: usize,
}

/// Mutable training state: vocabulary under construction, id sequences and pair counts.
struct VocabBuilder {
    token_bytes: Vec<Vec<u8>>,
    ids: FxHashMap<Vec<u8>, TokenId>,
    merges: Vec<MergeRule>,
    sequences: Vec<IdSequence>,
    index: PairFrequencyIndex,
    pair_counting: PairCounting,
    previous: Vec<Vec<TokenId>>,
    changed: Vec<usize>,
}

impl VocabBuilder {
    fn new(
        initial: &Vocabulary,
        table: &FrequencyTable,
        pair_counting: PairCounting,
    ) -> Result<Self> {
        let mut entries: Vec<(&Vec<u8>, u64)> = table
            .iter()
            .filter(|&(key, &count)| key.len() > 1 && count > 0)
            .map(|(key, &count)| (key, count))
            .collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let sequences = entries
            .into_iter()
            .map(|(key, count)| {
                let ids = key
                    .iter()
                    .map(|&byte| {
                        initial.id_of(&[byte]).ok_or_else(|| {
                            BpeError::Internal(format!("byte {byte:#04x} has no vocabulary id"))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(IdSequence::new(ids, count))
            })
            .collect::<Result<Vec<_>>>()?;

        let index = PairFrequencyIndex::from_sequences(&sequences);
        Ok(Self {
            token_bytes: initial.iter().map(|(_, token)| token.to_vec()).collect(),
            ids: initial
                .iter()
                .map(|(id, token)| (token.to_vec(), id))
                .collect(),
            merges: Vec::new(),
            sequences,
            index,
            pair_counting,
            previous: Vec::new(),
            changed: Vec::new(),
        })
    }

    fn vocab_len(&self) -> usize {
        self.token_bytes.len()
    }

    fn distinct_pairs(&self) -> usize {
        self.index.len()
    }

    /// Runs one merge round. Returns `None` once no adjacent pair is left.
    ///
    /// A merge whose concatenation already has an id (reachable through two different
    /// splits, e.g. `a + bc` and `ab + c`) is recorded and applied with the existing id, so
    /// no byte string is ever assigned twice.
    fn step(&mut self) -> Result<Option<MergeStep>> {
        if self.index.is_empty() {
            return Ok(None);
        }
        let Some((pair, frequency)) = self.index.best(&self.token_bytes) else {
            return Ok(None);
        };

        let left = self.token_bytes[pair.0 as usize].clone();
        let right = self.token_bytes[pair.1 as usize].clone();
        let mut merged = Vec::with_capacity(left.len() + right.len());
        merged.extend_from_slice(&left);
        merged.extend_from_slice(&right);

        let (token, new_token) = match self.ids.get(&merged) {
            Some(&existing) => {
                debug!(
                    "merge {:?} + {:?} reuses id {existing}",
                    bstr::BStr::new(&left),
                    bstr::BStr::new(&right)
                );
                (existing, false)
            }
            None => {
                let token = TokenId::try_from(self.token_bytes.len()).map_err(|_| {
                    BpeError::Internal("vocabulary size exceeded u32::MAX".into())
                })?;
                self.ids.insert(merged.clone(), token);
                self.token_bytes.push(merged);
                (token, true)
            }
        };
        self.merges.push((left, right));

        self.previous.clear();
        self.changed.clear();
        for (idx, sequence) in self.sequences.iter_mut().enumerate() {
            if !sequence.pairs().any(|candidate| candidate == pair) {
                continue;
            }
            self.previous.push(sequence.ids().to_vec());
            sequence.merge(pair, token);
            self.changed.push(idx);
        }

        match self.pair_counting {
            PairCounting::Incremental => {
                self.index
                    .apply_merge(&self.previous, &self.sequences, &self.changed);
            }
            PairCounting::FullRecount => {
                self.index = PairFrequencyIndex::from_sequences(&self.sequences);
            }
        }

        Ok(Some(MergeStep {
            pair,
            frequency,
            token,
            new_token,
            sequences_changed: self.changed.len(),
        }))
    }

    fn finish(self, special_tokens: Vec<String>) -> Result<BpeModel> {
        let vocab = Vocabulary::new(self.token_bytes)?;
        Ok(BpeModel::new(vocab, self.merges, special_tokens))
    }
}

impl fmt::Display for TrainerArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BPE model with vocab size {}", self.model.vocab_size())?;
        writeln!(f, "Merges: {}", self.model.merges().len())?;
        writeln!(f, "Stop reason: {:?}", self.metrics.stop_reason)?;
        writeln!(f, "Total duration: {:?}", self.metrics.total_duration)?;
        Ok(())
    }
}
