//! Pluggable chunking, embedding and clustering strategies.
//!
//! The orchestrator only talks to these traits. Reference implementations
//! live in the submodules.

pub mod chunking;
pub mod hash_embedder;
pub mod kmeans;

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrategyError};
use crate::store::embeddings::{Embedding, EpochBatch};

pub type StrategyResult<T> = std::result::Result<T, StrategyError>;

/// Splits a document into an ordered list of sub-units
/// Must be a pure function of its input
pub trait Chunker: Send + Sync {
    /// Stable name, part of the derived table names
    fn name(&self) -> String;
    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>>;
}

/// Maps sub-units to fixed-length vectors, one per input and in input order
pub trait Embedder: Send + Sync {
    fn name(&self) -> String;
    fn embed(&self, chunks: &[String]) -> StrategyResult<Vec<Vec<f32>>>;
}

impl<T: Chunker + ?Sized> Chunker for &T {
    fn name(&self) -> String {
        (**self).name()
    }

    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>> {
        (**self).chunk(text)
    }
}

impl<T: Embedder + ?Sized> Embedder for &T {
    fn name(&self) -> String {
        (**self).name()
    }

    fn embed(&self, chunks: &[String]) -> StrategyResult<Vec<Vec<f32>>> {
        (**self).embed(chunks)
    }
}

/// Learns `topic_count` topics and classifies embedding sets into topic vectors
pub trait Clusterer {
    fn name(&self) -> String;

    /// Declared dimensionality of every topic vector
    fn topic_count(&self) -> usize;

    /// Handle the strategy samples its training data from
    fn accept_training_source(&mut self, source: Rc<dyn TrainingSource>);

    /// Train on the accepted source
    /// Fails with `MissingTrainingSource` when no source was accepted
    fn train(&mut self) -> StrategyResult<()>;

    fn is_trained(&self) -> bool;

    /// Classify all chunk embeddings of one document
    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector>;

    /// Learned centers, for centroid-based strategies
    fn centers(&self) -> Option<Vec<Vec<f32>>> {
        None
    }

    /// Restore previously exported centers
    /// Returns `Ok(false)` when the strategy cannot be restored this way
    fn restore_centers(&mut self, _centers: Vec<Vec<f32>>) -> StrategyResult<bool> {
        Ok(false)
    }
}

/// Read-capable view over stored embeddings, handed to clusterers for training
pub trait TrainingSource {
    /// Page of the epoch sample starting at row id `start_id`
    fn epoch_batch(&self, epoch: u64, start_id: u64, batch_size: usize) -> Result<EpochBatch>;

    /// Number of documents contributing to each epoch
    fn document_count(&self) -> Result<u64>;

    /// Whole epoch sample, paged `batch_size` rows at a time
    fn epoch_sample(&self, epoch: u64, batch_size: usize) -> Result<Vec<Embedding>> {
        let mut sample = Vec::new();
        let mut start_id = 0;
        loop {
            let batch = self.epoch_batch(epoch, start_id, batch_size.max(1))?;
            match batch.last_id {
                Some(last_id) => {
                    start_id = last_id + 1;
                    sample.extend(batch.embeddings);
                }
                None => break,
            }
        }
        Ok(sample)
    }
}

/// Binary topic membership, one flag per topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicVector {
    bits: Vec<bool>,
}

impl TopicVector {
    pub fn new(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    /// All topics unset
    pub fn zeros(topic_count: usize) -> Self {
        Self { bits: vec![false; topic_count] }
    }

    /// Build from 0/1 values, any non-zero value counts as set
    pub fn from_bits(bits: &[u8]) -> Self {
        Self { bits: bits.iter().map(|&b| b != 0).collect() }
    }

    pub fn as_bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set(&mut self, topic_id: usize) {
        if let Some(bit) = self.bits.get_mut(topic_id) {
            *bit = true;
        }
    }

    pub fn is_set(&self, topic_id: usize) -> bool {
        self.bits.get(topic_id).copied().unwrap_or(false)
    }

    /// Ids of the set topics, ascending
    pub fn active_topics(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, &set)| set.then_some(i))
            .collect()
    }
}
