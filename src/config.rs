//! Pipeline configuration, loaded from TOML.
//!
//! ```toml
//! database_path = "topics.sqlite3"
//! trial_name = "baseline"
//! shuffle_seed = 7
//!
//! [batch]
//! embeddings = 500
//!
//! [strategies]
//! chunking = "paragraph"
//! topic_count = 12
//!
//! [log]
//! level = "debug"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::logging::LogConfig;
use crate::strategy::chunking::ChunkingKind;

const DEFAULT_BATCH_SIZE: usize = 1000;

/// Rows or documents handled per committed batch, per stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizes {
    pub embeddings: usize,
    pub results: usize,
    pub indexing: usize,
    /// Page size of training samples
    pub training: usize,
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            embeddings: DEFAULT_BATCH_SIZE,
            results: DEFAULT_BATCH_SIZE,
            indexing: DEFAULT_BATCH_SIZE,
            training: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Parameters of the shipped strategies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub chunking: ChunkingKind,
    pub embedding_dimension: usize,
    pub topic_count: usize,
    pub epochs: u64,
    pub seed: u64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { chunking: ChunkingKind::Sentence, embedding_dimension: 128, topic_count: 8, epochs: 10, seed: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,
    pub trial_name: String,
    pub batch: BatchSizes,
    /// Permute each document's chunks before embedding
    pub shuffle_chunks: bool,
    pub shuffle_seed: u64,
    pub strategies: StrategyConfig,
    pub log: LogConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("topic-index.sqlite3"),
            trial_name: "default".to_string(),
            batch: BatchSizes::default(),
            shuffle_chunks: true,
            shuffle_seed: 0,
            strategies: StrategyConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trial_name.trim().is_empty() {
            return Err(PipelineError::InvalidArgument("trial_name must not be empty".to_string()));
        }
        let batches = [
            ("batch.embeddings", self.batch.embeddings),
            ("batch.results", self.batch.results),
            ("batch.indexing", self.batch.indexing),
            ("batch.training", self.batch.training),
            ("strategies.embedding_dimension", self.strategies.embedding_dimension),
            ("strategies.topic_count", self.strategies.topic_count),
        ];
        if let Some((field, _)) = batches.iter().find(|(_, value)| *value == 0) {
            return Err(PipelineError::InvalidArgument(format!("{field} must be > 0")));
        }
        if self.strategies.epochs == 0 {
            return Err(PipelineError::InvalidArgument("strategies.epochs must be > 0".to_string()));
        }
        Ok(())
    }
}
