//! Stage state machine and checkpointed batch loops.
//!
//! Every batch runs inside one SQLite transaction that also carries the new
//! checkpoint. A failure drops the transaction, which rolls the batch back,
//! so re-running the pipeline resumes at the last committed checkpoint.

pub mod query;

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, StrategyError};
use crate::store::centers::CenterStore;
use crate::store::documents::{Document, DocumentStore};
use crate::store::embeddings::{EmbeddingSampler, EmbeddingStore};
use crate::store::inverted::InvertedIndexStore;
use crate::store::metadata::{MetadataStore, Stage, TrialRecord};
use crate::store::results::ResultStore;
use crate::store::TableNames;
use crate::strategy::{Chunker, Clusterer, Embedder, TopicVector, TrainingSource};

/// Stores used by one trial
#[derive(Debug, Clone)]
pub struct Stores {
    pub metadata: MetadataStore,
    pub documents: DocumentStore,
    pub embeddings: EmbeddingStore,
    pub centers: CenterStore,
    pub results: ResultStore,
    pub index: InvertedIndexStore,
}

/// Pipeline orchestrator
///
/// Owns the three strategies and drives
/// `GeneratingEmbeddings -> LearningTopics -> ComputingResults -> Indexing -> Done`.
/// Batches are processed strictly one after another; parallelism only
/// happens inside a batch before its commit.
pub struct Pipeline<'a, C, E, K> {
    conn: Rc<Connection>,
    config: &'a PipelineConfig,
    chunker: C,
    embedder: E,
    clusterer: K,
    tables: TableNames,
    stores: Stores,
}

impl<'a, C, E, K> Pipeline<'a, C, E, K>
where
    C: Chunker,
    E: Embedder,
    K: Clusterer,
{
    /// Create every table and the trial row, or attach to an existing trial
    pub fn open(conn: Rc<Connection>, config: &'a PipelineConfig, chunker: C, embedder: E, clusterer: K) -> Result<Self> {
        config.validate()?;
        let tables = TableNames::derive(&chunker.name(), &embedder.name(), &clusterer.name());
        let stores = Stores {
            metadata: MetadataStore::open(&conn, &config.trial_name, &tables)?,
            documents: DocumentStore::open(&conn)?,
            embeddings: EmbeddingStore::open(&conn, &tables.embeddings)?,
            centers: CenterStore::open(&conn, &tables.centers, &config.trial_name)?,
            results: ResultStore::open(&conn, &tables.results)?,
            index: InvertedIndexStore::open(&conn, &tables.index)?,
        };
        info!(trial = %config.trial_name, tables = ?tables, "pipeline opened");
        Ok(Self { conn, config, chunker, embedder, clusterer, tables, stores })
    }

    pub fn connection(&self) -> &Rc<Connection> {
        &self.conn
    }

    pub fn config(&self) -> &PipelineConfig {
        self.config
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn clusterer(&self) -> &K {
        &self.clusterer
    }

    pub fn stage(&self) -> Result<Stage> {
        self.stores.metadata.current_stage(&self.conn)
    }

    pub fn status(&self) -> Result<TrialRecord> {
        self.stores.metadata.record(&self.conn)
    }

    /// Append documents with dense ids in one transaction
    pub fn ingest<I, S>(&self, texts: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stores.documents.ingest(&self.conn, texts)
    }

    /// Run from the persisted checkpoint until `Done`
    pub fn run(&mut self) -> Result<()> {
        self.stores.metadata.update_topic_count(&self.conn, self.clusterer.topic_count())?;
        loop {
            let stage = self.stage()?;
            info!(trial = %self.config.trial_name, stage = %stage, "entering stage");
            match stage {
                Stage::GeneratingEmbeddings => self.generate_embeddings()?,
                Stage::LearningTopics => self.learn_topics()?,
                Stage::ComputingResults => {
                    self.restore_clusterer()?;
                    self.compute_results()?
                }
                Stage::Indexing => self.build_index()?,
                Stage::Done => return Ok(()),
            }
        }
    }

    fn generate_embeddings(&mut self) -> Result<()> {
        let Stores { metadata, documents, .. } = &self.stores;
        loop {
            let index = metadata.current_index(&self.conn)?;
            let batch = documents.batch(&self.conn, index, self.config.batch.embeddings)?;
            let tx = self.conn.unchecked_transaction()?;
            if batch.is_empty() {
                metadata.update_document_count(&tx, index)?;
                metadata.update_stage(&tx, Stage::LearningTopics)?;
                tx.commit()?;
                info!(trial = %self.config.trial_name, document_count = index, "embeddings generated");
                return Ok(());
            }
            self.embed_batch(&tx, index, &batch)?;
            let next = index + batch.len() as u64;
            metadata.update_index(&tx, next)?;
            tx.commit()?;
            debug!(trial = %self.config.trial_name, index = next, batch_len = batch.len(), "embedding batch committed");
        }
    }

    /// Chunk, permute and embed one batch of documents
    fn embed_batch(&self, conn: &Connection, start: u64, batch: &[Document]) -> Result<()> {
        for (offset, document) in batch.iter().enumerate() {
            if document.id != start + offset as u64 {
                warn!(document_id = document.id, expected = start + offset as u64, "document ids are not dense");
                return Err(PipelineError::IntegrityViolation(format!(
                    "expected document {}, found {}",
                    start + offset as u64,
                    document.id
                )));
            }
        }

        let embeddings = &self.stores.embeddings;
        let mut pending = Vec::with_capacity(batch.len());
        for document in batch {
            if embeddings.has_document(conn, document.id)? {
                continue;
            }
            pending.push(document);
        }
        if pending.len() < batch.len() {
            warn!(
                table = embeddings.table(),
                reused = batch.len() - pending.len(),
                "reusing cached embeddings"
            );
        }
        if pending.is_empty() {
            return Ok(());
        }

        let chunker = &self.chunker;
        let config = self.config;
        let chunked = pending
            .par_iter()
            .map(|document| {
                let mut chunks = chunker.chunk(&document.text)?;
                if chunks.is_empty() {
                    chunks.push(document.text.clone());
                }
                if config.shuffle_chunks {
                    chunks.shuffle(&mut StdRng::seed_from_u64(chunk_seed(config.shuffle_seed, document.id)));
                }
                Ok(chunks)
            })
            .collect::<std::result::Result<Vec<Vec<String>>, StrategyError>>()?;

        let flat: Vec<String> = chunked.iter().flatten().cloned().collect();
        let vectors = self.embedder.embed(&flat)?;
        if vectors.len() != flat.len() {
            return Err(StrategyError::failed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                flat.len()
            ))
            .into());
        }

        let mut vectors = vectors.into_iter();
        for (document, chunks) in pending.iter().zip(&chunked) {
            let document_vectors: Vec<Vec<f32>> = vectors.by_ref().take(chunks.len()).collect();
            embeddings.insert_document(conn, document.id, &document_vectors)?;
        }
        Ok(())
    }

    fn learn_topics(&mut self) -> Result<()> {
        if !self.clusterer.is_trained() {
            self.train_clusterer()?;
        }
        let tx = self.conn.unchecked_transaction()?;
        if let Some(centers) = self.clusterer.centers() {
            self.stores.centers.replace_all(&tx, &centers, self.clusterer.topic_count())?;
        }
        self.stores.metadata.update_stage(&tx, Stage::ComputingResults)?;
        tx.commit()?;
        info!(trial = %self.config.trial_name, clusterer = %self.clusterer.name(), "topics learned");
        Ok(())
    }

    /// Topic count recorded for this trial, which must match the clusterer
    fn stored_topic_count(&self) -> Result<usize> {
        let declared = self.clusterer.topic_count();
        match self.stores.metadata.topic_count(&self.conn)? {
            Some(stored) if stored == declared => Ok(stored),
            Some(stored) => Err(PipelineError::ConfigurationConflict(format!(
                "trial {} has {stored} topics, clusterer {} declares {declared}",
                self.config.trial_name,
                self.clusterer.name()
            ))),
            None => Err(PipelineError::InvalidState {
                expected: Stage::Done,
                actual: self.stage()?,
            }),
        }
    }

    fn train_clusterer(&mut self) -> Result<()> {
        let source: Rc<dyn TrainingSource> =
            Rc::new(EmbeddingSampler::new(Rc::clone(&self.conn), self.stores.embeddings.clone()));
        self.clusterer.accept_training_source(source);
        info!(trial = %self.config.trial_name, clusterer = %self.clusterer.name(), "training clusterer");
        self.clusterer.train()?;
        Ok(())
    }

    /// Bring an untrained clusterer back after a restart past the learning stage
    /// Stored centers are preferred, strategies that cannot restore them retrain
    fn restore_clusterer(&mut self) -> Result<()> {
        if self.clusterer.is_trained() {
            return Ok(());
        }
        let centers = self.stores.centers.load(&self.conn)?;
        if !centers.is_empty() && self.clusterer.restore_centers(centers)? {
            info!(trial = %self.config.trial_name, "restored clusterer from stored centers");
            return Ok(());
        }
        warn!(trial = %self.config.trial_name, "clusterer state not restorable, retraining");
        self.train_clusterer()
    }

    fn compute_results(&mut self) -> Result<()> {
        let Stores { metadata, embeddings, results, .. } = &self.stores;
        let topic_count = self.clusterer.topic_count();
        let document_count = metadata.document_count(&self.conn)?;
        loop {
            let index = metadata.current_index(&self.conn)?;
            let limit = usize::try_from(document_count.saturating_sub(index))
                .map_or(self.config.batch.results, |remaining| remaining.min(self.config.batch.results));
            let groups = if limit == 0 {
                Vec::new()
            } else {
                embeddings.document_groups(&self.conn, index, limit)?
            };

            let tx = self.conn.unchecked_transaction()?;
            if groups.is_empty() {
                if index != document_count {
                    warn!(index, document_count, "results stage ended early");
                    return Err(PipelineError::IntegrityViolation(format!(
                        "computed results for {index} documents, expected {document_count}"
                    )));
                }
                metadata.update_stage(&tx, Stage::Indexing)?;
                tx.commit()?;
                info!(trial = %self.config.trial_name, document_count, "results computed");
                return Ok(());
            }

            let mut reused = 0usize;
            for (offset, group) in groups.iter().enumerate() {
                let expected = index + offset as u64;
                if group.document_id != expected {
                    warn!(document_id = group.document_id, expected, "missing embeddings for document");
                    return Err(PipelineError::IntegrityViolation(format!(
                        "no embeddings for document {expected}"
                    )));
                }
                if let Err(err) = group.check_integrity() {
                    warn!(document_id = group.document_id, "chunk count mismatch");
                    return Err(err);
                }
                // results tables are shared by every trial with the same strategies
                if let Some(cached) = results.get(&tx, group.document_id)? {
                    check_topic_width(&cached, topic_count)?;
                    reused += 1;
                    continue;
                }
                let topics = self.clusterer.classify(&group.vectors)?;
                check_topic_width(&topics, topic_count)?;
                results.upsert(&tx, group.document_id, &topics)?;
            }
            if reused > 0 {
                warn!(table = %self.tables.results, reused, "reusing cached results");
            }
            let next = index + groups.len() as u64;
            metadata.update_index(&tx, next)?;
            tx.commit()?;
            debug!(trial = %self.config.trial_name, index = next, batch_len = groups.len(), "result batch committed");
        }
    }

    fn build_index(&mut self) -> Result<()> {
        let Stores { metadata, results, index: inverted, .. } = &self.stores;
        let document_count = metadata.document_count(&self.conn)?;
        loop {
            let index = metadata.current_index(&self.conn)?;
            // a shared results table may cover documents of other trials
            let batch: Vec<_> = results
                .batch(&self.conn, index, self.config.batch.indexing)?
                .into_iter()
                .take_while(|result| result.document_id < document_count)
                .collect();
            let tx = self.conn.unchecked_transaction()?;
            let Some(last) = batch.last() else {
                metadata.update_stage(&tx, Stage::Done)?;
                tx.commit()?;
                info!(trial = %self.config.trial_name, "index built");
                return Ok(());
            };
            for result in &batch {
                inverted.add_document(&tx, result.document_id, &result.topics.active_topics())?;
            }
            let next = last.document_id + 1;
            metadata.update_index(&tx, next)?;
            tx.commit()?;
            debug!(trial = %self.config.trial_name, index = next, batch_len = batch.len(), "index batch committed");
        }
    }
}

/// A classified vector must have one flag per declared topic
fn check_topic_width(topics: &TopicVector, topic_count: usize) -> Result<()> {
    if topics.len() != topic_count {
        return Err(PipelineError::ConfigurationConflict(format!(
            "clusterer returned {} topics, declared {topic_count}",
            topics.len()
        )));
    }
    Ok(())
}

/// Per-document shuffle seed, stable across runs
fn chunk_seed(seed: u64, document_id: u64) -> u64 {
    seed ^ document_id.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
