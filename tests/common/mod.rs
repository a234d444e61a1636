#![allow(dead_code)]

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::Connection;
use topic_index::store::inverted::IndexEntry;
use topic_index::strategy::StrategyResult;
use topic_index::{
    Chunker, Clusterer, Embedder, Pipeline, PipelineConfig, StrategyError, TopicVector, TrainingSource,
};

/// Whole text as a single chunk
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeTextChunker;

impl Chunker for WholeTextChunker {
    fn name(&self) -> String {
        "whole".to_string()
    }

    fn chunk(&self, text: &str) -> StrategyResult<Vec<String>> {
        Ok(vec![text.to_string()])
    }
}

/// Embeds each chunk as `[char count]`
#[derive(Debug, Default)]
pub struct LenEmbedder {
    pub calls: AtomicUsize,
}

impl Embedder for LenEmbedder {
    fn name(&self) -> String {
        "len".to_string()
    }

    fn embed(&self, chunks: &[String]) -> StrategyResult<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(chunks.iter().map(|c| vec![c.chars().count() as f32]).collect())
    }
}

/// Delegates to `inner` but fails the embed call with index `fail_on`
pub struct FailingEmbedder<E> {
    pub inner: E,
    pub fail_on: usize,
    pub calls: AtomicUsize,
}

impl<E> FailingEmbedder<E> {
    pub fn new(inner: E, fail_on: usize) -> Self {
        Self { inner, fail_on, calls: AtomicUsize::new(0) }
    }
}

impl<E: Embedder> Embedder for FailingEmbedder<E> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn embed(&self, chunks: &[String]) -> StrategyResult<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(StrategyError::failed("injected embedder crash"));
        }
        self.inner.embed(chunks)
    }
}

/// Puts every vector into bucket `floor(sum * 100) % k`
/// Keeps no centers, so a restart has to retrain it
pub struct BucketClusterer {
    pub k: usize,
    pub source: Option<Rc<dyn TrainingSource>>,
    pub trained: bool,
    pub trainings: Rc<Cell<usize>>,
}

impl BucketClusterer {
    pub fn new(k: usize) -> Self {
        Self { k, source: None, trained: false, trainings: Rc::new(Cell::new(0)) }
    }
}

impl Clusterer for BucketClusterer {
    fn name(&self) -> String {
        "bucket".to_string()
    }

    fn topic_count(&self) -> usize {
        self.k
    }

    fn accept_training_source(&mut self, source: Rc<dyn TrainingSource>) {
        self.source = Some(source);
    }

    fn train(&mut self) -> StrategyResult<()> {
        let source = self.source.as_ref().ok_or(StrategyError::MissingTrainingSource)?;
        source.epoch_sample(0, 10)?;
        self.trainings.set(self.trainings.get() + 1);
        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector> {
        if !self.trained {
            return Err(StrategyError::NotTrained);
        }
        let mut topics = TopicVector::zeros(self.k);
        for vector in vectors {
            let sum: f32 = vector.iter().sum();
            topics.set(((sum * 100.0) as usize) % self.k);
        }
        Ok(topics)
    }
}

/// Classifies by looking up the first component of each vector
/// Unknown keys set no topic
pub struct LookupClusterer {
    pub k: usize,
    pub table: HashMap<u32, Vec<u8>>,
    pub trained: bool,
}

impl LookupClusterer {
    pub fn new(k: usize, table: Vec<(u32, Vec<u8>)>) -> Self {
        Self { k, table: table.into_iter().collect(), trained: false }
    }
}

impl Clusterer for LookupClusterer {
    fn name(&self) -> String {
        "lookup".to_string()
    }

    fn topic_count(&self) -> usize {
        self.k
    }

    fn accept_training_source(&mut self, _source: Rc<dyn TrainingSource>) {}

    fn train(&mut self) -> StrategyResult<()> {
        self.trained = true;
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector> {
        let mut topics = TopicVector::zeros(self.k);
        for vector in vectors {
            let key = vector.first().copied().unwrap_or_default() as u32;
            if let Some(bits) = self.table.get(&key) {
                for topic in TopicVector::from_bits(bits).active_topics() {
                    topics.set(topic);
                }
            }
        }
        Ok(topics)
    }
}

/// Delegates to `inner` but fails the classify call with index `fail_on`
pub struct FailingClassifier<K> {
    pub inner: K,
    pub fail_on: usize,
    pub calls: Cell<usize>,
}

impl<K> FailingClassifier<K> {
    pub fn new(inner: K, fail_on: usize) -> Self {
        Self { inner, fail_on, calls: Cell::new(0) }
    }
}

impl<K: Clusterer> Clusterer for FailingClassifier<K> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn topic_count(&self) -> usize {
        self.inner.topic_count()
    }

    fn accept_training_source(&mut self, source: Rc<dyn TrainingSource>) {
        self.inner.accept_training_source(source)
    }

    fn train(&mut self) -> StrategyResult<()> {
        self.inner.train()
    }

    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        if call == self.fail_on {
            return Err(StrategyError::failed("injected classifier crash"));
        }
        self.inner.classify(vectors)
    }

    fn centers(&self) -> Option<Vec<Vec<f32>>> {
        self.inner.centers()
    }

    fn restore_centers(&mut self, centers: Vec<Vec<f32>>) -> StrategyResult<bool> {
        self.inner.restore_centers(centers)
    }
}

/// Delegates to `inner` but every `train` call fails
pub struct FailingTrainer<K> {
    pub inner: K,
}

impl<K: Clusterer> Clusterer for FailingTrainer<K> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn topic_count(&self) -> usize {
        self.inner.topic_count()
    }

    fn accept_training_source(&mut self, source: Rc<dyn TrainingSource>) {
        self.inner.accept_training_source(source)
    }

    fn train(&mut self) -> StrategyResult<()> {
        Err(StrategyError::failed("injected training crash"))
    }

    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector> {
        self.inner.classify(vectors)
    }
}

pub fn small_batches(trial: &str) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.trial_name = trial.to_string();
    config.batch.embeddings = 2;
    config.batch.results = 2;
    config.batch.indexing = 2;
    config.batch.training = 2;
    config.strategies.topic_count = 3;
    config.strategies.embedding_dimension = 32;
    config.strategies.epochs = 3;
    config.shuffle_seed = 11;
    config
}

pub fn corpus() -> Vec<&'static str> {
    vec![
        "The cat sat on the mat. It purred loudly.",
        "Interest rates rose again. Bond yields followed. Stocks slid.",
        "A kitten chased a ball of yarn.",
        "Central banks raised rates to fight inflation.",
        "Dogs and cats can live together! They often nap. Sometimes they play.",
        "Markets rallied after the earnings report.",
        "The tabby cat slept all afternoon.",
    ]
}

/// Comparable snapshot of every per-trial table
#[derive(Debug, PartialEq)]
pub struct Snapshot {
    pub embeddings: Vec<(u64, u64, usize, usize, Vec<f32>)>,
    pub results: Vec<(u64, TopicVector)>,
    pub index: Vec<IndexEntry>,
}

pub fn snapshot<C: Chunker, E: Embedder, K: Clusterer>(pipeline: &Pipeline<'_, C, E, K>) -> Snapshot {
    let conn: &Connection = pipeline.connection();
    let stores = pipeline.stores();
    Snapshot {
        embeddings: stores
            .embeddings
            .all(conn)
            .unwrap()
            .into_iter()
            .map(|e| (e.id, e.document_id, e.chunk_index, e.total_chunks, e.vector))
            .collect(),
        results: stores.results.all(conn).unwrap().into_iter().map(|r| (r.document_id, r.topics)).collect(),
        index: stores.index.entries(conn).unwrap(),
    }
}
