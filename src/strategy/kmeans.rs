//! K-means topic learning over debiased epoch samples.
//!
//! # Algorithm
//!
//! 1. Seed `k` centers with k-means++ on the epoch-0 sample
//! 2. For every epoch, stream that epoch's sample page by page and assign
//!    each vector to its nearest center
//! 3. At the epoch boundary replace the whole center set with the cluster
//!    means; an empty cluster keeps its previous center
//!
//! Each document contributes exactly one vector per epoch, so long documents
//! do not pull the centers towards themselves.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result, StrategyError};
use crate::strategy::{Clusterer, StrategyResult, TopicVector, TrainingSource};

/// Configuration for k-means training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Number of topics
    pub k: usize,
    /// Passes over the debiased sample, each pass uses the next epoch
    pub epochs: u64,
    /// Rows fetched per training page
    pub batch_size: usize,
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(k: usize, epochs: u64, batch_size: usize, seed: u64) -> Result<Self> {
        if k == 0 {
            return Err(PipelineError::InvalidArgument("k must be > 0".to_string()));
        }
        if epochs == 0 {
            return Err(PipelineError::InvalidArgument("epochs must be > 0".to_string()));
        }
        if batch_size == 0 {
            return Err(PipelineError::InvalidArgument("training batch size must be > 0".to_string()));
        }
        Ok(Self { k, epochs, batch_size, seed })
    }

    pub fn from_pipeline(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.strategies.topic_count,
            config.strategies.epochs,
            config.batch.training,
            config.strategies.seed,
        )
    }
}

pub struct KMeansClusterer {
    config: KMeansConfig,
    source: Option<Rc<dyn TrainingSource>>,
    centers: Option<Vec<Vec<f32>>>,
}

impl KMeansClusterer {
    pub fn new(config: KMeansConfig) -> Self {
        Self { config, source: None, centers: None }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self::new(KMeansConfig::from_pipeline(config)?))
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    /// One pass over the sample of `epoch`
    fn run_epoch(&self, source: &dyn TrainingSource, epoch: u64, centers: &[Vec<f32>]) -> StrategyResult<Vec<Vec<f32>>> {
        let dimension = centers.first().map_or(0, Vec::len);
        let mut sums = vec![vec![0.0f32; dimension]; centers.len()];
        let mut counts = vec![0usize; centers.len()];

        let mut start_id = 0;
        loop {
            let batch = source.epoch_batch(epoch, start_id, self.config.batch_size)?;
            let Some(last_id) = batch.last_id else { break };
            for embedding in &batch.embeddings {
                let vector = check_dimension(&embedding.vector, dimension)?;
                let nearest = nearest_center(centers, vector);
                counts[nearest] += 1;
                for (s, v) in sums[nearest].iter_mut().zip(vector) {
                    *s += v;
                }
            }
            start_id = last_id + 1;
        }

        Ok(sums
            .into_iter()
            .zip(counts)
            .zip(centers)
            .map(|((mut sum, count), old)| {
                if count == 0 {
                    return old.clone();
                }
                for s in sum.iter_mut() {
                    *s /= count as f32;
                }
                sum
            })
            .collect())
    }
}

impl Clusterer for KMeansClusterer {
    /// Every setting that changes the learned centers is part of the name
    fn name(&self) -> String {
        format!("kmeans-x{}-e{}-s{}", self.config.k, self.config.epochs, self.config.seed)
    }

    fn topic_count(&self) -> usize {
        self.config.k
    }

    fn accept_training_source(&mut self, source: Rc<dyn TrainingSource>) {
        self.source = Some(source);
    }

    fn train(&mut self) -> StrategyResult<()> {
        if self.centers.is_some() {
            return Ok(());
        }
        let source = self.source.clone().ok_or(StrategyError::MissingTrainingSource)?;

        let sample: Vec<Vec<f32>> = source
            .epoch_sample(0, self.config.batch_size)?
            .into_iter()
            .map(|e| e.vector)
            .collect();
        if sample.is_empty() {
            return Err(StrategyError::failed("no embeddings to train on"));
        }
        let dimension = sample[0].len();
        for vector in &sample {
            check_dimension(vector, dimension)?;
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut centers = kmeans_plus_plus_init(&sample, self.config.k, &mut rng);
        for epoch in 0..self.config.epochs {
            centers = self.run_epoch(&*source, epoch, &centers)?;
            debug!(epoch, clusterer = %self.name(), "k-means epoch finished");
        }
        self.centers = Some(centers);
        Ok(())
    }

    fn is_trained(&self) -> bool {
        self.centers.is_some()
    }

    fn classify(&self, vectors: &[Vec<f32>]) -> StrategyResult<TopicVector> {
        let centers = self.centers.as_ref().ok_or(StrategyError::NotTrained)?;
        let dimension = centers.first().map_or(0, Vec::len);
        let mut topics = TopicVector::zeros(self.config.k);
        for vector in vectors {
            topics.set(nearest_center(centers, check_dimension(vector, dimension)?));
        }
        Ok(topics)
    }

    fn centers(&self) -> Option<Vec<Vec<f32>>> {
        self.centers.clone()
    }

    fn restore_centers(&mut self, centers: Vec<Vec<f32>>) -> StrategyResult<bool> {
        if centers.len() != self.config.k {
            return Err(StrategyError::failed(format!(
                "expected {} centers, got {}",
                self.config.k,
                centers.len()
            )));
        }
        let dimension = centers.first().map_or(0, Vec::len);
        if dimension == 0 || centers.iter().any(|c| c.len() != dimension) {
            return Err(StrategyError::failed("stored centers have inconsistent dimensions"));
        }
        self.centers = Some(centers);
        Ok(true)
    }
}

fn check_dimension(vector: &[f32], dimension: usize) -> StrategyResult<&[f32]> {
    if vector.len() != dimension {
        return Err(StrategyError::failed(format!(
            "vector has dimension {}, expected {dimension}",
            vector.len()
        )));
    }
    Ok(vector)
}

fn distance_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the closest center, lowest index on ties
fn nearest_center(centers: &[Vec<f32>], vector: &[f32]) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (i, center) in centers.iter().enumerate() {
        let d = distance_squared(center, vector);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// k-means++ seeding: the next center is drawn with probability proportional
/// to its squared distance from the closest chosen center
/// When every point already coincides with a center, a uniform draw fills the rest
fn kmeans_plus_plus_init(sample: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centers = Vec::with_capacity(k);
    centers.push(sample[rng.random_range(0..sample.len())].clone());
    let mut min_distances = vec![f32::INFINITY; sample.len()];

    while centers.len() < k {
        if let Some(last) = centers.last() {
            for (d, vector) in min_distances.iter_mut().zip(sample) {
                *d = d.min(distance_squared(vector, last));
            }
        }
        let total: f32 = min_distances.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f32>() * total;
            let mut chosen = sample.len() - 1;
            for (i, &d) in min_distances.iter().enumerate() {
                if d > 0.0 && target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.random_range(0..sample.len())
        };
        centers.push(sample[next].clone());
    }
    centers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::embeddings::{Embedding, EpochBatch};

    /// In-memory source, each document given as its list of chunk vectors
    struct VecSource {
        rows: Vec<Embedding>,
    }

    impl VecSource {
        fn new(documents: Vec<Vec<Vec<f32>>>) -> Self {
            let mut rows = Vec::new();
            for (document_id, chunks) in documents.into_iter().enumerate() {
                let total_chunks = chunks.len();
                for (chunk_index, vector) in chunks.into_iter().enumerate() {
                    rows.push(Embedding {
                        id: rows.len() as u64 + 1,
                        document_id: document_id as u64,
                        chunk_index,
                        total_chunks,
                        vector,
                    });
                }
            }
            Self { rows }
        }
    }

    impl TrainingSource for VecSource {
        fn epoch_batch(&self, epoch: u64, start_id: u64, batch_size: usize) -> Result<EpochBatch> {
            let embeddings: Vec<Embedding> = self
                .rows
                .iter()
                .filter(|e| e.id >= start_id && e.chunk_index as u64 == epoch % e.total_chunks as u64)
                .take(batch_size)
                .cloned()
                .collect();
            Ok(EpochBatch { last_id: embeddings.last().map(|e| e.id), embeddings })
        }

        fn document_count(&self) -> Result<u64> {
            Ok(self.rows.iter().filter(|e| e.chunk_index == 0).count() as u64)
        }
    }

    fn two_blobs() -> VecSource {
        VecSource::new(vec![
            vec![vec![0.0, 0.0], vec![0.1, 0.0]],
            vec![vec![0.0, 0.1]],
            vec![vec![10.0, 10.0], vec![10.1, 10.0], vec![9.9, 10.0]],
            vec![vec![10.0, 9.9]],
        ])
    }

    fn trained(k: usize) -> KMeansClusterer {
        let mut clusterer = KMeansClusterer::new(KMeansConfig::new(k, 4, 2, 7).unwrap());
        clusterer.accept_training_source(Rc::new(two_blobs()));
        clusterer.train().unwrap();
        clusterer
    }

    #[test]
    fn train_without_source_is_a_configuration_conflict() {
        let mut clusterer = KMeansClusterer::new(KMeansConfig::new(2, 1, 10, 0).unwrap());
        let err = clusterer.train().unwrap_err();
        assert!(matches!(err, StrategyError::MissingTrainingSource));
        assert!(matches!(PipelineError::from(err), PipelineError::ConfigurationConflict(_)));
        assert!(matches!(clusterer.classify(&[vec![1.0, 1.0]]), Err(StrategyError::NotTrained)));
    }

    #[test]
    fn separates_distinct_groups() {
        let clusterer = trained(2);
        assert!(clusterer.is_trained());
        let low = clusterer.classify(&[vec![0.05, 0.05]]).unwrap();
        let high = clusterer.classify(&[vec![10.0, 10.0]]).unwrap();
        assert_eq!(low.active_topics().len(), 1);
        assert_eq!(high.active_topics().len(), 1);
        assert_ne!(low, high);

        let both = clusterer.classify(&[vec![0.0, 0.0], vec![10.0, 10.0]]).unwrap();
        assert_eq!(both.active_topics(), vec![0, 1]);
        assert!(clusterer.classify(&[]).unwrap().active_topics().is_empty());
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        assert_eq!(trained(3).centers(), trained(3).centers());
        assert_eq!(trained(3).centers().unwrap().len(), 3);
    }

    #[test]
    fn more_topics_than_samples_still_yields_k_centers() {
        let mut clusterer = KMeansClusterer::new(KMeansConfig::new(6, 2, 10, 1).unwrap());
        clusterer.accept_training_source(Rc::new(VecSource::new(vec![vec![vec![1.0]], vec![vec![2.0]]])));
        clusterer.train().unwrap();
        assert_eq!(clusterer.centers().unwrap().len(), 6);
        assert_eq!(clusterer.classify(&[vec![1.0]]).unwrap().len(), 6);
    }

    #[test]
    fn restore_round_trips_exported_centers() {
        let source = trained(2);
        let mut restored = KMeansClusterer::new(source.config().clone());
        assert!(!restored.is_trained());
        assert!(restored.restore_centers(source.centers().unwrap()).unwrap());
        assert!(restored.is_trained());
        assert_eq!(
            restored.classify(&[vec![10.0, 10.0]]).unwrap(),
            source.classify(&[vec![10.0, 10.0]]).unwrap()
        );
        assert!(restored.restore_centers(vec![vec![1.0]]).is_err());
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let clusterer = trained(2);
        assert!(matches!(clusterer.classify(&[vec![1.0]]), Err(StrategyError::Failed(_))));
    }

    #[test]
    fn empty_source_fails_upstream() {
        let mut clusterer = KMeansClusterer::new(KMeansConfig::new(2, 1, 10, 0).unwrap());
        clusterer.accept_training_source(Rc::new(VecSource::new(Vec::new())));
        assert!(matches!(clusterer.train(), Err(StrategyError::Failed(_))));
        assert!(KMeansConfig::new(0, 1, 1, 0).is_err());
        assert!(KMeansConfig::new(1, 0, 1, 0).is_err());
    }

    #[test]
    fn name_tracks_every_training_setting() {
        let name = |k, epochs, seed| KMeansClusterer::new(KMeansConfig::new(k, epochs, 10, seed).unwrap()).name();
        assert_eq!(name(3, 10, 0), "kmeans-x3-e10-s0");
        assert_ne!(name(3, 10, 0), name(3, 10, 1));
        assert_ne!(name(3, 10, 0), name(3, 5, 0));
        // page size does not change the result
        assert_eq!(
            KMeansClusterer::new(KMeansConfig::new(3, 10, 1, 0).unwrap()).name(),
            KMeansClusterer::new(KMeansConfig::new(3, 10, 99, 0).unwrap()).name()
        );
    }
}
