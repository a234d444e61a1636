/// This crate is a resumable topic indexing pipeline.
/// Documents are chunked, embedded, clustered into topics and indexed by topic.
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod store;
pub mod strategy;

/// Pipeline Orchestrator
/// The top-level struct of this crate. It drives the stage state machine:
/// `GeneratingEmbeddings -> LearningTopics -> ComputingResults -> Indexing -> Done`
///
/// Internally, it holds:
/// - A shared SQLite connection
/// - The chunking, embedding and clustering strategies
/// - The stores of one trial (metadata, documents, embeddings, centers,
///   results, inverted index)
///
/// `Pipeline<C, E, K>` has the following generic parameters:
/// - `C`: Chunking strategy (e.g., SentenceChunker)
/// - `E`: Embedding strategy (e.g., HashEmbedder)
/// - `K`: Clustering strategy (e.g., KMeansClusterer)
///
/// # Resumability
/// Every batch is committed together with its checkpoint.
/// Re-running after a failure continues from the last committed batch.
pub use pipeline::Pipeline;

/// Query Results
/// - `Hits`: ranked documents of a query, most matched topics first
/// - `HitEntry`: one document with its matched topic count and relevance
pub use pipeline::query::{HitEntry, Hits};

/// Pipeline Configuration
/// Loaded from TOML, passed by reference to the orchestrator and the
/// strategy constructors.
pub use config::{BatchSizes, PipelineConfig, StrategyConfig};

/// Error types
/// - `PipelineError`: everything the orchestrator and stores report
/// - `StrategyError`: failures raised by pluggable strategies
pub use error::{PipelineError, Result, StrategyError};

/// Strategy Traits
/// Implement these to plug a different chunking, embedding or clustering
/// algorithm into `Pipeline`.
/// `TrainingSource` is the read-only handle a clusterer samples from; its
/// epoch sample holds one embedding per document per epoch.
pub use strategy::{Chunker, Clusterer, Embedder, TopicVector, TrainingSource};

/// Shipped Strategies
/// - `SentenceChunker` / `ParagraphChunker`: rule based text splitting
/// - `HashEmbedder`: FNV-1a character n-gram feature hashing
/// - `KMeansClusterer`: k-means over debiased epoch samples
pub use strategy::chunking::{ChunkingKind, ConfiguredChunker, ParagraphChunker, SentenceChunker};
pub use strategy::hash_embedder::HashEmbedder;
pub use strategy::kmeans::{KMeansClusterer, KMeansConfig};

/// Stage and checkpoint types of the metadata store
pub use store::metadata::{Checkpoint, Stage, TrialRecord};
