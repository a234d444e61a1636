use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, seq::IndexedRandom, Rng, SeedableRng};
use rusqlite::Connection;
use topic_index::{
    pipeline::query::rank_by_multiplicity, store::inverted::IndexEntry, HashEmbedder, KMeansClusterer, Pipeline,
    PipelineConfig, SentenceChunker,
};

const WORDS: &[&str] = &[
    "market", "rates", "inflation", "bond", "yield", "cat", "kitten", "dog", "yarn", "nap", "river", "boat",
    "harbor", "storm", "tide", "engine", "piston", "fuel", "garden", "tomato", "seed", "soil",
];

fn synthetic_corpus(documents: usize, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..documents)
        .map(|_| {
            let sentences = rng.random_range(1..6);
            (0..sentences)
                .map(|_| {
                    let words = rng.random_range(3..10);
                    let sentence: Vec<&str> = (0..words).filter_map(|_| WORDS.choose(&mut rng).copied()).collect();
                    format!("{}.", sentence.join(" "))
                })
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

fn bench_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.trial_name = "bench".to_string();
    config.batch.embeddings = 64;
    config.batch.results = 64;
    config.batch.indexing = 64;
    config.batch.training = 256;
    config.strategies.embedding_dimension = 64;
    config.strategies.topic_count = 8;
    config.strategies.epochs = 5;
    config
}

fn pipeline_benchmark(c: &mut Criterion) {
    let texts = synthetic_corpus(500, 7);
    let config = bench_config();

    c.bench_function("full_pipeline_500_docs", |b| {
        b.iter(|| {
            let conn = Rc::new(Connection::open_in_memory().expect("open in-memory db"));
            let mut pipeline = Pipeline::open(
                conn,
                &config,
                SentenceChunker,
                HashEmbedder::new(config.strategies.embedding_dimension).expect("embedder"),
                KMeansClusterer::from_config(&config).expect("clusterer"),
            )
            .expect("open pipeline");
            pipeline.ingest(&texts).expect("ingest");
            pipeline.run().expect("run");
            pipeline.search("market rates inflation").expect("search")
        });
    });
}

fn ranking_benchmark(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let mut entries: Vec<IndexEntry> = (0..20_000)
        .map(|_| IndexEntry {
            topic_id: rng.random_range(0..16),
            document_id: rng.random_range(0..5_000),
            match_strength: 16,
        })
        .collect();
    entries.sort_by_key(|e| (e.document_id, e.topic_id));
    entries.dedup_by_key(|e| (e.document_id, e.topic_id));

    c.bench_function("rank_by_multiplicity", |b| {
        b.iter(|| rank_by_multiplicity(&entries));
    });
}

criterion_group!(benches, pipeline_benchmark, ranking_benchmark);
criterion_main!(benches);
