mod common;

use std::rc::Rc;

use proptest::prelude::*;
use rusqlite::Connection;
use topic_index::pipeline::query::rank_by_multiplicity;
use topic_index::store::embeddings::{EmbeddingSampler, EmbeddingStore};
use topic_index::store::inverted::IndexEntry;
use topic_index::{Pipeline, SentenceChunker, TrainingSource};

use common::*;

fn documents() -> impl Strategy<Value = Vec<Vec<String>>> {
    prop::collection::vec(prop::collection::vec("[a-z]{1,8}", 1..6), 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn stored_chunk_indices_are_dense(docs in documents(), seed in any::<u64>()) {
        let mut config = small_batches("prop-chunks");
        config.shuffle_seed = seed;
        let mut pipeline = Pipeline::open(
            Rc::new(Connection::open_in_memory().unwrap()),
            &config,
            SentenceChunker,
            LenEmbedder::default(),
            BucketClusterer::new(3),
        )
        .unwrap();
        let texts: Vec<String> = docs.iter().map(|sentences| format!("{}.", sentences.join(". "))).collect();
        pipeline.ingest(&texts).unwrap();
        pipeline.run().unwrap();

        let conn = pipeline.connection();
        let rows = pipeline.stores().embeddings.all(conn).unwrap();
        for (document_id, sentences) in docs.iter().enumerate() {
            let mut indices: Vec<(usize, usize)> = rows
                .iter()
                .filter(|e| e.document_id == document_id as u64)
                .map(|e| (e.chunk_index, e.total_chunks))
                .collect();
            indices.sort_unstable();
            let expected: Vec<(usize, usize)> = (0..sentences.len()).map(|i| (i, sentences.len())).collect();
            prop_assert_eq!(indices, expected);
        }
    }

    #[test]
    fn epoch_sample_has_one_row_per_document(
        chunk_counts in prop::collection::vec(1usize..7, 1..10),
        epoch in 0u64..50,
        page in 1usize..5,
    ) {
        let conn = Rc::new(Connection::open_in_memory().unwrap());
        let store = EmbeddingStore::open(&conn, "prop_embeddings").unwrap();
        for (document_id, &total) in chunk_counts.iter().enumerate() {
            let vectors: Vec<Vec<f32>> = (0..total).map(|i| vec![document_id as f32, i as f32]).collect();
            store.insert_document(&conn, document_id as u64, &vectors).unwrap();
        }

        let sampler = EmbeddingSampler::new(Rc::clone(&conn), store);
        let sample = sampler.epoch_sample(epoch, page).unwrap();
        prop_assert_eq!(sample.len(), chunk_counts.len());
        prop_assert_eq!(sampler.document_count().unwrap(), chunk_counts.len() as u64);
        for (row, &total) in sample.iter().zip(&chunk_counts) {
            let expected_chunk = (epoch % total as u64) as usize;
            prop_assert_eq!(row.chunk_index, expected_chunk);
            prop_assert_eq!(row.total_chunks, total);
            prop_assert_eq!(&row.vector, &vec![row.document_id as f32, expected_chunk as f32]);
        }
    }

    #[test]
    fn ranking_counts_each_document_once(postings in prop::collection::vec((0usize..6, 0u64..10), 0..40)) {
        let mut entries: Vec<IndexEntry> = postings
            .iter()
            .map(|&(topic_id, document_id)| IndexEntry { topic_id, document_id, match_strength: 6 })
            .collect();
        entries.sort_by_key(|e| (e.document_id, e.topic_id));

        let hits = rank_by_multiplicity(&entries);
        let ids = hits.document_ids();
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        prop_assert_eq!(unique.len(), ids.len());

        for pair in hits.list.windows(2) {
            prop_assert!(pair[0].matched_topics >= pair[1].matched_topics);
        }
        for hit in &hits.list {
            let expected = entries.iter().filter(|e| e.document_id == hit.document_id).count();
            prop_assert_eq!(hit.matched_topics, expected);
        }
    }
}
