//! Multiplicity-ranked topic search over a finished trial.

use std::fmt::Debug;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result, StrategyError};
use crate::pipeline::{check_topic_width, Pipeline};
use crate::store::inverted::IndexEntry;
use crate::store::metadata::Stage;
use crate::strategy::{Chunker, Clusterer, Embedder};

/// One ranked document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitEntry {
    pub document_id: u64,
    /// Query topics the document shares
    pub matched_topics: usize,
    /// Topics set for the document
    pub match_strength: usize,
    /// `matched_topics / match_strength`
    pub relevance: f64,
}

/// Structure to store query results
/// Ordered by matched topic count, most matching first
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hits {
    pub list: Vec<HitEntry>,
}

impl Hits {
    pub fn new(list: Vec<HitEntry>) -> Self {
        Hits { list }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Ranked document ids
    pub fn document_ids(&self) -> Vec<u64> {
        self.list.iter().map(|hit| hit.document_id).collect()
    }

    /// Re-sort by descending relevance, stable for equal relevance
    pub fn sort_by_relevance(&mut self) -> &mut Self {
        self.list.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        self
    }
}

impl Debug for Hits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "Hits [")?;
            for hit in &self.list {
                writeln!(
                    f,
                    "    {}: {}/{} ({:.3})",
                    hit.document_id, hit.matched_topics, hit.match_strength, hit.relevance
                )?;
            }
            write!(f, "]")
        } else {
            f.debug_list().entries(&self.list).finish()
        }
    }
}

/// Rank documents by how many postings they have in `matches`
/// Ties keep first-seen order
pub fn rank_by_multiplicity(matches: &[IndexEntry]) -> Hits {
    let mut counts: IndexMap<u64, (usize, usize)> = IndexMap::new();
    for entry in matches {
        counts.entry(entry.document_id).or_insert((0, entry.match_strength)).0 += 1;
    }
    let mut list: Vec<HitEntry> = counts
        .into_iter()
        .map(|(document_id, (matched_topics, match_strength))| HitEntry {
            document_id,
            matched_topics,
            match_strength,
            relevance: matched_topics as f64 / match_strength.max(1) as f64,
        })
        .collect();
    list.sort_by(|a, b| b.matched_topics.cmp(&a.matched_topics));
    Hits::new(list)
}

impl<C, E, K> Pipeline<'_, C, E, K>
where
    C: Chunker,
    E: Embedder,
    K: Clusterer,
{
    fn require_done(&self) -> Result<()> {
        let actual = self.stage()?;
        if actual != Stage::Done {
            return Err(PipelineError::InvalidState { expected: Stage::Done, actual });
        }
        Ok(())
    }

    /// Classify free text with the trial's strategies and rank matching documents
    /// Fails with a configuration conflict before any strategy call when the
    /// clusterer declares a different topic count than the trial recorded
    pub fn search(&mut self, text: &str) -> Result<Hits> {
        self.require_done()?;
        let topic_count = self.stored_topic_count()?;
        self.restore_clusterer()?;

        let mut chunks = self.chunker.chunk(text)?;
        if chunks.is_empty() {
            chunks.push(text.to_string());
        }
        let vectors = self.embedder.embed(&chunks)?;
        if vectors.len() != chunks.len() {
            return Err(StrategyError::failed(format!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            ))
            .into());
        }
        let topics = self.clusterer.classify(&vectors)?;
        check_topic_width(&topics, topic_count)?;
        self.search_topics(&topics.active_topics())
    }

    /// Ranked document ids for free text
    pub fn query(&mut self, text: &str) -> Result<Vec<u64>> {
        Ok(self.search(text)?.document_ids())
    }

    /// Ranked document ids for an explicit topic set
    pub fn query_topics(&self, topic_ids: &[usize]) -> Result<Vec<u64>> {
        self.require_done()?;
        let topic_count = self.stored_topic_count()?;
        if let Some(&topic_id) = topic_ids.iter().find(|&&t| t >= topic_count) {
            return Err(PipelineError::InvalidArgument(format!(
                "topic {topic_id} out of range, trial has {topic_count} topics"
            )));
        }
        Ok(self.search_topics(topic_ids)?.document_ids())
    }

    fn search_topics(&self, topic_ids: &[usize]) -> Result<Hits> {
        let matches = self.stores.index.matches_by_topics(&self.conn, topic_ids)?;
        Ok(rank_by_multiplicity(&matches))
    }
}
