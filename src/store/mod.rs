pub mod codec;
pub mod metadata;
pub mod documents;
pub mod embeddings;
pub mod centers;
pub mod results;
pub mod inverted;

use num::{NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Table names of one strategy configuration
/// Embeddings only depend on chunking and embedding, so trials sharing those
/// two strategies reuse the same embeddings table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableNames {
    pub embeddings: String,
    pub centers: String,
    pub results: String,
    pub index: String,
}

impl TableNames {
    /// Derive table names from the strategy triple
    pub fn derive(chunking: &str, embedding: &str, clustering: &str) -> Self {
        let chunking = sanitize(chunking);
        let embedding = sanitize(embedding);
        let clustering = sanitize(clustering);
        let triple = format!("{chunking}_{embedding}_{clustering}");
        Self {
            embeddings: format!("embeddings_{chunking}_{embedding}"),
            centers: format!("centers_{triple}"),
            results: format!("results_{triple}"),
            index: format!("topic_index_{triple}"),
        }
    }
}

/// lowercase, everything outside [a-z0-9] becomes '_'
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Convert a counter into an SQLite integer
pub(crate) fn to_sql_int<T: ToPrimitive>(value: T, field: &'static str) -> Result<i64> {
    value
        .to_i64()
        .ok_or_else(|| PipelineError::InvalidArgument(format!("{field} does not fit in a 64-bit signed integer")))
}

/// Convert an SQLite integer back into a counter
pub(crate) fn from_sql_int<T: NumCast>(value: i64, field: &'static str) -> Result<T> {
    <T as NumCast>::from(value)
        .ok_or_else(|| PipelineError::Codec(format!("stored {field} is out of range: {value}")))
}

/// Group rows that arrive ordered by key into runs of equal keys
/// Only adjacent rows are merged, so the input must already be sorted
pub(crate) fn group_contiguous<K, V, I>(rows: I) -> Vec<(K, Vec<V>)>
where
    K: PartialEq,
    I: IntoIterator<Item = (K, V)>,
{
    let mut groups: Vec<(K, Vec<V>)> = Vec::new();
    for (key, value) in rows {
        match groups.last_mut() {
            Some((last, values)) if *last == key => values.push(value),
            _ => groups.push((key, vec![value])),
        }
    }
    groups
}

/// `?, ?, ?` placeholder list for IN clauses
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
