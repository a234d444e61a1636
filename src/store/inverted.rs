//! Topic -> document inverted index.

use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{from_sql_int, placeholders, to_sql_int};

/// One `(topic, document)` posting
/// `match_strength` is the number of topics set for the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexEntry {
    pub topic_id: usize,
    pub document_id: u64,
    pub match_strength: usize,
}

/// Postings table, at most one row per `(topic, document)`
/// Trials sharing a strategy triple share this table
#[derive(Debug, Clone)]
pub struct InvertedIndexStore {
    table: String,
}

impl InvertedIndexStore {
    pub fn open(conn: &Connection, table: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                topic_id INTEGER NOT NULL CHECK(topic_id >= 0),
                document_id INTEGER NOT NULL CHECK(document_id >= 0),
                match_strength INTEGER NOT NULL CHECK(match_strength > 0),
                UNIQUE(topic_id, document_id)
            );
            CREATE INDEX IF NOT EXISTS idx_{table}_document ON {table}(document_id);"
        ))?;
        Ok(Self { table: table.to_string() })
    }

    /// One posting per topic id
    /// Postings already stored for the document are replaced, so indexing the
    /// same document twice never duplicates a posting
    pub fn add_document(&self, conn: &Connection, document_id: u64, topic_ids: &[usize]) -> Result<()> {
        let mut topic_ids = topic_ids.to_vec();
        topic_ids.sort_unstable();
        topic_ids.dedup();
        let document_id = to_sql_int(document_id, "document_id")?;
        let strength = to_sql_int(topic_ids.len(), "match_strength")?;
        conn.execute(&format!("DELETE FROM {} WHERE document_id = ?1", self.table), params![document_id])?;
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {} (topic_id, document_id, match_strength) VALUES (?1, ?2, ?3)",
            self.table
        ))?;
        for topic_id in topic_ids {
            stmt.execute(params![to_sql_int(topic_id, "topic_id")?, document_id, strength])?;
        }
        Ok(())
    }

    /// Postings for any of `topic_ids`, ordered by `(document_id, topic_id)`
    pub fn matches_by_topics(&self, conn: &Connection, topic_ids: &[usize]) -> Result<Vec<IndexEntry>> {
        if topic_ids.is_empty() {
            return Ok(Vec::new());
        }
        let topics = topic_ids
            .iter()
            .map(|&t| to_sql_int(t, "topic_id"))
            .collect::<Result<Vec<i64>>>()?;
        let sql = format!(
            "SELECT topic_id, document_id, match_strength FROM {}
             WHERE topic_id IN ({}) ORDER BY document_id ASC, topic_id ASC",
            self.table,
            placeholders(topics.len())
        );
        self.select(conn, &sql, params_from_iter(topics))
    }

    /// Documents matching any of `topic_ids`
    /// Without `distinct` a document appears once per matched topic
    pub fn documents_by_topics(&self, conn: &Connection, topic_ids: &[usize], distinct: bool) -> Result<Vec<u64>> {
        let mut documents: Vec<u64> = self
            .matches_by_topics(conn, topic_ids)?
            .into_iter()
            .map(|entry| entry.document_id)
            .collect();
        if distinct {
            documents.dedup();
        }
        Ok(documents)
    }

    pub fn entries(&self, conn: &Connection) -> Result<Vec<IndexEntry>> {
        self.select(
            conn,
            &format!(
                "SELECT topic_id, document_id, match_strength FROM {}
                 ORDER BY document_id ASC, topic_id ASC",
                self.table
            ),
            params![],
        )
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), params![], |row| row.get(0))?;
        from_sql_int(count, "index entry count")
    }

    fn select<P: rusqlite::Params>(&self, conn: &Connection, sql: &str, params: P) -> Result<Vec<IndexEntry>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(topic_id, document_id, match_strength)| {
                Ok(IndexEntry {
                    topic_id: from_sql_int(topic_id, "topic_id")?,
                    document_id: from_sql_int(document_id, "document_id")?,
                    match_strength: from_sql_int(match_strength, "match_strength")?,
                })
            })
            .collect()
    }
}
