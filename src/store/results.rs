use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::codec::{decode_topics, encode_topics};
use crate::store::{from_sql_int, to_sql_int};
use crate::strategy::TopicVector;

/// Topic membership of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub document_id: u64,
    pub topics: TopicVector,
}

/// One topic vector per document, recomputation overwrites
#[derive(Debug, Clone)]
pub struct ResultStore {
    table: String,
}

impl ResultStore {
    pub fn open(conn: &Connection, table: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                document_id INTEGER PRIMARY KEY CHECK(document_id >= 0),
                vector BLOB NOT NULL
            );"
        ))?;
        Ok(Self { table: table.to_string() })
    }

    pub fn upsert(&self, conn: &Connection, document_id: u64, topics: &TopicVector) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (document_id, vector) VALUES (?1, ?2)
                 ON CONFLICT(document_id) DO UPDATE SET vector = excluded.vector",
                self.table
            ),
            params![to_sql_int(document_id, "document_id")?, encode_topics(topics)?],
        )?;
        Ok(())
    }

    /// Results with `document_id >= start_document`, ascending
    pub fn batch(&self, conn: &Connection, start_document: u64, batch_size: usize) -> Result<Vec<DocumentResult>> {
        self.select(
            conn,
            &format!(
                "SELECT document_id, vector FROM {} WHERE document_id >= ?1
                 ORDER BY document_id ASC LIMIT ?2",
                self.table
            ),
            params![to_sql_int(start_document, "start_document")?, to_sql_int(batch_size, "batch_size")?],
        )
    }

    pub fn get(&self, conn: &Connection, document_id: u64) -> Result<Option<TopicVector>> {
        let blob = conn
            .query_row(
                &format!("SELECT vector FROM {} WHERE document_id = ?1", self.table),
                params![to_sql_int(document_id, "document_id")?],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        blob.map(|b| decode_topics(&b)).transpose()
    }

    pub fn all(&self, conn: &Connection) -> Result<Vec<DocumentResult>> {
        self.select(
            conn,
            &format!("SELECT document_id, vector FROM {} ORDER BY document_id ASC", self.table),
            params![],
        )
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), params![], |row| row.get(0))?;
        from_sql_int(count, "result count")
    }

    fn select<P: rusqlite::Params>(&self, conn: &Connection, sql: &str, params: P) -> Result<Vec<DocumentResult>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(document_id, blob)| {
                Ok(DocumentResult {
                    document_id: from_sql_int(document_id, "document_id")?,
                    topics: decode_topics(&blob)?,
                })
            })
            .collect()
    }
}
