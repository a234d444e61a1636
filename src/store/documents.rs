use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{from_sql_int, to_sql_int};

/// Input document
/// `id` is dense, zero-based and equals arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub text: String,
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY CHECK(id >= 0),
    text TEXT NOT NULL
);
";

/// Documents shared by every trial in the database
#[derive(Debug, Clone, Default)]
pub struct DocumentStore;

impl DocumentStore {
    pub fn open(conn: &Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self)
    }

    /// Insert or replace the document with this id
    pub fn insert(&self, conn: &Connection, id: u64, text: &str) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO documents (id, text) VALUES (?1, ?2)",
            params![to_sql_int(id, "document id")?, text],
        )?;
        Ok(())
    }

    /// Insert with the next dense id
    pub fn append(&self, conn: &Connection, text: &str) -> Result<u64> {
        let id = self.count(conn)?;
        self.insert(conn, id, text)?;
        Ok(id)
    }

    /// Append every text inside one transaction
    pub fn ingest<I, S>(&self, conn: &Connection, texts: I) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tx = conn.unchecked_transaction()?;
        let ids = texts
            .into_iter()
            .map(|text| self.append(&tx, text.as_ref()))
            .collect::<Result<Vec<u64>>>()?;
        tx.commit()?;
        Ok(ids)
    }

    /// Documents with `id >= start`, ascending
    pub fn batch(&self, conn: &Connection, start: u64, batch_size: usize) -> Result<Vec<Document>> {
        let mut stmt = conn.prepare(
            "SELECT id, text FROM documents WHERE id >= ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![to_sql_int(start, "start")?, to_sql_int(batch_size, "batch_size")?],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|(id, text)| Ok(Document { id: from_sql_int(id, "document id")?, text }))
            .collect()
    }

    pub fn get(&self, conn: &Connection, id: u64) -> Result<Option<Document>> {
        let text = conn
            .query_row(
                "SELECT text FROM documents WHERE id = ?1",
                params![to_sql_int(id, "document id")?],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(text.map(|text| Document { id, text }))
    }

    /// Number of documents, which is also the next dense id
    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        from_sql_int(count, "document count")
    }
}
