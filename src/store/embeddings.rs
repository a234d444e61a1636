//! Chunk-level embeddings tagged with their debiasing key.
//!
//! Every row carries `(chunk_index, total_chunks)`. For a fixed document the
//! chunk indices are exactly `0..total_chunks`, which lets an epoch sample pick
//! `chunk_index == epoch % total_chunks`: one vector per document per epoch,
//! regardless of how many chunks the document produced.

use std::rc::Rc;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::store::codec::{decode_vector, encode_vector};
use crate::store::{from_sql_int, group_contiguous, to_sql_int};
use crate::strategy::TrainingSource;

/// One stored embedding row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub id: u64,
    pub document_id: u64,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub vector: Vec<f32>,
}

/// One page of an epoch sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochBatch {
    /// id of the last row in the page, resume at `last_id + 1`
    pub last_id: Option<u64>,
    pub embeddings: Vec<Embedding>,
}

impl EpochBatch {
    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }
}

/// All embeddings of one document, in chunk order
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEmbeddings {
    pub document_id: u64,
    pub total_chunks: usize,
    pub vectors: Vec<Vec<f32>>,
}

impl DocumentEmbeddings {
    /// The stored chunk count must match the rows retrieved
    pub fn check_integrity(&self) -> Result<()> {
        if self.vectors.len() != self.total_chunks {
            return Err(PipelineError::IntegrityViolation(format!(
                "document {} declares {} chunks but {} embeddings were retrieved",
                self.document_id,
                self.total_chunks,
                self.vectors.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    table: String,
}

impl EmbeddingStore {
    pub fn open(conn: &Connection, table: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id INTEGER NOT NULL CHECK(document_id >= 0),
                chunk_index INTEGER NOT NULL CHECK(chunk_index >= 0 AND chunk_index < total_chunks),
                total_chunks INTEGER NOT NULL CHECK(total_chunks > 0),
                vector BLOB NOT NULL,
                UNIQUE(document_id, chunk_index)
            );"
        ))?;
        Ok(Self { table: table.to_string() })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Insert a single tagged embedding, returns its row id
    pub fn insert(
        &self,
        conn: &Connection,
        document_id: u64,
        chunk_index: usize,
        total_chunks: usize,
        vector: &[f32],
    ) -> Result<u64> {
        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(PipelineError::InvalidArgument(format!(
                "chunk_index {chunk_index} outside 0..{total_chunks}"
            )));
        }
        conn.execute(
            &format!(
                "INSERT INTO {} (document_id, chunk_index, total_chunks, vector) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![
                to_sql_int(document_id, "document_id")?,
                to_sql_int(chunk_index, "chunk_index")?,
                to_sql_int(total_chunks, "total_chunks")?,
                encode_vector(vector)?
            ],
        )?;
        from_sql_int(conn.last_insert_rowid(), "embedding id")
    }

    /// Insert every chunk embedding of a document
    /// Position in `vectors` becomes the chunk index
    pub fn insert_document(&self, conn: &Connection, document_id: u64, vectors: &[Vec<f32>]) -> Result<()> {
        let total = vectors.len();
        for (chunk_index, vector) in vectors.iter().enumerate() {
            self.insert(conn, document_id, chunk_index, total, vector)?;
        }
        Ok(())
    }

    pub fn has_document(&self, conn: &Connection, document_id: u64) -> Result<bool> {
        let exists: i64 = conn.query_row(
            &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE document_id = ?1)", self.table),
            params![to_sql_int(document_id, "document_id")?],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    /// Rows with `id >= start_id`, ascending
    pub fn batch(&self, conn: &Connection, start_id: u64, batch_size: usize) -> Result<Vec<Embedding>> {
        self.select_rows(
            conn,
            &format!(
                "SELECT id, document_id, chunk_index, total_chunks, vector FROM {}
                 WHERE id >= ?1 ORDER BY id ASC LIMIT ?2",
                self.table
            ),
            params![to_sql_int(start_id, "start_id")?, to_sql_int(batch_size, "batch_size")?],
        )
    }

    /// Debiased sample: rows with `chunk_index == epoch % total_chunks` and `id >= start_id`
    pub fn epoch_batch(&self, conn: &Connection, epoch: u64, start_id: u64, batch_size: usize) -> Result<EpochBatch> {
        let embeddings = self.select_rows(
            conn,
            &format!(
                "SELECT id, document_id, chunk_index, total_chunks, vector FROM {}
                 WHERE id >= ?1 AND chunk_index = (?2 % total_chunks)
                 ORDER BY id ASC LIMIT ?3",
                self.table
            ),
            params![
                to_sql_int(start_id, "start_id")?,
                to_sql_int(epoch, "epoch")?,
                to_sql_int(batch_size, "batch_size")?
            ],
        )?;
        Ok(EpochBatch {
            last_id: embeddings.last().map(|e| e.id),
            embeddings,
        })
    }

    /// Embeddings of up to `batch_size` documents with `document_id >= start_document`,
    /// grouped per document and ordered by document id
    pub fn document_groups(
        &self,
        conn: &Connection,
        start_document: u64,
        batch_size: usize,
    ) -> Result<Vec<DocumentEmbeddings>> {
        let table = &self.table;
        let rows = self.select_rows(
            conn,
            &format!(
                "SELECT id, document_id, chunk_index, total_chunks, vector FROM {table}
                 WHERE document_id IN (
                    SELECT DISTINCT document_id FROM {table}
                    WHERE document_id >= ?1 ORDER BY document_id ASC LIMIT ?2
                 )
                 ORDER BY document_id ASC, chunk_index ASC"
            ),
            params![to_sql_int(start_document, "start_document")?, to_sql_int(batch_size, "batch_size")?],
        )?;

        group_contiguous(rows.into_iter().map(|e| (e.document_id, e)))
            .into_iter()
            .map(|(document_id, rows)| {
                let total_chunks = rows.first().map_or(0, |e| e.total_chunks);
                if rows.iter().any(|e| e.total_chunks != total_chunks) {
                    return Err(PipelineError::IntegrityViolation(format!(
                        "document {document_id} has rows with different total_chunks"
                    )));
                }
                Ok(DocumentEmbeddings {
                    document_id,
                    total_chunks,
                    vectors: rows.into_iter().map(|e| e.vector).collect(),
                })
            })
            .collect()
    }

    pub fn all(&self, conn: &Connection) -> Result<Vec<Embedding>> {
        self.select_rows(
            conn,
            &format!(
                "SELECT id, document_id, chunk_index, total_chunks, vector FROM {} ORDER BY id ASC",
                self.table
            ),
            params![],
        )
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;
        from_sql_int(count, "embedding count")
    }

    /// Number of documents that have embeddings, i.e. the size of one epoch sample
    pub fn document_count(&self, conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(DISTINCT document_id) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        from_sql_int(count, "document count")
    }

    fn select_rows<P: rusqlite::Params>(&self, conn: &Connection, sql: &str, params: P) -> Result<Vec<Embedding>> {
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter()
            .map(|(id, document_id, chunk_index, total_chunks, blob)| {
                Ok(Embedding {
                    id: from_sql_int(id, "embedding id")?,
                    document_id: from_sql_int(document_id, "document_id")?,
                    chunk_index: from_sql_int(chunk_index, "chunk_index")?,
                    total_chunks: from_sql_int(total_chunks, "total_chunks")?,
                    vector: decode_vector(&blob)?,
                })
            })
            .collect()
    }
}

/// Read-only training handle over the embedding store
/// Shares the orchestrator's connection
pub struct EmbeddingSampler {
    conn: Rc<Connection>,
    store: EmbeddingStore,
}

impl EmbeddingSampler {
    pub fn new(conn: Rc<Connection>, store: EmbeddingStore) -> Self {
        Self { conn, store }
    }
}

impl TrainingSource for EmbeddingSampler {
    fn epoch_batch(&self, epoch: u64, start_id: u64, batch_size: usize) -> Result<EpochBatch> {
        self.store.epoch_batch(&self.conn, epoch, start_id, batch_size)
    }

    fn document_count(&self) -> Result<u64> {
        self.store.document_count(&self.conn)
    }
}
