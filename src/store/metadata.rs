//! Per-trial progress record, the single source of truth for resuming.

use std::fmt;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::store::{from_sql_int, to_sql_int, TableNames};

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GeneratingEmbeddings,
    LearningTopics,
    ComputingResults,
    Indexing,
    Done,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::GeneratingEmbeddings,
        Stage::LearningTopics,
        Stage::ComputingResults,
        Stage::Indexing,
        Stage::Done,
    ];

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Result<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or_else(|| PipelineError::Codec(format!("unknown stage value: {value}")))
    }

    /// The stage that follows this one, `None` once done
    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self as usize + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneratingEmbeddings => "generating_embeddings",
            Self::LearningTopics => "learning_topics",
            Self::ComputingResults => "computing_results",
            Self::Indexing => "indexing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safe resume point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage: Stage,
    pub index: u64,
    pub epoch: u64,
}

/// Full metadata row of a trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_name: String,
    pub checkpoint: Checkpoint,
    pub document_count: u64,
    /// `None` until the clustering strategy's dimensionality is recorded
    pub topic_count: Option<usize>,
    pub tables: TableNames,
}

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    trial_name TEXT PRIMARY KEY NOT NULL,
    current_stage INTEGER NOT NULL DEFAULT 0 CHECK(current_stage BETWEEN 0 AND 4),
    current_index INTEGER NOT NULL DEFAULT 0 CHECK(current_index >= 0),
    current_epoch INTEGER NOT NULL DEFAULT 0 CHECK(current_epoch >= 0),
    document_count INTEGER NOT NULL DEFAULT 0 CHECK(document_count >= 0),
    topic_count INTEGER NOT NULL DEFAULT 0 CHECK(topic_count >= 0),
    embeddings_table TEXT NOT NULL,
    centers_table TEXT NOT NULL,
    results_table TEXT NOT NULL,
    index_table TEXT NOT NULL
);
";

/// Metadata accessor bound to one trial
/// Writes go through the caller's connection or transaction, so a checkpoint
/// update commits together with the batch it describes
#[derive(Debug, Clone)]
pub struct MetadataStore {
    trial_name: String,
}

impl MetadataStore {
    /// Create the trial row on first use
    /// A trial that already exists must have been started with the same tables
    pub fn open(conn: &Connection, trial_name: &str, tables: &TableNames) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO metadata (
                trial_name, embeddings_table, centers_table, results_table, index_table
             ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![trial_name, tables.embeddings, tables.centers, tables.results, tables.index],
        )?;
        let store = Self { trial_name: trial_name.to_string() };
        let stored = store.record(conn)?.tables;
        if stored != *tables {
            return Err(PipelineError::ConfigurationConflict(format!(
                "trial {trial_name} was started with tables {stored:?}, now configured with {tables:?}"
            )));
        }
        Ok(store)
    }

    pub fn trial_name(&self) -> &str {
        &self.trial_name
    }

    pub fn record(&self, conn: &Connection) -> Result<TrialRecord> {
        let raw = conn.query_row(
            "SELECT current_stage, current_index, current_epoch, document_count, topic_count,
                    embeddings_table, centers_table, results_table, index_table
             FROM metadata WHERE trial_name = ?1",
            params![self.trial_name],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    TableNames {
                        embeddings: row.get(5)?,
                        centers: row.get(6)?,
                        results: row.get(7)?,
                        index: row.get(8)?,
                    },
                ))
            },
        )?;
        let (stage, index, epoch, document_count, topic_count, tables) = raw;
        let topic_count: usize = from_sql_int(topic_count, "topic_count")?;
        Ok(TrialRecord {
            trial_name: self.trial_name.clone(),
            checkpoint: Checkpoint {
                stage: Stage::from_i64(stage)?,
                index: from_sql_int(index, "current_index")?,
                epoch: from_sql_int(epoch, "current_epoch")?,
            },
            document_count: from_sql_int(document_count, "document_count")?,
            topic_count: (topic_count > 0).then_some(topic_count),
            tables,
        })
    }

    pub fn checkpoint(&self, conn: &Connection) -> Result<Checkpoint> {
        Ok(self.record(conn)?.checkpoint)
    }

    pub fn current_stage(&self, conn: &Connection) -> Result<Stage> {
        Ok(self.checkpoint(conn)?.stage)
    }

    pub fn current_index(&self, conn: &Connection) -> Result<u64> {
        Ok(self.checkpoint(conn)?.index)
    }

    pub fn current_epoch(&self, conn: &Connection) -> Result<u64> {
        Ok(self.checkpoint(conn)?.epoch)
    }

    pub fn document_count(&self, conn: &Connection) -> Result<u64> {
        Ok(self.record(conn)?.document_count)
    }

    pub fn topic_count(&self, conn: &Connection) -> Result<Option<usize>> {
        Ok(self.record(conn)?.topic_count)
    }

    /// Move to `next`, which must directly follow the current stage
    /// Index and epoch counters of the finished stage are reset in the same statement
    pub fn update_stage(&self, conn: &Connection, next: Stage) -> Result<()> {
        let current = self.current_stage(conn)?;
        if current.next() != Some(next) {
            return Err(PipelineError::InvalidTransition { from: current, to: next });
        }
        conn.execute(
            "UPDATE metadata SET current_stage = ?2, current_index = 0, current_epoch = 0
             WHERE trial_name = ?1",
            params![self.trial_name, next.as_i64()],
        )?;
        Ok(())
    }

    pub fn update_index(&self, conn: &Connection, index: u64) -> Result<()> {
        let index = to_sql_int(index, "current_index")?;
        self.set_column(conn, "current_index", index)
    }

    /// Epochs only ever advance by one
    pub fn update_epoch(&self, conn: &Connection, epoch: u64) -> Result<()> {
        let current = self.current_epoch(conn)?;
        if current.checked_add(1) != Some(epoch) {
            return Err(PipelineError::InvalidArgument(format!(
                "current_epoch must increment by 1: at {current}, got {epoch}"
            )));
        }
        let epoch = to_sql_int(epoch, "current_epoch")?;
        self.set_column(conn, "current_epoch", epoch)
    }

    pub fn update_document_count(&self, conn: &Connection, count: u64) -> Result<()> {
        let count = to_sql_int(count, "document_count")?;
        self.set_column(conn, "document_count", count)
    }

    /// Record the topic count once
    /// Repeating the same value is a no-op, a different value is a conflict
    pub fn update_topic_count(&self, conn: &Connection, topic_count: usize) -> Result<()> {
        if topic_count == 0 {
            return Err(PipelineError::InvalidArgument("topic_count must be > 0".to_string()));
        }
        match self.topic_count(conn)? {
            Some(existing) if existing == topic_count => Ok(()),
            Some(existing) => Err(PipelineError::ConfigurationConflict(format!(
                "topic_count is fixed at {existing}, refusing to change it to {topic_count}"
            ))),
            None => {
                let topic_count = to_sql_int(topic_count, "topic_count")?;
                self.set_column(conn, "topic_count", topic_count)
            }
        }
    }

    fn set_column(&self, conn: &Connection, column: &'static str, value: i64) -> Result<()> {
        conn.execute(
            &format!("UPDATE metadata SET {column} = ?2 WHERE trial_name = ?1"),
            params![self.trial_name, value],
        )?;
        Ok(())
    }
}
