use rusqlite::{params, Connection};

use crate::error::{PipelineError, Result};
use crate::store::codec::{decode_vector, encode_vector};
use crate::store::to_sql_int;

/// Topic centers of a centroid-based clustering strategy
/// Centers are only ever replaced as a whole. Rows are keyed by trial, so
/// trials sharing a strategy triple never overwrite each other's centers
#[derive(Debug, Clone)]
pub struct CenterStore {
    table: String,
    trial_name: String,
}

impl CenterStore {
    pub fn open(conn: &Connection, table: &str, trial_name: &str) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                trial_name TEXT NOT NULL,
                id INTEGER NOT NULL CHECK(id >= 0),
                vector BLOB NOT NULL,
                PRIMARY KEY(trial_name, id)
            );"
        ))?;
        Ok(Self { table: table.to_string(), trial_name: trial_name.to_string() })
    }

    /// Delete every center and insert the new set
    /// Run inside the caller's transaction so readers never see a partial set
    pub fn replace_all(&self, conn: &Connection, centers: &[Vec<f32>], topic_count: usize) -> Result<()> {
        if centers.len() != topic_count {
            return Err(PipelineError::ConfigurationConflict(format!(
                "incompatible center count: expected {topic_count}, got {}",
                centers.len()
            )));
        }
        conn.execute(&format!("DELETE FROM {} WHERE trial_name = ?1", self.table), params![self.trial_name])?;
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {} (trial_name, id, vector) VALUES (?1, ?2, ?3)",
            self.table
        ))?;
        for (id, center) in centers.iter().enumerate() {
            stmt.execute(params![self.trial_name, to_sql_int(id, "center id")?, encode_vector(center)?])?;
        }
        Ok(())
    }

    /// Centers ordered by topic id, empty when none were stored
    pub fn load(&self, conn: &Connection) -> Result<Vec<Vec<f32>>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT vector FROM {} WHERE trial_name = ?1 ORDER BY id ASC",
            self.table
        ))?;
        let blobs = stmt
            .query_map(params![self.trial_name], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blobs.iter().map(|blob| decode_vector(blob)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_all_validates_count_and_replaces() {
        let conn = Connection::open_in_memory().unwrap();
        let store = CenterStore::open(&conn, "test_centers", "trial").unwrap();
        assert!(store.load(&conn).unwrap().is_empty());

        let centers = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]];
        assert!(matches!(
            store.replace_all(&conn, &centers[0..1], 3),
            Err(PipelineError::ConfigurationConflict(_))
        ));
        assert!(store.replace_all(&conn, &centers[1..2], 3).is_err());

        store.replace_all(&conn, &centers, 3).unwrap();
        assert_eq!(store.load(&conn).unwrap(), centers);

        let moved = vec![vec![0.0; 3], vec![1.0; 3], vec![2.0; 3]];
        store.replace_all(&conn, &moved, 3).unwrap();
        assert_eq!(store.load(&conn).unwrap(), moved);
    }

    #[test]
    fn failed_replacement_inside_transaction_keeps_old_centers() {
        let conn = Connection::open_in_memory().unwrap();
        let store = CenterStore::open(&conn, "test_centers", "trial").unwrap();
        store.replace_all(&conn, &[vec![1.0], vec![2.0]], 2).unwrap();

        let tx = conn.unchecked_transaction().unwrap();
        // non-finite values fail to encode after the delete already ran
        assert!(store.replace_all(&tx, &[vec![3.0], vec![f32::NAN]], 2).is_err());
        drop(tx);

        assert_eq!(store.load(&conn).unwrap(), vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn trials_keep_separate_centers_in_one_table() {
        let conn = Connection::open_in_memory().unwrap();
        let a = CenterStore::open(&conn, "test_centers", "a").unwrap();
        let b = CenterStore::open(&conn, "test_centers", "b").unwrap();
        a.replace_all(&conn, &[vec![1.0], vec![2.0]], 2).unwrap();
        b.replace_all(&conn, &[vec![5.0], vec![6.0]], 2).unwrap();
        assert_eq!(a.load(&conn).unwrap(), vec![vec![1.0], vec![2.0]]);
        assert_eq!(b.load(&conn).unwrap(), vec![vec![5.0], vec![6.0]]);
    }
}
