//! Versioned, append-only workflow checkpoints. The highest version for a
//! workflow is the sole source of truth for resumption; writing a
//! duplicate version is rejected by the unique index.

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Checkpoint, CheckpointSnapshot, Phase};

#[derive(Clone)]
pub struct CheckpointStore {
    db: Database,
}

impl CheckpointStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert inside an existing transaction (used by the phase commit).
    pub fn insert_tx(conn: &rusqlite::Connection, checkpoint: &Checkpoint) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO checkpoints (id, workflow_id, phase, snapshot, version, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                checkpoint.id,
                checkpoint.workflow_id,
                checkpoint.phase.as_str(),
                serde_json::to_string(&checkpoint.snapshot).unwrap_or_else(|_| "{}".to_string()),
                checkpoint.version,
                checkpoint.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Append a checkpoint. A duplicate (workflow, version) pair surfaces
    /// as `Conflict`.
    pub async fn append(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let checkpoint = checkpoint.clone();
        self.db
            .with_conn_async(move |conn| Self::insert_tx(conn, &checkpoint))
            .await
    }

    /// The highest-version checkpoint for a workflow.
    pub async fn latest(&self, workflow_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    "SELECT id, workflow_id, phase, snapshot, version, created_at \
                     FROM checkpoints WHERE workflow_id = ?1 \
                     ORDER BY version DESC LIMIT 1",
                    rusqlite::params![workflow_id],
                    |row| Ok(row_to_checkpoint(row)),
                )
                .optional()
            })
            .await
    }

    /// The version the next checkpoint for this workflow should carry.
    pub async fn next_version(&self, workflow_id: &str) -> Result<u64, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let max: Option<u64> = conn.query_row(
                    "SELECT MAX(version) FROM checkpoints WHERE workflow_id = ?1",
                    rusqlite::params![workflow_id],
                    |row| row.get(0),
                )?;
                Ok(max.unwrap_or(0) + 1)
            })
            .await
    }
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> Checkpoint {
    let snapshot_str: String = row.get(3).unwrap_or_default();
    let snapshot: CheckpointSnapshot = serde_json::from_str(&snapshot_str).unwrap_or_default();
    let created_ms: i64 = row.get(5).unwrap_or(0);

    Checkpoint {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        phase: Phase::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(Phase::Intake),
        snapshot,
        version: row.get(4).unwrap_or(0),
        created_at: Utc
            .timestamp_millis_opt(created_ms)
            .single()
            .unwrap_or_else(Utc::now),
    }
}
