//! Deliverable persistence. Rows are append-only per version; the only
//! mutation is the status promotion performed by approval resolution.

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Deliverable, DeliverableStatus, DeliverableType, Phase};

#[derive(Clone)]
pub struct DeliverableStore {
    db: Database,
}

impl DeliverableStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert inside an existing transaction (used by the phase commit).
    pub fn insert_tx(conn: &rusqlite::Connection, d: &Deliverable) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO deliverables (id, workflow_id, phase, type, content, status, \
             version, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                d.id,
                d.workflow_id,
                d.phase.as_str(),
                d.deliverable_type.as_str(),
                d.content,
                d.status.as_str(),
                d.version,
                d.created_at.timestamp_millis(),
                d.updated_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub async fn insert(&self, deliverable: &Deliverable) -> Result<(), EngineError> {
        let deliverable = deliverable.clone();
        self.db
            .with_conn_async(move |conn| Self::insert_tx(conn, &deliverable))
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Deliverable>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_DELIVERABLE),
                    rusqlite::params![id],
                    |row| Ok(row_to_deliverable(row)),
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<Deliverable>, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE workflow_id = ?1 ORDER BY created_at ASC",
                    SELECT_DELIVERABLE
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id], |row| {
                        Ok(row_to_deliverable(row))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_by_phase(
        &self,
        workflow_id: &str,
        phase: Phase,
    ) -> Result<Vec<Deliverable>, EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE workflow_id = ?1 AND phase = ?2 ORDER BY created_at ASC",
                    SELECT_DELIVERABLE
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id, phase], |row| {
                        Ok(row_to_deliverable(row))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Promote or demote a deliverable (approval resolution only).
    pub async fn set_status(
        &self,
        id: &str,
        status: DeliverableStatus,
    ) -> Result<(), EngineError> {
        let id = id.to_string();
        let status = status.as_str();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE deliverables SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, status, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Promote every deliverable of one phase in one statement.
    pub async fn set_status_for_phase(
        &self,
        workflow_id: &str,
        phase: Phase,
        status: DeliverableStatus,
    ) -> Result<(), EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        let status = status.as_str();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE deliverables SET status = ?3, updated_at = ?4 \
                     WHERE workflow_id = ?1 AND phase = ?2",
                    rusqlite::params![workflow_id, phase, status, now],
                )?;
                Ok(())
            })
            .await
    }
}

const SELECT_DELIVERABLE: &str =
    "SELECT id, workflow_id, phase, type, content, status, version, created_at, updated_at \
     FROM deliverables";

fn row_to_deliverable(row: &rusqlite::Row<'_>) -> Deliverable {
    let to_dt = |ms: i64| Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);

    Deliverable {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        phase: Phase::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(Phase::Intake),
        deliverable_type: DeliverableType::from_str(&row.get::<_, String>(3).unwrap_or_default())
            .unwrap_or(DeliverableType::Report),
        content: row.get(4).unwrap_or_default(),
        status: DeliverableStatus::from_str(&row.get::<_, String>(5).unwrap_or_default())
            .unwrap_or(DeliverableStatus::Draft),
        version: row.get(6).unwrap_or(1),
        created_at: to_dt(row.get(7).unwrap_or(0)),
        updated_at: to_dt(row.get(8).unwrap_or(0)),
    }
}
