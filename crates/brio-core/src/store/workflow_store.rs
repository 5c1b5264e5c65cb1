//! Workflow persistence: CRUD, the single-flight lease, and the
//! transactional phase commit.
//!
//! All workflow mutation funnels through here, and every commit that
//! changes `status` together with phase records or checkpoints happens in
//! one SQLite transaction so a crash between the writes cannot leave an
//! inconsistent pair.

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;
use std::time::Duration;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{
    ApprovalRequest, Checkpoint, Deliverable, Phase, PhaseRecord, Workflow, WorkflowStatus,
};

use super::approval_store::ApprovalStore;
use super::checkpoint_store::CheckpointStore;
use super::deliverable_store::DeliverableStore;
use super::phase_record_store::PhaseRecordStore;

/// One atomic workflow transition: the workflow row mutation plus the
/// records that justify it.
pub struct PhaseCommit {
    pub workflow_id: String,
    /// Commit only applies if the workflow is still in this status —
    /// a cancel racing the phase execution makes the commit a no-op.
    pub expected_status: WorkflowStatus,
    pub new_phase: Phase,
    pub new_status: WorkflowStatus,
    pub record: Option<PhaseRecord>,
    pub checkpoint: Option<Checkpoint>,
    pub deliverables: Vec<Deliverable>,
    /// Approval raised by a gated phase, written with the suspension.
    pub approval: Option<ApprovalRequest>,
    pub error_detail: Option<String>,
}

#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new workflow. The partial unique index on active
    /// campaigns turns a duplicate start into `AlreadyRunning`.
    pub async fn create(&self, workflow: &Workflow) -> Result<(), EngineError> {
        let wf = workflow.clone();
        let campaign_id = workflow.campaign_id.clone();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, campaign_id, organization_id, current_phase, \
                     status, attempt_count, error_detail, lease_owner, lease_expires_at, \
                     created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        wf.id,
                        wf.campaign_id,
                        wf.organization_id,
                        wf.current_phase.as_str(),
                        wf.status.as_str(),
                        wf.attempt_count,
                        wf.error_detail,
                        wf.lease_owner,
                        wf.lease_expires_at.map(|t| t.timestamp_millis()),
                        wf.created_at.timestamp_millis(),
                        wf.updated_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(|e| match e {
                EngineError::Conflict(_) => EngineError::AlreadyRunning(campaign_id),
                other => other,
            })
    }

    pub async fn get(&self, id: &str) -> Result<Option<Workflow>, EngineError> {
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", SELECT_WORKFLOW),
                    rusqlite::params![id],
                    |row| Ok(row_to_workflow(row)),
                )
                .optional()
            })
            .await
    }

    /// The non-terminal workflow for a campaign, if any.
    pub async fn get_active_for_campaign(
        &self,
        campaign_id: &str,
    ) -> Result<Option<Workflow>, EngineError> {
        let campaign_id = campaign_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE campaign_id = ?1 \
                         AND status NOT IN ('completed', 'failed', 'cancelled')",
                        SELECT_WORKFLOW
                    ),
                    rusqlite::params![campaign_id],
                    |row| Ok(row_to_workflow(row)),
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_campaign(&self, campaign_id: &str) -> Result<Vec<Workflow>, EngineError> {
        let campaign_id = campaign_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE campaign_id = ?1 ORDER BY created_at DESC",
                    SELECT_WORKFLOW
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![campaign_id], |row| Ok(row_to_workflow(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    // ─── Single-flight lease ──────────────────────────────────────────

    /// Try to claim the exclusive lease for a workflow. Succeeds only when
    /// the workflow has runnable work (`pending`, or `running` with an
    /// expired lease left by a crashed worker). Contention returns false.
    pub async fn acquire_lease(
        &self,
        id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        let id = id.to_string();
        let owner = owner.to_string();
        let now = Utc::now().timestamp_millis();
        let expires = now + ttl.as_millis() as i64;
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE workflows \
                     SET status = 'running', lease_owner = ?2, lease_expires_at = ?3, \
                         updated_at = ?4 \
                     WHERE id = ?1 \
                       AND (status = 'pending' \
                            OR (status = 'running' \
                                AND (lease_expires_at IS NULL OR lease_expires_at < ?4)))",
                    rusqlite::params![id, owner, expires, now],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Extend the lease while still processing. Fails (false) if the lease
    /// was lost to another owner.
    pub async fn renew_lease(
        &self,
        id: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool, EngineError> {
        let id = id.to_string();
        let owner = owner.to_string();
        let now = Utc::now().timestamp_millis();
        let expires = now + ttl.as_millis() as i64;
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE workflows SET lease_expires_at = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND lease_owner = ?2",
                    rusqlite::params![id, owner, expires, now],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Release the lease. If the workflow is still `running` (the engine
    /// stopped without reaching a terminal or suspended state, e.g. a
    /// persistence error), it reverts to `pending` so a later claim can
    /// make progress.
    pub async fn release_lease(&self, id: &str, owner: &str) -> Result<(), EngineError> {
        let id = id.to_string();
        let owner = owner.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workflows \
                     SET lease_owner = NULL, lease_expires_at = NULL, \
                         status = CASE WHEN status = 'running' THEN 'pending' ELSE status END, \
                         updated_at = ?3 \
                     WHERE id = ?1 AND lease_owner = ?2",
                    rusqlite::params![id, owner, now],
                )?;
                Ok(())
            })
            .await
    }

    // ─── Status transitions ───────────────────────────────────────────

    /// Conditional status transition; returns whether a row changed.
    pub async fn transition_status(
        &self,
        id: &str,
        from: WorkflowStatus,
        to: WorkflowStatus,
    ) -> Result<bool, EngineError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        let from = from.as_str();
        let to = to.as_str();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE workflows SET status = ?3, updated_at = ?4 \
                     WHERE id = ?1 AND status = ?2",
                    rusqlite::params![id, from, to, now],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Cancel a non-terminal workflow. Terminal workflows are immutable.
    pub async fn cancel(&self, id: &str) -> Result<bool, EngineError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE workflows SET status = 'cancelled', updated_at = ?2, \
                         lease_owner = NULL, lease_expires_at = NULL \
                     WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
                    rusqlite::params![id, now],
                )?;
                Ok(n > 0)
            })
            .await
    }

    pub async fn increment_attempts(&self, id: &str) -> Result<(), EngineError> {
        let id = id.to_string();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "UPDATE workflows SET attempt_count = attempt_count + 1, updated_at = ?2 \
                     WHERE id = ?1",
                    rusqlite::params![id, now],
                )?;
                Ok(())
            })
            .await
    }

    // ─── Transactional phase commit ───────────────────────────────────

    /// Apply one workflow transition atomically with its phase record,
    /// checkpoint, and deliverables. Returns false (and writes nothing)
    /// when the workflow left `expected_status` — which is how results of
    /// a cancelled phase get discarded rather than persisted.
    pub async fn commit_phase(&self, commit: PhaseCommit) -> Result<bool, EngineError> {
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let tx = conn.unchecked_transaction()?;

                let n = tx.execute(
                    "UPDATE workflows \
                     SET current_phase = ?3, status = ?4, error_detail = ?5, updated_at = ?6 \
                     WHERE id = ?1 AND status = ?2",
                    rusqlite::params![
                        commit.workflow_id,
                        commit.expected_status.as_str(),
                        commit.new_phase.as_str(),
                        commit.new_status.as_str(),
                        commit.error_detail,
                        now,
                    ],
                )?;
                if n == 0 {
                    // Workflow was cancelled (or otherwise moved on) while
                    // the phase ran; discard everything.
                    tx.rollback()?;
                    return Ok(false);
                }

                if let Some(ref record) = commit.record {
                    PhaseRecordStore::insert_tx(&tx, record)?;
                }
                if let Some(ref checkpoint) = commit.checkpoint {
                    CheckpointStore::insert_tx(&tx, checkpoint)?;
                }
                for deliverable in &commit.deliverables {
                    DeliverableStore::insert_tx(&tx, deliverable)?;
                }
                if let Some(ref approval) = commit.approval {
                    ApprovalStore::insert_tx(&tx, approval)?;
                }

                tx.commit()?;
                Ok(true)
            })
            .await
    }
}

const SELECT_WORKFLOW: &str =
    "SELECT id, campaign_id, organization_id, current_phase, status, attempt_count, \
     error_detail, lease_owner, lease_expires_at, created_at, updated_at FROM workflows";

fn row_to_workflow(row: &rusqlite::Row<'_>) -> Workflow {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());

    Workflow {
        id: row.get(0).unwrap_or_default(),
        campaign_id: row.get(1).unwrap_or_default(),
        organization_id: row.get(2).unwrap_or_default(),
        current_phase: Phase::from_str(&row.get::<_, String>(3).unwrap_or_default())
            .unwrap_or(Phase::Intake),
        status: WorkflowStatus::from_str(&row.get::<_, String>(4).unwrap_or_default())
            .unwrap_or(WorkflowStatus::Pending),
        attempt_count: row.get(5).unwrap_or(0),
        error_detail: row.get(6).unwrap_or(None),
        lease_owner: row.get(7).unwrap_or(None),
        lease_expires_at: to_dt(row.get(8).unwrap_or(None)),
        created_at: to_dt(row.get(9).ok()).unwrap_or_else(Utc::now),
        updated_at: to_dt(row.get(10).ok()).unwrap_or_else(Utc::now),
    }
}
