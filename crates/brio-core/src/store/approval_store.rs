//! Approval request persistence. An approval is resolved exactly once:
//! resolution is a conditional update guarded on `decision = 'pending'`.

use chrono::{TimeZone, Utc};
use rusqlite::OptionalExtension;

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{ApprovalDecision, ApprovalRequest, Phase};

#[derive(Clone)]
pub struct ApprovalStore {
    db: Database,
}

impl ApprovalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert inside an existing transaction (used by the phase commit).
    pub fn insert_tx(conn: &rusqlite::Connection, a: &ApprovalRequest) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO approvals (id, workflow_id, phase, presented_outputs, \
             decision, feedback, created_at, resolved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                a.id,
                a.workflow_id,
                a.phase.as_str(),
                serde_json::to_string(&a.presented_outputs).unwrap_or_else(|_| "[]".to_string()),
                a.decision.as_str(),
                a.feedback,
                a.created_at.timestamp_millis(),
                a.resolved_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    pub async fn create(&self, approval: &ApprovalRequest) -> Result<(), EngineError> {
        let a = approval.clone();
        self.db
            .with_conn_async(move |conn| Self::insert_tx(conn, &a))
            .await
    }

    /// The unresolved approval for a workflow, if any. At most one exists
    /// at a time because the workflow suspends while gated.
    pub async fn get_pending(
        &self,
        workflow_id: &str,
    ) -> Result<Option<ApprovalRequest>, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                conn.query_row(
                    &format!(
                        "{} WHERE workflow_id = ?1 AND decision = 'pending' \
                         ORDER BY created_at DESC LIMIT 1",
                        SELECT_APPROVAL
                    ),
                    rusqlite::params![workflow_id],
                    |row| Ok(row_to_approval(row)),
                )
                .optional()
            })
            .await
    }

    pub async fn list_by_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<ApprovalRequest>, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE workflow_id = ?1 ORDER BY created_at ASC",
                    SELECT_APPROVAL
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id], |row| Ok(row_to_approval(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Resolve a pending approval. Returns false if it was already
    /// resolved (exactly-once semantics).
    pub async fn resolve(
        &self,
        id: &str,
        decision: ApprovalDecision,
        feedback: Option<String>,
    ) -> Result<bool, EngineError> {
        let id = id.to_string();
        let decision = decision.as_str();
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                let n = conn.execute(
                    "UPDATE approvals SET decision = ?2, feedback = ?3, resolved_at = ?4 \
                     WHERE id = ?1 AND decision = 'pending'",
                    rusqlite::params![id, decision, feedback, now],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// How many `revise` decisions this phase has absorbed.
    pub async fn count_revisions(
        &self,
        workflow_id: &str,
        phase: Phase,
    ) -> Result<u32, EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        self.db
            .with_conn_async(move |conn| {
                let n: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM approvals \
                     WHERE workflow_id = ?1 AND phase = ?2 AND decision = 'revise'",
                    rusqlite::params![workflow_id, phase],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await
    }
}

const SELECT_APPROVAL: &str =
    "SELECT id, workflow_id, phase, presented_outputs, decision, feedback, created_at, \
     resolved_at FROM approvals";

fn row_to_approval(row: &rusqlite::Row<'_>) -> ApprovalRequest {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());
    let outputs_str: String = row.get(3).unwrap_or_default();

    ApprovalRequest {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        phase: Phase::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(Phase::Intake),
        presented_outputs: serde_json::from_str(&outputs_str).unwrap_or_default(),
        decision: ApprovalDecision::from_str(&row.get::<_, String>(4).unwrap_or_default())
            .unwrap_or(ApprovalDecision::Pending),
        feedback: row.get(5).unwrap_or(None),
        created_at: to_dt(row.get(6).ok()).unwrap_or_else(Utc::now),
        resolved_at: to_dt(row.get(7).unwrap_or(None)),
    }
}
