//! Append-only phase execution records. A closed record is never
//! mutated; re-execution writes a new row with a higher attempt number.

use chrono::{TimeZone, Utc};

use crate::db::Database;
use crate::error::EngineError;
use crate::models::{Phase, PhaseOutcome, PhaseRecord};

#[derive(Clone)]
pub struct PhaseRecordStore {
    db: Database,
}

impl PhaseRecordStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert inside an existing transaction (used by the phase commit).
    pub fn insert_tx(conn: &rusqlite::Connection, record: &PhaseRecord) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO phase_records (id, workflow_id, phase, attempt, outcome, \
             agent_outputs, error_detail, started_at, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                record.id,
                record.workflow_id,
                record.phase.as_str(),
                record.attempt,
                record.outcome.map(|o| o.as_str()),
                serde_json::to_string(&record.agent_outputs).unwrap_or_else(|_| "[]".to_string()),
                record.error_detail,
                record.started_at.timestamp_millis(),
                record.finished_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    pub async fn insert(&self, record: &PhaseRecord) -> Result<(), EngineError> {
        let record = record.clone();
        self.db
            .with_conn_async(move |conn| Self::insert_tx(conn, &record))
            .await
    }

    pub async fn list_by_workflow(&self, workflow_id: &str) -> Result<Vec<PhaseRecord>, EngineError> {
        let workflow_id = workflow_id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, phase, attempt, outcome, agent_outputs, \
                     error_detail, started_at, finished_at \
                     FROM phase_records WHERE workflow_id = ?1 \
                     ORDER BY started_at ASC, attempt ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id], |row| Ok(row_to_record(row)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Whether the phase has a closed, successful record.
    pub async fn has_success(&self, workflow_id: &str, phase: Phase) -> Result<bool, EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        self.db
            .with_conn_async(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM phase_records \
                     WHERE workflow_id = ?1 AND phase = ?2 AND outcome = 'success' \
                       AND finished_at IS NOT NULL",
                    rusqlite::params![workflow_id, phase],
                    |row| row.get(0),
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// The attempt number the next execution of this phase should carry.
    pub async fn next_attempt(&self, workflow_id: &str, phase: Phase) -> Result<u32, EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        self.db
            .with_conn_async(move |conn| {
                let max: Option<u32> = conn.query_row(
                    "SELECT MAX(attempt) FROM phase_records \
                     WHERE workflow_id = ?1 AND phase = ?2",
                    rusqlite::params![workflow_id, phase],
                    |row| row.get(0),
                )?;
                Ok(max.unwrap_or(0) + 1)
            })
            .await
    }

    /// Count of closed records with the given outcome for one phase.
    pub async fn count_outcome(
        &self,
        workflow_id: &str,
        phase: Phase,
        outcome: PhaseOutcome,
    ) -> Result<u32, EngineError> {
        let workflow_id = workflow_id.to_string();
        let phase = phase.as_str();
        let outcome = outcome.as_str();
        self.db
            .with_conn_async(move |conn| {
                let n: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM phase_records \
                     WHERE workflow_id = ?1 AND phase = ?2 AND outcome = ?3",
                    rusqlite::params![workflow_id, phase, outcome],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> PhaseRecord {
    let to_dt = |ms: Option<i64>| ms.and_then(|v| Utc.timestamp_millis_opt(v).single());
    let outputs_str: String = row.get(5).unwrap_or_default();

    PhaseRecord {
        id: row.get(0).unwrap_or_default(),
        workflow_id: row.get(1).unwrap_or_default(),
        phase: Phase::from_str(&row.get::<_, String>(2).unwrap_or_default())
            .unwrap_or(Phase::Intake),
        attempt: row.get(3).unwrap_or(1),
        outcome: row
            .get::<_, Option<String>>(4)
            .unwrap_or(None)
            .and_then(|s| PhaseOutcome::from_str(&s)),
        agent_outputs: serde_json::from_str(&outputs_str).unwrap_or_default(),
        error_detail: row.get(6).unwrap_or(None),
        started_at: to_dt(row.get(7).ok()).unwrap_or_else(Utc::now),
        finished_at: to_dt(row.get(8).unwrap_or(None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::models::{AgentOutput, Workflow};
    use crate::store::WorkflowStore;

    async fn setup() -> (WorkflowStore, PhaseRecordStore) {
        let db = Database::open_in_memory().unwrap();
        let workflows = WorkflowStore::new(db.clone());
        workflows
            .create(&Workflow::new(
                "wf-1".to_string(),
                "camp-1".to_string(),
                "org-1".to_string(),
            ))
            .await
            .unwrap();
        (workflows, PhaseRecordStore::new(db))
    }

    #[tokio::test]
    async fn test_attempts_append_not_overwrite() {
        let (_, records) = setup().await;

        let failed = PhaseRecord::new("r1".to_string(), "wf-1".to_string(), Phase::Intake, 1)
            .close_failed("provider error".to_string());
        records.insert(&failed).await.unwrap();
        assert_eq!(records.next_attempt("wf-1", Phase::Intake).await.unwrap(), 2);
        assert!(!records.has_success("wf-1", Phase::Intake).await.unwrap());

        let ok = PhaseRecord::new("r2".to_string(), "wf-1".to_string(), Phase::Intake, 2).close(
            PhaseOutcome::Success,
            vec![AgentOutput {
                agent_role: AgentRole::Strategist,
                content: "done".to_string(),
                token_cost: 42,
            }],
        );
        records.insert(&ok).await.unwrap();

        assert!(records.has_success("wf-1", Phase::Intake).await.unwrap());
        let all = records.list_by_workflow("wf-1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].total_token_cost(), 42);
        assert_eq!(
            records
                .count_outcome("wf-1", Phase::Intake, PhaseOutcome::Failed)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_duplicate_attempt_rejected() {
        let (_, records) = setup().await;
        let r1 = PhaseRecord::new("r1".to_string(), "wf-1".to_string(), Phase::Intake, 1);
        let r2 = PhaseRecord::new("r2".to_string(), "wf-1".to_string(), Phase::Intake, 1);
        records.insert(&r1).await.unwrap();
        let err = records.insert(&r2).await.unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }
}
