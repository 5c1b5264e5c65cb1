use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::Phase;
use crate::agent::AgentRole;

/// How a single phase execution concluded.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PhaseOutcome {
    Success,
    Failed,
    AwaitingApproval,
}

impl PhaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::AwaitingApproval => "awaiting_approval",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            _ => None,
        }
    }
}

/// One specialist's contribution to a phase execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub agent_role: AgentRole,
    pub content: String,
    /// Tokens billed for this invocation (input + output).
    pub token_cost: u64,
}

/// One execution attempt of a (workflow, phase) pair. Append-only: a record
/// is immutable once `finished_at` is set; re-execution creates a new
/// record with a higher `attempt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub id: String,
    pub workflow_id: String,
    pub phase: Phase,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<PhaseOutcome>,
    #[serde(default)]
    pub agent_outputs: Vec<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    pub fn new(id: String, workflow_id: String, phase: Phase, attempt: u32) -> Self {
        Self {
            id,
            workflow_id,
            phase,
            attempt,
            outcome: None,
            agent_outputs: Vec::new(),
            error_detail: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Close the record with a final outcome.
    pub fn close(mut self, outcome: PhaseOutcome, outputs: Vec<AgentOutput>) -> Self {
        self.outcome = Some(outcome);
        self.agent_outputs = outputs;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn close_failed(mut self, error_detail: String) -> Self {
        self.outcome = Some(PhaseOutcome::Failed);
        self.error_detail = Some(error_detail);
        self.finished_at = Some(Utc::now());
        self
    }

    /// Total tokens billed across all agent outputs of this attempt.
    pub fn total_token_cost(&self) -> u64 {
        self.agent_outputs.iter().map(|o| o.token_cost).sum()
    }
}
