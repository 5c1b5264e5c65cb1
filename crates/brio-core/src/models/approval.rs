use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::Phase;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Pending,
    Approved,
    Revise,
    Rejected,
}

impl ApprovalDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Revise => "revise",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "revise" => Some(Self::Revise),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A human decision point raised when a gated phase finishes executing.
/// Resolved exactly once by an external actor; resolution is the only
/// external mutation permitted on an in-flight workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub id: String,
    pub workflow_id: String,
    pub phase: Phase,
    /// Deliverable IDs presented to the reviewer.
    #[serde(default)]
    pub presented_outputs: Vec<String>,
    pub decision: ApprovalDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(
        id: String,
        workflow_id: String,
        phase: Phase,
        presented_outputs: Vec<String>,
    ) -> Self {
        Self {
            id,
            workflow_id,
            phase,
            presented_outputs,
            decision: ApprovalDecision::Pending,
            feedback: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
