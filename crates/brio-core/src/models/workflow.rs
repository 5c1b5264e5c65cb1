use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed phase pipeline a campaign workflow moves through.
///
/// Each phase is either autonomous (the engine advances on success) or
/// gated (a human must resolve an approval before the workflow advances).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Intake,
    Discovery,
    StrategyReview,
    Concepting,
    ConceptSelection,
    Development,
    CreativeApproval,
    Production,
    Distribution,
    Measurement,
}

impl Phase {
    /// All phases in pipeline order.
    pub const ALL: [Phase; 10] = [
        Phase::Intake,
        Phase::Discovery,
        Phase::StrategyReview,
        Phase::Concepting,
        Phase::ConceptSelection,
        Phase::Development,
        Phase::CreativeApproval,
        Phase::Production,
        Phase::Distribution,
        Phase::Measurement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Discovery => "discovery",
            Self::StrategyReview => "strategy_review",
            Self::Concepting => "concepting",
            Self::ConceptSelection => "concept_selection",
            Self::Development => "development",
            Self::CreativeApproval => "creative_approval",
            Self::Production => "production",
            Self::Distribution => "distribution",
            Self::Measurement => "measurement",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "intake" => Some(Self::Intake),
            "discovery" => Some(Self::Discovery),
            "strategy_review" => Some(Self::StrategyReview),
            "concepting" => Some(Self::Concepting),
            "concept_selection" => Some(Self::ConceptSelection),
            "development" => Some(Self::Development),
            "creative_approval" => Some(Self::CreativeApproval),
            "production" => Some(Self::Production),
            "distribution" => Some(Self::Distribution),
            "measurement" => Some(Self::Measurement),
            _ => None,
        }
    }

    /// Whether the workflow must suspend for human approval after this phase.
    pub fn is_gated(&self) -> bool {
        matches!(
            self,
            Self::StrategyReview
                | Self::ConceptSelection
                | Self::CreativeApproval
                | Self::Distribution
        )
    }

    /// The phase that follows this one, or `None` for the last phase.
    pub fn next(&self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Completing this phase completes the workflow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Measurement)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal workflows are immutable except for audit fields.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One execution attempt of a campaign through the phase pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub campaign_id: String,
    pub organization_id: String,
    pub current_phase: Phase,
    pub status: WorkflowStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: String, campaign_id: String, organization_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            campaign_id,
            organization_id,
            current_phase: Phase::Intake,
            status: WorkflowStatus::Pending,
            attempt_count: 0,
            error_detail: None,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order_and_gating() {
        assert_eq!(Phase::Intake.next(), Some(Phase::Discovery));
        assert_eq!(Phase::Discovery.next(), Some(Phase::StrategyReview));
        assert_eq!(Phase::Measurement.next(), None);
        assert!(Phase::Measurement.is_terminal());

        let gated: Vec<Phase> = Phase::ALL.iter().copied().filter(Phase::is_gated).collect();
        assert_eq!(
            gated,
            vec![
                Phase::StrategyReview,
                Phase::ConceptSelection,
                Phase::CreativeApproval,
                Phase::Distribution,
            ]
        );
    }

    #[test]
    fn test_phase_str_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_str(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str("launch"), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::AwaitingApproval.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }
}
