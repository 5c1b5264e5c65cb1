use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::Phase;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableType {
    ResearchReport,
    Concept,
    HeadlineSet,
    CopyBlock,
    VisualSpec,
    Schedule,
    Report,
}

impl DeliverableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResearchReport => "research_report",
            Self::Concept => "concept",
            Self::HeadlineSet => "headline_set",
            Self::CopyBlock => "copy_block",
            Self::VisualSpec => "visual_spec",
            Self::Schedule => "schedule",
            Self::Report => "report",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "research_report" => Some(Self::ResearchReport),
            "concept" => Some(Self::Concept),
            "headline_set" => Some(Self::HeadlineSet),
            "copy_block" => Some(Self::CopyBlock),
            "visual_spec" => Some(Self::VisualSpec),
            "schedule" => Some(Self::Schedule),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    Draft,
    Approved,
    Rejected,
}

impl DeliverableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A generated artifact attributable to a phase. Owned by the workflow
/// that produced it until a human approval promotes or demotes `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: String,
    pub workflow_id: String,
    pub phase: Phase,
    #[serde(rename = "type")]
    pub deliverable_type: DeliverableType,
    pub content: String,
    pub status: DeliverableStatus,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn new(
        id: String,
        workflow_id: String,
        phase: Phase,
        deliverable_type: DeliverableType,
        content: String,
        version: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow_id,
            phase,
            deliverable_type,
            content,
            status: DeliverableStatus::Draft,
            version,
            created_at: now,
            updated_at: now,
        }
    }
}
