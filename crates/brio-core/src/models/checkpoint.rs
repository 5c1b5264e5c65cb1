use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::workflow::Phase;

/// The serialized inputs needed to resume a workflow: the brief, prior
/// phase outputs, and any reviewer feedback awaiting incorporation.
///
/// Phase outputs are keyed by phase name and hold the merged text the
/// downstream phases consume — not the full agent transcripts, which live
/// on the phase records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSnapshot {
    /// The campaign brief as provided at workflow start.
    pub brief: String,
    /// Merged output per completed phase, in pipeline order.
    #[serde(default)]
    pub phase_outputs: BTreeMap<String, String>,
    /// Reviewer feedback to fold into the next execution of the current
    /// phase (set by a `revise` resolution, cleared on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision_feedback: Option<String>,
}

impl CheckpointSnapshot {
    pub fn new(brief: String) -> Self {
        Self {
            brief,
            phase_outputs: BTreeMap::new(),
            revision_feedback: None,
        }
    }

    pub fn record_phase_output(&mut self, phase: Phase, merged: String) {
        self.phase_outputs.insert(phase.as_str().to_string(), merged);
        self.revision_feedback = None;
    }
}

/// A durable, versioned snapshot of a workflow's resumable state.
/// Checkpoints are never mutated, only appended; the highest version is
/// the sole source of truth for resumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    pub workflow_id: String,
    pub phase: Phase,
    pub snapshot: CheckpointSnapshot,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        id: String,
        workflow_id: String,
        phase: Phase,
        snapshot: CheckpointSnapshot,
        version: u64,
    ) -> Self {
        Self {
            id,
            workflow_id,
            phase,
            snapshot,
            version,
            created_at: Utc::now(),
        }
    }
}
