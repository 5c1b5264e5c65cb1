//! Workflow State Machine — owns the phase sequence, transition rules,
//! the single-flight guarantee, and resumption.
//!
//! Only this module moves a workflow between statuses, and it is the only
//! writer of `failed`. Lower components return typed results; nothing
//! below here mutates shared state directly.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::dispatch::WorkQueue;
use crate::error::EngineError;
use crate::models::{
    ApprovalDecision, ApprovalRequest, Checkpoint, CheckpointSnapshot, DeliverableStatus, Phase,
    PhaseOutcome, PhaseRecord, Workflow, WorkflowStatus,
};
use crate::phase::{PhaseExecution, PhaseRunner};
use crate::store::{
    ApprovalStore, CheckpointStore, DeliverableStore, PhaseCommit, PhaseRecordStore, WorkflowStore,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempt ceiling per phase for agent failures.
    pub max_phase_attempts: u32,
    /// Base delay between attempts; doubles per retry.
    pub retry_backoff: Duration,
    /// Revise decisions a gated phase absorbs before the workflow fails.
    pub max_revisions: u32,
    /// Lease TTL used by the degraded inline-advance path.
    pub lease_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_phase_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            max_revisions: 3,
            lease_ttl: Duration::from_secs(600),
        }
    }
}

/// Status projection served to the dashboard.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatusView {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<ApprovalRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

pub struct WorkflowEngine {
    workflows: WorkflowStore,
    phase_records: PhaseRecordStore,
    checkpoints: CheckpointStore,
    deliverables: DeliverableStore,
    approvals: ApprovalStore,
    runner: PhaseRunner,
    queue: WorkQueue,
    config: EngineConfig,
}

impl WorkflowEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflows: WorkflowStore,
        phase_records: PhaseRecordStore,
        checkpoints: CheckpointStore,
        deliverables: DeliverableStore,
        approvals: ApprovalStore,
        runner: PhaseRunner,
        queue: WorkQueue,
        config: EngineConfig,
    ) -> Self {
        Self {
            workflows,
            phase_records,
            checkpoints,
            deliverables,
            approvals,
            runner,
            queue,
            config,
        }
    }

    // ─── Exposed operations ───────────────────────────────────────────

    /// Create a workflow for the campaign and enqueue its first advance.
    /// Fails with `AlreadyRunning` if a non-terminal workflow exists.
    pub async fn start_workflow(
        &self,
        campaign_id: &str,
        organization_id: &str,
        brief: &str,
    ) -> Result<Workflow, EngineError> {
        let workflow = Workflow::new(
            Uuid::new_v4().to_string(),
            campaign_id.to_string(),
            organization_id.to_string(),
        );
        self.workflows.create(&workflow).await?;

        let checkpoint = Checkpoint::new(
            Uuid::new_v4().to_string(),
            workflow.id.clone(),
            Phase::Intake,
            CheckpointSnapshot::new(brief.to_string()),
            1,
        );
        self.checkpoints.append(&checkpoint).await?;

        tracing::info!(campaign_id, "workflow {} created, enqueueing", workflow.id);
        self.kick(&workflow.id).await;
        Ok(workflow)
    }

    pub async fn get_status(&self, workflow_id: &str) -> Result<WorkflowStatusView, EngineError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", workflow_id)))?;

        let pending_approval = if workflow.status == WorkflowStatus::AwaitingApproval {
            self.approvals.get_pending(workflow_id).await?
        } else {
            None
        };

        Ok(WorkflowStatusView {
            workflow_id: workflow.id,
            status: workflow.status,
            current_phase: workflow.current_phase,
            pending_approval,
            error_detail: workflow.error_detail,
        })
    }

    /// Resolve the pending approval of a gated workflow. The only
    /// external mutation permitted while a workflow is in flight.
    pub async fn resolve_approval(
        &self,
        workflow_id: &str,
        decision: ApprovalDecision,
        feedback: Option<String>,
    ) -> Result<(), EngineError> {
        if decision == ApprovalDecision::Pending {
            return Err(EngineError::BadRequest(
                "decision must be approved, revise, or rejected".to_string(),
            ));
        }

        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", workflow_id)))?;
        if workflow.status != WorkflowStatus::AwaitingApproval {
            return Err(EngineError::NotAwaitingApproval(workflow_id.to_string()));
        }

        let approval = self
            .approvals
            .get_pending(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotAwaitingApproval(workflow_id.to_string()))?;
        let phase = approval.phase;

        if !self
            .approvals
            .resolve(&approval.id, decision, feedback.clone())
            .await?
        {
            // Someone else resolved it between the read and the write.
            return Err(EngineError::NotAwaitingApproval(workflow_id.to_string()));
        }

        tracing::info!(
            workflow_id,
            phase = phase.as_str(),
            decision = decision.as_str(),
            "approval resolved"
        );

        match decision {
            ApprovalDecision::Approved => self.apply_approved(workflow_id, phase).await,
            ApprovalDecision::Revise => self.apply_revise(workflow_id, phase, feedback).await,
            ApprovalDecision::Rejected => {
                self.apply_rejected(workflow_id, phase, feedback).await
            }
            ApprovalDecision::Pending => unreachable!("rejected above"),
        }
    }

    /// Cancel a non-terminal workflow. In-flight agent calls finish but
    /// their results are discarded by the phase commit guard.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), EngineError> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Workflow {} not found", workflow_id)))?;

        if workflow.status.is_terminal() {
            if workflow.status == WorkflowStatus::Cancelled {
                return Ok(());
            }
            return Err(EngineError::Conflict(format!(
                "Workflow {} already {}",
                workflow_id,
                workflow.status.as_str()
            )));
        }

        self.workflows.cancel(workflow_id).await?;
        tracing::info!(workflow_id, "workflow cancelled");
        Ok(())
    }

    // ─── Advancement ──────────────────────────────────────────────────

    /// Drive the workflow forward until it completes, fails, suspends at a
    /// gate, or `max_phases` phases have been committed. The caller must
    /// hold the single-flight lease (status `running`).
    pub async fn run(&self, workflow_id: &str, max_phases: usize) -> Result<(), EngineError> {
        let mut executed = 0usize;
        loop {
            let Some(workflow) = self.workflows.get(workflow_id).await? else {
                return Err(EngineError::NotFound(format!(
                    "Workflow {} not found",
                    workflow_id
                )));
            };
            if workflow.status != WorkflowStatus::Running {
                // Cancelled, suspended, or terminal — nothing to drive.
                return Ok(());
            }

            // Resume at the first phase without a successful record;
            // completed phases are never re-executed.
            let mut phase = workflow.current_phase;
            loop {
                if !self.phase_records.has_success(workflow_id, phase).await? {
                    break;
                }
                match phase.next() {
                    Some(next) => phase = next,
                    None => {
                        self.workflows
                            .commit_phase(PhaseCommit {
                                workflow_id: workflow_id.to_string(),
                                expected_status: WorkflowStatus::Running,
                                new_phase: phase,
                                new_status: WorkflowStatus::Completed,
                                record: None,
                                checkpoint: None,
                                deliverables: vec![],
                                approval: None,
                                error_detail: None,
                            })
                            .await?;
                        return Ok(());
                    }
                }
            }

            if executed >= max_phases {
                return Ok(());
            }
            executed += 1;

            match self.execute_phase(workflow_id, phase).await? {
                StepOutcome::Advanced => continue,
                StepOutcome::Stopped => return Ok(()),
            }
        }
    }

    /// Execute one phase with retry/backoff and commit its outcome.
    async fn execute_phase(
        &self,
        workflow_id: &str,
        phase: Phase,
    ) -> Result<StepOutcome, EngineError> {
        let snapshot = self
            .checkpoints
            .latest(workflow_id)
            .await?
            .map(|c| c.snapshot)
            .unwrap_or_default();

        let mut last_error = String::new();
        for try_idx in 0..self.config.max_phase_attempts {
            if try_idx > 0 {
                let delay = self.config.retry_backoff * 2u32.pow(try_idx - 1);
                tracing::debug!(
                    workflow_id,
                    phase = phase.as_str(),
                    "retrying phase in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            let attempt = self.phase_records.next_attempt(workflow_id, phase).await?;
            self.workflows.increment_attempts(workflow_id).await?;

            match self.runner.run(workflow_id, phase, &snapshot, attempt).await? {
                PhaseExecution::Cancelled => {
                    tracing::info!(
                        workflow_id,
                        phase = phase.as_str(),
                        "phase discarded after cancellation"
                    );
                    return Ok(StepOutcome::Stopped);
                }
                PhaseExecution::Failed { error_detail } => {
                    let record =
                        PhaseRecord::new(Uuid::new_v4().to_string(), workflow_id.to_string(), phase, attempt)
                            .close_failed(error_detail.clone());
                    self.phase_records.insert(&record).await?;
                    last_error = error_detail;
                }
                PhaseExecution::Completed {
                    outputs,
                    deliverables,
                    merged,
                } => {
                    let mut new_snapshot = snapshot.clone();
                    new_snapshot.record_phase_output(phase, merged);
                    let version = self.checkpoints.next_version(workflow_id).await?;
                    let checkpoint = Checkpoint::new(
                        Uuid::new_v4().to_string(),
                        workflow_id.to_string(),
                        phase,
                        new_snapshot,
                        version,
                    );

                    if phase.is_gated() {
                        let record = PhaseRecord::new(
                            Uuid::new_v4().to_string(),
                            workflow_id.to_string(),
                            phase,
                            attempt,
                        )
                        .close(PhaseOutcome::AwaitingApproval, outputs);
                        let approval = ApprovalRequest::new(
                            Uuid::new_v4().to_string(),
                            workflow_id.to_string(),
                            phase,
                            deliverables.iter().map(|d| d.id.clone()).collect(),
                        );
                        let applied = self
                            .workflows
                            .commit_phase(PhaseCommit {
                                workflow_id: workflow_id.to_string(),
                                expected_status: WorkflowStatus::Running,
                                new_phase: phase,
                                new_status: WorkflowStatus::AwaitingApproval,
                                record: Some(record),
                                checkpoint: Some(checkpoint),
                                deliverables,
                                approval: Some(approval),
                                error_detail: None,
                            })
                            .await?;
                        if applied {
                            tracing::info!(
                                workflow_id,
                                phase = phase.as_str(),
                                "gated phase suspended for approval"
                            );
                        }
                        return Ok(StepOutcome::Stopped);
                    }

                    let record = PhaseRecord::new(
                        Uuid::new_v4().to_string(),
                        workflow_id.to_string(),
                        phase,
                        attempt,
                    )
                    .close(PhaseOutcome::Success, outputs);
                    let (new_phase, new_status) = if phase.is_terminal() {
                        (phase, WorkflowStatus::Completed)
                    } else {
                        (phase.next().unwrap_or(phase), WorkflowStatus::Running)
                    };
                    let applied = self
                        .workflows
                        .commit_phase(PhaseCommit {
                            workflow_id: workflow_id.to_string(),
                            expected_status: WorkflowStatus::Running,
                            new_phase,
                            new_status,
                            record: Some(record),
                            checkpoint: Some(checkpoint),
                            deliverables,
                            approval: None,
                            error_detail: None,
                        })
                        .await?;
                    if !applied {
                        // Cancelled while the phase ran; results discarded.
                        return Ok(StepOutcome::Stopped);
                    }
                    if new_status == WorkflowStatus::Completed {
                        tracing::info!(workflow_id, "workflow completed");
                        return Ok(StepOutcome::Stopped);
                    }
                    return Ok(StepOutcome::Advanced);
                }
            }
        }

        // Attempt ceiling exhausted: only the state machine writes failed.
        tracing::warn!(
            workflow_id,
            phase = phase.as_str(),
            "phase attempts exhausted: {}",
            last_error
        );
        self.workflows
            .commit_phase(PhaseCommit {
                workflow_id: workflow_id.to_string(),
                expected_status: WorkflowStatus::Running,
                new_phase: phase,
                new_status: WorkflowStatus::Failed,
                record: None,
                checkpoint: None,
                deliverables: vec![],
                approval: None,
                error_detail: Some(last_error),
            })
            .await?;
        Ok(StepOutcome::Stopped)
    }

    // ─── Approval resolutions ─────────────────────────────────────────

    async fn apply_approved(&self, workflow_id: &str, phase: Phase) -> Result<(), EngineError> {
        self.deliverables
            .set_status_for_phase(workflow_id, phase, DeliverableStatus::Approved)
            .await?;

        // Records are immutable, so approval closes the gate by appending
        // a success record — which is what resumption consults.
        let attempt = self.phase_records.next_attempt(workflow_id, phase).await?;
        let record =
            PhaseRecord::new(Uuid::new_v4().to_string(), workflow_id.to_string(), phase, attempt)
                .close(PhaseOutcome::Success, vec![]);

        let new_phase = phase.next().unwrap_or(phase);
        self.workflows
            .commit_phase(PhaseCommit {
                workflow_id: workflow_id.to_string(),
                expected_status: WorkflowStatus::AwaitingApproval,
                new_phase,
                new_status: WorkflowStatus::Pending,
                record: Some(record),
                checkpoint: None,
                deliverables: vec![],
                approval: None,
                error_detail: None,
            })
            .await?;

        self.kick(workflow_id).await;
        Ok(())
    }

    async fn apply_revise(
        &self,
        workflow_id: &str,
        phase: Phase,
        feedback: Option<String>,
    ) -> Result<(), EngineError> {
        let revisions = self.approvals.count_revisions(workflow_id, phase).await?;
        if revisions >= self.config.max_revisions {
            // The ceiling revise ends the workflow instead of a further
            // re-execution.
            self.deliverables
                .set_status_for_phase(workflow_id, phase, DeliverableStatus::Rejected)
                .await?;
            self.workflows
                .commit_phase(PhaseCommit {
                    workflow_id: workflow_id.to_string(),
                    expected_status: WorkflowStatus::AwaitingApproval,
                    new_phase: phase,
                    new_status: WorkflowStatus::Failed,
                    record: None,
                    checkpoint: None,
                    deliverables: vec![],
                    approval: None,
                    error_detail: Some(format!(
                        "revision limit reached for {}",
                        phase.as_str()
                    )),
                })
                .await?;
            return Ok(());
        }

        // Fold the feedback into a new checkpoint and re-run the phase.
        let mut snapshot = self
            .checkpoints
            .latest(workflow_id)
            .await?
            .map(|c| c.snapshot)
            .unwrap_or_default();
        snapshot.revision_feedback = feedback;
        let version = self.checkpoints.next_version(workflow_id).await?;
        let checkpoint = Checkpoint::new(
            Uuid::new_v4().to_string(),
            workflow_id.to_string(),
            phase,
            snapshot,
            version,
        );

        self.workflows
            .commit_phase(PhaseCommit {
                workflow_id: workflow_id.to_string(),
                expected_status: WorkflowStatus::AwaitingApproval,
                new_phase: phase,
                new_status: WorkflowStatus::Pending,
                record: None,
                checkpoint: Some(checkpoint),
                deliverables: vec![],
                approval: None,
                error_detail: None,
            })
            .await?;

        self.kick(workflow_id).await;
        Ok(())
    }

    async fn apply_rejected(
        &self,
        workflow_id: &str,
        phase: Phase,
        feedback: Option<String>,
    ) -> Result<(), EngineError> {
        self.deliverables
            .set_status_for_phase(workflow_id, phase, DeliverableStatus::Rejected)
            .await?;
        self.workflows
            .commit_phase(PhaseCommit {
                workflow_id: workflow_id.to_string(),
                expected_status: WorkflowStatus::AwaitingApproval,
                new_phase: phase,
                new_status: WorkflowStatus::Failed,
                record: None,
                checkpoint: None,
                deliverables: vec![],
                approval: None,
                error_detail: Some(match feedback {
                    Some(f) => format!("rejected by reviewer: {}", f),
                    None => "rejected by reviewer".to_string(),
                }),
            })
            .await?;
        Ok(())
    }

    // ─── Queueing ─────────────────────────────────────────────────────

    /// Enqueue an advance. When the queue is unavailable, run one phase
    /// synchronously and re-enqueue so the workflow always makes forward
    /// progress, at the cost of latency for this caller.
    async fn kick(&self, workflow_id: &str) {
        if self.queue.enqueue(workflow_id).is_ok() {
            return;
        }
        tracing::warn!(workflow_id, "task queue unavailable; advancing one phase inline");

        let owner = format!("inline-{}", Uuid::new_v4());
        match self
            .workflows
            .acquire_lease(workflow_id, &owner, self.config.lease_ttl)
            .await
        {
            Ok(true) => {
                if let Err(e) = self.run(workflow_id, 1).await {
                    tracing::error!(workflow_id, "inline advance failed: {}", e);
                }
                if let Err(e) = self.workflows.release_lease(workflow_id, &owner).await {
                    tracing::error!(workflow_id, "inline lease release failed: {}", e);
                }
                let _ = self.queue.enqueue(workflow_id);
            }
            Ok(false) => {}
            Err(e) => tracing::error!(workflow_id, "inline lease acquisition failed: {}", e),
        }
    }
}

enum StepOutcome {
    /// A phase committed and the pipeline continues.
    Advanced,
    /// The workflow suspended, completed, failed, or was cancelled.
    Stopped,
}
