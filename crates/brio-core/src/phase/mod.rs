//! Phase Runner — executes a single phase of the pipeline.
//!
//! A phase is a plan of sequential stages; each stage is a group of roles
//! invoked in parallel. Stages are sequential where a later role's input
//! depends on an earlier role's output; roles inside a stage are
//! independent. The merge policy is all-or-nothing: one role's failure
//! fails the whole phase, so a creative package is never silently
//! incomplete.

use std::sync::Arc;

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::agent::{AgentClient, AgentError, AgentRole, RoleRegistry, TaskSpec};
use crate::error::EngineError;
use crate::models::{
    AgentOutput, CheckpointSnapshot, Deliverable, DeliverableType, Phase, WorkflowStatus,
};
use crate::store::WorkflowStore;

/// Which roles a phase invokes, stage by stage.
#[derive(Debug, Clone)]
pub struct PhasePlan {
    pub stages: Vec<Vec<AgentRole>>,
}

impl PhasePlan {
    pub fn roles(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.stages.iter().flatten().copied()
    }
}

/// The fixed role plan for each phase.
pub fn plan_for(phase: Phase) -> PhasePlan {
    use AgentRole::*;
    let stages: Vec<Vec<AgentRole>> = match phase {
        Phase::Intake => vec![vec![Strategist]],
        // Market framing and competitor research are independent
        Phase::Discovery => vec![vec![Strategist, Analyst]],
        Phase::StrategyReview => vec![vec![Strategist]],
        // Proof headlines depend on the concepts existing first
        Phase::Concepting => vec![vec![CreativeDirector], vec![Copywriter]],
        Phase::ConceptSelection => vec![vec![CreativeDirector]],
        // Copy and visuals execute the same selected concept independently
        Phase::Development => vec![vec![Copywriter, ArtDirector]],
        Phase::CreativeApproval => vec![vec![CreativeDirector]],
        Phase::Production => vec![vec![Producer]],
        Phase::Distribution => vec![vec![MediaPlanner]],
        Phase::Measurement => vec![vec![Analyst]],
    };
    PhasePlan { stages }
}

/// What a role's output becomes when persisted for this phase.
pub fn deliverable_type(phase: Phase, role: AgentRole) -> DeliverableType {
    match (phase, role) {
        (Phase::Measurement, AgentRole::Analyst) => DeliverableType::Report,
        (_, AgentRole::Analyst) => DeliverableType::ResearchReport,
        (Phase::Concepting, AgentRole::Copywriter) => DeliverableType::HeadlineSet,
        (_, AgentRole::Copywriter) => DeliverableType::CopyBlock,
        (_, AgentRole::ArtDirector) => DeliverableType::VisualSpec,
        (_, AgentRole::CreativeDirector) => DeliverableType::Concept,
        (_, AgentRole::MediaPlanner) => DeliverableType::Schedule,
        (_, AgentRole::Producer) => DeliverableType::Schedule,
        (_, AgentRole::Strategist) => DeliverableType::Report,
    }
}

fn objective_for(phase: Phase, role: AgentRole) -> String {
    use AgentRole::*;
    let text = match (phase, role) {
        (Phase::Intake, Strategist) => {
            "Normalize the campaign brief: restate the objective, constraints, and success criteria."
        }
        (Phase::Discovery, Strategist) => {
            "Map the market context the brief competes in: category dynamics and brand position."
        }
        (Phase::Discovery, Analyst) => {
            "Research competitors and audience signals relevant to the brief."
        }
        (Phase::StrategyReview, Strategist) => {
            "Produce the strategy brief for review: positioning, audiences, channels, key messages."
        }
        (Phase::Concepting, CreativeDirector) => {
            "Develop three competing campaign concepts from the approved strategy."
        }
        (Phase::Concepting, Copywriter) => {
            "Draft proof headlines for each concept direction."
        }
        (Phase::ConceptSelection, CreativeDirector) => {
            "Assess the concepts against the strategy and recommend one for approval."
        }
        (Phase::Development, Copywriter) => {
            "Write the campaign copy package for the selected concept."
        }
        (Phase::Development, ArtDirector) => {
            "Define the visual system for the selected concept."
        }
        (Phase::CreativeApproval, CreativeDirector) => {
            "Assemble the creative package and flag anything off-strategy before review."
        }
        (Phase::Production, Producer) => {
            "Break the approved creative into a production asset plan."
        }
        (Phase::Distribution, MediaPlanner) => {
            "Schedule placements across the strategy's channels with budget shares."
        }
        (Phase::Measurement, Analyst) => {
            "Define the measurement plan and reporting baseline for the campaign."
        }
        // A plan never pairs other combinations; give the agent something
        // sensible if a custom plan ever does.
        _ => "Contribute your specialty to the current campaign phase.",
    };
    text.to_string()
}

/// Result of running one phase attempt.
pub enum PhaseExecution {
    Completed {
        outputs: Vec<AgentOutput>,
        deliverables: Vec<Deliverable>,
        /// Merged text downstream phases consume via the checkpoint.
        merged: String,
    },
    Failed {
        error_detail: String,
    },
    /// The workflow was cancelled mid-phase; results discarded.
    Cancelled,
}

pub struct PhaseRunner {
    client: Arc<AgentClient>,
    registry: Arc<RoleRegistry>,
    workflows: WorkflowStore,
}

impl PhaseRunner {
    pub fn new(client: Arc<AgentClient>, registry: Arc<RoleRegistry>, workflows: WorkflowStore) -> Self {
        Self {
            client,
            registry,
            workflows,
        }
    }

    /// Execute one attempt of `phase` for the workflow. Persistence is the
    /// caller's job; the runner only talks to agents.
    pub async fn run(
        &self,
        workflow_id: &str,
        phase: Phase,
        snapshot: &CheckpointSnapshot,
        attempt: u32,
    ) -> Result<PhaseExecution, EngineError> {
        let plan = plan_for(phase);
        let mut context = build_context(phase, snapshot);
        let mut outputs: Vec<AgentOutput> = Vec::new();

        for stage in &plan.stages {
            if self.is_cancelled(workflow_id).await? {
                return Ok(PhaseExecution::Cancelled);
            }

            let mut set: JoinSet<(usize, AgentRole, Result<crate::agent::AgentResult, AgentError>)> =
                JoinSet::new();
            for (idx, role) in stage.iter().copied().enumerate() {
                let client = Arc::clone(&self.client);
                let spec = self.registry.get(role).clone();
                let task = TaskSpec {
                    objective: objective_for(phase, role),
                    output_schema: Some(role.output_schema()),
                    boundaries: Vec::new(),
                    heuristics: Vec::new(),
                    revision_feedback: snapshot.revision_feedback.clone(),
                };
                let ctx = context.clone();
                set.spawn(async move {
                    let result = client.invoke(&spec, &task, &ctx).await;
                    (idx, role, result)
                });
            }

            // Wait for the whole stage; a single failure fails the phase.
            let mut stage_results: Vec<(usize, AgentRole, crate::agent::AgentResult)> = Vec::new();
            let mut stage_error: Option<String> = None;
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((idx, role, Ok(result))) => stage_results.push((idx, role, result)),
                    Ok((_, role, Err(err))) => {
                        tracing::warn!(
                            workflow_id,
                            phase = phase.as_str(),
                            role = role.as_str(),
                            attempt,
                            "agent invocation failed: {}",
                            err
                        );
                        stage_error
                            .get_or_insert_with(|| format!("{}: {}", role.as_str(), err));
                    }
                    Err(join_err) => {
                        stage_error.get_or_insert_with(|| format!("task panicked: {}", join_err));
                    }
                }
            }

            if let Some(error_detail) = stage_error {
                return Ok(PhaseExecution::Failed { error_detail });
            }

            if self.is_cancelled(workflow_id).await? {
                return Ok(PhaseExecution::Cancelled);
            }

            stage_results.sort_by_key(|(idx, _, _)| *idx);
            for (_, role, result) in stage_results {
                context.push_str(&format!(
                    "\n\n### {} ({})\n{}",
                    role.as_str(),
                    phase.as_str(),
                    result.content
                ));
                outputs.push(AgentOutput {
                    agent_role: role,
                    content: result.content,
                    token_cost: result.cost.total(),
                });
            }
        }

        let merged = outputs
            .iter()
            .map(|o| format!("### {}\n{}", o.agent_role.as_str(), o.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let deliverables = outputs
            .iter()
            .map(|o| {
                Deliverable::new(
                    Uuid::new_v4().to_string(),
                    workflow_id.to_string(),
                    phase,
                    deliverable_type(phase, o.agent_role),
                    o.content.clone(),
                    attempt,
                )
            })
            .collect();

        Ok(PhaseExecution::Completed {
            outputs,
            deliverables,
            merged,
        })
    }

    async fn is_cancelled(&self, workflow_id: &str) -> Result<bool, EngineError> {
        Ok(self
            .workflows
            .get(workflow_id)
            .await?
            .map(|wf| wf.status == WorkflowStatus::Cancelled)
            .unwrap_or(true))
    }
}

/// Prior material forwarded to every role in the phase: the brief plus
/// the merged outputs of completed phases, in pipeline order.
fn build_context(phase: Phase, snapshot: &CheckpointSnapshot) -> String {
    let mut context = format!("Campaign phase: {}\n\n# Brief\n{}", phase.as_str(), snapshot.brief);
    for prior in Phase::ALL {
        if let Some(output) = snapshot.phase_outputs.get(prior.as_str()) {
            context.push_str(&format!("\n\n# {} output\n{}", prior.as_str(), output));
        }
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{
        AgentClientConfig, CompletionError, CompletionRequest, CompletionResponse,
        CompletionService,
    };
    use crate::db::Database;
    use crate::models::Workflow;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        calls: AtomicUsize,
        fail_for_role: Option<String>,
    }

    #[async_trait]
    impl CompletionService for CountingService {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ref marker) = self.fail_for_role {
                if request.system_prompt.contains(marker) {
                    return Err(CompletionError::Provider("boom".to_string()));
                }
            }
            Ok(CompletionResponse {
                content: "ok\n{\"any\": true}".to_string(),
                model: "test".to_string(),
                input_tokens: 10,
                output_tokens: 5,
            })
        }
    }

    async fn runner(service: Arc<CountingService>) -> (PhaseRunner, WorkflowStore) {
        let db = Database::open_in_memory().unwrap();
        let workflows = WorkflowStore::new(db);
        workflows
            .create(&Workflow::new(
                "wf-1".to_string(),
                "camp-1".to_string(),
                "org-1".to_string(),
            ))
            .await
            .unwrap();
        let client = Arc::new(AgentClient::new(service, AgentClientConfig::default()));
        (
            PhaseRunner::new(client, Arc::new(RoleRegistry::builtin()), workflows.clone()),
            workflows,
        )
    }

    #[test]
    fn test_every_phase_has_a_plan() {
        for phase in Phase::ALL {
            let plan = plan_for(phase);
            assert!(!plan.stages.is_empty(), "{:?} has no stages", phase);
            assert!(plan.roles().count() >= 1);
        }
        // The documented parallel and sequential cases
        assert_eq!(plan_for(Phase::Development).stages, vec![vec![
            AgentRole::Copywriter,
            AgentRole::ArtDirector
        ]]);
        assert_eq!(plan_for(Phase::Concepting).stages.len(), 2);
    }

    #[tokio::test]
    async fn test_run_merges_all_roles() {
        let service = Arc::new(CountingService {
            calls: AtomicUsize::new(0),
            fail_for_role: None,
        });
        let (runner, _) = runner(Arc::clone(&service)).await;

        let snapshot = CheckpointSnapshot::new("launch the widget".to_string());
        let result = runner
            .run("wf-1", Phase::Development, &snapshot, 1)
            .await
            .unwrap();

        match result {
            PhaseExecution::Completed {
                outputs,
                deliverables,
                merged,
            } => {
                assert_eq!(outputs.len(), 2);
                assert_eq!(deliverables.len(), 2);
                assert!(deliverables
                    .iter()
                    .any(|d| d.deliverable_type == DeliverableType::CopyBlock));
                assert!(deliverables
                    .iter()
                    .any(|d| d.deliverable_type == DeliverableType::VisualSpec));
                assert!(merged.contains("copywriter"));
            }
            _ => panic!("expected completed phase"),
        }
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_single_role_failure_fails_whole_phase() {
        // Art Director fails; Copywriter succeeds — no partial credit.
        let service = Arc::new(CountingService {
            calls: AtomicUsize::new(0),
            fail_for_role: Some("Art Director".to_string()),
        });
        let (runner, _) = runner(Arc::clone(&service)).await;

        let snapshot = CheckpointSnapshot::new("brief".to_string());
        let result = runner
            .run("wf-1", Phase::Development, &snapshot, 1)
            .await
            .unwrap();

        match result {
            PhaseExecution::Failed { error_detail } => {
                assert!(error_detail.contains("art_director"));
            }
            _ => panic!("expected failed phase"),
        }
        // Both roles were still invoked (wait-for-all, then fail)
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_workflow_short_circuits() {
        let service = Arc::new(CountingService {
            calls: AtomicUsize::new(0),
            fail_for_role: None,
        });
        let (runner, workflows) = runner(Arc::clone(&service)).await;
        workflows.cancel("wf-1").await.unwrap();

        let snapshot = CheckpointSnapshot::new("brief".to_string());
        let result = runner
            .run("wf-1", Phase::Intake, &snapshot, 1)
            .await
            .unwrap();
        assert!(matches!(result, PhaseExecution::Cancelled));
        assert_eq!(service.calls.load(Ordering::SeqCst), 0);
    }
}
