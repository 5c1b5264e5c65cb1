//! Integration tests: drive the full engine (stores + runner + state
//! machine + dispatcher) against a scripted completion service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use brio_core::agent::{
    AgentClientConfig, CompletionError, CompletionRequest, CompletionResponse, CompletionService,
};
use brio_core::db::Database;
use brio_core::dispatch::{Dispatcher, DispatcherConfig};
use brio_core::models::{ApprovalDecision, Phase, PhaseOutcome, WorkflowStatus};
use brio_core::workflow::EngineConfig;
use brio_core::{AppState, AppStateInner, EngineError};

/// Completion service that records which phase each call served and can
/// fail a phase a scripted number of times.
struct RecordingService {
    prompts: Mutex<Vec<String>>,
    fail_remaining: Mutex<HashMap<String, u32>>,
    delay: Duration,
}

impl RecordingService {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            fail_remaining: Mutex::new(HashMap::new()),
            delay: Duration::from_millis(0),
        })
    }

    fn with_failures(failures: &[(&str, u32)]) -> Arc<Self> {
        let service = Self::new();
        {
            let mut map = service.fail_remaining.lock().unwrap();
            for (phase, n) in failures {
                map.insert(phase.to_string(), *n);
            }
        }
        service
    }

    fn calls_for(&self, phase: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p == &phase)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

fn extract_phase(user_prompt: &str) -> String {
    user_prompt
        .split_once("Campaign phase: ")
        .map(|(_, rest)| rest.lines().next().unwrap_or("").trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[async_trait]
impl CompletionService for RecordingService {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        let phase = extract_phase(&request.user_prompt);
        self.prompts.lock().unwrap().push(phase.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        {
            let mut failures = self.fail_remaining.lock().unwrap();
            if let Some(n) = failures.get_mut(&phase) {
                if *n > 0 {
                    *n -= 1;
                    return Err(CompletionError::Provider(
                        "transient provider outage".to_string(),
                    ));
                }
            }
        }

        Ok(CompletionResponse {
            content: "Work complete.\n{\"ok\": true}".to_string(),
            model: "scripted".to_string(),
            input_tokens: 120,
            output_tokens: 60,
        })
    }
}

fn harness(db: Database, service: Arc<RecordingService>) -> (AppState, Dispatcher) {
    let engine_config = EngineConfig {
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    };
    let (inner, receiver) = AppStateInner::new(
        db,
        service,
        AgentClientConfig::default(),
        engine_config,
    );
    let state: AppState = Arc::new(inner);
    let dispatcher = state.spawn_dispatcher(
        receiver,
        DispatcherConfig {
            workers: 2,
            lease_ttl: Duration::from_secs(60),
            requeue_delay: Duration::from_millis(10),
        },
    );
    (state, dispatcher)
}

async fn wait_until<F, Fut>(mut check: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn wait_for_gate(state: &AppState, workflow_id: &str, phase: Phase) {
    let state = Arc::clone(state);
    let id = workflow_id.to_string();
    wait_until(
        move || {
            let state = Arc::clone(&state);
            let id = id.clone();
            async move {
                state
                    .workflow_store
                    .get(&id)
                    .await
                    .unwrap()
                    .map(|wf| {
                        wf.status == WorkflowStatus::AwaitingApproval && wf.current_phase == phase
                    })
                    .unwrap_or(false)
            }
        },
        &format!("gate at {}", phase.as_str()),
    )
    .await;
}

async fn wait_for_status(state: &AppState, workflow_id: &str, status: WorkflowStatus) {
    let state = Arc::clone(state);
    let id = workflow_id.to_string();
    wait_until(
        move || {
            let state = Arc::clone(&state);
            let id = id.clone();
            async move {
                state
                    .workflow_store
                    .get(&id)
                    .await
                    .unwrap()
                    .map(|wf| wf.status == status)
                    .unwrap_or(false)
            }
        },
        status.as_str(),
    )
    .await;
}

// ─── Gated halt across the first two gates ────────────────────────────

#[tokio::test]
async fn test_pipeline_halts_at_each_gate() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "launch the widget")
        .await
        .unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Pending);

    // intake, discovery run autonomously; strategy_review gates
    wait_for_gate(&state, &workflow.id, Phase::StrategyReview).await;
    assert_eq!(service.calls_for("intake"), 1);
    assert_eq!(service.calls_for("discovery"), 2); // strategist + analyst
    assert_eq!(service.calls_for("strategy_review"), 1);

    // Gated halt: zero further agent calls while suspended
    let calls_at_gate = service.total_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.total_calls(), calls_at_gate);

    let status = state.engine.get_status(&workflow.id).await.unwrap();
    let approval = status.pending_approval.expect("pending approval");
    assert_eq!(approval.phase, Phase::StrategyReview);
    assert!(!approval.presented_outputs.is_empty());

    state
        .engine
        .resolve_approval(&workflow.id, ApprovalDecision::Approved, None)
        .await
        .unwrap();

    // concepting runs; concept_selection gates again
    wait_for_gate(&state, &workflow.id, Phase::ConceptSelection).await;
    assert_eq!(service.calls_for("concepting"), 2); // director, then copywriter

    let records = state
        .phase_record_store
        .list_by_workflow(&workflow.id)
        .await
        .unwrap();
    let successes = records
        .iter()
        .filter(|r| r.outcome == Some(PhaseOutcome::Success))
        .count();
    // intake, discovery, approved strategy_review, concepting
    assert_eq!(successes, 4);

    let awaiting = records
        .iter()
        .filter(|r| r.outcome == Some(PhaseOutcome::AwaitingApproval))
        .count();
    assert_eq!(awaiting, 2); // both gate executions
}

// ─── Single-flight ────────────────────────────────────────────────────

#[tokio::test]
async fn test_single_flight_under_duplicate_delivery() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();

    // At-least-once queue: deliver the same item many times
    for _ in 0..10 {
        state.queue.enqueue(&workflow.id).unwrap();
    }

    wait_for_gate(&state, &workflow.id, Phase::StrategyReview).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Exactly one execution per phase, never N
    assert_eq!(service.calls_for("intake"), 1);
    assert_eq!(service.calls_for("discovery"), 2);
    assert_eq!(service.calls_for("strategy_review"), 1);
}

// ─── Resumability ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_restart_resumes_without_reinvoking_completed_phases() {
    let db = Database::open_in_memory().unwrap();
    let service = RecordingService::new();

    let workflow_id;
    {
        let (state, dispatcher) = harness(db.clone(), Arc::clone(&service));
        let workflow = state
            .engine
            .start_workflow("camp-1", "org-1", "brief")
            .await
            .unwrap();
        workflow_id = workflow.id.clone();
        wait_for_gate(&state, &workflow_id, Phase::StrategyReview).await;
        // Crash: workers die, state dropped
        dispatcher.shutdown();
    }

    let intake_calls = service.calls_for("intake");
    let discovery_calls = service.calls_for("discovery");
    let review_calls = service.calls_for("strategy_review");

    // Restart on the same database
    let (state, _dispatcher) = harness(db, Arc::clone(&service));
    state
        .engine
        .resolve_approval(&workflow_id, ApprovalDecision::Approved, None)
        .await
        .unwrap();

    wait_for_gate(&state, &workflow_id, Phase::ConceptSelection).await;

    // Phases 1-3 were not re-invoked
    assert_eq!(service.calls_for("intake"), intake_calls);
    assert_eq!(service.calls_for("discovery"), discovery_calls);
    assert_eq!(service.calls_for("strategy_review"), review_calls);
    assert_eq!(service.calls_for("concepting"), 2);
}

// ─── Revision bound ───────────────────────────────────────────────────

#[tokio::test]
async fn test_three_revises_force_failure_without_fourth_execution() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    wait_for_gate(&state, &workflow.id, Phase::StrategyReview).await;
    let mut last_approval_id = current_approval_id(&state, &workflow.id).await;

    for round in 1..=3u32 {
        state
            .engine
            .resolve_approval(
                &workflow.id,
                ApprovalDecision::Revise,
                Some(format!("tighter positioning, round {}", round)),
            )
            .await
            .unwrap();

        if round < 3 {
            // Re-ran the same phase and raised a fresh approval
            let state_ref = Arc::clone(&state);
            let id = workflow.id.clone();
            let prev = last_approval_id.clone();
            wait_until(
                move || {
                    let state = Arc::clone(&state_ref);
                    let id = id.clone();
                    let prev = prev.clone();
                    async move {
                        state
                            .approval_store
                            .get_pending(&id)
                            .await
                            .unwrap()
                            .map(|a| a.id != prev)
                            .unwrap_or(false)
                    }
                },
                "fresh approval after revise",
            )
            .await;
            last_approval_id = current_approval_id(&state, &workflow.id).await;
        }
    }

    wait_for_status(&state, &workflow.id, WorkflowStatus::Failed).await;

    // Original execution + two revise re-runs, never a fourth
    assert_eq!(service.calls_for("strategy_review"), 3);
    let wf = state.workflow_store.get(&workflow.id).await.unwrap().unwrap();
    assert!(wf.error_detail.unwrap().contains("revision limit"));

    // The gate is gone for good
    let err = state
        .engine
        .resolve_approval(&workflow.id, ApprovalDecision::Revise, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAwaitingApproval(_)));
}

async fn current_approval_id(state: &AppState, workflow_id: &str) -> String {
    state
        .approval_store
        .get_pending(workflow_id)
        .await
        .unwrap()
        .expect("pending approval")
        .id
}

// ─── Rejection ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rejection_fails_workflow_and_demotes_deliverables() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    wait_for_gate(&state, &workflow.id, Phase::StrategyReview).await;

    state
        .engine
        .resolve_approval(
            &workflow.id,
            ApprovalDecision::Rejected,
            Some("off brand".to_string()),
        )
        .await
        .unwrap();

    wait_for_status(&state, &workflow.id, WorkflowStatus::Failed).await;
    let wf = state.workflow_store.get(&workflow.id).await.unwrap().unwrap();
    assert!(wf.error_detail.unwrap().contains("off brand"));

    let deliverables = state
        .deliverable_store
        .list_by_phase(&workflow.id, Phase::StrategyReview)
        .await
        .unwrap();
    assert!(!deliverables.is_empty());
    assert!(deliverables
        .iter()
        .all(|d| d.status == brio_core::models::DeliverableStatus::Rejected));
}

// ─── Agent failure retry / ceiling ────────────────────────────────────

#[tokio::test]
async fn test_transient_agent_failures_are_retried() {
    let service = RecordingService::with_failures(&[("intake", 2)]);
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    wait_for_gate(&state, &workflow.id, Phase::StrategyReview).await;

    // Two failed attempts + the success, each its own record
    assert_eq!(service.calls_for("intake"), 3);
    let records = state
        .phase_record_store
        .list_by_workflow(&workflow.id)
        .await
        .unwrap();
    let intake: Vec<_> = records.iter().filter(|r| r.phase == Phase::Intake).collect();
    assert_eq!(intake.len(), 3);
    assert_eq!(intake[0].outcome, Some(PhaseOutcome::Failed));
    assert_eq!(intake[2].outcome, Some(PhaseOutcome::Success));
}

#[tokio::test]
async fn test_attempt_ceiling_fails_workflow() {
    let service = RecordingService::with_failures(&[("intake", 99)]);
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    wait_for_status(&state, &workflow.id, WorkflowStatus::Failed).await;

    assert_eq!(service.calls_for("intake"), 3);
    let wf = state.workflow_store.get(&workflow.id).await.unwrap().unwrap();
    assert!(wf.error_detail.unwrap().contains("provider"));
}

// ─── Full pipeline to completion ──────────────────────────────────────

#[tokio::test]
async fn test_full_pipeline_completes_after_all_gates() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();

    for gate in [
        Phase::StrategyReview,
        Phase::ConceptSelection,
        Phase::CreativeApproval,
        Phase::Distribution,
    ] {
        wait_for_gate(&state, &workflow.id, gate).await;
        state
            .engine
            .resolve_approval(&workflow.id, ApprovalDecision::Approved, None)
            .await
            .unwrap();
    }

    wait_for_status(&state, &workflow.id, WorkflowStatus::Completed).await;

    // Every phase has a success record
    for phase in Phase::ALL {
        assert!(
            state
                .phase_record_store
                .has_success(&workflow.id, phase)
                .await
                .unwrap(),
            "no success record for {}",
            phase.as_str()
        );
    }

    // The campaign is free for a fresh run
    state
        .engine
        .start_workflow("camp-1", "org-1", "second wave")
        .await
        .unwrap();
}

// ─── Cancellation ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_discards_in_flight_results() {
    let db = Database::open_in_memory().unwrap();
    let service = Arc::new(RecordingService {
        prompts: Mutex::new(Vec::new()),
        fail_remaining: Mutex::new(HashMap::new()),
        delay: Duration::from_millis(100),
    });
    let (state, _dispatcher) = harness(db, Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();

    // Let intake get in flight, then cancel
    let svc = Arc::clone(&service);
    wait_until(
        move || {
            let svc = Arc::clone(&svc);
            async move { svc.total_calls() >= 1 }
        },
        "first agent call",
    )
    .await;
    state.engine.cancel_workflow(&workflow.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let wf = state.workflow_store.get(&workflow.id).await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Cancelled);

    // Nothing was persisted for the discarded phase
    assert!(state
        .deliverable_store
        .list_by_workflow(&workflow.id)
        .await
        .unwrap()
        .is_empty());
    assert!(!state
        .phase_record_store
        .has_success(&workflow.id, Phase::Intake)
        .await
        .unwrap());

    // Cancelled is terminal: the campaign can start over
    state
        .engine
        .start_workflow("camp-1", "org-1", "try again")
        .await
        .unwrap();
}

// ─── AlreadyRunning & NotAwaitingApproval guards ──────────────────────

#[tokio::test]
async fn test_duplicate_start_rejected() {
    let service = RecordingService::new();
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    let err = state
        .engine
        .start_workflow("camp-1", "org-1", "brief again")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyRunning(_)));
}

#[tokio::test]
async fn test_resolve_on_non_gated_workflow_rejected() {
    let service = RecordingService::with_failures(&[("intake", 99)]);
    let (state, _dispatcher) = harness(Database::open_in_memory().unwrap(), Arc::clone(&service));

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();
    wait_for_status(&state, &workflow.id, WorkflowStatus::Failed).await;

    let err = state
        .engine
        .resolve_approval(&workflow.id, ApprovalDecision::Approved, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotAwaitingApproval(_)));
}

// ─── Degraded queue fallback ──────────────────────────────────────────

#[tokio::test]
async fn test_queue_outage_falls_back_to_inline_first_phase() {
    let service = RecordingService::new();
    let engine_config = EngineConfig {
        retry_backoff: Duration::from_millis(1),
        ..Default::default()
    };
    let (inner, receiver) = AppStateInner::new(
        Database::open_in_memory().unwrap(),
        Arc::clone(&service) as Arc<dyn CompletionService>,
        AgentClientConfig::default(),
        engine_config,
    );
    let state: AppState = Arc::new(inner);
    // No dispatcher: dropping the receiver takes the queue down
    drop(receiver);

    let workflow = state
        .engine
        .start_workflow("camp-1", "org-1", "brief")
        .await
        .unwrap();

    // The first phase ran synchronously in-request
    assert_eq!(service.calls_for("intake"), 1);
    assert!(state
        .phase_record_store
        .has_success(&workflow.id, Phase::Intake)
        .await
        .unwrap());
    let wf = state.workflow_store.get(&workflow.id).await.unwrap().unwrap();
    assert_eq!(wf.status, WorkflowStatus::Pending);
    assert_eq!(wf.current_phase, Phase::Discovery);
}
