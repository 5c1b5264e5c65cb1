//! Shared application state for engine hosts (HTTP server, tests).

use std::sync::Arc;

use crate::agent::{AgentClient, AgentClientConfig, CompletionService, RoleRegistry};
use crate::db::Database;
use crate::dispatch::{Dispatcher, DispatcherConfig, WorkQueue};
use crate::phase::PhaseRunner;
use crate::store::{
    ApprovalStore, CheckpointStore, DeliverableStore, PhaseRecordStore, WorkflowStore,
};
use crate::workflow::{EngineConfig, WorkflowEngine};

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub db: Database,
    pub workflow_store: WorkflowStore,
    pub phase_record_store: PhaseRecordStore,
    pub checkpoint_store: CheckpointStore,
    pub deliverable_store: DeliverableStore,
    pub approval_store: ApprovalStore,
    pub engine: Arc<WorkflowEngine>,
    pub queue: WorkQueue,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    /// Wire db → stores → runner → engine with the built-in role specs,
    /// returning the state and the queue receiver to hand to
    /// `Dispatcher::spawn`.
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionService>,
        agent_config: AgentClientConfig,
        engine_config: EngineConfig,
    ) -> (Self, crate::dispatch::WorkReceiver) {
        Self::with_registry(
            db,
            completion,
            agent_config,
            engine_config,
            Arc::new(RoleRegistry::builtin()),
        )
    }

    /// Same as [`AppStateInner::new`], with operator-supplied role specs
    /// (builtins overridden from YAML files).
    pub fn with_registry(
        db: Database,
        completion: Arc<dyn CompletionService>,
        agent_config: AgentClientConfig,
        engine_config: EngineConfig,
        registry: Arc<RoleRegistry>,
    ) -> (Self, crate::dispatch::WorkReceiver) {
        let workflow_store = WorkflowStore::new(db.clone());
        let phase_record_store = PhaseRecordStore::new(db.clone());
        let checkpoint_store = CheckpointStore::new(db.clone());
        let deliverable_store = DeliverableStore::new(db.clone());
        let approval_store = ApprovalStore::new(db.clone());

        let client = Arc::new(AgentClient::new(completion, agent_config));
        let runner = PhaseRunner::new(client, registry, workflow_store.clone());

        let (queue, receiver) = WorkQueue::unbounded();
        let engine = Arc::new(WorkflowEngine::new(
            workflow_store.clone(),
            phase_record_store.clone(),
            checkpoint_store.clone(),
            deliverable_store.clone(),
            approval_store.clone(),
            runner,
            queue.clone(),
            engine_config,
        ));

        (
            Self {
                db,
                workflow_store,
                phase_record_store,
                checkpoint_store,
                deliverable_store,
                approval_store,
                engine,
                queue,
            },
            receiver,
        )
    }

    /// Start the worker pool draining this state's queue.
    pub fn spawn_dispatcher(
        &self,
        receiver: crate::dispatch::WorkReceiver,
        config: DispatcherConfig,
    ) -> Dispatcher {
        Dispatcher::spawn(
            Arc::clone(&self.engine),
            self.workflow_store.clone(),
            self.queue.clone(),
            receiver,
            config,
        )
    }
}
