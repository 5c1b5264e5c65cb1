//! Dispatcher / Scheduler — pulls workflow-advance items off the queue
//! and drives the state machine forward asynchronously.
//!
//! The queue contract is at-least-once: duplicate delivery is expected and
//! harmless because every worker must win the single-flight lease before
//! touching a workflow. Lease contention is a silent drop, not an error.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::store::WorkflowStore;
use crate::workflow::WorkflowEngine;

/// Producer handle to the workflow-advance queue.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<String>,
}

pub type WorkReceiver = mpsc::UnboundedReceiver<String>;

impl WorkQueue {
    pub fn unbounded() -> (Self, WorkReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a workflow-advance item. Fails when the queue is down
    /// (consumer gone), which triggers the caller's degraded fallback.
    pub fn enqueue(&self, workflow_id: &str) -> Result<(), EngineError> {
        self.tx
            .send(workflow_id.to_string())
            .map_err(|_| EngineError::Internal("task queue unavailable".to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    /// Must exceed the worst-case phase duration; renewed while held.
    pub lease_ttl: Duration,
    /// Delay before requeueing after a persistence error.
    pub requeue_delay: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_ttl: Duration::from_secs(600),
            requeue_delay: Duration::from_secs(5),
        }
    }
}

/// A bounded pool of workers draining the queue.
pub struct Dispatcher {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn spawn(
        engine: Arc<WorkflowEngine>,
        workflows: WorkflowStore,
        queue: WorkQueue,
        receiver: WorkReceiver,
        config: DispatcherConfig,
    ) -> Self {
        let rx = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let engine = Arc::clone(&engine);
            let workflows = workflows.clone();
            let queue = queue.clone();
            let rx = Arc::clone(&rx);
            let config = config.clone();
            let owner = format!("worker-{}-{}", i, uuid::Uuid::new_v4());
            handles.push(tokio::spawn(async move {
                worker_loop(engine, workflows, queue, rx, config, owner).await;
            }));
        }
        Self { handles }
    }

    /// Abort all workers. Used on shutdown; safe because every phase
    /// commit is transactional and the lease expires on its own.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn worker_loop(
    engine: Arc<WorkflowEngine>,
    workflows: WorkflowStore,
    queue: WorkQueue,
    rx: Arc<Mutex<WorkReceiver>>,
    config: DispatcherConfig,
    owner: String,
) {
    loop {
        let item = { rx.lock().await.recv().await };
        let Some(workflow_id) = item else {
            // Queue closed; nothing left to drain.
            return;
        };

        match workflows
            .acquire_lease(&workflow_id, &owner, config.lease_ttl)
            .await
        {
            Ok(true) => {
                // Keep the lease alive while the phases run.
                let renewer = spawn_lease_renewer(
                    workflows.clone(),
                    workflow_id.clone(),
                    owner.clone(),
                    config.lease_ttl,
                );

                let result = engine.run(&workflow_id, usize::MAX).await;
                renewer.abort();

                if let Err(e) = &result {
                    tracing::warn!(
                        workflow_id,
                        owner,
                        "advance failed, requeueing after delay: {}",
                        e
                    );
                }
                if let Err(e) = workflows.release_lease(&workflow_id, &owner).await {
                    tracing::error!(workflow_id, owner, "lease release failed: {}", e);
                }
                if result.is_err() {
                    // Persistence error: the workflow is not failed, the
                    // item goes back on the queue.
                    tokio::time::sleep(config.requeue_delay).await;
                    let _ = queue.enqueue(&workflow_id);
                }
            }
            Ok(false) => {
                // Expected under duplicate delivery.
                tracing::debug!(workflow_id, owner, "lease contention, dropping item");
            }
            Err(e) => {
                tracing::warn!(workflow_id, owner, "lease acquisition errored: {}", e);
                tokio::time::sleep(config.requeue_delay).await;
                let _ = queue.enqueue(&workflow_id);
            }
        }
    }
}

fn spawn_lease_renewer(
    workflows: WorkflowStore,
    workflow_id: String,
    owner: String,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = ttl / 2;
        loop {
            tokio::time::sleep(interval).await;
            match workflows.renew_lease(&workflow_id, &owner, ttl).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(workflow_id, owner, "lease lost during renewal");
                    return;
                }
                Err(e) => {
                    tracing::warn!(workflow_id, owner, "lease renewal errored: {}", e);
                }
            }
        }
    })
}
