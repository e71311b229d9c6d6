//! Controller runtime
//!
//! Wires the store's change notifications to a work queue and runs a
//! pool of reconcile workers against it.
//!
//! ```text
//! ┌──────────────┐  watch   ┌───────────┐   get    ┌────────────┐
//! │ResourceStore │────────▶│ WorkQueue │────────▶│  workers   │
//! └──────────────┘          └───────────┘          │ Reconciler │
//!        ▲                        ▲                └─────┬──────┘
//!        │                        │ add_after /          │
//!        │                        │ add_rate_limited     │
//!        │                        └──────────────────────┤
//!        └───────────────── patch ───────────────────────┘
//! ```

use crate::client::WorkflowClient;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileResult, Reconciler};
use crate::store::ResourceStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Runs reconcile workers fed by store notifications
pub struct Controller {
    store: Arc<dyn ResourceStore>,
    reconciler: Reconciler,
    queue: WorkQueue,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn WorkflowClient>,
        config: ControllerConfig,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), client, config.clone());
        let queue = WorkQueue::new(config.backoff_base, config.backoff_max);
        Self {
            store,
            reconciler,
            queue,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;

        // Subscribe before listing so no change falls between the two
        let mut events = self.store.watch();
        self.enqueue_all().await?;

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            workers.spawn(run_worker(
                worker,
                self.reconciler.clone(),
                self.queue.clone(),
                self.config.reconcile_timeout,
            ));
        }
        info!(workers = self.config.workers, "Workflow controller started");

        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = events.recv() => match event {
                        Ok(event) => {
                            debug!(workflow = %event.name, kind = ?event.kind, "Workflow changed");
                            self.queue.add(&event.name).await;
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Watch fell behind, relisting workflows");
                            if let Err(e) = self.enqueue_all().await {
                                error!(error = %e, "Failed to relist workflows");
                            }
                        }
                        Err(RecvError::Closed) => {
                            warn!("Watch stream closed");
                            break;
                        }
                    }
                }
            }
        }

        info!("Shutting down workflow controller");
        self.queue.shutdown().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Reconcile worker panicked");
            }
        }
        info!("Workflow controller stopped");
        Ok(())
    }

    async fn enqueue_all(&self) -> Result<()> {
        let workflows = self.store.list_workflows().await?;
        debug!(count = workflows.len(), "Enqueueing all workflows");
        for workflow in workflows {
            self.queue.add(workflow.name()).await;
        }
        Ok(())
    }
}

async fn run_worker(id: usize, reconciler: Reconciler, queue: WorkQueue, deadline: Duration) {
    debug!(worker = id, "Reconcile worker started");

    while let Some(key) = queue.get().await {
        let outcome = tokio::time::timeout(deadline, reconciler.reconcile(&key))
            .await
            .unwrap_or(Err(ControllerError::Timeout(deadline)));

        match outcome {
            Ok(ReconcileResult {
                requeue_after: Some(after),
            }) => {
                queue.forget(&key).await;
                queue.add_after(&key, after).await;
            }
            Ok(ReconcileResult {
                requeue_after: None,
            }) => queue.forget(&key).await,
            Err(e) => {
                let retries = queue.retries(&key).await;
                if e.is_transient() {
                    warn!(workflow = %key, error = %e, retries, "Reconcile failed, retrying");
                } else {
                    error!(workflow = %key, error = %e, retries, "Reconcile failed");
                }
                queue.add_rate_limited(&key).await;
            }
        }

        queue.done(&key).await;
    }

    debug!(worker = id, "Reconcile worker stopped");
}
