//! Workflow reconciler
//!
//! One `reconcile` call moves a single Workflow one step closer to its
//! remote execution:
//!
//! 1. Load the Workflow; a missing object means there is nothing to do.
//! 2. Deleting objects run the delete path: remote teardown, then the
//!    finalizer is released.
//! 3. Otherwise make sure the finalizer is present, create the remote
//!    execution if no id is recorded, and mirror its status.
//!
//! The reconciler keeps no state between calls. Everything it needs is
//! read back from the store and the remote service.

use crate::client::{RemoteOp, WorkflowClient};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::finalizer;
use crate::mapping;
use crate::store::ResourceStore;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tackle_crd::{CrdError, Workflow, WorkflowStatus};
use tracing::{Instrument, Span, debug, error, info, instrument, warn};

/// Outcome of a successful reconcile pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    /// Run again after this delay; `None` waits for the next change
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

/// Reconciles Workflows against the remote workflow service
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    client: Arc<dyn WorkflowClient>,
    config: ControllerConfig,
    // Workflows whose create-and-record step is still running
    creating: Arc<Mutex<HashSet<String>>>,
}

/// Marks a Workflow as being created until dropped
struct CreateGuard {
    creating: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl CreateGuard {
    fn acquire(creating: &Arc<Mutex<HashSet<String>>>, name: &str) -> Option<Self> {
        let mut set = creating.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return None;
        }
        Some(Self {
            creating: creating.clone(),
            name: name.to_string(),
        })
    }
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        let mut set = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.name);
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        client: Arc<dyn WorkflowClient>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            creating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reconcile the Workflow called `name`
    #[instrument(skip_all, fields(workflow = %name))]
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileResult> {
        let Some(workflow) = self.store.get_workflow(name).await? else {
            debug!("Workflow not found, nothing to do");
            return Ok(ReconcileResult::done());
        };

        let Some(workflow) = finalizer::ensure_finalizer(
            self.store.as_ref(),
            workflow,
            self.config.conflict_retries,
        )
        .await?
        else {
            debug!("Workflow disappeared while adding finalizer");
            return Ok(ReconcileResult::done());
        };

        if workflow.metadata.is_being_deleted() {
            return self.reconcile_delete(workflow).await;
        }

        self.reconcile_normal(workflow).await
    }

    async fn reconcile_normal(&self, workflow: Workflow) -> Result<ReconcileResult> {
        let workflow = if workflow.remote_id().is_some() {
            workflow
        } else {
            let Some(guard) = CreateGuard::acquire(&self.creating, workflow.name()) else {
                debug!("Remote workflow creation still in progress");
                return Ok(ReconcileResult::requeue(self.config.backoff_base));
            };
            // A creation that held the guard may have recorded an id since our read
            let Some(latest) = self.store.get_workflow(workflow.name()).await? else {
                return Ok(ReconcileResult::done());
            };
            if latest.metadata.is_being_deleted() {
                drop(guard);
                return self.reconcile_delete(latest).await;
            }
            if latest.remote_id().is_some() {
                latest
            } else {
                match self.create_remote(latest, guard).await? {
                    Some(workflow) => workflow,
                    None => return Ok(ReconcileResult::done()),
                }
            }
        };

        let remote_id = workflow
            .remote_id()
            .map(str::to_string)
            .ok_or_else(|| {
                CrdError::MissingField(format!(
                    "metadata.annotations[{}]",
                    tackle_crd::WORKFLOW_ID_ANNOTATION
                ))
            })?;

        let remote = self
            .client
            .get(&remote_id)
            .await
            .map_err(|e| ControllerError::remote(RemoteOp::Get, &remote_id, e))?;

        let mut status = workflow.status.clone().unwrap_or_default();
        status.data = remote.data;
        self.sync_status(workflow, &remote_id, status).await
    }

    /// Resolve references, create the remote execution and record its id
    ///
    /// Create and the write that records its id run in their own task,
    /// which holds `guard` until it finishes. Cancelling the pass detaches
    /// that task instead of abandoning an unrecorded execution. Returns the
    /// persisted Workflow, or `None` if it vanished meanwhile.
    async fn create_remote(
        &self,
        workflow: Workflow,
        guard: CreateGuard,
    ) -> Result<Option<Workflow>> {
        workflow.validate()?;

        let hardware_ref = &workflow.spec.hardware_ref;
        let hardware = self
            .store
            .get_hardware(hardware_ref)
            .await?
            .ok_or_else(|| ControllerError::HardwareNotFound(hardware_ref.clone()))?;
        let hardware_id = hardware
            .remote_id()
            .ok_or_else(|| ControllerError::HardwareMissingId(hardware_ref.clone()))?
            .to_string();

        let template_ref = &workflow.spec.template_ref;
        let template = self
            .store
            .get_template(template_ref)
            .await?
            .ok_or_else(|| ControllerError::TemplateNotFound(template_ref.clone()))?;
        let template_id = template
            .remote_id()
            .ok_or_else(|| ControllerError::TemplateNotRegistered(template_ref.clone()))?
            .to_string();

        let this = self.clone();
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                this.create_and_record(workflow, &template_id, &hardware_id)
                    .await
            }
            .instrument(Span::current()),
        );

        task.await
            .map_err(|e| ControllerError::Task(e.to_string()))?
    }

    async fn create_and_record(
        &self,
        workflow: Workflow,
        template_id: &str,
        hardware_id: &str,
    ) -> Result<Option<Workflow>> {
        let id = self
            .client
            .create(template_id, hardware_id)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to create remote workflow");
                ControllerError::remote(RemoteOp::Create, workflow.name(), e)
            })?;
        info!(
            remote_id = %id,
            template_id = %template_id,
            hardware_id = %hardware_id,
            "Created remote workflow"
        );

        self.persist_remote_id(workflow, id).await
    }

    /// Record `id` on the Workflow
    ///
    /// A remote id written by a concurrent pass takes precedence. Whenever
    /// `id` does not end up recorded, the execution it names is deleted so
    /// it cannot leak.
    async fn persist_remote_id(&self, workflow: Workflow, id: String) -> Result<Option<Workflow>> {
        let persisted = finalizer::patch_metadata(
            self.store.as_ref(),
            workflow,
            self.config.conflict_retries,
            |wf| {
                if wf.remote_id().is_some() {
                    return false;
                }
                wf.set_remote_id(id.as_str());
                true
            },
        )
        .await;

        match persisted {
            Ok(Some(wf)) if wf.remote_id() == Some(id.as_str()) => Ok(Some(wf)),
            Ok(Some(wf)) => {
                warn!(
                    remote_id = %id,
                    recorded = wf.remote_id().unwrap_or_default(),
                    "Workflow already records a remote id, discarding the new execution"
                );
                self.discard_remote(&id).await;
                Ok(Some(wf))
            }
            Ok(None) => {
                warn!(remote_id = %id, "Workflow vanished before the remote id was recorded");
                self.discard_remote(&id).await;
                Ok(None)
            }
            Err(e) => {
                error!(remote_id = %id, error = %e, "Failed to record remote id");
                self.discard_remote(&id).await;
                Err(e)
            }
        }
    }

    async fn discard_remote(&self, id: &str) {
        match self.client.delete(id).await {
            Ok(()) => debug!(remote_id = %id, "Discarded unrecorded remote workflow"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(remote_id = %id, error = %e, "Failed to discard remote workflow"),
        }
    }

    /// Gather remote status and patch it, whatever the gathering outcome
    async fn sync_status(
        &self,
        mut workflow: Workflow,
        remote_id: &str,
        mut status: WorkflowStatus,
    ) -> Result<ReconcileResult> {
        let gathered = self.gather_status(remote_id, &mut status).await;

        workflow.status = Some(status);
        let patched = self.store.patch_workflow_status(&workflow).await;

        let workflow = match (gathered, patched) {
            (Ok(()), Ok(workflow)) => workflow,
            (Ok(()), Err(e)) => {
                error!(error = %e, "Failed to patch workflow status");
                return Err(e.into());
            }
            (Err(e), Ok(_)) => return Err(e),
            (Err(e), Err(patch_err)) => {
                error!(error = %patch_err, "Failed to patch partial workflow status");
                return Err(e);
            }
        };

        let state = workflow.state();
        if state.is_success() {
            info!(state = %state, "Remote workflow succeeded");
            return Ok(ReconcileResult::done());
        }

        debug!(
            state = %state,
            requeue_after = ?self.config.requeue_interval,
            "Remote workflow not finished, polling again later"
        );
        Ok(ReconcileResult::requeue(self.config.requeue_interval))
    }

    /// Fetch metadata, actions, events and state in order
    ///
    /// Stops at the first failure; whatever was fetched before it stays in
    /// `status`.
    async fn gather_status(&self, id: &str, status: &mut WorkflowStatus) -> Result<()> {
        let metadata = self.client.get_metadata(id).await.map_err(|e| {
            error!(error = %e, "Failed to get metadata for workflow");
            ControllerError::remote(RemoteOp::GetMetadata, id, e)
        })?;
        status.metadata = mapping::metadata(&metadata);

        let actions = self.client.get_actions(id).await.map_err(|e| {
            error!(error = %e, "Failed to get actions for workflow");
            ControllerError::remote(RemoteOp::GetActions, id, e)
        })?;
        status.actions = mapping::actions(&actions);

        let events = self.client.get_events(id).await.map_err(|e| {
            error!(error = %e, "Failed to get events for workflow");
            ControllerError::remote(RemoteOp::GetEvents, id, e)
        })?;
        status.events = mapping::events(&events);

        let state = self.client.get_state(id).await.map_err(|e| {
            error!(error = %e, "Failed to get state for workflow");
            ControllerError::remote(RemoteOp::GetState, id, e)
        })?;
        status.state = mapping::workflow_state(state);

        Ok(())
    }

    /// Delete the remote execution, then release the finalizer
    async fn reconcile_delete(&self, workflow: Workflow) -> Result<ReconcileResult> {
        if let Some(id) = workflow.remote_id() {
            match self.client.delete(id).await {
                Ok(()) => info!(remote_id = %id, "Deleted remote workflow"),
                Err(e) if e.is_not_found() => {
                    debug!(remote_id = %id, "Remote workflow already gone");
                }
                Err(e) => {
                    error!(remote_id = %id, error = %e, "Failed to delete remote workflow");
                    return Err(ControllerError::remote(RemoteOp::Delete, id, e));
                }
            }
        }

        finalizer::remove_finalizer(self.store.as_ref(), workflow, self.config.conflict_retries)
            .await?;
        Ok(ReconcileResult::done())
    }
}
