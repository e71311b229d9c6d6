//! Resource store
//!
//! This module defines the trait the controller uses to read and persist
//! resources, plus an in-memory backend. Every Workflow write is a
//! compare-and-swap on `metadata.resourceVersion`; a write based on an
//! outdated read is rejected with `StoreError::Conflict`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tackle_crd::{Hardware, Template, Workflow};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("conflict on {name}: expected resource version {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Backend(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Kind of change carried by a watch notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Modified,
    Deleted,
}

/// Change notification for a Workflow, keyed by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub name: String,
}

/// Storage backend trait
///
/// Implementations must be safe to share between concurrently running
/// reconcile workers; the trait is object-safe and used as
/// `Arc<dyn ResourceStore>`.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a workflow by name
    async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>>;

    /// List all workflows
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;

    /// Create a workflow, assigning uid, resource version and creation time
    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow>;

    /// Write metadata and spec; status and deletion timestamp are ignored
    async fn patch_workflow(&self, workflow: &Workflow) -> Result<Workflow>;

    /// Write the status sub-resource only
    async fn patch_workflow_status(&self, workflow: &Workflow) -> Result<Workflow>;

    /// Request deletion
    ///
    /// Objects without finalizers disappear at once; otherwise the
    /// deletion timestamp is set and removal waits for the finalizers.
    async fn delete_workflow(&self, name: &str) -> Result<()>;

    /// Subscribe to workflow change notifications
    fn watch(&self) -> broadcast::Receiver<WatchEvent>;

    async fn get_hardware(&self, name: &str) -> Result<Option<Hardware>>;

    async fn put_hardware(&self, hardware: &Hardware) -> Result<()>;

    async fn get_template(&self, name: &str) -> Result<Option<Template>>;

    async fn put_template(&self, template: &Template) -> Result<()>;
}

/// In-memory resource store
#[derive(Debug)]
pub struct MemoryStore {
    workflows: RwLock<HashMap<String, Workflow>>,
    templates: RwLock<HashMap<String, Template>>,
    hardware: RwLock<HashMap<String, Hardware>>,
    // Shared counter so versions are unique across the whole store
    last_version: RwLock<u64>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            workflows: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            hardware: RwLock::new(HashMap::new()),
            last_version: RwLock::new(0),
            events,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn next_version(&self) -> String {
        let mut last = self.last_version.write().await;
        *last += 1;
        last.to_string()
    }

    fn notify(&self, kind: WatchEventKind, name: &str) {
        // No receivers is fine; nobody is watching yet
        let _ = self.events.send(WatchEvent {
            kind,
            name: name.to_string(),
        });
    }

    fn check_version(stored: &Workflow, incoming: &Workflow) -> Result<()> {
        let expected = incoming.metadata.resource_version.clone().unwrap_or_default();
        let actual = stored.metadata.resource_version.clone().unwrap_or_default();
        if expected != actual {
            return Err(StoreError::Conflict {
                name: stored.metadata.name.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Commit `updated` in place of the stored object, or drop it once deletion is unblocked
    async fn commit(
        &self,
        workflows: &mut HashMap<String, Workflow>,
        mut updated: Workflow,
    ) -> Workflow {
        let name = updated.metadata.name.clone();

        if updated.metadata.is_being_deleted() && updated.metadata.finalizers.is_empty() {
            workflows.remove(&name);
            debug!(workflow = %name, "Finalizers cleared, workflow removed");
            self.notify(WatchEventKind::Deleted, &name);
            return updated;
        }

        updated.metadata.resource_version = Some(self.next_version().await);
        workflows.insert(name.clone(), updated.clone());
        self.notify(WatchEventKind::Modified, &name);
        updated
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_workflow(&self, name: &str) -> Result<Option<Workflow>> {
        Ok(self.workflows.read().await.get(name).cloned())
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }

    async fn create_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let name = workflow.metadata.name.clone();
        if workflows.contains_key(&name) {
            return Err(StoreError::AlreadyExists(name));
        }

        let mut created = workflow.clone();
        created.metadata.uid = Some(Uuid::new_v4());
        created.metadata.resource_version = Some(self.next_version().await);
        created.metadata.creation_timestamp = Some(Utc::now());
        created.metadata.deletion_timestamp = None;

        workflows.insert(name.clone(), created.clone());
        self.notify(WatchEventKind::Added, &name);
        Ok(created)
    }

    async fn patch_workflow(&self, workflow: &Workflow) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let stored = workflows
            .get(&workflow.metadata.name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(workflow.metadata.name.clone()))?;
        Self::check_version(&stored, workflow)?;

        let mut updated = stored.clone();
        updated.metadata.labels = workflow.metadata.labels.clone();
        updated.metadata.annotations = workflow.metadata.annotations.clone();
        updated.metadata.finalizers = workflow.metadata.finalizers.clone();
        updated.spec = workflow.spec.clone();

        if updated == stored {
            return Ok(stored);
        }
        Ok(self.commit(&mut workflows, updated).await)
    }

    async fn patch_workflow_status(&self, workflow: &Workflow) -> Result<Workflow> {
        let mut workflows = self.workflows.write().await;
        let stored = workflows
            .get(&workflow.metadata.name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(workflow.metadata.name.clone()))?;
        Self::check_version(&stored, workflow)?;

        if stored.status == workflow.status {
            return Ok(stored);
        }

        let mut updated = stored;
        updated.status = workflow.status.clone();
        Ok(self.commit(&mut workflows, updated).await)
    }

    async fn delete_workflow(&self, name: &str) -> Result<()> {
        let mut workflows = self.workflows.write().await;
        let stored = workflows
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if stored.metadata.is_being_deleted() {
            return Ok(());
        }

        let mut updated = stored;
        updated.metadata.deletion_timestamp = Some(Utc::now());
        self.commit(&mut workflows, updated).await;
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    async fn get_hardware(&self, name: &str) -> Result<Option<Hardware>> {
        Ok(self.hardware.read().await.get(name).cloned())
    }

    async fn put_hardware(&self, hardware: &Hardware) -> Result<()> {
        self.hardware
            .write()
            .await
            .insert(hardware.metadata.name.clone(), hardware.clone());
        Ok(())
    }

    async fn get_template(&self, name: &str) -> Result<Option<Template>> {
        Ok(self.templates.read().await.get(name).cloned())
    }

    async fn put_template(&self, template: &Template) -> Result<()> {
        self.templates
            .write()
            .await
            .insert(template.metadata.name.clone(), template.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tackle_crd::{HardwareSpec, WORKFLOW_FINALIZER, WorkflowState, WorkflowStatus};

    fn test_workflow() -> Workflow {
        Workflow::new("wf-1", "hw-1", "tpl-1")
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();

        let created = store.create_workflow(&test_workflow()).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.creation_timestamp.is_some());

        let err = store.create_workflow(&test_workflow()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_patch_rejects_stale_version() {
        let store = MemoryStore::new();
        let created = store.create_workflow(&test_workflow()).await.unwrap();

        let mut first = created.clone();
        first.set_remote_id("R1");
        let patched = store.patch_workflow(&first).await.unwrap();
        assert_ne!(
            patched.metadata.resource_version,
            created.metadata.resource_version
        );

        // Second writer still holds the original read
        let mut stale = created.clone();
        stale.set_remote_id("R2");
        let err = store.patch_workflow(&stale).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(err.is_transient());

        let stored = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(stored.remote_id(), Some("R1"));
    }

    #[tokio::test]
    async fn test_noop_patch_keeps_version() {
        let store = MemoryStore::new();
        let created = store.create_workflow(&test_workflow()).await.unwrap();

        let patched = store.patch_workflow(&created).await.unwrap();
        assert_eq!(
            patched.metadata.resource_version,
            created.metadata.resource_version
        );
    }

    #[tokio::test]
    async fn test_patch_ignores_status_and_status_patch_ignores_spec() {
        let store = MemoryStore::new();
        let created = store.create_workflow(&test_workflow()).await.unwrap();

        let mut wf = created.clone();
        wf.status = Some(WorkflowStatus {
            state: WorkflowState::StateRunning,
            ..Default::default()
        });
        wf.spec.template_ref = "tpl-2".to_string();

        let after_status = store.patch_workflow_status(&wf).await.unwrap();
        assert_eq!(after_status.spec.template_ref, "tpl-1");
        assert_eq!(after_status.state(), WorkflowState::StateRunning);

        let mut wf = after_status.clone();
        wf.status = None;
        let after_spec = store.patch_workflow(&wf).await.unwrap();
        assert_eq!(after_spec.state(), WorkflowState::StateRunning);
    }

    #[tokio::test]
    async fn test_delete_without_finalizer_removes() {
        let store = MemoryStore::new();
        store.create_workflow(&test_workflow()).await.unwrap();

        store.delete_workflow("wf-1").await.unwrap();
        assert!(store.get_workflow("wf-1").await.unwrap().is_none());

        let err = store.delete_workflow("wf-1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizer() {
        let store = MemoryStore::new();
        let mut wf = test_workflow();
        wf.metadata.add_finalizer(WORKFLOW_FINALIZER);
        store.create_workflow(&wf).await.unwrap();

        store.delete_workflow("wf-1").await.unwrap();
        let deleting = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert!(deleting.metadata.is_being_deleted());

        // Deleting again keeps the original timestamp
        store.delete_workflow("wf-1").await.unwrap();
        let again = store.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(
            again.metadata.deletion_timestamp,
            deleting.metadata.deletion_timestamp
        );

        let mut released = again.clone();
        released.metadata.remove_finalizer(WORKFLOW_FINALIZER);
        store.patch_workflow(&released).await.unwrap();
        assert!(store.get_workflow("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_events() {
        let store = MemoryStore::new();
        let mut events = store.watch();

        let created = store.create_workflow(&test_workflow()).await.unwrap();
        let mut wf = created.clone();
        wf.set_remote_id("R1");
        store.patch_workflow(&wf).await.unwrap();
        store.delete_workflow("wf-1").await.unwrap();

        let kinds: Vec<WatchEventKind> = vec![
            events.recv().await.unwrap().kind,
            events.recv().await.unwrap().kind,
            events.recv().await.unwrap().kind,
        ];
        assert_eq!(
            kinds,
            vec![
                WatchEventKind::Added,
                WatchEventKind::Modified,
                WatchEventKind::Deleted
            ]
        );
    }

    #[tokio::test]
    async fn test_hardware_and_template() {
        let store = MemoryStore::new();
        assert!(store.get_hardware("hw-1").await.unwrap().is_none());

        store
            .put_hardware(&Hardware::new("hw-1", HardwareSpec::new("H1")))
            .await
            .unwrap();
        store
            .put_template(&Template::new("tpl-1", "version: \"0.1\""))
            .await
            .unwrap();

        let hw = store.get_hardware("hw-1").await.unwrap().unwrap();
        assert_eq!(hw.remote_id(), Some("H1"));
        assert!(store.get_template("tpl-1").await.unwrap().is_some());
    }
}
