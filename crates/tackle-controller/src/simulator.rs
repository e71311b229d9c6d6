//! In-process remote workflow service
//!
//! `MemoryWorkflowClient` stands in for the remote execution service in
//! tests and in `tackle run`. Templates and hardware are registered up
//! front; `create` expands the registered template body into remote
//! actions and the caller drives progress with `advance`.
//!
//! Failures can be injected per operation with `fail_next`, and every
//! call is counted so tests can assert on what the reconciler did.

use crate::client::{
    ClientError, ClientResult, RemoteAction, RemoteEvent, RemoteOp, RemoteState, RemoteWorkflow,
    WorkflowClient,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tackle_crd::TemplateBody;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct Execution {
    workflow: RemoteWorkflow,
    actions: Vec<RemoteAction>,
    events: Vec<RemoteEvent>,
    metadata: Vec<u8>,
    next_action: usize,
}

#[derive(Debug, Default)]
struct Inner {
    templates: HashMap<String, String>,
    hardware: HashSet<String>,
    executions: HashMap<String, Execution>,
    next_ids: VecDeque<String>,
    failures: HashMap<RemoteOp, ClientError>,
    calls: HashMap<RemoteOp, usize>,
}

impl Inner {
    /// Count the call and take any failure queued for it
    fn begin(&mut self, op: RemoteOp) -> ClientResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.remove(&op) {
            Some(err) => {
                debug!(op = %op, error = %err, "Injected remote failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn execution(&self, id: &str) -> ClientResult<&Execution> {
        self.executions
            .get(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }

    fn execution_mut(&mut self, id: &str) -> ClientResult<&mut Execution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }
}

/// Simulated remote workflow service
#[derive(Debug, Default)]
pub struct MemoryWorkflowClient {
    inner: Mutex<Inner>,
}

impl MemoryWorkflowClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a template body available under `id`
    pub async fn register_template(&self, id: impl Into<String>, data: impl Into<String>) {
        self.inner
            .lock()
            .await
            .templates
            .insert(id.into(), data.into());
    }

    /// Make a hardware id targetable
    pub async fn register_hardware(&self, id: impl Into<String>) {
        self.inner.lock().await.hardware.insert(id.into());
    }

    /// Use `id` for the next created execution instead of a random UUID
    pub async fn set_next_id(&self, id: impl Into<String>) {
        self.inner.lock().await.next_ids.push_back(id.into());
    }

    /// Fail the next call of `op` with `err`
    pub async fn fail_next(&self, op: RemoteOp, err: ClientError) {
        self.inner.lock().await.failures.insert(op, err);
    }

    /// Number of calls made for `op`, including failed ones
    pub async fn calls(&self, op: RemoteOp) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    /// Number of executions currently held
    pub async fn len(&self) -> usize {
        self.inner.lock().await.executions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.lock().await.executions.contains_key(id)
    }

    /// Force the state of an execution
    pub async fn set_state(&self, id: &str, state: RemoteState) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        inner.execution_mut(id)?.workflow.state = state;
        Ok(())
    }

    /// Replace the metadata blob of an execution
    pub async fn set_metadata(&self, id: &str, metadata: impl Into<Vec<u8>>) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        inner.execution_mut(id)?.metadata = metadata.into();
        Ok(())
    }

    /// Run the next action of an execution to completion
    ///
    /// Each step records a running and a success event for the action.
    /// The execution reaches `StateSuccess` after its last action;
    /// terminal executions are left untouched.
    pub async fn advance(&self, id: &str) -> ClientResult<RemoteState> {
        let mut inner = self.inner.lock().await;
        let execution = inner.execution_mut(id)?;

        if matches!(
            execution.workflow.state,
            RemoteState::StateSuccess | RemoteState::StateFailed | RemoteState::StateTimeout
        ) {
            return Ok(execution.workflow.state);
        }

        if let Some(action) = execution.actions.get(execution.next_action).cloned() {
            let now = Utc::now();
            for (status, message) in [
                (RemoteState::StateRunning, "Started execution"),
                (RemoteState::StateSuccess, "Finished execution successfully"),
            ] {
                execution.events.push(RemoteEvent {
                    action_name: action.name.clone(),
                    task_name: action.task_name.clone(),
                    action_status: status,
                    seconds: if status == RemoteState::StateSuccess { 1 } else { 0 },
                    message: message.to_string(),
                    worker_id: action.worker_id.clone(),
                    created_at: now,
                });
            }
            execution.next_action += 1;
        }

        execution.workflow.state = if execution.next_action >= execution.actions.len() {
            RemoteState::StateSuccess
        } else {
            RemoteState::StateRunning
        };
        debug!(
            remote_id = %id,
            state = %execution.workflow.state,
            completed = execution.next_action,
            total = execution.actions.len(),
            "Advanced remote execution"
        );
        Ok(execution.workflow.state)
    }
}

/// Flatten template tasks into remote actions targeting `worker_id`
///
/// Task volumes come before action volumes; action environment entries
/// override task entries with the same key.
fn expand_actions(body: &TemplateBody, worker_id: &str) -> Vec<RemoteAction> {
    body.actions()
        .map(|(task, action)| {
            let mut environment: BTreeMap<&str, &str> = task
                .environment
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            for (k, v) in &action.environment {
                environment.insert(k.as_str(), v.as_str());
            }

            RemoteAction {
                name: action.name.clone(),
                task_name: task.name.clone(),
                image: action.image.clone(),
                timeout: action.timeout,
                command: action.command.clone(),
                on_timeout: action.on_timeout.clone(),
                on_failure: action.on_failure.clone(),
                worker_id: worker_id.to_string(),
                volumes: task
                    .volumes
                    .iter()
                    .chain(action.volumes.iter())
                    .cloned()
                    .collect(),
                environment: environment
                    .into_iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            }
        })
        .collect()
}

#[async_trait]
impl WorkflowClient for MemoryWorkflowClient {
    async fn create(&self, template_id: &str, hardware_id: &str) -> ClientResult<String> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::Create)?;

        let data = inner
            .templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| ClientError::InvalidArgument(format!("unknown template {}", template_id)))?;
        if !inner.hardware.contains(hardware_id) {
            return Err(ClientError::InvalidArgument(format!(
                "unknown hardware {}",
                hardware_id
            )));
        }

        let body: TemplateBody = serde_yaml::from_str(&data).map_err(|e| {
            ClientError::InvalidArgument(format!("template {} is malformed: {}", template_id, e))
        })?;

        let id = inner
            .next_ids
            .pop_front()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let metadata = serde_json::json!({
            "template": template_id,
            "hardware": hardware_id,
            "name": body.name,
        });

        let execution = Execution {
            workflow: RemoteWorkflow {
                id: id.clone(),
                template: template_id.to_string(),
                hardware: hardware_id.to_string(),
                data,
                state: RemoteState::StatePending,
            },
            actions: expand_actions(&body, hardware_id),
            events: Vec::new(),
            metadata: metadata.to_string().into_bytes(),
            next_action: 0,
        };
        debug!(
            remote_id = %id,
            template = %template_id,
            hardware = %hardware_id,
            actions = execution.actions.len(),
            "Created remote execution"
        );
        inner.executions.insert(id.clone(), execution);
        Ok(id)
    }

    async fn get(&self, id: &str) -> ClientResult<RemoteWorkflow> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::Get)?;
        Ok(inner.execution(id)?.workflow.clone())
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::Delete)?;
        inner
            .executions
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(id.to_string()))
    }

    async fn get_metadata(&self, id: &str) -> ClientResult<Vec<u8>> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::GetMetadata)?;
        Ok(inner.execution(id)?.metadata.clone())
    }

    async fn get_actions(&self, id: &str) -> ClientResult<Vec<RemoteAction>> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::GetActions)?;
        Ok(inner.execution(id)?.actions.clone())
    }

    async fn get_events(&self, id: &str) -> ClientResult<Vec<RemoteEvent>> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::GetEvents)?;
        Ok(inner.execution(id)?.events.clone())
    }

    async fn get_state(&self, id: &str) -> ClientResult<RemoteState> {
        let mut inner = self.inner.lock().await;
        inner.begin(RemoteOp::GetState)?;
        Ok(inner.execution(id)?.workflow.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"
version: "0.1"
name: provision
global_timeout: 1800
tasks:
  - name: "os-installation"
    worker: "{{.device_1}}"
    volumes:
      - /dev:/dev
    environment:
      MIRROR_HOST: 192.0.2.10
    actions:
      - name: "stream-image"
        image: quay.io/tinkerbell/actions/image2disk:v1.0.0
        timeout: 600
        environment:
          DEST_DISK: /dev/sda
          MIRROR_HOST: 192.0.2.20
      - name: "reboot"
        image: quay.io/tinkerbell/actions/reboot:v1.0.0
        timeout: 90
        volumes:
          - /worker:/worker
"#;

    async fn client() -> MemoryWorkflowClient {
        let client = MemoryWorkflowClient::new();
        client.register_template("T1", TEMPLATE).await;
        client.register_hardware("H1").await;
        client
    }

    #[tokio::test]
    async fn test_create_expands_template() {
        let client = client().await;
        client.set_next_id("R1").await;

        let id = client.create("T1", "H1").await.unwrap();
        assert_eq!(id, "R1");

        let actions = client.get_actions("R1").await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "stream-image");
        assert_eq!(actions[0].task_name, "os-installation");
        assert_eq!(actions[0].worker_id, "H1");
        assert_eq!(
            actions[0].environment,
            vec!["DEST_DISK=/dev/sda", "MIRROR_HOST=192.0.2.20"]
        );
        assert_eq!(actions[1].volumes, vec!["/dev:/dev", "/worker:/worker"]);

        assert_eq!(client.get_state("R1").await.unwrap(), RemoteState::StatePending);
        let remote = client.get("R1").await.unwrap();
        assert_eq!(remote.data, TEMPLATE);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_references() {
        let client = client().await;

        let err = client.create("T9", "H1").await.unwrap_err();
        assert!(err.is_invalid_argument());

        let err = client.create("T1", "H9").await.unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(client.is_empty().await);
    }

    #[tokio::test]
    async fn test_advance_runs_actions_in_order() {
        let client = client().await;
        let id = client.create("T1", "H1").await.unwrap();

        assert_eq!(client.advance(&id).await.unwrap(), RemoteState::StateRunning);
        assert_eq!(client.get_events(&id).await.unwrap().len(), 2);

        assert_eq!(client.advance(&id).await.unwrap(), RemoteState::StateSuccess);
        let events = client.get_events(&id).await.unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].action_name, "reboot");
        assert_eq!(events[3].action_status, RemoteState::StateSuccess);

        // Terminal executions stay put
        assert_eq!(client.advance(&id).await.unwrap(), RemoteState::StateSuccess);
        assert_eq!(client.get_events(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let client = client().await;
        let id = client.create("T1", "H1").await.unwrap();

        client.delete(&id).await.unwrap();
        let err = client.delete(&id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(client.get(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let client = client().await;
        let id = client.create("T1", "H1").await.unwrap();

        client
            .fail_next(
                RemoteOp::GetEvents,
                ClientError::Unavailable("connection reset".to_string()),
            )
            .await;

        assert!(client.get_events(&id).await.is_err());
        assert!(client.get_events(&id).await.is_ok());
        assert_eq!(client.calls(RemoteOp::GetEvents).await, 2);
        assert_eq!(client.calls(RemoteOp::Create).await, 1);
        assert_eq!(client.calls(RemoteOp::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_state_and_metadata_overrides() {
        let client = client().await;
        let id = client.create("T1", "H1").await.unwrap();

        client.set_state(&id, RemoteState::StateFailed).await.unwrap();
        client.set_metadata(&id, b"{}".to_vec()).await.unwrap();

        assert_eq!(client.get_state(&id).await.unwrap(), RemoteState::StateFailed);
        assert_eq!(client.get_metadata(&id).await.unwrap(), b"{}");
        assert!(client.set_state("missing", RemoteState::StateRunning).await.is_err());
    }
}
