//! Workflow resource types
//!
//! A Workflow binds a Template to a piece of Hardware. The controller
//! creates the matching remote execution and mirrors its progress into
//! `status`; the status is derived data and never authoritative.

use crate::{CrdError, ObjectMeta, Result, TypeMeta, WORKFLOW_ID_ANNOTATION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow resource representing one provisioning run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    /// Type metadata (apiVersion, kind)
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Object metadata (name, finalizers, annotations, etc.)
    pub metadata: ObjectMeta,

    /// Workflow specification
    pub spec: WorkflowSpec,

    /// Workflow status (set by controller)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

impl Workflow {
    /// Create a new Workflow
    pub fn new(
        name: impl Into<String>,
        hardware_ref: impl Into<String>,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            type_meta: TypeMeta::workflow(),
            metadata: ObjectMeta::new(name),
            spec: WorkflowSpec {
                hardware_ref: hardware_ref.into(),
                template_ref: template_ref.into(),
            },
            status: None,
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Id of the remote execution, if one has been recorded
    pub fn remote_id(&self) -> Option<&str> {
        self.metadata.annotation(WORKFLOW_ID_ANNOTATION)
    }

    /// Record the id of the remote execution
    pub fn set_remote_id(&mut self, id: impl Into<String>) {
        self.metadata
            .annotations
            .insert(WORKFLOW_ID_ANNOTATION.to_string(), id.into());
    }

    /// Validate the workflow
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(CrdError::MissingField("metadata.name".to_string()));
        }

        if self.spec.hardware_ref.is_empty() {
            return Err(CrdError::MissingField("spec.hardwareRef".to_string()));
        }

        if self.spec.template_ref.is_empty() {
            return Err(CrdError::MissingField("spec.templateRef".to_string()));
        }

        Ok(())
    }

    /// Mirrored state, `StatePending` before the first status sync
    pub fn state(&self) -> WorkflowState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Check if the remote execution finished successfully
    pub fn is_succeeded(&self) -> bool {
        self.state().is_success()
    }
}

/// Workflow specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    /// Name of the Template resource
    pub template_ref: String,

    /// Name of the Hardware resource
    pub hardware_ref: String,
}

/// Workflow status, a denormalized copy of the remote execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    /// Current state of the remote execution
    #[serde(default)]
    pub state: WorkflowState,

    /// Opaque payload of the remote execution
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,

    /// Opaque metadata blob of the remote execution
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,

    /// Task actions, in execution order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<Action>,

    /// Action status events, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<Event>,
}

/// Workflow state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    /// Workflow is pending execution
    #[default]
    StatePending,
    /// Workflow is currently running
    StateRunning,
    /// Workflow failed
    StateFailed,
    /// Workflow timed out
    StateTimeout,
    /// Workflow completed successfully
    StateSuccess,
}

impl WorkflowState {
    /// Wire name, e.g. `STATE_RUNNING`
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::StatePending => "STATE_PENDING",
            WorkflowState::StateRunning => "STATE_RUNNING",
            WorkflowState::StateFailed => "STATE_FAILED",
            WorkflowState::StateTimeout => "STATE_TIMEOUT",
            WorkflowState::StateSuccess => "STATE_SUCCESS",
        }
    }

    /// Only success ends polling; failed and timed out executions keep being mirrored
    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowState::StateSuccess)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One task step of the remote execution, flattened for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub name: String,

    /// Owning task name
    #[serde(default)]
    pub task_name: String,

    /// Container image reference
    #[serde(default)]
    pub image: String,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_timeout: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<String>,

    /// Worker the action was assigned to
    #[serde(default, rename = "workerID")]
    pub worker_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Environment as `KEY=value` entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<String>,
}

/// Status event of a single action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub action_name: String,

    #[serde(default)]
    pub task_name: String,

    /// Action state rendered as text, e.g. `STATE_SUCCESS`
    pub action_status: String,

    /// Seconds the action had been running when the event was recorded
    #[serde(default)]
    pub seconds: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, rename = "workerID")]
    pub worker_id: String,

    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_new() {
        let wf = Workflow::new("wf-1", "hw-1", "tpl-1");

        assert_eq!(wf.name(), "wf-1");
        assert_eq!(wf.spec.hardware_ref, "hw-1");
        assert_eq!(wf.spec.template_ref, "tpl-1");
        assert_eq!(wf.type_meta.kind, "Workflow");
        assert!(wf.remote_id().is_none());
        assert_eq!(wf.state(), WorkflowState::StatePending);
    }

    #[test]
    fn test_remote_id_annotation() {
        let mut wf = Workflow::new("wf-1", "hw-1", "tpl-1");
        wf.set_remote_id("R1");

        assert_eq!(wf.remote_id(), Some("R1"));
        assert_eq!(
            wf.metadata.annotations.get("workflow.tinkerbell.org/id"),
            Some(&"R1".to_string())
        );
    }

    #[test]
    fn test_workflow_validation() {
        let wf = Workflow::new("test", "hw", "template");
        assert!(wf.validate().is_ok());

        let mut wf = Workflow::new("", "hw", "template");
        assert!(matches!(wf.validate(), Err(CrdError::MissingField(_))));

        wf = Workflow::new("test", "", "template");
        assert!(matches!(wf.validate(), Err(CrdError::MissingField(_))));

        wf = Workflow::new("test", "hw", "");
        assert!(matches!(wf.validate(), Err(CrdError::MissingField(_))));
    }

    #[test]
    fn test_only_success_is_terminal_success() {
        assert!(WorkflowState::StateSuccess.is_success());
        assert!(!WorkflowState::StateFailed.is_success());
        assert!(!WorkflowState::StateTimeout.is_success());
        assert!(!WorkflowState::StateRunning.is_success());
        assert!(!WorkflowState::StatePending.is_success());
    }

    #[test]
    fn test_workflow_state_serialization() {
        let json = serde_json::to_string(&WorkflowState::StateRunning).unwrap();
        assert_eq!(json, "\"STATE_RUNNING\"");
        assert_eq!(WorkflowState::StateRunning.to_string(), "STATE_RUNNING");

        let parsed: WorkflowState = serde_json::from_str("\"STATE_TIMEOUT\"").unwrap();
        assert_eq!(parsed, WorkflowState::StateTimeout);
    }

    #[test]
    fn test_status_shape() {
        let mut wf = Workflow::new("wf-1", "hw-1", "tpl-1");
        wf.status = Some(WorkflowStatus {
            state: WorkflowState::StateSuccess,
            data: "{}".to_string(),
            metadata: "{\"k\":1}".to_string(),
            actions: vec![Action {
                name: "hello_world".to_string(),
                task_name: "hello world".to_string(),
                image: "hello-world".to_string(),
                timeout: 60,
                worker_id: "W1".to_string(),
                ..Default::default()
            }],
            events: vec![Event {
                action_name: "hello_world".to_string(),
                task_name: "hello world".to_string(),
                action_status: "STATE_SUCCESS".to_string(),
                seconds: 3,
                message: "done".to_string(),
                worker_id: "W1".to_string(),
                created_at: "2024-01-15T10:30:00Z".parse().unwrap(),
            }],
        });

        let value = serde_json::to_value(&wf).unwrap();
        let status = &value["status"];
        assert_eq!(status["state"], "STATE_SUCCESS");
        assert_eq!(status["actions"][0]["taskName"], "hello world");
        assert_eq!(status["actions"][0]["workerID"], "W1");
        assert_eq!(status["events"][0]["actionStatus"], "STATE_SUCCESS");
        assert_eq!(status["events"][0]["createdAt"], "2024-01-15T10:30:00Z");

        let parsed: Workflow = serde_json::from_value(value).unwrap();
        assert!(parsed.is_succeeded());
        assert_eq!(parsed, wf);
    }

    #[test]
    fn test_workflow_tinkerbell_compatible_format() {
        let tinkerbell_style = r#"{
            "apiVersion": "tinkerbell.org/v1alpha1",
            "kind": "Workflow",
            "metadata": {
                "name": "wf-1",
                "annotations": {"workflow.tinkerbell.org/id": "R1"},
                "finalizers": ["workflow.tinkerbell.org"]
            },
            "spec": {
                "templateRef": "tpl-1",
                "hardwareRef": "hw-1"
            },
            "status": {
                "state": "STATE_RUNNING"
            }
        }"#;

        let wf: Workflow = serde_json::from_str(tinkerbell_style).unwrap();

        assert_eq!(wf.remote_id(), Some("R1"));
        assert!(wf.metadata.has_finalizer(crate::WORKFLOW_FINALIZER));
        assert_eq!(wf.state(), WorkflowState::StateRunning);
        assert!(wf.status.as_ref().unwrap().actions.is_empty());
    }
}
