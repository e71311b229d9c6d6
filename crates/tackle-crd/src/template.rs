//! Template resource types
//!
//! A Template carries the workflow definition as an opaque body (the
//! Tinkerbell YAML format). Once registered with the remote service its
//! remote id is recorded in the `template.tinkerbell.org/id` annotation.

use crate::{CrdError, ObjectMeta, Result, TEMPLATE_ID_ANNOTATION, TypeMeta};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Template resource defining a provisioning workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Type metadata (apiVersion, kind)
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Object metadata (name, namespace, labels, etc.)
    pub metadata: ObjectMeta,

    /// Template specification
    pub spec: TemplateSpec,
}

impl Template {
    /// Create a new Template from its body
    pub fn new(name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            type_meta: TypeMeta::template(),
            metadata: ObjectMeta::new(name),
            spec: TemplateSpec { data: data.into() },
        }
    }

    /// Id of the template in the remote service, once registered
    pub fn remote_id(&self) -> Option<&str> {
        self.metadata.annotation(TEMPLATE_ID_ANNOTATION)
    }

    /// Record the remote id of the template
    pub fn set_remote_id(&mut self, id: impl Into<String>) {
        self.metadata
            .annotations
            .insert(TEMPLATE_ID_ANNOTATION.to_string(), id.into());
    }

    /// Validate the template
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(CrdError::MissingField("metadata.name".to_string()));
        }

        if self.spec.data.trim().is_empty() {
            return Err(CrdError::MissingField("spec.data".to_string()));
        }

        Ok(())
    }
}

/// Template specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Workflow definition body
    #[serde(default)]
    pub data: String,
}

/// Parsed workflow definition
///
/// Mirrors the Tinkerbell template format:
///
/// ```yaml
/// version: "0.1"
/// name: hello_world_workflow
/// global_timeout: 600
/// tasks:
///   - name: "hello world"
///     worker: "{{.device_1}}"
///     actions:
///       - name: "hello_world"
///         image: hello-world
///         timeout: 60
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TemplateBody {
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub name: String,

    /// Global timeout for the entire workflow (seconds)
    #[serde(default)]
    pub global_timeout: i64,

    #[serde(default)]
    pub tasks: Vec<TemplateTask>,
}

impl TemplateBody {
    /// All actions paired with their task, in execution order
    pub fn actions(&self) -> impl Iterator<Item = (&TemplateTask, &TemplateAction)> {
        self.tasks
            .iter()
            .flat_map(|task| task.actions.iter().map(move |action| (task, action)))
    }
}

/// A task groups the actions executed on one worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateTask {
    pub name: String,

    /// Worker identifier, typically a template variable such as `{{.device_1}}`
    pub worker: String,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    pub actions: Vec<TemplateAction>,
}

/// A single container step of a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateAction {
    pub name: String,

    pub image: String,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout: i64,

    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default, rename = "on-timeout")]
    pub on_timeout: Vec<String>,

    #[serde(default, rename = "on-failure")]
    pub on_failure: Vec<String>,

    #[serde(default)]
    pub volumes: Vec<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}
