//! Remote workflow service contract
//!
//! The remote service owns workflow executions; the controller only
//! creates them, reads them back and deletes them. Not-found is reported
//! as its own variant so the delete path can tolerate double deletes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Errors returned by the remote workflow service
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The execution (or referenced object) does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was rejected as malformed or referencing unknown objects
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Connectivity or server-side failure
    #[error("remote service unavailable: {0}")]
    Unavailable(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, ClientError::InvalidArgument(_))
    }
}

/// Result type for remote calls
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Remote operations, used for error context and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Get,
    Delete,
    GetMetadata,
    GetActions,
    GetEvents,
    GetState,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteOp::Create => "create",
            RemoteOp::Get => "get",
            RemoteOp::Delete => "delete",
            RemoteOp::GetMetadata => "get metadata for",
            RemoteOp::GetActions => "get actions for",
            RemoteOp::GetEvents => "get events for",
            RemoteOp::GetState => "get state for",
        };
        f.write_str(s)
    }
}

/// Execution state as reported by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RemoteState {
    #[default]
    StatePending,
    StateRunning,
    StateFailed,
    StateTimeout,
    StateSuccess,
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemoteState::StatePending => "STATE_PENDING",
            RemoteState::StateRunning => "STATE_RUNNING",
            RemoteState::StateFailed => "STATE_FAILED",
            RemoteState::StateTimeout => "STATE_TIMEOUT",
            RemoteState::StateSuccess => "STATE_SUCCESS",
        };
        f.write_str(s)
    }
}

/// Snapshot of a remote execution
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWorkflow {
    pub id: String,
    pub template: String,
    pub hardware: String,
    /// Opaque payload, typically the rendered template
    pub data: String,
    pub state: RemoteState,
}

/// One task step of a remote execution
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemoteAction {
    pub name: String,
    pub task_name: String,
    pub image: String,
    pub timeout: i64,
    pub command: Vec<String>,
    pub on_timeout: Vec<String>,
    pub on_failure: Vec<String>,
    pub worker_id: String,
    pub volumes: Vec<String>,
    pub environment: Vec<String>,
}

/// Status event recorded by the remote service
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub action_name: String,
    pub task_name: String,
    pub action_status: RemoteState,
    pub seconds: i64,
    pub message: String,
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
}

/// Narrow RPC surface of the remote workflow service
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Create an execution of `template_id` targeting `hardware_id`, returning its id
    async fn create(&self, template_id: &str, hardware_id: &str) -> ClientResult<String>;

    async fn get(&self, id: &str) -> ClientResult<RemoteWorkflow>;

    /// Delete an execution; `NotFound` when it is already gone
    async fn delete(&self, id: &str) -> ClientResult<()>;

    async fn get_metadata(&self, id: &str) -> ClientResult<Vec<u8>>;

    async fn get_actions(&self, id: &str) -> ClientResult<Vec<RemoteAction>>;

    async fn get_events(&self, id: &str) -> ClientResult<Vec<RemoteEvent>>;

    async fn get_state(&self, id: &str) -> ClientResult<RemoteState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_state_display() {
        assert_eq!(RemoteState::StateRunning.to_string(), "STATE_RUNNING");
        assert_eq!(RemoteState::StateSuccess.to_string(), "STATE_SUCCESS");
        assert_eq!(RemoteState::default(), RemoteState::StatePending);
    }

    #[test]
    fn test_not_found_is_distinguishable() {
        assert!(ClientError::NotFound("R1".to_string()).is_not_found());
        assert!(!ClientError::Unavailable("down".to_string()).is_not_found());
        assert!(ClientError::InvalidArgument("bad".to_string()).is_invalid_argument());
    }

    #[test]
    fn test_op_display() {
        assert_eq!(RemoteOp::GetEvents.to_string(), "get events for");
        assert_eq!(RemoteOp::Delete.to_string(), "delete");
    }
}
