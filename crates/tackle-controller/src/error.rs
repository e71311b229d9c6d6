//! Error types for reconciliation
//!
//! Store and remote-service failures are wrapped with enough context to
//! tell which step of a reconcile pass failed. `is_transient` separates
//! infrastructure trouble from problems that need a resource edit.

use crate::client::{ClientError, RemoteOp};
use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Error type for reconcile passes
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Resource store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Remote workflow service call failed
    #[error("failed to {op} workflow {id}: {source}")]
    Remote {
        op: RemoteOp,
        id: String,
        #[source]
        source: ClientError,
    },

    /// Referenced hardware does not exist
    #[error("hardware not found: {0}")]
    HardwareNotFound(String),

    /// Referenced template does not exist
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Referenced hardware has no external id
    #[error("hardware '{0}' has no external id")]
    HardwareMissingId(String),

    /// Referenced template was never registered with the remote service
    #[error("template '{0}' has no remote id")]
    TemplateNotRegistered(String),

    /// Workflow spec is unusable
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(#[from] tackle_crd::CrdError),

    /// Background reconcile task panicked or was cancelled
    #[error("reconcile task failed: {0}")]
    Task(String),

    /// Reconcile pass exceeded its deadline
    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid controller configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Synthetic resource generation failed
    #[error("generator error: {0}")]
    Generator(String),
}

/// Result type for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub(crate) fn remote(op: RemoteOp, id: impl Into<String>, source: ClientError) -> Self {
        ControllerError::Remote {
            op,
            id: id.into(),
            source,
        }
    }

    /// True for failures a later retry can fix without anyone editing resources
    pub fn is_transient(&self) -> bool {
        match self {
            ControllerError::Store(e) => e.is_transient(),
            ControllerError::Remote { source, .. } => !source.is_invalid_argument(),
            ControllerError::Timeout(_) | ControllerError::Task(_) => true,
            ControllerError::HardwareNotFound(_)
            | ControllerError::TemplateNotFound(_)
            | ControllerError::HardwareMissingId(_)
            | ControllerError::TemplateNotRegistered(_)
            | ControllerError::InvalidWorkflow(_)
            | ControllerError::InvalidConfiguration(_)
            | ControllerError::Generator(_) => false,
        }
    }

    /// True when an optimistic-concurrency check rejected a write
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Store(StoreError::Conflict { .. }))
    }
}
