//! Tackle resource types
//!
//! This crate provides the declarative resources reconciled by the
//! workflow controller.
//!
//! # API Group
//!
//! All types use the `tinkerbell.org/v1alpha1` API group so that objects
//! written by existing Tinkerbell tooling deserialize unchanged.
//!
//! # Resources
//!
//! - `Hardware` - Machines a workflow can target (external id, MACs, IPs)
//! - `Template` - Task definitions registered with the remote service
//! - `Workflow` - A template bound to hardware, mirrored from the remote execution

pub mod error;
pub mod hardware;
pub mod metadata;
pub mod template;
pub mod workflow;

pub use error::*;
pub use hardware::*;
pub use metadata::*;
pub use template::*;
pub use workflow::*;

/// API version for all resources
pub const API_VERSION: &str = "tinkerbell.org/v1alpha1";

/// API group for all resources
pub const API_GROUP: &str = "tinkerbell.org";

/// API version string
pub const VERSION: &str = "v1alpha1";

/// Finalizer token that blocks Workflow removal until the remote execution is gone
pub const WORKFLOW_FINALIZER: &str = "workflow.tinkerbell.org";

/// Annotation holding the remote execution id of a Workflow
pub const WORKFLOW_ID_ANNOTATION: &str = "workflow.tinkerbell.org/id";

/// Annotation holding the remote id of a registered Template
pub const TEMPLATE_ID_ANNOTATION: &str = "template.tinkerbell.org/id";
