//! Tackle Workflow Controller
//!
//! This crate keeps `Workflow` resources in step with executions owned by
//! a remote workflow service. It creates the remote execution once,
//! mirrors its status back onto the resource, polls until the execution
//! succeeds, and tears it down when the resource is deleted.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Controller                          │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │   ResourceStore  ──watch──▶  WorkQueue      │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │           Reconciler                        │    │
//! │  │   finalizer | create | status sync | delete │    │
//! │  └─────────────────────────────────────────────┘    │
//! │                      │                               │
//! │                      ▼                               │
//! │  ┌─────────────────────────────────────────────┐    │
//! │  │         WorkflowClient                      │    │
//! │  │   remote service | MemoryWorkflowClient     │    │
//! │  └─────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tackle_controller::{Controller, ControllerConfig, MemoryStore, MemoryWorkflowClient};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let client = Arc::new(MemoryWorkflowClient::new());
//! let controller = Controller::new(store, client, ControllerConfig::default());
//!
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! controller.run(shutdown).await?;
//! ```

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod finalizer;
pub mod generators;
pub mod mapping;
pub mod queue;
pub mod reconciler;
pub mod simulator;
pub mod store;

pub use client::{
    ClientError, ClientResult, RemoteAction, RemoteEvent, RemoteOp, RemoteState, RemoteWorkflow,
    WorkflowClient,
};
pub use config::{ControllerConfig, DEFAULT_REQUEUE_INTERVAL};
pub use controller::Controller;
pub use error::{ControllerError, Result};
pub use queue::WorkQueue;
pub use reconciler::{ReconcileResult, Reconciler};
pub use simulator::MemoryWorkflowClient;
pub use store::{MemoryStore, ResourceStore, StoreError, WatchEvent, WatchEventKind};
