//! Finalizer guard
//!
//! A Workflow carries `WORKFLOW_FINALIZER` from before its remote
//! execution is created until that execution has been deleted. The store
//! keeps a deleting object around while the token is present.
//!
//! Metadata patches here re-read and re-apply their mutation when the
//! store reports a version conflict.

use crate::error::Result;
use crate::store::{ResourceStore, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use tackle_crd::{WORKFLOW_FINALIZER, Workflow};
use tracing::{debug, info};

/// Add the finalizer and persist it when missing
///
/// Objects that are already being deleted are returned unchanged. Returns
/// `None` if the object disappeared before the patch landed.
pub async fn ensure_finalizer(
    store: &dyn ResourceStore,
    workflow: Workflow,
    attempts: u32,
) -> Result<Option<Workflow>> {
    if workflow.metadata.is_being_deleted() || workflow.metadata.has_finalizer(WORKFLOW_FINALIZER)
    {
        return Ok(Some(workflow));
    }

    let added = AtomicBool::new(false);
    let patched = patch_metadata(store, workflow, attempts, |wf| {
        let changed =
            !wf.metadata.is_being_deleted() && wf.metadata.add_finalizer(WORKFLOW_FINALIZER);
        added.store(changed, Ordering::Relaxed);
        changed
    })
    .await?;

    match &patched {
        Some(wf) if added.load(Ordering::Relaxed) => {
            info!(workflow = %wf.name(), "Added finalizer");
        }
        _ => {}
    }
    Ok(patched)
}

/// Remove the finalizer and persist
///
/// Returns `None` once the store has dropped the object.
pub async fn remove_finalizer(
    store: &dyn ResourceStore,
    workflow: Workflow,
    attempts: u32,
) -> Result<Option<Workflow>> {
    let name = workflow.name().to_string();
    let removed = AtomicBool::new(false);
    let patched = patch_metadata(store, workflow, attempts, |wf| {
        let changed = wf.metadata.remove_finalizer(WORKFLOW_FINALIZER);
        removed.store(changed, Ordering::Relaxed);
        changed
    })
    .await?;
    let removed = removed.load(Ordering::Relaxed);

    match patched {
        Some(wf) if is_released(&wf) => {
            if removed {
                info!(workflow = %name, "Removed finalizer, workflow released");
            }
            Ok(None)
        }
        Some(wf) => {
            if removed {
                debug!(workflow = %name, "Removed finalizer");
            } else {
                debug!(workflow = %name, "Finalizer already absent");
            }
            Ok(Some(wf))
        }
        None => Ok(None),
    }
}

/// A deleting object without finalizers no longer exists in the store
fn is_released(workflow: &Workflow) -> bool {
    workflow.metadata.is_being_deleted() && workflow.metadata.finalizers.is_empty()
}

/// Apply `mutate` and write the metadata, retrying on version conflicts
///
/// `mutate` returns false when the object needs no change, in which case
/// nothing is written. On conflict the latest object is read back and
/// mutated again, up to `attempts` writes in total. Returns `None` when
/// the object no longer exists.
pub(crate) async fn patch_metadata<F>(
    store: &dyn ResourceStore,
    mut workflow: Workflow,
    attempts: u32,
    mutate: F,
) -> Result<Option<Workflow>>
where
    F: Fn(&mut Workflow) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        if !mutate(&mut workflow) {
            return Ok(Some(workflow));
        }

        match store.patch_workflow(&workflow).await {
            Ok(updated) => return Ok(Some(updated)),
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e @ StoreError::Conflict { .. }) if attempt < attempts => {
                debug!(
                    workflow = %workflow.name(),
                    attempt,
                    error = %e,
                    "Metadata patch conflicted, re-reading"
                );
                let latest = store.get_workflow(workflow.name()).await?;
                match latest {
                    Some(latest) => workflow = latest,
                    None => return Ok(None),
                }
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
