//! Conversion from remote execution data to the local status shape

use crate::client::{RemoteAction, RemoteEvent, RemoteState};
use tackle_crd::{Action, Event, WorkflowState};

pub fn workflow_state(state: RemoteState) -> WorkflowState {
    match state {
        RemoteState::StatePending => WorkflowState::StatePending,
        RemoteState::StateRunning => WorkflowState::StateRunning,
        RemoteState::StateFailed => WorkflowState::StateFailed,
        RemoteState::StateTimeout => WorkflowState::StateTimeout,
        RemoteState::StateSuccess => WorkflowState::StateSuccess,
    }
}

/// Metadata is an opaque blob; invalid UTF-8 is replaced rather than rejected
pub fn metadata(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

pub fn action(remote: &RemoteAction) -> Action {
    Action {
        name: remote.name.clone(),
        task_name: remote.task_name.clone(),
        image: remote.image.clone(),
        timeout: remote.timeout,
        command: remote.command.clone(),
        on_timeout: remote.on_timeout.clone(),
        on_failure: remote.on_failure.clone(),
        worker_id: remote.worker_id.clone(),
        volumes: remote.volumes.clone(),
        environment: remote.environment.clone(),
    }
}

pub fn event(remote: &RemoteEvent) -> Event {
    Event {
        action_name: remote.action_name.clone(),
        task_name: remote.task_name.clone(),
        action_status: remote.action_status.to_string(),
        seconds: remote.seconds,
        message: remote.message.clone(),
        worker_id: remote.worker_id.clone(),
        created_at: remote.created_at,
    }
}

pub fn actions(remote: &[RemoteAction]) -> Vec<Action> {
    remote.iter().map(action).collect()
}

pub fn events(remote: &[RemoteEvent]) -> Vec<Event> {
    remote.iter().map(event).collect()
}
