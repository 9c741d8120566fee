//! Optimistic workspace changes.

use hitl_protocol::{AgentEvent, ApplyChange, EventName, WorkspaceUpdate};
use serde_json::Value;

use crate::bus::EventBus;

/// A change the user made locally that the backend still has to confirm.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Change {
    pub id: String,
    pub description: Option<String>,
    pub payload: Option<Value>,
}

impl Change {
    pub fn new(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            description: None,
            payload: Some(payload),
        }
    }
}

/// Show `change` to local subscribers right away, then ask the backend to
/// apply it. If the backend later refuses, call [`rollback_change`].
pub fn apply_optimistic_change(bus: &dyn EventBus, change: &Change) {
    tracing::debug!(change_id = %change.id, "applying optimistic change");
    bus.emit(AgentEvent::WorkspaceUpdate(WorkspaceUpdate {
        id: change.id.clone(),
        payload: change.payload.clone(),
        optimistic: true,
        ..Default::default()
    }));

    let request = ApplyChange {
        id: change.id.clone(),
        payload: change.payload.clone(),
    };
    match serde_json::to_value(&request) {
        Ok(payload) => bus.send(EventName::APPLY_CHANGE, payload),
        Err(e) => tracing::error!(change_id = %change.id, error = %e, "failed to encode apply_change"),
    }
}

/// Tell local subscribers to undo change `id`.
pub fn rollback_change(bus: &dyn EventBus, id: &str, reason: Option<&str>) {
    tracing::info!(change_id = %id, reason = ?reason, "rolling back change");
    bus.emit(AgentEvent::WorkspaceUpdate(WorkspaceUpdate {
        id: id.to_string(),
        rollback: true,
        reason: reason.map(str::to_string),
        ..Default::default()
    }));
}
