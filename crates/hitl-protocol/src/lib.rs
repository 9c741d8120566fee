//! Shared protocol definitions for the HITL approval channel.
//!
//! Every frame on the persistent connection is a JSON envelope of the form
//! `{"type": <event name>, "payload": <any>}`. Inbound frames are dispatched
//! by event name; outbound frames carry decisions and liveness pings.

pub mod schema;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Event Names
// ============================================================================

/// Event names used on the wire.
pub struct EventName;

impl EventName {
    // Subscribable (backend -> client, or local lifecycle)
    pub const AGENT_MESSAGE: &str = "agent_message";
    pub const ACTION_REQUEST: &str = "action_request";
    pub const WORKSPACE_UPDATE: &str = "workspace_update";
    pub const CONNECTED: &str = "connected";
    pub const DISCONNECTED: &str = "disconnected";

    // Send-only (client -> backend)
    pub const ACTION_RESPONSE: &str = "action_response";
    pub const APPLY_CHANGE: &str = "apply_change";
    pub const PING: &str = "ping";
}

/// Subscription key for the event channel.
///
/// Known kinds are matched case-insensitively; anything else is kept under
/// its literal name so newer backends can still reach subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentMessage,
    ActionRequest,
    WorkspaceUpdate,
    Connected,
    Disconnected,
    Other(String),
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            EventName::AGENT_MESSAGE => EventKind::AgentMessage,
            EventName::ACTION_REQUEST => EventKind::ActionRequest,
            EventName::WORKSPACE_UPDATE => EventKind::WorkspaceUpdate,
            EventName::CONNECTED => EventKind::Connected,
            EventName::DISCONNECTED => EventKind::Disconnected,
            _ => EventKind::Other(name.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentMessage => EventName::AGENT_MESSAGE,
            EventKind::ActionRequest => EventName::ACTION_REQUEST,
            EventKind::WorkspaceUpdate => EventName::WORKSPACE_UPDATE,
            EventKind::Connected => EventName::CONNECTED,
            EventKind::Disconnected => EventName::DISCONNECTED,
            EventKind::Other(name) => name,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        EventKind::parse(name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A single frame on the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload: Some(payload),
        }
    }

    /// Liveness frame, serialized as `{"type":"ping"}`.
    pub fn ping() -> Self {
        Self {
            kind: EventName::PING.to_string(),
            payload: None,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse an inbound text frame.
    ///
    /// Frames that are not JSON objects, or whose `type` is missing, empty
    /// or not a string, are rejected.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut obj) = value else {
            return Err(FrameError::MissingType);
        };
        let kind = match obj.get("type").and_then(Value::as_str) {
            Some(kind) if !kind.is_empty() => kind.to_string(),
            _ => return Err(FrameError::MissingType),
        };
        let payload = obj.remove("payload").filter(|p| !p.is_null());
        Ok(Self { kind, payload })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no usable `type` field")]
    MissingType,
}

// ============================================================================
// Payloads
// ============================================================================

/// Data for agent_message - a chat line streamed from an agent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentMessage {
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// A proposed file change attached to an action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    #[serde(default)]
    pub diff: String,
}

/// Data for action_request - the backend asks a human to approve an operation.
///
/// Only `request_id` and the schema are consumed by the approval queue; the
/// rest is carried along for presentation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Untrusted A2UI schema; must go through [`schema::normalize`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
    /// Older producers send the schema under this name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileDiff>,
}

impl ActionRequest {
    /// The raw schema to normalize: `ui_schema`, else `schema`, else `{}`.
    pub fn raw_schema(&self) -> Value {
        [&self.ui_schema, &self.schema]
            .into_iter()
            .flatten()
            .find(|v| is_truthy(v))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()))
    }
}

/// Data for workspace_update - a local or remote change to the workspace.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkspaceUpdate {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optimistic: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rollback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Data for connected - emitted locally once a connection opens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Connected {
    pub url: String,
}

/// Data for action_response - the human decision sent back to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub approval_id: String,
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Map<String, Value>>,
}

/// Data for apply_change - asks the backend to persist a workspace change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyChange {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

// ============================================================================
// Typed Events
// ============================================================================

/// An event as delivered to subscribers.
///
/// `Other` carries anything without a typed shape: unknown kinds, and known
/// kinds whose payload did not match (still delivered under that kind).
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    AgentMessage(AgentMessage),
    ActionRequest(ActionRequest),
    WorkspaceUpdate(WorkspaceUpdate),
    Connected(Connected),
    Disconnected,
    Other { kind: EventKind, payload: Value },
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::AgentMessage(_) => EventKind::AgentMessage,
            AgentEvent::ActionRequest(_) => EventKind::ActionRequest,
            AgentEvent::WorkspaceUpdate(_) => EventKind::WorkspaceUpdate,
            AgentEvent::Connected(_) => EventKind::Connected,
            AgentEvent::Disconnected => EventKind::Disconnected,
            AgentEvent::Other { kind, .. } => kind.clone(),
        }
    }

    /// Build a typed event from a kind and its raw payload. Never fails.
    pub fn decode(kind: EventKind, payload: Value) -> Self {
        match kind {
            EventKind::AgentMessage => typed(kind, payload, AgentEvent::AgentMessage),
            EventKind::ActionRequest => typed(kind, payload, AgentEvent::ActionRequest),
            EventKind::WorkspaceUpdate => typed(kind, payload, AgentEvent::WorkspaceUpdate),
            EventKind::Connected => typed(kind, payload, AgentEvent::Connected),
            EventKind::Disconnected => AgentEvent::Disconnected,
            EventKind::Other(_) => AgentEvent::Other { kind, payload },
        }
    }

    pub fn from_envelope(envelope: Envelope) -> Self {
        let kind = EventKind::parse(&envelope.kind);
        Self::decode(kind, envelope.payload.unwrap_or(Value::Null))
    }
}

fn typed<T: DeserializeOwned + Default>(
    kind: EventKind,
    payload: Value,
    wrap: fn(T) -> AgentEvent,
) -> AgentEvent {
    if payload.is_null() {
        return wrap(T::default());
    }
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(data) => wrap(data),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "payload does not match event shape, delivering raw");
            AgentEvent::Other { kind, payload }
        }
    }
}

/// Loose truthiness used by schema producers: null, false, 0 and "" are absent.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ============================================================================
// Tests
// ============================================================================
