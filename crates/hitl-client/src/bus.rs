use hitl_protocol::{AgentEvent, EventKind};
use serde_json::Value;

use crate::listeners::{Listener, ListenerId};

/// Publish/subscribe surface shared by the live channel and the mock feed.
///
/// Consumers such as the approval queue only talk to this trait, so they can
/// run against either source.
pub trait EventBus: Send + Sync {
    /// Register a listener for `kind`.
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId;

    /// Unregister a listener. Unknown ids are ignored.
    fn off(&self, kind: &EventKind, id: ListenerId);

    /// Deliver an event to local subscribers only.
    fn emit(&self, event: AgentEvent);

    /// Send `{type: event_name, payload}` to the backend.
    fn send(&self, event_name: &str, payload: Value);
}
