//! Pending approval requests, newest first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hitl_protocol::schema::{self, FormSchema};
use hitl_protocol::{ActionRequest, ActionResponse, AgentEvent, EventKind, EventName, FileDiff};
use serde_json::Value;

use crate::bus::EventBus;
use crate::form::FormValues;
use crate::listeners::{ListenerId, listener, lock};

/// A request waiting for a human decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    pub id: String,
    pub schema: FormSchema,
    /// The request as received, for presentation (agent, title, files).
    pub request: ActionRequest,
}

/// What the queue currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueView {
    Empty,
    Pending(Vec<PendingApproval>),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApprovalError {
    #[error("no pending approval with id `{0}`")]
    UnknownRequest(String),
}

type Entries = Arc<Mutex<VecDeque<PendingApproval>>>;

/// Queue of approvals fed by `action_request` events.
///
/// Every decision is sent exactly once as an `action_response` and the entry
/// is dropped right away, whether the frame went out or was queued.
pub struct ApprovalQueue {
    bus: Arc<dyn EventBus>,
    entries: Entries,
    subscription: Mutex<Option<ListenerId>>,
}

impl ApprovalQueue {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            bus,
            entries: Arc::new(Mutex::new(VecDeque::new())),
            subscription: Mutex::new(None),
        }
    }

    /// Queue pre-seeded with the bundled example request.
    pub fn seeded_with_example(bus: Arc<dyn EventBus>) -> Self {
        let queue = Self::new(bus);
        queue.enqueue(schema::example_action_request());
        queue
    }

    /// Start listening for `action_request`. Calling twice is a no-op.
    pub fn attach(&self) {
        let mut subscription = lock(&self.subscription);
        if subscription.is_some() {
            return;
        }
        let entries = self.entries.clone();
        let id = self.bus.on(
            EventKind::ActionRequest,
            listener(move |event| match event {
                AgentEvent::ActionRequest(request) => {
                    push_front(&entries, request.clone());
                }
                AgentEvent::Other { payload, .. } => {
                    push_front(&entries, request_from_raw(payload));
                }
                _ => {}
            }),
        );
        *subscription = Some(id);
    }

    pub fn detach(&self) {
        if let Some(id) = lock(&self.subscription).take() {
            self.bus.off(&EventKind::ActionRequest, id);
        }
    }

    /// Normalize and add a request to the front. Returns the entry id.
    pub fn enqueue(&self, request: ActionRequest) -> String {
        push_front(&self.entries, request)
    }

    pub fn approve(&self, id: &str, values: FormValues) -> Result<ActionResponse, ApprovalError> {
        self.decide(id, true, Some(values))
    }

    pub fn reject(&self, id: &str) -> Result<ActionResponse, ApprovalError> {
        self.decide(id, false, None)
    }

    fn decide(
        &self,
        id: &str,
        approved: bool,
        values: Option<FormValues>,
    ) -> Result<ActionResponse, ApprovalError> {
        let mut entries = lock(&self.entries);
        let index = entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or_else(|| ApprovalError::UnknownRequest(id.to_string()))?;

        let decision = ActionResponse {
            approval_id: id.to_string(),
            approved,
            values: values.map(Into::into),
        };
        let payload = serde_json::to_value(&decision).unwrap_or(Value::Null);
        self.bus.send(EventName::ACTION_RESPONSE, payload);
        entries.remove(index);

        tracing::info!(approval_id = %id, approved = approved, remaining = entries.len(), "approval decided");
        Ok(decision)
    }

    pub fn get(&self, id: &str) -> Option<PendingApproval> {
        lock(&self.entries).iter().find(|e| e.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn view(&self) -> QueueView {
        let entries = lock(&self.entries);
        if entries.is_empty() {
            QueueView::Empty
        } else {
            QueueView::Pending(entries.iter().cloned().collect())
        }
    }
}

impl Drop for ApprovalQueue {
    fn drop(&mut self) {
        self.detach();
    }
}

fn push_front(entries: &Entries, request: ActionRequest) -> String {
    let id = request
        .request_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(synthesize_id);
    let schema = schema::normalize(&request.raw_schema());
    if schema.is_invalid() {
        tracing::warn!(approval_id = %id, "action request carried an unusable schema");
    }
    tracing::info!(approval_id = %id, fields = schema.fields.len(), "approval requested");
    lock(entries).push_front(PendingApproval {
        id: id.clone(),
        schema,
        request,
    });
    id
}

fn synthesize_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    format!(
        "apr-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Salvage an action request whose payload did not fit the typed shape.
/// Presentation fields are kept when they are usable on their own.
fn request_from_raw(payload: &Value) -> ActionRequest {
    let request_id = match payload.get("request_id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
    let files = payload
        .get("files")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value::<FileDiff>(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default();
    ActionRequest {
        request_id,
        ui_schema: payload.get("ui_schema").cloned(),
        schema: payload.get("schema").cloned(),
        agent: text("agent"),
        title: text("title"),
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FieldValue;
    use crate::mock::MockAgentFeed;
    use serde_json::json;

    fn queue() -> (Arc<MockAgentFeed>, ApprovalQueue) {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = ApprovalQueue::new(feed.clone());
        queue.attach();
        (feed, queue)
    }

    fn request(id: &str) -> AgentEvent {
        AgentEvent::ActionRequest(ActionRequest {
            request_id: Some(id.to_string()),
            ui_schema: Some(json!({
                "title": "Approve",
                "fields": [{"type": "text", "key": "note", "label": "Note"}]
            })),
            ..Default::default()
        })
    }

    #[test]
    fn test_action_request_enqueues_once() {
        let (feed, queue) = queue();
        assert_eq!(queue.view(), QueueView::Empty);

        feed.emit(request("req-1"));
        let QueueView::Pending(entries) = queue.view() else {
            panic!("Expected pending entries");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "req-1");
        assert_eq!(entries[0].schema.fields.len(), 1);
    }

    #[test]
    fn test_newest_first() {
        let (feed, queue) = queue();
        feed.emit(request("req-1"));
        feed.emit(request("req-2"));
        let QueueView::Pending(entries) = queue.view() else {
            panic!("Expected pending entries");
        };
        assert_eq!(entries[0].id, "req-2");
        assert_eq!(entries[1].id, "req-1");
    }

    #[test]
    fn test_approve_sends_and_removes() {
        let (feed, queue) = queue();
        feed.emit(request("req-1"));
        feed.emit(request("req-2"));

        let mut values = FormValues::new();
        values.insert("note", FieldValue::Text("looks good".to_string()));
        let decision = queue.approve("req-1", values).unwrap();
        assert!(decision.approved);

        let sent = feed.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "action_response");
        assert_eq!(
            sent[0].payload,
            Some(json!({"approval_id": "req-1", "approved": true, "values": {"note": "looks good"}}))
        );
        assert!(queue.get("req-1").is_none());
        assert!(queue.get("req-2").is_some());
    }

    #[test]
    fn test_reject_then_empty() {
        let (feed, queue) = queue();
        feed.emit(request("req-1"));
        queue.reject("req-1").unwrap();

        assert_eq!(
            feed.sent()[0].payload,
            Some(json!({"approval_id": "req-1", "approved": false}))
        );
        assert_eq!(queue.view(), QueueView::Empty);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_unknown_id_sends_nothing() {
        let (feed, queue) = queue();
        feed.emit(request("req-1"));
        queue.reject("req-1").unwrap();
        assert_eq!(
            queue.reject("req-1"),
            Err(ApprovalError::UnknownRequest("req-1".to_string()))
        );
        assert_eq!(feed.sent().len(), 1);
    }

    #[test]
    fn test_missing_id_and_schema_fallbacks() {
        let (feed, queue) = queue();
        feed.emit(AgentEvent::ActionRequest(ActionRequest {
            schema: Some(json!({"title": "Legacy", "fields": []})),
            ..Default::default()
        }));
        let QueueView::Pending(entries) = queue.view() else {
            panic!("Expected pending entries");
        };
        assert!(entries[0].id.starts_with("apr-"));
        assert_eq!(entries[0].schema.title_text(), Some("Legacy"));
    }

    #[test]
    fn test_invalid_schema_still_queued() {
        let (feed, queue) = queue();
        feed.emit(AgentEvent::ActionRequest(ActionRequest {
            request_id: Some("req-9".to_string()),
            ui_schema: Some(json!("not a schema")),
            ..Default::default()
        }));
        assert!(queue.get("req-9").unwrap().schema.is_invalid());
    }

    #[test]
    fn test_mismatched_payload_is_salvaged() {
        let (feed, queue) = queue();
        feed.emit(AgentEvent::decode(
            EventKind::ActionRequest,
            json!({
                "request_id": 17,
                "agent": "Coder Agent",
                "title": "Write file",
                "ui_schema": {"title": "T", "fields": []},
                "files": [{"diff": "+x"}, {"path": "src/lib.rs", "diff": "+y"}]
            }),
        ));
        let entry = queue.get("17").unwrap();
        assert_eq!(entry.schema.title_text(), Some("T"));
        assert_eq!(entry.request.agent.as_deref(), Some("Coder Agent"));
        assert_eq!(entry.request.title.as_deref(), Some("Write file"));
        assert_eq!(
            entry.request.files,
            vec![FileDiff {
                path: "src/lib.rs".to_string(),
                diff: "+y".to_string()
            }]
        );
    }

    #[test]
    fn test_empty_request_ids_get_distinct_ids() {
        let (feed, queue) = queue();
        feed.emit(request(""));
        feed.emit(request(""));
        let QueueView::Pending(entries) = queue.view() else {
            panic!("Expected pending entries");
        };
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.id.starts_with("apr-")));
        assert_ne!(entries[0].id, entries[1].id);
        assert!(queue.get("").is_none());
    }

    #[test]
    fn test_detach_stops_listening() {
        let (feed, queue) = queue();
        queue.detach();
        feed.emit(request("req-1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_seeded_with_example() {
        let feed = Arc::new(MockAgentFeed::new());
        let queue = ApprovalQueue::seeded_with_example(feed);
        assert_eq!(queue.len(), 1);
        assert!(queue.get(schema::EXAMPLE_REQUEST_ID).is_some());
    }
}
