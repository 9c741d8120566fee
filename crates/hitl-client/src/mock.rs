//! Timer-driven fake event source for demos and tests.
//!
//! [`MockAgentFeed`] implements the same [`EventBus`] surface as the live
//! channel but never touches the network: it periodically emits agent chat
//! lines and, every fifth tick, an action request. Frames passed to `send`
//! are kept in an outbox instead of being transmitted.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hitl_protocol::{ActionRequest, AgentEvent, AgentMessage, Envelope, EventKind, FileDiff};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::listeners::{Listener, ListenerId, ListenerRegistry, lock};

const AGENTS: [&str; 3] = ["Idea Agent", "Planner Agent", "Coder Agent"];
const ACTION_REQUEST_EVERY: u64 = 5;

#[derive(Default)]
pub struct MockAgentFeed {
    listeners: Arc<ListenerRegistry>,
    outbox: Mutex<Vec<Envelope>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl MockAgentFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin emitting every `interval`, replacing a running timer.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, interval: Duration) {
        self.stop();
        let listeners = self.listeners.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            let mut counter = 0u64;
            loop {
                ticker.tick().await;
                for event in mock_tick(counter) {
                    listeners.dispatch(&event);
                }
                counter += 1;
            }
        });
        *lock(&self.timer) = Some(handle);
        tracing::info!(interval_ms = interval.as_millis() as u64, "mock agent feed started");
    }

    pub fn stop(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            tracing::info!("mock agent feed stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.timer).is_some()
    }

    /// Frames handed to `send`, oldest first.
    pub fn sent(&self) -> Vec<Envelope> {
        lock(&self.outbox).clone()
    }
}

impl Drop for MockAgentFeed {
    fn drop(&mut self) {
        self.stop();
    }
}

impl EventBus for MockAgentFeed {
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn off(&self, kind: &EventKind, id: ListenerId) {
        self.listeners.remove(kind, id);
    }

    fn emit(&self, event: AgentEvent) {
        self.listeners.dispatch(&event);
    }

    fn send(&self, event_name: &str, payload: Value) {
        tracing::debug!(event = %event_name, "mock feed captured outbound frame");
        lock(&self.outbox).push(Envelope::new(event_name, payload));
    }
}

/// Events produced by tick number `counter` (0-based).
pub fn mock_tick(counter: u64) -> Vec<AgentEvent> {
    let agent = AGENTS[(counter % AGENTS.len() as u64) as usize];
    let message = if agent == "Coder Agent" {
        format!(
            "Streaming code chunk {counter}\nfunction hello() {{\n  console.log(\"hello {counter}\")\n}}"
        )
    } else {
        format!("{agent} says update {counter}")
    };

    let mut events = vec![AgentEvent::AgentMessage(AgentMessage {
        agent: agent.to_string(),
        message,
        timestamp: Some(chrono::Utc::now().to_rfc3339()),
    })];

    let emitted = counter + 1;
    if emitted % ACTION_REQUEST_EVERY == 0 {
        events.push(AgentEvent::ActionRequest(ActionRequest {
            request_id: Some(format!(
                "apr-{}-{}",
                chrono::Utc::now().timestamp_millis(),
                emitted
            )),
            agent: Some(agent.to_string()),
            title: Some("Write file".to_string()),
            ui_schema: Some(json!({
                "title": format!("Approve write from {agent}"),
                "fields": [
                    {"type": "textarea", "key": "summary", "label": "Summary of change"},
                    {"type": "multi-select", "key": "files", "label": "Files", "options": ["src/example.ts"]}
                ]
            })),
            files: vec![FileDiff {
                path: "src/example.ts".to_string(),
                diff: "+++ new file".to_string(),
            }],
            ..Default::default()
        }));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listeners::listener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_tick_rotates_agents() {
        let agents: Vec<String> = (0..4)
            .map(|n| match &mock_tick(n)[0] {
                AgentEvent::AgentMessage(msg) => msg.agent.clone(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(agents, vec!["Idea Agent", "Planner Agent", "Coder Agent", "Idea Agent"]);
    }

    #[test]
    fn test_every_fifth_tick_requests_action() {
        assert_eq!(mock_tick(3).len(), 1);
        let events = mock_tick(4);
        assert_eq!(events.len(), 2);
        let AgentEvent::ActionRequest(req) = &events[1] else {
            panic!("Expected ActionRequest event");
        };
        assert!(req.request_id.as_deref().unwrap().ends_with("-5"));
        assert!(req.ui_schema.is_some());
        assert_eq!(req.files[0].path, "src/example.ts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop() {
        let feed = MockAgentFeed::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        feed.on(
            EventKind::AgentMessage,
            listener(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        feed.start(Duration::from_millis(100));
        assert!(feed.is_running());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let seen = calls.load(Ordering::SeqCst);
        assert_eq!(seen, 3);

        feed.stop();
        assert!(!feed.is_running());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_send_records_outbox() {
        let feed = MockAgentFeed::new();
        feed.send("apply_change", json!({"id": "c1"}));
        let sent = feed.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "apply_change");
    }
}
