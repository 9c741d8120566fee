//! Persistent event channel to the agent backend.
//!
//! [`AgentService`] owns one WebSocket connection at a time, fans inbound
//! frames out to typed listeners, queues outbound frames while offline, and
//! reconnects forever with exponential backoff until [`AgentService::disconnect`]
//! is called. All entry points return immediately; the connection itself is
//! driven by tasks spawned on the current tokio runtime.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hitl_protocol::{ActionRequest, AgentEvent, Connected, Envelope, EventKind};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::bus::EventBus;
use crate::listeners::{Listener, ListenerId, ListenerRegistry, lock};

const BASE_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Timing knobs for the channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelOptions {
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            base_reconnect_delay: BASE_RECONNECT_DELAY,
            max_reconnect_delay: MAX_RECONNECT_DELAY,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Delay before reconnect attempt number `attempts` (1-based):
/// `min(base * 2^(attempts-1), max)`.
pub fn backoff_delay(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent)
        .map_or(max, |delay| delay.min(max))
}

enum Link {
    Idle,
    Connecting,
    Open(mpsc::UnboundedSender<Message>),
}

struct ChannelState {
    url: Option<String>,
    /// Bumped whenever the current attempt is abandoned; tasks holding an
    /// older value must not touch the state.
    generation: u64,
    link: Link,
    reconnect_attempts: u32,
    send_queue: VecDeque<(String, Value)>,
    attempt: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
}

struct Inner {
    options: ChannelOptions,
    state: Mutex<ChannelState>,
    listeners: ListenerRegistry,
}

/// Client side of the agent event stream.
///
/// Cloning is cheap and every clone drives the same connection. Create one per
/// application and pass it to whatever needs it.
#[derive(Clone)]
pub struct AgentService {
    inner: Arc<Inner>,
}

impl Default for AgentService {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentService {
    pub fn new() -> Self {
        Self::with_options(ChannelOptions::default())
    }

    pub fn with_options(options: ChannelOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                state: Mutex::new(ChannelState {
                    url: None,
                    generation: 0,
                    link: Link::Idle,
                    reconnect_attempts: 0,
                    send_queue: VecDeque::new(),
                    attempt: None,
                    heartbeat: None,
                    reconnect_timer: None,
                }),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChannelState> {
        lock(&self.inner.state)
    }

    /// Start connecting to `url`, or to the last used URL when `None`.
    ///
    /// No-op when neither is known, or when an attempt for the same URL is
    /// already in flight or open. A different URL replaces the current
    /// connection. Must be called from within a tokio runtime.
    pub fn connect(&self, url: Option<&str>) {
        let mut state = self.state();
        let Some(target) = url.map(str::to_string).or_else(|| state.url.clone()) else {
            tracing::debug!("connect called without a url, ignoring");
            return;
        };

        if state.url.as_deref() == Some(target.as_str()) && !matches!(state.link, Link::Idle) {
            tracing::debug!(url = %target, "connection already in flight");
            return;
        }

        if teardown(&mut state) {
            tracing::info!(url = %target, "replacing open connection");
        }
        state.url = Some(target.clone());
        state.link = Link::Connecting;
        let generation = state.generation;

        let service = self.clone();
        state.attempt = Some(tokio::spawn(async move {
            service.run_connection(target, generation).await;
        }));
    }

    /// Close the connection and cancel every timer. Safe to call repeatedly.
    ///
    /// Queued frames are kept for the next successful connect.
    pub fn disconnect(&self) {
        let was_open = teardown(&mut self.state());
        if was_open {
            tracing::info!("disconnected by request");
            self.emit(AgentEvent::Disconnected);
        }
    }

    /// Register a listener for `kind`.
    pub fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.inner.listeners.add(kind, listener)
    }

    pub fn off(&self, kind: &EventKind, id: ListenerId) {
        self.inner.listeners.remove(kind, id);
    }

    /// Deliver `event` to every listener of its kind.
    pub fn emit(&self, event: AgentEvent) {
        self.inner.listeners.dispatch(&event);
    }

    /// Transmit immediately when open, otherwise queue for the next connect.
    pub fn send(&self, event_name: &str, payload: Value) {
        send_locked(&mut self.state(), event_name, payload);
    }

    /// Inject an action request as if it had arrived from the backend.
    pub fn push_action_request(&self, request: ActionRequest) {
        self.emit(AgentEvent::ActionRequest(request));
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state().link, Link::Open(_))
    }

    pub fn queued_len(&self) -> usize {
        self.state().send_queue.len()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.state().reconnect_attempts
    }

    pub fn url(&self) -> Option<String> {
        self.state().url.clone()
    }

    async fn run_connection(self, url: String, generation: u64) {
        tracing::info!(url = %url, "connecting to agent backend");

        let ws_stream = match connect_async(url.as_str()).await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "failed to connect to agent backend");
                self.handle_close(generation);
                return;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let closing = matches!(frame, Message::Close(_));
                if let Err(e) = ws_write.send(frame).await {
                    tracing::warn!(error = %e, "websocket send failed, stopping writer");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        if !self.handle_open(generation, &url, frame_tx) {
            writer.abort();
            return;
        }

        let reason = loop {
            match ws_read.next().await {
                Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                Some(Ok(Message::Close(_))) => break "server closed",
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "websocket error");
                    break "websocket error";
                }
                None => break "stream ended",
            }
        };

        tracing::info!(reason = reason, url = %url, "connection to agent backend lost");
        writer.abort();
        self.handle_close(generation);
    }

    /// Returns false when this attempt was superseded while connecting.
    fn handle_open(
        &self,
        generation: u64,
        url: &str,
        frame_tx: mpsc::UnboundedSender<Message>,
    ) -> bool {
        {
            let mut state = self.state();
            if state.generation != generation {
                return false;
            }
            state.link = Link::Open(frame_tx);
            state.reconnect_attempts = 0;
        }
        tracing::info!(url = %url, "connected to agent backend");

        self.emit(AgentEvent::Connected(Connected {
            url: url.to_string(),
        }));

        let mut state = self.state();
        if state.generation != generation {
            return true;
        }
        let queued = std::mem::take(&mut state.send_queue);
        if !queued.is_empty() {
            tracing::debug!(count = queued.len(), "flushing queued frames");
        }
        for (event_name, payload) in queued {
            send_locked(&mut state, &event_name, payload);
        }
        self.start_heartbeat(&mut state, generation);
        true
    }

    fn handle_close(&self, generation: u64) {
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            state.link = Link::Idle;
            if let Some(heartbeat) = state.heartbeat.take() {
                heartbeat.abort();
            }
            state.reconnect_attempts += 1;
            let delay = backoff_delay(
                state.reconnect_attempts,
                self.inner.options.base_reconnect_delay,
                self.inner.options.max_reconnect_delay,
            );
            tracing::info!(
                attempts = state.reconnect_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );

            let service = self.clone();
            state.reconnect_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                service.reconnect(generation);
            }));
        }
        self.emit(AgentEvent::Disconnected);
    }

    fn reconnect(&self, generation: u64) {
        {
            let mut state = self.state();
            if state.generation != generation {
                return;
            }
            // Detach our own handle so connect() does not abort this task.
            state.reconnect_timer = None;
        }
        self.connect(None);
    }

    fn start_heartbeat(&self, state: &mut ChannelState, generation: u64) {
        if let Some(previous) = state.heartbeat.take() {
            previous.abort();
        }
        let period = self.inner.options.heartbeat_interval;
        let service = self.clone();
        state.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                service.send_ping(generation);
            }
        }));
    }

    /// Liveness frame written straight to the socket, never queued.
    fn send_ping(&self, generation: u64) {
        let state = self.state();
        if state.generation != generation {
            return;
        }
        if let Link::Open(frame_tx) = &state.link {
            match Envelope::ping().to_text() {
                Ok(text) => {
                    if frame_tx.send(Message::Text(text)).is_ok() {
                        tracing::trace!("heartbeat ping sent");
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to serialize ping"),
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match Envelope::decode(text) {
            Ok(envelope) => {
                let event = AgentEvent::from_envelope(envelope);
                tracing::debug!(kind = %event.kind(), "received event");
                self.emit(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
            }
        }
    }
}

impl EventBus for AgentService {
    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        AgentService::on(self, kind, listener)
    }

    fn off(&self, kind: &EventKind, id: ListenerId) {
        AgentService::off(self, kind, id)
    }

    fn emit(&self, event: AgentEvent) {
        AgentService::emit(self, event)
    }

    fn send(&self, event_name: &str, payload: Value) {
        AgentService::send(self, event_name, payload)
    }
}

/// Abandon the current attempt: invalidate its generation, stop every timer
/// and close an open socket. Returns true if a connection was open.
fn teardown(state: &mut ChannelState) -> bool {
    state.generation += 1;
    for handle in [
        state.heartbeat.take(),
        state.reconnect_timer.take(),
        state.attempt.take(),
    ]
    .into_iter()
    .flatten()
    {
        handle.abort();
    }
    match std::mem::replace(&mut state.link, Link::Idle) {
        Link::Open(frame_tx) => {
            let _ = frame_tx.send(Message::Close(None));
            true
        }
        Link::Connecting | Link::Idle => false,
    }
}

fn send_locked(state: &mut ChannelState, event_name: &str, payload: Value) {
    let envelope = Envelope::new(event_name, payload);
    if let Link::Open(frame_tx) = &state.link {
        match envelope.to_text() {
            Ok(text) => {
                if frame_tx.send(Message::Text(text)).is_ok() {
                    tracing::debug!(event = %event_name, "sent frame");
                    return;
                }
                tracing::warn!(event = %event_name, "connection writer closed, queueing frame");
            }
            Err(e) => {
                tracing::error!(event = %event_name, error = %e, "failed to serialize frame, dropping");
                return;
            }
        }
    }
    state
        .send_queue
        .push_back((envelope.kind, envelope.payload.unwrap_or(Value::Null)));
}
