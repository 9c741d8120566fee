//! Human-in-the-loop approval client.
//!
//! Connects to an agent backend over WebSocket, queues the approval requests
//! agents raise, renders their forms and sends the human decision back.

pub mod actions;
pub mod approvals;
pub mod bus;
pub mod channel;
pub mod config;
pub mod console;
pub mod form;
pub mod listeners;
pub mod mock;

pub use approvals::{ApprovalError, ApprovalQueue, PendingApproval, QueueView};
pub use bus::EventBus;
pub use channel::{AgentService, ChannelOptions};
pub use form::{DynamicForm, FieldValue, FormValues, SubmitEvent};
pub use listeners::{Listener, ListenerId, listener};
pub use mock::MockAgentFeed;
