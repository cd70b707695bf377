//! Real-time relays to users watching a task. Delivery is fire-and-forget:
//! a channel problem is logged and never fails the caller.

pub mod progress;

pub use progress::ProgressTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::models::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Started,
    Progress,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelMessage {
    pub kind: MessageKind,
    pub task_id: String,
    pub text: String,
    pub percentage: Option<u8>,
    pub timestamp: DateTime<Utc>,
}

impl ChannelMessage {
    fn new(kind: MessageKind, task_id: &str, text: String) -> Self {
        Self {
            kind,
            task_id: task_id.to_string(),
            text,
            percentage: None,
            timestamp: Utc::now(),
        }
    }

    pub fn started(task_id: &str, agent_id: &str) -> Self {
        Self::new(MessageKind::Started, task_id, format!("Task started on agent {}", agent_id))
    }

    pub fn success(task_id: &str, output: &str) -> Self {
        Self::new(MessageKind::Success, task_id, output.to_string())
    }

    pub fn error(task_id: &str, summary: &str) -> Self {
        Self::new(MessageKind::Error, task_id, summary.to_string())
    }

    pub fn progress(event: &ProgressEvent) -> Self {
        let mut msg = Self::new(MessageKind::Progress, &event.task_id, event.message.clone());
        msg.percentage = Some(event.percentage);
        msg
    }

    /// Plain-text framing that keeps success and failure distinguishable.
    pub fn render(&self) -> String {
        match self.kind {
            MessageKind::Started => format!("[started] {}", self.text),
            MessageKind::Progress => format!("[{}%] {}", self.percentage.unwrap_or(0), self.text),
            MessageKind::Success => format!("[success] {}", self.text),
            MessageKind::Error => format!("[error] {}", self.text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    /// Everyone following a task.
    Group(String),
    /// One connected client, usually the agent's own channel.
    Client(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub recipient: Recipient,
    pub message: ChannelMessage,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send_to_group(&self, group_id: &str, message: &ChannelMessage);
    async fn send_to_client(&self, client_id: &str, message: &ChannelMessage);
}

/// In-process fan-out over a tokio broadcast channel. Subscribers that fall
/// behind lose the oldest messages.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn publish(&self, recipient: Recipient, message: &ChannelMessage) {
        let envelope = Envelope { recipient, message: message.clone() };
        if self.tx.send(envelope).is_err() {
            debug!(task_id = %message.task_id, "No notification subscribers");
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationChannel for BroadcastHub {
    async fn send_to_group(&self, group_id: &str, message: &ChannelMessage) {
        self.publish(Recipient::Group(group_id.to_string()), message);
    }

    async fn send_to_client(&self, client_id: &str, message: &ChannelMessage) {
        self.publish(Recipient::Client(client_id.to_string()), message);
    }
}

/// Writes notifications to the log; used by the one-shot CLI.
pub struct LogNotifier;

#[async_trait]
impl NotificationChannel for LogNotifier {
    async fn send_to_group(&self, group_id: &str, message: &ChannelMessage) {
        info!(group = group_id, task_id = %message.task_id, "{}", message.render());
    }

    async fn send_to_client(&self, client_id: &str, message: &ChannelMessage) {
        info!(client = client_id, task_id = %message.task_id, "{}", message.render());
    }
}
