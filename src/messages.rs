//! In-process inter-agent messaging.
//!
//! Each registered agent has a bounded inbox. Delivery is fire-and-forget:
//! no acknowledgments, no persistence. For cross-process deployments see
//! [`crate::journal::MessageJournal`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::util::epoch_secs;

/// Inbox depth per agent.
const INBOX_CAPACITY: usize = 256;

/// Message recipient: a specific agent or every agent but the sender.
/// Serialises as the agent id string, with `"*"` as the broadcast marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Agent(String),
    Broadcast,
}

impl Recipient {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Agent(id) => id,
            Self::Broadcast => "*",
        }
    }
}

impl From<&str> for Recipient {
    fn from(value: &str) -> Self {
        if value == "*" {
            Self::Broadcast
        } else {
            Self::Agent(value.to_string())
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Recipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(de::Error::custom("recipient must not be empty"));
        }
        Ok(Self::from(raw.as_str()))
    }
}

/// A message between agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: Recipient,
    pub content: String,
    pub timestamp: f64,
}

impl Message {
    fn new(from: &str, to: Recipient, content: &str) -> Self {
        Self {
            from: from.to_string(),
            to,
            content: content.to_string(),
            timestamp: epoch_secs(),
        }
    }
}

struct Inbox {
    tx: mpsc::Sender<Message>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

/// Async message passing between agents in the same process.
///
/// Messages are enqueued on the recipient's inbox immediately. Broadcasts
/// go to every registered agent except the sender.
#[derive(Default)]
pub struct MessageBus {
    inboxes: RwLock<HashMap<String, Arc<Inbox>>>,
    history: Mutex<Vec<Message>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent to receive messages. Re-registering is a no-op.
    pub fn register(&self, agent_id: &str) {
        let mut inboxes = self.inboxes.write();
        if !inboxes.contains_key(agent_id) {
            let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
            inboxes.insert(
                agent_id.to_string(),
                Arc::new(Inbox {
                    tx,
                    rx: tokio::sync::Mutex::new(rx),
                }),
            );
            info!(agent_id = %agent_id, "Agent registered on message bus");
        }
    }

    /// Remove an agent. Undelivered messages are lost.
    pub fn unregister(&self, agent_id: &str) {
        self.inboxes.write().remove(agent_id);
    }

    /// Send a message to a specific agent. An unknown recipient is logged
    /// at warning level; the send still succeeds.
    pub async fn send(&self, from: &str, to: &str, content: &str) {
        let msg = Message::new(from, Recipient::Agent(to.to_string()), content);
        self.history.lock().push(msg.clone());

        let inbox = self.inboxes.read().get(to).cloned();
        match inbox {
            Some(inbox) => {
                if inbox.tx.send(msg).await.is_ok() {
                    debug!(from = %from, to = %to, "Message delivered");
                } else {
                    warn!(from = %from, to = %to, "Recipient inbox closed, message dropped");
                }
            }
            None => warn!(from = %from, to = %to, "Message to unknown agent"),
        }
    }

    /// Send a message to every registered agent except the sender.
    pub async fn broadcast(&self, from: &str, content: &str) {
        let msg = Message::new(from, Recipient::Broadcast, content);
        self.history.lock().push(msg.clone());

        let targets: Vec<Arc<Inbox>> = {
            let inboxes = self.inboxes.read();
            inboxes
                .iter()
                .filter(|(id, _)| id.as_str() != from)
                .map(|(_, inbox)| Arc::clone(inbox))
                .collect()
        };

        let recipient_count = targets.len();
        for inbox in targets {
            let _ = inbox.tx.send(msg.clone()).await;
        }
        debug!(from = %from, recipients = recipient_count, "Broadcast delivered");
    }

    /// Drain all pending messages for an agent. If the inbox is empty and
    /// `timeout` is non-zero, waits up to `timeout` for the first message
    /// and then drains any further arrivals. Returns an empty list on
    /// timeout or for unregistered agents.
    pub async fn receive(&self, agent_id: &str, timeout: Duration) -> Vec<Message> {
        let Some(inbox) = self.inboxes.read().get(agent_id).cloned() else {
            return Vec::new();
        };

        let mut rx = inbox.rx.lock().await;
        let mut messages = Vec::new();

        while let Ok(msg) = rx.try_recv() {
            messages.push(msg);
        }

        if messages.is_empty() && !timeout.is_zero() {
            if let Ok(Some(msg)) = tokio::time::timeout(timeout, rx.recv()).await {
                messages.push(msg);
                while let Ok(msg) = rx.try_recv() {
                    messages.push(msg);
                }
            }
        }

        messages
    }

    /// Every message ever sent, in send order. For debugging.
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }

    pub fn agent_count(&self) -> usize {
        self.inboxes.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_and_receive() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");

        bus.send("a", "b", "hello").await;

        let messages = bus.receive("b", Duration::ZERO).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from, "a");
        assert_eq!(messages[0].content, "hello");

        // Inbox drained.
        assert!(bus.receive("b", Duration::ZERO).await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");
        bus.register("c");

        bus.broadcast("a", "hi").await;

        assert!(bus.receive("a", Duration::ZERO).await.is_empty());
        for agent in ["b", "c"] {
            let messages = bus.receive(agent, Duration::ZERO).await;
            assert_eq!(messages.len(), 1, "{agent} should see the broadcast");
            assert_eq!(messages[0].from, "a");
            assert_eq!(messages[0].content, "hi");
            assert_eq!(messages[0].to, Recipient::Broadcast);
        }
    }

    #[tokio::test]
    async fn test_unknown_recipient_does_not_fail() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.send("a", "ghost", "anyone there?").await;
        assert_eq!(bus.history().len(), 1);
    }

    #[tokio::test]
    async fn test_receive_waits_for_first_message() {
        let bus = Arc::new(MessageBus::new());
        bus.register("a");
        bus.register("b");

        let sender = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.send("a", "b", "delayed").await;
        });

        let messages = bus.receive("b", Duration::from_secs(2)).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "delayed");
    }

    #[tokio::test]
    async fn test_receive_timeout_returns_empty() {
        let bus = MessageBus::new();
        bus.register("a");
        let messages = bus.receive("a", Duration::from_millis(50)).await;
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_drops_inbox() {
        let bus = MessageBus::new();
        bus.register("a");
        bus.register("b");
        assert_eq!(bus.agent_count(), 2);

        bus.unregister("b");
        assert_eq!(bus.agent_count(), 1);
        assert!(bus.receive("b", Duration::ZERO).await.is_empty());
    }

    #[test]
    fn test_recipient_serde_round_trip() {
        let broadcast = serde_json::to_string(&Recipient::Broadcast).unwrap();
        assert_eq!(broadcast, "\"*\"");

        let agent: Recipient = serde_json::from_str("\"worker-1\"").unwrap();
        assert_eq!(agent, Recipient::Agent("worker-1".to_string()));

        let star: Recipient = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(star, Recipient::Broadcast);
    }
}
