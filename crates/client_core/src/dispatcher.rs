use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{MessageId, UserId},
    protocol::ClientFrame,
};
use tokio::sync::{broadcast, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::{
    connection::Notify,
    error::ClientError,
    rest::ChatApi,
    store::{ConversationStore, DeliveryState, StoredMessage},
    sync::ChatEvent,
};

/// Outcome of a send attempt from the caller's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Optimistic message appended and durably persisted.
    Delivered,
    /// Content was empty after trimming; nothing happened.
    Ignored,
}

/// Orchestrates the dual-path outgoing send: durable persist plus live
/// notify, with an immediate optimistic local append so the sender sees the
/// message exactly once, without delay, regardless of network latency.
pub struct MessageDispatcher {
    store: Arc<Mutex<ConversationStore>>,
    api: Arc<dyn ChatApi>,
    notify: Arc<dyn Notify>,
    events: broadcast::Sender<ChatEvent>,
    self_id: UserId,
}

impl MessageDispatcher {
    pub fn new(
        store: Arc<Mutex<ConversationStore>>,
        api: Arc<dyn ChatApi>,
        notify: Arc<dyn Notify>,
        events: broadcast::Sender<ChatEvent>,
        self_id: UserId,
    ) -> Self {
        Self {
            store,
            api,
            notify,
            events,
            self_id,
        }
    }

    /// Sends `content` to `peer`. Empty content after trimming is a no-op,
    /// not an error. On persist failure the optimistic message is marked
    /// failed and kept visible; the live notify only goes out after a
    /// successful persist.
    pub async fn send(&self, peer: &UserId, content: &str) -> Result<SendOutcome, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let temp_id = MessageId(format!("local-{}", Uuid::new_v4()));
        let optimistic = StoredMessage {
            id: temp_id.clone(),
            sender: self.self_id.clone(),
            receiver: peer.clone(),
            content: content.to_owned(),
            sent_at: Utc::now(),
            state: DeliveryState::Pending,
        };
        {
            let mut store = self.store.lock().await;
            store.append(peer, optimistic.clone());
        }
        let _ = self.events.send(ChatEvent::MessageAppended {
            peer: peer.clone(),
            message: optimistic,
        });

        self.persist_and_notify(peer, &temp_id, content).await
    }

    /// Re-runs the persist path for a message previously marked failed.
    /// Unknown or non-failed ids are ignored.
    pub async fn retry(
        &self,
        peer: &UserId,
        message_id: &MessageId,
    ) -> Result<SendOutcome, ClientError> {
        let content = {
            let mut store = self.store.lock().await;
            store.mark_pending(peer, message_id)
        };
        match content {
            Some(content) => self.persist_and_notify(peer, message_id, &content).await,
            None => Ok(SendOutcome::Ignored),
        }
    }

    async fn persist_and_notify(
        &self,
        peer: &UserId,
        temp_id: &MessageId,
        content: &str,
    ) -> Result<SendOutcome, ClientError> {
        match self.api.persist_message(peer, content).await {
            Ok(confirmed) => {
                {
                    let mut store = self.store.lock().await;
                    store.replace_optimistic(peer, temp_id, confirmed.clone());
                }
                let _ = self.events.send(ChatEvent::MessageConfirmed {
                    peer: peer.clone(),
                    temp_id: temp_id.clone(),
                    message: confirmed.clone(),
                });

                // The live notify rides behind the durable write. A peer
                // that is offline simply misses it and reads history later;
                // the persisted message is never rolled back.
                let frame = ClientFrame::SendMessage {
                    sender: self.self_id.clone(),
                    receiver: peer.clone(),
                    content: confirmed.content,
                };
                if let Err(err) = self.notify.notify(frame).await {
                    warn!(peer = %peer, error = %err, "live notify failed after persist");
                }
                Ok(SendOutcome::Delivered)
            }
            Err(err) => {
                {
                    let mut store = self.store.lock().await;
                    store.mark_failed(peer, temp_id);
                }
                let _ = self.events.send(ChatEvent::MessageFailed {
                    peer: peer.clone(),
                    message_id: temp_id.clone(),
                });
                Err(ClientError::PersistFailure(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
