use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::MessagePayload,
};

/// Delivery status of a message as the local user sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Optimistically appended; the durable persist is still in flight.
    Pending,
    /// Durably persisted, or received from the backend.
    Confirmed,
    /// The persist failed. The message stays visible and retryable.
    Failed,
}

/// A message as held in a conversation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub state: DeliveryState,
}

impl StoredMessage {
    pub fn confirmed(payload: MessagePayload) -> Self {
        Self {
            id: payload.message_id,
            sender: payload.sender,
            receiver: payload.receiver,
            content: payload.content,
            sent_at: payload.sent_at,
            state: DeliveryState::Confirmed,
        }
    }
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<StoredMessage>,
    unread: u32,
    history_loaded: bool,
}

impl Conversation {
    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn unread(&self) -> u32 {
        self.unread
    }

    pub fn history_loaded(&self) -> bool {
        self.history_loaded
    }
}

/// Per-peer ordered message sequences, unread counters and the focus
/// pointer: the single source of truth the UI reads.
///
/// This is a plain data structure. All mutations are serialized through
/// [`crate::sync::SyncEngine`], which owns it behind a mutex, so an unread
/// increment can never interleave incoherently with a reset.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<UserId, Conversation>,
    focused: Option<UserId>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a message to the peer's sequence. Idempotent by durable id:
    /// a message whose id is already present is a no-op and returns `false`.
    ///
    /// Insertion keeps ascending `sent_at` order; equal timestamps keep
    /// arrival order. The walk starts from the tail so already-rendered
    /// items never shuffle.
    pub fn append(&mut self, peer: &UserId, message: StoredMessage) -> bool {
        let conversation = self.conversations.entry(peer.clone()).or_default();
        if conversation.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        let at = conversation
            .messages
            .iter()
            .rposition(|m| m.sent_at <= message.sent_at)
            .map_or(0, |index| index + 1);
        conversation.messages.insert(at, message);
        true
    }

    /// Swaps a locally-created placeholder for its durably-persisted
    /// counterpart in place, preserving list position. If the confirmed id
    /// already arrived through the push channel, the placeholder is removed
    /// instead so the message appears exactly once.
    pub fn replace_optimistic(
        &mut self,
        peer: &UserId,
        temp_id: &MessageId,
        confirmed: MessagePayload,
    ) -> bool {
        let Some(conversation) = self.conversations.get_mut(peer) else {
            return false;
        };
        let Some(at) = conversation.messages.iter().position(|m| m.id == *temp_id) else {
            return false;
        };
        if conversation
            .messages
            .iter()
            .any(|m| m.id == confirmed.message_id)
        {
            conversation.messages.remove(at);
        } else {
            conversation.messages[at] = StoredMessage::confirmed(confirmed);
        }
        true
    }

    /// Marks a pending placeholder as failed. The content is never dropped.
    pub fn mark_failed(&mut self, peer: &UserId, temp_id: &MessageId) -> bool {
        self.set_state(peer, temp_id, DeliveryState::Failed)
    }

    /// Flips a failed message back to pending for a retry and returns its
    /// content. Returns `None` unless the message exists and is failed.
    pub fn mark_pending(&mut self, peer: &UserId, message_id: &MessageId) -> Option<String> {
        let conversation = self.conversations.get_mut(peer)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|m| m.id == *message_id && m.state == DeliveryState::Failed)?;
        message.state = DeliveryState::Pending;
        Some(message.content.clone())
    }

    fn set_state(&mut self, peer: &UserId, message_id: &MessageId, state: DeliveryState) -> bool {
        let Some(conversation) = self.conversations.get_mut(peer) else {
            return false;
        };
        match conversation
            .messages
            .iter_mut()
            .find(|m| m.id == *message_id)
        {
            Some(message) => {
                message.state = state;
                true
            }
            None => false,
        }
    }

    /// Returns the new count.
    pub fn increment_unread(&mut self, peer: &UserId) -> u32 {
        let conversation = self.conversations.entry(peer.clone()).or_default();
        conversation.unread += 1;
        conversation.unread
    }

    pub fn reset_unread(&mut self, peer: &UserId) {
        if let Some(conversation) = self.conversations.get_mut(peer) {
            conversation.unread = 0;
        }
    }

    pub fn unread(&self, peer: &UserId) -> u32 {
        self.conversations.get(peer).map_or(0, Conversation::unread)
    }

    pub fn focus(&mut self, peer: &UserId) {
        self.focused = Some(peer.clone());
    }

    pub fn clear_focus(&mut self) {
        self.focused = None;
    }

    pub fn focused(&self) -> Option<&UserId> {
        self.focused.as_ref()
    }

    pub fn history_loaded(&self, peer: &UserId) -> bool {
        self.conversations
            .get(peer)
            .is_some_and(Conversation::history_loaded)
    }

    pub fn mark_history_loaded(&mut self, peer: &UserId) {
        self.conversations
            .entry(peer.clone())
            .or_default()
            .history_loaded = true;
    }

    pub fn messages(&self, peer: &UserId) -> &[StoredMessage] {
        self.conversations
            .get(peer)
            .map_or(&[], |conversation| conversation.messages.as_slice())
    }

    pub fn conversation(&self, peer: &UserId) -> Option<&Conversation> {
        self.conversations.get(peer)
    }

    /// Session teardown: drops every conversation and the focus pointer.
    pub fn clear(&mut self) {
        self.conversations.clear();
        self.focused = None;
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
