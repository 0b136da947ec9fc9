use std::sync::Arc;

use shared::{
    domain::{MessageId, UserId},
    protocol::MessagePayload,
};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::info;

use crate::{
    connection::{ConnectionConfig, ConnectionManager, ConnectionState, PushEvent},
    dispatcher::{MessageDispatcher, SendOutcome},
    error::ClientError,
    rest::ChatApi,
    session::Session,
    store::{ConversationStore, StoredMessage},
    transport::PushTransport,
};

/// State-change notifications for the rendering layer.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageAppended {
        peer: UserId,
        message: StoredMessage,
    },
    MessageConfirmed {
        peer: UserId,
        temp_id: MessageId,
        message: MessagePayload,
    },
    MessageFailed {
        peer: UserId,
        message_id: MessageId,
    },
    UnreadChanged {
        peer: UserId,
        unread: u32,
    },
    HistoryLoaded {
        peer: UserId,
        count: usize,
    },
    FocusChanged {
        peer: UserId,
    },
    ConnectionOnline,
    ConnectionLost {
        reason: String,
    },
    SessionEnded,
}

/// The coordinator. Binds the push connection to the session identity,
/// consumes the inbound channel as its sole subscriber (preserving arrival
/// order), serializes every store mutation, and fans events out to the UI.
pub struct SyncEngine {
    session: Session,
    store: Arc<Mutex<ConversationStore>>,
    api: Arc<dyn ChatApi>,
    connection: ConnectionManager,
    dispatcher: MessageDispatcher,
    events: broadcast::Sender<ChatEvent>,
}

impl SyncEngine {
    /// Wires the core: one connection announced as the session identity,
    /// one inbound pump registered for the connection's lifetime.
    pub fn start(
        session: Session,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn PushTransport>,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(1024);
        let store = Arc::new(Mutex::new(ConversationStore::new()));
        let (connection, inbound_rx) =
            ConnectionManager::connect(session.user_id().clone(), transport, config);
        let dispatcher = MessageDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&api),
            Arc::new(connection.notifier()),
            events.clone(),
            session.user_id().clone(),
        );

        tokio::spawn(pump_inbound(
            Arc::clone(&store),
            events.clone(),
            session.user_id().clone(),
            inbound_rx,
        ));

        Arc::new(Self {
            session,
            store,
            api,
            connection,
            dispatcher,
            events,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The store the UI reads. Mutate only through the engine.
    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        Arc::clone(&self.store)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state()
    }

    pub fn dispatcher(&self) -> &MessageDispatcher {
        &self.dispatcher
    }

    pub async fn focused_peer(&self) -> Option<UserId> {
        self.store.lock().await.focused().cloned()
    }

    pub async fn send(&self, peer: &UserId, content: &str) -> Result<SendOutcome, ClientError> {
        self.dispatcher.send(peer, content).await
    }

    pub async fn retry(
        &self,
        peer: &UserId,
        message_id: &MessageId,
    ) -> Result<SendOutcome, ClientError> {
        self.dispatcher.retry(peer, message_id).await
    }

    /// Focuses `peer`: fetches history on first focus, appends it (append
    /// is idempotent, so overlap with already-pushed messages is safe),
    /// then resets the unread counter. The focus pointer moves first, so a
    /// message pushed while the fetch is in flight appends without
    /// incrementing and stays visible; the counter is exactly zero once
    /// this returns. Other peers' counters are untouched.
    pub async fn focus_peer(&self, peer: &UserId) -> Result<(), ClientError> {
        let needs_history = {
            let mut store = self.store.lock().await;
            store.focus(peer);
            !store.history_loaded(peer)
        };
        let _ = self.events.send(ChatEvent::FocusChanged { peer: peer.clone() });

        if needs_history {
            let history = self.api.fetch_history(peer).await?;
            let count = history.len();
            {
                let mut store = self.store.lock().await;
                for payload in history {
                    store.append(peer, StoredMessage::confirmed(payload));
                }
                store.mark_history_loaded(peer);
            }
            let _ = self.events.send(ChatEvent::HistoryLoaded {
                peer: peer.clone(),
                count,
            });
        }

        {
            let mut store = self.store.lock().await;
            store.reset_unread(peer);
        }
        let _ = self.events.send(ChatEvent::UnreadChanged {
            peer: peer.clone(),
            unread: 0,
        });
        Ok(())
    }

    /// Ends the session: disconnects the push channel and clears every
    /// conversation and the focus pointer. The credential dies with the
    /// engine.
    pub async fn teardown(&self) {
        self.connection.teardown();
        {
            let mut store = self.store.lock().await;
            store.clear();
        }
        info!(user_id = %self.session.user_id(), "session torn down");
        let _ = self.events.send(ChatEvent::SessionEnded);
    }
}

/// Sole consumer of the connection's inbound channel. Events are applied
/// in the order they arrive; nothing here reorders based on network
/// completion.
async fn pump_inbound(
    store: Arc<Mutex<ConversationStore>>,
    events: broadcast::Sender<ChatEvent>,
    self_id: UserId,
    mut inbound_rx: mpsc::Receiver<PushEvent>,
) {
    while let Some(event) = inbound_rx.recv().await {
        match event {
            PushEvent::Message(message) => {
                apply_inbound(&store, &events, &self_id, message).await;
            }
            PushEvent::Up => {
                let _ = events.send(ChatEvent::ConnectionOnline);
            }
            PushEvent::Down { reason } => {
                let _ = events.send(ChatEvent::ConnectionLost { reason });
            }
        }
    }
}

async fn apply_inbound(
    store: &Arc<Mutex<ConversationStore>>,
    events: &broadcast::Sender<ChatEvent>,
    self_id: &UserId,
    message: MessagePayload,
) {
    // An echo of our own send lands in the receiver's conversation; the
    // idempotent append absorbs the dual-path overlap.
    let from_peer = message.sender != *self_id;
    let peer = if from_peer {
        message.sender.clone()
    } else {
        message.receiver.clone()
    };
    let stored = StoredMessage::confirmed(message);

    let (applied, unread) = {
        let mut guard = store.lock().await;
        let applied = guard.append(&peer, stored.clone());
        let unread = if applied && from_peer && guard.focused() != Some(&peer) {
            Some(guard.increment_unread(&peer))
        } else {
            None
        };
        (applied, unread)
    };

    if applied {
        let _ = events.send(ChatEvent::MessageAppended {
            peer: peer.clone(),
            message: stored,
        });
    }
    if let Some(count) = unread {
        let _ = events.send(ChatEvent::UnreadChanged {
            peer,
            unread: count,
        });
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
