use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::UserId,
    protocol::{ClientFrame, MessagePayload, ServerFrame},
};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{error::ClientError, transport::PushTransport};

/// Lifecycle of the single push connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Announced,
    Receiving,
    Reconnecting,
}

/// What `notify` does while the connection is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyPolicy {
    /// Buffer outbound frames until the connection resumes.
    Queue,
    /// Reject outbound frames immediately with `ConnectionLost`.
    FailFast,
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    pub notify_policy: NotifyPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_initial: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(15),
            notify_policy: NotifyPolicy::Queue,
        }
    }
}

/// Events delivered to the connection's single subscriber, in arrival order.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Message(MessagePayload),
    /// Connection (re)established and identity announced.
    Up,
    /// Transport dropped or failed to establish. Non-fatal; reconnection is
    /// already scheduled.
    Down { reason: String },
}

/// Outbound access to the push channel. The connection handle itself is
/// exclusively owned by the driver task; everything else goes through here.
#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, frame: ClientFrame) -> Result<(), ClientError>;
}

/// Cheap cloneable handle for pushing outbound frames, honoring the
/// configured notify policy.
#[derive(Clone)]
pub struct Notifier {
    outbound_tx: mpsc::Sender<ClientFrame>,
    state_rx: watch::Receiver<ConnectionState>,
    policy: NotifyPolicy,
}

#[async_trait]
impl Notify for Notifier {
    async fn notify(&self, frame: ClientFrame) -> Result<(), ClientError> {
        if self.policy == NotifyPolicy::FailFast {
            let state = *self.state_rx.borrow();
            if !matches!(
                state,
                ConnectionState::Announced | ConnectionState::Receiving
            ) {
                return Err(ClientError::ConnectionLost(format!(
                    "push channel unavailable ({state:?})"
                )));
            }
        }
        self.outbound_tx
            .send(frame)
            .await
            .map_err(|_| ClientError::ConnectionLost("push channel closed".into()))
    }
}

/// Owns exactly one live push connection, bound to the session identity it
/// was connected with. Announces `setup` once per connection, forwards
/// inbound frames to the subscriber channel, and reconnects with backoff on
/// transport loss; the subscriber never re-registers.
pub struct ConnectionManager {
    notifier: Notifier,
    state_tx: watch::Sender<ConnectionState>,
    driver: JoinHandle<()>,
}

impl ConnectionManager {
    /// Binds the connection to `user_id` and returns the manager plus the
    /// inbound event channel. The receiver stays valid across reconnects.
    pub fn connect(
        user_id: UserId,
        transport: Arc<dyn PushTransport>,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<PushEvent>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let notifier = Notifier {
            outbound_tx,
            state_rx,
            policy: config.notify_policy,
        };
        let driver = tokio::spawn(drive(
            user_id,
            transport,
            config,
            inbound_tx,
            outbound_rx,
            state_tx.clone(),
        ));
        (
            Self {
                notifier,
                state_tx,
                driver,
            },
            inbound_rx,
        )
    }

    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Forces `Disconnected`. Aborting the driver drops the connection
    /// halves, releasing the transport resource on every exit path.
    pub fn teardown(&self) {
        self.driver.abort();
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive(
    user_id: UserId,
    transport: Arc<dyn PushTransport>,
    config: ConnectionConfig,
    inbound_tx: mpsc::Sender<PushEvent>,
    mut outbound_rx: mpsc::Receiver<ClientFrame>,
    state_tx: watch::Sender<ConnectionState>,
) {
    let mut backoff = config.reconnect_initial;
    let mut first_attempt = true;
    loop {
        let _ = state_tx.send(if first_attempt {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let down_reason = match transport.connect().await {
            Ok((mut writer, mut reader)) => {
                match writer
                    .send_frame(ClientFrame::Setup {
                        user_id: user_id.clone(),
                    })
                    .await
                {
                    Ok(()) => {
                        let _ = state_tx.send(ConnectionState::Announced);
                        info!(user_id = %user_id, "push connection announced");
                        backoff = config.reconnect_initial;
                        if inbound_tx.send(PushEvent::Up).await.is_err() {
                            return;
                        }
                        let _ = state_tx.send(ConnectionState::Receiving);

                        let reason = loop {
                            tokio::select! {
                                frame = reader.next_frame() => match frame {
                                    Some(ServerFrame::ReceiveMessage(message)) => {
                                        if inbound_tx.send(PushEvent::Message(message)).await.is_err() {
                                            return;
                                        }
                                    }
                                    Some(ServerFrame::Error(err)) => {
                                        warn!(code = ?err.code, message = %err.message, "push channel reported error");
                                    }
                                    None => break "push connection closed".to_owned(),
                                },
                                outbound = outbound_rx.recv() => match outbound {
                                    Some(frame) => {
                                        if let Err(err) = writer.send_frame(frame).await {
                                            break format!("outbound notify failed: {err}");
                                        }
                                    }
                                    // Manager gone; stop driving.
                                    None => return,
                                },
                            }
                        };
                        reason
                    }
                    Err(err) => format!("identity announce failed: {err}"),
                }
            }
            Err(err) => err.to_string(),
        };

        warn!(reason = %down_reason, "push connection down, will retry");
        if inbound_tx
            .send(PushEvent::Down {
                reason: down_reason,
            })
            .await
            .is_err()
        {
            return;
        }

        first_attempt = false;
        let _ = state_tx.send(ConnectionState::Reconnecting);
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(config.reconnect_max);
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
