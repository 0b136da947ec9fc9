use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::protocol::{ClientFrame, ServerFrame};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::warn;

use crate::error::ClientError;

/// Write half of one live push connection.
#[async_trait]
pub trait PushSink: Send {
    async fn send_frame(&mut self, frame: ClientFrame) -> Result<(), ClientError>;
}

/// Read half of one live push connection. `None` means the transport
/// closed; malformed payloads are dropped inside the implementation and
/// never surface here.
#[async_trait]
pub trait PushStream: Send {
    async fn next_frame(&mut self) -> Option<ServerFrame>;
}

/// Factory for push connections. The reconnect loop calls `connect` once
/// per attempt; dropping the halves releases the underlying resource.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn PushSink>, Box<dyn PushStream>), ClientError>;
}

/// WebSocket transport speaking JSON text frames against the backend's
/// push endpoint.
pub struct WebSocketTransport {
    ws_url: String,
}

impl WebSocketTransport {
    /// Accepts the REST base URL and rewrites the scheme for the socket
    /// endpoint.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            ws_url: rewrite_ws_url(server_url)?,
        })
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(Box<dyn PushSink>, Box<dyn PushStream>), ClientError> {
        let (stream, _) = connect_async(&self.ws_url).await.map_err(|err| {
            ClientError::ConnectionLost(format!("failed to connect {}: {err}", self.ws_url))
        })?;
        let (writer, reader) = stream.split();
        Ok((
            Box::new(WebSocketSink { inner: writer }),
            Box::new(WebSocketReader { inner: reader }),
        ))
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WebSocketSink {
    inner: futures::stream::SplitSink<WsStream, WsMessage>,
}

struct WebSocketReader {
    inner: futures::stream::SplitStream<WsStream>,
}

#[async_trait]
impl PushSink for WebSocketSink {
    async fn send_frame(&mut self, frame: ClientFrame) -> Result<(), ClientError> {
        let text = serde_json::to_string(&frame)
            .map_err(|err| ClientError::ConnectionLost(format!("failed to encode frame: {err}")))?;
        self.inner
            .send(WsMessage::Text(text))
            .await
            .map_err(|err| ClientError::ConnectionLost(format!("websocket send failed: {err}")))
    }
}

#[async_trait]
impl PushStream for WebSocketReader {
    async fn next_frame(&mut self) -> Option<ServerFrame> {
        while let Some(message) = self.inner.next().await {
            match message {
                Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                    Ok(frame) => return Some(frame),
                    // Payloads that match no known variant are dropped,
                    // never propagated as a crash.
                    Err(err) => warn!(error = %err, "dropping malformed push frame"),
                },
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "websocket receive failed");
                    return None;
                }
            }
        }
        None
    }
}

fn rewrite_ws_url(server_url: &str) -> Result<String, ClientError> {
    let rewritten = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(ClientError::ConnectionLost(format!(
            "server url must start with http:// or https://: {server_url}"
        )));
    };
    let ws_url = format!("{}/ws", rewritten.trim_end_matches('/'));
    url::Url::parse(&ws_url)
        .map_err(|err| ClientError::ConnectionLost(format!("invalid push url {ws_url}: {err}")))?;
    Ok(ws_url)
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
