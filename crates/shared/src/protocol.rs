use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{MessageId, UserId},
    error::ApiError,
};

/// A persisted chat message, exactly as the backend serializes it.
///
/// The `_id` and `timestamp` fields are server-assigned at persist time;
/// `_id` is the durable id that append idempotence keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub message_id: MessageId,
    pub sender: UserId,
    pub receiver: UserId,
    pub content: String,
    #[serde(rename = "timestamp")]
    pub sent_at: DateTime<Utc>,
}

/// A directory entry returned by the user search endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    #[serde(rename = "_id")]
    pub user_id: UserId,
    pub email: String,
    #[serde(rename = "firstName", default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Frames the client writes to the push channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ClientFrame {
    /// Announces the routing identity, once per connection.
    Setup {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    /// Best-effort live notify after a durable persist.
    SendMessage {
        sender: UserId,
        receiver: UserId,
        content: String,
    },
}

/// Frames the push channel delivers to the announced identity's connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ServerFrame {
    ReceiveMessage(MessagePayload),
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub receiver: UserId,
    pub content: String,
}
