use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use shared::{
    domain::UserId,
    protocol::{
        LoginRequest, LoginResponse, MessagePayload, PeerSummary, SendMessageRequest,
        SignupRequest,
    },
};

use crate::error::ClientError;

/// Credential issuance endpoints; used before a session exists.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<String, ClientError>;
    async fn signup(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError>;
}

/// Peer-directory lookups.
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    async fn search_users(&self, query: &str) -> Result<Vec<PeerSummary>, ClientError>;
}

/// Durable message persistence and on-demand history.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET /api/chats/:peerId`, ascending timestamp.
    async fn fetch_history(&self, peer: &UserId) -> Result<Vec<MessagePayload>, ClientError>;
    /// `POST /api/chats`; the response carries the server-assigned id and
    /// timestamp.
    async fn persist_message(
        &self,
        receiver: &UserId,
        content: &str,
    ) -> Result<MessagePayload, ClientError>;
}

/// REST client for the chat backend.
pub struct RestApi {
    http: Client,
    server_url: String,
    credential: Option<String>,
}

impl RestApi {
    /// Unauthenticated client, enough for login/signup.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            credential: None,
        }
    }

    /// Client carrying the session credential as a bearer token.
    pub fn with_credential(server_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            credential: Some(credential.into()),
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.get(format!("{}{path}", self.server_url)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.post(format!("{}{path}", self.server_url)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credential {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn transport_error(err: reqwest::Error) -> ClientError {
    ClientError::TransientNetwork(err.to_string())
}

/// Maps a non-2xx response into the client taxonomy, surfacing the
/// backend's error message when the body carries one.
async fn map_failure(operation: &str, response: Response) -> ClientError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.message)
        .unwrap_or_else(|_| status.to_string());
    if status == StatusCode::UNAUTHORIZED {
        ClientError::AuthRequired(message)
    } else {
        ClientError::TransientNetwork(format!("{operation} failed: {message}"))
    }
}

#[async_trait]
impl AuthApi for RestApi {
    async fn login(&self, email: &str, password: &str) -> Result<String, ClientError> {
        let response = self
            .post("/api/auth/login")
            .json(&LoginRequest {
                email: email.to_owned(),
                password: password.to_owned(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(map_failure("login", response).await);
        }
        let body: LoginResponse = response.json().await.map_err(transport_error)?;
        Ok(body.token)
    }

    async fn signup(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ClientError> {
        let response = self
            .post("/api/auth/signup")
            .json(&SignupRequest {
                first_name: first_name.to_owned(),
                last_name: last_name.to_owned(),
                email: email.to_owned(),
                password: password.to_owned(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(map_failure("signup", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryApi for RestApi {
    async fn search_users(&self, query: &str) -> Result<Vec<PeerSummary>, ClientError> {
        let response = self
            .get("/api/users")
            .query(&[("search", query)])
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(map_failure("user search", response).await);
        }
        response.json().await.map_err(transport_error)
    }
}

#[async_trait]
impl ChatApi for RestApi {
    async fn fetch_history(&self, peer: &UserId) -> Result<Vec<MessagePayload>, ClientError> {
        let response = self
            .get(&format!("/api/chats/{peer}"))
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(map_failure("history fetch", response).await);
        }
        response.json().await.map_err(transport_error)
    }

    async fn persist_message(
        &self,
        receiver: &UserId,
        content: &str,
    ) -> Result<MessagePayload, ClientError> {
        let response = self
            .post("/api/chats")
            .json(&SendMessageRequest {
                receiver: receiver.clone(),
                content: content.to_owned(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(map_failure("message persist", response).await);
        }
        response.json().await.map_err(transport_error)
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
