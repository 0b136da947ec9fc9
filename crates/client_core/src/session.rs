use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use shared::domain::UserId;

use crate::error::ClientError;

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(rename = "firstName", default)]
    first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    last_name: Option<String>,
}

/// Identity claims for the current user, decoded once from the opaque
/// session credential. Immutable until logout; every component that needs
/// identity receives a reference instead of reading ambient state.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: UserId,
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    credential: String,
}

impl Session {
    /// Decodes the payload segment of a compact `header.payload.signature`
    /// credential. Signature verification happened at issuance; a credential
    /// that does not decode is treated the same as a missing one.
    pub fn establish(credential: &str) -> Result<Self, ClientError> {
        let payload = credential
            .split('.')
            .nth(1)
            .ok_or_else(|| ClientError::MalformedCredential("missing payload segment".into()))?;
        let raw = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|err| {
                ClientError::MalformedCredential(format!("payload is not base64url: {err}"))
            })?;
        let claims: Claims = serde_json::from_slice(&raw)
            .map_err(|err| ClientError::MalformedCredential(format!("invalid claims: {err}")))?;
        if claims.user_id.is_empty() {
            return Err(ClientError::MalformedCredential("empty userId claim".into()));
        }

        Ok(Self {
            user_id: UserId(claims.user_id),
            email: claims.email,
            first_name: claims.first_name,
            last_name: claims.last_name,
            credential: credential.to_owned(),
        })
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// The raw credential, sent as the bearer token on every REST call.
    pub fn bearer_token(&self) -> &str {
        &self.credential
    }

    /// "First Last", falling back to email, then the raw user id.
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => self
                .email
                .clone()
                .unwrap_or_else(|| self.user_id.0.clone()),
        }
    }

    /// Uppercase avatar initials: first+last initial, else first initial,
    /// else the first character of the email.
    pub fn initials(&self) -> String {
        initials(
            self.first_name.as_deref(),
            self.last_name.as_deref(),
            self.email.as_deref(),
        )
    }
}

pub(crate) fn initials(
    first_name: Option<&str>,
    last_name: Option<&str>,
    email: Option<&str>,
) -> String {
    let first = first_name.and_then(|name| name.chars().next());
    let last = last_name.and_then(|name| name.chars().next());
    match (first, last) {
        (Some(f), Some(l)) => format!("{f}{l}").to_uppercase(),
        (Some(f), None) => f.to_uppercase().to_string(),
        (None, _) => email
            .and_then(|addr| addr.chars().next())
            .map_or_else(|| "?".to_owned(), |c| c.to_uppercase().to_string()),
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
