use thiserror::Error;

/// Client-side failure taxonomy. None of these terminate the process; every
/// variant is either recovered internally or surfaced as UI state.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// No usable credential; the caller must redirect to re-authentication.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The credential payload did not decode. Treated the same as
    /// [`ClientError::AuthRequired`] by callers.
    #[error("malformed credential: {0}")]
    MalformedCredential(String),

    /// Search, history fetch or another request/response call failed.
    /// Retryable by user action.
    #[error("transient network failure: {0}")]
    TransientNetwork(String),

    /// The durable persist of an outgoing message failed. The optimistic
    /// message stays visible in a retryable failed state.
    #[error("message persist failed: {0}")]
    PersistFailure(String),

    /// The push channel dropped or refused a frame. Reconnection is
    /// automatic; no user action required.
    #[error("push connection lost: {0}")]
    ConnectionLost(String),
}
