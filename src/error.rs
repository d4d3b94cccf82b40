//! Error types for inbox-probe.

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Configuration-related errors. Always fatal, raised before any polling
/// begins, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required file: {path}. {hint}")]
    MissingFile { path: String, hint: String },

    #[error("Malformed {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// OAuth token lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Token refresh rejected: {reason}")]
    RefreshRejected { reason: String },

    #[error("Authorization code exchange failed: {reason}")]
    ExchangeFailed { reason: String },

    #[error("Token endpoint unreachable: {0}")]
    Endpoint(String),

    #[error("Failed to persist token to {path}: {reason}")]
    PersistFailed { path: String, reason: String },

    #[error("Credentials file has no redirect URI")]
    MissingRedirectUri,
}

/// Mail provider errors, split by whether the retrieval may continue.
///
/// `Auth` aborts the retrieval immediately; `Transient` counts as "this
/// attempt found nothing" and the polling loop moves on within its budget.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox authentication failed: {reason}")]
    Auth { reason: String },

    #[error("Transient mailbox failure: {0}")]
    Transient(String),
}

impl MailboxError {
    /// True when the retrieval must abort rather than retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<AuthError> for MailboxError {
    fn from(e: AuthError) -> Self {
        MailboxError::Auth {
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for MailboxError {
    fn from(e: reqwest::Error) -> Self {
        MailboxError::Transient(e.to_string())
    }
}

/// Per-message decode failures. Fatal for the affected candidate only; the
/// polling loop skips it and continues.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Message {id} has no payload")]
    NoPayload { id: String },

    #[error("Message {id} contains no text or html body")]
    EmptyBody { id: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
