use crate::domain::BlacklistReason;
use thiserror::Error;

/// Main error type for the screenshot broker
#[derive(Error, Debug)]
pub enum BrokerError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Backing store unreachable or refused the operation
    #[error("Store unavailable: {0}")]
    Store(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Token errors
    #[error("Authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Signature error: {0}")]
    Signature(String),

    // Race resolution
    #[error("Request {request_id} for catalog {catalog_id} was already fulfilled by another peer")]
    RequestAlreadyFulfilled {
        catalog_id: String,
        request_id: String,
    },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl BrokerError {
    /// Storage-layer failures the bus should redeliver
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::Database(_) | BrokerError::Store(_) | BrokerError::Io(_)
        )
    }
}

/// Result type alias for BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Reasons an upload token does not authorize a redemption
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token could not be parsed")]
    Unparseable,

    #[error("token has expired")]
    Expired,

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has been revoked ({0})")]
    Blacklisted(BlacklistReason),
}

impl AuthError {
    /// The revocation reason, when the token was blacklisted
    pub fn blacklist_reason(&self) -> Option<BlacklistReason> {
        match self {
            AuthError::Blacklisted(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Failures of the peer directory, edge relay, object store and publisher.
///
/// These are soft failures: callers log them and carry on.
#[derive(Error, Debug, Clone)]
pub enum CollaboratorError {
    #[error("{service} unreachable: {reason}")]
    Unreachable {
        service: &'static str,
        reason: String,
    },

    #[error("{service} timed out after {timeout_ms}ms")]
    Timeout {
        service: &'static str,
        timeout_ms: u64,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    UnexpectedStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} response could not be decoded: {reason}")]
    Decode {
        service: &'static str,
        reason: String,
    },

    #[error("{service} rejected the call: {reason}")]
    Rejected {
        service: &'static str,
        reason: String,
    },
}

impl CollaboratorError {
    /// Map a reqwest failure onto the collaborator taxonomy
    pub fn from_reqwest(service: &'static str, timeout_ms: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout {
                service,
                timeout_ms,
            }
        } else if err.is_decode() {
            CollaboratorError::Decode {
                service,
                reason: err.to_string(),
            }
        } else {
            CollaboratorError::Unreachable {
                service,
                reason: err.to_string(),
            }
        }
    }

    pub fn service(&self) -> &'static str {
        match self {
            CollaboratorError::Unreachable { service, .. }
            | CollaboratorError::Timeout { service, .. }
            | CollaboratorError::UnexpectedStatus { service, .. }
            | CollaboratorError::Decode { service, .. }
            | CollaboratorError::Rejected { service, .. } => service,
        }
    }
}
