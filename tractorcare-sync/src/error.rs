//! Sync error types.

use chrono::Utc;
use thiserror::Error;
use tractorcare_storage::StorageError;
use tractorcare_types::{DeliveryFailure, FailureClass, MutationId};

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type for remote gateway calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors surfaced to callers of the engine.
///
/// Transient delivery failures never appear here; they stay in the queue.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] StorageError),

    #[error("corrupt data under key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("authentication required: session is no longer valid")]
    AuthRequired,

    #[error("unknown tractor: {0}")]
    UnknownTractor(String),

    #[error("unknown maintenance task: {0}")]
    UnknownTask(String),

    #[error("no pending mutation at index {index} (queue has {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no pending mutation with id {0}")]
    UnknownMutation(MutationId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("remote request failed: {0}")]
    Gateway(#[from] GatewayError),
}

/// Classified failure of a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("credentials rejected")]
    Unauthorized,

    /// The server answered 2xx, so the change was applied, but the body
    /// could not be read.
    #[error("server returned {status} with an unreadable body: {message}")]
    Undecodable { status: u16, message: String },
}

impl GatewayError {
    /// How the synchronizer should treat this failure.
    ///
    /// 408 and 429 are retryable; other 4xx are rejections that stay queued
    /// but are surfaced to the user. An unreadable 2xx body is never
    /// retryable; deliveries check [`GatewayError::was_applied`] first.
    pub fn classify(&self) -> FailureClass {
        match self {
            GatewayError::Undecodable { .. } => FailureClass::Rejected,
            GatewayError::Network(_) | GatewayError::Timeout => FailureClass::Transient,
            GatewayError::Unauthorized => FailureClass::Auth,
            GatewayError::Server { status, .. } => match *status {
                401 | 403 => FailureClass::Auth,
                408 | 429 => FailureClass::Transient,
                400..=499 => FailureClass::Rejected,
                _ => FailureClass::Transient,
            },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Server { status, .. } | GatewayError::Undecodable { status, .. } => {
                Some(*status)
            }
            GatewayError::Unauthorized => Some(401),
            _ => None,
        }
    }

    /// True when the server accepted the request. The mutation must not be
    /// sent again even though no entity came back.
    pub fn was_applied(&self) -> bool {
        matches!(self, GatewayError::Undecodable { .. })
    }

    /// Converts into the bookkeeping record stored on the mutation.
    pub fn to_failure(&self) -> DeliveryFailure {
        DeliveryFailure {
            class: self.classify(),
            message: self.to_string(),
            status: self.status(),
            at: Utc::now(),
        }
    }
}
