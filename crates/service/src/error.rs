//! Engine error taxonomy

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed caller input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Distribution requested before the community ended
    #[error("Community {community_id} has not ended (status: {status})")]
    NotEnded { community_id: String, status: String },

    /// Compare-and-set kept losing after the retry budget
    #[error("Conflict on {resource} after {attempts} attempts")]
    Conflict { resource: String, attempts: u32 },

    /// Stored state contradicts itself and could not be repaired
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Ledger store failure; nothing is assumed committed
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store access timed out")]
    Timeout,
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(resource: impl Into<String>, attempts: u32) -> Self {
        Self::Conflict {
            resource: resource.into(),
            attempts,
        }
    }

    /// Conflicts and timeouts may succeed on a later call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Timeout)
    }
}

impl From<libmdbx::Error> for EngineError {
    fn from(err: libmdbx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
