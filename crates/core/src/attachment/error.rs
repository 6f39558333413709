//! Attachment error types.

use tether_shared::AppError;
use tether_shared::types::AttachmentId;
use thiserror::Error;

use super::types::{AttachmentStatus, EntityType};

/// Raw persistence failures surfaced by an [`AttachmentStore`](super::AttachmentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// An attachment with this id already exists.
    #[error("attachment already exists: {0}")]
    Conflict(AttachmentId),

    /// The database could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Create a database error.
    #[must_use]
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }
}

/// Attachment operation errors.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// One or more referenced attachments do not exist or were deleted.
    #[error("attachments not found: {}", join_ids(.0))]
    NotFound(Vec<AttachmentId>),

    /// The attachment exists but is not eligible for the requested transition.
    #[error("invalid attachment state: {0}")]
    Validation(String),

    /// An attachment with the same id already exists.
    #[error("attachment already exists: {0}")]
    Conflict(AttachmentId),

    /// Storage or blob I/O failed transiently, including timeouts.
    #[error("attachment store unavailable: {0}")]
    Unavailable(String),

    /// Unexpected storage failure.
    #[error("internal attachment error: {0}")]
    Internal(String),
}

impl AttachmentError {
    /// Create a not found error for a single id.
    #[must_use]
    pub fn not_found(id: AttachmentId) -> Self {
        Self::NotFound(vec![id])
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// The attachment is not in the state the transition requires.
    #[must_use]
    pub fn wrong_status(id: AttachmentId, status: AttachmentStatus) -> Self {
        Self::Validation(format!("attachment {id} is {status}, expected TEMP"))
    }

    /// The attachment was uploaded for a different kind of owner.
    #[must_use]
    pub fn wrong_entity_type(id: AttachmentId, actual: EntityType, expected: EntityType) -> Self {
        Self::Validation(format!(
            "attachment {id} belongs to {actual}, cannot bind to {expected}"
        ))
    }

    /// A batch confirmation matched fewer rows than requested.
    #[must_use]
    pub fn short_confirmation(requested: usize, matched: u64) -> Self {
        Self::Validation(format!(
            "only {matched} of {requested} attachments were eligible for confirmation"
        ))
    }

    /// Create an unavailable error.
    #[must_use]
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

impl From<StoreError> for AttachmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(id) => Self::Conflict(id),
            StoreError::Unavailable(msg) => Self::Unavailable(msg),
            StoreError::Database(msg) => Self::Internal(msg),
        }
    }
}

impl From<AttachmentError> for AppError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::NotFound(_) => Self::NotFound(err.to_string()),
            AttachmentError::Validation(msg) => Self::Validation(msg),
            AttachmentError::Conflict(_) => Self::Conflict(err.to_string()),
            AttachmentError::Unavailable(msg) => Self::Unavailable(msg),
            AttachmentError::Internal(msg) => Self::Internal(msg),
        }
    }
}

fn join_ids(ids: &[AttachmentId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
