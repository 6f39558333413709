//! Attachment types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_shared::types::{AttachmentId, EntityId, UserId};

/// Kind of entity an attachment is owned by.
///
/// Together with an [`EntityId`] this forms a polymorphic reference: the tag
/// decides which owner table the id points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// Board post.
    Board,
    /// Project.
    Project,
    /// Comment on a board or project.
    Comment,
    /// User profile image.
    UserProfile,
}

impl EntityType {
    /// Convert to database string value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Board => "BOARD",
            Self::Project => "PROJECT",
            Self::Comment => "COMMENT",
            Self::UserProfile => "USER_PROFILE",
        }
    }

    /// Parse from database string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BOARD" => Some(Self::Board),
            "PROJECT" => Some(Self::Project),
            "COMMENT" => Some(Self::Comment),
            "USER_PROFILE" => Some(Self::UserProfile),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attachment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentStatus {
    /// Uploaded, unowned, and subject to expiry.
    Temp,
    /// Bound to an owning entity; never expires.
    Confirmed,
}

impl AttachmentStatus {
    /// Convert to database string value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temp => "TEMP",
            Self::Confirmed => "CONFIRMED",
        }
    }

    /// Parse from database string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEMP" => Some(Self::Temp),
            "CONFIRMED" => Some(Self::Confirmed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for registering a freshly uploaded file.
#[derive(Debug, Clone)]
pub struct RegisterTempInput {
    /// Kind of owner the upload is meant for.
    pub entity_type: EntityType,
    /// Original filename.
    pub file_name: String,
    /// Addressable location in blob storage.
    pub file_url: String,
    /// File size in bytes.
    pub file_size: i64,
    /// MIME type.
    pub content_type: String,
    /// Uploading principal.
    pub uploaded_by: UserId,
}

/// Attachment domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Unique identifier.
    pub id: AttachmentId,
    /// Kind of owner.
    pub entity_type: EntityType,
    /// Owner id, set exactly when confirmed.
    pub entity_id: Option<EntityId>,
    /// Original filename.
    pub file_name: String,
    /// MIME type.
    pub content_type: String,
    /// File size in bytes.
    pub file_size: i64,
    /// Addressable location in blob storage.
    pub file_url: String,
    /// Uploading principal.
    pub uploaded_by: UserId,
    /// Lifecycle state.
    pub status: AttachmentStatus,
    /// Expiry of a TEMP upload; cleared on confirmation.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Attachment {
    /// Build a new TEMP attachment that expires at `expires_at`.
    #[must_use]
    pub fn new_temp(input: RegisterTempInput, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: AttachmentId::new(),
            entity_type: input.entity_type,
            entity_id: None,
            file_name: input.file_name,
            content_type: input.content_type,
            file_size: input.file_size,
            file_url: input.file_url,
            uploaded_by: input.uploaded_by,
            status: AttachmentStatus::Temp,
            expires_at: Some(expires_at),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Whether the attachment is still an unowned upload.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.status == AttachmentStatus::Temp
    }

    /// Whether the row has been soft-deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether a TEMP upload is past its expiry at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_temp() && self.expires_at.is_some_and(|at| at < now)
    }

    /// Whether the status agrees with the owner binding and expiry.
    ///
    /// CONFIRMED rows carry an owner and no expiry; TEMP rows carry an expiry
    /// and no owner.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            AttachmentStatus::Confirmed => self.entity_id.is_some() && self.expires_at.is_none(),
            AttachmentStatus::Temp => self.entity_id.is_none() && self.expires_at.is_some(),
        }
    }
}
