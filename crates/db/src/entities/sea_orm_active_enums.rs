//! Postgres enum types.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `attachment_entity_type` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attachment_entity_type")]
pub enum AttachmentEntityType {
    /// `BOARD`
    #[sea_orm(string_value = "BOARD")]
    Board,
    /// `PROJECT`
    #[sea_orm(string_value = "PROJECT")]
    Project,
    /// `COMMENT`
    #[sea_orm(string_value = "COMMENT")]
    Comment,
    /// `USER_PROFILE`
    #[sea_orm(string_value = "USER_PROFILE")]
    UserProfile,
}

/// `attachment_status` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "attachment_status")]
pub enum AttachmentStatus {
    /// `TEMP`
    #[sea_orm(string_value = "TEMP")]
    Temp,
    /// `CONFIRMED`
    #[sea_orm(string_value = "CONFIRMED")]
    Confirmed,
}
