//! `SeaORM` entity definitions.

pub mod attachments;
pub mod sea_orm_active_enums;
