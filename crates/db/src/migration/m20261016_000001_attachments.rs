//! Attachments migration.
//!
//! Creates the attachments table with its enum types. The binding check
//! keeps status, owner, and expiry in agreement at the row level.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(ATTACHMENTS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            r"
DROP TABLE IF EXISTS attachments CASCADE;
DROP TYPE IF EXISTS attachment_status;
DROP TYPE IF EXISTS attachment_entity_type;
",
        )
        .await?;
        Ok(())
    }
}

const ATTACHMENTS_SQL: &str = r"
CREATE TYPE attachment_entity_type AS ENUM ('BOARD', 'PROJECT', 'COMMENT', 'USER_PROFILE');
CREATE TYPE attachment_status AS ENUM ('TEMP', 'CONFIRMED');

CREATE TABLE attachments (
    id UUID PRIMARY KEY,
    entity_type attachment_entity_type NOT NULL,
    entity_id UUID,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    file_size BIGINT NOT NULL,
    file_url TEXT NOT NULL,
    uploaded_by UUID NOT NULL,
    status attachment_status NOT NULL DEFAULT 'TEMP',
    expires_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    deleted_at TIMESTAMPTZ,
    CONSTRAINT chk_attachments_file_size CHECK (file_size >= 0),
    CONSTRAINT chk_attachments_binding CHECK (
        (status = 'TEMP' AND entity_id IS NULL AND expires_at IS NOT NULL)
        OR (status = 'CONFIRMED' AND entity_id IS NOT NULL AND expires_at IS NULL)
    )
);

-- Index for the expiry sweep
CREATE INDEX idx_attachments_status_expires ON attachments(status, expires_at)
    WHERE deleted_at IS NULL;

-- Index for owner lookup
CREATE INDEX idx_attachments_entity ON attachments(entity_type, entity_id)
    WHERE deleted_at IS NULL;
";
