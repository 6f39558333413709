//! Blob storage for attachment objects using Apache OpenDAL.
//!
//! This module provides vendor-agnostic object storage with support for:
//! - S3-compatible: Cloudflare R2, Supabase Storage, AWS S3, MinIO
//! - Azure Blob Storage
//! - Local filesystem (development only)
//!
//! The lifecycle only ever deletes blobs, and it only knows an attachment by
//! the URL it was stored with, so the gateway also owns URL-to-key recovery.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ stored file_url ──key_for_url──▶ object key ──delete──▶ OpenDAL │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod error;
mod gateway;
mod key;
mod service;

pub use config::{StorageConfig, StorageProvider};
pub use error::StorageError;
pub use gateway::BlobGateway;
pub use key::{DEFAULT_KEY_MARKERS, derive_blob_key};
pub use service::StorageService;
