//! Repository implementations for database access.

pub mod attachment;

pub use attachment::AttachmentRepository;
