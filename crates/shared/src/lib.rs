//! Shared types, errors, and configuration for Tether.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for attachments, owning entities, and uploaders
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::AppError;
