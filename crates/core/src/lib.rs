//! Core business logic for Tether.
//!
//! This crate contains the attachment lifecycle with ZERO web or database
//! dependencies. Persistence and blob storage are reached through traits
//! implemented elsewhere.
//!
//! # Modules
//!
//! - `attachment` - TEMP/CONFIRMED state machine, confirmation saga, expiry sweep
//! - `storage` - Blob gateway over Apache OpenDAL and object key derivation

pub mod attachment;
pub mod storage;
