//! Blob gateway seam used by the attachment lifecycle.

use std::future::Future;

use super::error::StorageError;
use super::key::{DEFAULT_KEY_MARKERS, derive_blob_key};

/// Deletes stored objects on behalf of the attachment lifecycle.
///
/// Implemented by [`StorageService`](super::StorageService) for real providers
/// and by in-memory doubles in tests.
pub trait BlobGateway: Send + Sync + 'static {
    /// Delete the object stored under `key`.
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Recover the object key from a stored attachment URL.
    ///
    /// `None` means the URL could not be parsed; callers skip the blob and
    /// still remove the record.
    fn key_for_url(&self, url: &str) -> Option<String> {
        derive_blob_key(url, DEFAULT_KEY_MARKERS)
    }
}
