//! Storage configuration types.

use tether_shared::config::StorageSettings;

pub use tether_shared::config::StorageProvider;

use super::key::DEFAULT_KEY_MARKERS;

/// Storage service configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Storage provider configuration.
    pub provider: StorageProvider,
    /// Host-boundary markers tried, in order, when recovering a key from a URL.
    pub key_markers: Vec<String>,
}

impl StorageConfig {
    /// Create a new storage config with default settings.
    #[must_use]
    pub fn new(provider: StorageProvider) -> Self {
        Self {
            provider,
            key_markers: DEFAULT_KEY_MARKERS.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// Build from the `[storage]` section of the application config.
    #[must_use]
    pub fn from_settings(settings: &StorageSettings) -> Self {
        Self::new(settings.provider.clone()).with_key_markers(settings.key_markers.clone())
    }

    /// Set the key markers.
    #[must_use]
    pub fn with_key_markers(mut self, markers: Vec<String>) -> Self {
        self.key_markers = markers;
        self
    }
}
