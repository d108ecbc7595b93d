//! Cache configuration.
//!
//! Controls where the session cache lives and how lookups react to failed
//! refreshes, via the `[cache]` table of `pitlane.toml`.

use std::path::PathBuf;

use serde::Deserialize;

const DEFAULT_CACHE_DIRECTORY: &str = ".pitlane/session";

/// What a lookup reports when a refresh fails while it already holds a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefetchFailurePolicy {
    /// Report `Error` and keep showing the previous value.
    #[default]
    Demote,
    /// Stay `Success` with the previous value; `Error` only if nothing was known.
    KeepStale,
}

/// Backing store for the session cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Cache configuration from `pitlane.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Backing store for namespaces.
    pub store: StoreKind,
    /// Session directory used by the file store.
    pub directory: PathBuf,
    /// Optional byte quota for the memory store.
    pub quota_bytes: Option<usize>,
    /// Overrides every entity's own refetch failure policy when set.
    pub refetch_failure: Option<RefetchFailurePolicy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::Memory,
            directory: PathBuf::from(DEFAULT_CACHE_DIRECTORY),
            quota_bytes: None,
            refetch_failure: None,
        }
    }
}

impl CacheConfig {
    /// Policy for an entity whose own default is `entity_default`.
    pub fn refetch_policy(&self, entity_default: RefetchFailurePolicy) -> RefetchFailurePolicy {
        self.refetch_failure.unwrap_or(entity_default)
    }

    pub fn is_persistent(&self) -> bool {
        self.store == StoreKind::File
    }
}
