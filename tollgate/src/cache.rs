//! Local persistence of configuration documents

use std::sync::Mutex;

use crate::{error::CacheError, ConfigSnapshot};

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "file")]
pub use file::FileConfigCache;

/// A synchronous, local store for the most recently downloaded configuration
pub trait ConfigCache: Send + Sync {
    /// Reads the cached configuration
    ///
    /// Returns `Ok(None)` if nothing has been cached yet.
    fn read(&self) -> Result<Option<ConfigSnapshot>, CacheError>;

    /// Replaces the cached configuration
    fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), CacheError>;
}

impl<T: ConfigCache + ?Sized> ConfigCache for std::sync::Arc<T> {
    fn read(&self) -> Result<Option<ConfigSnapshot>, CacheError> {
        (**self).read()
    }

    fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), CacheError> {
        (**self).write(snapshot)
    }
}

/// An in-memory configuration cache
///
/// Nothing survives a restart, so a cold start always requires a download.
#[derive(Debug, Default)]
pub struct InMemoryConfigCache {
    snapshot: Mutex<Option<ConfigSnapshot>>,
}

impl InMemoryConfigCache {
    /// Constructs a new, empty cache
    pub const fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
        }
    }

    /// Constructs a cache already holding `snapshot`
    pub fn with_snapshot(snapshot: ConfigSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }
}

impl ConfigCache for InMemoryConfigCache {
    fn read(&self) -> Result<Option<ConfigSnapshot>, CacheError> {
        let guard = self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn write(&self, snapshot: &ConfigSnapshot) -> Result<(), CacheError> {
        let mut guard = self
            .snapshot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(snapshot.clone());
        Ok(())
    }
}
