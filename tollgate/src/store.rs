//! The configuration store

use std::{
    error, fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use arc_swap::ArcSwapOption;

use crate::{
    cache::ConfigCache,
    error::IngestionError,
    ingestion::{ConfigIngestion, FetchOutcome},
    ConfigSnapshot, Fingerprint, FingerprintRef,
};

/// The outcome of a successful remote configuration request
#[derive(Clone, Debug)]
pub enum RemoteConfig {
    /// A new configuration was downloaded and is now current
    Updated(Arc<ConfigSnapshot>),
    /// The remote configuration has not changed; the cached one is current
    NotModified(Arc<ConfigSnapshot>),
}

impl RemoteConfig {
    /// The configuration that is now current
    pub fn snapshot(&self) -> &Arc<ConfigSnapshot> {
        match self {
            Self::Updated(s) | Self::NotModified(s) => s,
        }
    }
}

/// Holds the current configuration, loading it from a local cache or a
/// remote source
///
/// The held snapshot is replaced wholesale and never mutated in place.
pub struct ConfigurationStore {
    url: String,
    cache: Box<dyn ConfigCache>,
    ingestion: Box<dyn ConfigIngestion>,
    current: ArcSwapOption<ConfigSnapshot>,
    generation: AtomicU64,
}

impl ConfigurationStore {
    /// Constructs a new store that downloads from `url`
    pub fn new(
        url: impl Into<String>,
        cache: impl ConfigCache + 'static,
        ingestion: impl ConfigIngestion + 'static,
    ) -> Self {
        Self {
            url: url.into(),
            cache: Box::new(cache),
            ingestion: Box::new(ingestion),
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
        }
    }

    /// The URL of the remote configuration document
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Loads the configuration from the local cache
    ///
    /// Never touches the network. A missing, unreadable or invalid cache
    /// yields `None`.
    pub fn load_from_cache(&self) -> Option<Arc<ConfigSnapshot>> {
        let snapshot = match self.cache.read() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                tracing::debug!("no cached configuration");
                return None;
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "unable to read cached configuration"
                );
                return None;
            }
        };

        if let Err(error) = snapshot.config().validate() {
            tracing::warn!(
                error = (&error as &dyn error::Error),
                "cached configuration is invalid, ignoring"
            );
            return None;
        }

        let snapshot = Arc::new(snapshot);
        tracing::debug!(
            fingerprint = snapshot.fingerprint().map(|f| f.as_str()),
            "loaded configuration from cache"
        );
        self.current.store(Some(Arc::clone(&snapshot)));
        Some(snapshot)
    }

    /// Requests the configuration from the remote source
    ///
    /// When `fingerprint` is still current, the configuration already held
    /// (or, failing that, the cached one) is reused. A new document is
    /// persisted to the cache before becoming current; failing to persist it
    /// is not an error. No retries are attempted.
    ///
    /// A document that arrives after [`clear`][Self::clear] was called is
    /// returned but neither persisted nor made current.
    pub async fn request_remote(
        &self,
        fingerprint: Option<&FingerprintRef>,
    ) -> Result<RemoteConfig, IngestionError> {
        let generation = self.generation.load(Ordering::SeqCst);
        match self.ingestion.fetch(&self.url, fingerprint).await? {
            FetchOutcome::Modified(snapshot) => {
                snapshot
                    .config()
                    .validate()
                    .map_err(|err| IngestionError::InvalidDocument(err.into()))?;

                let snapshot = Arc::new(snapshot);
                if self.generation.load(Ordering::SeqCst) != generation {
                    tracing::debug!("store cleared during download, not publishing configuration");
                    return Ok(RemoteConfig::Updated(snapshot));
                }

                if let Err(error) = self.cache.write(&snapshot) {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "unable to persist configuration to cache"
                    );
                }

                self.current.store(Some(Arc::clone(&snapshot)));
                if self.generation.load(Ordering::SeqCst) != generation {
                    // cleared between the check and the store
                    let _ = self.current.compare_and_swap(&Some(Arc::clone(&snapshot)), None);
                }
                Ok(RemoteConfig::Updated(snapshot))
            }
            FetchOutcome::NotModified => {
                tracing::debug!("configuration not modified");
                match self.current().or_else(|| self.load_from_cache()) {
                    Some(snapshot) => Ok(RemoteConfig::NotModified(snapshot)),
                    None => Err(IngestionError::MissingCachedDocument),
                }
            }
        }
    }

    /// The current configuration, if one has been loaded
    pub fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.current.load_full()
    }

    /// Whether a valid configuration has been loaded
    pub fn has_valid_config(&self) -> bool {
        self.current.load().is_some()
    }

    /// The fingerprint of the current configuration
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.current()
            .and_then(|s| s.fingerprint().map(ToOwned::to_owned))
    }

    /// Forgets the current configuration
    ///
    /// The cache is left untouched. Downloads still in flight will not
    /// become current.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.current.store(None);
    }
}

impl fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("url", &self.url)
            .field(
                "fingerprint",
                &self.current().map(|s| s.fingerprint().map(ToOwned::to_owned)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::InMemoryConfigCache,
        config::tests::{sample_config, sample_snapshot},
        error::CacheError,
        testing::{settle, ScriptedIngestion},
    };

    struct BrokenCache;

    impl ConfigCache for BrokenCache {
        fn read(&self) -> Result<Option<ConfigSnapshot>, CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn write(&self, _: &ConfigSnapshot) -> Result<(), CacheError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
    }

    #[test]
    fn unreadable_cache_loads_nothing() {
        let store = ConfigurationStore::new("https://example.com", BrokenCache, ScriptedIngestion::new());
        assert!(store.load_from_cache().is_none());
        assert!(!store.has_valid_config());
    }

    #[test]
    fn invalid_cached_config_is_ignored() {
        let mut config = sample_config();
        config.redirect_uri.clear();
        let cache = InMemoryConfigCache::with_snapshot(ConfigSnapshot::new(config, None));

        let store = ConfigurationStore::new("https://example.com", cache, ScriptedIngestion::new());
        assert!(store.load_from_cache().is_none());
    }

    #[test]
    fn cached_config_becomes_current() {
        let cache = InMemoryConfigCache::with_snapshot(sample_snapshot("v1"));
        let store = ConfigurationStore::new("https://example.com", cache, ScriptedIngestion::new());

        let loaded = store.load_from_cache().unwrap();
        assert_eq!(loaded.fingerprint().map(|f| f.as_str()), Some("v1"));
        assert!(store.has_valid_config());
        assert_eq!(store.fingerprint().as_ref().map(|f| f.as_str()), Some("v1"));
    }

    #[tokio::test]
    async fn new_document_is_persisted_and_current() {
        let ingestion = ScriptedIngestion::new();
        ingestion.push_modified(sample_snapshot("v2"));
        let cache = std::sync::Arc::new(InMemoryConfigCache::new());

        let store = ConfigurationStore::new("https://example.com", cache.clone(), ingestion.clone());
        let outcome = store.request_remote(None).await.unwrap();

        assert!(matches!(outcome, RemoteConfig::Updated(_)));
        assert_eq!(store.fingerprint().as_ref().map(|f| f.as_str()), Some("v2"));
        assert_eq!(cache.read().unwrap(), Some(sample_snapshot("v2")));
        assert_eq!(ingestion.fetch_count(), 1);
    }

    #[tokio::test]
    async fn cache_write_failure_is_not_fatal() {
        let ingestion = ScriptedIngestion::new();
        ingestion.push_modified(sample_snapshot("v2"));

        let store = ConfigurationStore::new("https://example.com", BrokenCache, ingestion);
        assert!(store.request_remote(None).await.is_ok());
        assert!(store.has_valid_config());
    }

    #[tokio::test]
    async fn not_modified_reuses_cached_config() {
        let ingestion = ScriptedIngestion::new();
        ingestion.push_not_modified();
        let cache = InMemoryConfigCache::with_snapshot(sample_snapshot("v1"));

        let store = ConfigurationStore::new("https://example.com", cache, ingestion.clone());
        let known = Fingerprint::from_static("v1");
        let outcome = store.request_remote(Some(&known)).await.unwrap();

        match outcome {
            RemoteConfig::NotModified(s) => assert_eq!(*s, sample_snapshot("v1")),
            RemoteConfig::Updated(_) => panic!("expected not modified"),
        }
        assert_eq!(ingestion.last_fingerprint().as_ref().map(|f| f.as_str()), Some("v1"));
    }

    #[tokio::test]
    async fn not_modified_without_cache_fails() {
        let ingestion = ScriptedIngestion::new();
        ingestion.push_not_modified();

        let store = ConfigurationStore::new("https://example.com", InMemoryConfigCache::new(), ingestion);
        let err = store.request_remote(None).await.unwrap_err();
        assert!(matches!(err, IngestionError::MissingCachedDocument));
    }

    #[tokio::test]
    async fn failed_download_keeps_current_config() {
        let ingestion = ScriptedIngestion::new();
        ingestion.push_failure("network");
        let cache = InMemoryConfigCache::with_snapshot(sample_snapshot("v1"));

        let store = ConfigurationStore::new("https://example.com", cache, ingestion);
        store.load_from_cache();
        assert!(store.request_remote(None).await.is_err());
        assert_eq!(store.fingerprint().as_ref().map(|f| f.as_str()), Some("v1"));
    }

    #[tokio::test]
    async fn download_finishing_after_clear_is_not_published() {
        let ingestion = ScriptedIngestion::new();
        ingestion.hold();
        ingestion.push_modified(sample_snapshot("v2"));
        let cache = Arc::new(InMemoryConfigCache::new());

        let store = Arc::new(ConfigurationStore::new(
            "https://example.com",
            cache.clone(),
            ingestion.clone(),
        ));
        let pending = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.request_remote(None).await.map(|_| ()) }
        });
        settle().await;

        store.clear();
        ingestion.release(1);
        pending.await.unwrap().unwrap();

        assert!(!store.has_valid_config());
        assert_eq!(cache.read().unwrap(), None);
    }
}
