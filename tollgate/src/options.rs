//! Session configuration

use std::time::Duration;

use crate::connectivity::Reachability;

/// The base URL of the hosted configuration service
pub const DEFAULT_CONFIG_BASE_URL: &str = "https://config.appcenter.ms";

/// How an explicit refresh behaves while the network is unreachable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OfflineRefreshPolicy {
    /// Park the request and refresh once the network returns
    #[default]
    Defer,
    /// Resolve the request immediately with [`AuthError::NoNetwork`][crate::AuthError::NoNetwork]
    ///
    /// The account is still marked so that a refresh happens on reconnect.
    FailFast,
}

/// Options controlling a [`SessionCoordinator`][crate::SessionCoordinator]
#[derive(Clone, Debug)]
pub struct SessionOptions {
    config_url: String,
    offline_refresh: OfflineRefreshPolicy,
    refresh_margin: Duration,
    token_history_limit: usize,
    initial_reachability: Reachability,
}

impl SessionOptions {
    /// Constructs options that download configuration from `config_url`
    ///
    /// Explicit refreshes are deferred while offline, tokens are refreshed
    /// five minutes before they expire, and five previous tokens are kept.
    pub fn new(config_url: impl Into<String>) -> Self {
        Self {
            config_url: config_url.into(),
            offline_refresh: OfflineRefreshPolicy::Defer,
            refresh_margin: Duration::from_secs(5 * 60),
            token_history_limit: 5,
            initial_reachability: Reachability::Reachable,
        }
    }

    /// Constructs options for the configuration document of `app_secret`
    /// hosted under `base_url`
    pub fn for_app_secret(base_url: &str, app_secret: &str) -> Self {
        Self::new(format!(
            "{}/auth/{}.json",
            base_url.trim_end_matches('/'),
            app_secret
        ))
    }

    /// Sets the offline refresh policy
    pub fn with_offline_refresh(mut self, policy: OfflineRefreshPolicy) -> Self {
        self.offline_refresh = policy;
        self
    }

    /// Sets how long before expiry a token is due for a silent refresh
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Sets how many previous tokens the token context keeps
    pub fn with_token_history_limit(mut self, limit: usize) -> Self {
        self.token_history_limit = limit;
        self
    }

    /// Sets the reachability assumed until a connectivity observer reports
    pub fn with_initial_reachability(mut self, reachability: Reachability) -> Self {
        self.initial_reachability = reachability;
        self
    }

    /// The configuration URL
    pub fn config_url(&self) -> &str {
        &self.config_url
    }

    /// The offline refresh policy
    pub fn offline_refresh(&self) -> OfflineRefreshPolicy {
        self.offline_refresh
    }

    /// The refresh margin
    pub fn refresh_margin(&self) -> Duration {
        self.refresh_margin
    }

    /// The token history limit
    pub fn token_history_limit(&self) -> usize {
        self.token_history_limit
    }

    /// The initial reachability
    pub fn initial_reachability(&self) -> Reachability {
        self.initial_reachability
    }
}
