//! Authentication configuration documents

use serde::{Deserialize, Serialize};

use crate::{error::InvalidConfiguration, ClientId, Fingerprint, FingerprintRef};

/// An identity authority that the authentication client may sign in against
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    /// The kind of authority, e.g. `B2C` or `AAD`
    #[serde(rename = "type")]
    pub kind: String,

    /// Whether this is the authority to use when none is specified
    #[serde(default)]
    pub default: bool,

    /// The authority's URL
    #[serde(rename = "authority_url")]
    pub url: String,
}

/// The configuration an authentication client is built from
///
/// Once loaded, a configuration is never mutated. A new download replaces it
/// wholesale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// The scope requested when acquiring tokens
    pub auth_scope: String,

    /// The application's client ID
    pub client_id: ClientId,

    /// The redirect URI registered for the application
    pub redirect_uri: String,

    /// The authorities the application may sign in against
    pub authorities: Vec<Authority>,
}

impl AuthConfig {
    /// Checks that the configuration can be used to build a client
    pub fn validate(&self) -> Result<(), InvalidConfiguration> {
        if self.client_id.as_str().is_empty() {
            return Err(InvalidConfiguration("client ID is empty"));
        }
        if self.redirect_uri.is_empty() {
            return Err(InvalidConfiguration("redirect URI is empty"));
        }
        if self.auth_scope.is_empty() {
            return Err(InvalidConfiguration("auth scope is empty"));
        }
        if self.default_authority().is_none() {
            return Err(InvalidConfiguration("no default authority with a URL"));
        }
        Ok(())
    }

    /// The authority flagged as default, if one with a URL exists
    pub fn default_authority(&self) -> Option<&Authority> {
        self.authorities
            .iter()
            .find(|a| a.default && !a.url.is_empty())
    }
}

/// A configuration along with the fingerprint it was downloaded with
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    config: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fingerprint: Option<Fingerprint>,
}

impl ConfigSnapshot {
    /// Constructs a new snapshot
    pub fn new(config: AuthConfig, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            config,
            fingerprint,
        }
    }

    /// The configuration
    #[inline]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The fingerprint the configuration was downloaded with, if any
    #[inline]
    pub fn fingerprint(&self) -> Option<&FingerprintRef> {
        self.fingerprint.as_deref()
    }

    /// Whether two snapshots describe the same configuration version
    ///
    /// Snapshots carrying fingerprints are compared by fingerprint; otherwise
    /// the documents themselves are compared.
    pub fn same_version(&self, other: &ConfigSnapshot) -> bool {
        match (self.fingerprint(), other.fingerprint()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.config == other.config,
            _ => false,
        }
    }
}
