//! The authentication client collaborator

use std::sync::Arc;

use aliri_clock::UnixTime;
use async_trait::async_trait;

use crate::{error::AcquireError, AccessToken, AccountId, AccountIdRef, ConfigSnapshot, IdToken};

/// Information about a signed-in user, returned by a successful acquisition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    /// The account the tokens were issued for
    pub account_id: AccountId,
    /// The access token
    pub access_token: AccessToken,
    /// The ID token, if the provider issued one
    pub id_token: Option<IdToken>,
    /// When the access token expires, if known
    pub expires_on: Option<UnixTime>,
}

/// A client that performs token acquisition against an identity provider
///
/// One client is bound to one configuration. Implementations own any
/// interactive UI and the provider's wire protocol.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Acquires a token for `account` without user interaction
    async fn acquire_silently(&self, account: &AccountIdRef) -> Result<UserInfo, AcquireError>;

    /// Acquires a token by presenting the interactive sign-in flow
    async fn acquire_interactively(&self) -> Result<UserInfo, AcquireError>;

    /// Whether the client holds a cached session for `account`
    fn has_account(&self, account: &AccountIdRef) -> bool;

    /// Forgets any cached session for `account`
    fn remove_account(&self, account: &AccountIdRef);
}

/// Builds authentication clients from configurations
pub trait AuthClientFactory: Send + Sync {
    /// Builds a client for `snapshot`
    fn initialize(&self, snapshot: &ConfigSnapshot) -> Result<Arc<dyn AuthClient>, AcquireError>;
}

impl<F> AuthClientFactory for F
where
    F: Fn(&ConfigSnapshot) -> Result<Arc<dyn AuthClient>, AcquireError> + Send + Sync,
{
    fn initialize(&self, snapshot: &ConfigSnapshot) -> Result<Arc<dyn AuthClient>, AcquireError> {
        self(snapshot)
    }
}
