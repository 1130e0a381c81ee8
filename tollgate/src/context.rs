//! Publication of the current authentication token

use std::{
    collections::VecDeque,
    ops,
    sync::{Arc, Mutex, PoisonError},
};

use aliri_clock::{Clock, System, UnixTime};
use tokio::sync::watch;

use crate::{AccessToken, AccessTokenRef, AccountId, AccountIdRef};

/// A token published to interested parties along with its validity window
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthTokenInfo {
    auth_token: Option<AccessToken>,
    account_id: Option<AccountId>,
    start_time: UnixTime,
    expires_on: Option<UnixTime>,
}

impl AuthTokenInfo {
    /// The token, or `None` while signed out
    pub fn auth_token(&self) -> Option<&AccessTokenRef> {
        self.auth_token.as_deref()
    }

    /// The account the token belongs to
    pub fn account_id(&self) -> Option<&AccountIdRef> {
        self.account_id.as_deref()
    }

    /// When this token began to be used
    pub fn start_time(&self) -> UnixTime {
        self.start_time
    }

    /// When the token expires, if known
    pub fn expires_on(&self) -> Option<UnixTime> {
        self.expires_on
    }
}

/// A listener that stopped receiving updates because the context was dropped
#[derive(Clone, Copy, Debug, thiserror::Error)]
#[error("the token context is no longer publishing tokens")]
pub struct TokenContextClosed;

/// Holds the current token and a bounded history of previous tokens
///
/// Cloning the context yields another handle onto the same state.
#[derive(Clone, Debug)]
pub struct TokenContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<Arc<AuthTokenInfo>>,
    history: Mutex<VecDeque<Arc<AuthTokenInfo>>>,
    history_limit: usize,
}

impl TokenContext {
    /// Constructs a context with no token, keeping up to `history_limit`
    /// previous tokens
    pub fn new(history_limit: usize) -> Self {
        let (tx, _) = watch::channel(Arc::new(AuthTokenInfo {
            auth_token: None,
            account_id: None,
            start_time: System.now(),
            expires_on: None,
        }));
        Self {
            inner: Arc::new(Inner {
                tx,
                history: Mutex::new(VecDeque::new()),
                history_limit,
            }),
        }
    }

    /// Publishes a new current token
    ///
    /// Publishing the same token for the same account again is ignored.
    pub fn set_auth_token(
        &self,
        auth_token: Option<AccessToken>,
        account_id: Option<AccountId>,
        expires_on: Option<UnixTime>,
    ) {
        let current = self.current();
        if current.auth_token == auth_token && current.account_id == account_id {
            tracing::trace!("token unchanged, not publishing");
            return;
        }

        let info = Arc::new(AuthTokenInfo {
            auth_token,
            account_id,
            start_time: System.now(),
            expires_on,
        });

        {
            let mut history = self
                .inner
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            history.push_back(current);
            while history.len() > self.inner.history_limit {
                history.pop_front();
            }
        }

        tracing::debug!(
            account_id = info.account_id.as_ref().map(|a| a.as_str()),
            has_token = info.auth_token.is_some(),
            expires_on = info.expires_on.map(|e| e.0),
            "publishing auth token"
        );
        self.inner.tx.send_replace(info);
    }

    /// Publishes the absence of a token
    pub fn clear(&self) {
        self.set_auth_token(None, None, None);
    }

    /// The current token
    pub fn current(&self) -> Arc<AuthTokenInfo> {
        Arc::clone(&self.inner.tx.borrow())
    }

    /// Previous tokens, oldest first
    pub fn history(&self) -> Vec<Arc<AuthTokenInfo>> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Subscribes to token updates
    ///
    /// Dropping the returned watcher unsubscribes.
    pub fn subscribe(&self) -> TokenWatcher {
        TokenWatcher {
            rx: self.inner.tx.subscribe(),
        }
    }
}

/// A subscription to the current token
#[derive(Clone, Debug)]
pub struct TokenWatcher {
    rx: watch::Receiver<Arc<AuthTokenInfo>>,
}

/// An outstanding borrow of the current token
///
/// Hold it briefly; outstanding borrows block publication of a new token.
#[derive(Debug)]
pub struct BorrowedToken<'a> {
    inner: watch::Ref<'a, Arc<AuthTokenInfo>>,
}

impl<'a> ops::Deref for BorrowedToken<'a> {
    type Target = AuthTokenInfo;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl TokenWatcher {
    /// Borrows the current token
    pub fn token(&self) -> BorrowedToken<'_> {
        BorrowedToken {
            inner: self.rx.borrow(),
        }
    }

    /// Waits until a new token is published
    pub async fn changed(&mut self) -> Result<Arc<AuthTokenInfo>, TokenContextClosed> {
        self.rx.changed().await.map_err(|_| TokenContextClosed)?;
        Ok(Arc::clone(&self.rx.borrow_and_update()))
    }
}
