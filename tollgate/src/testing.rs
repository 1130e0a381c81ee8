//! Scripted collaborators for tests

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use aliri_clock::UnixTime;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::{
    client::{AuthClient, AuthClientFactory},
    error::{AcquireError, IngestionError},
    ingestion::{ConfigIngestion, FetchOutcome},
    AccessToken, AccountId, AccountIdRef, ConfigSnapshot, Fingerprint, FingerprintRef, UserInfo,
};

/// An expiry far enough away that no refresh is ever due
pub(crate) const FAR_FUTURE: UnixTime = UnixTime(4_102_444_800);

pub(crate) fn user(account: &str) -> UserInfo {
    UserInfo {
        account_id: AccountId::new(account.to_owned()),
        access_token: AccessToken::new(format!("token-{}", account)),
        id_token: None,
        expires_on: Some(FAR_FUTURE),
    }
}

pub(crate) fn failure(reason: &str) -> AcquireError {
    AcquireError::failed(reason.to_owned())
}

/// Lets spawned tasks run until they block
pub(crate) async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

#[derive(Debug)]
struct Gate {
    closed: AtomicBool,
    permits: Semaphore,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            closed: AtomicBool::new(false),
            permits: Semaphore::new(0),
        }
    }
}

impl Gate {
    async fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            if let Ok(permit) = self.permits.acquire().await {
                permit.forget();
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

enum ScriptedFetch {
    Modified(ConfigSnapshot),
    NotModified,
    Failure(String),
}

#[derive(Default)]
struct IngestionScript {
    responses: Mutex<VecDeque<ScriptedFetch>>,
    fetches: AtomicUsize,
    last_fingerprint: Mutex<Option<Fingerprint>>,
    gate: Gate,
}

/// A configuration ingestion that replays scripted responses
#[derive(Clone)]
pub(crate) struct ScriptedIngestion {
    script: Arc<IngestionScript>,
}

impl ScriptedIngestion {
    pub(crate) fn new() -> Self {
        Self {
            script: Arc::default(),
        }
    }

    fn push(&self, response: ScriptedFetch) {
        self.script.responses.lock().unwrap().push_back(response);
    }

    pub(crate) fn push_modified(&self, snapshot: ConfigSnapshot) {
        self.push(ScriptedFetch::Modified(snapshot));
    }

    pub(crate) fn push_not_modified(&self) {
        self.push(ScriptedFetch::NotModified);
    }

    pub(crate) fn push_failure(&self, reason: &str) {
        self.push(ScriptedFetch::Failure(reason.to_owned()));
    }

    pub(crate) fn fetch_count(&self) -> usize {
        self.script.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn last_fingerprint(&self) -> Option<Fingerprint> {
        self.script.last_fingerprint.lock().unwrap().clone()
    }

    /// Makes downloads wait for [`release`][Self::release]
    pub(crate) fn hold(&self) {
        self.script.gate.close();
    }

    pub(crate) fn release(&self, n: usize) {
        self.script.gate.release(n);
    }
}

#[async_trait]
impl ConfigIngestion for ScriptedIngestion {
    async fn fetch(
        &self,
        _url: &str,
        known_fingerprint: Option<&FingerprintRef>,
    ) -> Result<FetchOutcome, IngestionError> {
        self.script.fetches.fetch_add(1, Ordering::SeqCst);
        *self.script.last_fingerprint.lock().unwrap() = known_fingerprint.map(ToOwned::to_owned);

        self.script.gate.pass().await;

        let response = self.script.responses.lock().unwrap().pop_front();
        match response {
            Some(ScriptedFetch::Modified(snapshot)) => Ok(FetchOutcome::Modified(snapshot)),
            Some(ScriptedFetch::NotModified) => Ok(FetchOutcome::NotModified),
            Some(ScriptedFetch::Failure(reason)) => Err(IngestionError::RequestSend(reason.into())),
            None => Err(IngestionError::RequestSend("no scripted response".into())),
        }
    }
}

#[derive(Default)]
struct ClientScript {
    silent: Mutex<VecDeque<Result<UserInfo, AcquireError>>>,
    interactive: Mutex<VecDeque<Result<UserInfo, AcquireError>>>,
    silent_calls: AtomicUsize,
    interactive_calls: AtomicUsize,
    silent_accounts: Mutex<Vec<AccountId>>,
    known_accounts: Mutex<HashSet<AccountId>>,
    removed_accounts: Mutex<Vec<AccountId>>,
    silent_gate: Gate,
    interactive_gate: Gate,
    inits: AtomicUsize,
    fail_next_init: AtomicBool,
}

/// Builds [`ScriptedAuthClient`]s that share one script
#[derive(Clone)]
pub(crate) struct ScriptedClientFactory {
    script: Arc<ClientScript>,
}

impl ScriptedClientFactory {
    pub(crate) fn new() -> Self {
        Self {
            script: Arc::default(),
        }
    }

    pub(crate) fn init_count(&self) -> usize {
        self.script.inits.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_init(&self) {
        self.script.fail_next_init.store(true, Ordering::SeqCst);
    }

    pub(crate) fn push_silent(&self, result: Result<UserInfo, AcquireError>) {
        self.script.silent.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_interactive(&self, result: Result<UserInfo, AcquireError>) {
        self.script.interactive.lock().unwrap().push_back(result);
    }

    pub(crate) fn silent_count(&self) -> usize {
        self.script.silent_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn interactive_count(&self) -> usize {
        self.script.interactive_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn silent_accounts(&self) -> Vec<AccountId> {
        self.script.silent_accounts.lock().unwrap().clone()
    }

    pub(crate) fn removed_accounts(&self) -> Vec<AccountId> {
        self.script.removed_accounts.lock().unwrap().clone()
    }

    pub(crate) fn hold_silent(&self) {
        self.script.silent_gate.close();
    }

    pub(crate) fn release_silent(&self, n: usize) {
        self.script.silent_gate.release(n);
    }

    pub(crate) fn hold_interactive(&self) {
        self.script.interactive_gate.close();
    }

    pub(crate) fn release_interactive(&self, n: usize) {
        self.script.interactive_gate.release(n);
    }
}

impl AuthClientFactory for ScriptedClientFactory {
    fn initialize(&self, _snapshot: &ConfigSnapshot) -> Result<Arc<dyn AuthClient>, AcquireError> {
        if self.script.fail_next_init.swap(false, Ordering::SeqCst) {
            return Err(failure("unsupported authority"));
        }
        self.script.inits.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedAuthClient {
            script: Arc::clone(&self.script),
        }))
    }
}

/// An authentication client that replays scripted results
///
/// With nothing scripted, interactive acquisition signs in `a1` and silent
/// acquisition succeeds for whichever account is asked for.
pub(crate) struct ScriptedAuthClient {
    script: Arc<ClientScript>,
}

#[async_trait]
impl AuthClient for ScriptedAuthClient {
    async fn acquire_silently(&self, account: &AccountIdRef) -> Result<UserInfo, AcquireError> {
        self.script.silent_calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .silent_accounts
            .lock()
            .unwrap()
            .push(account.to_owned());

        self.script.silent_gate.pass().await;

        let scripted = self.script.silent.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| Ok(user(account.as_str())));
        if let Ok(info) = &result {
            self.script
                .known_accounts
                .lock()
                .unwrap()
                .insert(info.account_id.clone());
        }
        result
    }

    async fn acquire_interactively(&self) -> Result<UserInfo, AcquireError> {
        self.script.interactive_calls.fetch_add(1, Ordering::SeqCst);

        self.script.interactive_gate.pass().await;

        let scripted = self.script.interactive.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| Ok(user("a1")));
        if let Ok(info) = &result {
            self.script
                .known_accounts
                .lock()
                .unwrap()
                .insert(info.account_id.clone());
        }
        result
    }

    fn has_account(&self, account: &AccountIdRef) -> bool {
        self.script.known_accounts.lock().unwrap().contains(account)
    }

    fn remove_account(&self, account: &AccountIdRef) {
        self.script.known_accounts.lock().unwrap().remove(account);
        self.script
            .removed_accounts
            .lock()
            .unwrap()
            .push(account.to_owned());
    }
}
