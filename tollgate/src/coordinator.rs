use std::{
    error, fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use tokio::sync::watch;

use crate::{
    cache::ConfigCache,
    client::{AuthClient, AuthClientFactory},
    codes,
    connectivity::{ConnectivityGate, Reachability},
    context::TokenContext,
    error::IngestionError,
    factory::SessionClientFactory,
    ingestion::ConfigIngestion,
    options::{OfflineRefreshPolicy, SessionOptions},
    slot::{AuthResult, Completion, PendingOperations, SlotKind},
    store::{ConfigurationStore, RemoteConfig},
    AccountId, AccountIdRef, AuthError, ConfigSnapshot,
};

/// The observable state of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// Nothing has been configured yet
    Uninitialized,
    /// A configuration download is in flight and no configuration is held
    AwaitingConfiguration,
    /// A configuration is held and no acquisition is in flight
    Ready,
    /// An interactive acquisition is in flight
    SigningIn,
    /// A silent acquisition is in flight
    RefreshingSilently,
    /// The configuration download failed and no configuration is held
    Faulted,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Operation {
    SignIn,
    Silent {
        account_id: AccountId,
        ui_fallback: bool,
    },
}

impl Operation {
    fn account_id(&self) -> Option<&AccountIdRef> {
        match self {
            Self::SignIn => None,
            Self::Silent { account_id, .. } => Some(account_id),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Silent,
    Interactive,
}

#[derive(Debug)]
struct Flight {
    operation: Operation,
    epoch: u64,
    stage: Stage,
}

/// Per-slot dispatch bookkeeping
///
/// `request` is what the slot's occupant (or an implicit refresh) wants done
/// next. `flight` is the dispatch currently running against the client. A
/// flight whose epoch no longer matches was cancelled and its result is
/// dropped when it settles.
#[derive(Debug, Default)]
struct Lane {
    request: Option<Operation>,
    flight: Option<Flight>,
    epoch: u64,
}

impl Lane {
    fn live_flight(&self) -> Option<&Flight> {
        self.flight.as_ref().filter(|f| f.epoch == self.epoch)
    }

    fn abandon(&mut self) {
        self.request = None;
        self.epoch += 1;
    }
}

#[derive(Debug)]
struct State {
    factory: SessionClientFactory,
    pending: PendingOperations,
    gate: ConnectivityGate,
    sign_in: Lane,
    refresh: Lane,
    config: Option<Arc<ConfigSnapshot>>,
    account: Option<AccountId>,
    started: bool,
    fetch_in_flight: bool,
    config_epoch: u64,
    config_download_failed: bool,
}

impl State {
    fn lane_mut(&mut self, kind: SlotKind) -> &mut Lane {
        match kind {
            SlotKind::SignIn => &mut self.sign_in,
            SlotKind::Refresh => &mut self.refresh,
        }
    }

    fn fail_fast(&self) -> bool {
        self.config.is_none() && self.config_download_failed && !self.fetch_in_flight
    }

    fn phase(&self) -> SessionPhase {
        let stages = [&self.sign_in, &self.refresh]
            .into_iter()
            .filter_map(|l| l.live_flight().map(|f| f.stage));

        let mut silent = false;
        for stage in stages {
            match stage {
                Stage::Interactive => return SessionPhase::SigningIn,
                Stage::Silent => silent = true,
            }
        }

        if self.config.is_none() && self.fetch_in_flight {
            SessionPhase::AwaitingConfiguration
        } else if silent {
            SessionPhase::RefreshingSilently
        } else if self.config.is_none() && self.config_download_failed {
            SessionPhase::Faulted
        } else if self.config.is_some() {
            SessionPhase::Ready
        } else {
            SessionPhase::Uninitialized
        }
    }

    fn cancel_all(&mut self, error: AuthError) {
        self.pending.cancel_all(error);
        self.sign_in.abandon();
        self.refresh.abandon();
        if let Some(marker) = self.gate.clear() {
            tracing::debug!(account_id = %marker.account_id, "discarded deferred refresh");
        }
    }
}

struct Inner {
    store: Arc<ConfigurationStore>,
    options: SessionOptions,
    context: TokenContext,
    state: Mutex<State>,
}

/// Coordinates configuration, sign-in and token refresh for one session
///
/// All state transitions happen inside a single guarded region; calls into
/// collaborators run as spawned tasks and re-enter the region when they
/// complete. Every request resolves its [`Completion`] exactly once.
///
/// Methods that start work spawn onto the ambient Tokio runtime and must be
/// called from within one.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<Inner>,
}

impl SessionCoordinator {
    /// Constructs a new coordinator
    ///
    /// Nothing is loaded or downloaded until [`start`][Self::start] or the
    /// first request.
    pub fn new(
        options: SessionOptions,
        cache: impl ConfigCache + 'static,
        ingestion: impl ConfigIngestion + 'static,
        client_factory: impl AuthClientFactory + 'static,
    ) -> Self {
        let store = Arc::new(ConfigurationStore::new(options.config_url(), cache, ingestion));
        let context = TokenContext::new(options.token_history_limit());
        let state = State {
            factory: SessionClientFactory::new(client_factory),
            pending: PendingOperations::default(),
            gate: ConnectivityGate::new(options.initial_reachability()),
            sign_in: Lane::default(),
            refresh: Lane::default(),
            config: None,
            account: None,
            started: false,
            fetch_in_flight: false,
            config_epoch: 0,
            config_download_failed: false,
        };

        Self {
            inner: Arc::new(Inner {
                store,
                options,
                context,
                state: Mutex::new(state),
            }),
        }
    }

    /// Starts the session
    ///
    /// Loads the cached configuration, if any, and requests the remote one,
    /// conditional on the cached fingerprint. Calling this again after a
    /// failed download retries it.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        if state.started {
            self.inner.dispatch_fetch(&mut state);
        } else {
            self.inner.start_locked(&mut state);
        }
    }

    /// Signs a user in
    ///
    /// If an account from an earlier sign-in is still known to the client, a
    /// silent acquisition is tried first, falling back to the interactive
    /// flow. A sign-in already in flight is not dispatched again; the newest
    /// caller receives its result and earlier callers are cancelled.
    pub fn sign_in(&self) -> Completion {
        let mut state = self.inner.lock();
        if state.fail_fast() {
            tracing::debug!("sign-in failed fast, configuration download previously failed");
            return Completion::ready(Err(self.inner.config_unavailable()));
        }

        let completion = self.inner.install(&mut state, SlotKind::SignIn, Operation::SignIn);
        self.inner.ensure_config(&mut state);
        self.inner.pump(&mut state, SlotKind::SignIn);
        completion
    }

    /// Refreshes the token for `account_id` without user interaction
    ///
    /// While offline the request is handled according to the configured
    /// [`OfflineRefreshPolicy`].
    pub fn refresh(&self, account_id: &AccountIdRef) -> Completion {
        self.acquire(account_id, false)
    }

    /// Acquires a token for `account_id` silently, optionally falling back to
    /// the interactive flow once if that fails
    pub fn acquire_token_silently(&self, account_id: &AccountIdRef, ui_fallback: bool) -> Completion {
        self.acquire(account_id, ui_fallback)
    }

    fn acquire(&self, account_id: &AccountIdRef, ui_fallback: bool) -> Completion {
        let mut state = self.inner.lock();
        if state.fail_fast() {
            tracing::debug!(%account_id, "refresh failed fast, configuration download previously failed");
            return Completion::ready(Err(self.inner.config_unavailable()));
        }

        if !state.gate.is_reachable()
            && self.inner.options.offline_refresh() == OfflineRefreshPolicy::FailFast
        {
            self.inner.ensure_config(&mut state);
            let wait_for_config = state.config.is_none();
            state.gate.defer(account_id, wait_for_config);
            tracing::debug!(%account_id, "network unreachable, refresh marked for reconnect");
            return Completion::ready(Err(AuthError::NoNetwork));
        }

        let operation = Operation::Silent {
            account_id: account_id.to_owned(),
            ui_fallback,
        };
        let completion = self.inner.install(&mut state, SlotKind::Refresh, operation);
        self.inner.ensure_config(&mut state);
        self.inner.pump(&mut state, SlotKind::Refresh);
        completion
    }

    /// Notes that the token for `account_id` needs refreshing
    ///
    /// This is the implicit path: nobody awaits the result, which is only
    /// published to the [`TokenContext`]. While offline the refresh is always
    /// deferred until the network returns.
    pub fn on_token_refresh_needed(&self, account_id: &AccountIdRef) {
        let mut state = self.inner.lock();
        if state.fail_fast() {
            tracing::debug!(%account_id, "not refreshing, configuration download previously failed");
            return;
        }

        match &state.refresh.request {
            Some(existing) if existing.account_id() == Some(account_id) => {
                tracing::trace!(%account_id, "refresh already requested");
                return;
            }
            Some(_) => {
                tracing::debug!(%account_id, "another refresh is pending, ignoring implicit refresh");
                return;
            }
            None => {}
        }

        state.refresh.request = Some(Operation::Silent {
            account_id: account_id.to_owned(),
            ui_fallback: false,
        });
        self.inner.ensure_config(&mut state);
        self.inner.pump(&mut state, SlotKind::Refresh);
    }

    /// Resolves every pending request with the given cancellation
    ///
    /// Both slots are resolved before this returns and the deferred refresh
    /// marker is discarded. Results of dispatches still winding down are
    /// dropped when they arrive.
    pub fn cancel_pending_operations(&self, code: i64, message: &str) {
        let mut state = self.inner.lock();
        tracing::debug!(code, message, "cancelling pending operations");
        state.cancel_all(AuthError::cancelled(code, message));
    }

    /// Applies a reachability report
    ///
    /// On reconnect, exactly one refresh is issued for the account marked
    /// while offline.
    pub fn set_reachability(&self, reachability: Reachability) {
        let mut state = self.inner.lock();
        self.inner.apply_reachability(&mut state, reachability);
    }

    /// Follows reachability reports from `rx` until the sender closes or the
    /// coordinator is dropped
    pub fn watch_connectivity(&self, mut rx: watch::Receiver<Reachability>) {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let reachability = *rx.borrow_and_update();
                match weak.upgrade() {
                    Some(inner) => {
                        let mut state = inner.lock();
                        inner.apply_reachability(&mut state, reachability);
                    }
                    None => break,
                }

                if rx.changed().await.is_err() {
                    tracing::debug!("connectivity observer closed");
                    break;
                }
            }
        });
    }

    /// Signs the current user out
    ///
    /// Pending requests are cancelled, the account is removed from the client
    /// and an empty token is published. Returns whether a user was signed in.
    pub fn sign_out(&self) -> bool {
        let mut state = self.inner.lock();
        state.cancel_all(AuthError::cancelled(codes::SIGNED_OUT, "the user signed out"));

        let account = state.account.take();
        if let (Some(account), Some(client)) = (&account, state.factory.current()) {
            client.remove_account(account);
        }
        self.inner.context.clear();

        match account {
            Some(account) => {
                tracing::info!(account_id = %account, "signed out");
                true
            }
            None => false,
        }
    }

    /// Returns the coordinator to its initial state
    ///
    /// Pending requests are cancelled, and the client, configuration and
    /// account identity are discarded. The cache is left intact, so a later
    /// [`start`][Self::start] can reuse it.
    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.cancel_all(AuthError::cancelled(
            codes::SERVICE_DISABLED,
            "the session was reset",
        ));
        state.factory.invalidate();
        state.config = None;
        state.account = None;
        state.started = false;
        state.fetch_in_flight = false;
        state.config_epoch += 1;
        state.config_download_failed = false;
        self.inner.store.clear();
        self.inner.context.clear();
        tracing::debug!("session reset");
    }

    /// The current phase
    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase()
    }

    /// The account of the most recent successful acquisition
    pub fn current_account(&self) -> Option<AccountId> {
        self.inner.lock().account.clone()
    }

    /// Whether the last configuration download failed with nothing to fall
    /// back on
    pub fn config_download_failed(&self) -> bool {
        self.inner.lock().config_download_failed
    }

    /// The configuration currently in use
    pub fn configuration(&self) -> Option<Arc<ConfigSnapshot>> {
        self.inner.lock().config.clone()
    }

    /// The context publishing the current token
    pub fn token_context(&self) -> &TokenContext {
        &self.inner.context
    }

    /// The options the coordinator was built with
    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub(crate) fn downgrade(&self) -> WeakCoordinator {
        WeakCoordinator {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("store", &self.inner.store)
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

/// A handle that does not keep the coordinator alive
#[derive(Clone)]
pub(crate) struct WeakCoordinator {
    inner: Weak<Inner>,
}

impl WeakCoordinator {
    pub(crate) fn upgrade(&self) -> Option<SessionCoordinator> {
        self.inner.upgrade().map(|inner| SessionCoordinator { inner })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn config_unavailable(&self) -> AuthError {
        AuthError::configuration_unavailable("the configuration download failed")
    }

    fn install(&self, state: &mut State, kind: SlotKind, operation: Operation) -> Completion {
        let (completion, superseded) = state.pending.slot_mut(kind).install();
        if superseded {
            tracing::debug!(slot = ?kind, "superseded pending request");
        }
        state.lane_mut(kind).request = Some(operation);
        completion
    }

    fn start_locked(self: &Arc<Self>, state: &mut State) {
        state.started = true;
        if state.config.is_none() {
            if let Some(snapshot) = self.store.load_from_cache() {
                self.apply_config(state, snapshot);
            }
        }
        self.dispatch_fetch(state);
    }

    fn ensure_config(self: &Arc<Self>, state: &mut State) {
        if !state.started {
            self.start_locked(state);
        } else if state.config.is_none() {
            self.dispatch_fetch(state);
        }
    }

    fn dispatch_fetch(self: &Arc<Self>, state: &mut State) {
        if state.fetch_in_flight {
            tracing::trace!("configuration download already in flight");
            return;
        }
        state.fetch_in_flight = true;

        let epoch = state.config_epoch;
        let fingerprint = state
            .config
            .as_ref()
            .and_then(|c| c.fingerprint().map(ToOwned::to_owned));
        tracing::debug!(
            url = self.store.url(),
            fingerprint = fingerprint.as_ref().map(|f| f.as_str()),
            "downloading configuration"
        );

        let store = Arc::clone(&self.store);
        let inner = Arc::downgrade(self);
        tokio::spawn(async move {
            let result = store.request_remote(fingerprint.as_deref()).await;
            match inner.upgrade() {
                Some(this) => {
                    let mut state = this.lock();
                    this.on_config_result(&mut state, epoch, result);
                }
                None => tracing::debug!("coordinator dropped during configuration download"),
            }
        });
    }

    fn on_config_result(
        self: &Arc<Self>,
        state: &mut State,
        epoch: u64,
        result: Result<RemoteConfig, IngestionError>,
    ) {
        if epoch != state.config_epoch {
            tracing::debug!("discarding configuration downloaded before reset");
            return;
        }
        state.fetch_in_flight = false;

        match result {
            Ok(remote) => {
                state.config_download_failed = false;
                self.apply_config(state, Arc::clone(remote.snapshot()));

                if let Some(account_id) = state.gate.on_config_ready() {
                    self.resume_refresh(state, account_id);
                }
                self.pump(state, SlotKind::SignIn);
                self.pump(state, SlotKind::Refresh);
            }
            Err(error) => {
                if state.config.is_some() {
                    tracing::warn!(
                        error = (&error as &dyn error::Error),
                        "configuration download failed, keeping cached configuration"
                    );
                    return;
                }

                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "configuration download failed"
                );
                state.config_download_failed = true;
                let failure = AuthError::configuration_unavailable(error.to_string());
                for kind in [SlotKind::SignIn, SlotKind::Refresh] {
                    let lane = state.lane_mut(kind);
                    if lane.request.is_some() && lane.flight.is_none() {
                        lane.request = None;
                        state.pending.slot_mut(kind).cancel(failure.clone());
                    }
                }
                state.gate.clear();
            }
        }
    }

    fn apply_config(&self, state: &mut State, snapshot: Arc<ConfigSnapshot>) {
        let changed = state
            .config
            .as_ref()
            .map_or(true, |current| !current.same_version(&snapshot));
        if !changed {
            tracing::trace!("configuration unchanged");
            return;
        }

        if state.config.is_some() {
            for kind in [SlotKind::SignIn, SlotKind::Refresh] {
                if state.lane_mut(kind).live_flight().is_some() {
                    tracing::debug!(slot = ?kind, "cancelling dispatch against outdated configuration");
                    state.lane_mut(kind).abandon();
                    state.pending.slot_mut(kind).cancel(AuthError::cancelled(
                        codes::CONFIGURATION_CHANGED,
                        "the configuration changed",
                    ));
                }
            }
        }

        tracing::info!(
            fingerprint = snapshot.fingerprint().map(|f| f.as_str()),
            "configuration ready"
        );
        state.config = Some(snapshot);
    }

    fn apply_reachability(self: &Arc<Self>, state: &mut State, reachability: Reachability) {
        if let Some(account_id) = state.gate.on_transition(reachability) {
            tracing::debug!(%account_id, "network reachable, resuming deferred refresh");
            self.resume_refresh(state, account_id);
            self.pump(state, SlotKind::Refresh);
        }
    }

    fn resume_refresh(&self, state: &mut State, account_id: AccountId) {
        if state.refresh.request.is_none() {
            state.refresh.request = Some(Operation::Silent {
                account_id,
                ui_fallback: false,
            });
        }
    }

    /// Dispatches the slot's request if nothing blocks it
    fn pump(self: &Arc<Self>, state: &mut State, kind: SlotKind) {
        let lane = state.lane_mut(kind);
        let operation = match &lane.request {
            Some(operation) => operation.clone(),
            None => return,
        };
        if lane.flight.is_some() {
            tracing::trace!(slot = ?kind, "waiting for dispatch in flight");
            return;
        }

        if kind == SlotKind::Refresh {
            if let Some(account_id) = operation.account_id() {
                if !state.gate.is_reachable() {
                    let wait_for_config = state.config.is_none();
                    state.gate.defer(account_id, wait_for_config);
                    tracing::debug!(%account_id, "network unreachable, deferring refresh");
                    return;
                }
            }
        }

        let snapshot = match state.config.clone() {
            Some(snapshot) => snapshot,
            None => {
                if state.fail_fast() {
                    state.lane_mut(kind).request = None;
                    state
                        .pending
                        .slot_mut(kind)
                        .cancel(self.config_unavailable());
                } else {
                    if let Some(account_id) = operation.account_id() {
                        state.gate.defer(account_id, true);
                    }
                    tracing::debug!(slot = ?kind, "waiting for configuration");
                }
                return;
            }
        };

        let client = match state.factory.get_or_create(&snapshot) {
            Ok(client) => client,
            Err(error) => {
                state.lane_mut(kind).request = None;
                state
                    .pending
                    .slot_mut(kind)
                    .cancel(AuthError::ClientNotConfigured {
                        reason: error.to_string().into(),
                    });
                return;
            }
        };

        if kind == SlotKind::Refresh {
            state.gate.clear();
        }

        let known_account = match &operation {
            Operation::SignIn => state
                .account
                .clone()
                .filter(|account| client.has_account(account)),
            Operation::Silent { .. } => None,
        };

        let lane = state.lane_mut(kind);
        let epoch = lane.epoch;
        let stage = match (&operation, &known_account) {
            (Operation::SignIn, None) => Stage::Interactive,
            _ => Stage::Silent,
        };
        lane.flight = Some(Flight {
            operation: operation.clone(),
            epoch,
            stage,
        });

        tracing::debug!(slot = ?kind, ?operation, "dispatching acquisition");
        let dispatch = Dispatch {
            inner: Arc::downgrade(self),
            client,
            kind,
            epoch,
        };
        tokio::spawn(dispatch.run(operation, known_account));
    }

    /// Marks the flight as interactive; `false` if it was cancelled
    fn enter_interactive(&self, kind: SlotKind, epoch: u64) -> bool {
        let mut state = self.lock();
        let lane = state.lane_mut(kind);
        let current = lane.epoch;
        match &mut lane.flight {
            Some(flight) if flight.epoch == epoch && current == epoch => {
                flight.stage = Stage::Interactive;
                true
            }
            _ => false,
        }
    }

    fn complete(self: &Arc<Self>, kind: SlotKind, epoch: u64, result: AuthResult) {
        let mut state = self.lock();
        let lane = state.lane_mut(kind);
        let flight = match lane.flight.take() {
            Some(flight) if flight.epoch == epoch => flight,
            other => {
                lane.flight = other;
                tracing::warn!(slot = ?kind, "settled dispatch is not the one in flight");
                return;
            }
        };

        if flight.epoch != lane.epoch {
            tracing::debug!(slot = ?kind, "discarding result of cancelled dispatch");
            self.pump(&mut state, kind);
            return;
        }

        if lane.request.as_ref() != Some(&flight.operation) {
            tracing::debug!(slot = ?kind, "request changed while in flight, dispatching again");
            self.pump(&mut state, kind);
            return;
        }
        lane.request = None;

        match &result {
            Ok(user) => {
                tracing::info!(
                    slot = ?kind,
                    account_id = %user.account_id,
                    expires_on = user.expires_on.map(|e| e.0),
                    "acquired token"
                );
                state.account = Some(user.account_id.clone());
                self.context.set_auth_token(
                    Some(user.access_token.clone()),
                    Some(user.account_id.clone()),
                    user.expires_on,
                );
            }
            Err(error) => {
                tracing::warn!(
                    slot = ?kind,
                    error = (error as &dyn error::Error),
                    "token acquisition did not succeed"
                );
            }
        }

        if !state.pending.slot_mut(kind).resolve(result) {
            tracing::trace!(slot = ?kind, "no caller waiting for result");
        }
    }
}

struct Dispatch {
    inner: Weak<Inner>,
    client: Arc<dyn AuthClient>,
    kind: SlotKind,
    epoch: u64,
}

impl Dispatch {
    async fn run(self, operation: Operation, known_account: Option<AccountId>) {
        let result = match operation {
            Operation::SignIn => match known_account {
                Some(account_id) => self.silent_then_interactive(account_id, true).await,
                None => self.interactive().await,
            },
            Operation::Silent {
                account_id,
                ui_fallback,
            } => self.silent_then_interactive(account_id, ui_fallback).await,
        };

        if let Some(inner) = self.inner.upgrade() {
            inner.complete(self.kind, self.epoch, result);
        }
    }

    async fn silent_then_interactive(&self, account_id: AccountId, ui_fallback: bool) -> AuthResult {
        tracing::trace!(%account_id, "acquiring token silently");
        match self.client.acquire_silently(&account_id).await {
            Ok(user) => Ok(user),
            Err(error) if ui_fallback => {
                tracing::debug!(
                    %account_id,
                    error = (&error as &dyn error::Error),
                    "silent acquisition failed, falling back to interactive"
                );
                let proceed = self
                    .inner
                    .upgrade()
                    .map_or(false, |inner| inner.enter_interactive(self.kind, self.epoch));
                if !proceed {
                    return Err(AuthError::cancelled(
                        codes::SUPERSEDED,
                        "cancelled before interactive fallback",
                    ));
                }
                self.interactive().await
            }
            Err(error) => Err(error.into_auth_error(Some(account_id))),
        }
    }

    async fn interactive(&self) -> AuthResult {
        tracing::trace!("acquiring token interactively");
        self.client
            .acquire_interactively()
            .await
            .map_err(|error| error.into_auth_error(None))
    }
}
