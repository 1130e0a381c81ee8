//! Background renewal of tokens nearing expiry

use std::time::Duration;

use aliri_clock::{Clock, System, UnixTime};
use tokio::task::JoinHandle;

use crate::{
    context::TokenWatcher,
    coordinator::{SessionCoordinator, WeakCoordinator},
    AccountId,
};

impl SessionCoordinator {
    /// Spawns a task that requests a silent refresh whenever the published
    /// token comes within the configured refresh margin of expiring
    ///
    /// The task stops once the coordinator is dropped.
    pub fn spawn_expiry_watch(&self) -> JoinHandle<()> {
        self.spawn_expiry_watch_with_clock(System)
    }

    /// Spawns an expiry watch that reads the time from `clock`
    pub fn spawn_expiry_watch_with_clock<C>(&self, clock: C) -> JoinHandle<()>
    where
        C: Clock + Send + 'static,
    {
        let watcher = self.token_context().subscribe();
        let margin = self.options().refresh_margin();
        tokio::spawn(watch_expiry(self.downgrade(), watcher, margin, clock))
    }
}

/// When a token published at `start` becomes due for renewal
///
/// Normally `margin` before it expires, but never before half of its
/// lifetime has passed, so tokens issued with a lifetime shorter than the
/// margin are not renewed as soon as they arrive.
fn stale_at(start: UnixTime, expires_on: UnixTime, margin: Duration) -> UnixTime {
    let before_margin = expires_on.0.saturating_sub(margin.as_secs());
    let halfway = start.0 + expires_on.0.saturating_sub(start.0) / 2;
    UnixTime(before_margin.max(halfway))
}

/// Sleeps in short steps rather than once until the stale time, since the
/// timer does not advance while the host is suspended
const HEARTBEAT: Duration = Duration::from_secs(30);

async fn watch_expiry<C: Clock>(
    coordinator: WeakCoordinator,
    mut watcher: TokenWatcher,
    margin: Duration,
    clock: C,
) {
    'token: loop {
        let due: Option<(AccountId, UnixTime)> = {
            let token = watcher.token();
            match (token.account_id(), token.expires_on()) {
                (Some(account_id), Some(expires_on)) if token.auth_token().is_some() => {
                    let stale = stale_at(token.start_time(), expires_on, margin);
                    Some((account_id.to_owned(), stale))
                }
                _ => None,
            }
        };

        if let Some((account_id, stale)) = due {
            loop {
                let now = clock.now();
                if now >= stale {
                    tracing::debug!(%account_id, "token now stale, requesting refresh");
                    match coordinator.upgrade() {
                        Some(coordinator) => coordinator.on_token_refresh_needed(&account_id),
                        None => return,
                    }
                    break;
                }

                let until_stale = Duration::from_secs(stale.0 - now.0);
                let delay = until_stale.min(HEARTBEAT);
                tracing::trace!(
                    delay = delay.as_secs(),
                    until_stale = until_stale.as_secs(),
                    "token not yet stale, sleeping"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = watcher.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue 'token;
                    }
                }
            }
        }

        if watcher.changed().await.is_err() {
            tracing::debug!("token context closed, stopping expiry watch");
            return;
        }
        if coordinator.upgrade().is_none() {
            return;
        }
    }
}
