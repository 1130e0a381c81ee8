//! Deferral of token refreshes while the network is unreachable

use crate::{AccountId, AccountIdRef};

/// Network reachability as reported by a connectivity observer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reachability {
    /// The network can be reached
    Reachable,
    /// The network cannot be reached
    Unreachable,
}

/// Records which account should be refreshed once its precondition holds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeferredResume {
    /// The account to refresh
    pub account_id: AccountId,
    /// Whether the refresh must also wait for a configuration
    pub wait_for_config: bool,
}

/// Tracks reachability and the deferred-resume marker
///
/// Deferring refreshes for several accounts keeps only the latest; the gate
/// deduplicates rather than queues.
#[derive(Debug)]
pub struct ConnectivityGate {
    reachability: Reachability,
    marker: Option<DeferredResume>,
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new(Reachability::Reachable)
    }
}

impl ConnectivityGate {
    /// Constructs a gate with the initial `reachability`
    pub const fn new(reachability: Reachability) -> Self {
        Self {
            reachability,
            marker: None,
        }
    }

    /// Whether the network is currently reachable
    #[inline]
    pub fn is_reachable(&self) -> bool {
        self.reachability == Reachability::Reachable
    }

    /// The current marker, if any
    pub fn marker(&self) -> Option<&DeferredResume> {
        self.marker.as_ref()
    }

    /// Marks `account_id` for refresh once the network (and, if requested,
    /// a configuration) is available
    pub fn defer(&mut self, account_id: &AccountIdRef, wait_for_config: bool) {
        if let Some(previous) = &self.marker {
            if &*previous.account_id != account_id {
                tracing::debug!(
                    previous = %previous.account_id,
                    account_id = %account_id,
                    "replacing deferred refresh"
                );
            }
        }
        self.marker = Some(DeferredResume {
            account_id: account_id.to_owned(),
            wait_for_config,
        });
    }

    /// Applies a reachability transition
    ///
    /// Returns the account to refresh when the network has just become
    /// reachable and a marker is waiting only on the network. The marker is
    /// cleared when returned.
    pub fn on_transition(&mut self, reachability: Reachability) -> Option<AccountId> {
        let previous = std::mem::replace(&mut self.reachability, reachability);
        if previous == reachability {
            return None;
        }

        tracing::debug!(?reachability, "network reachability changed");

        if reachability == Reachability::Reachable {
            self.take_ready()
        } else {
            None
        }
    }

    /// Notes that a configuration is now available
    ///
    /// Returns the marked account if the network is also reachable, clearing
    /// the marker. While offline the marker stays set, now waiting only on
    /// the network.
    pub fn on_config_ready(&mut self) -> Option<AccountId> {
        if let Some(marker) = &mut self.marker {
            marker.wait_for_config = false;
        }
        if self.is_reachable() {
            self.take_ready()
        } else {
            None
        }
    }

    /// Discards the marker
    pub fn clear(&mut self) -> Option<DeferredResume> {
        self.marker.take()
    }

    fn take_ready(&mut self) -> Option<AccountId> {
        match &self.marker {
            Some(marker) if !marker.wait_for_config => {
                self.marker.take().map(|m| m.account_id)
            }
            _ => None,
        }
    }
}
