//! Single-fire completion slots for pending operations

use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{codes, AuthError, UserInfo};

/// The result delivered to a caller
pub type AuthResult = Result<UserInfo, AuthError>;

/// A pending result of a sign-in or token request
///
/// Resolves exactly once. If the coordinator goes away before delivering a
/// result, the completion resolves with [`AuthError::OperationCancelled`].
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    rx: oneshot::Receiver<AuthResult>,
}

impl Completion {
    pub(crate) fn pair() -> (oneshot::Sender<AuthResult>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// A completion that is already resolved with `result`
    pub(crate) fn ready(result: AuthResult) -> Self {
        let (tx, completion) = Self::pair();
        let _ = tx.send(result);
        completion
    }

    /// Returns the result if it has already been delivered
    pub fn try_result(&mut self) -> Option<AuthResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(dropped())),
        }
    }
}

fn dropped() -> AuthError {
    AuthError::cancelled(
        codes::SERVICE_DISABLED,
        "the session coordinator was dropped",
    )
}

impl Future for Completion {
    type Output = AuthResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or_else(|_| Err(dropped())))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// The logical slot an operation resolves into
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// An explicit sign-in
    SignIn,
    /// A token refresh or silent acquisition
    Refresh,
}

/// Holds at most one outstanding completion
#[derive(Debug, Default)]
pub struct PendingSlot {
    occupant: Option<oneshot::Sender<AuthResult>>,
}

impl PendingSlot {
    /// Installs a new occupant and returns its completion
    ///
    /// An existing occupant is resolved with a cancellation before the new
    /// one is installed. Returns `true` alongside the completion if an
    /// occupant was superseded.
    pub fn install(&mut self) -> (Completion, bool) {
        let superseded = self.cancel(AuthError::cancelled(
            codes::SUPERSEDED,
            "superseded by a newer request",
        ));
        let (tx, completion) = Completion::pair();
        self.occupant = Some(tx);
        (completion, superseded)
    }

    /// Resolves the occupant with `result`
    ///
    /// Returns `false` if the slot was empty and the result was discarded.
    pub fn resolve(&mut self, result: AuthResult) -> bool {
        match self.occupant.take() {
            Some(tx) => {
                if tx.send(result).is_err() {
                    tracing::trace!("caller stopped waiting before the result was delivered");
                }
                true
            }
            None => false,
        }
    }

    /// Resolves the occupant with `error`
    pub fn cancel(&mut self, error: AuthError) -> bool {
        self.resolve(Err(error))
    }

    /// Whether a completion is outstanding
    pub fn is_pending(&self) -> bool {
        self.occupant.is_some()
    }
}

/// The sign-in and refresh slots
#[derive(Debug, Default)]
pub struct PendingOperations {
    sign_in: PendingSlot,
    refresh: PendingSlot,
}

impl PendingOperations {
    /// The slot for `kind`
    pub fn slot_mut(&mut self, kind: SlotKind) -> &mut PendingSlot {
        match kind {
            SlotKind::SignIn => &mut self.sign_in,
            SlotKind::Refresh => &mut self.refresh,
        }
    }

    /// The slot for `kind`
    pub fn slot(&self, kind: SlotKind) -> &PendingSlot {
        match kind {
            SlotKind::SignIn => &self.sign_in,
            SlotKind::Refresh => &self.refresh,
        }
    }

    /// Resolves both slots with `error`
    pub fn cancel_all(&mut self, error: AuthError) {
        self.sign_in.cancel(error.clone());
        self.refresh.cancel(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::user;

    #[tokio::test]
    async fn resolves_once() {
        let mut slot = PendingSlot::default();
        let (completion, superseded) = slot.install();
        assert!(!superseded);

        assert!(slot.resolve(Ok(user("a1"))));
        assert!(!slot.resolve(Ok(user("a2"))));

        assert_eq!(completion.await.unwrap().account_id.as_str(), "a1");
    }

    #[tokio::test]
    async fn install_cancels_previous_occupant_first() {
        let mut slot = PendingSlot::default();
        let (mut first, _) = slot.install();
        let (second, superseded) = slot.install();
        assert!(superseded);

        let first_result = first.try_result().expect("first is resolved on install");
        assert_eq!(
            first_result.unwrap_err().cancellation_code(),
            Some(codes::SUPERSEDED)
        );

        slot.resolve(Ok(user("a1")));
        assert!(second.await.is_ok());
    }

    #[tokio::test]
    async fn cancel_all_resolves_both_slots() {
        let mut ops = PendingOperations::default();
        let (sign_in, _) = ops.slot_mut(SlotKind::SignIn).install();
        let (refresh, _) = ops.slot_mut(SlotKind::Refresh).install();

        ops.cancel_all(AuthError::cancelled(42, "stop"));
        assert!(!ops.slot(SlotKind::SignIn).is_pending());
        assert!(!ops.slot(SlotKind::Refresh).is_pending());

        assert_eq!(sign_in.await.unwrap_err().cancellation_code(), Some(42));
        assert_eq!(refresh.await.unwrap_err().cancellation_code(), Some(42));
    }

    #[test]
    fn cancel_all_on_empty_slots_is_a_no_op() {
        let mut ops = PendingOperations::default();
        ops.cancel_all(AuthError::cancelled(42, "stop"));
        assert!(!ops.slot(SlotKind::SignIn).is_pending());
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_cancelled() {
        let mut slot = PendingSlot::default();
        let (completion, _) = slot.install();
        drop(slot);

        let err = completion.await.unwrap_err();
        assert_eq!(err.cancellation_code(), Some(codes::SERVICE_DISABLED));
    }

    #[test]
    fn caller_dropping_completion_does_not_disturb_slot() {
        let mut slot = PendingSlot::default();
        let (completion, _) = slot.install();
        drop(completion);
        assert!(slot.resolve(Ok(user("a1"))));
    }
}
