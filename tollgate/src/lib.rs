//! Client-side coordination of authentication sessions
//!
//! This library keeps the moving parts of a client's sign-in story in one place: a remotely
//! hosted authentication configuration, the single authentication client built from it, and
//! the sign-in and token refresh requests that callers issue against that client.
//!
//! A [`SessionCoordinator`] serializes every decision about that state. Requests that arrive
//! before a configuration is available are parked until one is; requests that would compete
//! with an in-flight acquisition are coalesced so that the identity provider sees at most one
//! dispatch per slot, while the most recent caller receives the result. Refreshes requested
//! while the network is unreachable are remembered and issued once, for the latest account,
//! when connectivity returns.
//!
//! Every request returns a [`Completion`], which resolves exactly once: with the signed-in
//! user's information, or with an [`AuthError`] describing why it could not be satisfied.
//!
//! # General Flow
//!
//! On start-up, provide a cache for the configuration document, a way to download it, and a
//! factory that builds your identity provider's client from it.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tollgate::{
//!     cache::FileConfigCache,
//!     client::AuthClient,
//!     error::AcquireError,
//!     ingestion::HttpConfigIngestion,
//!     options::{SessionOptions, DEFAULT_CONFIG_BASE_URL},
//!     ConfigSnapshot, SessionCoordinator,
//! };
//!
//! # fn build_client(_: &ConfigSnapshot) -> Result<Arc<dyn AuthClient>, AcquireError> { unimplemented!() }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = SessionOptions::for_app_secret(DEFAULT_CONFIG_BASE_URL, "00000000-0000-0000-0000-000000000000");
//! let ingestion = HttpConfigIngestion::with_default_client()?;
//! let cache = FileConfigCache::new(".auth-config.json");
//!
//! let coordinator = SessionCoordinator::new(options, cache, ingestion, build_client);
//! coordinator.start();
//! coordinator.spawn_expiry_watch();
//!
//! let user = coordinator.sign_in().await?;
//! println!("signed in as {}", user.account_id);
//! # Ok(())
//! # }
//! ```
//!
//! Consumers of the token subscribe to the coordinator's [`TokenContext`][context::TokenContext]
//! rather than holding onto a particular acquisition result.
//!
//! This crate includes an example of a session driven from the command line in the examples
//! folder.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides an implementation of a configuration cache using the local filesystem.
//! * `reqwest`: Provides an implementation of configuration download over HTTP using the
//!   [reqwest] crate, revalidating the cached document by its fingerprint.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
pub mod cache;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod context;
mod coordinator;
pub mod error;
mod expiry;
pub mod factory;
pub mod ingestion;
pub mod options;
pub mod slot;
pub mod store;

#[cfg(test)]
mod testing;

pub use braids::*;
pub use client::UserInfo;
pub use config::{AuthConfig, Authority, ConfigSnapshot};
pub use connectivity::Reachability;
pub use coordinator::{SessionCoordinator, SessionPhase};
pub use error::AuthError;
pub use options::{OfflineRefreshPolicy, SessionOptions};
pub use slot::{AuthResult, Completion};

/// Cancellation codes carried by [`AuthError::OperationCancelled`]
///
/// Callers of [`SessionCoordinator::cancel_pending_operations`] may supply
/// their own codes; these are the ones the coordinator uses itself.
pub mod codes {
    /// The service was disabled or reset, or the coordinator went away
    pub const SERVICE_DISABLED: i64 = -420_000;

    /// A newer request took over the slot
    pub const SUPERSEDED: i64 = -421_000;

    /// The user signed out
    pub const SIGNED_OUT: i64 = -423_000;

    /// The configuration changed while the operation was dispatched
    pub const CONFIGURATION_CHANGED: i64 = -424_000;
}
