//! Error types

use std::{error, sync::Arc};

use thiserror::Error;

use crate::AccountId;

/// An error delivered to a caller awaiting a [`Completion`][crate::Completion]
///
/// Every request issued to the coordinator terminates with either user
/// information or exactly one of these errors.
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// No configuration could be obtained from either the remote source or
    /// the local cache
    #[error("authentication configuration is unavailable: {reason}")]
    ConfigurationUnavailable {
        /// The reason the configuration could not be obtained
        reason: Arc<str>,
    },
    /// The authentication client could not be built from the current
    /// configuration
    #[error("authentication client is not configured: {reason}")]
    ClientNotConfigured {
        /// The reason the client is unavailable
        reason: Arc<str>,
    },
    /// The authentication client failed to acquire a token for the account
    #[error("token acquisition failed for account {account_id:?}")]
    AcquisitionFailed {
        /// The account for which acquisition was attempted, if any
        account_id: Option<AccountId>,
        /// The collaborator's failure
        #[source]
        reason: Arc<dyn error::Error + Send + Sync + 'static>,
    },
    /// The user dismissed the interactive sign-in flow
    #[error("sign-in was cancelled by the user")]
    UserCancelled,
    /// The operation was pre-empted by a newer request or cancelled outright
    #[error("operation cancelled ({code}): {message}")]
    OperationCancelled {
        /// A code identifying the reason for the cancellation
        ///
        /// See [`codes`][crate::codes] for the values used by this crate.
        code: i64,
        /// A human-readable description of the cancellation
        message: Arc<str>,
    },
    /// The network is unreachable and the request required immediacy
    #[error("the network is unreachable")]
    NoNetwork,
}

impl AuthError {
    /// Constructs an [`AuthError::OperationCancelled`]
    pub fn cancelled(code: i64, message: impl Into<Arc<str>>) -> Self {
        Self::OperationCancelled {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn configuration_unavailable(reason: impl Into<Arc<str>>) -> Self {
        Self::ConfigurationUnavailable {
            reason: reason.into(),
        }
    }

    /// The cancellation code, if this is a cancellation
    pub fn cancellation_code(&self) -> Option<i64> {
        match self {
            Self::OperationCancelled { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// An error reported by an [`AuthClient`][crate::client::AuthClient]
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The acquisition failed, e.g. because the grant is no longer valid
    #[error("token acquisition failed")]
    Failed(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The user dismissed the interactive flow
    #[error("interactive acquisition was cancelled by the user")]
    UserCancelled,
}

impl AcquireError {
    /// Wraps an arbitrary error as an acquisition failure
    pub fn failed(error: impl Into<Box<dyn error::Error + Send + Sync + 'static>>) -> Self {
        Self::Failed(error.into())
    }

    pub(crate) fn into_auth_error(self, account_id: Option<AccountId>) -> AuthError {
        match self {
            Self::Failed(reason) => AuthError::AcquisitionFailed {
                account_id,
                reason: reason.into(),
            },
            Self::UserCancelled => AuthError::UserCancelled,
        }
    }
}

/// An error while downloading a configuration document
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Unable to send the request to the configuration endpoint
    #[error("error sending request to configuration endpoint")]
    RequestSend(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The endpoint answered with an unexpected status
    #[error("configuration endpoint returned status {status}: {body}")]
    UnexpectedStatus {
        /// The HTTP status code
        status: u16,
        /// The body of the response
        body: String,
    },
    /// Unable to read the response
    #[error("error reading configuration response body")]
    BodyRead(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The document could not be parsed or failed validation
    #[error("configuration document is invalid")]
    InvalidDocument(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The endpoint reported the cached document as current, but there is
    /// no cached document to reuse
    #[error("configuration not modified, but no cached configuration is available")]
    MissingCachedDocument,
}

/// An error while reading or writing a cached configuration
#[derive(Debug, Error)]
pub enum CacheError {
    /// An I/O failure
    #[error("configuration cache I/O failed")]
    Io(#[from] std::io::Error),
    /// The cached document could not be (de)serialized
    #[error("configuration cache contents could not be (de)serialized")]
    Serialization(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// A configuration document failed validation
#[derive(Debug, Error)]
#[error("invalid authentication configuration: {0}")]
pub struct InvalidConfiguration(pub(crate) &'static str);
