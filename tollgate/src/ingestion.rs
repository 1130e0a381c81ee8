//! Remote download of configuration documents

use async_trait::async_trait;

use crate::{error::IngestionError, ConfigSnapshot, FingerprintRef};

#[cfg(feature = "reqwest")]
pub mod http;

#[cfg(feature = "reqwest")]
pub use http::HttpConfigIngestion;

/// The result of a conditional configuration download
#[derive(Debug)]
pub enum FetchOutcome {
    /// A new document was downloaded
    Modified(ConfigSnapshot),
    /// The known fingerprint is still current
    NotModified,
}

/// An asynchronous source of configuration documents
///
/// Implementations do not retry. A failed download is reported as-is and it
/// is up to the caller to decide whether to try again.
#[async_trait]
pub trait ConfigIngestion: Send + Sync {
    /// Downloads the configuration at `url`
    ///
    /// If `known_fingerprint` is provided and still matches the remote
    /// document, [`FetchOutcome::NotModified`] is returned.
    async fn fetch(
        &self,
        url: &str,
        known_fingerprint: Option<&FingerprintRef>,
    ) -> Result<FetchOutcome, IngestionError>;
}
