//! Configuration download over HTTP

use async_trait::async_trait;
use reqwest::{
    header::{self, HeaderValue},
    Client, StatusCode,
};

use super::{ConfigIngestion, FetchOutcome};
use crate::{error::IngestionError, AuthConfig, ConfigSnapshot, Fingerprint, FingerprintRef};

/// Downloads configuration documents with conditional `GET` requests
///
/// The fingerprint is sent as `If-None-Match`, and the `ETag` of a fresh
/// response becomes the new snapshot's fingerprint.
#[derive(Clone, Debug)]
pub struct HttpConfigIngestion {
    client: Client,
}

impl HttpConfigIngestion {
    /// Wraps an existing HTTP client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client with this crate's user agent
    pub fn with_default_client() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("tollgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl ConfigIngestion for HttpConfigIngestion {
    #[tracing::instrument(
        err,
        skip(self, known_fingerprint),
        fields(known_fingerprint = tracing::field::Empty)
    )]
    async fn fetch(
        &self,
        url: &str,
        known_fingerprint: Option<&FingerprintRef>,
    ) -> Result<FetchOutcome, IngestionError> {
        let mut request = self.client.get(url);

        if let Some(fingerprint) = known_fingerprint {
            tracing::Span::current().record("known_fingerprint", fingerprint.as_str());
            match HeaderValue::from_str(fingerprint.as_str()) {
                Ok(value) => request = request.header(header::IF_NONE_MATCH, value),
                Err(_) => {
                    tracing::debug!("cached fingerprint is not a valid header value, downloading unconditionally")
                }
            }
        }

        tracing::trace!("requesting configuration");
        let response = request
            .send()
            .await
            .map_err(|err| IngestionError::RequestSend(err.into()))?;

        tracing::debug!(
            response.status = response.status().as_u16(),
            "received configuration response"
        );

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchOutcome::NotModified);
        }

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| IngestionError::BodyRead(err.into()))?;
            return Err(IngestionError::UnexpectedStatus { status, body });
        }

        let fingerprint = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| Fingerprint::new(v.to_owned()));

        let body = response
            .bytes()
            .await
            .map_err(|err| IngestionError::BodyRead(err.into()))?;
        let config: AuthConfig = serde_json::from_slice(&body)
            .map_err(|err| IngestionError::InvalidDocument(err.into()))?;
        config
            .validate()
            .map_err(|err| IngestionError::InvalidDocument(err.into()))?;

        tracing::info!(
            fingerprint = fingerprint.as_ref().map(|f| f.as_str()),
            "downloaded new configuration"
        );

        Ok(FetchOutcome::Modified(ConfigSnapshot::new(config, fingerprint)))
    }
}
