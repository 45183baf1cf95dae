//! Retrieval of SMP metadata documents.
//!
//! A fetch either yields a well-formed XML document, reports that nothing is
//! published at the URL, or fails. Absence is an expected outcome and is not
//! an error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ConfigError, FetchError};

/// Raw text of a metadata document that has been checked to be well-formed XML
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataXml(String);

impl MetadataXml {
    pub fn parse(text: String) -> Result<Self, FetchError> {
        roxmltree::Document::parse(&text).map_err(|e| FetchError::MalformedXml(e.to_string()))?;
        Ok(Self(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Found(MetadataXml),
    NotFound,
}

/// Source of SMP metadata documents
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError>;
}

/// Fetches metadata over plain HTTP GET with a bounded per-request timeout
#[derive(Debug, Clone)]
pub struct HttpMetadataFetcher {
    client: Client,
}

impl HttpMetadataFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client; the caller owns its timeout and pool settings
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn classify(url: &Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_connect() {
        FetchError::Unreachable(url.host_str().unwrap_or_default().to_string())
    } else {
        FetchError::Request(error)
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        tracing::debug!(%url, "fetching SMP metadata");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            tracing::debug!(%url, "nothing published");
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| classify(url, e))?;
        if body.trim().is_empty() {
            return Ok(FetchOutcome::NotFound);
        }

        Ok(FetchOutcome::Found(MetadataXml::parse(body)?))
    }
}

/// Runs one fetch under an optional deadline and cancellation token
pub(crate) async fn fetch_bounded(
    fetcher: &dyn MetadataFetcher,
    url: &Url,
    deadline: Option<Instant>,
    cancellation: Option<&CancellationToken>,
) -> Result<FetchOutcome, FetchError> {
    let fetch = async {
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fetcher.fetch(url))
                .await
                .map_err(|_| FetchError::Timeout)?,
            None => fetcher.fetch(url).await,
        }
    };

    match cancellation {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled),
            outcome = fetch => outcome,
        },
        None => fetch.await,
    }
}
