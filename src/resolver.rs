//! Core endpoint resolution.
//!
//! This module composes the SML/SMP lookup: confirm the participant through
//! its service group, fetch the signed service metadata (following at most one
//! redirect), verify it, and pick the endpoint of the requested process.

use std::sync::Arc;

use base64::Engine;
use tokio::time::Instant;
use url::Url;

use crate::config::{ResolverConfig, TrustAnchorSet};
use crate::error::{ConfigError, ResolutionError};
use crate::fetcher::{fetch_bounded, FetchOutcome, HttpMetadataFetcher, MetadataFetcher};
use crate::locator::{service_group_url, signed_service_url};
use crate::metadata::parse_service_group;
use crate::redirect::RedirectResolver;
use crate::types::{ProcessIdentifier, ResolutionOptions, ResolutionRequest, ResolvedEndpoint, ServiceInformation};

/// Resolves recipients to their access point address and certificate.
///
/// Holds no per-request state and may be shared across tasks.
#[derive(Clone)]
pub struct Resolver {
    /// Source of SMP documents
    fetcher: Arc<dyn MetadataFetcher>,
    /// Pinned CAs and trust material, shared read-only
    anchors: Arc<TrustAnchorSet>,
    sml_domain: String,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn MetadataFetcher>, anchors: Arc<TrustAnchorSet>, sml_domain: impl Into<String>) -> Self {
        Self {
            fetcher,
            anchors,
            sml_domain: sml_domain.into(),
        }
    }

    /// Builds an HTTP-backed resolver, loading trust material named by `config`
    pub fn from_config(config: &ResolverConfig) -> Result<Self, ConfigError> {
        let fetcher = HttpMetadataFetcher::new(config.fetch_timeout())?;
        let anchors = TrustAnchorSet::from_config(&config.trust)?;
        Ok(Self::new(Arc::new(fetcher), Arc::new(anchors), config.sml_domain.clone()))
    }

    pub fn sml_domain(&self) -> &str {
        &self.sml_domain
    }

    pub fn anchors(&self) -> &Arc<TrustAnchorSet> {
        &self.anchors
    }

    /// Resolves the endpoint a document must be delivered to
    ///
    /// # Arguments
    /// * `request` - Recipient, document type and process
    /// * `options` - Deadline and cancellation for the fetches of this resolution
    ///
    /// # Example
    /// ```no_run
    /// use peppol_start_resolver::{
    ///     DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier,
    ///     ResolutionOptions, ResolutionRequest, Resolver, ResolverConfig,
    /// };
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let resolver = Resolver::from_config(&ResolverConfig::from_yaml_file("resolver.yaml")?)?;
    ///     let request = ResolutionRequest {
    ///         participant: ParticipantIdentifier::new("iso6523-actorid-upis", "9902:dk87654321"),
    ///         document_type: DocumentTypeIdentifier::new("busdox-docid-qns", "urn:invoice"),
    ///         process: ProcessIdentifier::new("cenbii-procid-ubl", "urn:www.cenbii.eu:profile:bii04:ver1.0"),
    ///     };
    ///     let endpoint = resolver.resolve(&request, ResolutionOptions::default()).await?;
    ///     println!("Deliver to {}", endpoint.address);
    ///     Ok(())
    /// }
    /// ```
    pub async fn resolve(
        &self,
        request: &ResolutionRequest,
        options: ResolutionOptions,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let result = self.resolve_endpoint(request, &options).await;
        if let Err(error) = &result {
            tracing::warn!(
                fault = error.fault_code().subcode(),
                participant = %request.participant,
                document_type = %request.document_type,
                %error,
                "resolution failed"
            );
        }
        result
    }

    async fn resolve_endpoint(
        &self,
        request: &ResolutionRequest,
        options: &ResolutionOptions,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let deadline = options.deadline.map(|budget| Instant::now() + budget);
        let cancellation = options.cancellation.as_ref();

        // Participant existence
        let group_url = service_group_url(&request.participant, &self.sml_domain)
            .map_err(|e| ResolutionError::ServerError(format!("invalid service group URL: {e}").into()))?;
        match fetch_bounded(self.fetcher.as_ref(), &group_url, deadline, cancellation).await? {
            FetchOutcome::NotFound => return Err(ResolutionError::ChannelFull),
            FetchOutcome::Found(xml) => {
                let group = parse_service_group(&xml)?;
                tracing::debug!(
                    participant = %group.participant,
                    references = group.service_metadata_references.len(),
                    "participant registered"
                );
            }
        }

        let metadata_url = signed_service_url(&request.participant, &self.sml_domain, &request.document_type)
            .map_err(|e| ResolutionError::ServerError(format!("invalid signed service URL: {e}").into()))?;
        let verified = RedirectResolver::new(self.fetcher.as_ref(), &self.anchors)
            .with_deadline(deadline)
            .with_cancellation(cancellation)
            .resolve(metadata_url)
            .await?;

        select_endpoint(&verified.information, &request.process)
    }
}

/// Address and certificate of the first endpoint of the matching process
pub fn select_endpoint(
    information: &ServiceInformation,
    process: &ProcessIdentifier,
) -> Result<ResolvedEndpoint, ResolutionError> {
    let entry = information
        .process(process)
        .ok_or_else(|| ResolutionError::UnknownEndpoint(format!("no process {process} in metadata").into()))?;
    let endpoint = entry
        .endpoints
        .first()
        .ok_or(ResolutionError::UnknownEndpoint("process lists no endpoint".into()))?;

    let address = endpoint
        .address
        .as_deref()
        .ok_or(ResolutionError::UnknownEndpoint("endpoint has no address".into()))?;
    let address = Url::parse(address)
        .map_err(|e| ResolutionError::UnknownEndpoint(format!("invalid endpoint address {address}: {e}").into()))?;

    let certificate = endpoint
        .certificate
        .as_deref()
        .ok_or(ResolutionError::UnknownEndpoint("endpoint has no certificate".into()))?;
    let certificate: String = certificate.chars().filter(|c| !c.is_whitespace()).collect();
    let certificate = base64::engine::general_purpose::STANDARD
        .decode(certificate)
        .map_err(|_| ResolutionError::UnknownEndpoint("endpoint certificate is not valid base64".into()))?;

    Ok(ResolvedEndpoint { address, certificate })
}
