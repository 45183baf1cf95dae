//! Signed service metadata retrieval with at most one redirect.
//!
//! The first document either carries the service information itself, in which
//! case its signature and signer chain are checked in place, or redirects to a
//! second SMP. The redirect target must not redirect again, must verify
//! against the SMP-CA hierarchy, and its signer must carry the subject unique
//! identifier the first document announced.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::TrustAnchorSet;
use crate::error::ResolutionError;
use crate::fetcher::{fetch_bounded, FetchOutcome, MetadataFetcher, MetadataXml};
use crate::metadata::parse_signed_service_metadata;
use crate::types::{ServiceInformation, ServiceMetadataDocument};
use crate::verification::{check_subject_uid, subject_unique_identifier, verify_metadata};

/// Service information whose signature and signer have been checked
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMetadata {
    pub information: ServiceInformation,
    /// DER of the SMP certificate that signed the document
    pub signer: Vec<u8>,
    /// Whether the information came from a redirect target
    pub redirected: bool,
}

#[derive(Debug)]
pub enum RedirectState {
    Initial {
        url: Url,
    },
    FirstFetched {
        xml: MetadataXml,
        document: ServiceMetadataDocument,
    },
    Redirected {
        href: Url,
        certificate_uid: String,
    },
    Verified(VerifiedMetadata),
    Failed(ResolutionError),
}

impl RedirectState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RedirectState::Verified(_) | RedirectState::Failed(_))
    }
}

pub struct RedirectResolver<'a> {
    fetcher: &'a dyn MetadataFetcher,
    anchors: &'a Arc<TrustAnchorSet>,
    deadline: Option<Instant>,
    cancellation: Option<&'a CancellationToken>,
}

impl<'a> RedirectResolver<'a> {
    pub fn new(fetcher: &'a dyn MetadataFetcher, anchors: &'a Arc<TrustAnchorSet>) -> Self {
        Self {
            fetcher,
            anchors,
            deadline: None,
            cancellation: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, cancellation: Option<&'a CancellationToken>) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Drives the state machine from the signed-service URL to a terminal state
    pub async fn resolve(&self, url: Url) -> Result<VerifiedMetadata, ResolutionError> {
        let mut state = RedirectState::Initial { url };
        loop {
            state = match state {
                RedirectState::Verified(metadata) => return Ok(metadata),
                RedirectState::Failed(error) => return Err(error),
                other => self.step(other).await,
            };
        }
    }

    /// Performs one transition
    pub async fn step(&self, state: RedirectState) -> RedirectState {
        match state {
            RedirectState::Initial { url } => match self.fetch_document(&url).await {
                Ok((xml, document)) => RedirectState::FirstFetched { xml, document },
                Err(error) => RedirectState::Failed(error),
            },
            RedirectState::FirstFetched { xml, document } => match document {
                ServiceMetadataDocument::Redirect { href, certificate_uid } => {
                    tracing::info!(%href, %certificate_uid, "following SMP redirect");
                    RedirectState::Redirected { href, certificate_uid }
                }
                ServiceMetadataDocument::ServiceInformation(information) => {
                    match verify_metadata(xml.as_str(), self.anchors) {
                        Ok(signer) => RedirectState::Verified(VerifiedMetadata {
                            information,
                            signer,
                            redirected: false,
                        }),
                        Err(error) => RedirectState::Failed(error),
                    }
                }
            },
            RedirectState::Redirected { href, certificate_uid } => {
                match self.follow(&href, &certificate_uid).await {
                    Ok(metadata) => RedirectState::Verified(metadata),
                    Err(error) => RedirectState::Failed(error),
                }
            }
            terminal => terminal,
        }
    }

    async fn follow(&self, href: &Url, certificate_uid: &str) -> Result<VerifiedMetadata, ResolutionError> {
        let (xml, document) = self.fetch_document(href).await?;
        let information = match document {
            ServiceMetadataDocument::Redirect { .. } => {
                return Err(ResolutionError::SecurityFault(
                    "More than one redirection was found in metadata for participant".into(),
                ))
            }
            ServiceMetadataDocument::ServiceInformation(information) => information,
        };

        let signer = verify_metadata(xml.as_str(), self.anchors)?;
        let uid = subject_unique_identifier(&signer).map_err(|e| ResolutionError::SecurityFault(e.into()))?;
        check_subject_uid(certificate_uid, uid.as_deref())?;

        Ok(VerifiedMetadata {
            information,
            signer,
            redirected: true,
        })
    }

    async fn fetch_document(&self, url: &Url) -> Result<(MetadataXml, ServiceMetadataDocument), ResolutionError> {
        match fetch_bounded(self.fetcher, url, self.deadline, self.cancellation).await? {
            FetchOutcome::Found(xml) => {
                let document = parse_signed_service_metadata(&xml)?;
                Ok((xml, document))
            }
            FetchOutcome::NotFound => Err(ResolutionError::DocumentTypeNotAccepted),
        }
    }
}
