//! Endpoint discovery and trust validation for a PEPPOL/START access point.
//!
//! This library resolves a recipient participant to the address and
//! certificate of its access point through the SML/SMP infrastructure. The
//! signed service metadata is verified (XML-DSig) and its signer validated
//! against the pinned PEPPOL CA hierarchy before any endpoint is trusted.
//! Faults are reported with the START `bden:` taxonomy.

mod access_point;
mod config;
mod delivery;
mod error;
mod fetcher;
mod locator;
mod metadata;
mod redirect;
mod resolver;
mod store;
mod types;
pub mod verification;

pub use access_point::{is_ping, AccessPoint, Received, DEFAULT_MESSAGE_STORE_DIR, START_NS};
pub use config::{
    ResolverConfig,
    RevocationList,
    RevocationMode,
    TrustAnchorSet,
    TrustConfig,
    DEFAULT_SML_DOMAIN,
};
pub use delivery::{DeliveryTransport, OutboundMessage};
pub use error::{
    ChainError,
    ConfigError,
    DeliveryError,
    Fault,
    FaultCode,
    FetchError,
    MetadataError,
    ResolutionError,
    SignatureError,
    StoreError,
};
pub use fetcher::{FetchOutcome, HttpMetadataFetcher, MetadataFetcher, MetadataXml};
pub use locator::{participant_hash, service_group_url, signed_service_url};
pub use metadata::{ns, parse_service_group, parse_signed_service_metadata};
pub use redirect::{RedirectResolver, RedirectState, VerifiedMetadata};
pub use resolver::{select_endpoint, Resolver};
pub use store::{FileMessageStore, InboundMessage, MessageStore};
pub use types::{
    DocumentTypeIdentifier,
    Endpoint,
    ParticipantIdentifier,
    Process,
    ProcessIdentifier,
    ResolutionOptions,
    ResolutionRequest,
    ResolvedEndpoint,
    ServiceGroup,
    ServiceInformation,
    ServiceMetadataDocument,
};
pub use verification::{CertificateChainValidator, TrustDomain};

/// Resolves the access point endpoint for a recipient, document type and process
///
/// Builds an HTTP-backed [`Resolver`] from `config` for this single call. Keep a
/// [`Resolver`] around instead when resolving repeatedly.
///
/// # Arguments
/// * `config` - SML domain, fetch timeout and trust material
/// * `request` - Recipient, document type and process
/// * `options` - Deadline and cancellation
///
/// # Example
/// ```no_run
/// use peppol_start_resolver::{
///     resolve, DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier,
///     ResolutionOptions, ResolutionRequest, ResolverConfig,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ResolverConfig::from_yaml_file("resolver.yaml")?;
///     let endpoint = resolve(
///         &config,
///         &ResolutionRequest {
///             participant: ParticipantIdentifier::new("iso6523-actorid-upis", "9902:dk87654321"),
///             document_type: DocumentTypeIdentifier::new("busdox-docid-qns", "urn:invoice"),
///             process: ProcessIdentifier::new("cenbii-procid-ubl", "urn:www.cenbii.eu:profile:bii04:ver1.0"),
///         },
///         ResolutionOptions::default(),
///     ).await?;
///
///     println!("Access point: {}", endpoint.address);
///     Ok(())
/// }
/// ```
pub async fn resolve(
    config: &ResolverConfig,
    request: &ResolutionRequest,
    options: ResolutionOptions,
) -> Result<ResolvedEndpoint, ResolutionError> {
    Resolver::from_config(config)?.resolve(request, options).await
}
