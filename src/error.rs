//! Error types for endpoint discovery and trust validation.
//!
//! Every component reports failures through its own error enum. The
//! orchestrator maps each of them onto [`ResolutionError`], whose variants are
//! the protocol fault kinds a sending access point reports back to its client.
//! Callers of [`crate::Resolver::resolve`] only ever see `ResolutionError`.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// The `bden:` SOAP fault subcodes raised by the access point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultCode {
    UnknownEndpoint,
    SecurityFault,
    ChannelFull,
    DocumentTypeNotAccepted,
    ServerError,
}

impl FaultCode {
    /// Namespace the subcodes are qualified with on the wire
    pub const NAMESPACE: &'static str = "http://bden";

    /// The qualified subcode, e.g. `bden:SecurityFault`
    pub fn subcode(&self) -> &'static str {
        match self {
            FaultCode::UnknownEndpoint => "bden:UnknownEndpoint",
            FaultCode::SecurityFault => "bden:SecurityFault",
            FaultCode::ChannelFull => "bden:ChannelFull",
            FaultCode::DocumentTypeNotAccepted => "bden:DocumentTypeNotAccepted",
            FaultCode::ServerError => "bden:ServerError",
        }
    }
}

impl fmt::Display for FaultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.subcode())
    }
}

/// A transport-neutral fault record, serialized by the SOAP layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: FaultCode,
    pub reason: String,
}

/// Terminal outcome of a failed resolution or delivery attempt
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The participant is not registered in the SML/SMP
    #[error("The channel is not accepting messages for this destination")]
    ChannelFull,

    /// The recipient publishes no metadata for the requested document type
    #[error("The recipient does not accept documents of this type")]
    DocumentTypeNotAccepted,

    /// Metadata has no usable endpoint, or the host could not be reached
    #[error("The endpoint is not known: {0}")]
    UnknownEndpoint(Cow<'static, str>),

    /// Signature, chain, redirect or issuer checks failed
    #[error("Security fault: {0}")]
    SecurityFault(Cow<'static, str>),

    /// Any other I/O or parsing failure
    #[error("Server error: {0}")]
    ServerError(Cow<'static, str>),
}

impl ResolutionError {
    pub fn fault_code(&self) -> FaultCode {
        match self {
            ResolutionError::ChannelFull => FaultCode::ChannelFull,
            ResolutionError::DocumentTypeNotAccepted => FaultCode::DocumentTypeNotAccepted,
            ResolutionError::UnknownEndpoint(_) => FaultCode::UnknownEndpoint,
            ResolutionError::SecurityFault(_) => FaultCode::SecurityFault,
            ResolutionError::ServerError(_) => FaultCode::ServerError,
        }
    }

    pub fn to_fault(&self) -> Fault {
        Fault {
            code: self.fault_code(),
            reason: self.to_string(),
        }
    }
}

/// Failures while retrieving a metadata document
#[derive(Error, Debug)]
pub enum FetchError {
    /// DNS resolution or TCP connect failed
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// Non-success HTTP status other than 404
    #[error("HTTP {0} when fetching metadata")]
    Status(u16),

    /// The body was not well-formed XML
    #[error("malformed metadata document: {0}")]
    MalformedXml(String),

    #[error("request timed out")]
    Timeout,

    #[error("resolution cancelled")]
    Cancelled,

    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// Failures while interpreting a well-formed metadata document
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("unexpected root element {0}")]
    UnexpectedRoot(String),

    #[error("missing element {0}")]
    MissingElement(&'static str),

    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("document carries neither Redirect nor ServiceInformation")]
    EmptyServiceMetadata,

    #[error("invalid URL {0}: {1}")]
    InvalidUrl(String, url::ParseError),
}

/// Failures of XML-DSig verification. All of them surface as a security fault.
#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Two elements carry the same `Id`, so a reference could point at either
    #[error("duplicate element identifier: {0}")]
    DuplicateId(String),

    #[error("missing element {0}")]
    MissingElement(&'static str),

    #[error("missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported reference URI {0}")]
    UnsupportedReference(String),

    /// The reference selects something other than the whole document
    #[error("reference {0:?} does not cover the document element")]
    UncoveredDocument(String),

    #[error("canonicalization failed: {0}")]
    Canonicalization(String),

    #[error("base64 decoding failed for {0}")]
    Base64(&'static str),

    #[error("no X509Certificate in KeyInfo")]
    MissingCertificate,

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("digest mismatch for reference {0:?}")]
    DigestMismatch(String),

    #[error("signature value does not verify")]
    SignatureMismatch,
}

/// Failures of X.509 chain validation
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Validation failed. No certificate to validate.")]
    NoCertificate,

    #[error("Validation failed. Chain could not be built: {0}")]
    ChainNotBuilt(Cow<'static, str>),

    #[error("Validation failed. Issued by the wrong CA.")]
    WrongIssuer,

    #[error("Validation failed. Certificate in response does not match metadata.")]
    CertificateMismatch,

    /// The redirect target was signed by a certificate other than the one announced
    #[error("certificate UID mismatch: expected {expected}, found {actual}")]
    UidMismatch { expected: String, actual: String },
}

/// Failures of the flat-file message store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Identifier '{0}' contains illegal, potentially unsecure characters")]
    IllegalIdentifier(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize metadata: {0}")]
    Serialize(String),
}

/// Failures reported by a delivery transport
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("delivery to {0} failed: {1}")]
    Transport(String, String),

    #[error("recipient rejected the message: {0}")]
    Rejected(String),
}

/// Failures while loading configuration or trust material
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {0}: {1}")]
    Io(String, std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid certificate in {0}: {1}")]
    InvalidCertificate(String, String),

    #[error("invalid CRL in {0}: {1}")]
    InvalidCrl(String, String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl From<FetchError> for ResolutionError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Unreachable(host) => {
                ResolutionError::UnknownEndpoint(format!("host unreachable: {host}").into())
            }
            other => ResolutionError::ServerError(other.to_string().into()),
        }
    }
}

impl From<MetadataError> for ResolutionError {
    fn from(error: MetadataError) -> Self {
        ResolutionError::ServerError(error.to_string().into())
    }
}

impl From<ConfigError> for ResolutionError {
    fn from(error: ConfigError) -> Self {
        ResolutionError::ServerError(error.to_string().into())
    }
}

impl From<SignatureError> for ResolutionError {
    fn from(error: SignatureError) -> Self {
        ResolutionError::SecurityFault(error.to_string().into())
    }
}

impl From<ChainError> for ResolutionError {
    fn from(error: ChainError) -> Self {
        ResolutionError::SecurityFault(error.to_string().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_subcodes() {
        assert_eq!(FaultCode::ChannelFull.subcode(), "bden:ChannelFull");
        assert_eq!(
            ResolutionError::SecurityFault("x".into()).fault_code().subcode(),
            "bden:SecurityFault"
        );
        assert_eq!(
            ResolutionError::DocumentTypeNotAccepted.to_fault().code,
            FaultCode::DocumentTypeNotAccepted
        );
    }

    #[test]
    fn test_fetch_error_mapping() {
        let unreachable: ResolutionError = FetchError::Unreachable("b-abc.example".into()).into();
        assert!(matches!(unreachable, ResolutionError::UnknownEndpoint(_)));

        let status: ResolutionError = FetchError::Status(500).into();
        assert!(matches!(status, ResolutionError::ServerError(_)));

        let timeout: ResolutionError = FetchError::Timeout.into();
        assert!(matches!(timeout, ResolutionError::ServerError(_)));
    }

    #[test]
    fn test_security_mappings() {
        let chain: ResolutionError = ChainError::WrongIssuer.into();
        assert!(matches!(chain, ResolutionError::SecurityFault(_)));

        let sig: ResolutionError = SignatureError::SignatureMismatch.into();
        assert_eq!(sig.fault_code(), FaultCode::SecurityFault);

        let wrapped: ResolutionError = SignatureError::UncoveredDocument("#side".into()).into();
        assert!(matches!(wrapped, ResolutionError::SecurityFault(_)));
    }
}
