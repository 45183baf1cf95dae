//! Core types for endpoint discovery.
//!
//! This module provides the identifier value types, the parsed shapes of the
//! SMP metadata documents, and the request/response types of resolution.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

macro_rules! scheme_value_identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name {
            pub scheme: String,
            pub value: String,
        }

        impl $name {
            pub fn new(scheme: impl Into<String>, value: impl Into<String>) -> Self {
                Self {
                    scheme: scheme.into(),
                    value: value.into(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}::{}", self.scheme, self.value)
            }
        }
    };
}

scheme_value_identifier!(
    /// A scheme-qualified business participant, e.g. `iso6523-actorid-upis::9902:dk87654321`.
    ///
    /// The value is kept as given; only the DNS label derived from it is lowercased.
    ParticipantIdentifier
);

scheme_value_identifier!(
    /// Identifies a document type (document and customization semantics)
    DocumentTypeIdentifier
);

scheme_value_identifier!(
    /// Identifies a business process; selects among `<Process>` entries in metadata
    ProcessIdentifier
);

/// Parsed `ServiceGroup` document, fetched to confirm a participant exists
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceGroup {
    pub participant: ParticipantIdentifier,
    /// `ServiceMetadataReference/@href` values
    pub service_metadata_references: Vec<String>,
}

/// The body of a `SignedServiceMetadata` document. Exactly one shape is present.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceMetadataDocument {
    /// Delegates to another SMP
    Redirect {
        href: Url,
        /// Subject unique identifier the target SMP's signing certificate must carry
        certificate_uid: String,
    },
    ServiceInformation(ServiceInformation),
}

impl ServiceMetadataDocument {
    pub fn is_redirect(&self) -> bool {
        matches!(self, ServiceMetadataDocument::Redirect { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInformation {
    pub participant: Option<ParticipantIdentifier>,
    pub document_type: Option<DocumentTypeIdentifier>,
    pub processes: Vec<Process>,
}

impl ServiceInformation {
    /// Finds the process entry whose identifier matches `process` exactly
    pub fn process(&self, process: &ProcessIdentifier) -> Option<&Process> {
        self.processes.iter().find(|p| &p.identifier == process)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    pub identifier: ProcessIdentifier,
    pub endpoints: Vec<Endpoint>,
}

/// One `<Endpoint>` of a process' `ServiceEndpointList`
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub transport_profile: Option<String>,
    /// `wsa:EndpointReference/wsa:Address`
    pub address: Option<String>,
    pub require_business_level_signature: Option<bool>,
    pub minimum_authentication_level: Option<String>,
    pub service_activation_date: Option<DateTime<Utc>>,
    pub service_expiration_date: Option<DateTime<Utc>>,
    /// Base64 DER of the recipient AP's signing certificate
    pub certificate: Option<String>,
    pub service_description: Option<String>,
    pub technical_contact_url: Option<String>,
    pub technical_information_url: Option<String>,
}

/// Where and to whom a document must be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub address: Url,
    /// DER bytes of the recipient AP's certificate
    pub certificate: Vec<u8>,
}

/// A single resolution request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub participant: ParticipantIdentifier,
    pub document_type: DocumentTypeIdentifier,
    pub process: ProcessIdentifier,
}

/// Options for one resolution
#[derive(Debug, Clone, Default)]
pub struct ResolutionOptions {
    /// Overall time budget covering every fetch of this resolution
    pub deadline: Option<Duration>,

    /// Aborts in-flight fetches when cancelled
    pub cancellation: Option<CancellationToken>,
}
