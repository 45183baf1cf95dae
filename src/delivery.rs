//! The outbound hand-off to a recipient access point.
//!
//! The SOAP channel that actually carries a message is not part of this
//! crate; it plugs in through [`DeliveryTransport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::types::{DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier, ResolvedEndpoint};

/// A business document on its way to the recipient's access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub channel_id: Option<String>,
    pub sender: ParticipantIdentifier,
    pub recipient: ParticipantIdentifier,
    pub document_type: DocumentTypeIdentifier,
    pub process: ProcessIdentifier,
    /// The XML business document
    pub document: String,
    /// Serialized sender-vouches assertion, issued by the sending access point
    pub sender_assertion: Option<String>,
}

/// Carries a message to a resolved endpoint
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, endpoint: &ResolvedEndpoint, message: &OutboundMessage) -> Result<(), DeliveryError>;
}
