//! Access point facade.
//!
//! Ties resolution to the delivery and storage collaborators: outbound
//! documents are resolved, their recipient certificate is checked against the
//! AP-CA hierarchy and handed to the transport; inbound documents are
//! acknowledged (ping) or persisted.

use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::delivery::{DeliveryTransport, OutboundMessage};
use crate::error::{ConfigError, ResolutionError};
use crate::resolver::Resolver;
use crate::store::{FileMessageStore, InboundMessage, MessageStore};
use crate::types::{ResolutionOptions, ResolutionRequest, ResolvedEndpoint};
use crate::verification::{CertificateChainValidator, TrustDomain};

/// Namespace of the START transport messages
pub const START_NS: &str = "http://busdox.org/transport/start/1.0/";

/// Store root used when the configuration names none
pub const DEFAULT_MESSAGE_STORE_DIR: &str = "MessageStore";

const PING_SENDER: (&str, &str) = ("busdox-actorid-transport", "busdox:sender");
const PING_RECIPIENT: (&str, &str) = ("busdox-actorid-transport", "busdox:recipient");
const PING_DOCUMENT: (&str, &str) = ("busdox-docid-qns", "busdox:ping");
const PING_PROCESS: (&str, &str) = ("busdox-procid-transport", "busdox:noprocess");

/// What happened to an accepted inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// A START ping; acknowledged, nothing stored
    Ping,
    Stored,
}

pub struct AccessPoint {
    resolver: Resolver,
    transport: Arc<dyn DeliveryTransport>,
    store: Arc<dyn MessageStore>,
}

impl AccessPoint {
    pub fn new(resolver: Resolver, transport: Arc<dyn DeliveryTransport>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            resolver,
            transport,
            store,
        }
    }

    /// HTTP resolution plus a flat-file store under `message_store_dir`
    pub fn from_config(config: &ResolverConfig, transport: Arc<dyn DeliveryTransport>) -> Result<Self, ConfigError> {
        let root = config
            .message_store_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_MESSAGE_STORE_DIR.into());
        Ok(Self::new(
            Resolver::from_config(config)?,
            transport,
            Arc::new(FileMessageStore::new(root)),
        ))
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Resolves the recipient of `message` and delivers it there
    ///
    /// Returns the endpoint the message was handed to.
    pub async fn send(
        &self,
        message: &OutboundMessage,
        options: ResolutionOptions,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let request = ResolutionRequest {
            participant: message.recipient.clone(),
            document_type: message.document_type.clone(),
            process: message.process.clone(),
        };
        let endpoint = self.resolver.resolve(&request, options).await?;

        let result = self.deliver(&endpoint, message).await;
        if let Err(error) = &result {
            tracing::warn!(
                fault = error.fault_code().subcode(),
                message = %message.message_id,
                endpoint = %endpoint.address,
                %error,
                "delivery failed"
            );
        }
        result.map(|()| endpoint)
    }

    async fn deliver(&self, endpoint: &ResolvedEndpoint, message: &OutboundMessage) -> Result<(), ResolutionError> {
        CertificateChainValidator::new(Arc::clone(self.resolver.anchors()), TrustDomain::AccessPointCA)
            .validate(&endpoint.certificate)?;

        self.transport
            .deliver(endpoint, message)
            .await
            .map_err(|e| ResolutionError::ServerError(e.to_string().into()))?;

        tracing::info!(message = %message.message_id, endpoint = %endpoint.address, "message delivered");
        Ok(())
    }

    /// Checks the certificate a recipient access point presented against the one
    /// published for it in metadata
    pub fn verify_peer(&self, endpoint: &ResolvedEndpoint, presented: &[u8]) -> Result<(), ResolutionError> {
        CertificateChainValidator::new(Arc::clone(self.resolver.anchors()), TrustDomain::AccessPointCA)
            .with_expected_certificate(endpoint.certificate.clone())
            .validate(presented)?;
        Ok(())
    }

    /// Accepts a message from a sending access point
    pub async fn receive(&self, message: InboundMessage) -> Result<Received, ResolutionError> {
        if message.document.trim().is_empty() {
            tracing::warn!(message = %message.message_id, fault = "bden:ServerError", "empty message body");
            return Err(ResolutionError::ServerError("ServerError".into()));
        }

        if is_ping(&message) {
            tracing::debug!(message = %message.message_id, "ping acknowledged");
            return Ok(Received::Ping);
        }

        if let Err(error) = self.store.save(&message).await {
            tracing::warn!(
                fault = "bden:SecurityFault",
                message = %message.message_id,
                channel = %message.channel_id,
                %error,
                "failed to persist message"
            );
            return Err(ResolutionError::SecurityFault(
                "There is a security error in processing this request".into(),
            ));
        }
        Ok(Received::Stored)
    }
}

/// Whether `message` is the START ping: a `Ping` body with the fixed transport identifiers
pub fn is_ping(message: &InboundMessage) -> bool {
    let identifiers = (message.sender.scheme.as_str(), message.sender.value.as_str()) == PING_SENDER
        && (message.recipient.scheme.as_str(), message.recipient.value.as_str()) == PING_RECIPIENT
        && (message.document_type.scheme.as_str(), message.document_type.value.as_str()) == PING_DOCUMENT
        && (message.process.scheme.as_str(), message.process.value.as_str()) == PING_PROCESS;
    if !identifiers {
        return false;
    }

    match roxmltree::Document::parse(&message.document) {
        Ok(doc) => {
            let root = doc.root_element();
            root.tag_name().name() == "Ping" && root.tag_name().namespace() == Some(START_NS)
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustAnchorSet;
    use crate::error::{DeliveryError, FetchError, StoreError};
    use crate::fetcher::{FetchOutcome, MetadataFetcher};
    use crate::types::{DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use url::Url;

    struct Nothing;

    #[async_trait]
    impl MetadataFetcher for Nothing {
        async fn fetch(&self, _url: &Url) -> Result<FetchOutcome, FetchError> {
            Ok(FetchOutcome::NotFound)
        }
    }

    struct Unused;

    #[async_trait]
    impl DeliveryTransport for Unused {
        async fn deliver(&self, _endpoint: &ResolvedEndpoint, _message: &OutboundMessage) -> Result<(), DeliveryError> {
            Err(DeliveryError::Rejected("not expected".into()))
        }
    }

    #[derive(Default)]
    struct Recording {
        saved: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageStore for Recording {
        async fn save(&self, message: &InboundMessage) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::IllegalIdentifier(message.channel_id.clone()));
            }
            self.saved.lock().unwrap().push(message.message_id.clone());
            Ok(())
        }

        async fn exists(&self, _channel_id: &str, message_id: &str) -> Result<bool, StoreError> {
            Ok(self.saved.lock().unwrap().iter().any(|id| id == message_id))
        }
    }

    fn access_point(store: Arc<Recording>) -> AccessPoint {
        let resolver = Resolver::new(Arc::new(Nothing), Arc::new(TrustAnchorSet::default()), "sml.example.org");
        AccessPoint::new(resolver, Arc::new(Unused), store)
    }

    fn ping() -> InboundMessage {
        InboundMessage {
            message_id: "ping-1".into(),
            channel_id: "channel".into(),
            sender: ParticipantIdentifier::new(PING_SENDER.0, PING_SENDER.1),
            recipient: ParticipantIdentifier::new(PING_RECIPIENT.0, PING_RECIPIENT.1),
            document_type: DocumentTypeIdentifier::new(PING_DOCUMENT.0, PING_DOCUMENT.1),
            process: ProcessIdentifier::new(PING_PROCESS.0, PING_PROCESS.1),
            document: format!(r#"<Ping xmlns="{START_NS}"/>"#),
        }
    }

    fn invoice() -> InboundMessage {
        InboundMessage {
            message_id: "invoice-1".into(),
            channel_id: "channel".into(),
            sender: ParticipantIdentifier::new("iso6523-actorid-upis", "9902:dk11111111"),
            recipient: ParticipantIdentifier::new("iso6523-actorid-upis", "9902:dk87654321"),
            document_type: DocumentTypeIdentifier::new("busdox-docid-qns", "urn:invoice"),
            process: ProcessIdentifier::new("cenbii-procid-ubl", "bii04"),
            document: "<Invoice/>".into(),
        }
    }

    #[test]
    fn test_is_ping() {
        assert!(is_ping(&ping()));

        let mut wrong_body = ping();
        wrong_body.document = "<Ping/>".into();
        assert!(!is_ping(&wrong_body));

        let mut wrong_process = ping();
        wrong_process.process = ProcessIdentifier::new("cenbii-procid-ubl", "busdox:noprocess");
        assert!(!is_ping(&wrong_process));

        assert!(!is_ping(&invoice()));
    }

    #[tokio::test]
    async fn test_receive() {
        let store = Arc::new(Recording::default());
        let ap = access_point(Arc::clone(&store));

        assert_eq!(ap.receive(ping()).await.unwrap(), Received::Ping);
        assert_eq!(ap.receive(invoice()).await.unwrap(), Received::Stored);
        assert_eq!(*store.saved.lock().unwrap(), vec!["invoice-1".to_string()]);

        let mut empty = invoice();
        empty.document = " ".into();
        assert!(matches!(ap.receive(empty).await, Err(ResolutionError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_store_failure_is_security_fault() {
        let store = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let ap = access_point(store);
        assert!(matches!(
            ap.receive(invoice()).await,
            Err(ResolutionError::SecurityFault(_))
        ));
    }

    #[tokio::test]
    async fn test_send_unknown_recipient() {
        let ap = access_point(Arc::new(Recording::default()));
        let invoice = invoice();
        let message = OutboundMessage {
            message_id: invoice.message_id,
            channel_id: None,
            sender: invoice.sender,
            recipient: invoice.recipient,
            document_type: invoice.document_type,
            process: invoice.process,
            document: invoice.document,
            sender_assertion: None,
        };
        assert!(matches!(
            ap.send(&message, ResolutionOptions::default()).await,
            Err(ResolutionError::ChannelFull)
        ));
    }
}
