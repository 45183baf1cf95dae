//! Flat-file inbox for messages received by the access point.
//!
//! Every message lands in `Inbox/<channel>/` as a pair of files: the business
//! document (`uuid_<id>.payload.xml`) and its routing metadata
//! (`uuid_<id>.metadata.xml`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{DocumentTypeIdentifier, ParticipantIdentifier, ProcessIdentifier};

const INBOX: &str = "Inbox";
const NAME_PREFIX: &str = "uuid";
const DOCUMENT_EXTENSION: &str = "payload.xml";
const METADATA_EXTENSION: &str = "metadata.xml";
const EMPTY_MESSAGE: &str = "<EmptyMessage />";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// A message accepted from a sending access point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub channel_id: String,
    pub sender: ParticipantIdentifier,
    pub recipient: ParticipantIdentifier,
    pub document_type: DocumentTypeIdentifier,
    pub process: ProcessIdentifier,
    /// The XML business document, possibly empty
    pub document: String,
}

/// Persistence of inbound messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Writes the document and its metadata
    async fn save(&self, message: &InboundMessage) -> Result<(), StoreError>;

    /// Whether both files of a message are present in the channel's inbox
    async fn exists(&self, channel_id: &str, message_id: &str) -> Result<bool, StoreError>;
}

/// [`MessageStore`] writing under a root directory
#[derive(Debug, Clone)]
pub struct FileMessageStore {
    root: PathBuf,
}

impl FileMessageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inbox directory of a channel; `:` is not portable in file names
    pub fn channel_dir(&self, channel_id: &str) -> Result<PathBuf, StoreError> {
        check_identifier(channel_id)?;
        Ok(self.root.join(INBOX).join(channel_id.replace(':', "_")))
    }

    fn message_path(dir: &Path, message_id: &str, extension: &str) -> Result<PathBuf, StoreError> {
        check_identifier(message_id)?;
        Ok(dir.join(format!("{NAME_PREFIX}_{message_id}.{extension}")))
    }

    pub fn document_path(&self, channel_id: &str, message_id: &str) -> Result<PathBuf, StoreError> {
        Self::message_path(&self.channel_dir(channel_id)?, message_id, DOCUMENT_EXTENSION)
    }

    pub fn metadata_path(&self, channel_id: &str, message_id: &str) -> Result<PathBuf, StoreError> {
        Self::message_path(&self.channel_dir(channel_id)?, message_id, METADATA_EXTENSION)
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn save(&self, message: &InboundMessage) -> Result<(), StoreError> {
        let dir = self.channel_dir(&message.channel_id)?;
        let document_path = Self::message_path(&dir, &message.message_id, DOCUMENT_EXTENSION)?;
        let metadata_path = Self::message_path(&dir, &message.message_id, METADATA_EXTENSION)?;

        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(&document_path, document_contents(&message.document)).await?;
        tokio::fs::write(&metadata_path, metadata_contents(message, Utc::now())?).await?;

        tracing::debug!(
            channel = %message.channel_id,
            message = %message.message_id,
            path = %document_path.display(),
            "message stored"
        );
        Ok(())
    }

    async fn exists(&self, channel_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let document = self.document_path(channel_id, message_id)?;
        let metadata = self.metadata_path(channel_id, message_id)?;
        Ok(tokio::fs::try_exists(&document).await? && tokio::fs::try_exists(&metadata).await?)
    }
}

/// Rejects identifiers that are blank or could escape the inbox directory
fn check_identifier(identifier: &str) -> Result<(), StoreError> {
    if identifier.trim().is_empty()
        || identifier.contains('/') || identifier.contains('\\') || identifier.contains("..") || identifier.contains('*') {
        return Err(StoreError::IllegalIdentifier(identifier.to_string()));
    }
    Ok(())
}

fn document_contents(document: &str) -> String {
    let document = document.trim();
    let document = if document.is_empty() { EMPTY_MESSAGE } else { document };
    if document.starts_with("<?xml") {
        document.to_string()
    } else {
        format!("{XML_DECLARATION}\n{document}")
    }
}

#[derive(Serialize)]
#[serde(rename = "MessageMetadata")]
struct StoredMetadata<'a> {
    #[serde(rename = "MessageIdentifier")]
    message_id: &'a str,
    #[serde(rename = "ChannelIdentifier")]
    channel_id: &'a str,
    #[serde(rename = "SenderIdentifier")]
    sender: StoredIdentifier<'a>,
    #[serde(rename = "RecipientIdentifier")]
    recipient: StoredIdentifier<'a>,
    #[serde(rename = "DocumentIdentifier")]
    document_type: StoredIdentifier<'a>,
    #[serde(rename = "ProcessIdentifier")]
    process: StoredIdentifier<'a>,
    #[serde(rename = "Received")]
    received: String,
}

#[derive(Serialize)]
struct StoredIdentifier<'a> {
    #[serde(rename = "@scheme")]
    scheme: &'a str,
    #[serde(rename = "$text")]
    value: &'a str,
}

impl<'a> StoredIdentifier<'a> {
    fn new(scheme: &'a str, value: &'a str) -> Self {
        Self { scheme, value }
    }
}

fn metadata_contents(message: &InboundMessage, received: DateTime<Utc>) -> Result<String, StoreError> {
    let metadata = StoredMetadata {
        message_id: &message.message_id,
        channel_id: &message.channel_id,
        sender: StoredIdentifier::new(&message.sender.scheme, &message.sender.value),
        recipient: StoredIdentifier::new(&message.recipient.scheme, &message.recipient.value),
        document_type: StoredIdentifier::new(&message.document_type.scheme, &message.document_type.value),
        process: StoredIdentifier::new(&message.process.scheme, &message.process.value),
        received: received.to_rfc3339(),
    };
    let body = quick_xml::se::to_string(&metadata).map_err(|e| StoreError::Serialize(e.to_string()))?;
    Ok(format!("{XML_DECLARATION}\n{body}"))
}
