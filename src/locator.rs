//! SML hostname derivation and SMP URL construction.
//!
//! The SML publishes one DNS name per participant:
//! `b-{md5hex(lowercase(participant))}.{scheme}.{sml domain}`. The SMP behind
//! that name serves the service group at `/{scheme}::{participant}` and the
//! signed service metadata at `/{scheme}::{participant}/services/{docScheme}::{docValue}`,
//! with `:` and `#` percent-encoded in the path.

use md5::{Digest, Md5};
use url::Url;

use crate::types::{DocumentTypeIdentifier, ParticipantIdentifier};

/// Lowercase hex MD5 of the lowercased participant identifier value.
///
/// Hashing without lowercasing yields a name the SML never published, so the
/// lowercasing happens here rather than being left to callers.
pub fn participant_hash(identifier: &str) -> String {
    let digest = Md5::digest(identifier.to_lowercase().as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn encode_path_segment(segment: &str) -> String {
    segment.replace(':', "%3A").replace('#', "%23")
}

fn smp_base(participant: &ParticipantIdentifier, sml_domain: &str) -> String {
    format!(
        "http://b-{}.{}.{}/{}",
        participant_hash(&participant.value),
        participant.scheme,
        sml_domain,
        encode_path_segment(&participant.to_string()),
    )
}

/// URL of the participant's service group
pub fn service_group_url(
    participant: &ParticipantIdentifier,
    sml_domain: &str,
) -> Result<Url, url::ParseError> {
    Url::parse(&smp_base(participant, sml_domain))
}

/// URL of the signed service metadata for one document type
pub fn signed_service_url(
    participant: &ParticipantIdentifier,
    sml_domain: &str,
    document_type: &DocumentTypeIdentifier,
) -> Result<Url, url::ParseError> {
    Url::parse(&format!(
        "{}/services/{}",
        smp_base(participant, sml_domain),
        encode_path_segment(&document_type.to_string()),
    ))
}
