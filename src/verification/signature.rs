//! XML-DSig verification against the certificate embedded in `KeyInfo`.
//!
//! Processing order:
//! 1. Locate `<Signature>` and read `SignedInfo` (canonicalization and signature methods)
//! 2. For each `<Reference>`: resolve the URI, apply transforms, digest and compare.
//!    Every reference must cover the document element, and `Id` values must be unique.
//! 3. Take the signer certificate from `KeyInfo/X509Data`
//! 4. Canonicalize `SignedInfo` and check `SignatureValue` with the signer's key
//!
//! A valid signature says nothing about trust; the returned certificate still
//! has to go through chain validation.

use std::collections::HashMap;

use base64::Engine;
use bergshamra_xml::uppsala::{Document, NodeId};
use bergshamra_xml::xpath::is_ancestor_or_self;
use bergshamra_xml::XmlDocument;
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::digest::const_oid::AssociatedOid;
use sha2::{Digest, Sha256, Sha384, Sha512};
use signature::Verifier as _;

use super::c14n::{self, C14nMode};
use super::certificate::ParsedCertificate;
use crate::error::SignatureError;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ECDSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384";

/// Certificates carried by a verified signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBy {
    /// DER of the certificate whose key produced the signature
    pub signer: Vec<u8>,
    /// Any further `X509Certificate` entries, usable as chain-building material
    pub supplemental: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureMethod {
    RsaSha1,
    RsaSha256,
    RsaSha384,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
}

impl SignatureMethod {
    fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            RSA_SHA1 => Some(SignatureMethod::RsaSha1),
            RSA_SHA256 => Some(SignatureMethod::RsaSha256),
            RSA_SHA384 => Some(SignatureMethod::RsaSha384),
            RSA_SHA512 => Some(SignatureMethod::RsaSha512),
            ECDSA_SHA256 => Some(SignatureMethod::EcdsaSha256),
            ECDSA_SHA384 => Some(SignatureMethod::EcdsaSha384),
            _ => None,
        }
    }

    fn verify(self, spki_der: &[u8], message: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        match self {
            SignatureMethod::RsaSha1 => verify_rsa::<Sha1>(spki_der, message, signature),
            SignatureMethod::RsaSha256 => verify_rsa::<Sha256>(spki_der, message, signature),
            SignatureMethod::RsaSha384 => verify_rsa::<Sha384>(spki_der, message, signature),
            SignatureMethod::RsaSha512 => verify_rsa::<Sha512>(spki_der, message, signature),
            SignatureMethod::EcdsaSha256 => {
                let key = p256::PublicKey::from_public_key_der(spki_der)
                    .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
                // XML-DSig carries ECDSA signatures as raw r || s
                let signature = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| SignatureError::SignatureMismatch)?;
                p256::ecdsa::VerifyingKey::from(&key)
                    .verify(message, &signature)
                    .map_err(|_| SignatureError::SignatureMismatch)
            }
            SignatureMethod::EcdsaSha384 => {
                let key = p384::PublicKey::from_public_key_der(spki_der)
                    .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
                let signature = p384::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| SignatureError::SignatureMismatch)?;
                p384::ecdsa::VerifyingKey::from(&key)
                    .verify(message, &signature)
                    .map_err(|_| SignatureError::SignatureMismatch)
            }
        }
    }
}

fn verify_rsa<D>(spki_der: &[u8], message: &[u8], signature: &[u8]) -> Result<(), SignatureError>
where
    D: Digest + AssociatedOid,
{
    let key = RsaPublicKey::from_public_key_der(spki_der).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    let signature = pkcs1v15::Signature::try_from(signature).map_err(|_| SignatureError::SignatureMismatch)?;
    pkcs1v15::VerifyingKey::<D>::new(key)
        .verify(message, &signature)
        .map_err(|_| SignatureError::SignatureMismatch)
}

/// Computes the digest named by a `DigestMethod` algorithm URI
pub fn digest(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
    Ok(match algorithm {
        DIGEST_SHA1 => Sha1::digest(data).to_vec(),
        DIGEST_SHA256 => Sha256::digest(data).to_vec(),
        DIGEST_SHA384 => Sha384::digest(data).to_vec(),
        DIGEST_SHA512 => Sha512::digest(data).to_vec(),
        other => return Err(SignatureError::UnsupportedAlgorithm(other.to_string())),
    })
}

fn decode_base64(text: &str, what: &'static str) -> Result<Vec<u8>, SignatureError> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|_| SignatureError::Base64(what))
}

fn child(doc: &Document<'_>, parent: NodeId, name: &'static str) -> Option<NodeId> {
    doc.first_child_element_by_name_ns(parent, DSIG_NS, name)
}

fn required(doc: &Document<'_>, parent: NodeId, name: &'static str) -> Result<NodeId, SignatureError> {
    child(doc, parent, name).ok_or(SignatureError::MissingElement(name))
}

fn attribute<'d>(doc: &'d Document<'_>, node: NodeId, name: &str) -> Option<&'d str> {
    doc.element(node).and_then(|e| e.get_attribute(name))
}

fn algorithm<'d>(doc: &'d Document<'_>, node: NodeId) -> Result<&'d str, SignatureError> {
    attribute(doc, node, "Algorithm").ok_or(SignatureError::MissingAttribute("Algorithm"))
}

fn c14n_mode(uri: &str) -> Result<C14nMode, SignatureError> {
    c14n::mode_from_uri(uri).ok_or_else(|| SignatureError::UnsupportedAlgorithm(uri.to_string()))
}

/// `InclusiveNamespaces/@PrefixList` under an exclusive canonicalization method
fn inclusive_prefixes(doc: &Document<'_>, method: NodeId) -> Vec<String> {
    doc.first_child_element_by_name_ns(method, EXC_C14N_NS, "InclusiveNamespaces")
        .and_then(|n| attribute(doc, n, "PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Resolves the node a `Reference` covers
///
/// Only the whole document is accepted: `URI=""` or `#id` naming the document
/// element. The metadata consumed after verification is always read from the
/// document element, so a reference to any other element would leave it unsigned.
fn reference_apex(doc: &Document<'_>, ids: &HashMap<String, NodeId>, uri: &str) -> Result<NodeId, SignatureError> {
    if uri.is_empty() {
        return Ok(doc.root());
    }
    let id = uri
        .strip_prefix('#')
        .ok_or_else(|| SignatureError::UnsupportedReference(uri.to_string()))?;
    let node = ids
        .get(id)
        .copied()
        .ok_or_else(|| SignatureError::UnsupportedReference(uri.to_string()))?;
    if Some(node) != doc.document_element() {
        tracing::warn!(reference = uri, "signature reference does not cover the document element");
        return Err(SignatureError::UncoveredDocument(uri.to_string()));
    }
    Ok(node)
}

fn verify_reference(
    doc: &Document<'_>,
    ids: &HashMap<String, NodeId>,
    signature: NodeId,
    reference: NodeId,
) -> Result<(), SignatureError> {
    let uri = attribute(doc, reference, "URI").unwrap_or("");
    let apex = reference_apex(doc, ids, uri)?;

    let mut mode = C14nMode::Inclusive;
    let mut prefixes = Vec::new();
    let mut enveloped = false;
    if let Some(transforms) = child(doc, reference, "Transforms") {
        for transform in doc.child_elements_by_name_ns(transforms, DSIG_NS, "Transform") {
            let uri = algorithm(doc, transform)?;
            if uri == ENVELOPED_SIGNATURE {
                enveloped = true;
            } else {
                mode = c14n_mode(uri)?;
                prefixes = inclusive_prefixes(doc, transform);
            }
        }
    }
    if !enveloped && is_ancestor_or_self(doc, apex, signature) {
        return Err(SignatureError::UnsupportedReference(format!(
            "{uri:?} contains the signature but has no enveloped-signature transform"
        )));
    }

    let excluded = enveloped.then_some(signature);
    let canonical = c14n::canonicalize(doc, apex, c14n::without_comments(mode), &prefixes, excluded)
        .map_err(SignatureError::Canonicalization)?;

    let digest_method = required(doc, reference, "DigestMethod")?;
    let expected = required(doc, reference, "DigestValue")
        .and_then(|n| decode_base64(&doc.text_content_deep(n), "DigestValue"))?;

    let actual = digest(algorithm(doc, digest_method)?, &canonical)?;
    if actual != expected {
        tracing::debug!(reference = uri, "reference digest mismatch");
        return Err(SignatureError::DigestMismatch(uri.to_string()));
    }
    Ok(())
}

fn key_info_certificates(doc: &Document<'_>, signature: NodeId) -> Result<Vec<Vec<u8>>, SignatureError> {
    let key_info = child(doc, signature, "KeyInfo").ok_or(SignatureError::MissingCertificate)?;
    doc.descendants(key_info)
        .into_iter()
        .filter(|&n| doc.element(n).is_some_and(|e| e.matches_name_ns(DSIG_NS, "X509Certificate")))
        .map(|n| decode_base64(&doc.text_content_deep(n), "X509Certificate"))
        .collect()
}

/// Verifies the first `<Signature>` in `xml` and returns the certificates it carries
pub fn verify_signature(xml: &str) -> Result<SignedBy, SignatureError> {
    let owned = XmlDocument::parse(xml.to_string()).map_err(|e| SignatureError::Xml(e.to_string()))?;
    let doc = owned.parse_doc().map_err(|e| SignatureError::Xml(e.to_string()))?;
    let ids = owned
        .build_id_map(&doc)
        .map_err(|e| SignatureError::DuplicateId(e.to_string()))?;

    let signature = XmlDocument::find_element(&doc, DSIG_NS, "Signature")
        .ok_or(SignatureError::MissingElement("Signature"))?;
    let signed_info = required(&doc, signature, "SignedInfo")?;

    let c14n_method = required(&doc, signed_info, "CanonicalizationMethod")?;
    let c14n_mode = c14n_mode(algorithm(&doc, c14n_method)?)?;
    let c14n_prefixes = inclusive_prefixes(&doc, c14n_method);

    let method_uri = required(&doc, signed_info, "SignatureMethod").and_then(|n| algorithm(&doc, n))?;
    let method = SignatureMethod::from_uri(method_uri)
        .ok_or_else(|| SignatureError::UnsupportedAlgorithm(method_uri.to_string()))?;

    let references = doc.child_elements_by_name_ns(signed_info, DSIG_NS, "Reference");
    if references.is_empty() {
        return Err(SignatureError::MissingElement("Reference"));
    }
    for reference in references {
        verify_reference(&doc, &ids, signature, reference)?;
    }

    let mut certificates = key_info_certificates(&doc, signature)?.into_iter();
    let signer = certificates.next().ok_or(SignatureError::MissingCertificate)?;
    let parsed = ParsedCertificate::from_der(&signer).map_err(SignatureError::InvalidCertificate)?;

    let canonical_signed_info = c14n::canonicalize(&doc, signed_info, c14n_mode, &c14n_prefixes, None)
        .map_err(SignatureError::Canonicalization)?;
    let signature_value = required(&doc, signature, "SignatureValue")
        .and_then(|n| decode_base64(&doc.text_content_deep(n), "SignatureValue"))?;

    method.verify(parsed.public_key_der(), &canonical_signed_info, &signature_value)?;

    Ok(SignedBy {
        signer,
        supplemental: certificates.collect(),
    })
}
