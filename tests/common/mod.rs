//! Shared fixtures: a throw-away PEPPOL-like PKI, signed SMP documents and an
//! in-memory metadata source.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use p256::ecdsa::{signature::Signer, SigningKey};
use p256::pkcs8::DecodePrivateKey;
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use sha2::{Digest, Sha256};
use url::Url;

use bergshamra_xml::uppsala;
use peppol_start_resolver::verification::c14n::{self, C14nMode, C14N, EXC_C14N};
use peppol_start_resolver::verification::signature::{
    DIGEST_SHA256, DSIG_NS, ECDSA_SHA256, ENVELOPED_SIGNATURE,
};
use peppol_start_resolver::verification::thumbprint;
use peppol_start_resolver::{
    service_group_url, signed_service_url, DocumentTypeIdentifier, FetchError,
    FetchOutcome, MetadataFetcher, MetadataXml, ParticipantIdentifier, ProcessIdentifier,
    ResolutionRequest, RevocationMode, TrustAnchorSet, TrustDomain,
};

pub const SML_DOMAIN: &str = "sml.example.org";
pub const AP_ADDRESS: &str = "https://ap.example.org/accessPointService";

pub struct Issued {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl Issued {
    pub fn der(&self) -> Vec<u8> {
        self.cert.der().to_vec()
    }
}

fn self_signed_ca(name: &str) -> Issued {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    Issued { cert, key }
}

fn issue(name: &str, ca: bool, issuer: &Issued) -> Issued {
    let mut params = CertificateParams::new(vec![format!("{}.example", name.to_lowercase().replace(' ', "-"))]).unwrap();
    params.distinguished_name.push(DnType::CommonName, name);
    if ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &issuer.cert, &issuer.key).unwrap();
    Issued { cert, key }
}

/// Root CA with an SMP CA and an AP CA beneath it, each with one leaf
pub struct Pki {
    pub root: Issued,
    pub smp_ca: Issued,
    pub ap_ca: Issued,
    pub smp: Issued,
    pub ap: Issued,
}

impl Pki {
    pub fn new() -> Self {
        init_tracing();
        let root = self_signed_ca("Test PEPPOL Root CA");
        let smp_ca = issue("Test PEPPOL SMP CA", true, &root);
        let ap_ca = issue("Test PEPPOL AP CA", true, &root);
        let smp = issue("Test SMP", false, &smp_ca);
        let ap = issue("Test AP", false, &ap_ca);
        Self { root, smp_ca, ap_ca, smp, ap }
    }

    /// Trust anchors pinning this hierarchy
    pub fn anchors(&self) -> Arc<TrustAnchorSet> {
        Arc::new(
            TrustAnchorSet::new(RevocationMode::NoCheck)
                .with_root_thumbprint(thumbprint(self.root.cert.der()))
                .with_intermediate_thumbprint(TrustDomain::SmpCA, thumbprint(self.smp_ca.cert.der()))
                .with_intermediate_thumbprint(TrustDomain::AccessPointCA, thumbprint(self.ap_ca.cert.der()))
                .with_trusted_root(self.root.cert.der())
                .unwrap()
                .with_trusted_intermediate(self.smp_ca.cert.der())
                .unwrap()
                .with_trusted_intermediate(self.ap_ca.cert.der())
                .unwrap(),
        )
    }
}

/// Routes `tracing` output through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Splits the DER element at the start of `der` into (element, content, rest)
fn tlv(der: &[u8]) -> (&[u8], &[u8], &[u8]) {
    let (len, header) = match der[1] {
        n if n < 0x80 => (n as usize, 2),
        n => {
            let count = (n & 0x7f) as usize;
            let len = der[2..2 + count].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, 2 + count)
        }
    };
    (&der[..header + len], &der[header..header + len], &der[header + len..])
}

fn der_element(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if content.len() < 0x80 {
        out.push(content.len() as u8);
    } else {
        let len: Vec<u8> = content.len().to_be_bytes().into_iter().skip_while(|b| *b == 0).collect();
        out.push(0x80 | len.len() as u8);
        out.extend(len);
    }
    out.extend_from_slice(content);
    out
}

/// `subject`'s certificate re-issued by `issuer` with a `subjectUniqueID` of `uid`
///
/// rcgen cannot emit the field, so it is spliced into the TBS certificate after
/// the public key, and the result is signed again with the issuer's key.
pub fn with_subject_uid(subject: &Issued, issuer: &Issued, uid: &str) -> Vec<u8> {
    let (_, certificate, _) = tlv(subject.cert.der());
    let (_, tbs, rest) = tlv(certificate);
    let (signature_algorithm, _, _) = tlv(rest);

    // version, serialNumber, signature, issuer, validity, subject, subjectPublicKeyInfo
    let mut fields = Vec::new();
    let mut remaining = tbs;
    for _ in 0..7 {
        let (element, _, next) = tlv(remaining);
        fields.extend_from_slice(element);
        remaining = next;
    }
    let mut uid_bits = vec![0u8];
    uid_bits.extend_from_slice(uid.as_bytes());
    fields.extend(der_element(0x82, &uid_bits));
    fields.extend_from_slice(remaining);
    let tbs = der_element(0x30, &fields);

    let signing_key = SigningKey::from_pkcs8_der(&issuer.key.serialize_der()).unwrap();
    let signature: p256::ecdsa::Signature = signing_key.sign(&tbs);
    let mut signature_bits = vec![0u8];
    signature_bits.extend_from_slice(signature.to_der().as_bytes());

    let mut body = tbs;
    body.extend_from_slice(signature_algorithm);
    body.extend(der_element(0x03, &signature_bits));
    der_element(0x30, &body)
}

pub fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn participant() -> ParticipantIdentifier {
    ParticipantIdentifier::new("iso6523-actorid-upis", "9902:DK87654321")
}

pub fn document_type() -> DocumentTypeIdentifier {
    DocumentTypeIdentifier::new(
        "busdox-docid-qns",
        "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2::Invoice##urn:www.cenbii.eu:transaction:biicoretrdm010:ver1.0",
    )
}

pub fn process() -> ProcessIdentifier {
    ProcessIdentifier::new("cenbii-procid-ubl", "urn:www.cenbii.eu:profile:bii04:ver1.0")
}

pub fn request() -> ResolutionRequest {
    ResolutionRequest {
        participant: participant(),
        document_type: document_type(),
        process: process(),
    }
}

pub fn group_url() -> Url {
    service_group_url(&participant(), SML_DOMAIN).unwrap()
}

pub fn metadata_url() -> Url {
    signed_service_url(&participant(), SML_DOMAIN, &document_type()).unwrap()
}

pub fn service_group() -> String {
    let participant = participant();
    format!(
        r#"<ServiceGroup xmlns="http://busdox.org/serviceMetadata/publishing/1.0/" xmlns:ids="http://busdox.org/transport/identifiers/1.0/"><ids:ParticipantIdentifier scheme="{}">{}</ids:ParticipantIdentifier><ServiceMetadataReferenceCollection><ServiceMetadataReference href="{}"/></ServiceMetadataReferenceCollection></ServiceGroup>"#,
        participant.scheme,
        participant.value,
        metadata_url(),
    )
}

/// Unsigned `SignedServiceMetadata` publishing one endpoint for `process`
pub fn service_information(process: &ProcessIdentifier, address: &str, endpoint_certificate: &[u8]) -> String {
    let participant = participant();
    let document_type = document_type();
    format!(
        r#"<SignedServiceMetadata xmlns="http://busdox.org/serviceMetadata/publishing/1.0/" xmlns:ids="http://busdox.org/transport/identifiers/1.0/" xmlns:wsa="http://www.w3.org/2005/08/addressing">
  <ServiceMetadata>
    <ServiceInformation>
      <ids:ParticipantIdentifier scheme="{}">{}</ids:ParticipantIdentifier>
      <ids:DocumentIdentifier scheme="{}">{}</ids:DocumentIdentifier>
      <ProcessList>
        <Process>
          <ids:ProcessIdentifier scheme="{}">{}</ids:ProcessIdentifier>
          <ServiceEndpointList>
            <Endpoint transportProfile="busdox-transport-start">
              <wsa:EndpointReference><wsa:Address>{address}</wsa:Address></wsa:EndpointReference>
              <RequireBusinessLevelSignature>false</RequireBusinessLevelSignature>
              <MinimumAuthenticationLevel>1</MinimumAuthenticationLevel>
              <ServiceActivationDate>2010-01-01T00:00:00Z</ServiceActivationDate>
              <ServiceExpirationDate>2099-01-01T00:00:00Z</ServiceExpirationDate>
              <Certificate>{}</Certificate>
              <ServiceDescription>Test access point</ServiceDescription>
              <TechnicalContactUrl>mailto:support@ap.example.org</TechnicalContactUrl>
            </Endpoint>
          </ServiceEndpointList>
        </Process>
      </ProcessList>
    </ServiceInformation>
  </ServiceMetadata>
</SignedServiceMetadata>"#,
        participant.scheme,
        participant.value,
        document_type.scheme,
        document_type.value,
        process.scheme,
        process.value,
        b64(endpoint_certificate),
    )
}

/// Unsigned redirect document
pub fn redirect(href: &Url, certificate_uid: &str) -> String {
    format!(
        r#"<SignedServiceMetadata xmlns="http://busdox.org/serviceMetadata/publishing/1.0/"><ServiceMetadata><Redirect href="{href}"><CertificateUID>{certificate_uid}</CertificateUID></Redirect></ServiceMetadata></SignedServiceMetadata>"#
    )
}

/// Adds an enveloped ECDSA P-256 signature by `signer` to `unsigned`
///
/// `exclusive` selects exclusive C14N for both the reference and `SignedInfo`.
pub fn sign(unsigned: &str, signer: &Issued, exclusive: bool) -> String {
    sign_with(unsigned, signer.cert.der(), &signer.key, exclusive, "")
}

/// Like [`sign`], with an explicit certificate and `Reference/@URI`
///
/// `reference_uri` is either `""` or `#id` naming an element of `unsigned`.
pub fn sign_with(unsigned: &str, certificate: &[u8], key: &KeyPair, exclusive: bool, reference_uri: &str) -> String {
    let (mode, algorithm) = if exclusive {
        (C14nMode::Exclusive, EXC_C14N)
    } else {
        (C14nMode::Inclusive, C14N)
    };

    let doc = uppsala::parse(unsigned).unwrap();
    let apex = match reference_uri.strip_prefix('#') {
        Some(id) => doc
            .descendants(doc.root())
            .into_iter()
            .find(|&n| doc.element(n).and_then(|e| e.get_attribute("Id")) == Some(id))
            .unwrap(),
        None => doc.root(),
    };
    let canonical = c14n::canonicalize(&doc, apex, mode, &[], None).unwrap();
    let digest_value = b64(&Sha256::digest(&canonical));

    let signed_info = format!(
        r#"<SignedInfo><CanonicalizationMethod Algorithm="{algorithm}"/><SignatureMethod Algorithm="{ECDSA_SHA256}"/><Reference URI="{reference_uri}"><Transforms><Transform Algorithm="{ENVELOPED_SIGNATURE}"/><Transform Algorithm="{algorithm}"/></Transforms><DigestMethod Algorithm="{DIGEST_SHA256}"/><DigestValue>{digest_value}</DigestValue></Reference></SignedInfo>"#
    );
    let close = "</SignedServiceMetadata>";
    let at = unsigned.rfind(close).unwrap();
    let with_signature = |value: &str| {
        format!(
            r#"{}<Signature xmlns="{DSIG_NS}">{signed_info}<SignatureValue>{value}</SignatureValue><KeyInfo><X509Data><X509Certificate>{}</X509Certificate></X509Data></KeyInfo></Signature>{close}"#,
            &unsigned[..at],
            b64(certificate),
        )
    };

    // Canonicalize SignedInfo in its final context, then fill in the value
    let placeholder = with_signature("");
    let doc = uppsala::parse(&placeholder).unwrap();
    let node = doc.get_elements_by_tag_name_ns(DSIG_NS, "SignedInfo")[0];
    let canonical_signed_info = c14n::canonicalize(&doc, node, mode, &[], None).unwrap();

    let signing_key = SigningKey::from_pkcs8_der(&key.serialize_der()).unwrap();
    let signature: p256::ecdsa::Signature = signing_key.sign(&canonical_signed_info);
    with_signature(&b64(&signature.to_bytes()))
}

/// Serves fixed documents by URL; anything else is not published
#[derive(Default, Clone)]
pub struct MemoryFetcher {
    documents: HashMap<String, String>,
    delay: Option<Duration>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &Url, body: impl Into<String>) -> Self {
        self.documents.insert(url.as_str().to_string(), body.into());
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl MetadataFetcher for MemoryFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchOutcome, FetchError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.documents.get(url.as_str()) {
            Some(body) => Ok(FetchOutcome::Found(MetadataXml::parse(body.clone())?)),
            None => Ok(FetchOutcome::NotFound),
        }
    }
}

/// Service group plus metadata for `process` signed by `signer`, pointing at `ap_certificate`
pub fn published(pki: &Pki, signer: &Issued, process: &ProcessIdentifier) -> MemoryFetcher {
    MemoryFetcher::new()
        .with(&group_url(), service_group())
        .with(
            &metadata_url(),
            sign(&service_information(process, AP_ADDRESS, &pki.ap.der()), signer, false),
        )
}
