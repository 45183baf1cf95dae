//! X.509 certificate helpers.
//!
//! Thumbprints follow the usual Windows convention: uppercase hex SHA-1 of the
//! DER encoding, compared without regard to case.

use chrono::{DateTime, Utc};
use rsa::pkcs1v15;
use rsa::pkcs8::DecodePublicKey as _;
use rsa::RsaPublicKey;
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha384, Sha512};
use signature::Verifier as _;

/// Uppercase hex SHA-1 of the DER-encoded certificate
pub fn thumbprint(der: &[u8]) -> String {
    Sha1::digest(der).iter().map(|b| format!("{:02X}", b)).collect()
}

/// Case-insensitive thumbprint comparison; surrounding whitespace is ignored
pub fn thumbprints_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// The fields of a certificate needed for chain building, detached from the DER borrow
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub der: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub serial: Vec<u8>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    /// `subjectUniqueID`, decoded as text
    pub subject_uid: Option<String>,
    /// `basicConstraints` cA flag; false when the extension is absent
    pub is_ca: bool,
    /// `basicConstraints` pathLenConstraint
    pub path_len: Option<u32>,
    /// `keyUsage` keyCertSign bit, `None` when the certificate has no keyUsage
    pub key_cert_sign: Option<bool>,
    spki_der: Vec<u8>,
    tbs_der: Vec<u8>,
    signature_oid: String,
    signature: Vec<u8>,
}

impl ParsedCertificate {
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| format!("invalid certificate DER: {e}"))?;
        let tbs = &cert.tbs_certificate;
        let validity = &tbs.validity;
        let constraints = tbs
            .basic_constraints()
            .map_err(|e| format!("invalid basicConstraints: {e}"))?
            .map(|ext| (ext.value.ca, ext.value.path_len_constraint));
        let key_usage = tbs.key_usage().map_err(|e| format!("invalid keyUsage: {e}"))?;

        Ok(Self {
            der: der.to_vec(),
            subject: tbs.subject.to_string(),
            issuer: tbs.issuer.to_string(),
            serial: tbs.raw_serial().to_vec(),
            not_before: DateTime::from_timestamp(validity.not_before.timestamp(), 0),
            not_after: DateTime::from_timestamp(validity.not_after.timestamp(), 0),
            subject_uid: tbs
                .subject_uid
                .as_ref()
                .map(|uid| String::from_utf8_lossy(&uid.0.data).into_owned()),
            is_ca: constraints.is_some_and(|(ca, _)| ca),
            path_len: constraints.and_then(|(_, path_len)| path_len),
            key_cert_sign: key_usage.map(|ext| ext.value.key_cert_sign()),
            spki_der: tbs.subject_pki.raw.to_vec(),
            tbs_der: tbs.as_ref().to_vec(),
            signature_oid: cert.signature_algorithm.algorithm.to_string(),
            signature: cert.signature_value.data.to_vec(),
        })
    }

    pub fn thumbprint(&self) -> String {
        thumbprint(&self.der)
    }

    /// DER `SubjectPublicKeyInfo`
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match (self.not_before, self.not_after) {
            (Some(not_before), Some(not_after)) => not_before <= now && now <= not_after,
            _ => false,
        }
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }

    /// Whether this certificate may sign a certificate with `ca_below` non-self-issued
    /// CA certificates between it and the end certificate
    pub fn may_issue(&self, ca_below: usize) -> bool {
        self.is_ca
            && self.key_cert_sign != Some(false)
            && self.path_len.map_or(true, |max| ca_below <= max as usize)
    }

    /// Subject/issuer name match, a CA issuer, and a signature check with the issuer's key
    pub fn is_issued_by(&self, issuer: &ParsedCertificate) -> bool {
        self.issuer == issuer.subject
            && issuer.is_ca
            && issuer.key_cert_sign != Some(false)
            && verify_issuer_signature(&issuer.spki_der, &self.tbs_der, &self.signature_oid, &self.signature)
                .is_ok()
    }
}

/// Subject unique identifier of a DER certificate, if it carries one
pub fn subject_unique_identifier(der: &[u8]) -> Result<Option<String>, String> {
    Ok(ParsedCertificate::from_der(der)?.subject_uid)
}

fn verify_rsa<D>(spki_der: &[u8], message: &[u8], signature: &[u8]) -> Result<(), String>
where
    D: Digest + sha2::digest::const_oid::AssociatedOid,
{
    let key = RsaPublicKey::from_public_key_der(spki_der).map_err(|e| format!("bad RSA public key: {e}"))?;
    let verifying_key = pkcs1v15::VerifyingKey::<D>::new(key);
    let signature =
        pkcs1v15::Signature::try_from(signature).map_err(|e| format!("bad RSA signature bytes: {e}"))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| "certificate signature verification failed".to_string())
}

fn verify_issuer_signature(
    issuer_spki_der: &[u8],
    tbs_der: &[u8],
    signature_oid: &str,
    signature: &[u8],
) -> Result<(), String> {
    match signature_oid {
        // sha1/sha256/sha384/sha512 WithRSAEncryption
        "1.2.840.113549.1.1.5" => verify_rsa::<Sha1>(issuer_spki_der, tbs_der, signature),
        "1.2.840.113549.1.1.11" => verify_rsa::<Sha256>(issuer_spki_der, tbs_der, signature),
        "1.2.840.113549.1.1.12" => verify_rsa::<Sha384>(issuer_spki_der, tbs_der, signature),
        "1.2.840.113549.1.1.13" => verify_rsa::<Sha512>(issuer_spki_der, tbs_der, signature),

        // ecdsa-with-SHA256 / SHA384
        "1.2.840.10045.4.3.2" => {
            let key = p256::PublicKey::from_public_key_der(issuer_spki_der)
                .map_err(|e| format!("bad P-256 issuer public key: {e}"))?;
            let signature = p256::ecdsa::Signature::from_der(signature)
                .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
            p256::ecdsa::VerifyingKey::from(&key)
                .verify(tbs_der, &signature)
                .map_err(|_| "certificate signature verification failed".to_string())
        }
        "1.2.840.10045.4.3.3" => {
            let key = p384::PublicKey::from_public_key_der(issuer_spki_der)
                .map_err(|e| format!("bad P-384 issuer public key: {e}"))?;
            let signature = p384::ecdsa::Signature::from_der(signature)
                .map_err(|e| format!("bad ECDSA signature bytes: {e}"))?;
            p384::ecdsa::VerifyingKey::from(&key)
                .verify(tbs_der, &signature)
                .map_err(|_| "certificate signature verification failed".to_string())
        }

        _ => Err(format!("unsupported certificate signature algorithm OID: {signature_oid}")),
    }
}
