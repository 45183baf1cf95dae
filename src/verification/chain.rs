//! X.509 chain validation with pinned CA thumbprints.
//!
//! The chain is built from the certificate up to one of the configured trusted
//! roots, using the configured intermediates and any certificates supplied by
//! the caller as building material. Once built, the certificate's immediate
//! issuer must be one of the pinned intermediate CAs of the requested trust
//! domain, unless the certificate is itself a pinned CA.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::certificate::{thumbprints_match, ParsedCertificate};
use crate::config::{RevocationMode, TrustAnchorSet};
use crate::error::ChainError;

const MAX_DEPTH: usize = 16;

/// Which pinned intermediate CA a certificate must be issued by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrustDomain {
    /// No issuer pinning; the chain is still built and checked
    None,
    /// Access point certificates
    AccessPointCA,
    /// Service metadata publisher certificates
    SmpCA,
}

#[derive(Debug, Clone)]
pub struct CertificateChainValidator {
    anchors: Arc<TrustAnchorSet>,
    domain: TrustDomain,
    revocation_mode: RevocationMode,
    expected_certificate: Option<Vec<u8>>,
}

impl CertificateChainValidator {
    /// Validator for `domain`, using the revocation mode the anchors were configured with
    pub fn new(anchors: Arc<TrustAnchorSet>, domain: TrustDomain) -> Self {
        let revocation_mode = anchors.revocation_mode();
        Self {
            anchors,
            domain,
            revocation_mode,
            expected_certificate: None,
        }
    }

    pub fn with_revocation_mode(mut self, mode: RevocationMode) -> Self {
        self.revocation_mode = mode;
        self
    }

    /// Additionally require the validated certificate to equal `der` byte for byte
    pub fn with_expected_certificate(mut self, der: impl Into<Vec<u8>>) -> Self {
        self.expected_certificate = Some(der.into());
        self
    }

    pub fn domain(&self) -> TrustDomain {
        self.domain
    }

    pub fn validate(&self, certificate: &[u8]) -> Result<(), ChainError> {
        self.validate_with(certificate, &[])
    }

    /// Validates `certificate`, with `supplemental` certificates available as chain-building material
    pub fn validate_with(&self, certificate: &[u8], supplemental: &[Vec<u8>]) -> Result<(), ChainError> {
        if certificate.is_empty() {
            return Err(ChainError::NoCertificate);
        }

        let chain = self.build_chain(certificate, supplemental)?;
        self.check_issuer(&chain)?;

        if let Some(expected) = &self.expected_certificate {
            if expected.as_slice() != certificate {
                return Err(ChainError::CertificateMismatch);
            }
        }
        Ok(())
    }

    fn check_issuer(&self, chain: &[ParsedCertificate]) -> Result<(), ChainError> {
        let Some(leaf) = chain.first() else {
            return Err(ChainError::NoCertificate);
        };

        // A CA's own certificate needs no issuer check
        let leaf_thumbprint = leaf.thumbprint();
        if self.anchors.is_pinned_root(&leaf_thumbprint)
            || self.anchors.is_pinned_intermediate(self.domain, &leaf_thumbprint)
        {
            tracing::debug!(subject = %leaf.subject, "certificate is a pinned CA");
            return Ok(());
        }

        if self.domain == TrustDomain::None {
            return Ok(());
        }

        let issuer = chain.get(1).ok_or(ChainError::WrongIssuer)?;
        if self.anchors.is_pinned_intermediate(self.domain, &issuer.thumbprint()) {
            Ok(())
        } else {
            tracing::debug!(issuer = %issuer.subject, domain = ?self.domain, "issuer is not pinned");
            Err(ChainError::WrongIssuer)
        }
    }

    /// Builds leaf -> ... -> trusted root
    fn build_chain(&self, certificate: &[u8], supplemental: &[Vec<u8>]) -> Result<Vec<ParsedCertificate>, ChainError> {
        let leaf = ParsedCertificate::from_der(certificate).map_err(|e| ChainError::ChainNotBuilt(e.into()))?;
        let provided: Vec<ParsedCertificate> = supplemental
            .iter()
            .filter(|der| !der.is_empty())
            .filter_map(|der| ParsedCertificate::from_der(der).ok())
            .collect();
        let roots = self.anchors.trusted_roots();
        let now = Utc::now();

        let mut chain = vec![leaf];
        while chain.len() <= MAX_DEPTH {
            let Some(current) = chain.last() else {
                break;
            };
            if !current.is_valid_at(now) {
                return Err(ChainError::ChainNotBuilt(
                    format!("{} is outside its validity period", current.subject).into(),
                ));
            }
            if roots.iter().any(|root| root.der == current.der) {
                self.check_revocation(&chain)?;
                return Ok(chain);
            }

            // CA certificates the next issuer would have beneath it, for pathLenConstraint
            let ca_below = chain.iter().skip(1).filter(|c| !c.is_self_issued()).count();

            // Prefer supplied intermediates, then configured ones, then trust anchors
            let issuer = provided
                .iter()
                .chain(self.anchors.intermediates())
                .chain(roots)
                .find(|candidate| {
                    candidate.der != current.der && current.is_issued_by(candidate) && candidate.may_issue(ca_below)
                })
                .cloned();

            match issuer {
                Some(issuer) => chain.push(issuer),
                None => {
                    return Err(ChainError::ChainNotBuilt(
                        "certificate chain ends in an untrusted root".into(),
                    ))
                }
            }
        }

        Err(ChainError::ChainNotBuilt("certificate chain is too long".into()))
    }

    /// Revocation of the end certificate only
    fn check_revocation(&self, chain: &[ParsedCertificate]) -> Result<(), ChainError> {
        match self.revocation_mode {
            RevocationMode::NoCheck => Ok(()),
            RevocationMode::Online => Err(ChainError::ChainNotBuilt(
                "online revocation checking is not supported".into(),
            )),
            RevocationMode::Offline => {
                let [leaf, issuer, ..] = chain else {
                    // A trusted root on its own has nothing to be revoked by
                    return Ok(());
                };
                let now = Utc::now();
                let mut lists = self
                    .anchors
                    .revocation_lists_from(&issuer.subject)
                    .filter(|crl| crl.is_current_at(now))
                    .peekable();
                if lists.peek().is_none() {
                    return Err(ChainError::ChainNotBuilt(
                        format!("revocation status unknown, no CRL from {}", issuer.subject).into(),
                    ));
                }
                if lists.any(|crl| crl.is_revoked(&leaf.serial)) {
                    return Err(ChainError::ChainNotBuilt(
                        format!("{} is revoked", leaf.subject).into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Checks a redirect's `CertificateUID` against the target signer's subject unique identifier.
///
/// A signer without the field passes with a warning.
pub fn check_subject_uid(expected: &str, actual: Option<&str>) -> Result<(), ChainError> {
    match actual {
        Some(uid) if uid == expected => Ok(()),
        Some(uid) => Err(ChainError::UidMismatch {
            expected: expected.to_string(),
            actual: uid.to_string(),
        }),
        None => {
            tracing::warn!(
                expected,
                "redirect target certificate has no subject unique identifier; skipping UID check"
            );
            Ok(())
        }
    }
}

/// Whether `thumbprint` appears in `pinned`, ignoring case
pub(crate) fn is_pinned(pinned: &[String], thumbprint: &str) -> bool {
    pinned.iter().any(|p| thumbprints_match(p, thumbprint))
}
