//! Cryptographic checks applied to SMP metadata.
//!
//! This module provides XML-DSig verification of signed metadata, the
//! canonicalization it depends on, and X.509 chain validation of the signer
//! against the pinned CA hierarchy.

pub mod c14n;
pub mod certificate;
pub mod chain;
pub mod signature;

pub use certificate::{subject_unique_identifier, thumbprint, thumbprints_match};
pub use chain::{check_subject_uid, CertificateChainValidator, TrustDomain};
pub use self::signature::{digest, verify_signature, SignedBy, DSIG_NS};

use std::sync::Arc;

use crate::config::TrustAnchorSet;
use crate::error::ResolutionError;

/// Verifies a signed metadata document and validates its signer in the SMP-CA domain.
///
/// Returns the signer's DER certificate.
pub fn verify_metadata(xml: &str, anchors: &Arc<TrustAnchorSet>) -> Result<Vec<u8>, ResolutionError> {
    let signed_by = verify_signature(xml)?;
    CertificateChainValidator::new(Arc::clone(anchors), TrustDomain::SmpCA)
        .validate_with(&signed_by.signer, &signed_by.supplemental)?;
    Ok(signed_by.signer)
}
