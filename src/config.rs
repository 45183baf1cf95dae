//! Resolver configuration and the trust anchors loaded from it.
//!
//! Configuration is read once from YAML. The certificate and CRL files it
//! names are loaded into an immutable [`TrustAnchorSet`] that is then shared
//! behind an `Arc` by every resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::verification::certificate::ParsedCertificate;
use crate::verification::chain::is_pinned;
use crate::verification::TrustDomain;

pub const DEFAULT_SML_DOMAIN: &str = "sml.peppolcentral.org";

/// How the end certificate's revocation status is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RevocationMode {
    #[default]
    NoCheck,
    /// Against the configured CRLs
    Offline,
    /// Network retrieval of revocation data; not available in-process
    Online,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub root_ca_thumbprints: Vec<String>,
    pub access_point_ca_thumbprints: Vec<String>,
    pub smp_ca_thumbprints: Vec<String>,
    /// PEM or DER files holding trusted root certificates
    pub extra_trusted_roots: Vec<PathBuf>,
    /// PEM or DER files holding intermediate certificates used for chain building
    pub extra_trusted_intermediates: Vec<PathBuf>,
    /// PEM or DER CRL files, consulted in offline revocation mode
    pub crls: Vec<PathBuf>,
    pub revocation_mode: RevocationMode,
}

fn default_sml_domain() -> String {
    DEFAULT_SML_DOMAIN.to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_sml_domain")]
    pub sml_domain: String,

    /// Per-request timeout of each metadata fetch
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default)]
    pub trust: TrustConfig,

    /// Root of the flat-file message store
    #[serde(default)]
    pub message_store_dir: Option<PathBuf>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            sml_domain: default_sml_domain(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            trust: TrustConfig::default(),
            message_store_dir: None,
        }
    }
}

impl ResolverConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        Self::from_yaml_str(&content)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Revoked serial numbers published by one issuer
#[derive(Debug, Clone)]
pub struct RevocationList {
    pub issuer: String,
    pub next_update: Option<DateTime<Utc>>,
    revoked_serials: Vec<Vec<u8>>,
}

impl RevocationList {
    pub fn from_der(der: &[u8]) -> Result<Self, String> {
        let (_, crl) = x509_parser::parse_x509_crl(der).map_err(|e| format!("invalid CRL DER: {e}"))?;
        Ok(Self {
            issuer: crl.issuer().to_string(),
            next_update: crl
                .next_update()
                .and_then(|t| DateTime::from_timestamp(t.timestamp(), 0)),
            revoked_serials: crl
                .iter_revoked_certificates()
                .map(|revoked| revoked.raw_serial().to_vec())
                .collect(),
        })
    }

    /// A list without `nextUpdate` never goes stale
    pub fn is_current_at(&self, now: DateTime<Utc>) -> bool {
        self.next_update.map_or(true, |next| now <= next)
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked_serials.iter().any(|s| s.as_slice() == serial)
    }
}

/// Pinned thumbprints and trust material, immutable once built
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorSet {
    root_thumbprints: Vec<String>,
    access_point_ca_thumbprints: Vec<String>,
    smp_ca_thumbprints: Vec<String>,
    trusted_roots: Vec<ParsedCertificate>,
    intermediates: Vec<ParsedCertificate>,
    revocation_lists: Vec<RevocationList>,
    revocation_mode: RevocationMode,
}

impl TrustAnchorSet {
    pub fn new(revocation_mode: RevocationMode) -> Self {
        Self {
            revocation_mode,
            ..Self::default()
        }
    }

    /// Loads every file named by `config`
    pub fn from_config(config: &TrustConfig) -> Result<Self, ConfigError> {
        let mut anchors = Self::new(config.revocation_mode);
        anchors.root_thumbprints = config.root_ca_thumbprints.clone();
        anchors.access_point_ca_thumbprints = config.access_point_ca_thumbprints.clone();
        anchors.smp_ca_thumbprints = config.smp_ca_thumbprints.clone();

        for path in &config.extra_trusted_roots {
            anchors.trusted_roots.extend(load_certificates(path)?);
        }
        for path in &config.extra_trusted_intermediates {
            anchors.intermediates.extend(load_certificates(path)?);
        }
        for path in &config.crls {
            anchors.revocation_lists.extend(load_crls(path)?);
        }

        tracing::debug!(
            roots = anchors.trusted_roots.len(),
            intermediates = anchors.intermediates.len(),
            crls = anchors.revocation_lists.len(),
            "loaded trust anchors"
        );
        Ok(anchors)
    }

    pub fn with_root_thumbprint(mut self, thumbprint: impl Into<String>) -> Self {
        self.root_thumbprints.push(thumbprint.into());
        self
    }

    /// Pins an intermediate CA for `domain`; [`TrustDomain::None`] has no pins and is ignored
    pub fn with_intermediate_thumbprint(mut self, domain: TrustDomain, thumbprint: impl Into<String>) -> Self {
        match domain {
            TrustDomain::AccessPointCA => self.access_point_ca_thumbprints.push(thumbprint.into()),
            TrustDomain::SmpCA => self.smp_ca_thumbprints.push(thumbprint.into()),
            TrustDomain::None => {}
        }
        self
    }

    pub fn with_trusted_root(mut self, der: &[u8]) -> Result<Self, ConfigError> {
        let cert = ParsedCertificate::from_der(der).map_err(|e| ConfigError::InvalidCertificate("<memory>".into(), e))?;
        self.trusted_roots.push(cert);
        Ok(self)
    }

    pub fn with_trusted_intermediate(mut self, der: &[u8]) -> Result<Self, ConfigError> {
        let cert = ParsedCertificate::from_der(der).map_err(|e| ConfigError::InvalidCertificate("<memory>".into(), e))?;
        self.intermediates.push(cert);
        Ok(self)
    }

    pub fn with_crl(mut self, der: &[u8]) -> Result<Self, ConfigError> {
        let crl = RevocationList::from_der(der).map_err(|e| ConfigError::InvalidCrl("<memory>".into(), e))?;
        self.revocation_lists.push(crl);
        Ok(self)
    }

    pub fn revocation_mode(&self) -> RevocationMode {
        self.revocation_mode
    }

    pub fn is_pinned_root(&self, thumbprint: &str) -> bool {
        is_pinned(&self.root_thumbprints, thumbprint)
    }

    pub fn is_pinned_intermediate(&self, domain: TrustDomain, thumbprint: &str) -> bool {
        match domain {
            TrustDomain::AccessPointCA => is_pinned(&self.access_point_ca_thumbprints, thumbprint),
            TrustDomain::SmpCA => is_pinned(&self.smp_ca_thumbprints, thumbprint),
            TrustDomain::None => false,
        }
    }

    pub(crate) fn trusted_roots(&self) -> &[ParsedCertificate] {
        &self.trusted_roots
    }

    pub(crate) fn intermediates(&self) -> &[ParsedCertificate] {
        &self.intermediates
    }

    pub(crate) fn revocation_lists_from<'a>(&'a self, issuer: &'a str) -> impl Iterator<Item = &'a RevocationList> + 'a {
        self.revocation_lists.iter().filter(move |crl| crl.issuer == issuer)
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::Io(path.display().to_string(), e))
}

/// DER blocks of a PEM file carrying `label`, or the whole file if it is not PEM
fn der_blocks(bytes: &[u8], label: &str, path: &Path) -> Result<Vec<Vec<u8>>, String> {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    if !bytes[start..].starts_with(b"-----BEGIN") {
        return Ok(vec![bytes.to_vec()]);
    }
    let mut blocks = Vec::new();
    for pem in x509_parser::pem::Pem::iter_from_buffer(bytes) {
        let pem = pem.map_err(|e| format!("invalid PEM in {}: {e}", path.display()))?;
        if pem.label == label {
            blocks.push(pem.contents);
        }
    }
    Ok(blocks)
}

fn load_certificates(path: &Path) -> Result<Vec<ParsedCertificate>, ConfigError> {
    let source = path.display().to_string();
    let bytes = read(path)?;
    der_blocks(&bytes, "CERTIFICATE", path)
        .map_err(|e| ConfigError::InvalidCertificate(source.clone(), e))?
        .iter()
        .map(|der| ParsedCertificate::from_der(der).map_err(|e| ConfigError::InvalidCertificate(source.clone(), e)))
        .collect()
}

fn load_crls(path: &Path) -> Result<Vec<RevocationList>, ConfigError> {
    let source = path.display().to_string();
    let bytes = read(path)?;
    der_blocks(&bytes, "X509 CRL", path)
        .map_err(|e| ConfigError::InvalidCrl(source.clone(), e))?
        .iter()
        .map(|der| RevocationList::from_der(der).map_err(|e| ConfigError::InvalidCrl(source.clone(), e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::certificate::thumbprint;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_yaml() {
        let config = ResolverConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.sml_domain, DEFAULT_SML_DOMAIN);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(20));
        assert_eq!(config.trust.revocation_mode, RevocationMode::NoCheck);
        assert!(config.message_store_dir.is_none());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
sml_domain: sml.example.org
fetch_timeout_secs: 5
message_store_dir: /var/lib/ap
trust:
  root_ca_thumbprints: ["AA11"]
  smp_ca_thumbprints: ["bb22"]
  revocation_mode: Offline
"#;
        let config = ResolverConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.sml_domain, "sml.example.org");
        assert_eq!(config.fetch_timeout_secs, 5);
        assert_eq!(config.trust.revocation_mode, RevocationMode::Offline);

        let anchors = TrustAnchorSet::from_config(&config.trust).unwrap();
        assert!(anchors.is_pinned_root("aa11"));
        assert!(anchors.is_pinned_intermediate(TrustDomain::SmpCA, "BB22"));
        assert!(!anchors.is_pinned_intermediate(TrustDomain::AccessPointCA, "BB22"));
        assert!(!anchors.is_pinned_intermediate(TrustDomain::None, "BB22"));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ResolverConfig::from_yaml_str("fetch_timeout_secs: [1, 2]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_loads_pem_and_der_files() {
        let certified = rcgen::generate_simple_self_signed(["root.example".to_string()]).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let pem_path = dir.path().join("root.pem");
        std::fs::write(&pem_path, certified.cert.pem()).unwrap();
        let der_path = dir.path().join("root.der");
        std::fs::File::create(&der_path)
            .unwrap()
            .write_all(certified.cert.der())
            .unwrap();

        let trust = TrustConfig {
            extra_trusted_roots: vec![pem_path, der_path],
            ..TrustConfig::default()
        };
        let anchors = TrustAnchorSet::from_config(&trust).unwrap();
        assert_eq!(anchors.trusted_roots().len(), 2);
        assert_eq!(anchors.trusted_roots()[0].thumbprint(), thumbprint(certified.cert.der()));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let trust = TrustConfig {
            crls: vec![PathBuf::from("/nonexistent/crl.pem")],
            ..TrustConfig::default()
        };
        assert!(matches!(
            TrustAnchorSet::from_config(&trust),
            Err(ConfigError::Io(_, _))
        ));
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.der");
        std::fs::write(&path, b"garbage").unwrap();
        let trust = TrustConfig {
            extra_trusted_intermediates: vec![path],
            ..TrustConfig::default()
        };
        assert!(matches!(
            TrustAnchorSet::from_config(&trust),
            Err(ConfigError::InvalidCertificate(_, _))
        ));
    }
}
