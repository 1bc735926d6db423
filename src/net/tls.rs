//! TLS identity for the WebTransport endpoint

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::time::{Duration, SystemTime};
use tracing::info;
use wtransport::tls::{Certificate, CertificateChain, PrivateKey};
use wtransport::Identity;

use crate::config::ServerConfig;

/// Browsers only accept pinned certificate hashes for certs valid at most 14 days
const SELF_SIGNED_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (serverCertificateHashes)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Resolve the server identity: explicit PEM paths first, then an
    /// in-memory self-signed certificate if enabled
    pub async fn load(config: &ServerConfig) -> Result<Self> {
        if let (Some(cert_path), Some(key_path)) = (&config.tls_cert_path, &config.tls_key_path) {
            info!("Loading TLS certificate from {}", cert_path);
            return Self::load_from_paths(cert_path, key_path).await;
        }

        if config.tls_self_signed {
            return Self::generate_self_signed();
        }

        Err(anyhow!(
            "No TLS certificate configured.\n\n\
            For development: set TLS_SELF_SIGNED=1.\n\
            For production: set TLS_CERT_PATH and TLS_KEY_PATH."
        ))
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .context("Failed to load certificate from PEM files")?;
        Ok(Self::from_identity(identity))
    }

    /// Fresh localhost certificate, never written to disk
    pub fn generate_self_signed() -> Result<Self> {
        let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
            .context("Invalid subject alt names")?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, "Sisyphi Dev");

        let now = SystemTime::now();
        params.not_before = now.into();
        params.not_after = (now + SELF_SIGNED_VALIDITY).into();

        let key_pair = KeyPair::generate().context("Failed to generate key pair")?;
        let cert = params
            .self_signed(&key_pair)
            .context("Failed to self-sign certificate")?;

        let certificate =
            Certificate::from_der(cert.der().to_vec()).context("Generated certificate is invalid")?;
        let private_key = PrivateKey::from_der_pkcs8(key_pair.serialize_der());
        let identity = Identity::new(CertificateChain::single(certificate), private_key);

        info!("Generated self-signed certificate");
        Ok(Self::from_identity(identity))
    }

    fn from_identity(identity: Identity) -> Self {
        let cert_hash = compute_cert_hash(&identity);
        info!("Certificate hash: {}", cert_hash);
        Self { identity, cert_hash }
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

fn compute_cert_hash(identity: &Identity) -> String {
    identity
        .certificate_chain()
        .as_slice()
        .first()
        .map(|cert| STANDARD.encode(digest(&SHA256, cert.der()).as_ref()))
        .unwrap_or_default()
}
