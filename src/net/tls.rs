//! TLS material handling.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::net::ListenError;

/// Certificate chain and private key, both PEM, as raw bytes.
///
/// Text and byte inputs end up identical: `TlsConfig::new("-----BEGIN...", ...)`
/// and `TlsConfig::new(vec![..], ...)` both store bytes.
#[derive(Clone)]
pub struct TlsConfig {
    certificate: Vec<u8>,
    private_key: Vec<u8>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("certificate_len", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl TlsConfig {
    pub fn new(certificate: impl Into<Vec<u8>>, private_key: impl Into<Vec<u8>>) -> Self {
        Self {
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// Load certificate and key from PEM files.
    pub async fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, std::io::Error> {
        if !cert_path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Certificate file not found: {:?}", cert_path),
            ));
        }
        if !key_path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Private key file not found: {:?}", key_path),
            ));
        }

        let certificate = tokio::fs::read(cert_path).await?;
        let private_key = tokio::fs::read(key_path).await?;
        Ok(Self::new(certificate, private_key))
    }

    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// Check that the PEM blocks parse and contain what a server needs.
    pub fn validate(&self) -> Result<(), ListenError> {
        let certs = rustls_pemfile::certs(&mut self.certificate.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ListenError::Tls(format!("Failed to parse certificates: {}", e)))?;
        if certs.is_empty() {
            return Err(ListenError::Tls("No certificates found in PEM".into()));
        }

        rustls_pemfile::private_key(&mut self.private_key.as_slice())
            .map_err(|e| ListenError::Tls(format!("Failed to parse private key: {}", e)))?
            .ok_or_else(|| ListenError::Tls("No private key found in PEM".into()))?;

        Ok(())
    }

    /// Build the rustls server configuration used by axum-server.
    pub async fn rustls_config(&self) -> Result<RustlsConfig, ListenError> {
        self.validate()?;
        RustlsConfig::from_pem(self.certificate.clone(), self.private_key.clone())
            .await
            .map_err(|e| ListenError::Tls(e.to_string()))
    }
}
