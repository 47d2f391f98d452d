//! TLS context for `wss://` endpoints.
//!
//! pxGrid brokers usually present certificates from a private CA and may
//! require a client certificate, so the context is assembled from PEM files.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::config::ConfigError;

/// Where the TLS trust and identity material comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM certificate chain presented to the broker
    pub client_cert: Option<PathBuf>,
    /// PEM private key for `client_cert`; read from `client_cert` when unset
    pub client_key: Option<PathBuf>,
    /// PEM bundle of additional trusted CAs
    pub server_ca: Option<PathBuf>,
    /// Skip server certificate verification (ignored when `server_ca` is set)
    pub insecure: bool,
}

impl TlsOptions {
    pub fn with_client_identity(mut self, cert: impl Into<PathBuf>, key: Option<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = key;
        self
    }

    pub fn with_server_ca(mut self, ca: impl Into<PathBuf>) -> Self {
        self.server_ca = Some(ca.into());
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Build the rustls client configuration.
    ///
    /// Encrypted private keys are not supported.
    pub fn build(&self) -> Result<Arc<ClientConfig>, ConfigError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder =
            ClientConfig::builder_with_provider(provider.clone()).with_safe_default_protocol_versions()?;

        let builder = match (&self.server_ca, self.insecure) {
            (Some(ca), _) => {
                let mut roots = default_roots();
                for cert in load_certs(ca)? {
                    roots.add(cert)?;
                }
                debug!(ca = %ca.display(), trusted = roots.len(), "loaded server CA bundle");
                builder.with_root_certificates(roots)
            }
            (None, true) => {
                warn!("server certificate verification disabled");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoServerVerification { provider }))
            }
            (None, false) => builder.with_root_certificates(default_roots()),
        };

        let config = match &self.client_cert {
            Some(cert_path) => {
                let chain = load_certs(cert_path)?;
                let key_path = self.client_key.as_deref().unwrap_or(cert_path);
                let key = load_private_key(key_path)?;
                debug!(cert = %cert_path.display(), "presenting client certificate");
                builder.with_client_auth_cert(chain, key)?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(Arc::new(config))
    }
}

fn default_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ConfigError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

pub(crate) fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ConfigError::NoPrivateKey(path.to_path_buf()))
}

/// Accepts any server certificate. Handshake signatures are still checked.
#[derive(Debug)]
struct NoServerVerification {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
