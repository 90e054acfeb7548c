//! TLS setup for the https listener.
//!
//! Certificate and key are loaded exactly once, at gateway construction.
//! Any failure here is fatal: a listener configured for TLS never serves
//! in plaintext and never retries a bad certificate.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::TlsError;

pub fn load_acceptor(cert_file: &str, key_file: &str) -> Result<TlsAcceptor, TlsError> {
    let certs = load_certs(cert_file)?;
    let key = load_private_key(key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!(cert = cert_file, "TLS acceptor ready");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn open(path: &str) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_string(),
            source,
        })
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_string()));
    }
    Ok(certs)
}

/// First PKCS#8, PKCS#1 or SEC1 key in the file.
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| TlsError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::NoPrivateKeys(path.to_string()))
}
