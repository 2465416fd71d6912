//! TLS configuration from in-memory certificate material.

use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};

use crate::config::TlsMaterial;

/// Build a rustls server configuration from PEM key and certificate bytes.
pub async fn load_tls_config(material: &TlsMaterial) -> Result<RustlsConfig, std::io::Error> {
    RustlsConfig::from_pem(material.cert.clone(), material.key.clone()).await
}

/// Acceptor performing the server-side handshake on each connection.
pub async fn tls_acceptor(material: &TlsMaterial) -> Result<RustlsAcceptor, std::io::Error> {
    Ok(RustlsAcceptor::new(load_tls_config(material).await?))
}
