//! TLS setup: TLS 1.3 only, client certificates required, ALPN `h2` only.

use crate::config::Config;
use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// ALPN id for HTTP/2 over TLS
pub const H2_ALPN: &[u8] = b"h2";

/// Load a PEM certificate chain.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::certificate(path, format!("failed to parse certificate: {e}")))?;

    if certs.is_empty() {
        return Err(Error::certificate(path, "no certificates found"));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::certificate(path, format!("failed to parse private key: {e}")))?
        .ok_or_else(|| Error::certificate(path, "no private key found"))
}

/// Build the client CA pool. Files that cannot be read or contain no usable
/// certificate are logged and skipped; an empty pool is an error.
pub fn load_client_roots(paths: &[impl AsRef<Path>]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    for path in paths {
        let path = path.as_ref();
        match load_certs(path) {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                if added == 0 {
                    tracing::warn!(path = %path.display(), "could not add to CA pool");
                } else if ignored > 0 {
                    tracing::warn!(path = %path.display(), ignored, "some certificates ignored");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not add to CA pool"),
        }
    }

    if roots.is_empty() {
        return Err(Error::InvalidConfig(
            "client.cert_pool yielded no trusted CA certificates".into(),
        ));
    }
    Ok(roots)
}

/// Server TLS configuration for `config`.
pub fn server_config(config: &Config) -> Result<Arc<ServerConfig>> {
    let certs = load_certs(&config.server.cert)?;
    let key = load_key(&config.server.key)?;
    let roots = load_client_roots(config.client.cert_pool.as_slice())?;
    build_server_config(certs, key, roots)
}

pub fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: RootCertStore,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(client_roots), provider.clone())
            .build()?;

    let mut tls = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    tls.alpn_protocols = vec![H2_ALPN.to_vec()];

    Ok(Arc::new(tls))
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::certificate(path, format!("cannot open: {e}")))
}
