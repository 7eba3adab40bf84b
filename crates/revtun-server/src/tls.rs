//! TLS certificate loading and self-signed development certificate
//! generation, mirroring the reference stack's own `main.rs` helpers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use revtun_proto::{TunnelError, TunnelResult};

/// Load a cert/key PEM pair into a `rustls::ServerConfig`.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> TunnelResult<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| TunnelError::Config(format!("cannot read cert {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| TunnelError::Config(format!("cannot read key {}: {e}", key_path.display())))?;

    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TunnelError::Config(format!("bad cert pem: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| TunnelError::Config(format!("bad key pem: {e}")))?
        .ok_or_else(|| TunnelError::Config("no private key found in PEM".into()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TunnelError::Config(format!("invalid cert/key pair: {e}")))?;

    Ok(config)
}

/// Generate a self-signed certificate for development use and write it to
/// the given paths.
pub fn generate_self_signed_cert(cert_path: &Path, key_path: &Path) -> TunnelResult<()> {
    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()])
        .map_err(|e| TunnelError::Config(format!("cert params: {e}")))?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "revtun-server dev cert");

    let key_pair =
        rcgen::KeyPair::generate().map_err(|e| TunnelError::Config(format!("keygen: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TunnelError::Config(format!("self-sign: {e}")))?;

    std::fs::write(cert_path, cert.pem())?;
    std::fs::write(key_path, key_pair.serialize_pem())?;
    Ok(())
}

/// Build the optional TLS config for the tunnel listener from the resolved
/// server config: generates a dev cert first if asked, then loads
/// whichever cert/key pair ends up configured.
pub fn resolve_tls_config(
    cert_path: Option<&PathBuf>,
    key_path: Option<&PathBuf>,
    generate_cert: bool,
) -> TunnelResult<Option<Arc<rustls::ServerConfig>>> {
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => {
            if generate_cert {
                generate_self_signed_cert(cert, key)?;
            }
            Ok(Some(Arc::new(load_tls_config(cert, key)?)))
        }
        (None, None) => Ok(None),
        _ => Err(TunnelError::Config(
            "cert and key must both be set, or neither".into(),
        )),
    }
}
