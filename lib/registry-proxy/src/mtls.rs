//! Mutual TLS client material for connecting to endpoint daemons

use registry_api::TlsFileKind;
use registry_core::ProxyError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use rustls_pemfile::{certs, read_all, Item};
use std::io::BufReader;
use std::sync::Arc;
use tracing::debug;

/// Parse every certificate in PEM data. Finding none is an error.
pub fn load_certificates(
    kind: TlsFileKind,
    pem_data: &[u8],
) -> Result<Vec<CertificateDer<'static>>, ProxyError> {
    let mut reader = BufReader::new(pem_data);
    let parsed = certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::MalformedMaterial {
            kind,
            reason: format!("failed to parse certificates: {}", e),
        })?;

    if parsed.is_empty() {
        return Err(ProxyError::MalformedMaterial {
            kind,
            reason: "no certificates found in PEM data".to_string(),
        });
    }
    Ok(parsed)
}

/// Parse the first private key (PKCS#8, PKCS#1 or SEC1) in PEM data
pub fn load_private_key(pem_data: &[u8]) -> Result<PrivateKeyDer<'static>, ProxyError> {
    let mut reader = BufReader::new(pem_data);
    let items: Vec<_> = read_all(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ProxyError::MalformedMaterial {
            kind: TlsFileKind::Key,
            reason: format!("failed to parse private key: {}", e),
        })?;

    items
        .into_iter()
        .find_map(|item| match item {
            Item::Pkcs8Key(k) => Some(PrivateKeyDer::Pkcs8(k)),
            Item::Pkcs1Key(k) => Some(PrivateKeyDer::Pkcs1(k)),
            Item::Sec1Key(k) => Some(PrivateKeyDer::Sec1(k)),
            _ => None,
        })
        .ok_or_else(|| ProxyError::MalformedMaterial {
            kind: TlsFileKind::Key,
            reason: "no private key found in PEM data".to_string(),
        })
}

/// Build a client configuration that trusts the endpoint's CA and presents
/// its client certificate.
pub fn client_config(
    ca_pem: &[u8],
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<Arc<ClientConfig>, ProxyError> {
    let ca_certs = load_certificates(TlsFileKind::Ca, ca_pem)?;
    let chain = load_certificates(TlsFileKind::Cert, cert_pem)?;
    let key = load_private_key(key_pem)?;

    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| ProxyError::MalformedMaterial {
                kind: TlsFileKind::Ca,
                reason: format!("failed to add CA certificate: {}", e),
            })?;
    }
    debug!("Loaded {} CA certificate(s), client chain of {}", roots.len(), chain.len());

    // Explicit provider: the default one is ambiguous when several are compiled in
    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| ProxyError::Tls(format!("failed to create client config: {}", e)))?;

    Ok(Arc::new(config))
}
