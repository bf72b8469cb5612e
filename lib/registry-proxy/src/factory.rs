//! Route factory translating endpoint records into forwarding routes

use crate::mtls::client_config;
use async_trait::async_trait;
use registry_api::{Endpoint, TlsFileKind};
use registry_core::{ProxyError, RouteEntry, RouteFactory, RouteTransport};
use tracing::debug;

/// Translate an endpoint address into the base URL requests are forwarded to.
///
/// The scheme always agrees with the TLS flag: `tcp://` and `http://`
/// addresses become `https://` when TLS is on and `http://` otherwise. An
/// `https://` address needs TLS, since a plain route cannot speak it.
pub fn forwarding_target(url: &str, tls: bool) -> Result<String, ProxyError> {
    let invalid = |reason: &str| ProxyError::InvalidAddress {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(invalid("address is empty"));
    }

    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| invalid("missing scheme"))?;
    let host = rest.trim_end_matches('/');
    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    match scheme.to_lowercase().as_str() {
        "tcp" | "http" => {
            let scheme = if tls { "https" } else { "http" };
            Ok(format!("{}://{}", scheme, host))
        }
        "https" if tls => Ok(format!("https://{}", host)),
        "https" => Err(invalid("https address requires TLS to be enabled")),
        other => Err(invalid(&format!("unsupported scheme '{}'", other))),
    }
}

/// Builds plain or mutual-TLS routes, reading credential material from the
/// paths recorded on the endpoint.
#[derive(Clone, Debug, Default)]
pub struct TlsRouteFactory;

impl TlsRouteFactory {
    pub fn new() -> Self {
        Self
    }

    async fn read_material(endpoint: &Endpoint, kind: TlsFileKind) -> Result<Vec<u8>, ProxyError> {
        let path = endpoint.credential_path(kind);
        if path.is_empty() {
            return Err(ProxyError::MalformedMaterial {
                kind,
                reason: "no path recorded".to_string(),
            });
        }
        tokio::fs::read(path)
            .await
            .map_err(|source| ProxyError::MaterialUnreadable {
                kind,
                path: path.to_string(),
                source,
            })
    }
}

#[async_trait]
impl RouteFactory for TlsRouteFactory {
    async fn build(&self, endpoint: &Endpoint) -> Result<RouteEntry, ProxyError> {
        let target = forwarding_target(&endpoint.url, endpoint.tls)?;

        let transport = if endpoint.tls {
            let ca = Self::read_material(endpoint, TlsFileKind::Ca).await?;
            let cert = Self::read_material(endpoint, TlsFileKind::Cert).await?;
            let key = Self::read_material(endpoint, TlsFileKind::Key).await?;
            RouteTransport::Tls(client_config(&ca, &cert, &key)?)
        } else {
            RouteTransport::Plain
        };

        debug!("Built {} route for endpoint {} -> {}", if endpoint.tls { "TLS" } else { "plain" }, endpoint.id, target);
        Ok(RouteEntry::new(endpoint.id, target, transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use registry_api::EndpointId;

    fn endpoint(url: &str) -> Endpoint {
        let mut endpoint = Endpoint::new("prod", url);
        endpoint.id = EndpointId(1);
        endpoint
    }

    #[test]
    fn test_forwarding_target_translates_tcp() {
        assert_eq!(forwarding_target("tcp://10.0.0.1:2375", false).unwrap(), "http://10.0.0.1:2375");
        assert_eq!(forwarding_target("tcp://10.0.0.1:2376", true).unwrap(), "https://10.0.0.1:2376");
        assert_eq!(forwarding_target(" TCP://docker:2375/ ", false).unwrap(), "http://docker:2375");
    }

    #[test]
    fn test_forwarding_target_scheme_follows_tls() {
        assert_eq!(forwarding_target("http://agent:9001", false).unwrap(), "http://agent:9001");
        assert_eq!(forwarding_target("http://agent:9001", true).unwrap(), "https://agent:9001");
        assert_eq!(forwarding_target("HTTPS://agent:9001", true).unwrap(), "https://agent:9001");

        let err = forwarding_target("https://agent:9001", false).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidAddress { .. }));
    }

    #[test]
    fn test_forwarding_target_rejects_invalid() {
        for url in ["", "   ", "10.0.0.1:2375", "tcp://", "unix:///var/run/docker.sock", "ftp://host"] {
            let err = forwarding_target(url, false).unwrap_err();
            assert!(matches!(err, ProxyError::InvalidAddress { .. }), "{} should be rejected", url);
        }
    }

    #[tokio::test]
    async fn test_plain_route() {
        let route = TlsRouteFactory::new().build(&endpoint("tcp://10.0.0.1:2375")).await.unwrap();
        assert_eq!(route.endpoint_id, EndpointId(1));
        assert_eq!(route.target, "http://10.0.0.1:2375");
        assert!(!route.transport.is_tls());
    }

    #[tokio::test]
    async fn test_tls_route_with_missing_material() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint("tcp://10.0.0.1:2376");
        endpoint.tls = true;
        for kind in TlsFileKind::ALL {
            let path = dir.path().join(kind.file_name());
            endpoint.set_credential_path(kind, path.to_string_lossy().into_owned());
        }

        let err = TlsRouteFactory::new().build(&endpoint).await.unwrap_err();
        match err {
            ProxyError::MaterialUnreadable { kind, path, .. } => {
                assert_eq!(kind, TlsFileKind::Ca);
                assert!(path.ends_with("ca.pem"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tls_route_with_malformed_material() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint("tcp://10.0.0.1:2376");
        endpoint.tls = true;
        for kind in TlsFileKind::ALL {
            let path = dir.path().join(kind.file_name());
            std::fs::write(&path, b"not pem").unwrap();
            endpoint.set_credential_path(kind, path.to_string_lossy().into_owned());
        }

        let err = TlsRouteFactory::new().build(&endpoint).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedMaterial { kind: TlsFileKind::Ca, .. }));
    }

    #[tokio::test]
    async fn test_tls_route_without_paths() {
        let mut endpoint = endpoint("tcp://10.0.0.1:2376");
        endpoint.tls = true;
        let err = TlsRouteFactory::new().build(&endpoint).await.unwrap_err();
        assert!(matches!(err, ProxyError::MalformedMaterial { kind: TlsFileKind::Ca, .. }));
    }

    #[tokio::test]
    async fn test_invalid_address_fails_before_reading_material() {
        let mut endpoint = endpoint("");
        endpoint.tls = true;
        let err = TlsRouteFactory::new().build(&endpoint).await.unwrap_err();
        assert!(matches!(err, ProxyError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_tls_route_with_valid_material() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint("tcp://10.0.0.1:2376");
        endpoint.tls = true;
        for (kind, pem) in [
            (TlsFileKind::Ca, &include_bytes!("../testdata/ca.pem")[..]),
            (TlsFileKind::Cert, &include_bytes!("../testdata/cert.pem")[..]),
            (TlsFileKind::Key, &include_bytes!("../testdata/key.pem")[..]),
        ] {
            let path = dir.path().join(kind.file_name());
            std::fs::write(&path, pem).unwrap();
            endpoint.set_credential_path(kind, path.to_string_lossy().into_owned());
        }

        let route = TlsRouteFactory::new().build(&endpoint).await.unwrap();
        assert_eq!(route.endpoint_id, EndpointId(1));
        assert_eq!(route.target, "https://10.0.0.1:2376");
        assert!(route.transport.is_tls());
    }
}
