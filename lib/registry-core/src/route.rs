//! Routing entries installed in the proxy registry

use crate::ProxyError;
use async_trait::async_trait;
use registry_api::{Endpoint, EndpointId};
use std::sync::Arc;

/// How the forwarding path connects to the daemon
#[derive(Clone, Debug)]
pub enum RouteTransport {
    /// Plain TCP/HTTP
    Plain,
    /// Mutual TLS with the endpoint's CA, client certificate and key
    Tls(Arc<rustls::ClientConfig>),
}

impl RouteTransport {
    pub fn is_tls(&self) -> bool {
        matches!(self, RouteTransport::Tls(_))
    }
}

/// A fully constructed route to one endpoint's daemon
#[derive(Clone, Debug)]
pub struct RouteEntry {
    pub endpoint_id: EndpointId,
    /// Base URL requests are forwarded to
    pub target: String,
    pub transport: RouteTransport,
}

impl RouteEntry {
    pub fn new(endpoint_id: EndpointId, target: impl Into<String>, transport: RouteTransport) -> Self {
        Self {
            endpoint_id,
            target: target.into(),
            transport,
        }
    }
}

/// Builds routing entries from endpoint records.
///
/// Building must not have side effects on the registry; a failed build
/// leaves whatever route was installed before.
#[async_trait]
pub trait RouteFactory: Send + Sync {
    async fn build(&self, endpoint: &Endpoint) -> Result<RouteEntry, ProxyError>;
}
