//! Proxy registry holding the live route for each endpoint

use crate::{ProxyError, RouteEntry, RouteFactory};
use dashmap::DashMap;
use registry_api::{Endpoint, EndpointId};
use std::sync::Arc;
use tracing::debug;

/// ProxyRegistry maps endpoint ids to their active route.
///
/// The map is sharded, so writes for different endpoints do not contend on
/// a single lock. Entries are built completely before insertion and handed
/// out as `Arc`, so readers never observe a partially built route.
pub struct ProxyRegistry {
    factory: Arc<dyn RouteFactory>,
    routes: DashMap<EndpointId, Arc<RouteEntry>>,
}

impl ProxyRegistry {
    pub fn new(factory: Arc<dyn RouteFactory>) -> Self {
        Self {
            factory,
            routes: DashMap::new(),
        }
    }

    /// Build a route for the endpoint without installing it
    pub async fn prepare(&self, endpoint: &Endpoint) -> Result<RouteEntry, ProxyError> {
        self.factory.build(endpoint).await
    }

    /// Install a prepared route, returning the one it replaced
    pub fn install(&self, route: RouteEntry) -> Option<Arc<RouteEntry>> {
        let id = route.endpoint_id;
        let previous = self.routes.insert(id, Arc::new(route));
        debug!("Installed route for endpoint {} (replaced: {})", id, previous.is_some());
        previous
    }

    /// Build and install a route, replacing any existing one.
    ///
    /// On a build failure nothing changes: the previous route, if any, stays.
    pub async fn register(&self, endpoint: &Endpoint) -> Result<Arc<RouteEntry>, ProxyError> {
        let route = Arc::new(self.prepare(endpoint).await?);
        self.routes.insert(endpoint.id, route.clone());
        debug!("Registered route for endpoint {}", endpoint.id);
        Ok(route)
    }

    /// Put back a route captured from [`ProxyRegistry::install`], or drop the
    /// current one when there was none before.
    pub fn reinstate(&self, id: EndpointId, previous: Option<Arc<RouteEntry>>) {
        match previous {
            Some(route) => {
                self.routes.insert(id, route);
                debug!("Reinstated previous route for endpoint {}", id);
            }
            None => {
                self.routes.remove(&id);
                debug!("Dropped route for endpoint {}", id);
            }
        }
    }

    /// Remove the route for an endpoint, returning it if one existed.
    /// Removing a missing route is not an error.
    pub fn remove(&self, id: EndpointId) -> Option<Arc<RouteEntry>> {
        let removed = self.routes.remove(&id).map(|(_, route)| route);
        if removed.is_some() {
            debug!("Removed route for endpoint {}", id);
        }
        removed
    }

    pub fn lookup(&self, id: EndpointId) -> Option<Arc<RouteEntry>> {
        self.routes.get(&id).map(|entry| entry.value().clone())
    }

    /// Ids with an installed route, ascending
    pub fn ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<_> = self.routes.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouteTransport;
    use async_trait::async_trait;

    struct PlainFactory;

    #[async_trait]
    impl RouteFactory for PlainFactory {
        async fn build(&self, endpoint: &Endpoint) -> Result<RouteEntry, ProxyError> {
            if endpoint.url.is_empty() {
                return Err(ProxyError::InvalidAddress {
                    url: endpoint.url.clone(),
                    reason: "empty".to_string(),
                });
            }
            Ok(RouteEntry::new(endpoint.id, endpoint.url.clone(), RouteTransport::Plain))
        }
    }

    fn registry() -> ProxyRegistry {
        ProxyRegistry::new(Arc::new(PlainFactory))
    }

    fn endpoint(id: u64, url: &str) -> Endpoint {
        let mut endpoint = Endpoint::new("ep", url);
        endpoint.id = EndpointId(id);
        endpoint
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry();
        registry.register(&endpoint(1, "http://10.0.0.1:2375")).await.unwrap();

        let route = registry.lookup(EndpointId(1)).unwrap();
        assert_eq!(route.target, "http://10.0.0.1:2375");
        assert!(!route.transport.is_tls());
        assert!(registry.lookup(EndpointId(2)).is_none());
    }

    #[tokio::test]
    async fn test_register_replaces_existing() {
        let registry = registry();
        registry.register(&endpoint(1, "http://old:2375")).await.unwrap();
        registry.register(&endpoint(1, "http://new:2375")).await.unwrap();

        assert_eq!(registry.route_count(), 1);
        assert_eq!(registry.lookup(EndpointId(1)).unwrap().target, "http://new:2375");
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_route() {
        let registry = registry();
        registry.register(&endpoint(1, "http://old:2375")).await.unwrap();

        assert!(registry.register(&endpoint(1, "")).await.is_err());
        assert_eq!(registry.lookup(EndpointId(1)).unwrap().target, "http://old:2375");

        assert!(registry.register(&endpoint(2, "")).await.is_err());
        assert!(registry.lookup(EndpointId(2)).is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = registry();
        registry.register(&endpoint(1, "http://a:2375")).await.unwrap();

        assert!(registry.remove(EndpointId(1)).is_some());
        assert!(registry.remove(EndpointId(1)).is_none());
        assert!(registry.lookup(EndpointId(1)).is_none());
    }

    #[tokio::test]
    async fn test_install_and_reinstate() {
        let registry = registry();
        let first = registry.prepare(&endpoint(1, "http://a:2375")).await.unwrap();
        assert!(registry.install(first).is_none());

        let second = registry.prepare(&endpoint(1, "http://b:2375")).await.unwrap();
        let previous = registry.install(second);
        assert_eq!(registry.lookup(EndpointId(1)).unwrap().target, "http://b:2375");

        registry.reinstate(EndpointId(1), previous);
        assert_eq!(registry.lookup(EndpointId(1)).unwrap().target, "http://a:2375");

        registry.reinstate(EndpointId(1), None);
        assert!(registry.lookup(EndpointId(1)).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_of_distinct_ids() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for id in 1..=64u64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .register(&endpoint(id, &format!("http://10.0.1.{}:2375", id)))
                    .await
                    .map(|_| ())
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(registry.route_count(), 64);
        assert_eq!(registry.ids().first(), Some(&EndpointId(1)));
        assert_eq!(registry.ids().last(), Some(&EndpointId(64)));
    }
}
