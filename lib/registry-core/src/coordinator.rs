//! Endpoint lifecycle coordination
//!
//! Creating, updating and deleting an endpoint touches three owners with
//! different failure modes: the record store, the credential store and the
//! proxy registry. The coordinator sequences those calls so that:
//!
//! - the TLS flag is only ever persisted together with its credential paths
//! - a route is never installed ahead of the durable record
//! - no route outlives its record
//!
//! Mutations of one endpoint run one at a time behind a per-id lock; different
//! endpoints proceed in parallel.

use crate::{
    filter_visible, CreateStep, CredentialError, CredentialStore, EndpointStore, ProxyRegistry,
    RegistryError, Result,
};
use dashmap::DashMap;
use registry_api::{
    AccessUpdate, CallerContext, CreateEndpoint, Endpoint, EndpointId, TlsFileKind, UpdateEndpoint,
};
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

/// Outcome of re-registering routes for stored endpoints
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub registered: usize,
    pub failed: usize,
}

pub struct EndpointCoordinator {
    store: Arc<dyn EndpointStore>,
    credentials: Arc<dyn CredentialStore>,
    proxies: Arc<ProxyRegistry>,
    management_enabled: bool,
    locks: DashMap<EndpointId, Arc<Mutex<()>>>,
}

impl EndpointCoordinator {
    pub fn new(
        store: Arc<dyn EndpointStore>,
        credentials: Arc<dyn CredentialStore>,
        proxies: Arc<ProxyRegistry>,
    ) -> Self {
        Self {
            store,
            credentials,
            proxies,
            management_enabled: true,
            locks: DashMap::new(),
        }
    }

    /// Disable create/update/delete when endpoints are managed externally
    pub fn with_management_enabled(mut self, enabled: bool) -> Self {
        self.management_enabled = enabled;
        self
    }

    pub fn management_enabled(&self) -> bool {
        self.management_enabled
    }

    pub fn routes(&self) -> &Arc<ProxyRegistry> {
        &self.proxies
    }

    /// Endpoints visible to the caller, ordered by id
    pub async fn list_visible(&self, caller: &CallerContext) -> Result<Vec<Endpoint>> {
        let endpoints = self.store.list().await?;
        let total = endpoints.len();
        let visible = filter_visible(endpoints, caller);
        debug!(
            "Caller {} ({:?}) sees {} of {} endpoint(s)",
            caller.user_id,
            caller.role,
            visible.len(),
            total
        );
        Ok(visible)
    }

    pub async fn get(&self, id: EndpointId) -> Result<Endpoint> {
        Ok(self.store.get(id).await?)
    }

    /// Register a new endpoint.
    ///
    /// The record is inserted without TLS first; when TLS is requested the
    /// credential paths are resolved and persisted in a second write. If that
    /// second stage fails the record stays without TLS and the error names
    /// the failed step. No route is registered here.
    pub async fn create(&self, spec: CreateEndpoint) -> Result<Endpoint> {
        self.ensure_management()?;

        let name = spec.name.trim();
        let url = spec.url.trim();
        if name.is_empty() {
            return Err(RegistryError::ValidationFailed("endpoint name is required".to_string()));
        }
        if url.is_empty() {
            return Err(RegistryError::ValidationFailed("endpoint URL is required".to_string()));
        }

        let mut endpoint = Endpoint::new(name, url);
        let id = self.store.insert(endpoint.clone()).await?;
        endpoint.id = id;
        info!("Created endpoint {} ({} at {})", id, endpoint.name, endpoint.url);

        if !spec.tls {
            return Ok(endpoint);
        }

        let _guard = self.lock(id).await;

        let mut with_tls = endpoint.clone();
        if let Err(source) = self.provision(&mut with_tls).await {
            self.release_slots(id).await;
            return Err(RegistryError::CreateIncomplete {
                id,
                step: CreateStep::ProvisionCredentials,
                source: Box::new(source),
            });
        }

        if let Err(e) = self.store.update(id, with_tls.clone()).await {
            self.release_slots(id).await;
            return Err(RegistryError::CreateIncomplete {
                id,
                step: CreateStep::PersistCredentials,
                source: Box::new(e.into()),
            });
        }

        info!("Enabled TLS for new endpoint {}", id);
        Ok(with_tls)
    }

    /// Change an endpoint's name, URL or TLS state and rebuild its route.
    ///
    /// Order: resolve or clear credentials, build the route, delete stale
    /// material (TLS off), install the route, persist. Any failure before
    /// the install leaves record and route as they were; a failed persist
    /// puts the previous route back. When TLS was being turned off the
    /// material is already deleted at that point, which is reported as
    /// [`RegistryError::TlsDisableIncomplete`].
    pub async fn update(&self, id: EndpointId, spec: UpdateEndpoint) -> Result<Endpoint> {
        self.ensure_management()?;
        let _guard = self.lock(id).await;

        let mut endpoint = self.store.get(id).await?;

        if let Some(name) = non_empty(spec.name.as_deref()) {
            endpoint.name = name.to_string();
        }
        if let Some(url) = non_empty(spec.url.as_deref()) {
            endpoint.url = url.to_string();
        }

        if spec.tls {
            self.provision(&mut endpoint).await?;
        } else {
            endpoint.clear_credentials();
        }

        let route = self
            .proxies
            .prepare(&endpoint)
            .await
            .map_err(|source| RegistryError::ProxyConstructionFailed { id, source })?;

        if !spec.tls {
            self.credentials
                .delete_all(id)
                .await
                .map_err(|source| RegistryError::CredentialDeletionFailed { id, source })?;
        }

        let previous = self.proxies.install(route);

        if let Err(e) = self.store.update(id, endpoint.clone()).await {
            self.proxies.reinstate(id, previous);
            if !spec.tls {
                // Material is gone but the stored record still points at it
                error!(
                    "Endpoint {} still records TLS but its material was removed; retry the update to disable TLS: {}",
                    id, e
                );
                return Err(RegistryError::TlsDisableIncomplete { id, source: e });
            }
            warn!("Persisting endpoint {} failed, restored previous route: {}", id, e);
            return Err(e.into());
        }

        info!("Updated endpoint {} (url: {}, tls: {})", id, endpoint.url, endpoint.tls);
        Ok(endpoint)
    }

    /// Replace the authorized user and/or team lists. Lists left out of the
    /// request keep their current value.
    pub async fn set_access(&self, id: EndpointId, access: AccessUpdate) -> Result<Endpoint> {
        let _guard = self.lock(id).await;

        let mut endpoint = self.store.get(id).await?;
        if let Some(users) = access.authorized_users {
            endpoint.authorized_users = dedup(users);
        }
        if let Some(teams) = access.authorized_teams {
            endpoint.authorized_teams = dedup(teams);
        }

        self.store.update(id, endpoint.clone()).await?;
        info!(
            "Updated access for endpoint {} ({} user(s), {} team(s))",
            id,
            endpoint.authorized_users.len(),
            endpoint.authorized_teams.len()
        );
        Ok(endpoint)
    }

    /// Remove an endpoint: route first, then the record, then its credential
    /// material. Cleanup failures after the record is gone are only logged.
    pub async fn delete(&self, id: EndpointId) -> Result<()> {
        self.ensure_management()?;
        let _guard = self.lock(id).await;

        let endpoint = self.store.get(id).await?;

        let previous = self.proxies.remove(id);

        if let Err(e) = self.store.delete(id).await {
            warn!("Deleting endpoint {} failed, restoring its route: {}", id, e);
            if previous.is_some() {
                self.proxies.reinstate(id, previous);
            }
            return Err(e.into());
        }

        if endpoint.tls {
            if let Err(e) = self.credentials.delete_all(id).await {
                error!("Endpoint {} deleted but its TLS material could not be removed: {}", id, e);
            }
        }

        info!("Deleted endpoint {}", id);
        Ok(())
    }

    /// Store uploaded PEM material for one credential slot. The record and
    /// route are unchanged until the next update enables or refreshes TLS.
    pub async fn upload_tls_file(&self, id: EndpointId, kind: TlsFileKind, data: &[u8]) -> Result<()> {
        self.ensure_management()?;
        if data.is_empty() {
            return Err(RegistryError::ValidationFailed(format!("{} file is empty", kind)));
        }

        let _guard = self.lock(id).await;
        self.store.get(id).await?;

        self.credentials
            .store(id, kind, data)
            .await
            .map_err(|source| RegistryError::CredentialProvisionFailed { id, source })?;

        info!("Uploaded {} material for endpoint {}", kind, id);
        Ok(())
    }

    /// Register a route for every stored endpoint, used after a restart.
    /// Endpoints whose route cannot be built are skipped and counted.
    pub async fn restore_routes(&self) -> Result<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        for listed in self.store.list().await? {
            let id = listed.id;
            let _guard = self.lock(id).await;

            // The endpoint may have been deleted since the listing
            let endpoint = match self.store.get(id).await {
                Ok(endpoint) => endpoint,
                Err(crate::StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            match self.proxies.register(&endpoint).await {
                Ok(_) => summary.registered += 1,
                Err(e) => {
                    warn!("Unable to restore route for endpoint {}: {}", id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Restored {} route(s), {} failed",
            summary.registered, summary.failed
        );
        Ok(summary)
    }

    fn ensure_management(&self) -> Result<()> {
        if self.management_enabled {
            Ok(())
        } else {
            Err(RegistryError::ManagementDisabled)
        }
    }

    async fn lock(&self, id: EndpointId) -> EndpointLock<'_> {
        let slot = self.locks.entry(id).or_default().clone();
        EndpointLock {
            locks: &self.locks,
            id,
            guard: Some(slot.lock_owned().await),
        }
    }

    /// Resolve all three credential paths and turn TLS on. The endpoint is
    /// only modified once every path is known.
    async fn provision(&self, endpoint: &mut Endpoint) -> Result<()> {
        let id = endpoint.id;
        let mut paths = Vec::with_capacity(TlsFileKind::ALL.len());

        for kind in TlsFileKind::ALL {
            let path = self
                .credentials
                .path_for(id, kind)
                .await
                .map_err(|source| RegistryError::CredentialProvisionFailed { id, source })?;
            let path = path.to_str().map(str::to_string).ok_or(
                RegistryError::CredentialProvisionFailed {
                    id,
                    source: CredentialError::InvalidPath { id, kind },
                },
            )?;
            paths.push((kind, path));
        }

        for (kind, path) in paths {
            endpoint.set_credential_path(kind, path);
        }
        endpoint.tls = true;
        Ok(())
    }

    async fn release_slots(&self, id: EndpointId) {
        if let Err(e) = self.credentials.delete_all(id).await {
            warn!("Unable to release credential slots for endpoint {}: {}", id, e);
        }
    }
}

/// Exclusive access to one endpoint. Dropping it releases the lock and
/// removes the slot from the table when no other task holds or waits on it,
/// so ids that were never found or were deleted leave nothing behind.
struct EndpointLock<'a> {
    locks: &'a DashMap<EndpointId, Arc<Mutex<()>>>,
    id: EndpointId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EndpointLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.id, |_, slot| Arc::strong_count(slot) == 1);
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn dedup<T: Copy + Eq + Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items.into_iter().filter(|item| seen.insert(*item)).collect()
}
