//! Durable storage of endpoint records

use crate::StoreError;
use async_trait::async_trait;
use registry_api::{Endpoint, EndpointId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Keyed record store for endpoints.
///
/// Implementations assign ids monotonically on insert and never reuse them.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    async fn get(&self, id: EndpointId) -> Result<Endpoint, StoreError>;

    /// All records, ordered by id
    async fn list(&self) -> Result<Vec<Endpoint>, StoreError>;

    /// Store a new record and return the id assigned to it
    async fn insert(&self, endpoint: Endpoint) -> Result<EndpointId, StoreError>;

    async fn update(&self, id: EndpointId, endpoint: Endpoint) -> Result<(), StoreError>;

    async fn delete(&self, id: EndpointId) -> Result<(), StoreError>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Records {
    last_id: u64,
    endpoints: BTreeMap<EndpointId, Endpoint>,
}

impl Records {
    fn get(&self, id: EndpointId) -> Result<Endpoint, StoreError> {
        self.endpoints.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn insert(&mut self, mut endpoint: Endpoint) -> EndpointId {
        self.last_id += 1;
        let id = EndpointId(self.last_id);
        endpoint.id = id;
        self.endpoints.insert(id, endpoint);
        id
    }

    fn update(&mut self, id: EndpointId, mut endpoint: Endpoint) -> Result<(), StoreError> {
        let slot = self.endpoints.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        endpoint.id = id;
        *slot = endpoint;
        Ok(())
    }

    fn delete(&mut self, id: EndpointId) -> Result<(), StoreError> {
        self.endpoints
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }
}

/// Volatile record store, used in tests and for ephemeral deployments
#[derive(Debug, Default)]
pub struct MemoryEndpointStore {
    records: RwLock<Records>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn get(&self, id: EndpointId) -> Result<Endpoint, StoreError> {
        self.records.read().await.get(id)
    }

    async fn list(&self) -> Result<Vec<Endpoint>, StoreError> {
        Ok(self.records.read().await.endpoints.values().cloned().collect())
    }

    async fn insert(&self, endpoint: Endpoint) -> Result<EndpointId, StoreError> {
        let id = self.records.write().await.insert(endpoint);
        debug!("Inserted endpoint record {}", id);
        Ok(id)
    }

    async fn update(&self, id: EndpointId, endpoint: Endpoint) -> Result<(), StoreError> {
        self.records.write().await.update(id, endpoint)
    }

    async fn delete(&self, id: EndpointId) -> Result<(), StoreError> {
        self.records.write().await.delete(id)?;
        debug!("Deleted endpoint record {}", id);
        Ok(())
    }
}

/// Record store persisted as a single JSON document.
///
/// Every mutation rewrites the document through a temporary file and a
/// rename; the in-memory copy only changes once the write succeeded.
#[derive(Debug)]
pub struct FileEndpointStore {
    path: PathBuf,
    records: RwLock<Records>,
}

impl FileEndpointStore {
    /// Open the store at `path`, loading existing records if the file exists
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Records>(&bytes).map_err(|e| {
                StoreError::Unavailable(format!("corrupt record file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Records::default(),
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "unable to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        info!(
            "Loaded {} endpoint record(s) from {}",
            records.endpoints.len(),
            path.display()
        );

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &Records) -> Result<(), StoreError> {
        let unavailable =
            |e: std::io::Error| StoreError::Unavailable(format!("{}: {}", self.path.display(), e));

        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Unavailable(format!("serialization failed: {}", e)))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(unavailable)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl EndpointStore for FileEndpointStore {
    async fn get(&self, id: EndpointId) -> Result<Endpoint, StoreError> {
        self.records.read().await.get(id)
    }

    async fn list(&self) -> Result<Vec<Endpoint>, StoreError> {
        Ok(self.records.read().await.endpoints.values().cloned().collect())
    }

    async fn insert(&self, endpoint: Endpoint) -> Result<EndpointId, StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        let id = next.insert(endpoint);
        self.persist(&next).await?;
        *records = next;
        debug!("Inserted endpoint record {}", id);
        Ok(id)
    }

    async fn update(&self, id: EndpointId, endpoint: Endpoint) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.update(id, endpoint)?;
        self.persist(&next).await?;
        *records = next;
        Ok(())
    }

    async fn delete(&self, id: EndpointId) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut next = records.clone();
        next.delete(id)?;
        self.persist(&next).await?;
        *records = next;
        debug!("Deleted endpoint record {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_assigns_monotonic_ids() {
        let store = MemoryEndpointStore::new();
        let first = store.insert(Endpoint::new("a", "tcp://a:2375")).await.unwrap();
        let second = store.insert(Endpoint::new("b", "tcp://b:2375")).await.unwrap();
        assert_eq!(first, EndpointId(1));
        assert_eq!(second, EndpointId(2));

        store.delete(second).await.unwrap();
        let third = store.insert(Endpoint::new("c", "tcp://c:2375")).await.unwrap();
        assert_eq!(third, EndpointId(3));
    }

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryEndpointStore::new();
        let id = store.insert(Endpoint::new("prod", "tcp://10.0.0.1:2375")).await.unwrap();

        let mut endpoint = store.get(id).await.unwrap();
        assert_eq!(endpoint.id, id);
        assert_eq!(endpoint.name, "prod");

        endpoint.name = "production".to_string();
        store.update(id, endpoint).await.unwrap();
        assert_eq!(store.get(id).await.unwrap().name, "production");

        store.delete(id).await.unwrap();
        assert_eq!(store.get(id).await, Err(StoreError::NotFound(id)));
        assert_eq!(store.delete(id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_memory_store_update_missing() {
        let store = MemoryEndpointStore::new();
        let result = store.update(EndpointId(5), Endpoint::new("x", "tcp://x:1")).await;
        assert_eq!(result, Err(StoreError::NotFound(EndpointId(5))));
    }

    #[tokio::test]
    async fn test_memory_store_list_ordered_by_id() {
        let store = MemoryEndpointStore::new();
        for name in ["c", "a", "b"] {
            store.insert(Endpoint::new(name, "tcp://h:2375")).await.unwrap();
        }
        let names: Vec<String> = store.list().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.json");

        {
            let store = FileEndpointStore::open(&path).await.unwrap();
            let id = store.insert(Endpoint::new("prod", "tcp://10.0.0.1:2375")).await.unwrap();
            let mut endpoint = store.get(id).await.unwrap();
            endpoint.authorized_users = vec![registry_api::UserId(4)];
            store.update(id, endpoint).await.unwrap();
            store.insert(Endpoint::new("tmp", "tcp://10.0.0.2:2375")).await.unwrap();
            store.delete(EndpointId(2)).await.unwrap();
        }

        let store = FileEndpointStore::open(&path).await.unwrap();
        let endpoints = store.list().await.unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].name, "prod");
        assert_eq!(endpoints[0].authorized_users, vec![registry_api::UserId(4)]);

        // ids keep increasing across restarts
        let id = store.insert(Endpoint::new("next", "tcp://10.0.0.3:2375")).await.unwrap();
        assert_eq!(id, EndpointId(3));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("endpoints.json");
        std::fs::write(&path, b"not json").unwrap();

        let result = FileEndpointStore::open(&path).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
