//! Credential material storage for mutual-TLS endpoints

use crate::CredentialError;
use async_trait::async_trait;
use registry_api::{EndpointId, TlsFileKind};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Provisions and removes the CA, certificate and key files of an endpoint
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Allocate the slot for one credential file and return its path. The
    /// file content itself arrives through [`CredentialStore::store`].
    async fn path_for(&self, id: EndpointId, kind: TlsFileKind) -> Result<PathBuf, CredentialError>;

    /// Write credential bytes into their slot
    async fn store(
        &self,
        id: EndpointId,
        kind: TlsFileKind,
        data: &[u8],
    ) -> Result<PathBuf, CredentialError>;

    /// Remove every credential file of the endpoint. Missing material is not
    /// an error.
    async fn delete_all(&self, id: EndpointId) -> Result<(), CredentialError>;
}

/// Filesystem layout: `<root>/tls/<id>/{ca,cert,key}.pem`
#[derive(Clone, Debug)]
pub struct FsCredentialStore {
    root: PathBuf,
}

impl FsCredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn endpoint_dir(&self, id: EndpointId) -> PathBuf {
        self.root.join("tls").join(id.to_string())
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn path_for(&self, id: EndpointId, kind: TlsFileKind) -> Result<PathBuf, CredentialError> {
        let dir = self.endpoint_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CredentialError::Io { id, source })?;
        let path = dir.join(kind.file_name());
        if path.to_str().is_none() {
            return Err(CredentialError::InvalidPath { id, kind });
        }
        Ok(path)
    }

    async fn store(
        &self,
        id: EndpointId,
        kind: TlsFileKind,
        data: &[u8],
    ) -> Result<PathBuf, CredentialError> {
        let path = self.path_for(id, kind).await?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|source| CredentialError::Io { id, source })?;
        debug!("Stored {} material for endpoint {} ({} bytes)", kind, id, data.len());
        Ok(path)
    }

    async fn delete_all(&self, id: EndpointId) -> Result<(), CredentialError> {
        match tokio::fs::remove_dir_all(self.endpoint_dir(id)).await {
            Ok(()) => {
                info!("Removed TLS material for endpoint {}", id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Io { id, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_path_for_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCredentialStore::new(dir.path());

        let ca = store.path_for(EndpointId(3), TlsFileKind::Ca).await.unwrap();
        let key = store.path_for(EndpointId(3), TlsFileKind::Key).await.unwrap();
        assert_eq!(ca, dir.path().join("tls").join("3").join("ca.pem"));
        assert_eq!(key, dir.path().join("tls").join("3").join("key.pem"));
        assert!(dir.path().join("tls").join("3").is_dir());
    }

    #[tokio::test]
    async fn test_store_and_delete_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCredentialStore::new(dir.path());

        let cert = store
            .store(EndpointId(1), TlsFileKind::Cert, b"-----BEGIN CERTIFICATE-----")
            .await
            .unwrap();
        assert_eq!(std::fs::read(&cert).unwrap(), b"-----BEGIN CERTIFICATE-----");

        store.delete_all(EndpointId(1)).await.unwrap();
        assert!(!cert.exists());
        assert!(!dir.path().join("tls").join("1").exists());
    }

    #[tokio::test]
    async fn test_delete_all_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCredentialStore::new(dir.path());
        assert!(store.delete_all(EndpointId(42)).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_all_leaves_other_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCredentialStore::new(dir.path());

        store.store(EndpointId(1), TlsFileKind::Ca, b"one").await.unwrap();
        let other = store.store(EndpointId(2), TlsFileKind::Ca, b"two").await.unwrap();

        store.delete_all(EndpointId(1)).await.unwrap();
        assert!(other.exists());
    }
}
