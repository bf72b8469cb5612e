use registry_api::{EndpointId, TlsFileKind};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failures reported by an endpoint record store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Endpoint not found: {0}")]
    NotFound(EndpointId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failures reported by a credential material store
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Credential I/O error for endpoint {id}: {source}")]
    Io {
        id: EndpointId,
        #[source]
        source: std::io::Error,
    },

    #[error("Credential path for endpoint {id} ({kind}) is not valid UTF-8")]
    InvalidPath { id: EndpointId, kind: TlsFileKind },
}

/// Failures building a routing entry
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Invalid endpoint address {url}: {reason}")]
    InvalidAddress { url: String, reason: String },

    #[error("Unable to read {kind} material at {path}: {source}")]
    MaterialUnreadable {
        kind: TlsFileKind,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {kind} material: {reason}")]
    MalformedMaterial { kind: TlsFileKind, reason: String },

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Stage of endpoint creation that could not be completed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateStep {
    ProvisionCredentials,
    PersistCredentials,
}

impl fmt::Display for CreateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateStep::ProvisionCredentials => f.write_str("credential provisioning"),
            CreateStep::PersistCredentials => f.write_str("credential persistence"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Endpoint not found: {0}")]
    NotFound(EndpointId),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Unable to provision credentials for endpoint {id}: {source}")]
    CredentialProvisionFailed {
        id: EndpointId,
        #[source]
        source: CredentialError,
    },

    #[error("Unable to delete credentials for endpoint {id}: {source}")]
    CredentialDeletionFailed {
        id: EndpointId,
        #[source]
        source: CredentialError,
    },

    #[error("Unable to create proxy for endpoint {id}: {source}")]
    ProxyConstructionFailed {
        id: EndpointId,
        #[source]
        source: ProxyError,
    },

    #[error("Endpoint management is disabled")]
    ManagementDisabled,

    /// The record exists but TLS could not be enabled; it was left without
    /// TLS and needs a manual retry.
    #[error("Endpoint {id} created without TLS, {step} failed: {source}")]
    CreateIncomplete {
        id: EndpointId,
        step: CreateStep,
        #[source]
        source: Box<RegistryError>,
    },

    /// Disabling TLS removed the credential material but the record could
    /// not be saved, so it still carries TLS and dangling paths until the
    /// update is retried.
    #[error("Endpoint {id} still records TLS but its credential material was already removed; retry the update: {source}")]
    TlsDisableIncomplete {
        id: EndpointId,
        #[source]
        source: StoreError,
    },
}

impl RegistryError {
    /// Whether the caller caused the failure rather than the environment
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistryError::NotFound(_)
                | RegistryError::ValidationFailed(_)
                | RegistryError::ManagementDisabled
        )
    }
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => RegistryError::NotFound(id),
            StoreError::Unavailable(reason) => RegistryError::StorageUnavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_conversion() {
        let err: RegistryError = StoreError::NotFound(EndpointId(3)).into();
        assert!(matches!(err, RegistryError::NotFound(EndpointId(3))));

        let err: RegistryError = StoreError::Unavailable("disk full".to_string()).into();
        assert!(matches!(err, RegistryError::StorageUnavailable(ref r) if r == "disk full"));
    }

    #[test]
    fn test_client_error_classification() {
        assert!(RegistryError::NotFound(EndpointId(1)).is_client_error());
        assert!(RegistryError::ValidationFailed("empty name".into()).is_client_error());
        assert!(RegistryError::ManagementDisabled.is_client_error());
        assert!(!RegistryError::StorageUnavailable("down".into()).is_client_error());

        let proxy = RegistryError::ProxyConstructionFailed {
            id: EndpointId(1),
            source: ProxyError::Tls("bad key".into()),
        };
        assert!(!proxy.is_client_error());
    }

    #[test]
    fn test_create_incomplete_names_failed_step() {
        let err = RegistryError::CreateIncomplete {
            id: EndpointId(9),
            step: CreateStep::PersistCredentials,
            source: Box::new(RegistryError::StorageUnavailable("timeout".into())),
        };
        let message = err.to_string();
        assert!(message.contains("credential persistence"));
        assert!(message.contains("timeout"));
    }

    #[test]
    fn test_tls_disable_incomplete_is_server_error() {
        let err = RegistryError::TlsDisableIncomplete {
            id: EndpointId(4),
            source: StoreError::Unavailable("disk full".into()),
        };
        assert!(!err.is_client_error());
        let message = err.to_string();
        assert!(message.contains("already removed"));
        assert!(message.contains("disk full"));
    }
}
