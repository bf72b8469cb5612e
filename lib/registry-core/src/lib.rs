//! Core endpoint registry functionality
//!
//! This library provides:
//! - Record and credential storage seams with in-memory and file backends
//! - Visibility filtering for non-administrative callers
//! - Proxy registry holding the live route for each endpoint
//! - Lifecycle coordinator keeping records, credentials and routes in step

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod registry;
pub mod route;
pub mod store;
pub mod visibility;

pub use coordinator::{EndpointCoordinator, RestoreSummary};
pub use credentials::{CredentialStore, FsCredentialStore};
pub use error::{CreateStep, CredentialError, ProxyError, RegistryError, Result, StoreError};
pub use registry::ProxyRegistry;
pub use route::{RouteEntry, RouteFactory, RouteTransport};
pub use store::{EndpointStore, FileEndpointStore, MemoryEndpointStore};
pub use visibility::filter_visible;
