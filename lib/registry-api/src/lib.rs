//! Endpoint registry API types
//!
//! This library defines the data model shared by the registry crates:
//! - Endpoint: a registered container-runtime daemon and its access lists
//! - CallerContext: the identity facts supplied with every request
//! - Request specs for create, update and access-list changes

pub mod endpoint;
pub mod caller;
pub mod request;

pub use endpoint::{Endpoint, EndpointId, TeamId, TlsFileKind, UserId};
pub use caller::{CallerContext, CallerRole};
pub use request::{AccessUpdate, CreateEndpoint, CreatedEndpoint, UpdateEndpoint};
