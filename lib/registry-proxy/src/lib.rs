//! Routing-entry construction for registered endpoints
pub mod factory;
pub mod mtls;

pub use factory::{forwarding_target, TlsRouteFactory};
pub use mtls::{client_config, load_certificates, load_private_key};
