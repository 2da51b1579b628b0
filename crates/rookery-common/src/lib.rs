//! Rookery Common Types
//!
//! Shared building blocks for the rookery service-registry client:
//!
//! - **Protocol layer**: the Eureka REST wire types — instance records,
//!   registry envelopes, delta entries — with the registry's XML-to-JSON
//!   legacy shapes normalized at the deserialization boundary.
//! - **Configuration**: the `instance`/`eureka` sections, built-in defaults
//!   and YAML overlay loading.
//! - **Errors**: the taxonomy every component reports through.

pub mod config;
pub mod error;
pub mod protocol;

pub use config::{ClientConfig, InstanceConfig, RegistryConfig, TlsConfig};
pub use error::{Result, RookeryError};
pub use protocol::*;
