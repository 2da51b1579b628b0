//! Rookery Client
//!
//! A Eureka-protocol registration and discovery client. The client
//! registers this process with a registry cluster, keeps the lease alive
//! with heartbeat renewals (re-registering when the registry answers a
//! heartbeat with 404), and maintains a local cache of every known service
//! instance through periodic full or delta registry fetches.
//!
//! # Components
//!
//! - [`resolver`] - cluster resolution strategies (static config, DNS TXT)
//! - [`transport`] - the request engine with cross-server retry
//! - [`registration`] - register/renew/deregister state machine
//! - [`registry`] - the instance cache and delta reconciler
//! - [`aws`] - EC2 metadata collaborator
//! - [`client`] - the orchestrator tying it all together
//!
//! # Example
//!
//! ```no_run
//! use rookery_client::RookeryClient;
//! use rookery_common::ClientConfig;
//!
//! # #[tokio::main]
//! # async fn main() -> rookery_common::Result<()> {
//! let config = ClientConfig::load("config/", "registry-client")?;
//! let client = RookeryClient::new(config)?;
//! client.start().await?;
//!
//! let instances = client.instances_by_vip_address("accounts.service").await?;
//! println!("{} instance(s) up", instances.len());
//!
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod aws;
pub mod client;
pub mod events;
pub mod registration;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use aws::{ImdsMetadataClient, MetadataClient};
pub use client::{ClientOptions, RookeryClient};
pub use events::ClientEvent;
pub use registration::{Registrar, RegistrationState};
pub use registry::{handle_delta, transform_app, transform_registry, RegistryCache, RegistryFetcher};
pub use resolver::{ClusterResolver, ConfigClusterResolver, DnsClusterResolver, TxtLookup};
pub use transport::{RawResponse, RequestEngine, RequestMiddleware, RequestOptions};
