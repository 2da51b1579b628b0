//! Cluster resolution strategies.
//!
//! A resolver answers one question: which registry server should the next
//! request go to? Callers pass their current retry attempt; any attempt
//! above zero rotates the candidate list so consecutive retries walk away
//! from a failing server.

mod config;
mod dns;

pub use config::ConfigClusterResolver;
pub use dns::{DnsClusterResolver, HickoryTxtLookup, TxtLookup};
pub(crate) use dns::MISSING_REGION;

use async_trait::async_trait;
use rookery_common::Result;

/// Strategy for locating a registry server, with failover ordering.
#[async_trait]
pub trait ClusterResolver: Send + Sync {
    /// Returns the base URL to contact for the given attempt. Attempt 0 is
    /// the initial try; higher attempts rotate to the next candidate.
    async fn resolve_server_url(&self, retry_attempt: u32) -> Result<String>;
}
