//! DNS-based cluster resolver.
//!
//! Registry hosts are published as TXT records under a naming convention:
//! `txt.<region>.<host>` lists one record per availability zone, and each
//! zone record `txt.<zone-record>` lists the registry hosts in that zone.
//! Hosts in the instance's own zone are preferred, each bucket is shuffled,
//! and the cached list is only replaced when its content actually changes so
//! the round-robin position survives refreshes.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use rookery_common::{ClientConfig, Result, RookeryError};

use super::ClusterResolver;

/// Raw TXT-record lookup. Split out so cluster resolution is testable
/// without a live DNS server.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>>;
}

/// [`TxtLookup`] backed by the system resolver configuration.
pub struct HickoryTxtLookup {
    resolver: hickory_resolver::TokioAsyncResolver,
}

impl HickoryTxtLookup {
    pub fn from_system_conf() -> Result<Self> {
        let resolver = hickory_resolver::TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| RookeryError::Resolution(e.to_string()))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtLookup for HickoryTxtLookup {
    async fn resolve_txt(&self, name: &str) -> Result<Vec<String>> {
        let response = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| RookeryError::Resolution(e.to_string()))?;
        Ok(response
            .iter()
            .flat_map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).to_string())
            })
            .filter(|value| !value.is_empty())
            .collect())
    }
}

pub(crate) const MISSING_REGION: &str =
    "EC2 region was undefined. eureka.ec2Region must be set to resolve the cluster using DNS records";

struct ResolverState {
    lookup: Arc<dyn TxtLookup>,
    region: String,
    host: String,
    port: u16,
    service_path: String,
    ssl: bool,
    prefer_same_zone: bool,
    instance_zone: Option<String>,
    server_list: Mutex<Option<VecDeque<String>>>,
}

/// Locates registry servers through DNS TXT records.
pub struct DnsClusterResolver {
    state: Arc<ResolverState>,
    refresh_handle: tokio::task::JoinHandle<()>,
}

impl DnsClusterResolver {
    /// Requires `eureka.ec2Region`. Starts a background refresh task on
    /// `clusterRefreshInterval`; the first resolution happens lazily on the
    /// first [`ClusterResolver::resolve_server_url`] call.
    pub fn new(config: &ClientConfig, lookup: Arc<dyn TxtLookup>) -> Result<Self> {
        let region = config
            .eureka
            .ec2_region
            .clone()
            .ok_or_else(|| RookeryError::Configuration(MISSING_REGION.to_string()))?;

        let state = Arc::new(ResolverState {
            lookup,
            region,
            host: config.eureka.host.clone(),
            port: config.eureka.port,
            service_path: config.eureka.service_path.clone(),
            ssl: config.eureka.ssl,
            prefer_same_zone: config.eureka.prefer_same_zone,
            instance_zone: config.instance.availability_zone().map(String::from),
            server_list: Mutex::new(None),
        });

        let refresh_state = state.clone();
        let refresh_interval = config.eureka.cluster_refresh_interval();
        let refresh_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = refresh_state.refresh().await {
                    warn!("cluster refresh failed: {err}");
                }
            }
        });

        Ok(Self {
            state,
            refresh_handle,
        })
    }

    /// Forces a cluster re-resolution immediately.
    pub async fn refresh(&self) -> Result<()> {
        self.state.refresh().await
    }
}

impl std::fmt::Debug for DnsClusterResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsClusterResolver")
            .field("region", &self.state.region)
            .field("host", &self.state.host)
            .field("port", &self.state.port)
            .finish_non_exhaustive()
    }
}

impl Drop for DnsClusterResolver {
    fn drop(&mut self) {
        self.refresh_handle.abort();
    }
}

#[async_trait]
impl ClusterResolver for DnsClusterResolver {
    async fn resolve_server_url(&self, retry_attempt: u32) -> Result<String> {
        {
            let guard = self.state.server_list.lock().await;
            if guard.is_none() {
                drop(guard);
                self.state.refresh().await?;
            }
        }

        let mut guard = self.state.server_list.lock().await;
        let list = guard
            .as_mut()
            .expect("server list populated by refresh");
        if list.len() > 1 && retry_attempt > 0 {
            let head = list.pop_front().expect("non-empty server list");
            list.push_back(head);
        }
        let host = list.front().expect("non-empty server list");
        let protocol = if self.state.ssl { "https" } else { "http" };
        Ok(format!(
            "{protocol}://{host}:{}{}",
            self.state.port, self.state.service_path
        ))
    }
}

impl ResolverState {
    async fn refresh(&self) -> Result<()> {
        let hosts = self.resolve_cluster_hosts().await?;
        let mut guard = self.server_list.lock().await;
        let unchanged = guard.as_ref().is_some_and(|current| {
            current.iter().collect::<BTreeSet<_>>() == hosts.iter().collect::<BTreeSet<_>>()
        });
        if unchanged {
            debug!("cluster hosts unchanged, maintaining current server list");
        } else {
            info!("cluster located, hosts will be used in the following order: {hosts:?}");
            *guard = Some(hosts.into_iter().collect());
        }
        Ok(())
    }

    async fn resolve_cluster_hosts(&self) -> Result<Vec<String>> {
        let dns_host = format!("txt.{}.{}", self.region, self.host);
        let zone_records = self.lookup.resolve_txt(&dns_host).await.map_err(|err| {
            RookeryError::Resolution(format!(
                "Error resolving cluster for region [{}] using DNS: [{err}]",
                self.region
            ))
        })?;

        let lookups: Vec<_> = zone_records
            .iter()
            .map(|zone| {
                let zone = zone.clone();
                async move {
                    let hosts = self.lookup.resolve_txt(&format!("txt.{zone}")).await;
                    (zone, hosts)
                }
            })
            .collect();

        let mut my_zone_hosts = Vec::new();
        let mut other_hosts = Vec::new();
        for (zone, result) in futures::future::join_all(lookups).await {
            let hosts = result.map_err(|err| {
                RookeryError::Resolution(format!(
                    "Error resolving cluster zone txt.{zone}: [{err}]"
                ))
            })?;
            let same_zone = self.prefer_same_zone
                && self
                    .instance_zone
                    .as_deref()
                    .is_some_and(|az| zone.starts_with(az));
            if same_zone {
                my_zone_hosts.extend(hosts);
            } else {
                other_hosts.extend(hosts);
            }
        }

        let mut rng = rand::thread_rng();
        my_zone_hosts.shuffle(&mut rng);
        other_hosts.shuffle(&mut rng);
        my_zone_hosts.extend(other_hosts);

        if my_zone_hosts.is_empty() {
            return Err(RookeryError::Resolution(format!(
                "Unable to locate any registry hosts in any zone via DNS @ {dns_host}"
            )));
        }
        Ok(my_zone_hosts)
    }
}
