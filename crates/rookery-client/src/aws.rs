//! AWS metadata collaborator.
//!
//! When this process runs in an Amazon data center, host-related fields of
//! the instance configuration come from the EC2 instance metadata service
//! rather than local configuration. Lookups that fail simply leave their key
//! out of the result; fetching never raises.

use async_trait::async_trait;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::collections::HashMap;
use tracing::{debug, error};

use rookery_common::InstanceConfig;

/// Cloud metadata lookup. One call returns whatever keys could be fetched.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch_metadata(&self) -> HashMap<String, String>;
}

/// [`MetadataClient`] backed by the EC2 instance metadata service.
pub struct ImdsMetadataClient {
    host: String,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl Default for ImdsMetadataClient {
    fn default() -> Self {
        Self::new("169.254.169.254")
    }
}

impl ImdsMetadataClient {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    async fn get(&self, path: &str) -> Option<String> {
        let url = format!("http://{}/{path}", self.host);
        let uri: hyper::Uri = url.parse().ok()?;
        let response = match self.client.get(uri).await {
            Ok(response) => response,
            Err(err) => {
                error!("error requesting metadata {path}: {err}");
                return None;
            }
        };
        let status = response.status();
        let body = response.into_body().collect().await.ok()?.to_bytes();
        if status != hyper::StatusCode::OK {
            error!("error requesting metadata {path}: status {status}");
            return None;
        }
        Some(String::from_utf8_lossy(&body).to_string())
    }

    async fn lookup_key(&self, key: &str) -> Option<String> {
        self.get(&format!("latest/meta-data/{key}")).await
    }

    /// The account id lives in the instance identity document, not under
    /// `meta-data`.
    async fn lookup_account_id(&self) -> Option<String> {
        let text = self.get("latest/dynamic/instance-identity/document").await?;
        let identity: serde_json::Value = serde_json::from_str(&text).ok()?;
        identity
            .get("accountId")
            .and_then(|v| v.as_str())
            .map(String::from)
    }
}

#[async_trait]
impl MetadataClient for ImdsMetadataClient {
    async fn fetch_metadata(&self) -> HashMap<String, String> {
        let keys = [
            ("ami-id", "ami-id"),
            ("instance-id", "instance-id"),
            ("instance-type", "instance-type"),
            ("local-ipv4", "local-ipv4"),
            ("local-hostname", "local-hostname"),
            ("availability-zone", "placement/availability-zone"),
            ("public-hostname", "public-hostname"),
            ("public-ipv4", "public-ipv4"),
            ("mac", "mac"),
        ];

        let lookups = keys.map(|(name, path)| async move {
            (name.to_string(), self.lookup_key(path).await)
        });
        let mut results: HashMap<String, String> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect();

        if let Some(account_id) = self.lookup_account_id().await {
            results.insert("accountId".to_string(), account_id);
        }
        // the vpc id hangs off the interface mac, so it needs a second hop
        if let Some(mac) = results.get("mac").cloned() {
            if let Some(vpc_id) = self
                .lookup_key(&format!("network/interfaces/macs/{mac}/vpc-id"))
                .await
            {
                results.insert("vpc-id".to_string(), vpc_id);
            }
        }

        debug!("found instance AWS metadata: {results:?}");
        results
    }
}

/// Rewrites the host-dependent parts of the instance configuration from
/// fetched metadata: hostname/IP selection per `useLocalMetadata` and
/// `preferIpAddress`, the `__HOST__` placeholder in the page URLs, and the
/// data-center metadata map.
pub(crate) fn apply_instance_metadata(
    instance: &mut InstanceConfig,
    metadata: &HashMap<String, String>,
    use_local_metadata: bool,
    prefer_ip_address: bool,
) {
    let host_key = if use_local_metadata {
        "local-hostname"
    } else {
        "public-hostname"
    };
    let ip_key = if use_local_metadata {
        "local-ipv4"
    } else {
        "public-ipv4"
    };

    let ip_addr = metadata.get(ip_key).cloned();
    let mut host_name = metadata.get(host_key).cloned();
    if prefer_ip_address {
        host_name = ip_addr.clone().or(host_name);
    }

    if let Some(host_name) = host_name {
        instance.host_name = host_name;
    }
    if let Some(ip_addr) = ip_addr {
        instance.ip_addr = Some(ip_addr);
    }

    let host_name = instance.host_name.clone();
    for url in [
        &mut instance.status_page_url,
        &mut instance.health_check_url,
        &mut instance.home_page_url,
    ] {
        if let Some(template) = url {
            *template = template.replace("__HOST__", &host_name);
        }
    }

    if let Some(dci) = &mut instance.data_center_info {
        let merged = dci.metadata.get_or_insert_with(HashMap::new);
        for (key, value) in metadata {
            merged.insert(key.clone(), value.clone());
        }
    }
}
