//! Static-configuration cluster resolver.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use rookery_common::{ClientConfig, Result, RookeryError};

use super::ClusterResolver;

/// Locates a registry server from static configuration: either a zoned map
/// of service URLs or a single URL built from host/port/servicePath.
pub struct ConfigClusterResolver {
    service_urls: Mutex<VecDeque<String>>,
}

impl ConfigClusterResolver {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let urls = build_service_urls(config)?;
        Ok(Self {
            service_urls: Mutex::new(urls),
        })
    }
}

#[async_trait]
impl ClusterResolver for ConfigClusterResolver {
    async fn resolve_server_url(&self, retry_attempt: u32) -> Result<String> {
        let mut urls = self.service_urls.lock().expect("service url lock poisoned");
        if urls.len() > 1 && retry_attempt > 0 {
            // Round-robin away from the server that just failed.
            let head = urls.pop_front().expect("non-empty url list");
            urls.push_back(head);
        }
        Ok(urls.front().expect("non-empty url list").clone())
    }
}

fn build_service_urls(config: &ClientConfig) -> Result<VecDeque<String>> {
    let eureka = &config.eureka;
    let instance_zone = config.instance.availability_zone();
    let mut urls: VecDeque<String> = VecDeque::new();

    if let Some(service_urls) = &eureka.service_urls {
        for zone in eureka.zones() {
            if let Some(zone_urls) = service_urls.get(&zone) {
                let same_zone =
                    eureka.prefer_same_zone && instance_zone == Some(zone.as_str());
                if same_zone {
                    for url in zone_urls.iter().rev() {
                        urls.push_front(url.clone());
                    }
                } else {
                    urls.extend(zone_urls.iter().cloned());
                }
            }
        }
    }

    if urls.is_empty() {
        if eureka.host.is_empty() {
            return Err(RookeryError::Configuration(
                "No service URLs could be built: neither serviceUrls nor a registry host is configured".to_string(),
            ));
        }
        let protocol = if eureka.ssl { "https" } else { "http" };
        urls.push_back(format!(
            "{protocol}://{}:{}{}",
            eureka.host, eureka.port, eureka.service_path
        ));
    }

    Ok(urls)
}
