//! Registry cache and delta reconciler.
//!
//! The cache is the authoritative local view of every known service
//! instance, kept in two parallel mappings: by application id (uppercased)
//! and by vip address (case-sensitive; one instance appears under every
//! comma-separated vip token it advertises). A full fetch rebuilds the cache
//! wholesale; a delta fetch patches it in place.

use hyper::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use rookery_common::protocol::{ActionType, Application, InstanceRecord, RegistryResponse};
use rookery_common::{Result, RookeryError};

use crate::events::{emit, ClientEvent};
use crate::transport::{RequestEngine, RequestOptions};

/// Local view of the remote registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryCache {
    pub by_app: HashMap<String, Vec<InstanceRecord>>,
    pub by_vip: HashMap<String, Vec<InstanceRecord>>,
}

impl RegistryCache {
    pub fn instances_by_app_id(&self, app_id: &str) -> Vec<InstanceRecord> {
        self.by_app
            .get(&app_id.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn instances_by_vip_address(&self, vip_address: &str) -> Vec<InstanceRecord> {
        self.by_vip.get(vip_address).cloned().unwrap_or_default()
    }
}

/// Builds a fresh cache from a full-registry response.
pub fn transform_registry(response: RegistryResponse, filter_up: bool) -> RegistryCache {
    let mut cache = RegistryCache::default();
    for app in response.into_applications() {
        transform_app(app, &mut cache, filter_up);
    }
    cache
}

/// Folds one application into the cache. Instances that are not `UP` are
/// skipped when `filter_up` is set.
pub fn transform_app(app: Application, cache: &mut RegistryCache, filter_up: bool) {
    let app_name = app.name.clone();
    for instance in app.into_instances() {
        if filter_up && !instance.is_up() {
            continue;
        }
        let key = instance
            .app
            .as_deref()
            .or(app_name.as_deref())
            .unwrap_or_default()
            .to_uppercase();
        for vip in instance.vip_tokens() {
            cache
                .by_vip
                .entry(vip.to_string())
                .or_default()
                .push(instance.clone());
        }
        cache.by_app.entry(key).or_default().push(instance);
    }
}

/// Applies a normalized delta batch to the cache. Matching is by
/// (hostname, port); deltas never re-apply the full-fetch status filter.
pub fn handle_delta(cache: &mut RegistryCache, apps: Vec<Application>) {
    for app in apps {
        for instance in app.into_instances() {
            match instance.action_type {
                Some(ActionType::Added) => add_instance(cache, &instance),
                Some(ActionType::Modified) => modify_instance(cache, &instance),
                Some(ActionType::Deleted) => delete_instance(cache, &instance),
                None => debug!("delta instance without actionType ignored"),
            }
        }
    }
}

fn app_key(instance: &InstanceRecord) -> Option<String> {
    instance.app.as_ref().map(|app| app.to_uppercase())
}

fn add_instance(cache: &mut RegistryCache, instance: &InstanceRecord) {
    if let Some(key) = app_key(instance) {
        let bucket = cache.by_app.entry(key).or_default();
        if !bucket.iter().any(|known| known.same_instance(instance)) {
            bucket.push(instance.clone());
        }
    }
    for vip in instance.vip_tokens() {
        let bucket = cache.by_vip.entry(vip.to_string()).or_default();
        if !bucket.iter().any(|known| known.same_instance(instance)) {
            bucket.push(instance.clone());
        }
    }
}

fn modify_instance(cache: &mut RegistryCache, instance: &InstanceRecord) {
    fn upsert(bucket: &mut Vec<InstanceRecord>, instance: &InstanceRecord) {
        match bucket.iter_mut().find(|known| known.same_instance(instance)) {
            Some(existing) => existing.merge_from(instance),
            None => bucket.push(instance.clone()),
        }
    }
    if let Some(key) = app_key(instance) {
        upsert(cache.by_app.entry(key).or_default(), instance);
    }
    for vip in instance.vip_tokens() {
        upsert(cache.by_vip.entry(vip.to_string()).or_default(), instance);
    }
}

fn delete_instance(cache: &mut RegistryCache, instance: &InstanceRecord) {
    if let Some(key) = app_key(instance) {
        if let Some(bucket) = cache.by_app.get_mut(&key) {
            bucket.retain(|known| !known.same_instance(instance));
        }
    }
    for vip in instance.vip_tokens() {
        if let Some(bucket) = cache.by_vip.get_mut(vip) {
            bucket.retain(|known| !known.same_instance(instance));
        }
    }
}

/// Fetches the registry and reconciles the shared cache.
pub struct RegistryFetcher {
    engine: Arc<RequestEngine>,
    cache: Arc<RwLock<RegistryCache>>,
    filter_up: bool,
    use_delta: bool,
    // Deltas are only meaningful against a base snapshot; this flips once
    // the first full fetch lands and stays set.
    has_full_registry: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl RegistryFetcher {
    pub fn new(
        engine: Arc<RequestEngine>,
        cache: Arc<RwLock<RegistryCache>>,
        filter_up: bool,
        use_delta: bool,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            engine,
            cache,
            filter_up,
            use_delta,
            has_full_registry: AtomicBool::new(false),
            events,
        }
    }

    /// One fetch cycle: a delta when enabled and a full snapshot already
    /// landed, a full fetch otherwise.
    pub async fn fetch_registry(&self) -> Result<()> {
        if self.use_delta && self.has_full_registry.load(Ordering::SeqCst) {
            self.fetch_delta().await
        } else {
            self.fetch_full().await
        }
    }

    async fn fetch_full(&self) -> Result<()> {
        let response = self.engine.request(RequestOptions::get("")).await?;
        if response.status != StatusCode::OK {
            return Err(RookeryError::Protocol(
                "Unable to retrieve full registry from Eureka server".to_string(),
            ));
        }
        // Parse failures leave the cache untouched.
        let registry: RegistryResponse = serde_json::from_slice(&response.body)?;
        let fresh = transform_registry(registry, self.filter_up);
        *self.cache.write().await = fresh;
        self.has_full_registry.store(true, Ordering::SeqCst);
        debug!("retrieved full registry successfully");
        emit(&self.events, ClientEvent::RegistryUpdated);
        Ok(())
    }

    async fn fetch_delta(&self) -> Result<()> {
        let response = self.engine.request(RequestOptions::get("delta")).await?;
        if response.status != StatusCode::OK {
            return Err(RookeryError::Protocol(
                "Unable to retrieve delta registry from Eureka server".to_string(),
            ));
        }
        let registry: RegistryResponse = serde_json::from_slice(&response.body)?;
        let apps = registry.into_applications();
        {
            let mut cache = self.cache.write().await;
            handle_delta(&mut cache, apps);
        }
        debug!("applied delta registry successfully");
        emit(&self.events, ClientEvent::RegistryUpdated);
        Ok(())
    }
}
