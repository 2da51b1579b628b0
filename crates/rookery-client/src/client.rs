//! Client orchestrator: wires the resolver, request engine, registrar and
//! registry fetcher together and owns the public lifecycle.

use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use rookery_common::protocol::InstanceRecord;
use rookery_common::{ClientConfig, InstanceConfig, Result, RookeryError};

use crate::aws::{apply_instance_metadata, ImdsMetadataClient, MetadataClient};
use crate::events::{self, emit, ClientEvent};
use crate::registration::{RegistrationState, Registrar};
use crate::registry::{RegistryCache, RegistryFetcher};
use crate::resolver::{
    ClusterResolver, ConfigClusterResolver, DnsClusterResolver, HickoryTxtLookup, TxtLookup,
};
use crate::transport::{RequestEngine, RequestMiddleware};

/// Injection points for embedding applications and tests. Everything left
/// `None` gets the production default.
#[derive(Default)]
pub struct ClientOptions {
    /// Hook applied to every outgoing request (e.g. header injection).
    pub middleware: Option<Arc<dyn RequestMiddleware>>,
    /// Replaces the resolver chosen from configuration.
    pub resolver: Option<Arc<dyn ClusterResolver>>,
    /// Replaces the EC2 metadata service client.
    pub metadata_client: Option<Arc<dyn MetadataClient>>,
    /// Replaces the system DNS resolver used by the DNS cluster resolver.
    pub txt_lookup: Option<Arc<dyn TxtLookup>>,
}

/// A registry client instance.
///
/// Construct with a validated [`ClientConfig`], call
/// [`start`](RookeryClient::start) once, query the cache at will, and call
/// [`stop`](RookeryClient::stop) on shutdown. Must be created inside a tokio
/// runtime.
pub struct RookeryClient {
    config: ClientConfig,
    instance: Arc<RwLock<InstanceConfig>>,
    cache: Arc<RwLock<RegistryCache>>,
    registrar: Arc<Registrar>,
    fetcher: Arc<RegistryFetcher>,
    metadata_client: Arc<dyn MetadataClient>,
    events: broadcast::Sender<ClientEvent>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl RookeryClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_options(config, ClientOptions::default())
    }

    pub fn with_options(config: ClientConfig, options: ClientOptions) -> Result<Self> {
        config.validate()?;

        let events = events::channel();
        let resolver: Arc<dyn ClusterResolver> = match options.resolver {
            Some(resolver) => resolver,
            None if config.eureka.use_dns => {
                if config.eureka.ec2_region.is_none() {
                    return Err(RookeryError::Configuration(
                        crate::resolver::MISSING_REGION.to_string(),
                    ));
                }
                let lookup: Arc<dyn TxtLookup> = match options.txt_lookup {
                    Some(lookup) => lookup,
                    None => Arc::new(HickoryTxtLookup::from_system_conf()?),
                };
                Arc::new(DnsClusterResolver::new(&config, lookup)?)
            }
            None => Arc::new(ConfigClusterResolver::new(&config)?),
        };

        let engine = Arc::new(RequestEngine::new(&config, resolver, options.middleware)?);
        let instance = Arc::new(RwLock::new(config.instance.clone()));
        let cache = Arc::new(RwLock::new(RegistryCache::default()));
        let registrar = Arc::new(Registrar::new(
            engine.clone(),
            instance.clone(),
            events.clone(),
        ));
        let fetcher = Arc::new(RegistryFetcher::new(
            engine,
            cache.clone(),
            config.eureka.filter_up_instances,
            config.eureka.should_use_delta,
            events.clone(),
        ));
        let metadata_client = options
            .metadata_client
            .unwrap_or_else(|| Arc::new(ImdsMetadataClient::default()));

        Ok(Self {
            config,
            instance,
            cache,
            registrar,
            fetcher,
            metadata_client,
            events,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Registers (unless disabled), performs the initial registry fetch,
    /// then starts the heartbeat and registry-fetch timers and emits
    /// `started`. Any failure aborts startup before the timers run.
    pub async fn start(&self) -> Result<()> {
        let eureka = &self.config.eureka;

        let is_amazon = {
            let instance = self.instance.read().await;
            instance
                .data_center_info
                .as_ref()
                .is_some_and(|dci| dci.is_amazon())
        };
        if is_amazon && eureka.fetch_metadata {
            let metadata = self.metadata_client.fetch_metadata().await;
            let mut instance = self.instance.write().await;
            apply_instance_metadata(
                &mut instance,
                &metadata,
                eureka.use_local_metadata,
                eureka.prefer_ip_address,
            );
        }

        let register = async {
            if eureka.register_with_eureka {
                self.registrar.register().await
            } else {
                Ok(())
            }
        };
        let fetch = async {
            if eureka.fetch_registry {
                self.fetcher.fetch_registry().await
            } else {
                Ok(())
            }
        };
        tokio::try_join!(register, fetch)?;

        if eureka.register_with_eureka {
            self.start_heartbeats();
        }
        if eureka.fetch_registry {
            self.start_registry_fetches();
        }
        info!("registry client started");
        emit(&self.events, ClientEvent::Started);
        Ok(())
    }

    /// Stops the periodic timers this client started and deregisters
    /// (unless registration is disabled). In-flight requests from the last
    /// cycle are not cancelled.
    pub async fn stop(&self) -> Result<()> {
        for handle in self.tasks.lock().expect("task list lock").drain(..) {
            handle.abort();
        }
        if self.config.eureka.register_with_eureka {
            self.registrar.deregister().await?;
        }
        Ok(())
    }

    /// Cached instances for an application id (case-insensitive).
    pub async fn instances_by_app_id(&self, app_id: &str) -> Result<Vec<InstanceRecord>> {
        if app_id.is_empty() {
            return Err(RookeryError::Configuration(
                "Unable to query instances with no appId".to_string(),
            ));
        }
        Ok(self.cache.read().await.instances_by_app_id(app_id))
    }

    /// Cached instances for a vip address (case-sensitive).
    pub async fn instances_by_vip_address(&self, vip_address: &str) -> Result<Vec<InstanceRecord>> {
        if vip_address.is_empty() {
            return Err(RookeryError::Configuration(
                "Unable to query instances with no vipAddress".to_string(),
            ));
        }
        Ok(self.cache.read().await.instances_by_vip_address(vip_address))
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// The identity this client registers under.
    pub async fn instance_id(&self) -> String {
        self.instance.read().await.instance_id()
    }

    pub async fn registration_state(&self) -> RegistrationState {
        self.registrar.state().await
    }

    /// Forces one registry fetch cycle outside the timer.
    pub async fn fetch_registry(&self) -> Result<()> {
        self.fetcher.fetch_registry().await
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn start_heartbeats(&self) {
        let registrar = self.registrar.clone();
        let interval = self.config.eureka.heartbeat_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // first renewal fires one full interval after startup
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = registrar.renew().await {
                    warn!("eureka heartbeat FAILED, will retry on next interval: {err}");
                }
            }
        });
        self.tasks.lock().expect("task list lock").push(handle);
    }

    fn start_registry_fetches(&self) {
        let fetcher = self.fetcher.clone();
        let interval = self.config.eureka.registry_fetch_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = fetcher.fetch_registry().await {
                    warn!("registry fetch failed, will retry on next interval: {err}");
                }
            }
        });
        self.tasks.lock().expect("task list lock").push(handle);
    }
}

impl Drop for RookeryClient {
    fn drop(&mut self) {
        for handle in self.tasks.lock().expect("task list lock").drain(..) {
            handle.abort();
        }
    }
}
