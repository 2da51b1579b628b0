//! Client configuration: the `instance` and `eureka` sections, defaults,
//! YAML file loading and the overlay merge.
//!
//! Precedence, lowest to highest: built-in defaults, `<filename>.yml`,
//! `<filename>-<env>.yml`, programmatic overrides. A missing file is
//! tolerated; a malformed one is a configuration error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, RookeryError};
use crate::protocol::{DataCenterInfo, InstanceStatus, PortValue};

/// Environment variable naming the configuration environment, used to pick
/// the `<filename>-<env>.yml` override file.
pub const ENV_VAR: &str = "ROOKERY_ENV";

const DEFAULT_ENV: &str = "development";

/// Describes this process as a registerable instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceConfig {
    pub app: String,
    pub host_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,
    pub vip_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<PortValue>,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_center_info: Option<DataCenterInfo>,
    /// May contain the `__HOST__` placeholder, rewritten from cloud metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_page_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_page_url: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            app: String::new(),
            host_name: "localhost".to_string(),
            ip_addr: None,
            vip_address: String::new(),
            instance_id: None,
            port: None,
            secure_port: None,
            status: InstanceStatus::Up,
            data_center_info: None,
            status_page_url: None,
            health_check_url: None,
            home_page_url: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl InstanceConfig {
    /// Identity under which this instance registers. Precedence: explicit
    /// id, then the AWS-reported instance id, then the hostname.
    pub fn instance_id(&self) -> String {
        if let Some(id) = &self.instance_id {
            return id.clone();
        }
        if let Some(dci) = &self.data_center_info {
            if dci.is_amazon() {
                if let Some(id) = dci
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("instance-id"))
                {
                    return id.clone();
                }
            }
        }
        self.host_name.clone()
    }

    /// Availability zone from the data-center metadata, when present.
    pub fn availability_zone(&self) -> Option<&str> {
        self.data_center_info
            .as_ref()
            .and_then(|dci| dci.metadata.as_ref())
            .and_then(|m| m.get("availability-zone"))
            .map(String::as_str)
    }
}

/// Registry connection parameters (the `eureka` section). Immutable after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    pub service_path: String,
    pub ssl: bool,
    pub use_dns: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ec2_region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_urls: Option<HashMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zones: Option<HashMap<String, Vec<String>>>,
    pub prefer_same_zone: bool,
    pub filter_up_instances: bool,
    pub should_use_delta: bool,
    pub register_with_eureka: bool,
    pub fetch_registry: bool,
    pub fetch_metadata: bool,
    pub use_local_metadata: bool,
    pub prefer_ip_address: bool,
    pub max_retries: u32,
    #[serde(rename = "requestRetryDelay")]
    pub request_retry_delay_ms: u64,
    #[serde(rename = "heartbeatInterval")]
    pub heartbeat_interval_ms: u64,
    #[serde(rename = "registryFetchInterval")]
    pub registry_fetch_interval_ms: u64,
    #[serde(rename = "clusterRefreshInterval")]
    pub cluster_refresh_interval_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8761,
            service_path: "/eureka/v2/apps/".to_string(),
            ssl: false,
            use_dns: false,
            ec2_region: None,
            service_urls: None,
            availability_zones: None,
            prefer_same_zone: true,
            filter_up_instances: true,
            should_use_delta: false,
            register_with_eureka: true,
            fetch_registry: true,
            fetch_metadata: true,
            use_local_metadata: false,
            prefer_ip_address: false,
            max_retries: 3,
            request_retry_delay_ms: 500,
            heartbeat_interval_ms: 30_000,
            registry_fetch_interval_ms: 30_000,
            cluster_refresh_interval_ms: 300_000,
        }
    }
}

impl RegistryConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn registry_fetch_interval(&self) -> Duration {
        Duration::from_millis(self.registry_fetch_interval_ms)
    }

    pub fn request_retry_delay(&self) -> Duration {
        Duration::from_millis(self.request_retry_delay_ms)
    }

    pub fn cluster_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.cluster_refresh_interval_ms)
    }

    /// Availability zones configured for the active EC2 region, falling
    /// back to the `default` zone.
    pub fn zones(&self) -> Vec<String> {
        if let (Some(region), Some(zone_map)) = (&self.ec2_region, &self.availability_zones) {
            if let Some(zones) = zone_map.get(region) {
                return zones.clone();
            }
        }
        vec!["default".to_string()]
    }
}

/// PEM material for client TLS, by file path. Keys must be unencrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub certificate: PathBuf,
    pub keystore: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,
}

/// Full client configuration: the `instance` and `eureka` sections plus the
/// optional `tls` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub instance: InstanceConfig,
    pub eureka: RegistryConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

impl ClientConfig {
    /// Loads `<filename>.yml` and `<filename>-<env>.yml` from `cwd`,
    /// overlaid on the defaults. The environment is taken from
    /// [`ENV_VAR`], defaulting to `development`.
    pub fn load(cwd: impl AsRef<Path>, filename: &str) -> Result<Self> {
        let env = std::env::var(ENV_VAR).unwrap_or_else(|_| DEFAULT_ENV.to_string());
        Self::load_with_env(cwd, filename, &env)
    }

    /// Like [`ClientConfig::load`] with an explicit environment name.
    pub fn load_with_env(cwd: impl AsRef<Path>, filename: &str, env: &str) -> Result<Self> {
        let cwd = cwd.as_ref();
        let mut value = serde_yaml::to_value(ClientConfig::default())?;
        overlay_file(&mut value, &cwd.join(format!("{filename}.yml")))?;
        overlay_file(&mut value, &cwd.join(format!("{filename}-{env}.yml")))?;
        Ok(serde_yaml::from_value(value)?)
    }

    /// Overlays `overrides` on top of `self`, field by field, with the same
    /// semantics as the file merge. Programmatic overrides win.
    pub fn merged_with(&self, overrides: &serde_yaml::Value) -> Result<Self> {
        let mut value = serde_yaml::to_value(self)?;
        merge_values(&mut value, overrides.clone());
        Ok(serde_yaml::from_value(value)?)
    }

    /// Checks the fields required for self-registration. Discovery-only
    /// configurations (`registerWithEureka: false`) skip the instance
    /// checks entirely.
    pub fn validate(&self) -> Result<()> {
        if !self.eureka.register_with_eureka {
            return Ok(());
        }
        if self.instance.app.is_empty() {
            return Err(missing("instance.app"));
        }
        if self.instance.vip_address.is_empty() {
            return Err(missing("instance.vipAddress"));
        }
        if self.instance.port.is_none() {
            return Err(missing("instance.port"));
        }
        if self.instance.data_center_info.is_none() {
            return Err(missing("instance.dataCenterInfo"));
        }
        Ok(())
    }
}

fn missing(property: &str) -> RookeryError {
    RookeryError::Configuration(format!("Missing \"{property}\" config value"))
}

fn overlay_file(base: &mut serde_yaml::Value, path: &Path) -> Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        // A missing config file is fine; anything else is not.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    let overlay: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
        RookeryError::Configuration(format!("Malformed config file {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), "loaded configuration overlay");
    merge_values(base, overlay);
    Ok(())
}

/// Key-overlay merge: mappings merge recursively, everything else replaces.
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DataCenterName;
    use std::io::Write;

    fn valid_config() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.instance.app = "app".to_string();
        config.instance.host_name = "myhost".to_string();
        config.instance.vip_address = "1.2.2.3".to_string();
        config.instance.port = Some(PortValue::Plain(9999));
        config.instance.data_center_info = Some(DataCenterInfo::my_own());
        config
    }

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8761);
        assert_eq!(config.service_path, "/eureka/v2/apps/");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.request_retry_delay(), Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.registry_fetch_interval(), Duration::from_secs(30));
        assert!(config.register_with_eureka);
        assert!(config.filter_up_instances);
        assert!(!config.should_use_delta);
    }

    #[test]
    fn test_validate_accepts_complete_instance() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let strips: Vec<Box<dyn Fn(&mut ClientConfig)>> = vec![
            Box::new(|c| c.instance.app = String::new()),
            Box::new(|c| c.instance.vip_address = String::new()),
            Box::new(|c| c.instance.port = None),
            Box::new(|c| c.instance.data_center_info = None),
        ];
        for strip in strips {
            let mut config = valid_config();
            strip(&mut config);
            assert!(matches!(
                config.validate(),
                Err(RookeryError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_validate_error_names_the_field() {
        let mut config = valid_config();
        config.instance.app = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("app"), "got: {err}");
    }

    #[test]
    fn test_validate_skipped_when_registration_disabled() {
        let mut config = ClientConfig::default();
        config.eureka.register_with_eureka = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_instance_id_precedence() {
        let mut instance = valid_config().instance;
        assert_eq!(instance.instance_id(), "myhost");

        instance.data_center_info = Some(DataCenterInfo {
            name: DataCenterName::Amazon,
            class: None,
            metadata: Some(HashMap::from([(
                "instance-id".to_string(),
                "i123".to_string(),
            )])),
        });
        assert_eq!(instance.instance_id(), "i123");

        instance.instance_id = Some("test_id".to_string());
        assert_eq!(instance.instance_id(), "test_id");
    }

    #[test]
    fn test_registration_body_shape() {
        let instance = valid_config().instance;
        let body = serde_json::json!({ "instance": instance });
        assert_eq!(
            body,
            serde_json::json!({
                "instance": {
                    "app": "app",
                    "hostName": "myhost",
                    "vipAddress": "1.2.2.3",
                    "port": 9999,
                    "status": "UP",
                    "dataCenterInfo": {"name": "MyOwn"}
                }
            })
        );
    }

    #[test]
    fn test_file_overlay_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("registry-client.yml");
        let env = dir.path().join("registry-client-test.yml");
        writeln!(
            std::fs::File::create(&base).unwrap(),
            "eureka:\n  host: from-base\n  port: 1111\n  maxRetries: 7"
        )
        .unwrap();
        writeln!(
            std::fs::File::create(&env).unwrap(),
            "eureka:\n  host: from-env"
        )
        .unwrap();

        let config = ClientConfig::load_with_env(dir.path(), "registry-client", "test").unwrap();
        assert_eq!(config.eureka.host, "from-env");
        assert_eq!(config.eureka.port, 1111);
        assert_eq!(config.eureka.max_retries, 7);
        // untouched defaults survive the overlay
        assert_eq!(config.eureka.service_path, "/eureka/v2/apps/");
    }

    #[test]
    fn test_missing_files_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load_with_env(dir.path(), "nothing-here", "test").unwrap();
        assert_eq!(config.eureka.port, 8761);
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yml");
        std::fs::write(&path, "eureka: [unclosed").unwrap();
        let result = ClientConfig::load_with_env(dir.path(), "bad", "test");
        assert!(matches!(result, Err(RookeryError::Configuration(_))));
    }

    #[test]
    fn test_programmatic_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("app.yml");
        std::fs::write(&base, "eureka:\n  maxRetries: 7\n  host: file-host").unwrap();

        let loaded = ClientConfig::load_with_env(dir.path(), "app", "test").unwrap();
        let overrides: serde_yaml::Value =
            serde_yaml::from_str("eureka:\n  maxRetries: 0").unwrap();
        let merged = loaded.merged_with(&overrides).unwrap();
        assert_eq!(merged.eureka.max_retries, 0);
        assert_eq!(merged.eureka.host, "file-host");
    }

    #[test]
    fn test_zones_fall_back_to_default() {
        let mut config = RegistryConfig::default();
        assert_eq!(config.zones(), vec!["default".to_string()]);

        config.ec2_region = Some("us-east-1".to_string());
        config.availability_zones = Some(HashMap::from([(
            "us-east-1".to_string(),
            vec!["us-east-1a".to_string(), "us-east-1b".to_string()],
        )]));
        assert_eq!(config.zones(), vec!["us-east-1a", "us-east-1b"]);
    }
}
