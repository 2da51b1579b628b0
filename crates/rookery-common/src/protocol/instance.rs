//! Instance-level wire types.
//!
//! The registry's JSON is produced by an XML bridge, which leaves two legacy
//! quirks in the payloads:
//!
//! - fields that hold either a single object or an array ([`OneOrMany`])
//! - port fields that are either a bare number or a `{"$": "8080"}` wrapper
//!   ([`PortValue`])
//!
//! Both are decoded into a canonical shape here, at the deserialization
//! boundary, so the cache and reconciliation code never shape-checks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of a service instance as reported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    #[default]
    Up,
    Down,
    Starting,
    OutOfService,
    #[serde(other)]
    Unknown,
}

/// Data center descriptor carried by every instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenterInfo {
    pub name: DataCenterName,
    #[serde(rename = "@class", skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

impl DataCenterInfo {
    pub fn my_own() -> Self {
        Self {
            name: DataCenterName::MyOwn,
            class: None,
            metadata: None,
        }
    }

    pub fn is_amazon(&self) -> bool {
        self.name == DataCenterName::Amazon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataCenterName {
    MyOwn,
    Amazon,
    #[serde(other)]
    Other,
}

/// Number-or-string, as emitted by the registry's XML-to-JSON bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(u32),
    Text(String),
}

impl NumberOrString {
    pub fn as_u16(&self) -> u16 {
        match self {
            NumberOrString::Number(n) => *n as u16,
            NumberOrString::Text(s) => s.parse().unwrap_or(0),
        }
    }
}

/// Port as it appears on the wire: either a bare number (`9999`) or the
/// wrapped form (`{"$": "6969", "@enabled": "true"}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Plain(u16),
    Wrapped {
        #[serde(rename = "$")]
        value: NumberOrString,
        #[serde(rename = "@enabled", skip_serializing_if = "Option::is_none")]
        enabled: Option<NumberOrString>,
    },
}

impl PortValue {
    pub fn value(&self) -> u16 {
        match self {
            PortValue::Plain(n) => *n,
            PortValue::Wrapped { value, .. } => value.as_u16(),
        }
    }
}

impl From<u16> for PortValue {
    fn from(port: u16) -> Self {
        PortValue::Plain(port)
    }
}

/// A single object or an array of them. Always consumed through
/// [`OneOrMany::into_vec`], which normalizes the two shapes once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Delta entry action, attached per instance in a delta fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Added,
    Modified,
    Deleted,
}

/// One remote service instance as reported by the registry.
///
/// Every field is optional on the wire; unrecognized keys survive a
/// decode/merge round-trip through `extra`. Instance identity for duplicate
/// detection and delta matching is the (hostname, port) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_vip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<PortValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure_port: Option<PortValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_center_info: Option<DataCenterInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<ActionType>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl InstanceRecord {
    /// Numeric port, if any. Used for identity matching.
    pub fn port_number(&self) -> Option<u16> {
        self.port.as_ref().map(PortValue::value)
    }

    /// Identity check: same hostname and same port.
    pub fn same_instance(&self, other: &InstanceRecord) -> bool {
        self.host_name == other.host_name && self.port_number() == other.port_number()
    }

    /// The vip tokens this instance is registered under. A single
    /// `vipAddress` field may encode several comma-separated addresses.
    pub fn vip_tokens(&self) -> Vec<&str> {
        self.vip_address
            .as_deref()
            .map(|v| v.split(',').filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn is_up(&self) -> bool {
        self.status == Some(InstanceStatus::Up)
    }

    /// Merges fields present on `other` into `self`, in place. Fields absent
    /// on `other` are left untouched; `extra` keys are overlaid. This is the
    /// MODIFIED-delta merge, so a status change sticks even when it moves
    /// the instance out of UP.
    pub fn merge_from(&mut self, other: &InstanceRecord) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take!(host_name);
        take!(app);
        take!(ip_addr);
        take!(vip_address);
        take!(secure_vip_address);
        take!(status);
        take!(port);
        take!(secure_port);
        take!(data_center_info);
        take!(action_type);
        for (key, value) in &other.extra {
            self.extra.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_value(InstanceStatus::OutOfService).unwrap(),
            json!("OUT_OF_SERVICE")
        );
        assert_eq!(
            serde_json::from_value::<InstanceStatus>(json!("UP")).unwrap(),
            InstanceStatus::Up
        );
    }

    #[test]
    fn test_status_unknown_catch_all() {
        let status: InstanceStatus = serde_json::from_value(json!("SOMETHING_NEW")).unwrap();
        assert_eq!(status, InstanceStatus::Unknown);
    }

    #[test]
    fn test_port_decodes_bare_number() {
        let port: PortValue = serde_json::from_value(json!(9999)).unwrap();
        assert_eq!(port.value(), 9999);
    }

    #[test]
    fn test_port_decodes_wrapped_string() {
        let port: PortValue = serde_json::from_value(json!({"$": "6969"})).unwrap();
        assert_eq!(port.value(), 6969);
    }

    #[test]
    fn test_port_decodes_wrapped_number_with_enabled() {
        let port: PortValue =
            serde_json::from_value(json!({"$": 1000, "@enabled": "true"})).unwrap();
        assert_eq!(port.value(), 1000);
    }

    #[test]
    fn test_one_or_many_normalizes_both_shapes() {
        let one: OneOrMany<u32> = serde_json::from_value(json!(7)).unwrap();
        let many: OneOrMany<u32> = serde_json::from_value(json!([7, 8])).unwrap();
        assert_eq!(one.into_vec(), vec![7]);
        assert_eq!(many.into_vec(), vec![7, 8]);
    }

    #[test]
    fn test_same_instance_matches_on_host_and_port() {
        let a: InstanceRecord =
            serde_json::from_value(json!({"hostName": "foo", "port": {"$": "6969"}})).unwrap();
        let b: InstanceRecord =
            serde_json::from_value(json!({"hostName": "foo", "port": 6969})).unwrap();
        let c: InstanceRecord =
            serde_json::from_value(json!({"hostName": "bar", "port": {"$": "1111"}})).unwrap();
        assert!(a.same_instance(&b));
        assert!(!a.same_instance(&c));
    }

    #[test]
    fn test_vip_tokens_split_on_commas() {
        let record: InstanceRecord =
            serde_json::from_value(json!({"vipAddress": "fooVip,barVip"})).unwrap();
        assert_eq!(record.vip_tokens(), vec!["fooVip", "barVip"]);
    }

    #[test]
    fn test_vip_tokens_empty_when_absent() {
        let record = InstanceRecord::default();
        assert!(record.vip_tokens().is_empty());
    }

    #[test]
    fn test_merge_overlays_fields_and_extra() {
        let mut original: InstanceRecord = serde_json::from_value(json!({
            "hostName": "127.0.0.1",
            "port": {"$": 1000},
            "app": "THEAPP",
            "vipAddress": "thevip",
            "status": "UP"
        }))
        .unwrap();
        let incoming: InstanceRecord = serde_json::from_value(json!({
            "hostName": "127.0.0.1",
            "port": {"$": 1000},
            "status": "DOWN",
            "newProp": "foo"
        }))
        .unwrap();

        original.merge_from(&incoming);
        assert_eq!(original.status, Some(InstanceStatus::Down));
        assert_eq!(original.vip_address.as_deref(), Some("thevip"));
        assert_eq!(original.extra.get("newProp"), Some(&json!("foo")));
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let value = json!({"hostName": "h", "leaseInfo": {"renewalIntervalInSecs": 30}});
        let record: InstanceRecord = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(serde_json::to_value(&record).unwrap(), value);
    }
}
