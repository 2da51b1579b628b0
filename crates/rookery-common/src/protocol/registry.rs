//! Registry envelope: the payload of full and delta fetches.
//!
//! Both fetches share the shape
//! `{"applications": {"application": <App | [App] | null>}}`; delta payloads
//! additionally carry an `actionType` per instance.

use serde::{Deserialize, Serialize};

use super::instance::{InstanceRecord, OneOrMany};

/// Top-level response of `GET {servicePath}` and `GET {servicePath}delta`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RegistryResponse {
    pub applications: Option<Applications>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Applications {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<OneOrMany<Application>>,
    #[serde(rename = "versions__delta", skip_serializing_if = "Option::is_none")]
    pub versions_delta: Option<serde_json::Value>,
    #[serde(rename = "apps__hashcode", skip_serializing_if = "Option::is_none")]
    pub apps_hashcode: Option<String>,
}

/// One application entry: a name plus one-or-many instances.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Application {
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<OneOrMany<InstanceRecord>>,
}

impl Application {
    /// Instances normalized to a flat vector, regardless of wire shape.
    pub fn into_instances(self) -> Vec<InstanceRecord> {
        self.instance.map(OneOrMany::into_vec).unwrap_or_default()
    }
}

impl RegistryResponse {
    /// Flattens the envelope into a list of applications. An absent or null
    /// `application` field yields an empty list.
    pub fn into_applications(self) -> Vec<Application> {
        self.applications
            .and_then(|apps| apps.application)
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decodes_single_application() {
        let response: RegistryResponse = serde_json::from_value(json!({
            "applications": {
                "application": {
                    "name": "theapp",
                    "instance": {"hostName": "127.0.0.1", "port": {"$": 1000}}
                }
            }
        }))
        .unwrap();
        let apps = response.into_applications();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name.as_deref(), Some("theapp"));
        assert_eq!(apps[0].clone().into_instances().len(), 1);
    }

    #[test]
    fn test_decodes_application_array() {
        let response: RegistryResponse = serde_json::from_value(json!({
            "applications": {
                "application": [
                    {"name": "a", "instance": [{"hostName": "h1"}, {"hostName": "h2"}]},
                    {"name": "b", "instance": {"hostName": "h3"}}
                ]
            }
        }))
        .unwrap();
        let apps = response.into_applications();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].clone().into_instances().len(), 2);
        assert_eq!(apps[1].clone().into_instances().len(), 1);
    }

    #[test]
    fn test_null_application_yields_empty() {
        let response: RegistryResponse = serde_json::from_value(json!({
            "applications": {"application": null}
        }))
        .unwrap();
        assert!(response.into_applications().is_empty());
    }

    #[test]
    fn test_empty_envelope_yields_empty() {
        let response: RegistryResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.into_applications().is_empty());
    }

    #[test]
    fn test_delta_action_type_decodes() {
        let response: RegistryResponse = serde_json::from_value(json!({
            "applications": {
                "application": {
                    "name": "theapp",
                    "instance": {
                        "hostName": "127.0.0.1",
                        "port": {"$": 1000},
                        "actionType": "DELETED"
                    }
                }
            }
        }))
        .unwrap();
        let instances = response.into_applications().remove(0).into_instances();
        assert_eq!(
            instances[0].action_type,
            Some(crate::protocol::ActionType::Deleted)
        );
    }
}
