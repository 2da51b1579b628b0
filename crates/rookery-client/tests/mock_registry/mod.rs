//! In-process mock registry server for integration tests.
//!
//! Serves the Eureka REST surface on an ephemeral local port, records every
//! request it sees, and answers with per-operation configurable statuses
//! and payloads.
#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rookery_common::protocol::{DataCenterInfo, PortValue};
use rookery_common::ClientConfig;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug)]
pub struct MockState {
    pub requests: Mutex<Vec<RecordedRequest>>,
    pub register_status: Mutex<u16>,
    pub deregister_status: Mutex<u16>,
    /// One status per renewal, consumed front to back; empty means 200.
    pub renew_statuses: Mutex<VecDeque<u16>>,
    pub registry_status: Mutex<u16>,
    pub registry_body: Mutex<serde_json::Value>,
    pub delta_status: Mutex<u16>,
    pub delta_body: Mutex<serde_json::Value>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            register_status: Mutex::new(204),
            deregister_status: Mutex::new(200),
            renew_statuses: Mutex::new(VecDeque::new()),
            registry_status: Mutex::new(200),
            registry_body: Mutex::new(default_registry_body()),
            delta_status: Mutex::new(200),
            delta_body: Mutex::new(json!({"applications": {"application": null}})),
        }
    }
}

impl MockState {
    fn record(&self, method: &str, path: String, headers: &HeaderMap, body: String) {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            path,
            headers,
            body,
        });
    }
}

pub struct MockRegistry {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockRegistry {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/eureka/v2/apps/", get(full_registry))
            .route("/eureka/v2/apps/delta", get(delta_registry))
            .route("/eureka/v2/apps/{app}", post(register))
            .route("/eureka/v2/apps/{app}/{id}", put(renew).delete(deregister))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    /// Client configuration pointed at this mock, with timers parked far in
    /// the future and retries disabled.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.instance.app = "app".to_string();
        config.instance.host_name = "myhost".to_string();
        config.instance.vip_address = "1.2.2.3".to_string();
        config.instance.port = Some(PortValue::Plain(9999));
        config.instance.data_center_info = Some(DataCenterInfo::my_own());
        config.eureka.host = self.addr.ip().to_string();
        config.eureka.port = self.addr.port();
        config.eureka.max_retries = 0;
        config.eureka.request_retry_delay_ms = 0;
        config.eureka.heartbeat_interval_ms = 3_600_000;
        config.eureka.registry_fetch_interval_ms = 3_600_000;
        config
    }
}

pub fn default_registry_body() -> serde_json::Value {
    json!({
        "applications": {
            "application": {
                "name": "THESERVICENAME",
                "instance": {
                    "hostName": "127.0.0.10",
                    "app": "THESERVICENAME",
                    "vipAddress": "the.vip.address",
                    "status": "UP",
                    "port": {"$": 8080, "@enabled": "true"}
                }
            }
        }
    })
}

/// Waits for `predicate` to hold, polling, with a hard deadline.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn full_registry(State(state): State<Arc<MockState>>, headers: HeaderMap) -> (StatusCode, String) {
    state.record("GET", "/eureka/v2/apps/".to_string(), &headers, String::new());
    let status = *state.registry_status.lock().unwrap();
    let body = state.registry_body.lock().unwrap().to_string();
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn delta_registry(State(state): State<Arc<MockState>>, headers: HeaderMap) -> (StatusCode, String) {
    state.record(
        "GET",
        "/eureka/v2/apps/delta".to_string(),
        &headers,
        String::new(),
    );
    let status = *state.delta_status.lock().unwrap();
    let body = state.delta_body.lock().unwrap().to_string();
    (StatusCode::from_u16(status).unwrap(), body)
}

async fn register(
    State(state): State<Arc<MockState>>,
    Path(app): Path<String>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    state.record("POST", format!("/eureka/v2/apps/{app}"), &headers, body);
    let status = *state.register_status.lock().unwrap();
    (StatusCode::from_u16(status).unwrap(), String::new())
}

async fn renew(
    State(state): State<Arc<MockState>>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.record("PUT", format!("/eureka/v2/apps/{app}/{id}"), &headers, String::new());
    let status = state.renew_statuses.lock().unwrap().pop_front().unwrap_or(200);
    (StatusCode::from_u16(status).unwrap(), String::new())
}

async fn deregister(
    State(state): State<Arc<MockState>>,
    Path((app, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    state.record(
        "DELETE",
        format!("/eureka/v2/apps/{app}/{id}"),
        &headers,
        String::new(),
    );
    let status = *state.deregister_status.lock().unwrap();
    (StatusCode::from_u16(status).unwrap(), String::new())
}
