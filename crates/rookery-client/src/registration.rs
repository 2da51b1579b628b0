//! Registration state machine: register, heartbeat renewal, deregister.
//!
//! States: `Unregistered -> Registering -> Registered`, with
//! `Registered -> Renewing -> Registered` on each heartbeat. A heartbeat
//! answered with 404 means the registry dropped the lease; the agent
//! re-registers on the spot and the miss is not surfaced to the caller.

use hyper::body::Bytes;
use hyper::StatusCode;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

use rookery_common::{InstanceConfig, Result, RookeryError};

use crate::events::{emit, ClientEvent};
use crate::transport::{RawResponse, RequestEngine, RequestOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,
    Registering,
    Registered,
    Renewing,
}

/// Owns the register/renew/deregister operations for this process.
pub struct Registrar {
    engine: Arc<RequestEngine>,
    instance: Arc<RwLock<InstanceConfig>>,
    state: Mutex<RegistrationState>,
    events: broadcast::Sender<ClientEvent>,
}

impl Registrar {
    pub fn new(
        engine: Arc<RequestEngine>,
        instance: Arc<RwLock<InstanceConfig>>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            engine,
            instance,
            state: Mutex::new(RegistrationState::Unregistered),
            events,
        }
    }

    pub async fn state(&self) -> RegistrationState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: RegistrationState) {
        *self.state.lock().await = state;
    }

    /// Registers this instance with the registry. Expects 204.
    pub async fn register(&self) -> Result<()> {
        self.set_state(RegistrationState::Registering).await;
        let (app, body) = {
            let instance = self.instance.read().await;
            let body = serde_json::to_vec(&serde_json::json!({ "instance": &*instance }))?;
            (instance.app.clone(), Bytes::from(body))
        };

        let response = self
            .engine
            .request(RequestOptions::post_json(app.clone(), body))
            .await;
        match response {
            Ok(response) if response.status == StatusCode::NO_CONTENT => {
                self.set_state(RegistrationState::Registered).await;
                info!("registered with eureka: {app}");
                emit(&self.events, ClientEvent::Registered);
                Ok(())
            }
            Ok(response) => {
                self.set_state(RegistrationState::Unregistered).await;
                Err(operation_failed("registration", &response))
            }
            Err(err) => {
                self.set_state(RegistrationState::Unregistered).await;
                Err(err)
            }
        }
    }

    /// Removes this instance from the registry. Expects 200.
    pub async fn deregister(&self) -> Result<()> {
        let (app, instance_id) = self.identity().await;
        let response = self
            .engine
            .request(RequestOptions::delete(format!("{app}/{instance_id}")))
            .await?;
        if response.status == StatusCode::OK {
            self.set_state(RegistrationState::Unregistered).await;
            info!("deregistered app instance: {app}/{instance_id}");
            emit(&self.events, ClientEvent::Deregistered);
            Ok(())
        } else {
            Err(operation_failed("deregistration", &response))
        }
    }

    /// Renews the registration lease. Expects 200; a 404 triggers automatic
    /// re-registration before reporting success.
    pub async fn renew(&self) -> Result<()> {
        self.set_state(RegistrationState::Renewing).await;
        let (app, instance_id) = self.identity().await;
        let response = self
            .engine
            .request(RequestOptions::put(format!("{app}/{instance_id}")))
            .await;
        match response {
            Ok(response) if response.status == StatusCode::OK => {
                self.set_state(RegistrationState::Registered).await;
                emit(&self.events, ClientEvent::Heartbeat);
                Ok(())
            }
            Ok(response) if response.status == StatusCode::NOT_FOUND => {
                warn!("eureka heartbeat FAILED, re-registering app: {app}");
                self.register().await
            }
            Ok(response) => {
                self.set_state(RegistrationState::Registered).await;
                Err(operation_failed("heartbeat", &response))
            }
            Err(err) => {
                self.set_state(RegistrationState::Registered).await;
                Err(err)
            }
        }
    }

    async fn identity(&self) -> (String, String) {
        let instance = self.instance.read().await;
        (instance.app.clone(), instance.instance_id())
    }
}

fn operation_failed(operation: &str, response: &RawResponse) -> RookeryError {
    RookeryError::Protocol(format!(
        "eureka {operation} FAILED: status: {} body: {}",
        response.status.as_u16(),
        response.body_or_null()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_format() {
        let response = RawResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: Bytes::new(),
        };
        assert_eq!(
            operation_failed("registration", &response).to_string(),
            "eureka registration FAILED: status: 500 body: null"
        );

        let response = RawResponse {
            status: StatusCode::BAD_GATEWAY,
            body: Bytes::from_static(b"denied"),
        };
        assert_eq!(
            operation_failed("deregistration", &response).to_string(),
            "eureka deregistration FAILED: status: 502 body: denied"
        );
    }

    #[test]
    fn test_initial_state_is_unregistered() {
        assert_eq!(RegistrationState::default(), RegistrationState::Unregistered);
    }
}
