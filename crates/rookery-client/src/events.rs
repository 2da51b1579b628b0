//! Lifecycle event notifications.
//!
//! Components publish transition events on a broadcast channel; embedding
//! applications subscribe through [`crate::RookeryClient::subscribe`].
//! Event names match the registry client's documented notification names.

use tokio::sync::broadcast;

/// A documented lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Startup completed: registered (when enabled), registry fetched,
    /// periodic timers running.
    Started,
    /// Initial registration (or a 404-triggered re-registration) succeeded.
    Registered,
    /// Deregistration succeeded.
    Deregistered,
    /// A heartbeat renewal succeeded.
    Heartbeat,
    /// The local registry cache changed (full replace or delta apply).
    RegistryUpdated,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Started => "started",
            ClientEvent::Registered => "registered",
            ClientEvent::Deregistered => "deregistered",
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::RegistryUpdated => "registryUpdated",
        }
    }
}

/// Capacity is generous; events are tiny and slow consumers only lose the
/// oldest notifications.
pub(crate) fn channel() -> broadcast::Sender<ClientEvent> {
    broadcast::channel(64).0
}

/// Send that tolerates having no subscribers.
pub(crate) fn emit(sender: &broadcast::Sender<ClientEvent>, event: ClientEvent) {
    tracing::debug!(event = event.name(), "client event");
    let _ = sender.send(event);
}
