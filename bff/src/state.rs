//! Shared state for the HTTP handlers.

use crate::stream::StreamHub;
use partnerflow_core::bus::MessageBus;
use partnerflow_core::clock::Clock;
use std::sync::Arc;

/// Everything the handlers need, injected once at startup.
#[derive(Clone)]
pub struct AppState {
    /// The message bus commands are published to.
    pub bus: Arc<dyn MessageBus>,
    /// Clock for envelope timestamps.
    pub clock: Arc<dyn Clock>,
    /// Live tail hub fed by the contract event subscription.
    pub hub: Arc<StreamHub>,
}

impl AppState {
    /// Build state over the given ports.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, clock: Arc<dyn Clock>, hub: Arc<StreamHub>) -> Self {
        Self { bus, clock, hub }
    }
}
