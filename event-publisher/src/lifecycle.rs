use common_audit::ManagerSlot;
use std::sync::Arc;
use tracing::{error, info};

use crate::router::EventRouter;

pub const PROVIDER_ID: &str = "cotai-kafka-event-listener";

/// Host-facing hooks around the pipeline: warm the manager at startup, hand out
/// listeners per session and close the manager at shutdown.
pub struct ListenerFactory {
    slot: Arc<ManagerSlot>,
}

impl ListenerFactory {
    pub fn new(slot: Arc<ManagerSlot>) -> Self {
        Self { slot }
    }

    /// Factory over the process-wide slot configured from `KAFKA_*`.
    #[cfg(feature = "kafka")]
    pub fn from_env() -> common_audit::PublishResult<Self> {
        Ok(Self::new(common_audit::shared_slot()?))
    }

    pub fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    pub fn slot(&self) -> &Arc<ManagerSlot> {
        &self.slot
    }

    /// Builds the connection manager eagerly. A failure is logged and the host
    /// keeps starting; the next publish retries construction.
    pub fn init(&self) {
        info!(provider = PROVIDER_ID, "Initialising audit event listener");
        match self.slot.instance() {
            Ok(_) => info!("Kafka producer initialised"),
            Err(err) => error!(?err, "Kafka producer unavailable; audit events will not be published until it recovers"),
        }
    }

    pub fn post_init(&self) {
        info!(provider = PROVIDER_ID, state = %self.slot.state(), "Audit event listener ready");
    }

    pub fn create_listener(&self) -> EventRouter {
        EventRouter::new(self.slot.clone())
    }

    /// Closes the slot and any manager it built; later events are dropped
    /// instead of building a new client. Blocks for at most the close grace period.
    pub fn shutdown(&self) {
        info!(provider = PROVIDER_ID, "Shutting down audit event listener");
        self.slot.close();
    }
}
