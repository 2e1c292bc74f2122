use common_audit::{DeliveryHandle, ManagerSlot, PublishResult, PublishedMessage};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::allow_list::{is_auditable_event, is_auditable_operation};
use crate::events::{AdminEnvelope, AdminEvent, AuthEvent, DomainEvent};
use crate::payload::{build_admin_message, build_auth_message};

const AUTH_SOURCE: &str = "auth";
const ADMIN_SOURCE: &str = "admin";

/// What happened to one domain event.
#[derive(Debug)]
pub enum RouteOutcome {
    /// Not on the allow-list; nothing was built or sent.
    Filtered,
    /// Handed to the connection manager. Awaiting the handle is optional.
    Published(DeliveryHandle),
    /// Building or enqueuing failed; the error was logged and swallowed.
    Dropped,
}

impl RouteOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, RouteOutcome::Published(_))
    }

    pub fn into_handle(self) -> Option<DeliveryHandle> {
        match self {
            RouteOutcome::Published(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Per-session listener. Holds no state besides the shared manager slot, so the
/// host may create one per request.
#[derive(Clone)]
pub struct EventRouter {
    slot: Arc<ManagerSlot>,
}

impl EventRouter {
    pub fn new(slot: Arc<ManagerSlot>) -> Self {
        Self { slot }
    }

    pub fn handle(&self, event: DomainEvent) -> RouteOutcome {
        match event {
            DomainEvent::Auth(event) => self.handle_auth_event(&event),
            DomainEvent::Admin(AdminEnvelope {
                event,
                include_representation,
            }) => self.handle_admin_event(&event, include_representation),
        }
    }

    pub fn handle_auth_event(&self, event: &AuthEvent) -> RouteOutcome {
        if !is_auditable_event(event.kind) {
            self.slot.metrics().event_filtered(AUTH_SOURCE);
            return RouteOutcome::Filtered;
        }

        match self.publish(build_auth_message(event)) {
            Ok(handle) => {
                debug!(event_type = %event.kind, realm = %event.realm_id, "Queued auth event for publishing");
                RouteOutcome::Published(handle)
            }
            Err(err) => {
                self.slot.metrics().event_dropped(AUTH_SOURCE);
                warn!(?err, event_type = %event.kind, realm = %event.realm_id, "Failed to publish auth event");
                RouteOutcome::Dropped
            }
        }
    }

    pub fn handle_admin_event(&self, event: &AdminEvent, include_representation: bool) -> RouteOutcome {
        if !is_auditable_operation(event.operation_type) {
            self.slot.metrics().event_filtered(ADMIN_SOURCE);
            return RouteOutcome::Filtered;
        }

        match self.publish(build_admin_message(event, include_representation)) {
            Ok(handle) => {
                debug!(
                    operation = %event.operation_type,
                    resource_type = %event.resource_type,
                    realm = %event.realm_id,
                    "Queued admin event for publishing"
                );
                RouteOutcome::Published(handle)
            }
            Err(err) => {
                self.slot.metrics().event_dropped(ADMIN_SOURCE);
                warn!(
                    ?err,
                    operation = %event.operation_type,
                    resource_path = %event.resource_path,
                    "Failed to publish admin event"
                );
                RouteOutcome::Dropped
            }
        }
    }

    /// Listeners own nothing; the manager is closed by the factory.
    pub fn close(&self) {}

    fn publish(&self, message: PublishResult<PublishedMessage>) -> PublishResult<DeliveryHandle> {
        let message = message?;
        self.slot.instance()?.send_message(message)
    }
}
