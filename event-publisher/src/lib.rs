pub mod allow_list;
pub mod claims;
pub mod events;
pub mod lifecycle;
pub mod payload;
pub mod router;

pub use allow_list::{is_auditable_event, is_auditable_operation};
pub use claims::{TenantClaimMapper, UserRecord};
pub use events::{AdminEnvelope, AdminEvent, AuthDetails, AuthEvent, DomainEvent, EventType, OperationType};
pub use lifecycle::ListenerFactory;
pub use payload::{ADMIN_EVENTS_TOPIC, AUTH_EVENTS_TOPIC};
pub use router::{EventRouter, RouteOutcome};
