use chrono::{SecondsFormat, TimeZone, Utc};
use common_audit::{PublishError, PublishResult, PublishedMessage};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::events::{AdminEvent, AuthEvent};

pub const AUTH_EVENTS_TOPIC: &str = "auth.events";
pub const ADMIN_EVENTS_TOPIC: &str = "auth.admin.events";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEventPayload {
    pub event_id: Uuid,
    pub event_type: &'static str,
    pub timestamp: String,
    pub realm_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthEventPayload {
    pub fn from_event(event: &AuthEvent) -> PublishResult<Self> {
        // Details and the lifted tenant only appear when the provider sent any detail.
        let details = event.details.clone().filter(|details| !details.is_empty());
        let tenant_id = details.as_ref().and_then(|_| event.tenant_id().map(str::to_string));
        Ok(Self {
            event_id: Uuid::new_v4(),
            event_type: event.kind.as_str(),
            timestamp: iso_timestamp(event.time)?,
            realm_id: event.realm_id.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            ip_address: event.ip_address.clone(),
            client_id: event.client_id.clone(),
            details,
            tenant_id,
            error: event.error.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDetailsPayload {
    pub user_id: Option<String>,
    pub realm_id: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEventPayload {
    pub event_id: Uuid,
    pub operation_type: &'static str,
    pub timestamp: String,
    pub realm_id: String,
    pub resource_type: String,
    pub resource_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_details: Option<AuthDetailsPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AdminEventPayload {
    pub fn from_event(event: &AdminEvent, include_representation: bool) -> PublishResult<Self> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            operation_type: event.operation_type.as_str(),
            timestamp: iso_timestamp(event.time)?,
            realm_id: event.realm_id.clone(),
            resource_type: event.resource_type.clone(),
            resource_path: event.resource_path.clone(),
            auth_details: event.auth_details.as_ref().map(|actor| AuthDetailsPayload {
                user_id: actor.user_id.clone(),
                realm_id: actor.realm_id.clone(),
                ip_address: actor.ip_address.clone(),
            }),
            representation: event
                .representation
                .clone()
                .filter(|_| include_representation),
            error: event.error.clone(),
        })
    }
}

/// Epoch milliseconds as UTC ISO-8601; sub-second digits only when non-zero.
pub fn iso_timestamp(epoch_millis: i64) -> PublishResult<String> {
    Utc.timestamp_millis_opt(epoch_millis)
        .single()
        .map(|instant| instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .ok_or_else(|| PublishError::InvalidEvent(format!("timestamp {epoch_millis} is out of range")))
}

/// User id, then session id, then a fresh identifier. Never empty.
pub fn auth_partition_key(event: &AuthEvent) -> String {
    non_empty(event.user_id.as_deref())
        .or_else(|| non_empty(event.session_id.as_deref()))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Acting user id, else a fresh identifier. Never empty.
pub fn admin_partition_key(event: &AdminEvent) -> String {
    event
        .actor_id()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn build_auth_message(event: &AuthEvent) -> PublishResult<PublishedMessage> {
    let payload = AuthEventPayload::from_event(event)?;
    let bytes = serde_json::to_vec(&payload).map_err(|e| PublishError::Serialization(e.to_string()))?;
    PublishedMessage::new(AUTH_EVENTS_TOPIC, auth_partition_key(event), bytes)
}

pub fn build_admin_message(event: &AdminEvent, include_representation: bool) -> PublishResult<PublishedMessage> {
    let payload = AdminEventPayload::from_event(event, include_representation)?;
    let bytes = serde_json::to_vec(&payload).map_err(|e| PublishError::Serialization(e.to_string()))?;
    PublishedMessage::new(ADMIN_EVENTS_TOPIC, admin_partition_key(event), bytes)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{AuthDetails, EventType, OperationType};
    use serde_json::Value;

    #[test]
    fn timestamps_match_instant_formatting() {
        assert_eq!(iso_timestamp(1_700_000_000_000).unwrap(), "2023-11-14T22:13:20Z");
        assert_eq!(iso_timestamp(1_700_000_000_123).unwrap(), "2023-11-14T22:13:20.123Z");
        assert_eq!(iso_timestamp(0).unwrap(), "1970-01-01T00:00:00Z");
        assert!(matches!(iso_timestamp(i64::MAX), Err(PublishError::InvalidEvent(_))));
    }

    #[test]
    fn auth_key_falls_back_from_user_to_session_to_random() {
        let mut event = AuthEvent::new(EventType::Login, 0, "r1");
        event.session_id = Some("s1".into());
        assert_eq!(auth_partition_key(&event), "s1");
        event.user_id = Some("u1".into());
        assert_eq!(auth_partition_key(&event), "u1");

        let anonymous = AuthEvent::new(EventType::ClientLogin, 0, "r1");
        let key = auth_partition_key(&anonymous);
        assert!(Uuid::parse_str(&key).is_ok());
    }

    #[test]
    fn admin_key_uses_actor_or_generates_one() {
        let mut event = AdminEvent::new(OperationType::Delete, 0, "r1", "USER", "users/1");
        let generated = admin_partition_key(&event);
        assert!(!generated.is_empty());
        assert_ne!(generated, admin_partition_key(&event));

        event.auth_details = Some(AuthDetails {
            user_id: Some("admin-1".into()),
            realm_id: Some("master".into()),
            ip_address: None,
            client_id: None,
        });
        assert_eq!(admin_partition_key(&event), "admin-1");
    }

    #[test]
    fn empty_details_are_omitted() {
        let mut event = AuthEvent::new(EventType::Logout, 0, "r1");
        event.details = Some(BTreeMap::new());
        let message = build_auth_message(&event).unwrap();
        let json: Value = serde_json::from_slice(&message.payload).unwrap();
        assert!(json.get("details").is_none());
        assert!(json.get("tenantId").is_none());
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn representation_follows_include_flag() {
        let mut event = AdminEvent::new(OperationType::Update, 0, "r1", "CLIENT", "clients/7");
        event.representation = Some("{\"enabled\":true}".into());

        let without = AdminEventPayload::from_event(&event, false).unwrap();
        assert!(without.representation.is_none());
        let with = AdminEventPayload::from_event(&event, true).unwrap();
        assert_eq!(with.representation.as_deref(), Some("{\"enabled\":true}"));
    }
}
