//! Domain events as emitted by the identity provider. Read-only input to the pipeline.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// Detail key the provider uses to carry the user's tenant.
pub const TENANT_DETAIL_KEY: &str = "tenant_id";

/// User-facing event kinds. Names the pipeline does not know deserialize to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Login,
    LoginError,
    Logout,
    LogoutError,
    Register,
    RegisterError,
    UpdatePassword,
    UpdatePasswordError,
    UpdateEmail,
    UpdateProfile,
    VerifyEmail,
    RefreshToken,
    RefreshTokenError,
    ClientLogin,
    ClientLoginError,
    CodeToToken,
    CodeToTokenError,
    IntrospectToken,
    IntrospectTokenError,
    SendVerifyEmail,
    SendResetPassword,
    ResetPassword,
    ResetPasswordError,
    UpdateTotp,
    RemoveTotp,
    GrantConsent,
    RevokeGrant,
    ImpersonateUser,
    TokenExchange,
    #[serde(other)]
    Other,
}

impl EventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::Login => "LOGIN",
            EventType::LoginError => "LOGIN_ERROR",
            EventType::Logout => "LOGOUT",
            EventType::LogoutError => "LOGOUT_ERROR",
            EventType::Register => "REGISTER",
            EventType::RegisterError => "REGISTER_ERROR",
            EventType::UpdatePassword => "UPDATE_PASSWORD",
            EventType::UpdatePasswordError => "UPDATE_PASSWORD_ERROR",
            EventType::UpdateEmail => "UPDATE_EMAIL",
            EventType::UpdateProfile => "UPDATE_PROFILE",
            EventType::VerifyEmail => "VERIFY_EMAIL",
            EventType::RefreshToken => "REFRESH_TOKEN",
            EventType::RefreshTokenError => "REFRESH_TOKEN_ERROR",
            EventType::ClientLogin => "CLIENT_LOGIN",
            EventType::ClientLoginError => "CLIENT_LOGIN_ERROR",
            EventType::CodeToToken => "CODE_TO_TOKEN",
            EventType::CodeToTokenError => "CODE_TO_TOKEN_ERROR",
            EventType::IntrospectToken => "INTROSPECT_TOKEN",
            EventType::IntrospectTokenError => "INTROSPECT_TOKEN_ERROR",
            EventType::SendVerifyEmail => "SEND_VERIFY_EMAIL",
            EventType::SendResetPassword => "SEND_RESET_PASSWORD",
            EventType::ResetPassword => "RESET_PASSWORD",
            EventType::ResetPasswordError => "RESET_PASSWORD_ERROR",
            EventType::UpdateTotp => "UPDATE_TOTP",
            EventType::RemoveTotp => "REMOVE_TOTP",
            EventType::GrantConsent => "GRANT_CONSENT",
            EventType::RevokeGrant => "REVOKE_GRANT",
            EventType::ImpersonateUser => "IMPERSONATE_USER",
            EventType::TokenExchange => "TOKEN_EXCHANGE",
            EventType::Other => "OTHER",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Create,
    Update,
    Delete,
    Action,
    #[serde(other)]
    Other,
}

impl OperationType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Action => "ACTION",
            OperationType::Other => "OTHER",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user authentication event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    /// Epoch milliseconds.
    pub time: i64,
    pub realm_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<BTreeMap<String, String>>,
}

impl AuthEvent {
    pub fn new(kind: EventType, time: i64, realm_id: impl Into<String>) -> Self {
        Self {
            kind,
            time,
            realm_id: realm_id.into(),
            user_id: None,
            session_id: None,
            client_id: None,
            ip_address: None,
            error: None,
            details: None,
        }
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.details
            .as_ref()
            .and_then(|details| details.get(TENANT_DETAIL_KEY))
            .map(String::as_str)
    }
}

/// Who performed an administrative operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthDetails {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub realm_id: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// An administrative operation on a realm resource.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEvent {
    /// Epoch milliseconds.
    pub time: i64,
    pub realm_id: String,
    pub operation_type: OperationType,
    pub resource_type: String,
    pub resource_path: String,
    #[serde(default)]
    pub auth_details: Option<AuthDetails>,
    /// Serialized resource as provided by the host.
    #[serde(default)]
    pub representation: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl AdminEvent {
    pub fn new(
        operation_type: OperationType,
        time: i64,
        realm_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource_path: impl Into<String>,
    ) -> Self {
        Self {
            time,
            realm_id: realm_id.into(),
            operation_type,
            resource_type: resource_type.into(),
            resource_path: resource_path.into(),
            auth_details: None,
            representation: None,
            error: None,
        }
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.auth_details
            .as_ref()
            .and_then(|details| details.user_id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

/// An admin event plus the host's choice about forwarding the resource body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminEnvelope {
    #[serde(flatten)]
    pub event: AdminEvent,
    #[serde(default)]
    pub include_representation: bool,
}

/// Either kind of event, as a host hands it over.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Auth(AuthEvent),
    Admin(AdminEnvelope),
}
