use crate::events::{EventType, OperationType};

/// Security-relevant user events that are published for audit and analytics.
pub const AUTH_EVENT_ALLOW_LIST: &[EventType] = &[
    EventType::Login,
    EventType::LoginError,
    EventType::Logout,
    EventType::LogoutError,
    EventType::Register,
    EventType::RegisterError,
    EventType::UpdatePassword,
    EventType::UpdatePasswordError,
    EventType::UpdateEmail,
    EventType::UpdateProfile,
    EventType::VerifyEmail,
    EventType::RefreshToken,
    EventType::RefreshTokenError,
    EventType::ClientLogin,
    EventType::ClientLoginError,
];

pub const ADMIN_OPERATION_ALLOW_LIST: &[OperationType] = &[
    OperationType::Create,
    OperationType::Update,
    OperationType::Delete,
    OperationType::Action,
];

pub fn is_auditable_event(kind: EventType) -> bool {
    AUTH_EVENT_ALLOW_LIST.contains(&kind)
}

pub fn is_auditable_operation(operation: OperationType) -> bool {
    ADMIN_OPERATION_ALLOW_LIST.contains(&operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_kinds_are_allowed() {
        assert_eq!(AUTH_EVENT_ALLOW_LIST.len(), 15);
        assert!(is_auditable_event(EventType::Login));
        assert!(is_auditable_event(EventType::ClientLoginError));
        assert!(is_auditable_event(EventType::VerifyEmail));
    }

    #[test]
    fn everything_else_is_dropped() {
        for kind in [
            EventType::CodeToToken,
            EventType::IntrospectToken,
            EventType::SendResetPassword,
            EventType::UpdateTotp,
            EventType::ImpersonateUser,
            EventType::Other,
        ] {
            assert!(!is_auditable_event(kind), "{kind} should not be published");
        }
        assert!(!is_auditable_operation(OperationType::Other));
        assert!(is_auditable_operation(OperationType::Action));
    }
}
