//! # Event Logging
//!
//! Fire-and-forget notifications about ceremony milestones. The core calls
//! the logger but never waits on it or depends on it succeeding, so
//! [`EventLogger::log`] is synchronous and infallible; implementations that
//! ship events elsewhere should queue them.

/// Ceremony milestones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    RegistrationBegan {
        user_id: String,
    },
    RegistrationCompleted {
        user_id: String,
        credential_id: String,
    },
    SignInCompleted {
        user_id: String,
        credential_id: String,
        purpose: String,
    },
    TokenVerified {
        user_id: String,
        kind: String,
    },
}

impl AuthEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::RegistrationBegan { .. } => "registration_began",
            AuthEvent::RegistrationCompleted { .. } => "registration_completed",
            AuthEvent::SignInCompleted { .. } => "signin_completed",
            AuthEvent::TokenVerified { .. } => "token_verified",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            AuthEvent::RegistrationBegan { user_id }
            | AuthEvent::RegistrationCompleted { user_id, .. }
            | AuthEvent::SignInCompleted { user_id, .. }
            | AuthEvent::TokenVerified { user_id, .. } => user_id,
        }
    }
}

pub trait EventLogger: Send + Sync {
    fn log(&self, tenant: &str, event: AuthEvent);
}

/// Emits every event as a structured `tracing` record.
#[derive(Debug, Clone, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn log(&self, tenant: &str, event: AuthEvent) {
        tracing::info!(
            target: "passkey_core::events",
            tenant,
            event = event.name(),
            user_id = event.user_id(),
            "{:?}",
            event
        );
    }
}
