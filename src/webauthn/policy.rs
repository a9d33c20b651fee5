//! Sign-in policy per purpose.
//!
//! A tenant may configure the user-verification requirement, hints and the
//! verification token lifetime for a purpose. Unconfigured purposes fall back
//! to built-in defaults: `step-up` requires user verification, everything
//! else behaves like `sign-in`.

use chrono::Duration;

use crate::db::TenantStorage;
use crate::error::Result;
use crate::fido2::model::{CredentialHint, UserVerification};

pub const PURPOSE_SIGN_IN: &str = "sign-in";
pub const PURPOSE_STEP_UP: &str = "step-up";

const SIGN_IN_TTL_SECONDS: i64 = 120;
const STEP_UP_TTL_SECONDS: i64 = 180;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInPolicy {
    pub purpose: String,
    pub user_verification: UserVerification,
    /// Lifetime of the verification token.
    pub time_to_live: Duration,
    pub hints: Vec<CredentialHint>,
    /// Whether the policy came from tenant configuration.
    pub configured: bool,
}

impl SignInPolicy {
    pub fn default_for(purpose: &str) -> Self {
        let (user_verification, ttl) = if purpose == PURPOSE_STEP_UP {
            (UserVerification::Required, STEP_UP_TTL_SECONDS)
        } else {
            (UserVerification::Preferred, SIGN_IN_TTL_SECONDS)
        };

        Self {
            purpose: purpose.to_string(),
            user_verification,
            time_to_live: Duration::seconds(ttl),
            hints: Vec::new(),
            configured: false,
        }
    }
}

/// Tenant configuration for `purpose`, or the built-in default.
pub async fn resolve(storage: &dyn TenantStorage, purpose: &str) -> Result<SignInPolicy> {
    let policy = match storage.get_authentication_configuration(purpose).await? {
        Some(configuration) => SignInPolicy {
            purpose: configuration.purpose,
            user_verification: configuration.user_verification,
            time_to_live: configuration.time_to_live,
            hints: configuration.hints,
            configured: true,
        },
        None => SignInPolicy::default_for(purpose),
    };
    Ok(policy)
}
