//! # Features and Quotas
//!
//! What the current tenant's plan allows. The ceremony engine asks for the
//! features once per operation that needs them.

use async_trait::async_trait;

use crate::error::Result;
use crate::fido2::model::AttestationConveyance;

/// Plan limits of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    /// Maximum number of distinct users with credentials; `None` is unlimited.
    pub max_users: Option<u64>,
    /// Whether attestation other than `none` may be requested.
    pub allow_attestation: bool,
}

impl Features {
    pub fn allows(&self, attestation: AttestationConveyance) -> bool {
        attestation == AttestationConveyance::None || self.allow_attestation
    }
}

#[async_trait]
pub trait FeatureProvider: Send + Sync {
    async fn features(&self, tenant: &str) -> Result<Features>;
}

/// Same features for every tenant, taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatures(pub Features);

#[async_trait]
impl FeatureProvider for StaticFeatures {
    async fn features(&self, _tenant: &str) -> Result<Features> {
        Ok(self.0.clone())
    }
}
