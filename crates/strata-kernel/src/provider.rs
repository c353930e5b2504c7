//! Provider seam
//!
//! The cloud API is an external collaborator. The kernel only needs three
//! calls; every creation request carries an idempotency key so a retried
//! call after a transient failure can be deduplicated provider-side.

use serde::Serialize;
use std::collections::BTreeMap;
use strata_catalog::{ImageLookup, NetworkRuleSet, ResourceId};

/// Provider call failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network error or throttling; safe to retry
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Quota, invalid image, bad request; never retried
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Whether a retry may succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Request to create a network rule set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetRequest {
    /// Catalog name
    pub resource: ResourceId,
    /// Rules to install
    pub rules: NetworkRuleSet,
    /// Deduplication key
    pub idempotency_key: String,
}

/// Request to create a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRequest {
    /// Catalog name
    pub resource: ResourceId,
    /// Resolved image id
    pub image: String,
    /// Instance size / type
    pub size: String,
    /// Provider ids of attached rule sets
    pub rule_set_ids: Vec<String>,
    /// Fully rendered bootstrap script
    pub bootstrap: String,
    /// Provider tags
    pub tags: BTreeMap<String, String>,
    /// Deduplication key
    pub idempotency_key: String,
}

/// Runtime attributes of a created instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatedInstance {
    /// Provider id
    pub instance_id: String,
    /// Address inside the private network
    pub private_address: String,
    /// Internet-facing address
    pub public_address: String,
}

/// Cloud provider interface
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Resolve an image lookup to an image id
    async fn resolve_image(&self, lookup: &ImageLookup) -> Result<String, ProviderError>;

    /// Create a network rule set, returning its provider id
    async fn create_network_rule_set(&self, request: &RuleSetRequest) -> Result<String, ProviderError>;

    /// Create a compute instance
    async fn create_compute_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<CreatedInstance, ProviderError>;
}
