//! In-memory provider
//!
//! Deterministic stand-in for a cloud API, used for dry runs and tests.
//! Ids and addresses are handed out in creation order; a request whose
//! idempotency key was already seen returns the original result without
//! creating anything new.

use crate::provider::{
    CreatedInstance, InstanceRequest, Provider, ProviderError, RuleSetRequest,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use strata_catalog::{ImageLookup, ResourceId};

#[derive(Debug, Clone)]
enum Created {
    RuleSet(String),
    Instance(CreatedInstance),
}

#[derive(Debug, Default)]
struct LocalState {
    by_key: HashMap<String, Created>,
    rule_sets: Vec<(ResourceId, String)>,
    instances: Vec<InstanceRequest>,
    next_rule_set: u32,
    next_instance: u32,
}

/// Provider that keeps everything in memory
#[derive(Debug, Default)]
pub struct LocalProvider {
    state: Mutex<LocalState>,
}

impl LocalProvider {
    /// Empty provider
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct resources created so far
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.lock().by_key.len()
    }

    /// Instance requests accepted, in creation order
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceRequest> {
        self.state.lock().instances.clone()
    }

    /// Rule sets created, in creation order
    #[must_use]
    pub fn rule_sets(&self) -> Vec<(ResourceId, String)> {
        self.state.lock().rule_sets.clone()
    }
}

/// Stable pseudo image id for a lookup
fn local_image_id(lookup: &ImageLookup) -> String {
    let digest = lookup
        .name
        .bytes()
        .chain(lookup.owners.iter().flat_map(|o| o.bytes()))
        .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    format!("ami-local-{:08x}", digest & 0xffff_ffff)
}

#[async_trait::async_trait]
impl Provider for LocalProvider {
    async fn resolve_image(&self, lookup: &ImageLookup) -> Result<String, ProviderError> {
        if lookup.name.trim().is_empty() {
            return Err(ProviderError::Fatal("image lookup has an empty name".into()));
        }
        Ok(local_image_id(lookup))
    }

    async fn create_network_rule_set(&self, request: &RuleSetRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        if let Some(Created::RuleSet(id)) = state.by_key.get(&request.idempotency_key) {
            return Ok(id.clone());
        }

        state.next_rule_set += 1;
        let id = format!("sg-{:08x}", state.next_rule_set);
        state
            .by_key
            .insert(request.idempotency_key.clone(), Created::RuleSet(id.clone()));
        state.rule_sets.push((request.resource.clone(), id.clone()));
        tracing::debug!(
            resource = %request.resource,
            %id,
            description = request.rules.description().unwrap_or_default(),
            ingress = request.rules.ingress().len(),
            egress = request.rules.egress().len(),
            "local rule set created"
        );
        Ok(id)
    }

    async fn create_compute_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<CreatedInstance, ProviderError> {
        if request.image.is_empty() {
            return Err(ProviderError::Fatal(format!(
                "{}: instance request has no image",
                request.resource
            )));
        }

        let mut state = self.state.lock();
        if let Some(Created::Instance(created)) = state.by_key.get(&request.idempotency_key) {
            return Ok(created.clone());
        }

        state.next_instance += 1;
        let n = state.next_instance;
        let created = CreatedInstance {
            instance_id: format!("i-{n:017x}"),
            private_address: format!("10.0.{}.{}", n / 250, n % 250 + 4),
            public_address: format!("203.0.113.{}", n % 250 + 4),
        };
        state
            .by_key
            .insert(request.idempotency_key.clone(), Created::Instance(created.clone()));
        state.instances.push(request.clone());
        tracing::debug!(
            resource = %request.resource,
            instance_id = %created.instance_id,
            "local instance created"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_catalog::NetworkRuleSet;

    fn instance_request(name: &str, key: &str) -> InstanceRequest {
        InstanceRequest {
            resource: ResourceId::new(name).unwrap(),
            image: "ami-1".into(),
            size: "t3.small".into(),
            rule_set_ids: Vec::new(),
            bootstrap: String::new(),
            tags: BTreeMap::new(),
            idempotency_key: key.into(),
        }
    }

    #[tokio::test]
    async fn repeated_key_returns_original_instance() {
        let provider = LocalProvider::new();
        let first = provider
            .create_compute_instance(&instance_request("db", "run/db"))
            .await
            .unwrap();
        let again = provider
            .create_compute_instance(&instance_request("db", "run/db"))
            .await
            .unwrap();
        let other = provider
            .create_compute_instance(&instance_request("web", "run/web"))
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first.private_address, other.private_address);
        assert_eq!(provider.created(), 2);
        assert_eq!(provider.instances().len(), 2);
    }

    #[tokio::test]
    async fn rule_sets_and_images() {
        let provider = LocalProvider::new();
        let request = RuleSetRequest {
            resource: ResourceId::new("sg-db").unwrap(),
            rules: NetworkRuleSet::default(),
            idempotency_key: "run/sg-db".into(),
        };
        let id = provider.create_network_rule_set(&request).await.unwrap();
        assert!(id.starts_with("sg-"));
        assert_eq!(provider.create_network_rule_set(&request).await.unwrap(), id);

        let lookup = ImageLookup {
            owners: vec!["099720109477".into()],
            name: "ubuntu/images/*".into(),
            most_recent: true,
        };
        let image = provider.resolve_image(&lookup).await.unwrap();
        assert!(image.starts_with("ami-local-"));
        assert_eq!(provider.resolve_image(&lookup).await.unwrap(), image);
    }

    #[tokio::test]
    async fn missing_image_is_fatal() {
        let provider = LocalProvider::new();
        let mut request = instance_request("db", "run/db");
        request.image.clear();
        let err = provider.create_compute_instance(&request).await.unwrap_err();
        assert!(!err.is_transient());
    }
}
