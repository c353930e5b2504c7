//! Testing utilities for the Strata workspace
//!
//! Shared fixtures and a scriptable provider.

#![allow(missing_docs)]

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use strata_catalog::{
    Catalog, ComputeInstance, Declaration, DeclarationFormat, ImageLookup, ImageRef,
    ResourceDescriptor, ResourceId, ResourceSpec, Template,
};
use strata_kernel::local::LocalProvider;
use strata_kernel::provider::{
    CreatedInstance, InstanceRequest, Provider, ProviderError, RuleSetRequest,
};
use strata_kernel::scheduler::AbortHandle;

/// `sg-db`, `db` and `ms`: `ms` reads `db`'s private address at boot
pub const TWO_TIER: &str = r#"
resources:
  - kind: network_rule_set
    name: sg-db
    description: mongodb from inside the vpc
    ingress:
      - { protocol: tcp, from_port: 27017, to_port: 27017, cidr_blocks: ["10.0.0.0/16"] }
  - kind: compute_instance
    name: db
    image: ami-0abcdef
    size: t2.micro
    bootstrap: |
      #!/bin/bash
      systemctl start mongod
  - kind: compute_instance
    name: ms
    image:
      lookup:
        owners: ["099720109477"]
        name: "ubuntu/images/*"
    size: t2.micro
    bootstrap: |
      #!/bin/bash
      echo "DB_HOST=${db.private_address}" >> /etc/environment
outputs:
  - name: db_private_ip
    value: db.private_address
"#;

/// Same as [`TWO_TIER`] with `ms` pointing at a resource that does not exist
pub const TWO_TIER_DANGLING: &str = r#"
resources:
  - kind: compute_instance
    name: db
    image: ami-0abcdef
    size: t2.micro
  - kind: compute_instance
    name: ms
    image: ami-0abcdef
    size: t2.micro
    bootstrap: "DB_HOST=${dbx.private_address}"
"#;

/// `sg-web`/`db`/`app`/`web` chain plus an unrelated `cache`/`worker` branch
pub const THREE_BRANCH: &str = r#"
resources:
  - kind: network_rule_set
    name: sg-web
    ingress:
      - { protocol: tcp, from_port: 443, to_port: 443, cidr_blocks: ["0.0.0.0/0"] }
  - kind: compute_instance
    name: db
    image: ami-1
    size: t3.medium
  - kind: compute_instance
    name: app
    image: ami-1
    size: t3.small
    bootstrap: "DB=${db.private_address}"
  - kind: compute_instance
    name: web
    image: ami-1
    size: t3.small
    rule_sets: [sg-web]
    bootstrap: "UPSTREAM=${app.private_address}"
  - kind: compute_instance
    name: cache
    image: ami-1
    size: t3.micro
  - kind: compute_instance
    name: worker
    image: ami-1
    size: t3.micro
    bootstrap: "REDIS=${cache.private_address}"
outputs:
  - name: web_public_ip
    value: web.public_address
  - name: cache_private_ip
    value: cache.private_address
"#;

pub fn catalog_from_yaml(source: &str) -> Catalog {
    let decl = Declaration::parse(source, DeclarationFormat::Yaml).unwrap();
    Catalog::from_declaration(decl).unwrap()
}

pub fn two_tier_catalog() -> Catalog {
    catalog_from_yaml(TWO_TIER)
}

pub fn three_branch_catalog() -> Catalog {
    catalog_from_yaml(THREE_BRANCH)
}

/// Compute instance whose bootstrap reads the private address of each of `deps`
pub fn instance_reading(name: &str, deps: &[String]) -> ResourceDescriptor {
    let source: String = deps
        .iter()
        .map(|dep| format!("{dep}=${{{dep}.private_address}}\n"))
        .collect();
    ResourceDescriptor::new(
        ResourceId::new(name).unwrap(),
        ResourceSpec::ComputeInstance(ComputeInstance {
            image: ImageRef::Id("ami-test".into()),
            size: "t3.micro".into(),
            rule_sets: Vec::new(),
            bootstrap: Template::parse(&source).unwrap(),
            tags: BTreeMap::new(),
        }),
    )
}

/// Catalog of `r0..r{n-1}` where each `(dependent, dependency)` pair adds a placeholder
///
/// Pairs pointing out of range are ignored.
pub fn generated_catalog(n: usize, edges: &[(usize, usize)]) -> Catalog {
    let resources = (0..n)
        .map(|i| {
            let mut deps: Vec<String> = edges
                .iter()
                .filter(|(d, p)| *d == i && *p < n)
                .map(|(_, p)| format!("r{p}"))
                .collect();
            deps.dedup();
            instance_reading(&format!("r{i}"), &deps)
        })
        .collect();
    Catalog::new(resources, Vec::new()).unwrap()
}

/// One provider call as seen by [`ScriptedProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub resource: String,
    pub operation: &'static str,
    pub idempotency_key: Option<String>,
    pub bootstrap: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Injected {
    Transient,
    Fatal,
}

#[derive(Default)]
struct Script {
    failures: HashMap<String, VecDeque<Injected>>,
    delays: HashMap<String, Duration>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Provider whose failures and latencies are scripted per resource
///
/// Successful creations are delegated to a [`LocalProvider`].
#[derive(Default)]
pub struct ScriptedProvider {
    inner: LocalProvider,
    script: Mutex<Script>,
    default_delay: Duration,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    abort_on: Option<(String, AbortHandle)>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` creation calls for `resource` transiently
    pub fn fail_transient(self, resource: &str, times: usize) -> Self {
        self.script
            .lock()
            .failures
            .entry(resource.to_string())
            .or_default()
            .extend(std::iter::repeat(Injected::Transient).take(times));
        self
    }

    /// Fail the next creation call for `resource` fatally
    pub fn fail_fatal(self, resource: &str) -> Self {
        self.script
            .lock()
            .failures
            .entry(resource.to_string())
            .or_default()
            .push_back(Injected::Fatal);
        self
    }

    pub fn with_delay(self, resource: &str, delay: Duration) -> Self {
        self.script.lock().delays.insert(resource.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    /// Trigger `handle` when creation of `resource` starts
    pub fn abort_when_called(mut self, resource: &str, handle: AbortHandle) -> Self {
        self.abort_on = Some((resource.to_string(), handle));
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Creation calls issued for `resource`, retries included
    pub fn calls_for(&self, resource: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.resource == resource && c.operation != "resolve_image")
            .count()
    }

    pub fn creation_calls(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation != "resolve_image")
            .count()
    }

    /// Resources created, in creation order
    pub fn created(&self) -> Vec<String> {
        let mut created: Vec<(String, usize)> = self
            .inner
            .rule_sets()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .chain(self.inner.instances().into_iter().map(|r| r.resource.to_string()))
            .map(|name| {
                let position = self.first_call(&name);
                (name, position)
            })
            .collect();
        created.sort_by_key(|(_, position)| *position);
        created.into_iter().map(|(name, _)| name).collect()
    }

    /// Highest number of creation calls observed in flight at once
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn first_call(&self, resource: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .position(|c| c.resource == resource)
            .unwrap_or(usize::MAX)
    }

    fn record(&self, call: Call) {
        if let Some((resource, handle)) = &self.abort_on {
            if *resource == call.resource {
                handle.abort();
            }
        }
        self.calls.lock().push(call);
    }

    async fn enter(&self, resource: &str) -> Result<InFlight<'_>, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let (delay, injected) = {
            let mut script = self.script.lock();
            let delay = script
                .delays
                .get(resource)
                .copied()
                .unwrap_or(self.default_delay);
            let injected = script
                .failures
                .get_mut(resource)
                .and_then(VecDeque::pop_front);
            (delay, injected)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match injected {
            Some(Injected::Transient) => Err(ProviderError::Transient(format!(
                "{resource}: request throttled"
            ))),
            Some(Injected::Fatal) => Err(ProviderError::Fatal(format!(
                "{resource}: instance quota exceeded"
            ))),
            None => Ok(guard),
        }
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn resolve_image(&self, lookup: &ImageLookup) -> Result<String, ProviderError> {
        self.calls.lock().push(Call {
            resource: lookup.name.clone(),
            operation: "resolve_image",
            idempotency_key: None,
            bootstrap: None,
        });
        self.inner.resolve_image(lookup).await
    }

    async fn create_network_rule_set(&self, request: &RuleSetRequest) -> Result<String, ProviderError> {
        self.record(Call {
            resource: request.resource.to_string(),
            operation: "create_network_rule_set",
            idempotency_key: Some(request.idempotency_key.clone()),
            bootstrap: None,
        });
        let _guard = self.enter(request.resource.as_str()).await?;
        self.inner.create_network_rule_set(request).await
    }

    async fn create_compute_instance(
        &self,
        request: &InstanceRequest,
    ) -> Result<CreatedInstance, ProviderError> {
        self.record(Call {
            resource: request.resource.to_string(),
            operation: "create_compute_instance",
            idempotency_key: Some(request.idempotency_key.clone()),
            bootstrap: Some(request.bootstrap.clone()),
        });
        let _guard = self.enter(request.resource.as_str()).await?;
        self.inner.create_compute_instance(request).await
    }
}
