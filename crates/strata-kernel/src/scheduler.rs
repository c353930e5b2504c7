//! Topological scheduler
//!
//! Drives every resource through `pending -> in-flight -> realized | failed`.
//! A resource becomes ready once all of its dependencies are realized; ready
//! resources form a batch whose creations run concurrently, bounded by
//! `max_parallel`. Results are recorded as each creation completes, so a
//! realized resource's attributes are substituted into its pending
//! dependents' templates before the next batch is computed.
//!
//! All mutable run state lives in one [`Ledger`] behind a single lock:
//! state transitions, attribute publication and template substitution
//! for one resource happen atomically with respect to every other job.

use crate::attributes::{RealizedAttributes, ResolvedAttributeSet};
use crate::config::{FailurePolicy, ProvisionConfig};
use crate::error::ProvisionError;
use crate::graph::DependencyGraph;
use crate::provider::{InstanceRequest, Provider, RuleSetRequest};
use crate::retry::{with_retry, CallFailure};
use crate::state_machine::{validate_transition, ResourceState};
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strata_catalog::{
    AttributeName, AttributeRef, Catalog, ImageRef, ResourceDescriptor, ResourceId, ResourceSpec,
    Template,
};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Cooperative cancellation for a running provisioning pass
///
/// Creations already issued finish; nothing new is started. Abort is
/// permanent: a run started with an already-aborted handle skips every
/// resource without calling the provider.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    /// New, not aborted
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request abort
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether abort was requested
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a resource never started
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum SkipReason {
    /// A resource it depends on, directly or not, failed
    DependencyFailed {
        /// The failed resource
        failed: ResourceId,
    },
    /// The halt-all policy stopped the run after a failure
    Halted,
    /// The run was aborted
    Aborted,
}

/// One recorded state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionEvent {
    /// Global order of the transition within the run
    pub seq: u64,
    /// Batch that was running when it happened
    pub batch: usize,
    /// Resource
    pub resource: ResourceId,
    /// Previous state
    pub from: ResourceState,
    /// New state
    pub to: ResourceState,
}

/// A resource that reached `failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    /// Resource
    pub resource: ResourceId,
    /// Provider calls issued for it
    pub attempts: u32,
    /// Provider message
    pub message: String,
}

impl ResourceFailure {
    /// As the fatal error surfaced to the caller
    #[must_use]
    pub fn to_error(&self) -> ProvisionError {
        ProvisionError::ProviderFatal {
            resource: self.resource.clone(),
            attempts: self.attempts,
            message: self.message.clone(),
        }
    }
}

/// Outcome of one scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run identifier, prefix of every idempotency key
    pub run_id: Uuid,
    /// Policy the run used
    pub failure_policy: FailurePolicy,
    /// Batches actually started, in order
    pub batches: Vec<Vec<ResourceId>>,
    /// Final state per resource, declaration order
    pub states: IndexMap<ResourceId, ResourceState>,
    /// Failed resources, declaration order
    pub failures: Vec<ResourceFailure>,
    /// Skipped resources and why
    pub skipped: IndexMap<ResourceId, SkipReason>,
    /// Every transition, in the order it happened
    pub events: Vec<TransitionEvent>,
    /// Bootstrap payloads actually sent, per instance
    pub bootstraps: IndexMap<ResourceId, String>,
    /// Attributes published by realized resources
    pub attributes: ResolvedAttributeSet,
    /// The run stopped early on an abort request
    pub aborted: bool,
}

impl RunReport {
    /// Final state of `id`
    #[must_use]
    pub fn state(&self, id: &str) -> Option<ResourceState> {
        self.states.get(id).copied()
    }

    /// Every resource realized
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.states.values().all(|s| *s == ResourceState::Realized)
    }

    /// The run stopped because of an abort request
    #[must_use]
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// First failure in declaration order
    #[must_use]
    pub fn first_failure(&self) -> Option<&ResourceFailure> {
        self.failures.first()
    }

    /// Sequence number of the transition of `id` into `to`
    #[must_use]
    pub fn event_seq(&self, id: &str, to: ResourceState) -> Option<u64> {
        self.events
            .iter()
            .find(|e| e.resource.as_str() == id && e.to == to)
            .map(|e| e.seq)
    }

    /// Index of the batch `id` was started in
    #[must_use]
    pub fn batch_of(&self, id: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|r| r.as_str() == id))
    }

    /// Rendered bootstrap sent for `id`
    #[must_use]
    pub fn bootstrap(&self, id: &str) -> Option<&str> {
        self.bootstraps.get(id).map(String::as_str)
    }
}

/// Work for one resource, fixed when it enters `in-flight`
enum Job {
    RuleSet(RuleSetRequest),
    Instance(InstanceJob),
}

struct InstanceJob {
    image: ImageRef,
    resource: ResourceId,
    size: String,
    rule_set_ids: Vec<String>,
    bootstrap: String,
    tags: BTreeMap<String, String>,
    idempotency_key: String,
}

impl InstanceJob {
    fn into_request(self, image: String) -> InstanceRequest {
        InstanceRequest {
            resource: self.resource,
            image,
            size: self.size,
            rule_set_ids: self.rule_set_ids,
            bootstrap: self.bootstrap,
            tags: self.tags,
            idempotency_key: self.idempotency_key,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    states: IndexMap<ResourceId, ResourceState>,
    templates: HashMap<ResourceId, Template>,
    attributes: ResolvedAttributeSet,
    bootstraps: IndexMap<ResourceId, String>,
    failures: Vec<ResourceFailure>,
    skipped: IndexMap<ResourceId, SkipReason>,
    events: Vec<TransitionEvent>,
    next_seq: u64,
    batches: Vec<Vec<ResourceId>>,
}

impl LedgerState {
    fn current(&self, id: &ResourceId) -> Result<ResourceState, ProvisionError> {
        self.states
            .get(id)
            .copied()
            .ok_or_else(|| ProvisionError::Internal(format!("{id} is not tracked by this run")))
    }

    fn transition(&mut self, id: &ResourceId, to: ResourceState) -> Result<(), ProvisionError> {
        let from = self.current(id)?;
        validate_transition(from, to).map_err(|source| ProvisionError::StateMachine {
            resource: id.clone(),
            source,
        })?;
        self.states.insert(id.clone(), to);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(TransitionEvent {
            seq,
            batch: self.batches.len().saturating_sub(1),
            resource: id.clone(),
            from,
            to,
        });
        Ok(())
    }

    fn skip(&mut self, id: &ResourceId, reason: SkipReason) -> Result<(), ProvisionError> {
        self.transition(id, ResourceState::Skipped)?;
        self.skipped.insert(id.clone(), reason);
        Ok(())
    }

    fn is_pending(&self, id: &ResourceId) -> bool {
        self.states.get(id) == Some(&ResourceState::Pending)
    }
}

/// Shared bookkeeping for one run
struct Ledger<'a> {
    catalog: &'a Catalog,
    graph: &'a DependencyGraph,
    run_id: Uuid,
    state: Mutex<LedgerState>,
}

impl<'a> Ledger<'a> {
    fn new(catalog: &'a Catalog, graph: &'a DependencyGraph, run_id: Uuid) -> Self {
        let mut state = LedgerState::default();
        for resource in catalog.resources() {
            state.states.insert(resource.id().clone(), ResourceState::Pending);
            if let Some(instance) = resource.as_instance() {
                state
                    .templates
                    .insert(resource.id().clone(), instance.bootstrap.clone());
            }
        }
        Self {
            catalog,
            graph,
            run_id,
            state: Mutex::new(state),
        }
    }

    /// Pending resources whose dependencies are all realized
    fn ready(&self) -> Vec<&'a ResourceDescriptor> {
        let state = self.state.lock();
        self.catalog
            .resources()
            .filter(|r| state.is_pending(r.id()))
            .filter(|r| {
                self.graph
                    .dependencies(r.id().as_str())
                    .into_iter()
                    .all(|dep| state.states.get(dep) == Some(&ResourceState::Realized))
            })
            .collect()
    }

    fn start_batch(&self, batch: &[&ResourceDescriptor]) {
        self.state
            .lock()
            .batches
            .push(batch.iter().map(|r| r.id().clone()).collect());
    }

    fn has_failures(&self) -> bool {
        !self.state.lock().failures.is_empty()
    }

    /// Build the creation request and move the resource to `in-flight`
    ///
    /// The bootstrap template must be fully resolved by now; an open
    /// placeholder here means a dependency was not realized in time.
    fn begin(&self, resource: &ResourceDescriptor) -> Result<Job, ProvisionError> {
        let id = resource.id();
        let idempotency_key = format!("{}/{id}", self.run_id);
        let mut state = self.state.lock();

        let job = match resource.spec() {
            ResourceSpec::NetworkRuleSet(rules) => Job::RuleSet(RuleSetRequest {
                resource: id.clone(),
                rules: rules.clone(),
                idempotency_key,
            }),
            ResourceSpec::ComputeInstance(instance) => {
                let template = state.templates.get(id).unwrap_or(&instance.bootstrap);
                let bootstrap =
                    template
                        .finalize()
                        .map_err(|placeholder| ProvisionError::UnresolvedPlaceholder {
                            resource: id.clone(),
                            placeholder,
                        })?;
                let rule_set_ids = instance
                    .rule_sets
                    .iter()
                    .map(|sg| {
                        let reference = AttributeRef::new(sg.clone(), AttributeName::Id);
                        state
                            .attributes
                            .get(&reference)
                            .map(str::to_string)
                            .ok_or_else(|| ProvisionError::UnresolvedPlaceholder {
                                resource: id.clone(),
                                placeholder: reference,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                state.bootstraps.insert(id.clone(), bootstrap.clone());
                Job::Instance(InstanceJob {
                    image: instance.image.clone(),
                    resource: id.clone(),
                    size: instance.size.clone(),
                    rule_set_ids,
                    bootstrap,
                    tags: instance.tags.clone(),
                    idempotency_key,
                })
            }
        };

        state.transition(id, ResourceState::InFlight)?;
        debug!(resource = %id, kind = %resource.kind(), "in flight");
        Ok(job)
    }

    /// Publish attributes, mark realized, feed pending dependents
    fn realize(&self, id: &ResourceId, attributes: &RealizedAttributes) -> Result<(), ProvisionError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let from = state.current(id)?;
        validate_transition(from, ResourceState::Realized).map_err(|source| {
            ProvisionError::StateMachine {
                resource: id.clone(),
                source,
            }
        })?;
        state.attributes.publish(id, attributes)?;
        state.transition(id, ResourceState::Realized)?;

        for dependent in self.graph.dependents(id.as_str()) {
            if !state.is_pending(dependent) {
                continue;
            }
            if let Some(template) = state.templates.get(dependent) {
                let next = template.substitute(&state.attributes);
                if next.is_resolved() {
                    debug!(resource = %dependent, "bootstrap fully resolved");
                }
                state.templates.insert(dependent.clone(), next);
            }
        }
        Ok(())
    }

    /// Mark failed and skip everything downstream
    fn fail(&self, id: &ResourceId, failure: &CallFailure) -> Result<Vec<ResourceId>, ProvisionError> {
        let mut state = self.state.lock();
        state.transition(id, ResourceState::Failed)?;
        state.failures.push(ResourceFailure {
            resource: id.clone(),
            attempts: failure.attempts,
            message: failure.message(),
        });

        let mut skipped = Vec::new();
        for dependent in self.graph.transitive_dependents(id.as_str()) {
            if state.is_pending(dependent) {
                state.skip(dependent, SkipReason::DependencyFailed { failed: id.clone() })?;
                skipped.push(dependent.clone());
            }
        }
        Ok(skipped)
    }

    fn skip(&self, id: &ResourceId, reason: SkipReason) -> Result<(), ProvisionError> {
        self.state.lock().skip(id, reason)
    }

    /// Skip every resource that has not started
    fn skip_pending(&self, reason: &SkipReason) -> Result<usize, ProvisionError> {
        let mut state = self.state.lock();
        let pending: Vec<ResourceId> = state
            .states
            .iter()
            .filter(|(_, s)| **s == ResourceState::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &pending {
            state.skip(id, reason.clone())?;
        }
        Ok(pending.len())
    }

    fn into_report(self, failure_policy: FailurePolicy, aborted: bool) -> RunReport {
        let mut state = self.state.into_inner();
        state
            .failures
            .sort_by_key(|f| self.catalog.position(f.resource.as_str()));
        RunReport {
            run_id: self.run_id,
            failure_policy,
            batches: state.batches,
            states: state.states,
            failures: state.failures,
            skipped: state.skipped,
            events: state.events,
            bootstraps: state.bootstraps,
            attributes: state.attributes,
            aborted,
        }
    }
}

/// Runs a catalog against a provider
pub struct Scheduler {
    provider: Arc<dyn Provider>,
    config: ProvisionConfig,
    abort: AbortHandle,
}

impl Scheduler {
    /// Create a scheduler
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, config: ProvisionConfig) -> Self {
        Self {
            provider,
            config,
            abort: AbortHandle::new(),
        }
    }

    /// Share an existing abort handle
    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Handle that stops this scheduler from starting new creations
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Provision every resource of `catalog` in dependency order
    ///
    /// Provider failures do not make this return `Err`; they are recorded
    /// in the report. `Err` means a scheduler invariant was violated.
    ///
    /// # Errors
    /// `UnresolvedPlaceholder`, `StateMachine`, `AttributeRewrite` or `Internal`.
    pub async fn run(
        &self,
        catalog: &Catalog,
        graph: &DependencyGraph,
    ) -> Result<RunReport, ProvisionError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("provision", %run_id);
        self.run_inner(catalog, graph, run_id).instrument(span).await
    }

    async fn run_inner(
        &self,
        catalog: &Catalog,
        graph: &DependencyGraph,
        run_id: Uuid,
    ) -> Result<RunReport, ProvisionError> {
        let policy = self.config.failure_policy;
        let max_parallel = self.config.max_parallel.max(1);
        info!(
            resources = catalog.len(),
            failure_policy = %policy,
            max_parallel,
            max_attempts = self.config.retry.max_attempts,
            "starting provisioning run"
        );

        let ledger = Ledger::new(catalog, graph, run_id);
        let mut aborted = false;
        loop {
            if self.abort.is_aborted() {
                let skipped = ledger.skip_pending(&SkipReason::Aborted)?;
                warn!(skipped, "run aborted");
                aborted = true;
                break;
            }
            if policy == FailurePolicy::HaltAll && ledger.has_failures() {
                let skipped = ledger.skip_pending(&SkipReason::Halted)?;
                warn!(skipped, "halting after failure");
                break;
            }

            let ready = ledger.ready();
            if ready.is_empty() {
                break;
            }
            ledger.start_batch(&ready);
            info!(
                batch = ledger.state.lock().batches.len() - 1,
                resources = ?ready.iter().map(|r| r.id().as_str()).collect::<Vec<_>>(),
                "starting batch"
            );

            let mut outcomes = stream::iter(ready)
                .map(|resource| self.provision(&ledger, resource))
                .buffer_unordered(max_parallel);

            let mut violation = None;
            while let Some(outcome) = outcomes.next().await {
                if let Err(e) = outcome {
                    error!(error = %e, "scheduler invariant violated");
                    violation.get_or_insert(e);
                }
            }
            if let Some(e) = violation {
                return Err(e);
            }
        }

        let report = ledger.into_report(policy, aborted);
        info!(
            realized = report
                .states
                .values()
                .filter(|s| **s == ResourceState::Realized)
                .count(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "provisioning run finished"
        );
        Ok(report)
    }

    /// Drive one ready resource to a terminal state
    async fn provision(
        &self,
        ledger: &Ledger<'_>,
        resource: &ResourceDescriptor,
    ) -> Result<(), ProvisionError> {
        let id = resource.id();
        if self.abort.is_aborted() {
            return ledger.skip(id, SkipReason::Aborted);
        }
        if self.config.failure_policy == FailurePolicy::HaltAll && ledger.has_failures() {
            return ledger.skip(id, SkipReason::Halted);
        }

        let job = ledger.begin(resource)?;
        match self.create(id, job).await {
            Ok((attributes, attempts)) => {
                ledger.realize(id, &attributes)?;
                info!(resource = %id, attempts, "realized");
                Ok(())
            }
            Err(failure) => {
                error!(
                    resource = %id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "creation failed"
                );
                let skipped = ledger.fail(id, &failure)?;
                if !skipped.is_empty() {
                    warn!(
                        resource = %id,
                        dependents = ?skipped.iter().map(ResourceId::as_str).collect::<Vec<_>>(),
                        "skipping dependents of failed resource"
                    );
                }
                Ok(())
            }
        }
    }

    async fn create(
        &self,
        id: &ResourceId,
        job: Job,
    ) -> Result<(RealizedAttributes, u32), CallFailure> {
        let retry = &self.config.retry;
        let provider: &dyn Provider = self.provider.as_ref();

        match job {
            Job::RuleSet(request) => {
                let request = &request;
                let (rule_set_id, attempts) =
                    with_retry(retry, id, "create_network_rule_set", move |_| {
                        provider.create_network_rule_set(request)
                    })
                    .await?;
                Ok((RealizedAttributes::rule_set(rule_set_id), attempts))
            }
            Job::Instance(job) => {
                let image = match &job.image {
                    ImageRef::Id(image) => image.clone(),
                    ImageRef::Lookup(lookup) => {
                        let (image, _) = with_retry(retry, id, "resolve_image", move |_| {
                            provider.resolve_image(lookup)
                        })
                        .await?;
                        debug!(resource = %id, %image, "image resolved");
                        image
                    }
                };
                let request = &job.into_request(image);
                let (created, attempts) =
                    with_retry(retry, id, "create_compute_instance", move |_| {
                        provider.create_compute_instance(request)
                    })
                    .await?;
                Ok((
                    RealizedAttributes::instance(
                        created.instance_id,
                        created.private_address,
                        created.public_address,
                    ),
                    attempts,
                ))
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("aborted", &self.abort.is_aborted())
            .finish_non_exhaustive()
    }
}
