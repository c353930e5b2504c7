//! Provisioning entry points
//!
//! Ties the pieces together: catalog validation, graph construction,
//! scheduling and output collection. Everything static is checked before
//! the first provider call.

use crate::config::ProvisionConfig;
use crate::error::ProvisionError;
use crate::graph::DependencyGraph;
use crate::provider::Provider;
use crate::reporter::{ConvergenceReporter, Outputs};
use crate::scheduler::{AbortHandle, RunReport, Scheduler};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use strata_catalog::{Catalog, Declaration, ResourceId, ResourceKind};

/// One resource in a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedResource {
    /// Resource kind
    pub kind: ResourceKind,
    /// Direct dependencies, declaration order
    pub depends_on: Vec<ResourceId>,
}

/// Creation order computed without contacting the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Batches in order; declaration order inside each
    pub batches: Vec<Vec<ResourceId>>,
    /// Every resource with its dependencies
    pub resources: IndexMap<ResourceId, PlannedResource>,
    /// Declared output names
    pub outputs: Vec<String>,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, batch) in self.batches.iter().enumerate() {
            writeln!(f, "batch {n}:")?;
            for id in batch {
                let Some(planned) = self.resources.get(id) else {
                    continue;
                };
                if planned.depends_on.is_empty() {
                    writeln!(f, "  + {id} ({})", planned.kind)?;
                } else {
                    let deps: Vec<&str> = planned.depends_on.iter().map(ResourceId::as_str).collect();
                    writeln!(f, "  + {id} ({}) after {}", planned.kind, deps.join(", "))?;
                }
            }
        }
        if !self.outputs.is_empty() {
            writeln!(f, "outputs: {}", self.outputs.join(", "))?;
        }
        Ok(())
    }
}

/// A completed run with all outputs resolved
#[derive(Debug, Clone, Serialize)]
pub struct Convergence {
    /// Scheduler report
    pub report: RunReport,
    /// Resolved outputs
    pub outputs: Outputs,
}

/// Provisioning front end
pub struct Provisioner {
    provider: Arc<dyn Provider>,
    config: ProvisionConfig,
    abort: AbortHandle,
}

impl Provisioner {
    /// Create with default configuration
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            config: ProvisionConfig::default(),
            abort: AbortHandle::new(),
        }
    }

    /// With configuration
    #[must_use]
    pub fn with_config(mut self, config: ProvisionConfig) -> Self {
        self.config = config;
        self
    }

    /// With an externally owned abort handle
    #[must_use]
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Handle that aborts runs started by this provisioner
    ///
    /// Aborting is permanent for this provisioner; build a new one, or pass
    /// a fresh handle to [`Self::with_abort_handle`], to provision again.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Compute the creation order without side effects
    ///
    /// # Errors
    /// `CyclicDependency` when the catalog cannot be ordered.
    pub fn plan(catalog: &Catalog) -> Result<Plan, ProvisionError> {
        let graph = DependencyGraph::build(catalog)?;
        let resources = catalog
            .resources()
            .map(|r| {
                let planned = PlannedResource {
                    kind: r.kind(),
                    depends_on: graph
                        .dependencies(r.id().as_str())
                        .into_iter()
                        .cloned()
                        .collect(),
                };
                (r.id().clone(), planned)
            })
            .collect();
        Ok(Plan {
            batches: graph.batches(),
            resources,
            outputs: catalog.outputs().iter().map(|o| o.name.clone()).collect(),
        })
    }

    /// Run the scheduler; provider failures are recorded, not returned
    ///
    /// # Errors
    /// Configuration or graph errors before any provider call, or a
    /// scheduler invariant violation.
    pub async fn run(&self, catalog: &Catalog) -> Result<RunReport, ProvisionError> {
        self.config.validate()?;
        let graph = DependencyGraph::build(catalog)?;
        Scheduler::new(Arc::clone(&self.provider), self.config.clone())
            .with_abort_handle(self.abort.clone())
            .run(catalog, &graph)
            .await
    }

    /// Provision everything and collect outputs
    ///
    /// An aborted run still reports outputs when every resource they read
    /// was realized before the abort; [`RunReport::was_aborted`] tells the
    /// two apart.
    ///
    /// # Errors
    /// Anything [`Self::run`] returns, `ProviderFatal` for the first failed
    /// resource in declaration order, or `IncompleteConvergence` when an
    /// output cannot be resolved.
    pub async fn apply(&self, catalog: &Catalog) -> Result<Convergence, ProvisionError> {
        let report = self.run(catalog).await?;
        if let Some(failure) = report.first_failure() {
            return Err(failure.to_error());
        }
        if report.was_aborted() {
            tracing::warn!(
                skipped = report.skipped.len(),
                "run was aborted, collecting outputs of realized resources"
            );
        }
        let outputs = ConvergenceReporter::collect(catalog, &report)?;
        Ok(Convergence { report, outputs })
    }

    /// Validate a declaration document, then [`Self::apply`] it
    ///
    /// # Errors
    /// Catalog errors first, then as [`Self::apply`].
    pub async fn apply_declaration(&self, decl: Declaration) -> Result<Convergence, ProvisionError> {
        let catalog = Catalog::from_declaration(decl)?;
        self.apply(&catalog).await
    }
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalProvider;
    use pretty_assertions::assert_eq;
    use strata_catalog::DeclarationFormat;

    const SOURCE: &str = r#"
resources:
  - kind: network_rule_set
    name: sg-web
  - kind: compute_instance
    name: db
    image: ami-1
    size: t3.medium
  - kind: compute_instance
    name: web
    image: ami-1
    size: t3.small
    rule_sets: [sg-web]
    bootstrap: "API=${db.private_address}"
outputs:
  - name: web_public_ip
    value: web.public_address
"#;

    fn catalog() -> Catalog {
        Catalog::from_declaration(Declaration::parse(SOURCE, DeclarationFormat::Yaml).unwrap())
            .unwrap()
    }

    #[test]
    fn plan_lists_batches_and_dependencies() {
        let plan = Provisioner::plan(&catalog()).unwrap();
        let batches: Vec<Vec<&str>> = plan
            .batches
            .iter()
            .map(|b| b.iter().map(ResourceId::as_str).collect())
            .collect();
        assert_eq!(batches, vec![vec!["sg-web", "db"], vec!["web"]]);

        let web = &plan.resources["web"];
        let deps: Vec<&str> = web.depends_on.iter().map(ResourceId::as_str).collect();
        assert_eq!(deps, vec!["sg-web", "db"]);
        assert!(plan.to_string().contains("+ web (compute-instance) after sg-web, db"));
    }

    #[tokio::test]
    async fn apply_collects_outputs() {
        let provider = Arc::new(LocalProvider::new());
        let convergence = Provisioner::new(provider.clone())
            .apply(&catalog())
            .await
            .unwrap();

        assert!(convergence.report.is_converged());
        let public = convergence.outputs.get("web_public_ip").unwrap();
        assert!(public.starts_with("203.0.113."));
        assert_eq!(provider.created(), 3);
    }

    #[tokio::test]
    async fn invalid_config_fails_before_provider_calls() {
        let provider = Arc::new(LocalProvider::new());
        let err = Provisioner::new(provider.clone())
            .with_config(ProvisionConfig::default().with_max_parallel(0))
            .apply(&catalog())
            .await
            .unwrap_err();
        assert!(err.is_static());
        assert_eq!(provider.created(), 0);
    }
}
