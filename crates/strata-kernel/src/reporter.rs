//! Convergence reporter
//!
//! Reads declared outputs out of the resolved attribute set once the run
//! has ended. Outputs are never read from partial state: a run that left
//! any resource non-terminal is an internal error, and an output whose
//! resource was not realized makes the whole collection fail.

use crate::error::ProvisionError;
use crate::scheduler::RunReport;
use crate::state_machine::ResourceState;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use strata_catalog::Catalog;

/// Declared outputs with their resolved values, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Outputs(IndexMap<String, String>);

impl Outputs {
    /// Value of output `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// (name, value) pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of outputs
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no outputs are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.0.keys().map(String::len).max().unwrap_or(0);
        for (name, value) in &self.0 {
            writeln!(f, "{name:<width$} = {value}")?;
        }
        Ok(())
    }
}

/// Collects declared outputs after a run
#[derive(Debug, Clone, Copy, Default)]
pub struct ConvergenceReporter;

impl ConvergenceReporter {
    /// Resolve every output of `catalog` from `report`
    ///
    /// # Errors
    /// `IncompleteConvergence` listing every output whose resource was not
    /// realized, or `Internal` if the run left a resource non-terminal.
    pub fn collect(catalog: &Catalog, report: &RunReport) -> Result<Outputs, ProvisionError> {
        if let Some((id, state)) = report.states.iter().find(|(_, s)| !s.is_terminal()) {
            return Err(ProvisionError::Internal(format!(
                "outputs requested while {id} is still {state}"
            )));
        }

        let mut values = IndexMap::with_capacity(catalog.outputs().len());
        let mut missing = Vec::new();
        for output in catalog.outputs() {
            let realized = report.state(output.value.resource.as_str()) == Some(ResourceState::Realized);
            match report.attributes.get(&output.value) {
                Some(value) if realized => {
                    values.insert(output.name.clone(), value.to_string());
                }
                _ => missing.push((output.name.clone(), output.value.resource.clone())),
            }
        }

        if !missing.is_empty() {
            tracing::warn!(missing = missing.len(), "outputs could not be resolved");
            return Err(ProvisionError::IncompleteConvergence { missing });
        }
        tracing::debug!(outputs = values.len(), "outputs collected");
        Ok(Outputs(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{RealizedAttributes, ResolvedAttributeSet};
    use crate::config::FailurePolicy;
    use pretty_assertions::assert_eq;
    use strata_catalog::{Declaration, DeclarationFormat, ResourceId};
    use uuid::Uuid;

    const SOURCE: &str = r#"
resources:
  - kind: compute_instance
    name: db
    image: ami-1
    size: t3.medium
  - kind: compute_instance
    name: web
    image: ami-1
    size: t3.small
outputs:
  - name: db_private_ip
    value: db.private_address
  - name: web_public_ip
    value: ${web.public_address}
"#;

    fn catalog() -> Catalog {
        Catalog::from_declaration(Declaration::parse(SOURCE, DeclarationFormat::Yaml).unwrap())
            .unwrap()
    }

    fn report(states: &[(&str, ResourceState)], attributes: ResolvedAttributeSet) -> RunReport {
        RunReport {
            run_id: Uuid::nil(),
            failure_policy: FailurePolicy::HaltAll,
            batches: Vec::new(),
            states: states
                .iter()
                .map(|(id, s)| (ResourceId::new(*id).unwrap(), *s))
                .collect(),
            failures: Vec::new(),
            skipped: IndexMap::new(),
            events: Vec::new(),
            bootstraps: IndexMap::new(),
            attributes,
            aborted: false,
        }
    }

    #[test]
    fn collects_in_declaration_order() {
        let mut attributes = ResolvedAttributeSet::new();
        let db = ResourceId::new("db").unwrap();
        let web = ResourceId::new("web").unwrap();
        attributes
            .publish(&db, &RealizedAttributes::instance("i-1", "10.0.1.5", "54.0.0.1"))
            .unwrap();
        attributes
            .publish(&web, &RealizedAttributes::instance("i-2", "10.0.1.6", "54.0.0.2"))
            .unwrap();
        let run = report(
            &[("db", ResourceState::Realized), ("web", ResourceState::Realized)],
            attributes,
        );

        let outputs = ConvergenceReporter::collect(&catalog(), &run).unwrap();
        assert_eq!(outputs.get("db_private_ip"), Some("10.0.1.5"));
        let names: Vec<&str> = outputs.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["db_private_ip", "web_public_ip"]);
        assert_eq!(
            serde_json::to_string(&outputs).unwrap(),
            r#"{"db_private_ip":"10.0.1.5","web_public_ip":"54.0.0.2"}"#
        );
    }

    #[test]
    fn unrealized_resource_fails_collection() {
        let mut attributes = ResolvedAttributeSet::new();
        attributes
            .publish(
                &ResourceId::new("web").unwrap(),
                &RealizedAttributes::instance("i-2", "10.0.1.6", "54.0.0.2"),
            )
            .unwrap();
        let run = report(
            &[("db", ResourceState::Failed), ("web", ResourceState::Realized)],
            attributes,
        );

        let err = ConvergenceReporter::collect(&catalog(), &run).unwrap_err();
        let ProvisionError::IncompleteConvergence { missing } = err else {
            panic!("expected IncompleteConvergence, got {err:?}");
        };
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].0, "db_private_ip");
    }

    #[test]
    fn non_terminal_run_is_rejected() {
        let run = report(
            &[("db", ResourceState::InFlight), ("web", ResourceState::Pending)],
            ResolvedAttributeSet::new(),
        );
        let err = ConvergenceReporter::collect(&catalog(), &run).unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }
}
