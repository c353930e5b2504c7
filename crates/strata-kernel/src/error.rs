//! Error types for the Strata kernel
//!
//! Provides error handling for:
//! - Static configuration errors (catalog, dependency cycles)
//! - Provider failures after retries are exhausted
//! - Internal invariant violations in the scheduler
//! - Output collection after the run ends

use serde::Serialize;
use strata_catalog::{AttributeRef, CatalogError, ResourceId};

/// Main kernel error type
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Catalog validation or declaration loading failed
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Dependency graph could not be built
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Provider rejected a creation, or transient retries ran out
    #[error("provider failed to create {resource} after {attempts} attempt(s): {message}")]
    ProviderFatal {
        /// Failing resource
        resource: ResourceId,
        /// Calls issued before giving up
        attempts: u32,
        /// Provider message
        message: String,
    },

    /// A resource was about to start with an open placeholder
    #[error("{resource} has unresolved placeholder {placeholder} at creation time")]
    UnresolvedPlaceholder {
        /// Resource about to enter in-flight
        resource: ResourceId,
        /// First open placeholder
        placeholder: AttributeRef,
    },

    /// Declared outputs reference resources that were never realized
    #[error("incomplete convergence: {}", describe_missing(.missing))]
    IncompleteConvergence {
        /// (output name, resource) pairs that could not be resolved
        missing: Vec<(String, ResourceId)>,
    },

    /// State machine rejected a transition
    #[error("{resource}: {source}")]
    StateMachine {
        /// Resource whose state was changing
        resource: ResourceId,
        /// Rejected transition
        #[source]
        source: StateMachineError,
    },

    /// Attribute set rejected a second write
    #[error("{0} was already resolved")]
    AttributeRewrite(AttributeRef),

    /// Scheduler bookkeeping is inconsistent
    #[error("internal error: {0}")]
    Internal(String),
}

fn describe_missing(missing: &[(String, ResourceId)]) -> String {
    missing
        .iter()
        .map(|(output, resource)| format!("{output} (needs {resource})"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ProvisionError {
    /// Stable error kind name for structured failure reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Catalog(e) => e.kind(),
            Self::Graph(e) => e.kind(),
            Self::Config(_) => "Config",
            Self::ProviderFatal { .. } => "ProviderFatalError",
            Self::UnresolvedPlaceholder { .. } => "UnresolvedPlaceholder",
            Self::IncompleteConvergence { .. } => "IncompleteConvergence",
            Self::StateMachine { .. } => "IllegalTransition",
            Self::AttributeRewrite(_) => "AttributeRewrite",
            Self::Internal(_) => "Internal",
        }
    }

    /// Resource the error is attached to, if any
    #[must_use]
    pub fn resource(&self) -> Option<String> {
        match self {
            Self::Catalog(e) => e.owner().map(str::to_string),
            Self::Graph(GraphError::CyclicDependency { path }) => {
                path.first().map(ToString::to_string)
            }
            Self::Graph(GraphError::DanglingReference { from, .. }) => Some(from.to_string()),
            Self::ProviderFatal { resource, .. }
            | Self::UnresolvedPlaceholder { resource, .. }
            | Self::StateMachine { resource, .. } => Some(resource.to_string()),
            Self::IncompleteConvergence { missing } => {
                missing.first().map(|(_, resource)| resource.to_string())
            }
            Self::AttributeRewrite(r) => Some(r.resource.to_string()),
            Self::Config(_) | Self::Internal(_) => None,
        }
    }

    /// Detected before any provider call
    #[inline]
    #[must_use]
    pub fn is_static(&self) -> bool {
        matches!(self, Self::Catalog(_) | Self::Graph(_) | Self::Config(_))
    }

    /// Indicates a scheduler bug rather than bad input or a provider failure
    #[inline]
    #[must_use]
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedPlaceholder { .. }
                | Self::StateMachine { .. }
                | Self::AttributeRewrite(_)
                | Self::Internal(_)
        )
    }

    /// Structured form for the failure surface
    #[must_use]
    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            resource: self.resource(),
            message: self.to_string(),
        }
    }
}

/// Serializable failure description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Error kind name
    pub kind: &'static str,
    /// Failing resource, if any
    pub resource: Option<String>,
    /// Human-readable message
    pub message: String,
}

/// Dependency graph errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Attribute references form a cycle
    #[error("cyclic dependency: {}", join_path(.path))]
    CyclicDependency {
        /// Cycle path; first node repeated at the end
        path: Vec<ResourceId>,
    },

    /// A reference points outside the catalog
    #[error("{from} depends on {to}, which is not in the catalog")]
    DanglingReference {
        /// Dependent resource
        from: ResourceId,
        /// Missing dependency
        to: ResourceId,
    },
}

fn join_path(path: &[ResourceId]) -> String {
    path.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl GraphError {
    /// Stable error kind name
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CyclicDependency { .. } => "CyclicDependency",
            Self::DanglingReference { .. } => "UnknownReference",
        }
    }
}

/// Resource state machine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// Transition not in the allowed set
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current state
        from: crate::state_machine::ResourceState,
        /// Requested state
        to: crate::state_machine::ResourceState,
    },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for `ProvisionConfig`
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Failure policy name not recognised
    #[error("unknown failure policy '{0}' (expected continue-independent or halt-all)")]
    UnknownFailurePolicy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceId {
        ResourceId::new(name).unwrap()
    }

    #[test]
    fn cycle_message_lists_path() {
        let err = ProvisionError::from(GraphError::CyclicDependency {
            path: vec![id("a"), id("b"), id("a")],
        });
        assert_eq!(err.to_string(), "cyclic dependency: a -> b -> a");
        assert_eq!(err.kind(), "CyclicDependency");
        assert_eq!(err.resource().as_deref(), Some("a"));
        assert!(err.is_static());
    }

    #[test]
    fn provider_fatal_report() {
        let err = ProvisionError::ProviderFatal {
            resource: id("db"),
            attempts: 3,
            message: "quota exceeded".into(),
        };
        let report = err.report();
        assert_eq!(report.kind, "ProviderFatalError");
        assert_eq!(report.resource.as_deref(), Some("db"));
        assert!(!err.is_static());
        assert!(!err.is_invariant_violation());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "ProviderFatalError");
    }

    #[test]
    fn catalog_errors_keep_their_kind() {
        let err = ProvisionError::from(CatalogError::UnknownReference {
            owner: "ms".into(),
            target: "dbx".into(),
            expected: "resource".into(),
        });
        assert_eq!(err.kind(), "UnknownReference");
        assert_eq!(err.resource().as_deref(), Some("ms"));
    }
}
