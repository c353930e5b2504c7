//! Strata Kernel (strata-kernel)
//!
//! Two-phase provisioning of a validated resource catalog:
//! 1. **Static phase**: build the dependency graph, reject cycles, plan batches
//! 2. **Execution phase**: create resources batch by batch, feed runtime
//!    attributes into dependents' bootstrap templates, collect outputs
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use strata_kernel::prelude::*;
//!
//! let catalog = Catalog::from_declaration(Declaration::load(path)?)?;
//! let plan = Provisioner::plan(&catalog)?;
//!
//! let provisioner = Provisioner::new(Arc::new(LocalProvider::new()))
//!     .with_config(ProvisionConfig::default());
//! let convergence = provisioner.apply(&catalog).await?;
//! println!("{}", convergence.outputs);
//! ```

pub mod attributes;
pub mod config;
pub mod error;
pub mod graph;
pub mod local;
pub mod provider;
pub mod provisioner;
pub mod reporter;
pub mod retry;
pub mod scheduler;
pub mod state_machine;

pub use error::*;

/// Common imports
pub mod prelude {
    pub use crate::attributes::{RealizedAttributes, ResolvedAttributeSet};
    pub use crate::config::{FailurePolicy, ProvisionConfig};
    pub use crate::error::{FailureReport, GraphError, ProvisionError};
    pub use crate::graph::DependencyGraph;
    pub use crate::local::LocalProvider;
    pub use crate::provider::{
        CreatedInstance, InstanceRequest, Provider, ProviderError, RuleSetRequest,
    };
    pub use crate::provisioner::{Convergence, Plan, Provisioner};
    pub use crate::reporter::{ConvergenceReporter, Outputs};
    pub use crate::retry::RetryPolicy;
    pub use crate::scheduler::{AbortHandle, RunReport, Scheduler, SkipReason, TransitionEvent};
    pub use crate::state_machine::ResourceState;
    pub use strata_catalog::{Catalog, Declaration, DeclarationFormat, ResourceId};
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
