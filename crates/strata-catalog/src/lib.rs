//! Strata Catalog - typed resource declarations
//!
//! The catalog is the static half of a provisioning run:
//! - Parses declaration documents (YAML, TOML or JSON)
//! - Models network rule sets and compute instances
//! - Parses bootstrap templates into literal and placeholder segments
//! - Validates every cross-resource reference before anything is created
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_catalog::{Catalog, Declaration, DeclarationFormat};
//!
//! let decl = Declaration::parse(text, DeclarationFormat::Yaml)?;
//! let catalog = Catalog::from_declaration(decl)?;
//!
//! for resource in catalog.resources() {
//!     println!("{} ({})", resource.id(), resource.kind());
//! }
//! ```

pub mod catalog;
pub mod declaration;
pub mod error;
pub mod id;
pub mod network;
pub mod template;

pub use catalog::{Catalog, ComputeInstance, ImageLookup, ImageRef, Output, ResourceDescriptor, ResourceSpec};
pub use declaration::{Declaration, DeclarationFormat, ImageDecl, OutputDecl, ResourceDecl, RuleDecl};
pub use error::{CatalogError, RuleError, TemplateError};
pub use id::{AttributeName, AttributeRef, ResourceId, ResourceKind};
pub use network::{NetworkRuleSet, PortRange, Protocol, Rule};
pub use template::{AttributeLookup, Segment, Template};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
