//! Declaration documents
//!
//! The on-disk input format. YAML, TOML and JSON share one serde model;
//! the format is picked from the file extension.

use crate::catalog::ImageLookup;
use crate::error::CatalogError;
use crate::network::Protocol;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level declaration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    /// Resources in declaration order
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,
    /// Outputs in declaration order
    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

/// One declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ResourceDecl {
    /// Firewall rules
    NetworkRuleSet {
        /// Unique name
        name: String,
        /// Free-form note
        #[serde(default)]
        description: Option<String>,
        /// Inbound rules
        #[serde(default)]
        ingress: Vec<RuleDecl>,
        /// Outbound rules
        #[serde(default)]
        egress: Vec<RuleDecl>,
    },
    /// Virtual machine
    ComputeInstance {
        /// Unique name
        name: String,
        /// Image id or lookup
        image: ImageDecl,
        /// Instance size / type
        size: String,
        /// Attached rule set names
        #[serde(default)]
        rule_sets: Vec<String>,
        /// Bootstrap script template
        #[serde(default)]
        bootstrap: String,
        /// Provider tags
        #[serde(default)]
        tags: BTreeMap<String, String>,
    },
}

/// One declared rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDecl {
    /// Protocol
    pub protocol: Protocol,
    /// First port
    pub from_port: u16,
    /// Last port
    pub to_port: u16,
    /// Allowed ranges
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
    /// Free-form note
    #[serde(default)]
    pub description: Option<String>,
}

/// Image as written: a literal id or `{ lookup: {...} }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageDecl {
    /// Literal image id
    Id(String),
    /// Provider-side lookup
    Lookup {
        /// Lookup filter
        lookup: ImageLookup,
    },
}

/// One declared output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDecl {
    /// Output name
    pub name: String,
    /// `resource.attribute`, optionally wrapped in `${...}`
    pub value: String,
    /// Free-form note
    #[serde(default)]
    pub description: Option<String>,
}

/// Document syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationFormat {
    /// YAML (`.yaml`, `.yml`)
    Yaml,
    /// TOML (`.toml`)
    Toml,
    /// JSON (`.json`)
    Json,
}

impl DeclarationFormat {
    /// Guess from a file extension; YAML when unknown
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("toml") => Self::Toml,
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

impl Declaration {
    /// Parse document text
    ///
    /// # Errors
    /// `CatalogError::DeclarationParse` with the parser's message.
    pub fn parse(text: &str, format: DeclarationFormat) -> Result<Self, CatalogError> {
        let parsed = match format {
            DeclarationFormat::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
            DeclarationFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            DeclarationFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
        };
        parsed.map_err(CatalogError::DeclarationParse)
    }

    /// Read and parse a declaration file
    ///
    /// # Errors
    /// `CatalogError::Io` when the file cannot be read, otherwise as
    /// [`Declaration::parse`].
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&text, DeclarationFormat::from_path(path))
    }
}
