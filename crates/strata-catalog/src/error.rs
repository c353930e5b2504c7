//! Error types for the resource catalog
//!
//! Every variant here is a configuration error: it is detected before any
//! provider call and is never retried.

use crate::id::ResourceId;

/// Static validation and declaration loading errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Resource name contains characters outside `[A-Za-z0-9_-]`
    #[error("invalid resource id {0:?}: ids use ASCII letters, digits, '-' and '_'")]
    InvalidResourceId(String),

    /// Two resources share a name
    #[error("duplicate resource: {0}")]
    DuplicateResource(ResourceId),

    /// Two outputs share a name
    #[error("duplicate output: {0}")]
    DuplicateOutput(String),

    /// A reference names a resource that is not in the catalog
    #[error("{owner} references unknown {expected} '{target}'")]
    UnknownReference {
        /// Resource or output holding the reference
        owner: String,
        /// Name that could not be found
        target: String,
        /// What the reference had to point at
        expected: String,
    },

    /// A placeholder is malformed or names an attribute the target does not expose
    #[error("invalid placeholder '{placeholder}' in {owner}: {reason}")]
    InvalidPlaceholder {
        /// Resource or output holding the placeholder
        owner: String,
        /// Placeholder text as written
        placeholder: String,
        /// Why it was rejected
        reason: String,
    },

    /// A network rule is malformed
    #[error("invalid rule in {owner}: {reason}")]
    InvalidRule {
        /// Owning rule set
        owner: ResourceId,
        /// Why it was rejected
        #[source]
        reason: RuleError,
    },

    /// Declaration file could not be read
    #[error("cannot read declaration {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Declaration document could not be parsed
    #[error("cannot parse declaration: {0}")]
    DeclarationParse(String),
}

impl CatalogError {
    /// Stable error kind name for structured failure reports
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidResourceId(_) => "InvalidResourceId",
            Self::DuplicateResource(_) => "DuplicateResource",
            Self::DuplicateOutput(_) => "DuplicateOutput",
            Self::UnknownReference { .. } => "UnknownReference",
            Self::InvalidPlaceholder { .. } => "InvalidPlaceholder",
            Self::InvalidRule { .. } => "InvalidRule",
            Self::Io { .. } => "DeclarationIo",
            Self::DeclarationParse(_) => "DeclarationParse",
        }
    }

    /// Resource or output the error is attached to, if any
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::InvalidResourceId(name) => Some(name),
            Self::DuplicateResource(id) => Some(id.as_str()),
            Self::DuplicateOutput(name) => Some(name),
            Self::UnknownReference { owner, .. } | Self::InvalidPlaceholder { owner, .. } => {
                Some(owner)
            }
            Self::InvalidRule { owner, .. } => Some(owner.as_str()),
            Self::Io { .. } | Self::DeclarationParse(_) => None,
        }
    }
}

/// Why a network rule was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    /// `from_port` is above `to_port`
    #[error("port range {from}-{to} is reversed")]
    ReversedPorts {
        /// Declared first port
        from: u16,
        /// Declared last port
        to: u16,
    },

    /// No `/prefix` part
    #[error("'{0}' is not in CIDR notation")]
    NotCidr(String),

    /// Address part is not an IPv4 or IPv6 address
    #[error("'{0}' has an invalid address")]
    InvalidAddress(String),

    /// Prefix is not a number, or too long for the address family
    #[error("'{cidr}' has an invalid prefix length (at most /{max})")]
    InvalidPrefix {
        /// Block as written
        cidr: String,
        /// Longest prefix for the address family
        max: u8,
    },
}

/// Template parse errors, before the owning resource is known
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid placeholder '{placeholder}': {reason}")]
pub struct TemplateError {
    /// Placeholder text as written
    pub placeholder: String,
    /// Why it was rejected
    pub reason: String,
}

impl TemplateError {
    pub(crate) fn new(placeholder: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            reason: reason.into(),
        }
    }

    /// Attach the owning resource or output
    #[must_use]
    pub fn in_owner(self, owner: impl Into<String>) -> CatalogError {
        CatalogError::InvalidPlaceholder {
            owner: owner.into(),
            placeholder: self.placeholder,
            reason: self.reason,
        }
    }
}
