//! Resource identity and attribute references

use crate::error::{CatalogError, TemplateError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Unique name of a declared resource
///
/// Dots are not allowed: a dot separates resource and attribute inside
/// a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a validated resource id
    ///
    /// # Errors
    /// `CatalogError::InvalidResourceId` if the name is empty or contains
    /// characters outside `[A-Za-z0-9_-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, CatalogError> {
        let name = name.into();
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(name))
        } else {
            Err(CatalogError::InvalidResourceId(name))
        }
    }

    /// Name as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ResourceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for ResourceId {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

/// Kind of provisionable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Ingress/egress firewall rules
    NetworkRuleSet,
    /// Virtual machine
    ComputeInstance,
}

impl ResourceKind {
    /// Attributes a realized resource of this kind exposes
    #[must_use]
    pub fn attributes(self) -> &'static [AttributeName] {
        match self {
            Self::NetworkRuleSet => &[AttributeName::Id],
            Self::ComputeInstance => &[
                AttributeName::Id,
                AttributeName::PrivateAddress,
                AttributeName::PublicAddress,
            ],
        }
    }

    /// Whether this kind exposes `attribute`
    #[inline]
    #[must_use]
    pub fn exposes(self, attribute: AttributeName) -> bool {
        self.attributes().contains(&attribute)
    }

    /// Kebab-case label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NetworkRuleSet => "network-rule-set",
            Self::ComputeInstance => "compute-instance",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Runtime attribute assigned by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeName {
    /// Provider-assigned identifier
    Id,
    /// Address inside the private network
    PrivateAddress,
    /// Internet-facing address
    PublicAddress,
}

impl AttributeName {
    /// Canonical snake_case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::PrivateAddress => "private_address",
            Self::PublicAddress => "public_address",
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "private_address" | "privateAddress" | "private_ip" => Ok(Self::PrivateAddress),
            "public_address" | "publicAddress" | "public_ip" => Ok(Self::PublicAddress),
            other => Err(format!("unknown attribute '{other}'")),
        }
    }
}

/// A (resource, attribute) pair that must be resolved at runtime
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttributeRef {
    /// Referenced resource
    pub resource: ResourceId,
    /// Referenced attribute
    pub attribute: AttributeName,
}

impl AttributeRef {
    /// Create a reference
    #[inline]
    #[must_use]
    pub fn new(resource: ResourceId, attribute: AttributeName) -> Self {
        Self {
            resource,
            attribute,
        }
    }

    /// Parse `resource.attribute`
    ///
    /// # Errors
    /// `TemplateError` when the dot is missing, the resource id is invalid
    /// or the attribute name is unknown.
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let trimmed = text.trim();
        let (resource, attribute) = trimmed
            .split_once('.')
            .ok_or_else(|| TemplateError::new(text, "expected <resource>.<attribute>"))?;
        let resource = ResourceId::new(resource.trim())
            .map_err(|e| TemplateError::new(text, e.to_string()))?;
        let attribute = attribute
            .trim()
            .parse::<AttributeName>()
            .map_err(|reason| TemplateError::new(text, reason))?;
        Ok(Self::new(resource, attribute))
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

impl FromStr for AttributeRef {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_id_rejects_dots_and_empty() {
        assert!(ResourceId::new("sg-db").is_ok());
        assert!(ResourceId::new("app_server_2").is_ok());
        assert!(matches!(
            ResourceId::new("db.primary"),
            Err(CatalogError::InvalidResourceId(_))
        ));
        assert!(ResourceId::new("").is_err());
    }

    #[test]
    fn attribute_aliases_parse() {
        assert_eq!("privateAddress".parse(), Ok(AttributeName::PrivateAddress));
        assert_eq!("private_ip".parse(), Ok(AttributeName::PrivateAddress));
        assert_eq!("public_address".parse(), Ok(AttributeName::PublicAddress));
        assert!("hostname".parse::<AttributeName>().is_err());
    }

    #[test]
    fn attribute_ref_roundtrips_canonical_form() {
        let r = AttributeRef::parse(" db.privateAddress ").unwrap();
        assert_eq!(r.resource.as_str(), "db");
        assert_eq!(r.attribute, AttributeName::PrivateAddress);
        assert_eq!(r.to_string(), "db.private_address");
    }

    #[test]
    fn kind_exposure() {
        assert!(ResourceKind::NetworkRuleSet.exposes(AttributeName::Id));
        assert!(!ResourceKind::NetworkRuleSet.exposes(AttributeName::PrivateAddress));
        assert!(ResourceKind::ComputeInstance.exposes(AttributeName::PublicAddress));
    }
}
