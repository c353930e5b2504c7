//! Resolved runtime attributes
//!
//! Append-only: each (resource, attribute) key is written once, when the
//! resource is realized, and never changes afterwards.

use crate::error::ProvisionError;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use strata_catalog::{AttributeLookup, AttributeName, AttributeRef, ResourceId};

/// Attributes the provider reported for one realized resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizedAttributes {
    values: Vec<(AttributeName, String)>,
}

impl RealizedAttributes {
    /// Rule set: provider id only
    #[must_use]
    pub fn rule_set(id: impl Into<String>) -> Self {
        Self {
            values: vec![(AttributeName::Id, id.into())],
        }
    }

    /// Compute instance: id and both addresses
    #[must_use]
    pub fn instance(
        id: impl Into<String>,
        private_address: impl Into<String>,
        public_address: impl Into<String>,
    ) -> Self {
        Self {
            values: vec![
                (AttributeName::Id, id.into()),
                (AttributeName::PrivateAddress, private_address.into()),
                (AttributeName::PublicAddress, public_address.into()),
            ],
        }
    }
}

/// Write-once map from (resource, attribute) to runtime value
#[derive(Debug, Clone, Default)]
pub struct ResolvedAttributeSet {
    values: HashMap<AttributeRef, String>,
}

impl ResolvedAttributeSet {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every attribute of a realized resource
    ///
    /// All-or-nothing: if any key is already present nothing is written.
    ///
    /// # Errors
    /// `ProvisionError::AttributeRewrite` for the first key already present.
    pub fn publish(
        &mut self,
        resource: &ResourceId,
        attributes: &RealizedAttributes,
    ) -> Result<(), ProvisionError> {
        let keyed: Vec<(AttributeRef, &String)> = attributes
            .values
            .iter()
            .map(|(name, value)| (AttributeRef::new(resource.clone(), *name), value))
            .collect();

        if let Some((key, _)) = keyed.iter().find(|(key, _)| self.values.contains_key(key)) {
            return Err(ProvisionError::AttributeRewrite(key.clone()));
        }
        for (key, value) in keyed {
            self.values.insert(key, value.clone());
        }
        Ok(())
    }

    /// Resolved value, if any
    #[must_use]
    pub fn get(&self, reference: &AttributeRef) -> Option<&str> {
        self.values.get(reference).map(String::as_str)
    }

    /// Number of resolved entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is resolved yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sorted `resource.attribute -> value` view
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

impl AttributeLookup for ResolvedAttributeSet {
    fn lookup(&self, reference: &AttributeRef) -> Option<&str> {
        self.get(reference)
    }
}

impl Serialize for ResolvedAttributeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_map().serialize(serializer)
    }
}
