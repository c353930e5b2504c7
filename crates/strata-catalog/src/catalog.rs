//! Validated resource catalog
//!
//! Indexes resources in declaration order and checks every reference
//! before any provisioning begins. Construction is the only validation
//! point: a `Catalog` value always satisfies
//! - resource and output names are unique
//! - attached rule sets exist and are network rule sets
//! - placeholders name existing resources and attributes their kind exposes

use crate::declaration::{Declaration, ImageDecl, ResourceDecl};
use crate::error::CatalogError;
use crate::id::{AttributeName, AttributeRef, ResourceId, ResourceKind};
use crate::network::{NetworkRuleSet, PortRange, Rule};
use crate::template::Template;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Image lookup resolved by the provider at creation time
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageLookup {
    /// Accounts allowed to own the image
    #[serde(default)]
    pub owners: Vec<String>,
    /// Image name pattern (`*` wildcards)
    pub name: String,
    /// Pick the newest match
    #[serde(default = "default_most_recent")]
    pub most_recent: bool,
}

fn default_most_recent() -> bool {
    true
}

/// Machine image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageRef {
    /// Literal image id
    Id(String),
    /// Resolved through the provider
    Lookup(ImageLookup),
}

/// Virtual machine declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeInstance {
    /// Image to boot
    pub image: ImageRef,
    /// Instance size / type
    pub size: String,
    /// Attached network rule sets
    pub rule_sets: Vec<ResourceId>,
    /// Bootstrap script template
    pub bootstrap: Template,
    /// Provider tags
    pub tags: BTreeMap<String, String>,
}

/// Kind-specific static attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    /// Firewall rules
    NetworkRuleSet(NetworkRuleSet),
    /// Virtual machine
    ComputeInstance(ComputeInstance),
}

/// A declared resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    id: ResourceId,
    spec: ResourceSpec,
}

impl ResourceDescriptor {
    /// Create a descriptor
    #[must_use]
    pub fn new(id: ResourceId, spec: ResourceSpec) -> Self {
        Self { id, spec }
    }

    /// Resource name
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Static attributes
    #[inline]
    #[must_use]
    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Resource kind
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self.spec {
            ResourceSpec::NetworkRuleSet(_) => ResourceKind::NetworkRuleSet,
            ResourceSpec::ComputeInstance(_) => ResourceKind::ComputeInstance,
        }
    }

    /// Compute instance spec, if this is one
    #[must_use]
    pub fn as_instance(&self) -> Option<&ComputeInstance> {
        match &self.spec {
            ResourceSpec::ComputeInstance(instance) => Some(instance),
            ResourceSpec::NetworkRuleSet(_) => None,
        }
    }

    /// Attribute references that must resolve before creation
    ///
    /// Attached rule sets first, then template placeholders; deduplicated,
    /// in order of first appearance.
    #[must_use]
    pub fn references(&self) -> Vec<AttributeRef> {
        let mut refs: Vec<AttributeRef> = Vec::new();
        if let ResourceSpec::ComputeInstance(instance) = &self.spec {
            let attached = instance
                .rule_sets
                .iter()
                .map(|sg| AttributeRef::new(sg.clone(), AttributeName::Id));
            for r in attached.chain(instance.bootstrap.placeholders().cloned()) {
                if !refs.contains(&r) {
                    refs.push(r);
                }
            }
        }
        refs
    }

    /// Distinct resources this one depends on, in order of first reference
    #[must_use]
    pub fn dependencies(&self) -> Vec<ResourceId> {
        let mut deps: Vec<ResourceId> = Vec::new();
        for r in self.references() {
            if !deps.contains(&r.resource) {
                deps.push(r.resource);
            }
        }
        deps
    }
}

/// Named projection of a resolved attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Output {
    /// Output name
    pub name: String,
    /// Projected attribute
    pub value: AttributeRef,
    /// Free-form note
    pub description: Option<String>,
}

/// Validated, declaration-ordered set of resources and outputs
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    resources: IndexMap<ResourceId, ResourceDescriptor>,
    outputs: Vec<Output>,
}

impl Catalog {
    /// Validate and index resources and outputs
    ///
    /// # Errors
    /// The first `CatalogError` found, checking resources in declaration
    /// order and outputs last.
    pub fn new(resources: Vec<ResourceDescriptor>, outputs: Vec<Output>) -> Result<Self, CatalogError> {
        let mut index = IndexMap::with_capacity(resources.len());
        for resource in resources {
            if index.contains_key(resource.id()) {
                return Err(CatalogError::DuplicateResource(resource.id.clone()));
            }
            index.insert(resource.id.clone(), resource);
        }

        let catalog = Self {
            resources: index,
            outputs,
        };
        catalog.check_references()?;
        catalog.check_outputs()?;
        Ok(catalog)
    }

    /// Build from a parsed declaration document
    ///
    /// # Errors
    /// Any `CatalogError`, including placeholder and rule errors found
    /// while converting the document.
    pub fn from_declaration(decl: Declaration) -> Result<Self, CatalogError> {
        let resources = decl
            .resources
            .into_iter()
            .map(descriptor_from_decl)
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = decl
            .outputs
            .into_iter()
            .map(|o| {
                let owner = format!("output {}", o.name);
                let text = o.value.trim();
                let text = text
                    .strip_prefix("${")
                    .and_then(|t| t.strip_suffix('}'))
                    .unwrap_or(text);
                let value = AttributeRef::parse(text).map_err(|e| e.in_owner(owner))?;
                Ok(Output {
                    name: o.name,
                    value,
                    description: o.description,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;

        Self::new(resources, outputs)
    }

    /// Look up a resource by name
    #[inline]
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(id)
    }

    /// Declaration position of a resource
    #[must_use]
    pub fn position(&self, id: &str) -> Option<usize> {
        self.resources.get_index_of(id)
    }

    /// Resources in declaration order
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDescriptor> + '_ {
        self.resources.values()
    }

    /// Declared outputs in declaration order
    #[inline]
    #[must_use]
    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Number of resources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when no resource is declared
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn check_references(&self) -> Result<(), CatalogError> {
        for resource in self.resources.values() {
            let Some(instance) = resource.as_instance() else {
                continue;
            };
            let owner = resource.id().to_string();

            for sg in &instance.rule_sets {
                match self.get(sg.as_str()) {
                    Some(target) if target.kind() == ResourceKind::NetworkRuleSet => {}
                    _ => {
                        return Err(CatalogError::UnknownReference {
                            owner,
                            target: sg.to_string(),
                            expected: ResourceKind::NetworkRuleSet.label().to_string(),
                        })
                    }
                }
            }

            for placeholder in instance.bootstrap.placeholders() {
                self.check_attribute(&owner, placeholder)?;
            }
        }
        Ok(())
    }

    fn check_outputs(&self) -> Result<(), CatalogError> {
        let mut names: Vec<&str> = Vec::with_capacity(self.outputs.len());
        for output in &self.outputs {
            if names.contains(&output.name.as_str()) {
                return Err(CatalogError::DuplicateOutput(output.name.clone()));
            }
            names.push(&output.name);
            self.check_attribute(&format!("output {}", output.name), &output.value)?;
        }
        Ok(())
    }

    fn check_attribute(&self, owner: &str, reference: &AttributeRef) -> Result<(), CatalogError> {
        let target = self
            .get(reference.resource.as_str())
            .ok_or_else(|| CatalogError::UnknownReference {
                owner: owner.to_string(),
                target: reference.resource.to_string(),
                expected: "resource".to_string(),
            })?;

        if !target.kind().exposes(reference.attribute) {
            return Err(CatalogError::InvalidPlaceholder {
                owner: owner.to_string(),
                placeholder: reference.to_string(),
                reason: format!(
                    "a {} does not expose '{}'",
                    target.kind(),
                    reference.attribute
                ),
            });
        }
        Ok(())
    }
}

fn descriptor_from_decl(decl: ResourceDecl) -> Result<ResourceDescriptor, CatalogError> {
    match decl {
        ResourceDecl::NetworkRuleSet {
            name,
            description,
            ingress,
            egress,
        } => {
            let id = ResourceId::new(name)?;
            let convert = |rules: Vec<crate::declaration::RuleDecl>| -> Vec<Rule> {
                rules
                    .into_iter()
                    .map(|r| {
                        let ports = PortRange {
                            from: r.from_port,
                            to: r.to_port,
                        };
                        Rule::allow(r.protocol, ports, r.cidr_blocks).with_description(r.description)
                    })
                    .collect()
            };
            let rules = NetworkRuleSet::new(description, convert(ingress), convert(egress))
                .map_err(|reason| CatalogError::InvalidRule {
                    owner: id.clone(),
                    reason,
                })?;
            Ok(ResourceDescriptor::new(id, ResourceSpec::NetworkRuleSet(rules)))
        }
        ResourceDecl::ComputeInstance {
            name,
            image,
            size,
            rule_sets,
            bootstrap,
            tags,
        } => {
            let id = ResourceId::new(name)?;
            let bootstrap =
                Template::parse(&bootstrap).map_err(|e| e.in_owner(id.to_string()))?;
            let rule_sets = rule_sets
                .into_iter()
                .map(|sg| {
                    ResourceId::new(sg.clone()).map_err(|_| CatalogError::UnknownReference {
                        owner: id.to_string(),
                        target: sg,
                        expected: ResourceKind::NetworkRuleSet.label().to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let image = match image {
                ImageDecl::Id(image) => ImageRef::Id(image),
                ImageDecl::Lookup { lookup } => ImageRef::Lookup(lookup),
            };
            Ok(ResourceDescriptor::new(
                id,
                ResourceSpec::ComputeInstance(ComputeInstance {
                    image,
                    size,
                    rule_sets,
                    bootstrap,
                    tags,
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Protocol;
    use pretty_assertions::assert_eq;

    fn rule_set(name: &str) -> ResourceDescriptor {
        let rules = NetworkRuleSet::new(
            None,
            vec![Rule::allow(Protocol::Tcp, PortRange { from: 27017, to: 27017 }, ["0.0.0.0/0"])],
            vec![],
        )
        .unwrap();
        ResourceDescriptor::new(ResourceId::new(name).unwrap(), ResourceSpec::NetworkRuleSet(rules))
    }

    fn instance(name: &str, rule_sets: &[&str], bootstrap: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceId::new(name).unwrap(),
            ResourceSpec::ComputeInstance(ComputeInstance {
                image: ImageRef::Id("ami-0123".into()),
                size: "t2.micro".into(),
                rule_sets: rule_sets.iter().map(|s| ResourceId::new(*s).unwrap()).collect(),
                bootstrap: Template::parse(bootstrap).unwrap(),
                tags: BTreeMap::new(),
            }),
        )
    }

    #[test]
    fn indexes_in_declaration_order() {
        let catalog = Catalog::new(
            vec![
                rule_set("sg-db"),
                instance("db", &["sg-db"], "apt-get install -y mongodb"),
                instance("ms", &[], "DB=${db.private_address}"),
            ],
            vec![],
        )
        .unwrap();

        let names: Vec<&str> = catalog.resources().map(|r| r.id().as_str()).collect();
        assert_eq!(names, vec!["sg-db", "db", "ms"]);
        assert_eq!(catalog.position("ms"), Some(2));
        assert_eq!(catalog.get("db").unwrap().kind(), ResourceKind::ComputeInstance);
    }

    #[test]
    fn references_combine_rule_sets_and_placeholders() {
        let ms = instance("ms", &["sg-ms"], "${db.private_address} ${db.private_address} ${db.id}");
        let refs: Vec<String> = ms.references().iter().map(ToString::to_string).collect();
        assert_eq!(refs, vec!["sg-ms.id", "db.private_address", "db.id"]);

        let deps: Vec<String> = ms.dependencies().iter().map(ToString::to_string).collect();
        assert_eq!(deps, vec!["sg-ms", "db"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Catalog::new(vec![rule_set("a"), rule_set("a")], vec![]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateResource(_)));
    }

    #[test]
    fn unknown_rule_set_is_unknown_reference() {
        let err = Catalog::new(vec![instance("db", &["sg-missing"], "")], vec![]).unwrap_err();
        assert_eq!(err.kind(), "UnknownReference");
    }

    #[test]
    fn attaching_an_instance_as_rule_set_is_unknown_reference() {
        let err = Catalog::new(
            vec![instance("db", &[], ""), instance("ms", &["db"], "")],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownReference { ref target, .. } if target == "db"));
    }

    #[test]
    fn placeholder_to_missing_resource_is_unknown_reference() {
        let err = Catalog::new(
            vec![instance("db", &[], ""), instance("ms", &[], "${dbx.private_address}")],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CatalogError::UnknownReference { ref owner, ref target, .. } if owner == "ms" && target == "dbx"
        ));
    }

    #[test]
    fn placeholder_to_unexposed_attribute_is_invalid() {
        let err = Catalog::new(
            vec![rule_set("sg-db"), instance("ms", &[], "${sg-db.private_address}")],
            vec![],
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidPlaceholder");
    }

    #[test]
    fn outputs_are_checked() {
        let out = |name: &str, value: &str| Output {
            name: name.into(),
            value: AttributeRef::parse(value).unwrap(),
            description: None,
        };

        let ok = Catalog::new(vec![instance("db", &[], "")], vec![out("db_private_ip", "db.private_address")]);
        assert!(ok.is_ok());

        let missing = Catalog::new(vec![instance("db", &[], "")], vec![out("x", "dbx.id")]).unwrap_err();
        assert_eq!(missing.kind(), "UnknownReference");

        let dup = Catalog::new(
            vec![instance("db", &[], "")],
            vec![out("x", "db.id"), out("x", "db.private_address")],
        )
        .unwrap_err();
        assert!(matches!(dup, CatalogError::DuplicateOutput(_)));
    }
}
