//! Dependency graph
//!
//! Edges point from a dependent to the resource it references. Nodes are
//! inserted in declaration order, so a node's index doubles as its
//! tie-break rank whenever two resources have no mutual dependency.

use crate::error::GraphError;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use strata_catalog::{Catalog, ResourceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Active,
    Done,
}

/// Acyclic creation-order graph derived from a catalog
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    inner: DiGraph<ResourceId, ()>,
    index: HashMap<ResourceId, NodeIndex>,
}

impl DependencyGraph {
    /// Derive the graph and reject cycles
    ///
    /// One edge per distinct resource a declaration references, through
    /// either an attached rule set or a template placeholder.
    ///
    /// # Errors
    /// `GraphError::CyclicDependency` naming the cycle path.
    pub fn build(catalog: &Catalog) -> Result<Self, GraphError> {
        let mut inner = DiGraph::with_capacity(catalog.len(), catalog.len());
        let mut index = HashMap::with_capacity(catalog.len());

        for resource in catalog.resources() {
            let node = inner.add_node(resource.id().clone());
            index.insert(resource.id().clone(), node);
        }

        for resource in catalog.resources() {
            let from = index[resource.id()];
            for dep in resource.dependencies() {
                let to = *index.get(&dep).ok_or_else(|| GraphError::DanglingReference {
                    from: resource.id().clone(),
                    to: dep.clone(),
                })?;
                inner.update_edge(from, to, ());
            }
        }

        let graph = Self { inner, index };
        graph.check_acyclic()?;
        tracing::debug!(
            nodes = graph.len(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        Ok(graph)
    }

    /// Number of resources
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.node_count()
    }

    /// True when the catalog was empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    /// Number of dependency edges
    #[inline]
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    /// Whether `dependent` directly references `dependency`
    #[must_use]
    pub fn contains_edge(&self, dependent: &str, dependency: &str) -> bool {
        match (self.index.get(dependent), self.index.get(dependency)) {
            (Some(&a), Some(&b)) => self.inner.contains_edge(a, b),
            _ => false,
        }
    }

    /// Direct dependencies in declaration order
    #[must_use]
    pub fn dependencies(&self, id: &str) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Direct dependents in declaration order
    #[must_use]
    pub fn dependents(&self, id: &str) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Every resource that depends on `id`, directly or not, in declaration order
    #[must_use]
    pub fn transitive_dependents(&self, id: &str) -> Vec<&ResourceId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.len()];
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            for next in self.inner.neighbors_directed(node, Direction::Incoming) {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    stack.push(next);
                }
            }
        }
        self.inner
            .node_indices()
            .filter(|n| seen[n.index()])
            .map(|n| &self.inner[n])
            .collect()
    }

    /// Static schedule: Kahn layers, declaration order inside each layer
    ///
    /// Batch 0 holds every resource without dependencies.
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<ResourceId>> {
        let mut remaining: Vec<usize> = self
            .inner
            .node_indices()
            .map(|n| self.inner.neighbors_directed(n, Direction::Outgoing).count())
            .collect();
        let mut placed = vec![false; self.len()];
        let mut batches = Vec::new();

        loop {
            let layer: Vec<NodeIndex> = self
                .inner
                .node_indices()
                .filter(|n| !placed[n.index()] && remaining[n.index()] == 0)
                .collect();
            if layer.is_empty() {
                break;
            }
            for &node in &layer {
                placed[node.index()] = true;
                for dependent in self.inner.neighbors_directed(node, Direction::Incoming) {
                    remaining[dependent.index()] -= 1;
                }
            }
            batches.push(layer.into_iter().map(|n| self.inner[n].clone()).collect());
        }
        batches
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&ResourceId> {
        let Some(&node) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.inner.neighbors_directed(node, direction).collect();
        found.sort_unstable();
        found.into_iter().map(|n| &self.inner[n]).collect()
    }

    /// Depth-first search tracking the active stack
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut marks = vec![Mark::Unvisited; self.len()];
        let mut stack = Vec::new();
        for node in self.inner.node_indices() {
            if marks[node.index()] == Mark::Unvisited {
                self.visit(node, &mut marks, &mut stack)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        node: NodeIndex,
        marks: &mut [Mark],
        stack: &mut Vec<NodeIndex>,
    ) -> Result<(), GraphError> {
        marks[node.index()] = Mark::Active;
        stack.push(node);

        let mut next: Vec<NodeIndex> = self.inner.neighbors_directed(node, Direction::Outgoing).collect();
        next.sort_unstable();

        for dep in next {
            match marks[dep.index()] {
                Mark::Done => {}
                Mark::Unvisited => self.visit(dep, marks, stack)?,
                Mark::Active => {
                    let start = stack.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut path: Vec<ResourceId> =
                        stack[start..].iter().map(|&n| self.inner[n].clone()).collect();
                    path.push(self.inner[dep].clone());
                    return Err(GraphError::CyclicDependency { path });
                }
            }
        }

        stack.pop();
        marks[node.index()] = Mark::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use strata_catalog::{
        ComputeInstance, ImageRef, NetworkRuleSet, ResourceDescriptor, ResourceSpec, Template,
    };

    fn sg(name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceId::new(name).unwrap(),
            ResourceSpec::NetworkRuleSet(NetworkRuleSet::default()),
        )
    }

    fn vm(name: &str, rule_sets: &[&str], bootstrap: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            ResourceId::new(name).unwrap(),
            ResourceSpec::ComputeInstance(ComputeInstance {
                image: ImageRef::Id("ami-1".into()),
                size: "t2.micro".into(),
                rule_sets: rule_sets.iter().map(|s| ResourceId::new(*s).unwrap()).collect(),
                bootstrap: Template::parse(bootstrap).unwrap(),
                tags: BTreeMap::new(),
            }),
        )
    }

    fn names(batch: &[ResourceId]) -> Vec<&str> {
        batch.iter().map(ResourceId::as_str).collect()
    }

    #[test]
    fn two_tier_batches() {
        let catalog = Catalog::new(
            vec![
                sg("sg-db"),
                sg("sg-ms"),
                vm("db", &["sg-db"], ""),
                vm("ms", &["sg-ms"], "${db.private_address}"),
            ],
            vec![],
        )
        .unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        let batches = graph.batches();

        assert_eq!(batches.len(), 3);
        assert_eq!(names(&batches[0]), vec!["sg-db", "sg-ms"]);
        assert_eq!(names(&batches[1]), vec!["db"]);
        assert_eq!(names(&batches[2]), vec!["ms"]);
        assert!(graph.contains_edge("ms", "db"));
        assert!(!graph.contains_edge("db", "ms"));
    }

    #[test]
    fn repeated_references_make_one_edge() {
        let catalog = Catalog::new(
            vec![vm("db", &[], ""), vm("ms", &[], "${db.private_address} ${db.id} ${db.public_address}")],
            vec![],
        )
        .unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn independent_resources_share_a_batch_in_declaration_order() {
        let catalog = Catalog::new(
            vec![vm("b", &[], ""), vm("a", &[], ""), vm("c", &[], "${b.id} ${a.id}")],
            vec![],
        )
        .unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        assert_eq!(names(&graph.batches()[0]), vec!["b", "a"]);
        let deps: Vec<&str> = graph.dependencies("c").into_iter().map(ResourceId::as_str).collect();
        assert_eq!(deps, vec!["b", "a"]);
    }

    #[test]
    fn reports_cycle_path() {
        let catalog = Catalog::new(
            vec![
                vm("a", &[], "${c.id}"),
                vm("b", &[], "${a.id}"),
                vm("c", &[], "${b.id}"),
            ],
            vec![],
        )
        .unwrap();
        let err = DependencyGraph::build(&catalog).unwrap_err();
        match err {
            GraphError::CyclicDependency { path } => {
                assert_eq!(names(&path), vec!["a", "c", "b", "a"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let catalog = Catalog::new(vec![vm("ms", &[], "${ms.public_address}")], vec![]).unwrap();
        let err = DependencyGraph::build(&catalog).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                path: vec![ResourceId::new("ms").unwrap(), ResourceId::new("ms").unwrap()]
            }
        );
    }

    #[test]
    fn transitive_dependents_follow_chains() {
        let catalog = Catalog::new(
            vec![
                vm("db", &[], ""),
                vm("api", &[], "${db.id}"),
                vm("web", &[], "${api.id}"),
                vm("other", &[], ""),
            ],
            vec![],
        )
        .unwrap();
        let graph = DependencyGraph::build(&catalog).unwrap();
        let downstream: Vec<&str> = graph
            .transitive_dependents("db")
            .into_iter()
            .map(ResourceId::as_str)
            .collect();
        assert_eq!(downstream, vec!["api", "web"]);
        assert!(graph.transitive_dependents("other").is_empty());
    }
}
