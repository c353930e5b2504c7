use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use strata_kernel::error::{GraphError, ProvisionError};
use strata_kernel::graph::DependencyGraph;
use strata_kernel::provisioner::Provisioner;
use strata_test_utils::{generated_catalog, two_tier_catalog, ScriptedProvider};

/// Keep only edges pointing at an earlier resource, so the result is acyclic
fn backward(edges: &[(usize, usize)]) -> Vec<(usize, usize)> {
    edges.iter().copied().filter(|(d, p)| p < d).collect()
}

proptest! {
    #[test]
    fn prop_backward_references_are_acyclic(
        n in 1..16usize,
        edges in proptest::collection::vec((0..16usize, 0..16usize), 0..40)
    ) {
        let edges = backward(&edges);
        let catalog = generated_catalog(n, &edges);
        let graph = DependencyGraph::build(&catalog).unwrap();
        let batches = graph.batches();

        let position: HashMap<&str, usize> = batches
            .iter()
            .enumerate()
            .flat_map(|(i, batch)| batch.iter().map(move |id| (id.as_str(), i)))
            .collect();
        prop_assert_eq!(position.len(), n);

        for resource in catalog.resources() {
            let id = resource.id().as_str();
            let deps = graph.dependencies(id);
            prop_assert_eq!(position[id] == 0, deps.is_empty());
            for dep in deps {
                prop_assert!(position[dep.as_str()] < position[id]);
            }
        }
    }

    #[test]
    fn prop_closed_chain_is_rejected(
        len in 1..8usize,
        extra in proptest::collection::vec((0..8usize, 0..8usize), 0..10)
    ) {
        // r{i} reads r{i-1}, and r0 reads the last one
        let mut edges: Vec<(usize, usize)> = (1..len).map(|i| (i, i - 1)).collect();
        edges.push((0, len - 1));
        edges.extend(extra.into_iter().filter(|(d, p)| *d < len && *p < len));
        let catalog = generated_catalog(len, &edges);

        let err = DependencyGraph::build(&catalog).unwrap_err();
        let GraphError::CyclicDependency { path } = err else {
            panic!("expected a cycle, got {err:?}");
        };
        prop_assert!(path.len() >= 2);
        prop_assert_eq!(path.first(), path.last());
        for pair in path.windows(2) {
            let dependent = catalog.get(pair[0].as_str()).unwrap();
            prop_assert!(dependent.dependencies().contains(&pair[1]));
        }
    }
}

#[tokio::test]
async fn cycle_issues_no_provider_calls() {
    let catalog = generated_catalog(3, &[(0, 2), (1, 0), (2, 1)]);
    let provider = ScriptedProvider::new().into_arc();

    let err = Provisioner::new(provider.clone())
        .apply(&catalog)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "CyclicDependency");
    assert!(err.is_static());
    assert!(provider.calls().is_empty());
    match err {
        ProvisionError::Graph(GraphError::CyclicDependency { path }) => {
            let names: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
            assert_eq!(names, vec!["r0", "r2", "r1", "r0"]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn two_tier_batches() {
    let catalog = two_tier_catalog();
    let graph = DependencyGraph::build(&catalog).unwrap();

    let raw_batches = graph.batches();
    let batches: Vec<Vec<&str>> = raw_batches
        .iter()
        .map(|b| b.iter().map(|id| id.as_str()).collect())
        .collect();
    assert_eq!(batches, vec![vec!["sg-db", "db"], vec!["ms"]]);
    assert!(graph.contains_edge("ms", "db"));
    assert!(!graph.contains_edge("db", "sg-db"));
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn self_reference_is_a_cycle() {
    let catalog = generated_catalog(2, &[(1, 1)]);
    let err = DependencyGraph::build(&catalog).unwrap_err();
    assert_eq!(err.to_string(), "cyclic dependency: r1 -> r1");
}

#[tokio::test]
async fn plan_matches_scheduled_batches() {
    let catalog = strata_test_utils::three_branch_catalog();
    let plan = Provisioner::plan(&catalog).unwrap();

    let provider = Arc::new(ScriptedProvider::new());
    let report = Provisioner::new(provider)
        .run(&catalog)
        .await
        .unwrap();
    assert_eq!(report.batches, plan.batches);
}
