use std::collections::{BTreeSet, HashMap, HashSet};

use proptest::prelude::*;

use tessera::traversal::Identifier;
use tessera::{Database, SessionKind, Structure, TransactionOptions, TransactionType};

fn var(index: usize) -> Identifier {
    Identifier::variable(format!("v{index}"))
}

fn build(vertex_count: usize, edges: &[(usize, usize)]) -> Structure {
    let mut structure = Structure::new();
    let mut handles = Vec::with_capacity(vertex_count);
    for index in 0..vertex_count {
        handles.push(structure.thing_vertex(var(index)).expect("fresh identifier"));
    }
    for (from, to) in edges {
        structure.equal_edge(handles[*from], handles[*to]);
    }
    structure
}

/// Reference component labelling by union-find.
fn components(vertex_count: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut parent: Vec<usize> = (0..vertex_count).collect();
    fn find(parent: &mut Vec<usize>, mut v: usize) -> usize {
        while parent[v] != v {
            parent[v] = parent[parent[v]];
            v = parent[v];
        }
        v
    }
    for (from, to) in edges {
        let a = find(&mut parent, *from);
        let b = find(&mut parent, *to);
        parent[a] = b;
    }
    (0..vertex_count).map(|v| find(&mut parent, v)).collect()
}

fn arb_graph() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..10).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n, 0..n), 0..15),
        )
    })
}

proptest! {
    #[test]
    fn split_disjoint_is_a_partition((n, edges) in arb_graph()) {
        let structure = build(n, &edges);
        let parts = structure.split_disjoint(&[]);

        let total_vertices: usize = parts.iter().map(|p| p.vertices().len()).sum();
        let total_edges: usize = parts.iter().map(|p| p.edges().len()).sum();
        prop_assert_eq!(total_vertices, n);
        prop_assert_eq!(total_edges, edges.len());

        let mut seen = HashSet::new();
        for part in &parts {
            for vertex in part.vertices() {
                prop_assert!(seen.insert(vertex.id().clone()), "vertex in two outputs");
            }
        }

        // Each output is exactly one weakly-connected component.
        let labels = components(n, &edges);
        let mut groups: HashMap<usize, BTreeSet<Identifier>> = HashMap::new();
        for (vertex, label) in labels.iter().enumerate() {
            groups.entry(*label).or_default().insert(var(vertex));
        }
        prop_assert_eq!(parts.len(), groups.len());
        for part in &parts {
            let ids: BTreeSet<Identifier> =
                part.vertices().iter().map(|v| v.id().clone()).collect();
            prop_assert!(groups.values().any(|group| group == &ids));
        }
    }

    #[test]
    fn seeded_split_collapses_seed_components(
        (n, edges) in arb_graph(),
        raw_seeds in prop::collection::vec(0usize..10, 1..4),
    ) {
        let seeds: Vec<Identifier> = raw_seeds
            .iter()
            .filter(|seed| **seed < n)
            .map(|seed| var(*seed))
            .collect();
        prop_assume!(!seeds.is_empty());

        let structure = build(n, &edges);
        let parts = structure.split_disjoint(&seeds);

        let labels = components(n, &edges);
        let seed_labels: HashSet<usize> = raw_seeds
            .iter()
            .filter(|seed| **seed < n)
            .map(|seed| labels[*seed])
            .collect();

        // First output: the union of every component intersecting the seeds.
        let expected_first: BTreeSet<Identifier> = (0..n)
            .filter(|v| seed_labels.contains(&labels[*v]))
            .map(var)
            .collect();
        let first: BTreeSet<Identifier> =
            parts[0].vertices().iter().map(|v| v.id().clone()).collect();
        prop_assert_eq!(first, expected_first);

        // Remaining outputs are the untouched components.
        let other_labels: HashSet<usize> = labels
            .iter()
            .filter(|label| !seed_labels.contains(label))
            .copied()
            .collect();
        prop_assert_eq!(parts.len() - 1, other_labels.len());

        let total_vertices: usize = parts.iter().map(|p| p.vertices().len()).sum();
        prop_assert_eq!(total_vertices, n);
    }

    #[test]
    fn get_last_returns_the_greatest_key_with_prefix(
        keys in prop::collection::btree_set(
            prop::collection::vec(0u8..0xFE, 1..6),
            1..40,
        ),
        prefix in prop::collection::vec(0u8..0xFE, 1..3),
    ) {
        let db = Database::open("get_last_model").expect("open");
        let session = db.session(SessionKind::Data);
        let tx = session
            .transaction(TransactionType::Write, TransactionOptions::default())
            .expect("open tx");
        let storage = tx.storage().expect("open").clone();
        for key in &keys {
            storage.put(key, &[]).expect("buffered write");
        }
        let found = storage.get_last(&prefix).expect("get_last");
        let expected = keys
            .iter()
            .filter(|key| key.starts_with(&prefix))
            .max()
            .cloned();
        prop_assert_eq!(found, expected);
        tx.rollback().expect("rollback");
        tx.close();
    }
}
