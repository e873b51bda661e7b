use std::collections::BTreeSet;

use tessera::graph::EdgeKind;
use tessera::traversal::{
    Annotation, Identifier, Predicate, StructureEdgeVariant, TraversalCache, VertexProperties,
};
use tessera::{Result, Structure};

fn var(name: &str) -> Identifier {
    Identifier::variable(name)
}

fn query_graph() -> Result<Structure> {
    // match $p isa person, has name $n; ($p, $c) isa employment; $x = $x
    let mut structure = Structure::new();
    let p = structure.thing_vertex(var("p"))?;
    let n = structure.thing_vertex(var("n"))?;
    let c = structure.thing_vertex(var("c"))?;
    let person = structure.type_vertex(var("person_type"))?;
    let x = structure.thing_vertex(var("x"))?;

    structure.native_edge(p, person, EdgeKind::Isa, false, BTreeSet::new());
    structure.native_edge(p, n, EdgeKind::HasInstance, false, {
        let mut annotations = BTreeSet::new();
        annotations.insert(Annotation::Key);
        annotations
    });
    structure.role_player(
        c,
        p,
        ["employment:employee".to_string()].into_iter().collect(),
        0,
    );
    structure.equal_edge(x, x);
    Ok(structure)
}

#[test]
fn splitting_partitions_vertices_and_edges_exactly_once() -> Result<()> {
    let structure = query_graph()?;
    let parts = structure.split_disjoint(&[]);

    let total_vertices: usize = parts.iter().map(|p| p.vertices().len()).sum();
    let total_edges: usize = parts.iter().map(|p| p.edges().len()).sum();
    assert_eq!(total_vertices, structure.vertices().len());
    assert_eq!(total_edges, structure.edges().len());

    for vertex in structure.vertices() {
        let holders = parts
            .iter()
            .filter(|p| p.vertex(vertex.id()).is_some())
            .count();
        assert_eq!(holders, 1, "vertex {} in exactly one output", vertex.id());
    }
    // The self-equality loop travels with its vertex.
    let loop_part = parts
        .iter()
        .find(|p| p.vertex(&var("x")).is_some())
        .expect("loop component");
    assert_eq!(loop_part.vertices().len(), 1);
    assert_eq!(loop_part.edges().len(), 1);
    Ok(())
}

#[test]
fn seeded_split_collapses_reachable_components() -> Result<()> {
    let structure = query_graph()?;
    let parts = structure.split_disjoint(&[var("p"), var("x")]);
    assert_eq!(parts.len(), 1, "seeds cover both components");
    assert_eq!(parts[0].vertices().len(), structure.vertices().len());
    assert_eq!(parts[0].edges().len(), structure.edges().len());

    let parts = structure.split_disjoint(&[var("x")]);
    assert_eq!(parts.len(), 2);
    assert!(parts[0].vertex(&var("x")).is_some());
    assert!(parts[1].vertex(&var("p")).is_some());
    Ok(())
}

#[test]
fn edge_variants_survive_the_split() -> Result<()> {
    let structure = query_graph()?;
    let parts = structure.split_disjoint(&[]);
    let main = parts
        .iter()
        .find(|p| p.vertex(&var("p")).is_some())
        .expect("main component");

    let mut role_player_edges = 0;
    let mut keyed_native_edges = 0;
    for edge in main.edges() {
        match edge.variant() {
            StructureEdgeVariant::RolePlayer {
                role_types,
                repetition,
                ..
            } => {
                assert!(role_types.contains("employment:employee"));
                assert_eq!(*repetition, 0);
                role_player_edges += 1;
            }
            StructureEdgeVariant::Native { annotations, .. }
                if annotations.contains(&Annotation::Key) =>
            {
                keyed_native_edges += 1;
            }
            _ => {}
        }
    }
    assert_eq!(role_player_edges, 1);
    assert_eq!(keyed_native_edges, 1);
    Ok(())
}

#[test]
fn predicates_live_in_the_property_bag() -> Result<()> {
    let mut structure = Structure::new();
    let a = structure.thing_vertex(var("a"))?;
    let b = structure.thing_vertex(var("b"))?;
    structure.predicate_edge(a, b, Predicate::Gte);
    match structure
        .properties_mut(&var("a"))
        .expect("variable vertices have property bags")
    {
        VertexProperties::Thing(props) => props.predicates.push(Predicate::Gte),
        VertexProperties::Type(_) => panic!("thing vertex expected"),
    }
    let parts = structure.split_disjoint(&[]);
    assert_eq!(parts.len(), 1);
    match parts[0].properties(&var("a")).expect("copied bag") {
        VertexProperties::Thing(props) => assert_eq!(props.predicates, vec![Predicate::Gte]),
        VertexProperties::Type(_) => panic!("thing vertex expected"),
    }
    Ok(())
}

#[test]
fn traversal_cache_reuses_split_results() -> Result<()> {
    let structure = query_graph()?;
    let cache = TraversalCache::new(8);
    let first = cache.get_or_insert_with(42, || structure.split_disjoint(&[]));
    let second = cache.get_or_insert_with(42, || panic!("second lookup hits the cache"));
    assert_eq!(first.len(), second.len());
    assert_eq!(cache.len(), 1);
    Ok(())
}
