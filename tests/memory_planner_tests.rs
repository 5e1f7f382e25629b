//! Tensor-lifetime memory planner (§4.2): P2 and scenario 4.

use gran_prix_runtime::graph::memory_planner::MemoryPlanner;
use gran_prix_runtime::graph::{Node, Value};
use gran_prix_runtime::{DataType, Graph, Shape};

fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> gran_prix_runtime::graph::ValueId {
    graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
}

/// P2: any two values sharing a storage block have non-overlapping
/// lifetimes.
#[test]
fn values_sharing_a_block_never_overlap_in_lifetime() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let a = f32_value(&mut graph, vec![4]);
    let b = f32_value(&mut graph, vec![4]);
    let c = f32_value(&mut graph, vec![4]);
    let d = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Relu", vec![x], vec![a]));
    graph.insert_node(Node::new("Relu", vec![a], vec![b]));
    graph.insert_node(Node::new("Relu", vec![b], vec![c]));
    graph.insert_node(Node::new("Relu", vec![c], vec![d]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![d]);

    let plan = MemoryPlanner::plan(&graph).unwrap();
    for (&v1, &block1) in &plan.assignment {
        for (&v2, &block2) in &plan.assignment {
            if v1 == v2 || block1 != block2 {
                continue;
            }
            let i1 = plan.intervals[&v1];
            let i2 = plan.intervals[&v2];
            assert!(
                i1.death <= i2.birth || i2.death <= i1.birth,
                "values {:?} and {:?} share block {} but their lifetimes overlap",
                v1,
                v2,
                block1
            );
        }
    }
}

/// Scenario 4: `X -> Relu -> A -> Relu -> B -> Relu -> Y` must assign `A`
/// and `Y` to the same block (disjoint lifetimes, equal size) and report
/// peak bytes equal to twice a single value's footprint.
#[test]
fn lifetime_reuse_across_a_relu_chain() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![8]);
    let a = f32_value(&mut graph, vec![8]);
    let b = f32_value(&mut graph, vec![8]);
    let y = f32_value(&mut graph, vec![8]);
    graph.insert_node(Node::new("Relu", vec![x], vec![a]));
    graph.insert_node(Node::new("Relu", vec![a], vec![b]));
    graph.insert_node(Node::new("Relu", vec![b], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let plan = MemoryPlanner::plan(&graph).unwrap();
    assert_eq!(plan.block_of(a), plan.block_of(y));
    assert_ne!(plan.block_of(a), plan.block_of(b));

    let per_value_bytes = 8 * DataType::F32.size_bytes();
    assert_eq!(plan.peak_bytes(), 2 * per_value_bytes);
}

#[test]
fn graph_inputs_keep_their_own_storage_outside_the_plan() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let plan = MemoryPlanner::plan(&graph).unwrap();
    assert!(plan.block_of(x).is_none());
    assert!(plan.block_of(y).is_some());
}
