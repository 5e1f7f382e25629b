//! Graph IR invariants (§3): topological order, validate, unknown-op
//! handling.

use gran_prix_runtime::graph::{Node, Value};
use gran_prix_runtime::{DataType, Graph, Shape};

fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> gran_prix_runtime::graph::ValueId {
    graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
}

/// P1: every producer appears before its consumers in every topological
/// order the sort can return.
#[test]
fn topological_order_respects_producers() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let a = f32_value(&mut graph, vec![4]);
    let b = f32_value(&mut graph, vec![4]);
    let c = f32_value(&mut graph, vec![4]);
    let add = graph.insert_node(Node::new("Add", vec![a, b], vec![c]));
    let relu_a = graph.insert_node(Node::new("Relu", vec![x], vec![a]));
    let relu_b = graph.insert_node(Node::new("Relu", vec![x], vec![b]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![c]);

    let order = graph.topological_sort().unwrap();
    let position = |id: gran_prix_runtime::graph::NodeId| order.iter().position(|&n| n == id).unwrap();
    assert!(position(relu_a) < position(add));
    assert!(position(relu_b) < position(add));
}

#[test]
fn topological_sort_reports_a_cycle() {
    let mut graph = Graph::new();
    let a = f32_value(&mut graph, vec![2]);
    let b = f32_value(&mut graph, vec![2]);
    graph.insert_node(Node::new("Relu", vec![a], vec![b]));
    // Manually wire b back as an input to the same producing node to force
    // a cycle in the producer graph.
    if let Some(node) = graph.node_mut(gran_prix_runtime::graph::NodeId(0)) {
        node.inputs.push(b);
    }
    if let Some(value) = graph.value_mut(b) {
        value.consumers.push(gran_prix_runtime::graph::NodeId(0));
    }
    assert!(graph.topological_sort().is_err());
}

/// P8: validate accepts a well-formed graph and rejects a structurally
/// broken one.
#[test]
fn validate_accepts_a_well_formed_graph() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);
    assert!(graph.validate().is_ok());
}

#[test]
fn validate_rejects_a_producer_consumer_mismatch() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]));
    // Sever the link validate checks: y's producer no longer points back.
    if let Some(value) = graph.value_mut(y) {
        value.producer = None;
    }
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);
    assert!(graph.validate().is_err());
}

#[test]
fn validate_rejects_an_output_unreachable_from_any_input() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let orphan = f32_value(&mut graph, vec![4]);
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![orphan]);
    assert!(graph.validate().is_err());
}

/// Scenario 5: a node with an unregistered op-type still passes structural
/// validation; only the operator registry knows it cannot run.
#[test]
fn unknown_op_type_passes_validate_but_is_unsupported() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Xyzzy", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);
    assert!(graph.validate().is_ok());

    let registry = gran_prix_runtime::operator::registry::OperatorRegistry::with_builtins();
    let warnings = registry.warn_unknown_ops(&graph);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("Xyzzy"));
}

#[test]
fn graph_serialize_round_trips_structure() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![2, 3]);
    let y = f32_value(&mut graph, vec![2, 3]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]).named("relu0"));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let bytes = graph.serialize().unwrap();
    let back = Graph::deserialize(&bytes).unwrap();
    assert_eq!(back.inputs(), graph.inputs());
    assert_eq!(back.outputs(), graph.outputs());
    assert_eq!(back.nodes().count(), graph.nodes().count());
    let (_, node) = back.nodes().next().unwrap();
    assert_eq!(node.op_type, "Relu");
    assert_eq!(node.name.as_deref(), Some("relu0"));
}
