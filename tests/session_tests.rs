//! Session facade (§4.8): scenarios 1 and 5, byte-serialized model loading.

use gran_prix_runtime::config::Config;
use gran_prix_runtime::graph::{Node, Value};
use gran_prix_runtime::session::Session;
use gran_prix_runtime::{DataType, DeviceKind, Graph, Shape, Tensor};

fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> gran_prix_runtime::graph::ValueId {
    graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
}

fn matrix_tensor(rows: usize, cols: usize, data: &[f32]) -> Tensor {
    let t = Tensor::tensor(Shape::new(vec![rows, cols]), DataType::F32, DeviceKind::Cpu).unwrap();
    t.with_f32_slice_mut(|s| s.copy_from_slice(data)).unwrap();
    t
}

/// Scenario 1: `Add(x, x)` on a 2x3 input doubles every element.
#[test]
fn two_input_add_doubles_the_input() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![2, 3]);
    let y = f32_value(&mut graph, vec![2, 3]);
    graph.insert_node(Node::new("Add", vec![x, x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let mut session = Session::create(Config::default()).unwrap();
    session.load_model(graph).unwrap();

    let input = matrix_tensor(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let outputs = session.run(&[input]).unwrap();
    let out = session.get_output_tensor(0, &outputs).unwrap();
    out.with_f32_slice(|s| assert_eq!(s, &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0])).unwrap();
}

/// Scenario 5: an unregistered op-type passes `validate` (structural checks
/// only) but fails at `run` once the provider registry can't resolve it.
#[test]
fn unknown_op_type_fails_at_run_not_at_load() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Xyzzy", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let mut session = Session::create(Config::default()).unwrap();
    assert!(session.load_model(graph).is_ok());

    let input = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
    let err = session.run(&[input]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Xyzzy"), "error {message:?} should mention the unsupported op");
}

#[test]
fn load_model_from_bytes_round_trips_through_graph_serialization() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![2]);
    let y = f32_value(&mut graph, vec![2]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);
    let bytes = graph.serialize().unwrap();

    let mut session = Session::create(Config::default()).unwrap();
    session.load_model_from_bytes(&bytes).unwrap();

    let input = matrix_tensor(1, 2, &[-1.0, 3.0]).reshape(Shape::new(vec![2])).unwrap();
    let outputs = session.run(&[input]).unwrap();
    let out = session.get_output_tensor(0, &outputs).unwrap();
    out.with_f32_slice(|s| assert_eq!(s, &[0.0, 3.0])).unwrap();
}

#[test]
fn load_model_from_path_reports_not_implemented() {
    let mut session = Session::create(Config::default()).unwrap();
    let err = session.load_model_from_path("model.onnx").unwrap_err();
    assert!(matches!(err, gran_prix_runtime::GPError::NotImplemented(_)));
}

#[test]
fn run_rejects_wrong_input_arity() {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![2]);
    let y = f32_value(&mut graph, vec![2]);
    graph.insert_node(Node::new("Relu", vec![x], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);

    let mut session = Session::create(Config::default()).unwrap();
    session.load_model(graph).unwrap();
    let err = session.run(&[]).unwrap_err();
    assert!(matches!(err, gran_prix_runtime::GPError::InvalidArgument(_)));
}
