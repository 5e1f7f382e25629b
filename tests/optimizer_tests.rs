//! Optimizer pipeline (§4.6): P5 constant folding, P6 fusion, scenario 2
//! (MatMul+Add fuse), scenario 6 (dead-code elimination).

use gran_prix_runtime::config::{Config, SchedulerKind};
use gran_prix_runtime::graph::optimizer::OptimizationLevel;
use gran_prix_runtime::graph::{Node, Value};
use gran_prix_runtime::session::Session;
use gran_prix_runtime::{DataType, DeviceKind, Graph, Shape, Tensor};

fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> gran_prix_runtime::graph::ValueId {
    graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
}

fn identity_3x3() -> Tensor {
    let t = Tensor::tensor(Shape::new(vec![3, 3]), DataType::F32, DeviceKind::Cpu).unwrap();
    t.with_f32_slice_mut(|s| {
        s.fill(0.0);
        s[0] = 1.0;
        s[4] = 1.0;
        s[8] = 1.0;
    })
    .unwrap();
    t
}

fn ones(len: usize) -> Tensor {
    let t = Tensor::tensor(Shape::new(vec![len]), DataType::F32, DeviceKind::Cpu).unwrap();
    t.with_f32_slice_mut(|s| s.fill(1.0)).unwrap();
    t
}

/// Scenario 2 / P6: `MatMul(A,B) -> Add(_, bias)` with `A=B=I3`,
/// `bias=[1,1,1]` produces `[[2,1,1],[1,2,1],[1,1,2]]` whether or not
/// fusion has run, since fusion must preserve semantics.
fn matmul_add_graph() -> Graph {
    let mut graph = Graph::new();
    let a = graph.insert_value(Value::new(Shape::new(vec![3, 3]), DataType::F32).with_constant(identity_3x3()));
    let b = graph.insert_value(Value::new(Shape::new(vec![3, 3]), DataType::F32).with_constant(identity_3x3()));
    let bias = graph.insert_value(Value::new(Shape::new(vec![3]), DataType::F32).with_constant(ones(3)));
    let mm = f32_value(&mut graph, vec![3, 3]);
    let out = f32_value(&mut graph, vec![3, 3]);
    graph.insert_node(Node::new("MatMul", vec![a, b], vec![mm]));
    graph.insert_node(Node::new("Add", vec![mm, bias], vec![out]));
    graph.set_inputs(vec![]);
    graph.set_outputs(vec![out]);
    graph
}

fn run_with_level(level: OptimizationLevel) -> Vec<f32> {
    let config = Config::builder().with_optimization_level(level).with_scheduler(SchedulerKind::Topological).build();
    let mut session = Session::create(config).unwrap();
    session.load_model(matmul_add_graph()).unwrap();
    let outputs = session.run(&[]).unwrap();
    let out_tensor = session.get_output_tensor(0, &outputs).unwrap();
    out_tensor.with_f32_slice(|s| s.to_vec()).unwrap()
}

#[test]
fn fusion_preserves_matmul_add_semantics() {
    let unfused = run_with_level(OptimizationLevel::Basic);
    let fused = run_with_level(OptimizationLevel::Extended);
    assert_eq!(unfused, vec![2.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0, 2.0]);
    assert_eq!(fused, unfused);
}

/// P5: folding `Add` of two constants yields the same value the
/// unfolded graph would compute at run time.
#[test]
fn constant_folding_matches_unfolded_execution() {
    use gran_prix_runtime::graph::optimizer::{ConstantFoldingPass, Pass};
    use gran_prix_runtime::graph::verifier::ShapeInferencePass;
    use gran_prix_runtime::operator::registry::OperatorRegistry;
    use std::sync::Arc;

    let registry = Arc::new(OperatorRegistry::with_builtins());
    let mut graph = Graph::new();
    let a = graph.insert_value(Value::new(Shape::new(vec![3]), DataType::F32).with_constant(ones(3)));
    let b = graph.insert_value(Value::new(Shape::new(vec![3]), DataType::F32).with_constant(ones(3)));
    let out = f32_value(&mut graph, vec![3]);
    graph.insert_node(Node::new("Add", vec![a, b], vec![out]));
    graph.set_inputs(vec![]);
    graph.set_outputs(vec![out]);

    ShapeInferencePass::new(&registry).run(&mut graph).unwrap();
    ConstantFoldingPass::new(registry).run(&mut graph).unwrap();

    let folded = graph.value(out).unwrap().constant.as_ref().unwrap();
    folded.with_f32_slice(|s| assert_eq!(s, &[2.0, 2.0, 2.0])).unwrap();
}

/// Scenario 6: three `Add` nodes, one whose output is unreferenced; DCE
/// must drop exactly that node and leave the declared outputs unchanged.
#[test]
fn dead_code_elimination_drops_one_unreferenced_add() {
    use gran_prix_runtime::graph::optimizer::{DeadCodeEliminationPass, Pass};

    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![2]);
    let y = f32_value(&mut graph, vec![2]);
    let live_a = f32_value(&mut graph, vec![2]);
    let live_b = f32_value(&mut graph, vec![2]);
    let dead = f32_value(&mut graph, vec![2]);
    graph.insert_node(Node::new("Add", vec![x, y], vec![live_a]));
    graph.insert_node(Node::new("Add", vec![live_a, y], vec![live_b]));
    graph.insert_node(Node::new("Add", vec![x, x], vec![dead]));
    graph.set_inputs(vec![x, y]);
    graph.set_outputs(vec![live_b]);

    let before_nodes = graph.nodes().count();
    let outputs_before = graph.outputs().to_vec();

    DeadCodeEliminationPass.run(&mut graph).unwrap();
    assert_eq!(graph.nodes().count(), before_nodes - 1);
    assert_eq!(graph.outputs(), outputs_before.as_slice());
}
