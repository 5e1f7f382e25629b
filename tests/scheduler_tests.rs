//! Execution schedulers (§4.7): P7 and pipeline/parallel sanity checks.

use gran_prix_runtime::config::{Config, SchedulerKind};
use gran_prix_runtime::graph::optimizer::OptimizationLevel;
use gran_prix_runtime::graph::{Node, Value};
use gran_prix_runtime::session::Session;
use gran_prix_runtime::{DataType, DeviceKind, Graph, Shape, Tensor};

fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> gran_prix_runtime::graph::ValueId {
    graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
}

/// Diamond graph: `x -> Relu -> a`, `x -> Relu -> b`, `Add(a,b) -> y`. Two
/// nodes are mutually independent, giving a parallel scheduler something
/// to actually overlap.
fn diamond_graph() -> Graph {
    let mut graph = Graph::new();
    let x = f32_value(&mut graph, vec![4]);
    let a = f32_value(&mut graph, vec![4]);
    let b = f32_value(&mut graph, vec![4]);
    let y = f32_value(&mut graph, vec![4]);
    graph.insert_node(Node::new("Relu", vec![x], vec![a]));
    graph.insert_node(Node::new("Relu", vec![x], vec![b]));
    graph.insert_node(Node::new("Add", vec![a, b], vec![y]));
    graph.set_inputs(vec![x]);
    graph.set_outputs(vec![y]);
    graph
}

fn input_tensor() -> Tensor {
    let t = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
    t.with_f32_slice_mut(|s| s.copy_from_slice(&[-1.0, 2.0, -3.0, 4.0])).unwrap();
    t
}

fn run_with_scheduler(scheduler: SchedulerKind) -> Vec<f32> {
    let config = Config::builder()
        .with_scheduler(scheduler)
        .with_optimization_level(OptimizationLevel::None)
        .build();
    let mut session = Session::create(config).unwrap();
    session.load_model(diamond_graph()).unwrap();
    let outputs = session.run(&[input_tensor()]).unwrap();
    let out = session.get_output_tensor(0, &outputs).unwrap();
    out.with_f32_slice(|s| s.to_vec()).unwrap()
}

/// P7: the parallel scheduler must agree with the topological scheduler
/// for a graph built entirely out of pure kernels.
#[test]
fn parallel_scheduler_matches_topological_for_pure_kernels() {
    let topo = run_with_scheduler(SchedulerKind::Topological);
    let parallel = run_with_scheduler(SchedulerKind::Parallel);
    assert_eq!(topo, vec![0.0, 4.0, 0.0, 8.0]);
    assert_eq!(parallel, topo);
}

#[test]
fn pipeline_scheduler_matches_topological() {
    let topo = run_with_scheduler(SchedulerKind::Topological);
    let pipelined = run_with_scheduler(SchedulerKind::Pipeline { stages: 2 });
    assert_eq!(pipelined, topo);
}

#[test]
fn topological_scheduler_execution_order_respects_producers() {
    use gran_prix_runtime::scheduler::{Scheduler, TopologicalScheduler};

    let graph = diamond_graph();
    let scheduler = TopologicalScheduler;
    let order = scheduler.execution_order(&graph).unwrap();
    assert_eq!(order.len(), 3);
    let add_pos = order.iter().position(|&n| graph.node(n).unwrap().op_type == "Add").unwrap();
    assert_eq!(add_pos, 2, "Add must be scheduled after both Relu producers");
}
