//! Optimizer pass manager and the five mandatory passes (§4.6).
//!
//! Grounded on the teacher's `graph::optimizer::GraphOptimizer`, which ran a
//! single hand-coded pattern match (Add -> ReLU, replaced in place by index
//! into a `Vec<Node>`) behind a `println!`-logged `optimize(&mut Graph)`
//! free function. Generalized into a registrable `Pass` trait plus a
//! dependency-ordered `PassManager`, with the teacher's one fusion rule
//! becoming the first of four, alongside the constant-folding, dead-code
//! elimination, layout and subgraph-replacement passes the full pipeline
//! requires. Logging keeps the teacher's habit of naming what fired, now
//! through `tracing` instead of `println!`.

use super::verifier::ShapeInferencePass;
use super::{AttributeValue, Graph, NodeId, Value, ValueId};
use crate::errors::{GPError, GPResult};
use crate::operator::registry::OperatorRegistry;
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Graph optimization level, set on `Config` and consulted by
/// `Session::initialize` to pick which pipeline `default_pipeline` builds
/// (§4.8, §6 `graph_optimization_level`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OptimizationLevel {
    None,
    Basic,
    #[default]
    Extended,
    All,
}

/// A named, dependency-ordered graph rewrite (§4.6). `run` mutates the graph
/// in place; passes marked `is_repeatable` are re-invoked by the
/// `PassManager` until the graph stops changing or a bound is hit.
pub trait Pass: Send + Sync {
    fn name(&self) -> &str;
    fn dependencies(&self) -> &[&str] {
        &[]
    }
    fn is_repeatable(&self) -> bool {
        false
    }
    fn run(&self, graph: &mut Graph) -> GPResult<()>;
}

const FIXED_POINT_BOUND: usize = 10;

/// Dependency-respecting pass pipeline. Passes run in an order satisfying
/// every registered `dependencies()` edge, ties broken by registration
/// order (stable topological sort, mirroring `Graph::topological_sort`'s
/// `BinaryHeap<Reverse<usize>>` idiom).
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    pub fn register(mut self, pass: Box<dyn Pass>) -> Self {
        self.passes.push(pass);
        self
    }

    fn ordered_indices(&self) -> GPResult<Vec<usize>> {
        let index_of: HashMap<&str, usize> = self.passes.iter().enumerate().map(|(i, p)| (p.name(), i)).collect();
        let mut in_degree = vec![0usize; self.passes.len()];
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.passes.len()];
        for (i, pass) in self.passes.iter().enumerate() {
            for dep in pass.dependencies() {
                if let Some(&dep_i) = index_of.get(dep) {
                    in_degree[i] += 1;
                    adjacency[dep_i].push(i);
                }
            }
        }

        let mut remaining = in_degree.clone();
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.passes.len());
        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &succ in &adjacency[i] {
                remaining[succ] -= 1;
                if remaining[succ] == 0 {
                    ready.push(Reverse(succ));
                }
            }
        }
        if order.len() != self.passes.len() {
            return Err(GPError::InvalidModel("optimizer pass dependency graph has a cycle".into()));
        }
        Ok(order)
    }

    pub fn run(&self, graph: &mut Graph) -> GPResult<()> {
        for i in self.ordered_indices()? {
            let pass = &self.passes[i];
            if pass.is_repeatable() {
                let mut prev = graph.serialize()?;
                for iteration in 0..FIXED_POINT_BOUND {
                    pass.run(graph)?;
                    let cur = graph.serialize()?;
                    if cur == prev {
                        debug!(pass = pass.name(), iterations = iteration + 1, "reached fixed point");
                        break;
                    }
                    prev = cur;
                }
            } else {
                pass.run(graph)?;
            }
            debug!(pass = pass.name(), "optimizer pass completed");
        }
        Ok(())
    }

    /// The pipeline run by `Session::initialize` at a given optimization
    /// level (§4.8 step 3). `None` skips the pipeline entirely; each
    /// higher level is a strict superset of the passes below it.
    pub fn default_pipeline(level: OptimizationLevel, registry: Arc<OperatorRegistry>) -> Self {
        let mut manager = Self::new().register(Box::new(OwnedShapeInferencePass::new(registry.clone())));
        if level == OptimizationLevel::None {
            return manager;
        }
        manager = manager
            .register(Box::new(ConstantFoldingPass::new(registry)))
            .register(Box::new(DeadCodeEliminationPass));
        if level == OptimizationLevel::Basic {
            return manager;
        }
        manager = manager.register(Box::new(OperatorFusionPass));
        if level == OptimizationLevel::Extended {
            return manager;
        }
        manager
            .register(Box::new(LayoutOptimizationPass))
            .register(Box::new(SubgraphReplacementPass::new(Vec::new())))
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `ShapeInferencePass` borrows its registry (§graph::verifier); the
/// pipeline needs an owned, `'static` pass object instead, so this wraps it
/// behind an `Arc`.
struct OwnedShapeInferencePass {
    registry: Arc<OperatorRegistry>,
}

impl OwnedShapeInferencePass {
    fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }
}

impl Pass for OwnedShapeInferencePass {
    fn name(&self) -> &str {
        "shape_inference"
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        ShapeInferencePass::new(&self.registry).run(graph)
    }
}

/// Constant folding (§4.6 mandatory pass 2): when every input of a node
/// carries a constant tensor, run the kernel once on a CPU context and
/// replace the node with an initializer holding the result.
pub struct ConstantFoldingPass {
    registry: Arc<OperatorRegistry>,
}

impl ConstantFoldingPass {
    pub fn new(registry: Arc<OperatorRegistry>) -> Self {
        Self { registry }
    }

    fn try_fold(&self, graph: &mut Graph, nid: NodeId) -> GPResult<bool> {
        let plan = {
            let node = match graph.node(nid) {
                Some(n) => n,
                None => return Ok(false),
            };
            if node.outputs.len() != 1 || node.inputs.is_empty() {
                return Ok(false);
            }
            let all_const = node
                .inputs
                .iter()
                .all(|&vid| graph.value(vid).map(|v| v.constant.is_some()).unwrap_or(false));
            if !all_const {
                return Ok(false);
            }
            let out_vid = node.outputs[0];
            let out_value = graph
                .value(out_vid)
                .ok_or_else(|| GPError::InvalidModel(format!("node {:?} output {:?} missing", nid, out_vid)))?;
            if out_value.shape.is_dynamic() {
                return Ok(false);
            }
            (node.op_type.clone(), node.inputs.clone(), out_vid, out_value.shape.clone(), out_value.dtype)
        };
        let (op_type, input_ids, out_vid, out_shape, out_dtype) = plan;

        let output_tensor = {
            let input_tensors: Vec<&Tensor> = input_ids
                .iter()
                .map(|&vid| {
                    graph
                        .value(vid)
                        .and_then(|v| v.constant.as_ref())
                        .ok_or_else(|| GPError::InvalidModel(format!("constant-folding input {:?} lost its constant", vid)))
                })
                .collect::<GPResult<_>>()?;
            let node = graph.node(nid).ok_or_else(|| GPError::NotFound(format!("node {:?}", nid)))?;
            let op = self.registry.create(&op_type)?;
            op.validate_inputs(&input_tensors, &node.attributes)?;
            let output_tensor = Tensor::tensor(out_shape, out_dtype, DeviceKind::Cpu)?;
            op.execute(&input_tensors, &[&output_tensor], &node.attributes)?;
            output_tensor
        };

        graph.remove_node(nid)?;
        if let Some(v) = graph.value_mut(out_vid) {
            v.constant = Some(output_tensor);
            v.producer = None;
        }
        Ok(true)
    }
}

impl Pass for ConstantFoldingPass {
    fn name(&self) -> &str {
        "constant_folding"
    }

    fn dependencies(&self) -> &[&str] {
        &["shape_inference"]
    }

    fn is_repeatable(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        let order = graph.topological_sort()?;
        let mut folded = 0usize;
        for nid in order {
            if self.try_fold(graph, nid)? {
                folded += 1;
            }
        }
        if folded > 0 {
            debug!(folded, "constant folding replaced nodes with initializers");
        }
        Ok(())
    }
}

fn backward_reachable_from_outputs(graph: &Graph) -> HashSet<usize> {
    let mut visited = HashSet::new();
    let mut queue: Vec<NodeId> = Vec::new();
    for &out in graph.outputs() {
        if let Some(value) = graph.value(out) {
            if let Some(pid) = value.producer {
                if visited.insert(pid.0) {
                    queue.push(pid);
                }
            }
        }
    }
    while let Some(nid) = queue.pop() {
        if let Some(node) = graph.node(nid) {
            for &inp in &node.inputs {
                if let Some(v) = graph.value(inp) {
                    if let Some(pid) = v.producer {
                        if visited.insert(pid.0) {
                            queue.push(pid);
                        }
                    }
                }
            }
        }
    }
    visited
}

/// Dead-code elimination (§4.6 mandatory pass 3): drop nodes not reachable
/// backward from a graph output, then drop orphaned values (no producer, no
/// consumer, not an initializer, not a graph boundary value).
pub struct DeadCodeEliminationPass;

impl Pass for DeadCodeEliminationPass {
    fn name(&self) -> &str {
        "dead_code_elimination"
    }

    fn dependencies(&self) -> &[&str] {
        &["shape_inference"]
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        let reachable = backward_reachable_from_outputs(graph);
        let dead_nodes: Vec<NodeId> = graph.nodes().filter(|(id, _)| !reachable.contains(&id.0)).map(|(id, _)| id).collect();
        for id in &dead_nodes {
            graph.remove_node(*id)?;
        }

        let graph_inputs: HashSet<usize> = graph.inputs().iter().map(|v| v.0).collect();
        let graph_outputs: HashSet<usize> = graph.outputs().iter().map(|v| v.0).collect();
        let dead_values: Vec<ValueId> = graph
            .values()
            .filter(|(vid, v)| {
                v.producer.is_none()
                    && v.consumers.is_empty()
                    && v.constant.is_none()
                    && !graph_inputs.contains(&vid.0)
                    && !graph_outputs.contains(&vid.0)
            })
            .map(|(vid, _)| vid)
            .collect();
        for vid in &dead_values {
            graph.remove_value(*vid)?;
        }

        if !dead_nodes.is_empty() || !dead_values.is_empty() {
            debug!(nodes = dead_nodes.len(), values = dead_values.len(), "dead code eliminated");
        }
        Ok(())
    }
}

fn synth_constant_vector(len: usize, value: f32) -> GPResult<Tensor> {
    let tensor = Tensor::tensor(Shape::new(vec![len]), DataType::F32, DeviceKind::Cpu)?;
    tensor.with_f32_slice_mut(|s| s.fill(value))?;
    Ok(tensor)
}

fn find_conv_bn_relu(graph: &Graph) -> Option<(NodeId, NodeId, NodeId)> {
    for (relu_id, relu) in graph.nodes() {
        if relu.op_type != "Relu" || relu.inputs.len() != 1 {
            continue;
        }
        let Some(bn_val) = graph.value(relu.inputs[0]) else { continue };
        if bn_val.consumers.len() != 1 {
            continue;
        }
        let Some(bn_id) = bn_val.producer else { continue };
        let Some(bn) = graph.node(bn_id) else { continue };
        if bn.op_type != "BatchNormalization" || bn.inputs.len() != 5 {
            continue;
        }
        let Some(conv_val) = graph.value(bn.inputs[0]) else { continue };
        if conv_val.consumers.len() != 1 {
            continue;
        }
        let Some(conv_id) = conv_val.producer else { continue };
        let Some(conv) = graph.node(conv_id) else { continue };
        if conv.op_type != "Conv" {
            continue;
        }
        return Some((conv_id, bn_id, relu_id));
    }
    None
}

fn find_matmul_add(graph: &Graph) -> Option<(NodeId, NodeId)> {
    for (add_id, add) in graph.nodes() {
        if add.op_type != "Add" || add.inputs.len() != 2 {
            continue;
        }
        for &candidate in &[add.inputs[0], add.inputs[1]] {
            let Some(val) = graph.value(candidate) else { continue };
            if val.consumers.len() != 1 {
                continue;
            }
            let Some(mm_id) = val.producer else { continue };
            let Some(mm) = graph.node(mm_id) else { continue };
            if mm.op_type == "MatMul" {
                return Some((mm_id, add_id));
            }
        }
    }
    None
}

fn find_conv_relu(graph: &Graph) -> Option<(NodeId, NodeId)> {
    for (relu_id, relu) in graph.nodes() {
        if relu.op_type != "Relu" || relu.inputs.len() != 1 {
            continue;
        }
        let Some(conv_val) = graph.value(relu.inputs[0]) else { continue };
        if conv_val.consumers.len() != 1 {
            continue;
        }
        let Some(conv_id) = conv_val.producer else { continue };
        let Some(conv) = graph.node(conv_id) else { continue };
        if conv.op_type != "Conv" {
            continue;
        }
        return Some((conv_id, relu_id));
    }
    None
}

fn find_bn_relu(graph: &Graph) -> Option<(NodeId, NodeId)> {
    for (relu_id, relu) in graph.nodes() {
        if relu.op_type != "Relu" || relu.inputs.len() != 1 {
            continue;
        }
        let Some(bn_val) = graph.value(relu.inputs[0]) else { continue };
        if bn_val.consumers.len() != 1 {
            continue;
        }
        let Some(bn_id) = bn_val.producer else { continue };
        let Some(bn) = graph.node(bn_id) else { continue };
        if bn.op_type != "BatchNormalization" {
            continue;
        }
        return Some((bn_id, relu_id));
    }
    None
}

fn fuse_conv_bn_relu(graph: &mut Graph, conv_id: NodeId, bn_id: NodeId, relu_id: NodeId) -> GPResult<()> {
    let bn_inputs = graph.node(bn_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", bn_id)))?.inputs.clone();
    let epsilon = graph
        .node(bn_id)
        .and_then(|n| n.attributes.get("epsilon"))
        .and_then(|v| v.as_float())
        .unwrap_or(1e-5);
    let relu_out = graph.node(relu_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", relu_id)))?.outputs[0];
    let conv_out = graph.node(conv_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", conv_id)))?.outputs[0];
    let bn_out = graph.node(bn_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", bn_id)))?.outputs[0];

    graph.remove_node(relu_id)?;
    graph.remove_node(bn_id)?;

    let (scale, bias, mean, var) = (bn_inputs[1], bn_inputs[2], bn_inputs[3], bn_inputs[4]);
    for &vid in &[scale, bias, mean, var] {
        if let Some(v) = graph.value_mut(vid) {
            v.consumers.push(conv_id);
        }
    }
    if let Some(conv) = graph.node_mut(conv_id) {
        conv.op_type = "FusedConvBNReLU".to_string();
        conv.inputs.extend_from_slice(&[scale, bias, mean, var]);
        conv.outputs[0] = relu_out;
        conv.attributes.insert("epsilon".to_string(), AttributeValue::Float(epsilon));
        conv.attributes.insert("fused_relu".to_string(), AttributeValue::Int(1));
    }
    if let Some(v) = graph.value_mut(relu_out) {
        v.producer = Some(conv_id);
    }
    graph.remove_value(conv_out)?;
    graph.remove_value(bn_out)?;
    Ok(())
}

fn fuse_matmul_add(graph: &mut Graph, matmul_id: NodeId, add_id: NodeId) -> GPResult<()> {
    let matmul_out = graph.node(matmul_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", matmul_id)))?.outputs[0];
    let add = graph.node(add_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", add_id)))?;
    let add_out = add.outputs[0];
    let bias = if add.inputs[0] == matmul_out { add.inputs[1] } else { add.inputs[0] };

    graph.remove_node(add_id)?;
    if let Some(v) = graph.value_mut(bias) {
        v.consumers.push(matmul_id);
    }
    if let Some(mm) = graph.node_mut(matmul_id) {
        mm.op_type = "FusedMatMulAdd".to_string();
        mm.inputs.push(bias);
        mm.outputs[0] = add_out;
    }
    if let Some(v) = graph.value_mut(add_out) {
        v.producer = Some(matmul_id);
    }
    graph.remove_value(matmul_out)?;
    Ok(())
}

fn fuse_conv_relu_identity_bn(graph: &mut Graph, conv_id: NodeId, relu_id: NodeId) -> GPResult<()> {
    let relu_out = graph.node(relu_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", relu_id)))?.outputs[0];
    let conv_out = graph.node(conv_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", conv_id)))?.outputs[0];
    let channels = graph
        .value(conv_out)
        .map(|v| v.shape.extents().get(1).copied().unwrap_or(1))
        .unwrap_or(1);

    let scale = graph.insert_value(Value::new(Shape::new(vec![channels]), DataType::F32).with_constant(synth_constant_vector(channels, 1.0)?));
    let bias = graph.insert_value(Value::new(Shape::new(vec![channels]), DataType::F32).with_constant(synth_constant_vector(channels, 0.0)?));
    let mean = graph.insert_value(Value::new(Shape::new(vec![channels]), DataType::F32).with_constant(synth_constant_vector(channels, 0.0)?));
    let var = graph.insert_value(Value::new(Shape::new(vec![channels]), DataType::F32).with_constant(synth_constant_vector(channels, 1.0)?));

    graph.remove_node(relu_id)?;
    for &vid in &[scale, bias, mean, var] {
        if let Some(v) = graph.value_mut(vid) {
            v.consumers.push(conv_id);
        }
    }
    if let Some(conv) = graph.node_mut(conv_id) {
        conv.op_type = "FusedConvBNReLU".to_string();
        conv.inputs.extend_from_slice(&[scale, bias, mean, var]);
        conv.outputs[0] = relu_out;
        conv.attributes.insert("epsilon".to_string(), AttributeValue::Float(1e-5));
        conv.attributes.insert("fused_relu".to_string(), AttributeValue::Int(1));
    }
    if let Some(v) = graph.value_mut(relu_out) {
        v.producer = Some(conv_id);
    }
    graph.remove_value(conv_out)?;
    Ok(())
}

fn fuse_bn_relu(graph: &mut Graph, bn_id: NodeId, relu_id: NodeId) -> GPResult<()> {
    let relu_out = graph.node(relu_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", relu_id)))?.outputs[0];
    let bn_out = graph.node(bn_id).ok_or_else(|| GPError::NotFound(format!("node {:?}", bn_id)))?.outputs[0];

    graph.remove_node(relu_id)?;
    if let Some(bn) = graph.node_mut(bn_id) {
        bn.attributes.insert("fused_relu".to_string(), AttributeValue::Int(1));
        bn.outputs[0] = relu_out;
    }
    if let Some(v) = graph.value_mut(relu_out) {
        v.producer = Some(bn_id);
    }
    graph.remove_value(bn_out)?;
    Ok(())
}

/// Operator fusion (§4.6 mandatory pass 4, four rules). Each `run` applies
/// every match it can find for rule 1 before moving to rule 2, and so on;
/// the `PassManager`'s fixed-point loop re-invokes `run` until a full sweep
/// finds nothing left to fuse.
pub struct OperatorFusionPass;

impl OperatorFusionPass {
    fn run_rule(&self, graph: &mut Graph, find: impl Fn(&Graph) -> Option<(NodeId, NodeId)>, apply: impl Fn(&mut Graph, NodeId, NodeId) -> GPResult<()>) -> GPResult<usize> {
        let mut fused = 0;
        while let Some((a, b)) = find(graph) {
            apply(graph, a, b)?;
            fused += 1;
        }
        Ok(fused)
    }
}

impl Pass for OperatorFusionPass {
    fn name(&self) -> &str {
        "operator_fusion"
    }

    fn dependencies(&self) -> &[&str] {
        &["shape_inference", "dead_code_elimination"]
    }

    fn is_repeatable(&self) -> bool {
        true
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        let mut total = 0usize;
        while let Some((conv, bn, relu)) = find_conv_bn_relu(graph) {
            fuse_conv_bn_relu(graph, conv, bn, relu)?;
            total += 1;
        }
        total += self.run_rule(graph, find_matmul_add, fuse_matmul_add)?;
        total += self.run_rule(graph, find_conv_relu, fuse_conv_relu_identity_bn)?;
        total += self.run_rule(graph, find_bn_relu, fuse_bn_relu)?;
        if total > 0 {
            debug!(fused = total, "operator fusion rewrote nodes");
        }
        Ok(())
    }
}

/// Memory layout optimization (§4.6 mandatory pass 5). This runtime's
/// kernels (`operator::kernels`) only ever compute in NCHW, so there is no
/// second layout to convert into; the pass is reduced to the one concrete,
/// provider-independent rewrite the spec names regardless of target
/// layout — eliding adjacent `Transpose` pairs whose permutations compose
/// to the identity. Decided and recorded as an open-question resolution.
pub struct LayoutOptimizationPass;

fn compose_is_identity(first: &[i64], second: &[i64]) -> bool {
    if first.len() != second.len() {
        return false;
    }
    let rank = first.len();
    // second applied after first: composed[i] = first[second[i]]
    let mut composed = vec![0i64; rank];
    for i in 0..rank {
        let s = second[i] as usize;
        if s >= rank {
            return false;
        }
        composed[i] = first[s];
    }
    composed.iter().enumerate().all(|(i, &v)| v as usize == i)
}

impl Pass for LayoutOptimizationPass {
    fn name(&self) -> &str {
        "layout_optimization"
    }

    fn dependencies(&self) -> &[&str] {
        &["shape_inference", "dead_code_elimination"]
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        loop {
            let elided = self.find_inverse_pair(graph);
            let Some((first_id, second_id, final_out, upstream_in)) = elided else { break };
            graph.remove_node(second_id)?;
            graph.remove_node(first_id)?;
            self.splice_consumers(graph, final_out, upstream_in)?;
        }
        Ok(())
    }
}

impl LayoutOptimizationPass {
    fn find_inverse_pair(&self, graph: &Graph) -> Option<(NodeId, NodeId, ValueId, ValueId)> {
        for (first_id, first) in graph.nodes() {
            if first.op_type != "Transpose" || first.outputs.len() != 1 {
                continue;
            }
            let first_out = first.outputs[0];
            let Some(first_val) = graph.value(first_out) else { continue };
            if first_val.consumers.len() != 1 {
                continue;
            }
            let second_id = first_val.consumers[0];
            let Some(second) = graph.node(second_id) else { continue };
            if second.op_type != "Transpose" {
                continue;
            }
            let (Some(p1), Some(p2)) = (
                first.attributes.get("perm").and_then(|v| v.as_ints()),
                second.attributes.get("perm").and_then(|v| v.as_ints()),
            ) else {
                continue;
            };
            if !compose_is_identity(p1, p2) {
                continue;
            }
            return Some((first_id, second_id, second.outputs[0], first.inputs[0]));
        }
        None
    }

    /// Rewires every consumer of `old_out` (the second transpose's output)
    /// to read `new_in` (the first transpose's input) instead, since the
    /// pair composed to identity.
    fn splice_consumers(&self, graph: &mut Graph, old_out: ValueId, new_in: ValueId) -> GPResult<()> {
        let consumers = graph.value(old_out).map(|v| v.consumers.clone()).unwrap_or_default();
        for cid in &consumers {
            if let Some(node) = graph.node_mut(*cid) {
                for inp in node.inputs.iter_mut() {
                    if *inp == old_out {
                        *inp = new_in;
                    }
                }
            }
        }
        if let Some(v) = graph.value_mut(new_in) {
            v.consumers.extend(consumers);
        }
        let is_graph_output = graph.outputs().contains(&old_out);
        if is_graph_output {
            let outputs: Vec<ValueId> = graph.outputs().iter().map(|&v| if v == old_out { new_in } else { v }).collect();
            graph.set_outputs(outputs);
        }
        graph.remove_value(old_out)?;
        Ok(())
    }
}

/// A user-registered subgraph rewrite: `matches` decides whether the
/// pattern rooted at `root` fires; `apply` performs the rewrite. Mirrors
/// the shape of `Pass` itself but scoped to a single node as the search
/// anchor (§4.6 "optional pattern-based rewriter").
pub struct SubgraphRule {
    pub name: String,
    pub matches: Box<dyn Fn(&Graph, NodeId) -> bool + Send + Sync>,
    pub apply: Box<dyn Fn(&mut Graph, NodeId) -> GPResult<()> + Send + Sync>,
}

/// Subgraph replacement (§4.6 mandatory pass 6, optional content). No rule
/// is registered by default; `default_pipeline` wires an empty rule set so
/// the hook always runs and a caller can extend it via
/// `Session`/`PassManager` before `load_model`.
pub struct SubgraphReplacementPass {
    rules: Vec<SubgraphRule>,
}

impl SubgraphReplacementPass {
    pub fn new(rules: Vec<SubgraphRule>) -> Self {
        Self { rules }
    }
}

impl Pass for SubgraphReplacementPass {
    fn name(&self) -> &str {
        "subgraph_replacement"
    }

    fn dependencies(&self) -> &[&str] {
        &["shape_inference", "dead_code_elimination"]
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        for rule in &self.rules {
            let ids: Vec<NodeId> = graph.nodes().map(|(id, _)| id).collect();
            for id in ids {
                if graph.node(id).is_some() && (rule.matches)(graph, id) {
                    (rule.apply)(graph, id)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    fn f32_value(graph: &mut Graph, extents: Vec<usize>) -> ValueId {
        graph.insert_value(Value::new(Shape::new(extents), DataType::F32))
    }

    #[test]
    fn constant_folding_replaces_add_of_two_constants() {
        let registry = Arc::new(OperatorRegistry::with_builtins());
        let mut graph = Graph::new();
        let a = graph.insert_value(Value::new(Shape::new(vec![2]), DataType::F32).with_constant(synth_constant_vector(2, 1.0).unwrap()));
        let b = graph.insert_value(Value::new(Shape::new(vec![2]), DataType::F32).with_constant(synth_constant_vector(2, 2.0).unwrap()));
        let out = f32_value(&mut graph, vec![2]);
        graph.insert_node(Node::new("Add", vec![a, b], vec![out]));
        graph.set_inputs(vec![]);
        graph.set_outputs(vec![out]);

        ShapeInferencePass::new(&registry).run(&mut graph).unwrap();
        ConstantFoldingPass::new(registry).run(&mut graph).unwrap();

        let value = graph.value(out).unwrap();
        assert!(value.producer.is_none());
        let folded = value.constant.as_ref().unwrap();
        folded.with_f32_slice(|s| assert_eq!(s, &[3.0, 3.0])).unwrap();
    }

    #[test]
    fn dead_code_elimination_drops_unreachable_branch() {
        let mut graph = Graph::new();
        let x = f32_value(&mut graph, vec![2]);
        let live = f32_value(&mut graph, vec![2]);
        let dead = f32_value(&mut graph, vec![2]);
        graph.insert_node(Node::new("Relu", vec![x], vec![live]));
        graph.insert_node(Node::new("Relu", vec![x], vec![dead]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![live]);

        DeadCodeEliminationPass.run(&mut graph).unwrap();

        assert!(graph.value(dead).is_none());
        assert!(graph.value(live).is_some());
    }

    #[test]
    fn fusion_rewrites_matmul_then_add_into_fused_matmul_add() {
        let registry = Arc::new(OperatorRegistry::with_builtins());
        let mut graph = Graph::new();
        let a = f32_value(&mut graph, vec![2, 2]);
        let b = f32_value(&mut graph, vec![2, 2]);
        let bias = f32_value(&mut graph, vec![2, 2]);
        let mm_out = f32_value(&mut graph, vec![2, 2]);
        let add_out = f32_value(&mut graph, vec![2, 2]);
        graph.insert_node(Node::new("MatMul", vec![a, b], vec![mm_out]));
        graph.insert_node(Node::new("Add", vec![mm_out, bias], vec![add_out]));
        graph.set_inputs(vec![a, b, bias]);
        graph.set_outputs(vec![add_out]);

        ShapeInferencePass::new(&registry).run(&mut graph).unwrap();
        OperatorFusionPass.run(&mut graph).unwrap();

        assert_eq!(graph.nodes().count(), 1);
        let (_, node) = graph.nodes().next().unwrap();
        assert_eq!(node.op_type, "FusedMatMulAdd");
        assert_eq!(node.inputs, vec![a, b, bias]);
    }

    #[test]
    fn pass_manager_orders_by_dependency_not_registration() {
        let registry = Arc::new(OperatorRegistry::with_builtins());
        let manager = PassManager::default_pipeline(OptimizationLevel::All, registry);
        // Should not error building the dependency order even though passes
        // were registered before their dependencies would otherwise imply.
        let mut graph = Graph::new();
        let x = f32_value(&mut graph, vec![2]);
        let y = f32_value(&mut graph, vec![2]);
        graph.insert_node(Node::new("Relu", vec![x], vec![y]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![y]);
        manager.run(&mut graph).unwrap();
    }
}
