//! Shape inference pass (§4.6 mandatory pass 1).
//!
//! Grounded on the teacher's `graph::verifier::Verifier`, which walked nodes
//! in declaration order and built a side `NodeId -> Vec<usize>` shape map by
//! calling each op's `output_shape`. Generalized to the new Value-edge IR:
//! shapes are written directly onto each output `Value` in topological
//! order (rather than declaration order, since the IR no longer guarantees
//! inputs precede consumers positionally) and dynamic axes propagate
//! through `infer_output_shapes` instead of being rejected outright.
//! Structural invariant checking (connectivity, producer/consumer
//! agreement) moved to `Graph::validate`, which this pass does not repeat.

use super::optimizer::Pass;
use super::{Graph, NodeId};
use crate::errors::{GPError, GPResult};
use crate::operator::registry::OperatorRegistry;
use crate::types::Shape;

pub struct ShapeInferencePass<'r> {
    registry: &'r OperatorRegistry,
}

impl<'r> ShapeInferencePass<'r> {
    pub fn new(registry: &'r OperatorRegistry) -> Self {
        Self { registry }
    }

    pub fn run(&self, graph: &mut Graph) -> GPResult<()> {
        for nid in graph.topological_sort()? {
            self.infer_node(graph, nid)?;
        }
        Ok(())
    }

    fn infer_node(&self, graph: &mut Graph, nid: NodeId) -> GPResult<()> {
        let (op_type, output_ids, output_shapes) = {
            let node = graph
                .node(nid)
                .ok_or_else(|| GPError::NotFound(format!("node {:?}", nid)))?;
            let op_type = node.op_type.clone();
            let output_ids = node.outputs.clone();
            let input_shapes: Vec<Shape> = node
                .inputs
                .iter()
                .map(|&vid| {
                    graph
                        .value(vid)
                        .map(|v| v.shape.clone())
                        .ok_or_else(|| GPError::InvalidModel(format!("node {:?} references unknown value {:?}", nid, vid)))
                })
                .collect::<GPResult<_>>()?;
            let op = self.registry.create(&op_type)?;
            let output_shapes = op.infer_output_shapes(&input_shapes, &node.attributes)?;
            (op_type, output_ids, output_shapes)
        };

        if output_shapes.len() != output_ids.len() {
            return Err(GPError::InvalidModel(format!(
                "node {:?} ('{}') op returned {} output shape(s) for {} declared output(s)",
                nid,
                op_type,
                output_shapes.len(),
                output_ids.len()
            )));
        }

        for (vid, shape) in output_ids.into_iter().zip(output_shapes) {
            if let Some(value) = graph.value_mut(vid) {
                value.shape = shape;
            }
        }
        Ok(())
    }
}

impl<'r> Pass for ShapeInferencePass<'r> {
    fn name(&self) -> &str {
        "shape_inference"
    }

    fn run(&self, graph: &mut Graph) -> GPResult<()> {
        ShapeInferencePass::run(self, graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, Value};
    use crate::types::DataType;

    #[test]
    fn propagates_elementwise_shape_through_a_chain() {
        let registry = OperatorRegistry::with_builtins();
        let mut graph = Graph::new();
        let x = graph.insert_value(Value::new(Shape::new(vec![2, 3]), DataType::F32));
        let y = graph.insert_value(Value::new(Shape::new(vec![2, 3]), DataType::F32));
        let relu_out = graph.insert_value(Value::new(Shape::new(vec![0, 0]), DataType::F32));
        graph.insert_node(Node::new("Relu", vec![x], vec![y]));
        graph.insert_node(Node::new("Relu", vec![y], vec![relu_out]));
        graph.set_inputs(vec![x]);
        graph.set_outputs(vec![relu_out]);

        ShapeInferencePass::new(&registry).run(&mut graph).unwrap();
        assert_eq!(graph.value(relu_out).unwrap().shape.extents(), &[2, 3]);
    }
}
