//! A thin builder over [`Graph`] for hand-assembling graphs in tests and
//! demos, mirroring the teacher's `GraphBuilder` (`val`/`param`/`matmul`/
//! `add`/`linear`/`relu`/`sigmoid`/`conv2d`/`max_pool2d`) but emitting the
//! op-type-string `Node`/`Value` pairs of the new IR instead of
//! `Box<dyn Operation>` nodes. Output shapes are supplied by the caller;
//! the shape-inference pass (`graph::optimizer`) is the source of truth
//! once a graph is handed to a session.

use crate::graph::{AttributeValue, Graph, Node, Value, ValueId};
use crate::tensor::Tensor;
use crate::types::{DataType, Shape};

pub struct GraphBuilder<'a> {
    graph: &'a mut Graph,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(graph: &'a mut Graph) -> Self {
        Self { graph }
    }

    /// Declares a graph input.
    pub fn val(&mut self, name: &str, shape: Shape, dtype: DataType) -> ValueId {
        let id = self.graph.insert_value(Value::new(shape, dtype).named(name));
        self.graph.push_input(id);
        id
    }

    /// Declares an initializer (a constant, e.g. trained weights).
    pub fn param(&mut self, name: &str, tensor: Tensor) -> ValueId {
        let shape = tensor.shape().clone();
        let dtype = tensor.dtype();
        self.graph
            .insert_value(Value::new(shape, dtype).named(name).with_constant(tensor))
    }

    fn shape_dtype_of(&self, id: ValueId) -> (Shape, DataType) {
        self.graph
            .value(id)
            .map(|v| (v.shape.clone(), v.dtype))
            .unwrap_or((Shape::scalar(), DataType::F32))
    }

    pub fn matmul(&mut self, a: ValueId, b: ValueId, out_shape: Shape) -> ValueId {
        let dtype = self.shape_dtype_of(a).1;
        let out = self.graph.insert_value(Value::new(out_shape, dtype));
        self.graph.insert_node(Node::new("MatMul", vec![a, b], vec![out]));
        out
    }

    pub fn add(&mut self, a: ValueId, b: ValueId) -> ValueId {
        let (shape, dtype) = self.shape_dtype_of(a);
        let out = self.graph.insert_value(Value::new(shape, dtype));
        self.graph.insert_node(Node::new("Add", vec![a, b], vec![out]));
        out
    }

    /// `XW + B`.
    pub fn linear(&mut self, x: ValueId, w: ValueId, b: ValueId, out_shape: Shape) -> ValueId {
        let xw = self.matmul(x, w, out_shape);
        self.add(xw, b)
    }

    pub fn relu(&mut self, x: ValueId) -> ValueId {
        let (shape, dtype) = self.shape_dtype_of(x);
        let out = self.graph.insert_value(Value::new(shape, dtype));
        self.graph.insert_node(Node::new("Relu", vec![x], vec![out]));
        out
    }

    pub fn sigmoid(&mut self, x: ValueId) -> ValueId {
        let (shape, dtype) = self.shape_dtype_of(x);
        let out = self.graph.insert_value(Value::new(shape, dtype));
        self.graph.insert_node(Node::new("Sigmoid", vec![x], vec![out]));
        out
    }

    pub fn conv2d(
        &mut self,
        input: ValueId,
        weight: ValueId,
        out_shape: Shape,
        stride: i64,
        padding: i64,
    ) -> ValueId {
        let dtype = self.shape_dtype_of(input).1;
        let out = self.graph.insert_value(Value::new(out_shape, dtype));
        let node = Node::new("Conv", vec![input, weight], vec![out])
            .with_attr("stride", AttributeValue::Int(stride))
            .with_attr("padding", AttributeValue::Int(padding));
        self.graph.insert_node(node);
        out
    }

    pub fn max_pool2d(
        &mut self,
        input: ValueId,
        out_shape: Shape,
        kernel_size: i64,
        stride: i64,
    ) -> ValueId {
        let dtype = self.shape_dtype_of(input).1;
        let out = self.graph.insert_value(Value::new(out_shape, dtype));
        let node = Node::new("MaxPool", vec![input], vec![out])
            .with_attr("kernel_size", AttributeValue::Int(kernel_size))
            .with_attr("stride", AttributeValue::Int(stride));
        self.graph.insert_node(node);
        out
    }

    pub fn output(&mut self, id: ValueId) {
        self.graph.push_output(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_linear_relu_graph() {
        let mut graph = Graph::new();
        let mut b = GraphBuilder::new(&mut graph);
        let x = b.val("x", Shape::new(vec![1, 4]), DataType::F32);
        let w = b.param(
            "w",
            Tensor::tensor(Shape::new(vec![4, 8]), DataType::F32, crate::types::DeviceKind::Cpu).unwrap(),
        );
        let bias = b.param(
            "b",
            Tensor::tensor(Shape::new(vec![1, 8]), DataType::F32, crate::types::DeviceKind::Cpu).unwrap(),
        );
        let y = b.linear(x, w, bias, Shape::new(vec![1, 8]));
        let y = b.relu(y);
        b.output(y);

        assert_eq!(graph.inputs().len(), 1);
        assert_eq!(graph.outputs().len(), 1);
        assert!(graph.validate().is_ok());
    }
}
