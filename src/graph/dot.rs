//! DOT export for debugging (§4.3: "export to DOT for debugging").

use super::Graph;
use std::fmt::Write as _;

impl Graph {
    /// Renders the graph as a Graphviz DOT digraph: one node per op, one
    /// node per value, edges following producer → consumer dataflow.
    pub fn to_dot(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph gran_prix {{");
        let _ = writeln!(out, "  rankdir=LR;");

        for (id, node) in self.nodes() {
            let label = node
                .name
                .as_deref()
                .map(|n| format!("{} ({})", n, node.op_type))
                .unwrap_or_else(|| node.op_type.clone());
            let _ = writeln!(
                out,
                "  n{} [shape=box, label=\"{}\"];",
                id.0,
                escape(&label)
            );
        }

        for (id, value) in self.values() {
            let label = value
                .name
                .clone()
                .unwrap_or_else(|| format!("v{}", id.0));
            let shape = if value.is_initializer() { "ellipse" } else { "oval" };
            let _ = writeln!(
                out,
                "  v{} [shape={}, label=\"{} {:?}\"];",
                id.0,
                shape,
                escape(&label),
                value.shape.extents()
            );
            if let Some(producer) = value.producer {
                let _ = writeln!(out, "  n{} -> v{};", producer.0, id.0);
            }
            for consumer in &value.consumers {
                let _ = writeln!(out, "  v{} -> n{};", id.0, consumer.0);
            }
        }

        let _ = writeln!(out, "}}");
        out
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, Value};
    use crate::types::{DataType, Shape};

    #[test]
    fn dot_export_mentions_every_node_and_value() {
        let mut g = Graph::new();
        let a = g.insert_value(Value::new(Shape::new(vec![2]), DataType::F32).named("a"));
        let b = g.insert_value(Value::new(Shape::new(vec![2]), DataType::F32).named("b"));
        g.insert_node(Node::new("Relu", vec![a], vec![b]).named("relu0"));
        g.set_inputs(vec![a]);
        g.set_outputs(vec![b]);

        let dot = g.to_dot();
        assert!(dot.starts_with("digraph gran_prix"));
        assert!(dot.contains("relu0"));
        assert!(dot.contains("Relu"));
    }
}
