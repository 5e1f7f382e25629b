//! Name → factory registry for operators (§4.4, §6 `register_operator`).

use super::kernels;
use super::Operator;
use crate::errors::{GPError, GPResult};
use crate::graph::Graph;
use std::collections::HashMap;
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// Write-once at startup, read-only afterward (§5): no synchronization is
/// needed on lookup once construction finishes.
pub struct OperatorRegistry {
    factories: HashMap<String, Factory>,
}

impl OperatorRegistry {
    /// A registry pre-populated with the conformance op-set of §4.4.
    pub fn with_builtins() -> Self {
        let mut reg = Self { factories: HashMap::new() };
        kernels::register_builtins(&mut reg);
        reg
    }

    pub fn register(&mut self, op_type: impl Into<String>, factory: impl Fn() -> Box<dyn Operator> + Send + Sync + 'static) {
        self.factories.insert(op_type.into(), Arc::new(factory));
    }

    pub fn supports(&self, op_type: &str) -> bool {
        self.factories.contains_key(op_type)
    }

    pub fn create(&self, op_type: &str) -> GPResult<Box<dyn Operator>> {
        let factory = self
            .factories
            .get(op_type)
            .ok_or_else(|| GPError::NotFound(format!("no operator registered for op-type '{op_type}'")))?;
        Ok(factory())
    }

    /// Invariant 5 of §3 is advisory, not a structural graph property: an
    /// unknown op-type is reported as a warning string here rather than
    /// failing `Graph::validate`.
    pub fn warn_unknown_ops(&self, graph: &Graph) -> Vec<String> {
        graph
            .nodes()
            .filter(|(_, n)| !self.supports(&n.op_type))
            .map(|(id, n)| {
                format!(
                    "node {:?} ('{}') has op-type '{}' with no registered operator; it will fail if reached at execute time",
                    id,
                    n.name.as_deref().unwrap_or(""),
                    n.op_type
                )
            })
            .collect()
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_conformance_op_set() {
        let reg = OperatorRegistry::with_builtins();
        for op in [
            "Add", "Mul", "Sub", "Div", "MatMul", "Conv", "MaxPool", "AveragePool", "Relu",
            "Sigmoid", "Tanh", "GELU", "SiLU", "BatchNormalization", "LayerNormalization",
            "RMSNorm", "Reshape", "Transpose", "Concat", "Split", "Gather", "Slice",
            "Embedding", "Softmax", "FusedConvBNReLU", "FusedMatMulAdd",
        ] {
            assert!(reg.supports(op), "missing builtin operator '{op}'");
        }
        assert!(!reg.supports("NoSuchOp"));
    }
}
