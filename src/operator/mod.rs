//! Operator contract and registry (§4.4).
//!
//! New relative to the teacher, which dispatches via a `Box<dyn Operation>`
//! stored directly on the node rather than a name → factory registry; the
//! trait itself is grounded on the teacher's `Operation` (`graph::mod`):
//! `forward`/`output_shape` become `execute`/`infer_output_shapes`,
//! `backward` is dropped (training is a non-goal), and attributes replace
//! constructor fields so the registry can be keyed by op-type string alone.

pub mod kernels;
pub mod registry;

use crate::errors::GPResult;
use crate::graph::AttributeValue;
use crate::tensor::Tensor;
use crate::types::Shape;
use std::collections::HashMap;
use std::fmt::Debug;

pub type Attributes = HashMap<String, AttributeValue>;

/// An object satisfying the capabilities `{name, validate_inputs,
/// infer_output_shapes, execute}`. Attributes are read from the node's map
/// on every call rather than baked into the operator instance, so a single
/// factory closure can serve every node of a given op-type.
pub trait Operator: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Arity and dtype/rank constraints. Called against the real input
    /// tensors immediately before `execute`.
    fn validate_inputs(&self, inputs: &[&Tensor], attrs: &Attributes) -> GPResult<()>;

    /// Purely shape-level; must not allocate outputs. Operates on input
    /// *shapes* rather than materialized tensors, since shape inference
    /// runs before most intermediate values have been produced.
    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>>;

    /// Reads from `inputs`, writes into `outputs`, whose storage has
    /// already been allocated by the runtime to the shape
    /// `infer_output_shapes` returned.
    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()>;
}
