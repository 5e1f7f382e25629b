//! Execution Provider abstraction (§4.5).
//!
//! Grounded on the teacher's `backend::Backend` trait (`src/backend/mod.rs`,
//! a closed two-method-set trait covering matmul/conv/pool/elementwise) and
//! its two implementations, `CPUBackend` (rayon-backed `Zip::par_for_each`)
//! and `CUDABackend` (`cudarc`-backed PTX kernels). Generalized here into
//! the provider/device pair: a provider is a capability-queryable bundle of
//! kernel factories bound to a `Device`, rather than a fixed method set.

pub mod cpu;
pub mod registry;

#[cfg(feature = "cuda")]
pub mod cuda;

use crate::errors::GPResult;
use crate::graph::{Graph, Node, ValueId};
use crate::operator::Operator;
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Allocation, host↔device copy, synchronization and stream creation for a
/// single physical device. Cross-device tensor copy is expressed as
/// `CopyToHost` on the source device followed by `CopyFromHost` on the
/// destination (§9, "cross-device copy via host staging").
pub trait Device: Send + Sync + Debug {
    fn kind(&self) -> DeviceKind;

    /// Stage a tensor's bytes into a transient host buffer.
    fn copy_to_host(&self, tensor: &Tensor) -> GPResult<Vec<u8>>;

    /// Materialize a tensor on this device from host bytes.
    fn copy_from_host(&self, bytes: &[u8], shape: Shape, dtype: DataType) -> GPResult<Tensor>;

    /// Blocks until all work previously issued to this device has
    /// completed. A no-op for devices with no async queue.
    fn synchronize(&self) -> GPResult<()>;
}

/// Per-run state threaded through `execute_node`: the live value bindings
/// (inputs, allocated outputs, initializers) and the operator registry used
/// to resolve a node's kernel.
pub struct ExecutionContext<'a> {
    pub values: &'a HashMap<ValueId, Tensor>,
    pub registry: &'a crate::operator::registry::OperatorRegistry,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(values: &'a HashMap<ValueId, Tensor>, registry: &'a crate::operator::registry::OperatorRegistry) -> Self {
        Self { values, registry }
    }
}

/// A device-bound bundle of kernel factories, an allocator, and copy
/// primitives (§4.5). Providers are selected per-node by the scheduler
/// according to the user's preference order; CPU is always available as
/// the fallback.
pub trait ExecutionProvider: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn device_kind(&self) -> DeviceKind;
    fn is_available(&self) -> bool;
    fn device_count(&self) -> usize;
    fn get_device(&self, index: usize) -> GPResult<Arc<dyn Device>>;

    /// Static capability check, independent of any particular node.
    fn supports(&self, op_type: &str) -> bool;

    /// Kernel factory; may consult the global operator registry for a
    /// generic implementation or return a provider-specific one.
    fn create_kernel(&self, op_type: &str) -> GPResult<Box<dyn Operator>>;

    /// Provider-specific graph pass: assign all eligible nodes to this
    /// device, adjust layout annotations, etc. Mutates in place.
    fn optimize_graph(&self, graph: &mut Graph) -> GPResult<()>;

    /// Pre-execution validation for one node; may cache kernel selection.
    /// Default implementation just confirms a kernel can be created.
    fn compile_node(&self, node: &Node) -> GPResult<()> {
        self.create_kernel(&node.op_type).map(|_| ())
    }

    /// Allocates this provider's device-resident output tensors for the
    /// values whose producer is assigned to it, and validates that every
    /// node it is responsible for has a kernel. Called once per run (not
    /// cached across runs), so the returned bindings are always exclusively
    /// owned by the caller. CPU-resident values instead follow the
    /// session's plan-driven buffer pool and are not returned here.
    fn prepare(&self, graph: &Graph) -> GPResult<HashMap<ValueId, Tensor>>;

    /// Resolves the kernel for `node`, binds its input/output tensors from
    /// `ctx`, and runs it.
    fn execute_node(&self, node: &Node, ctx: &ExecutionContext) -> GPResult<()>;
}
