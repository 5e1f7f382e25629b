//! CPU execution provider. Grounded on the teacher's `CPUBackend`
//! (`tracing::instrument`-decorated kernels, naive nested-loop conv/pool) —
//! the actual numeric kernels now live in `operator::kernels`, registered
//! once in the shared `OperatorRegistry` and reused here rather than
//! duplicated, since the CPU provider has no device-specific kernel need.

use super::{Device, ExecutionContext, ExecutionProvider};
use crate::errors::{GPError, GPResult};
use crate::graph::{Graph, Node, ValueId};
use crate::operator::Operator;
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CpuDevice;

impl Device for CpuDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn copy_to_host(&self, tensor: &Tensor) -> GPResult<Vec<u8>> {
        tensor.with_bytes(|b| b.to_vec())
    }

    fn copy_from_host(&self, bytes: &[u8], shape: Shape, dtype: DataType) -> GPResult<Tensor> {
        let tensor = Tensor::tensor(shape, dtype, DeviceKind::Cpu)?;
        tensor.with_bytes_mut(|dst| {
            if dst.len() != bytes.len() {
                return Err(GPError::InvalidArgument(format!(
                    "copy_from_host: expected {} bytes, got {}",
                    dst.len(),
                    bytes.len()
                )));
            }
            dst.copy_from_slice(bytes);
            Ok(())
        })?
    }

    fn synchronize(&self) -> GPResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct CpuProvider {
    registry: Arc<crate::operator::registry::OperatorRegistry>,
    device: Arc<CpuDevice>,
}

impl CpuProvider {
    pub fn new(registry: Arc<crate::operator::registry::OperatorRegistry>) -> Self {
        Self { registry, device: Arc::new(CpuDevice) }
    }
}

impl ExecutionProvider for CpuProvider {
    fn name(&self) -> &str {
        "cpu"
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn is_available(&self) -> bool {
        true
    }

    fn device_count(&self) -> usize {
        1
    }

    fn get_device(&self, index: usize) -> GPResult<Arc<dyn Device>> {
        if index != 0 {
            return Err(GPError::NotFound(format!("cpu provider has no device index {index}")));
        }
        Ok(self.device.clone())
    }

    fn supports(&self, op_type: &str) -> bool {
        self.registry.supports(op_type)
    }

    #[tracing::instrument(skip(self), name = "cpu_create_kernel")]
    fn create_kernel(&self, op_type: &str) -> GPResult<Box<dyn Operator>> {
        self.registry.create(op_type)
    }

    fn optimize_graph(&self, graph: &mut Graph) -> GPResult<()> {
        let ids: Vec<_> = graph.nodes().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(node) = graph.node_mut(id) {
                if node.device.is_none() {
                    node.device = Some(DeviceKind::Cpu);
                }
            }
        }
        Ok(())
    }

    /// Allocates nothing — CPU-resident values are materialized per run from
    /// the session's plan-driven buffer pool (`graph::buffer_pool`) instead.
    /// This still runs `compile_node` over every node so a missing kernel
    /// fails at load time rather than on first `run`.
    fn prepare(&self, graph: &Graph) -> GPResult<HashMap<ValueId, Tensor>> {
        for (_, node) in graph.nodes() {
            self.compile_node(node)?;
        }
        Ok(HashMap::new())
    }

    #[tracing::instrument(skip(self, ctx), name = "cpu_execute_node")]
    fn execute_node(&self, node: &Node, ctx: &ExecutionContext) -> GPResult<()> {
        let kernel = self.create_kernel(&node.op_type)?;

        let input_refs: Vec<&Tensor> = node
            .inputs
            .iter()
            .map(|id| {
                ctx.values
                    .get(id)
                    .ok_or_else(|| GPError::NotFound(format!("value {:?} not bound before executing node", id)))
            })
            .collect::<GPResult<_>>()?;

        let output_refs: Vec<&Tensor> = node
            .outputs
            .iter()
            .map(|id| {
                ctx.values
                    .get(id)
                    .ok_or_else(|| GPError::NotFound(format!("output value {:?} was not pre-allocated", id)))
            })
            .collect::<GPResult<_>>()?;

        kernel.validate_inputs(&input_refs, &node.attributes)?;
        kernel.execute(&input_refs, &output_refs, &node.attributes)
    }
}
