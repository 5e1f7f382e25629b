//! CUDA execution provider (feature `cuda`). Grounded on the teacher's
//! `CUDABackend` (`cudarc`-backed PTX kernels compiled from
//! `cuda::kernels::ELEMENTWISE_KERNELS`); trimmed to the elementwise forward
//! ops `{Relu, Sigmoid, Add}` — training kernels are a non-goal, and `Conv`/
//! `MaxPool` are left to the CPU provider rather than forcing a
//! variadic-argument launch path onto a handful of kernels. `Tensor` storage
//! is always host-resident bytes (§9 "cross-device copy via host staging"),
//! so every launch here stages operand bytes onto the device, runs the
//! kernel, and stages the result back; there is no persistent on-device
//! tensor representation.

mod kernels;

use super::{Device, ExecutionContext, ExecutionProvider};
use crate::errors::{GPError, GPResult};
use crate::graph::{Graph, Node, ValueId};
use crate::operator::{Attributes, Operator};
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};
use cudarc::driver::{CudaDevice as RawCudaDevice, LaunchAsync, LaunchConfig};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const MODULE: &str = "gran_prix_elementwise";
const FUNCS: &[&str] = &["relu_kernel", "sigmoid_kernel", "add_kernel"];

pub struct CudaDevice {
    index: u32,
    raw: Arc<RawCudaDevice>,
}

impl fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudaDevice").field("index", &self.index).finish()
    }
}

impl CudaDevice {
    pub fn new(index: u32) -> GPResult<Self> {
        let raw = RawCudaDevice::new(index as usize)
            .map_err(|e| GPError::DeviceError(format!("failed to initialize CUDA device {index}: {e:?}")))?;
        let ptx = cudarc::nvrtc::compile_ptx(kernels::ELEMENTWISE_KERNELS)
            .map_err(|e| GPError::DeviceError(format!("NVRTC compilation failed: {e:?}")))?;
        raw.load_ptx(ptx, MODULE, FUNCS)
            .map_err(|e| GPError::DeviceError(format!("failed to load PTX module: {e:?}")))?;
        Ok(Self { index, raw })
    }
}

impl Device for CudaDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Cuda(self.index)
    }

    fn copy_to_host(&self, tensor: &Tensor) -> GPResult<Vec<u8>> {
        tensor.with_bytes(|b| b.to_vec())
    }

    fn copy_from_host(&self, bytes: &[u8], shape: Shape, dtype: DataType) -> GPResult<Tensor> {
        let tensor = Tensor::tensor(shape, dtype, DeviceKind::Cuda(self.index))?;
        tensor.with_bytes_mut(|dst| dst.copy_from_slice(bytes))?;
        Ok(tensor)
    }

    fn synchronize(&self) -> GPResult<()> {
        self.raw
            .synchronize()
            .map_err(|e| GPError::DeviceError(format!("CUDA device synchronize failed: {e:?}")))
    }
}

fn func_name(op_type: &str) -> Option<&'static str> {
    Some(match op_type {
        "Relu" => "relu_kernel",
        "Sigmoid" => "sigmoid_kernel",
        "Add" => "add_kernel",
        _ => return None,
    })
}

#[derive(Debug)]
struct CudaKernel {
    op_name: &'static str,
}

impl Operator for CudaKernel {
    fn name(&self) -> &str {
        self.op_name
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        let expected = if self.op_name == "Add" { 2 } else { 1 };
        if inputs.len() != expected {
            return Err(GPError::InvalidArgument(format!("{} expects {expected} input(s)", self.op_name)));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, _inputs: &[&Tensor], _outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        // Dispatched by `CudaProvider::execute_node`, which owns the raw
        // device handle; this impl exists only so `create_kernel` returns a
        // well-typed `Operator` with the right name and shape rule.
        Err(GPError::NotImplemented(format!(
            "{} must be run through CudaProvider::execute_node",
            self.op_name
        )))
    }
}

#[derive(Debug)]
pub struct CudaProvider {
    device: Arc<CudaDevice>,
}

impl CudaProvider {
    pub fn new(index: u32) -> GPResult<Self> {
        Ok(Self { device: Arc::new(CudaDevice::new(index)?) })
    }
}

impl ExecutionProvider for CudaProvider {
    fn name(&self) -> &str {
        "cuda"
    }

    fn device_kind(&self) -> DeviceKind {
        DeviceKind::Cuda(self.device.index)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn device_count(&self) -> usize {
        1
    }

    fn get_device(&self, index: usize) -> GPResult<Arc<dyn Device>> {
        if index != 0 {
            return Err(GPError::NotFound(format!("cuda provider has no device index {index}")));
        }
        Ok(self.device.clone())
    }

    fn supports(&self, op_type: &str) -> bool {
        func_name(op_type).is_some()
    }

    fn create_kernel(&self, op_type: &str) -> GPResult<Box<dyn Operator>> {
        func_name(op_type).ok_or_else(|| GPError::NotFound(format!("cuda provider has no kernel for '{op_type}'")))?;
        Ok(Box::new(CudaKernel { op_name: match op_type {
            "Relu" => "Relu",
            "Sigmoid" => "Sigmoid",
            "Add" => "Add",
            other => return Err(GPError::NotFound(format!("cuda provider has no kernel for '{other}'"))),
        }}))
    }

    fn optimize_graph(&self, graph: &mut Graph) -> GPResult<()> {
        let ids: Vec<_> = graph
            .nodes()
            .filter(|(_, n)| self.supports(&n.op_type))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            if let Some(node) = graph.node_mut(id) {
                node.device = Some(self.device_kind());
            }
        }
        Ok(())
    }

    fn prepare(&self, graph: &Graph) -> GPResult<HashMap<ValueId, Tensor>> {
        let mut allocations = HashMap::new();
        for (id, value) in graph.values() {
            if value.producer.is_none() || value.shape.is_dynamic() {
                continue;
            }
            let assigned_here = value
                .producer
                .and_then(|p| graph.node(p))
                .map(|n| n.device == Some(self.device_kind()))
                .unwrap_or(false);
            if assigned_here {
                allocations.insert(id, Tensor::tensor(value.shape.clone(), value.dtype, self.device_kind())?);
            }
        }
        Ok(allocations)
    }

    fn execute_node(&self, node: &Node, ctx: &ExecutionContext) -> GPResult<()> {
        let name = func_name(&node.op_type)
            .ok_or_else(|| GPError::NotFound(format!("cuda provider has no kernel for '{}'", node.op_type)))?;

        let inputs: Vec<&Tensor> = node
            .inputs
            .iter()
            .map(|id| {
                ctx.values
                    .get(id)
                    .ok_or_else(|| GPError::NotFound(format!("value {:?} not bound before executing node", id)))
            })
            .collect::<GPResult<_>>()?;
        let output = ctx
            .values
            .get(&node.outputs[0])
            .ok_or_else(|| GPError::NotFound(format!("output value {:?} was not pre-allocated", node.outputs[0])))?;
        let n = output.shape().element_count();

        let host_inputs: Vec<Vec<f32>> = inputs
            .iter()
            .map(|t| t.with_f32_slice(|s| s.to_vec()))
            .collect::<GPResult<_>>()?;
        let device_inputs: Vec<_> = host_inputs
            .iter()
            .map(|data| self.device.raw.htod_sync_copy(data))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GPError::DeviceError(format!("host-to-device copy failed: {e:?}")))?;

        let mut out_slice = self
            .device
            .raw
            .alloc_zeros::<f32>(n)
            .map_err(|e| GPError::OutOfMemory(format!("CUDA alloc of {n} floats failed: {e:?}")))?;
        let func = self
            .device
            .raw
            .get_func(MODULE, name)
            .ok_or_else(|| GPError::DeviceError(format!("kernel '{name}' not loaded")))?;
        let cfg = LaunchConfig::for_num_elems(n as u32);

        // SAFETY: `func` is one of `kernels::ELEMENTWISE_KERNELS`'s
        // `(float* out, const float* ... , int n)` signatures, matched here
        // argument-for-argument by arity.
        unsafe {
            match device_inputs.len() {
                1 => func.launch(cfg, (&mut out_slice, &device_inputs[0], n as i32)),
                2 => func.launch(cfg, (&mut out_slice, &device_inputs[0], &device_inputs[1], n as i32)),
                other => return Err(GPError::RuntimeError(format!("unsupported CUDA elementwise arity {other}"))),
            }
        }
        .map_err(|e| GPError::DeviceError(format!("kernel launch '{name}' failed: {e:?}")))?;

        let result = self
            .device
            .raw
            .dtoh_sync_copy(&out_slice)
            .map_err(|e| GPError::DeviceError(format!("device-to-host copy failed: {e:?}")))?;
        output.with_f32_slice_mut(|dst| dst.copy_from_slice(&result))
    }
}
