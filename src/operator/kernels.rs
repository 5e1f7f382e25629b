//! Concrete kernels for the conformance op-set of §4.4.
//!
//! Grounded on the teacher's concrete `Operation` impls (`MatMul`,
//! `Conv2D`, `MaxPool2D`, `Add`, `ReLUOp`, `SigmoidOp`, `Reshape` in
//! `graph/mod.rs`) and its `CPUBackend` (`backend/cpu.rs`, naive
//! nested-loop conv/pool, `ndarray::Zip::par_for_each`-style elementwise
//! sweeps). These are reference kernels: correct, readable, not
//! SIMD-tuned, matching the teacher's own "naive for now" style.

use super::registry::OperatorRegistry;
use super::{Attributes, Operator};
use crate::errors::{GPError, GPResult};
use crate::graph::AttributeValue;
use crate::tensor::Tensor;
use crate::types::{DataType, Shape};

pub fn register_builtins(reg: &mut OperatorRegistry) {
    reg.register("Add", || Box::new(BinaryOp::new(BinaryKind::Add)));
    reg.register("Mul", || Box::new(BinaryOp::new(BinaryKind::Mul)));
    reg.register("Sub", || Box::new(BinaryOp::new(BinaryKind::Sub)));
    reg.register("Div", || Box::new(BinaryOp::new(BinaryKind::Div)));
    reg.register("Relu", || Box::new(UnaryOp::new(UnaryKind::Relu)));
    reg.register("Sigmoid", || Box::new(UnaryOp::new(UnaryKind::Sigmoid)));
    reg.register("Tanh", || Box::new(UnaryOp::new(UnaryKind::Tanh)));
    reg.register("GELU", || Box::new(UnaryOp::new(UnaryKind::Gelu)));
    reg.register("SiLU", || Box::new(UnaryOp::new(UnaryKind::Silu)));
    reg.register("MatMul", || Box::new(MatMul));
    reg.register("Conv", || Box::new(Conv));
    reg.register("MaxPool", || Box::new(Pool::new(PoolKind::Max)));
    reg.register("AveragePool", || Box::new(Pool::new(PoolKind::Average)));
    reg.register("BatchNormalization", || Box::new(BatchNormalization));
    reg.register("LayerNormalization", || Box::new(LayerNormalization));
    reg.register("RMSNorm", || Box::new(RmsNorm));
    reg.register("Reshape", || Box::new(Reshape));
    reg.register("Transpose", || Box::new(Transpose));
    reg.register("Concat", || Box::new(Concat));
    reg.register("Split", || Box::new(Split));
    reg.register("Gather", || Box::new(Gather));
    reg.register("Slice", || Box::new(Slice));
    reg.register("Embedding", || Box::new(Embedding));
    reg.register("Softmax", || Box::new(Softmax));
    reg.register("FusedConvBNReLU", || Box::new(FusedConvBnRelu));
    reg.register("FusedMatMulAdd", || Box::new(FusedMatMulAdd));
}

// --- shared helpers -------------------------------------------------

fn read_f32(t: &Tensor) -> GPResult<Vec<f32>> {
    t.with_f32_slice(|s| s.to_vec())
}

fn write_f32(t: &Tensor, data: &[f32]) -> GPResult<()> {
    t.with_f32_slice_mut(|out| out.copy_from_slice(data))
}

fn attr_int(attrs: &Attributes, key: &str, default: i64) -> i64 {
    attrs.get(key).and_then(AttributeValue::as_int).unwrap_or(default)
}

fn attr_float(attrs: &Attributes, key: &str, default: f32) -> f32 {
    attrs.get(key).and_then(AttributeValue::as_float).unwrap_or(default)
}

fn attr_ints(attrs: &Attributes, key: &str) -> Option<Vec<i64>> {
    attrs.get(key).and_then(AttributeValue::as_ints).map(|s| s.to_vec())
}

fn require_arity(inputs_len: usize, expected: usize, op: &str) -> GPResult<()> {
    if inputs_len != expected {
        return Err(GPError::InvalidArgument(format!(
            "{op} expects {expected} input(s), got {inputs_len}"
        )));
    }
    Ok(())
}

fn strides_for(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> GPResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![1usize; rank];
    for i in 0..rank {
        let ad = a.len().checked_sub(rank - i).map(|idx| a[idx]).unwrap_or(1);
        let bd = b.len().checked_sub(rank - i).map(|idx| b[idx]).unwrap_or(1);
        out[i] = if ad == bd {
            ad
        } else if ad == 1 {
            bd
        } else if bd == 1 {
            ad
        } else {
            return Err(GPError::incompatible_shapes(a, b));
        };
    }
    Ok(out)
}

/// Per-output-axis element stride for `shape` broadcast up to `out_rank`;
/// `0` on any axis that is absent or of extent 1 in `shape`.
fn broadcast_strides(shape: &[usize], out_rank: usize) -> Vec<usize> {
    let own_strides = strides_for(shape);
    let mut out = vec![0usize; out_rank];
    for i in 0..out_rank {
        if let Some(idx) = shape.len().checked_sub(out_rank - i) {
            if shape[idx] != 1 {
                out[i] = own_strides[idx];
            }
        }
    }
    out
}

fn require_f32(shapes_or_tensors_dtype: DataType, op: &str) -> GPResult<()> {
    if shapes_or_tensors_dtype != DataType::F32 {
        return Err(GPError::NotImplemented(format!(
            "{op} is only implemented for F32 tensors, found {shapes_or_tensors_dtype}"
        )));
    }
    Ok(())
}

// --- elementwise binary ---------------------------------------------

#[derive(Debug, Clone, Copy)]
enum BinaryKind {
    Add,
    Mul,
    Sub,
    Div,
}

#[derive(Debug)]
struct BinaryOp {
    kind: BinaryKind,
}

impl BinaryOp {
    fn new(kind: BinaryKind) -> Self {
        Self { kind }
    }

    fn apply(&self, a: f32, b: f32) -> f32 {
        match self.kind {
            BinaryKind::Add => a + b,
            BinaryKind::Mul => a * b,
            BinaryKind::Sub => a - b,
            BinaryKind::Div => a / b,
        }
    }

    fn op_name(&self) -> &'static str {
        match self.kind {
            BinaryKind::Add => "Add",
            BinaryKind::Mul => "Mul",
            BinaryKind::Sub => "Sub",
            BinaryKind::Div => "Div",
        }
    }
}

impl Operator for BinaryOp {
    fn name(&self) -> &str {
        self.op_name()
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 2, self.op_name())?;
        require_f32(inputs[0].dtype(), self.op_name())?;
        if inputs[0].dtype() != inputs[1].dtype() {
            return Err(GPError::InvalidArgument(format!(
                "{} operands have mismatched dtypes",
                self.op_name()
            )));
        }
        broadcast_shape(inputs[0].shape().extents(), inputs[1].shape().extents())?;
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 2, self.op_name())?;
        let shape = broadcast_shape(input_shapes[0].extents(), input_shapes[1].extents())?;
        Ok(vec![Shape::new(shape)])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        let out_shape = outputs[0].shape().extents().to_vec();
        let rank = out_shape.len();
        let a_strides = broadcast_strides(inputs[0].shape().extents(), rank);
        let b_strides = broadcast_strides(inputs[1].shape().extents(), rank);
        let out_strides = strides_for(&out_shape);
        let total: usize = out_shape.iter().product();
        let a = read_f32(inputs[0])?;
        let b = read_f32(inputs[1])?;
        let mut result = vec![0f32; total];
        for flat in 0..total {
            let mut rem = flat;
            let mut a_off = 0usize;
            let mut b_off = 0usize;
            for axis in 0..rank {
                let stride = out_strides[axis].max(1);
                let coord = rem / stride;
                rem %= stride;
                a_off += coord * a_strides[axis];
                b_off += coord * b_strides[axis];
            }
            result[flat] = self.apply(a[a_off], b[b_off]);
        }
        write_f32(outputs[0], &result)
    }
}

// --- elementwise unary / activations ---------------------------------

#[derive(Debug, Clone, Copy)]
enum UnaryKind {
    Relu,
    Sigmoid,
    Tanh,
    Gelu,
    Silu,
}

#[derive(Debug)]
struct UnaryOp {
    kind: UnaryKind,
}

impl UnaryOp {
    fn new(kind: UnaryKind) -> Self {
        Self { kind }
    }

    fn apply(&self, x: f32) -> f32 {
        match self.kind {
            UnaryKind::Relu => x.max(0.0),
            UnaryKind::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryKind::Tanh => x.tanh(),
            UnaryKind::Gelu => {
                let c = (2.0f32 / std::f32::consts::PI).sqrt();
                0.5 * x * (1.0 + (c * (x + 0.044715 * x.powi(3))).tanh())
            }
            UnaryKind::Silu => x / (1.0 + (-x).exp()),
        }
    }

    fn op_name(&self) -> &'static str {
        match self.kind {
            UnaryKind::Relu => "Relu",
            UnaryKind::Sigmoid => "Sigmoid",
            UnaryKind::Tanh => "Tanh",
            UnaryKind::Gelu => "GELU",
            UnaryKind::Silu => "SiLU",
        }
    }
}

impl Operator for UnaryOp {
    fn name(&self) -> &str {
        self.op_name()
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, self.op_name())?;
        require_f32(inputs[0].dtype(), self.op_name())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, self.op_name())?;
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        let data = read_f32(inputs[0])?;
        let result: Vec<f32> = data.iter().map(|&v| self.apply(v)).collect();
        write_f32(outputs[0], &result)
    }
}

// --- MatMul ------------------------------------------------------------

#[derive(Debug)]
struct MatMul;

impl Operator for MatMul {
    fn name(&self) -> &str {
        "MatMul"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 2, "MatMul")?;
        require_f32(inputs[0].dtype(), "MatMul")?;
        if inputs[0].shape().rank() != 2 || inputs[1].shape().rank() != 2 {
            return Err(GPError::InvalidArgument("MatMul requires rank-2 tensors".into()));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 2, "MatMul")?;
        let a = input_shapes[0].extents();
        let b = input_shapes[1].extents();
        if a.len() != 2 || b.len() != 2 || a[1] != b[0] {
            return Err(GPError::incompatible_shapes(a, b));
        }
        Ok(vec![Shape::new(vec![a[0], b[1]])])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        matmul_into(inputs[0], inputs[1], outputs[0])
    }
}

fn matmul_into(a: &Tensor, b: &Tensor, out: &Tensor) -> GPResult<()> {
    let (m, k) = (a.shape().extents()[0], a.shape().extents()[1]);
    let n = b.shape().extents()[1];
    let a_data = read_f32(a)?;
    let b_data = read_f32(b)?;
    let mut result = vec![0f32; m * n];
    for i in 0..m {
        for p in 0..k {
            let av = a_data[i * k + p];
            if av == 0.0 {
                continue;
            }
            for j in 0..n {
                result[i * n + j] += av * b_data[p * n + j];
            }
        }
    }
    write_f32(out, &result)
}

// --- Conv / Pool (NCHW) ------------------------------------------------

#[derive(Debug)]
struct Conv;

fn conv_output_dims(h: usize, w: usize, kh: usize, kw: usize, stride: usize, padding: usize) -> (usize, usize) {
    let oh = (h + 2 * padding - kh) / stride + 1;
    let ow = (w + 2 * padding - kw) / stride + 1;
    (oh, ow)
}

fn conv2d_into(input: &Tensor, weight: &Tensor, out: &Tensor, stride: usize, padding: usize) -> GPResult<()> {
    let (n, ci, h, w) = {
        let e = input.shape().extents();
        (e[0], e[1], e[2], e[3])
    };
    let (co, _ci_w, kh, kw) = {
        let e = weight.shape().extents();
        (e[0], e[1], e[2], e[3])
    };
    let (oh, ow) = conv_output_dims(h, w, kh, kw, stride, padding);
    let input_data = read_f32(input)?;
    let weight_data = read_f32(weight)?;
    let mut result = vec![0f32; n * co * oh * ow];

    for ni in 0..n {
        for coi in 0..co {
            for hi in 0..oh {
                for wi in 0..ow {
                    let mut sum = 0.0f32;
                    for cii in 0..ci {
                        for khi in 0..kh {
                            for kwi in 0..kw {
                                let in_h = (hi * stride) as i64 + khi as i64 - padding as i64;
                                let in_w = (wi * stride) as i64 + kwi as i64 - padding as i64;
                                if in_h >= 0 && in_h < h as i64 && in_w >= 0 && in_w < w as i64 {
                                    let in_idx = ((ni * ci + cii) * h + in_h as usize) * w + in_w as usize;
                                    let w_idx = ((coi * ci + cii) * kh + khi) * kw + kwi;
                                    sum += input_data[in_idx] * weight_data[w_idx];
                                }
                            }
                        }
                    }
                    result[((ni * co + coi) * oh + hi) * ow + wi] = sum;
                }
            }
        }
    }
    write_f32(out, &result)
}

impl Operator for Conv {
    fn name(&self) -> &str {
        "Conv"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        if inputs.len() != 2 {
            return Err(GPError::InvalidArgument("Conv expects 2 inputs: {input, weight}".into()));
        }
        require_f32(inputs[0].dtype(), "Conv")?;
        if inputs[0].shape().rank() != 4 || inputs[1].shape().rank() != 4 {
            return Err(GPError::InvalidArgument("Conv requires rank-4 NCHW tensors".into()));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        if input_shapes.len() != 2 {
            return Err(GPError::InvalidArgument("Conv expects 2 input shapes".into()));
        }
        let i = input_shapes[0].extents();
        let w = input_shapes[1].extents();
        let stride = attr_int(attrs, "stride", 1) as usize;
        let padding = attr_int(attrs, "padding", 0) as usize;
        let (oh, ow) = conv_output_dims(i[2], i[3], w[2], w[3], stride.max(1), padding);
        Ok(vec![Shape::new(vec![i[0], w[0], oh, ow])])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let stride = (attr_int(attrs, "stride", 1) as usize).max(1);
        let padding = attr_int(attrs, "padding", 0) as usize;
        conv2d_into(inputs[0], inputs[1], outputs[0], stride, padding)
    }
}

#[derive(Debug, Clone, Copy)]
enum PoolKind {
    Max,
    Average,
}

#[derive(Debug)]
struct Pool {
    kind: PoolKind,
}

impl Pool {
    fn new(kind: PoolKind) -> Self {
        Self { kind }
    }

    fn op_name(&self) -> &'static str {
        match self.kind {
            PoolKind::Max => "MaxPool",
            PoolKind::Average => "AveragePool",
        }
    }
}

impl Operator for Pool {
    fn name(&self) -> &str {
        self.op_name()
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, self.op_name())?;
        require_f32(inputs[0].dtype(), self.op_name())?;
        if inputs[0].shape().rank() != 4 {
            return Err(GPError::InvalidArgument(format!("{} requires a rank-4 NCHW tensor", self.op_name())));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, self.op_name())?;
        let e = input_shapes[0].extents();
        let kernel_size = (attr_int(attrs, "kernel_size", 2) as usize).max(1);
        let stride = (attr_int(attrs, "stride", kernel_size as i64) as usize).max(1);
        let oh = (e[2] - kernel_size) / stride + 1;
        let ow = (e[3] - kernel_size) / stride + 1;
        Ok(vec![Shape::new(vec![e[0], e[1], oh, ow])])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let kernel_size = (attr_int(attrs, "kernel_size", 2) as usize).max(1);
        let stride = (attr_int(attrs, "stride", kernel_size as i64) as usize).max(1);
        let e = inputs[0].shape().extents().to_vec();
        let (n, c, h, w) = (e[0], e[1], e[2], e[3]);
        let oh = (h - kernel_size) / stride + 1;
        let ow = (w - kernel_size) / stride + 1;
        let data = read_f32(inputs[0])?;
        let mut result = vec![0f32; n * c * oh * ow];
        for ni in 0..n {
            for ci in 0..c {
                for hi in 0..oh {
                    for wi in 0..ow {
                        let mut acc = match self.kind {
                            PoolKind::Max => f32::NEG_INFINITY,
                            PoolKind::Average => 0.0,
                        };
                        for khi in 0..kernel_size {
                            for kwi in 0..kernel_size {
                                let idx = ((ni * c + ci) * h + hi * stride + khi) * w + wi * stride + kwi;
                                let v = data[idx];
                                acc = match self.kind {
                                    PoolKind::Max => acc.max(v),
                                    PoolKind::Average => acc + v,
                                };
                            }
                        }
                        if matches!(self.kind, PoolKind::Average) {
                            acc /= (kernel_size * kernel_size) as f32;
                        }
                        result[((ni * c + ci) * oh + hi) * ow + wi] = acc;
                    }
                }
            }
        }
        write_f32(outputs[0], &result)
    }
}

// --- Normalization -------------------------------------------------------

#[derive(Debug)]
struct BatchNormalization;

impl Operator for BatchNormalization {
    fn name(&self) -> &str {
        "BatchNormalization"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 5, "BatchNormalization")?;
        require_f32(inputs[0].dtype(), "BatchNormalization")?;
        if inputs[0].shape().rank() != 4 {
            return Err(GPError::InvalidArgument("BatchNormalization expects a rank-4 NCHW tensor".into()));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 5, "BatchNormalization")?;
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let eps = attr_float(attrs, "epsilon", 1e-5);
        let e = inputs[0].shape().extents().to_vec();
        let (n, c, h, w) = (e[0], e[1], e[2], e[3]);
        let x = read_f32(inputs[0])?;
        let scale = read_f32(inputs[1])?;
        let bias = read_f32(inputs[2])?;
        let mean = read_f32(inputs[3])?;
        let var = read_f32(inputs[4])?;
        let fused_relu = attr_int(attrs, "fused_relu", 0) != 0;

        let mut result = vec![0f32; x.len()];
        for ni in 0..n {
            for ci in 0..c {
                let inv_std = 1.0 / (var[ci] + eps).sqrt();
                for hi in 0..h {
                    for wi in 0..w {
                        let idx = ((ni * c + ci) * h + hi) * w + wi;
                        let mut v = (x[idx] - mean[ci]) * inv_std * scale[ci] + bias[ci];
                        if fused_relu {
                            v = v.max(0.0);
                        }
                        result[idx] = v;
                    }
                }
            }
        }
        write_f32(outputs[0], &result)
    }
}

#[derive(Debug)]
struct LayerNormalization;

impl Operator for LayerNormalization {
    fn name(&self) -> &str {
        "LayerNormalization"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 3, "LayerNormalization")?;
        require_f32(inputs[0].dtype(), "LayerNormalization")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 3, "LayerNormalization")?;
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let eps = attr_float(attrs, "epsilon", 1e-5);
        let shape = inputs[0].shape().extents().to_vec();
        let last = *shape.last().ok_or_else(|| GPError::InvalidArgument("LayerNormalization requires rank >= 1".into()))?;
        let rows = shape.iter().product::<usize>() / last;
        let x = read_f32(inputs[0])?;
        let scale = read_f32(inputs[1])?;
        let bias = read_f32(inputs[2])?;
        let mut result = vec![0f32; x.len()];
        for row in 0..rows {
            let base = row * last;
            let slice = &x[base..base + last];
            let mean = slice.iter().sum::<f32>() / last as f32;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / last as f32;
            let inv_std = 1.0 / (var + eps).sqrt();
            for i in 0..last {
                result[base + i] = (slice[i] - mean) * inv_std * scale[i] + bias[i];
            }
        }
        write_f32(outputs[0], &result)
    }
}

#[derive(Debug)]
struct RmsNorm;

impl Operator for RmsNorm {
    fn name(&self) -> &str {
        "RMSNorm"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 2, "RMSNorm")?;
        require_f32(inputs[0].dtype(), "RMSNorm")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 2, "RMSNorm")?;
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let eps = attr_float(attrs, "epsilon", 1e-6);
        let shape = inputs[0].shape().extents().to_vec();
        let last = *shape.last().ok_or_else(|| GPError::InvalidArgument("RMSNorm requires rank >= 1".into()))?;
        let rows = shape.iter().product::<usize>() / last;
        let x = read_f32(inputs[0])?;
        let scale = read_f32(inputs[1])?;
        let mut result = vec![0f32; x.len()];
        for row in 0..rows {
            let base = row * last;
            let slice = &x[base..base + last];
            let ms = slice.iter().map(|v| v * v).sum::<f32>() / last as f32;
            let inv_rms = 1.0 / (ms + eps).sqrt();
            for i in 0..last {
                result[base + i] = slice[i] * inv_rms * scale[i];
            }
        }
        write_f32(outputs[0], &result)
    }
}

// --- Shape ops ------------------------------------------------------------

#[derive(Debug)]
struct Reshape;

impl Operator for Reshape {
    fn name(&self) -> &str {
        "Reshape"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, "Reshape")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, "Reshape")?;
        let target = attr_ints(attrs, "shape")
            .ok_or_else(|| GPError::InvalidArgument("Reshape requires an integer-list 'shape' attribute".into()))?;
        let target: Vec<usize> = target.iter().map(|&d| d as usize).collect();
        let out_shape = Shape::new(target);
        if out_shape.element_count() != input_shapes[0].element_count() {
            return Err(GPError::incompatible_shapes(input_shapes[0].extents(), out_shape.extents()));
        }
        Ok(vec![out_shape])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        inputs[0].copy_to(outputs[0])
    }
}

#[derive(Debug)]
struct Transpose;

impl Operator for Transpose {
    fn name(&self) -> &str {
        "Transpose"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, "Transpose")?;
        require_f32(inputs[0].dtype(), "Transpose")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, "Transpose")?;
        let e = input_shapes[0].extents();
        let perm = resolve_perm(attrs, e.len());
        Ok(vec![Shape::new(perm.iter().map(|&p| e[p]).collect())])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let e = inputs[0].shape().extents().to_vec();
        let perm = resolve_perm(attrs, e.len());
        let in_strides = strides_for(&e);
        let out_shape: Vec<usize> = perm.iter().map(|&p| e[p]).collect();
        let out_strides = strides_for(&out_shape);
        let total: usize = out_shape.iter().product();
        let data = read_f32(inputs[0])?;
        let mut result = vec![0f32; total];
        let rank = e.len();
        for flat in 0..total {
            let mut rem = flat;
            let mut coords = vec![0usize; rank];
            for axis in 0..rank {
                let stride = out_strides[axis].max(1);
                coords[axis] = rem / stride;
                rem %= stride;
            }
            let mut in_off = 0usize;
            for (out_axis, &src_axis) in perm.iter().enumerate() {
                in_off += coords[out_axis] * in_strides[src_axis];
            }
            result[flat] = data[in_off];
        }
        write_f32(outputs[0], &result)
    }
}

fn resolve_perm(attrs: &Attributes, rank: usize) -> Vec<usize> {
    match attr_ints(attrs, "perm") {
        Some(p) => p.iter().map(|&v| v as usize).collect(),
        None => (0..rank).rev().collect(),
    }
}

#[derive(Debug)]
struct Concat;

impl Operator for Concat {
    fn name(&self) -> &str {
        "Concat"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        if inputs.is_empty() {
            return Err(GPError::InvalidArgument("Concat requires at least 1 input".into()));
        }
        require_f32(inputs[0].dtype(), "Concat")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        if input_shapes.is_empty() {
            return Err(GPError::InvalidArgument("Concat requires at least 1 input".into()));
        }
        let rank = input_shapes[0].rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let mut out = input_shapes[0].extents().to_vec();
        out[axis] = input_shapes.iter().map(|s| s.extents()[axis]).sum();
        Ok(vec![Shape::new(out)])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let rank = inputs[0].shape().rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let out_shape = outputs[0].shape().extents().to_vec();
        let outer: usize = out_shape[..axis].iter().product();
        let inner: usize = out_shape[axis + 1..].iter().product();
        let mut result = vec![0f32; out_shape.iter().product()];
        let mut axis_offset = 0usize;
        for input in inputs {
            let axis_len = input.shape().extents()[axis];
            let data = read_f32(input)?;
            for o in 0..outer {
                for a in 0..axis_len {
                    for i in 0..inner {
                        let src = (o * axis_len + a) * inner + i;
                        let dst = o * out_shape[axis] * inner + (axis_offset + a) * inner + i;
                        result[dst] = data[src];
                    }
                }
            }
            axis_offset += axis_len;
        }
        write_f32(outputs[0], &result)
    }
}

fn resolve_axis(axis: i64, rank: usize) -> usize {
    if axis < 0 {
        (rank as i64 + axis) as usize
    } else {
        axis as usize
    }
}

#[derive(Debug)]
struct Split;

impl Operator for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, "Split")?;
        require_f32(inputs[0].dtype(), "Split")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, "Split")?;
        let rank = input_shapes[0].rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let e = input_shapes[0].extents();
        let sizes = match attr_ints(attrs, "splits") {
            Some(s) => s.iter().map(|&d| d as usize).collect(),
            None => {
                return Err(GPError::InvalidArgument(
                    "Split requires an integer-list 'splits' attribute".into(),
                ))
            }
        };
        let sizes: Vec<usize> = sizes;
        if sizes.iter().sum::<usize>() != e[axis] {
            return Err(GPError::InvalidArgument(format!(
                "Split sizes {:?} do not sum to axis extent {}",
                sizes, e[axis]
            )));
        }
        Ok(sizes
            .iter()
            .map(|&s| {
                let mut shape = e.to_vec();
                shape[axis] = s;
                Shape::new(shape)
            })
            .collect())
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let rank = inputs[0].shape().rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let e = inputs[0].shape().extents().to_vec();
        let outer: usize = e[..axis].iter().product();
        let inner: usize = e[axis + 1..].iter().product();
        let data = read_f32(inputs[0])?;
        let mut axis_offset = 0usize;
        for out in outputs {
            let axis_len = out.shape().extents()[axis];
            let mut result = vec![0f32; out.shape().element_count()];
            for o in 0..outer {
                for a in 0..axis_len {
                    for i in 0..inner {
                        let src = (o * e[axis] + axis_offset + a) * inner + i;
                        let dst = (o * axis_len + a) * inner + i;
                        result[dst] = data[src];
                    }
                }
            }
            write_f32(out, &result)?;
            axis_offset += axis_len;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Gather;

impl Operator for Gather {
    fn name(&self) -> &str {
        "Gather"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 2, "Gather")?;
        require_f32(inputs[0].dtype(), "Gather")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 2, "Gather")?;
        let rank = input_shapes[0].rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let data = input_shapes[0].extents();
        let idx = input_shapes[1].extents();
        let mut out = data[..axis].to_vec();
        out.extend_from_slice(idx);
        out.extend_from_slice(&data[axis + 1..]);
        Ok(vec![Shape::new(out)])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let rank = inputs[0].shape().rank();
        let axis = resolve_axis(attr_int(attrs, "axis", 0), rank);
        let e = inputs[0].shape().extents().to_vec();
        let outer: usize = e[..axis].iter().product();
        let axis_len = e[axis];
        let inner: usize = e[axis + 1..].iter().product();
        let data = read_f32(inputs[0])?;
        let indices = read_index_vec(inputs[1])?;
        let mut result = vec![0f32; outputs[0].shape().element_count()];
        let mut dst = 0usize;
        for o in 0..outer {
            for &idx in &indices {
                let idx = idx.rem_euclid(axis_len as i64) as usize;
                for i in 0..inner {
                    result[dst] = data[(o * axis_len + idx) * inner + i];
                    dst += 1;
                }
            }
        }
        write_f32(outputs[0], &result)
    }
}

fn read_index_vec(t: &Tensor) -> GPResult<Vec<i64>> {
    match t.dtype() {
        DataType::I64 => t.with_bytes(|b| {
            b.chunks_exact(8)
                .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
                .collect()
        }),
        DataType::I32 => t.with_bytes(|b| {
            b.chunks_exact(4)
                .map(|c| i32::from_le_bytes(c.try_into().unwrap()) as i64)
                .collect()
        }),
        DataType::F32 => t.with_f32_slice(|s| s.iter().map(|&v| v as i64).collect()),
        other => Err(GPError::NotImplemented(format!(
            "index tensors of dtype {other} are not supported"
        ))),
    }
}

#[derive(Debug)]
struct Slice;

impl Operator for Slice {
    fn name(&self) -> &str {
        "Slice"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, "Slice")?;
        require_f32(inputs[0].dtype(), "Slice")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, "Slice")?;
        let (starts, ends) = resolve_slice_bounds(attrs, input_shapes[0].extents())?;
        let out: Vec<usize> = starts.iter().zip(ends.iter()).map(|(&s, &e)| e - s).collect();
        Ok(vec![Shape::new(out)])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let e = inputs[0].shape().extents().to_vec();
        let (starts, ends) = resolve_slice_bounds(attrs, &e)?;
        let in_strides = strides_for(&e);
        let out_shape: Vec<usize> = starts.iter().zip(ends.iter()).map(|(&s, &en)| en - s).collect();
        let out_strides = strides_for(&out_shape);
        let total: usize = out_shape.iter().product();
        let data = read_f32(inputs[0])?;
        let rank = e.len();
        let mut result = vec![0f32; total];
        for flat in 0..total {
            let mut rem = flat;
            let mut in_off = 0usize;
            for axis in 0..rank {
                let stride = out_strides[axis].max(1);
                let coord = rem / stride;
                rem %= stride;
                in_off += (starts[axis] + coord) * in_strides[axis];
            }
            result[flat] = data[in_off];
        }
        write_f32(outputs[0], &result)
    }
}

fn resolve_slice_bounds(attrs: &Attributes, extents: &[usize]) -> GPResult<(Vec<usize>, Vec<usize>)> {
    let raw_starts = attr_ints(attrs, "starts")
        .ok_or_else(|| GPError::InvalidArgument("Slice requires a 'starts' attribute".into()))?;
    let raw_ends = attr_ints(attrs, "ends")
        .ok_or_else(|| GPError::InvalidArgument("Slice requires an 'ends' attribute".into()))?;
    if raw_starts.len() != extents.len() || raw_ends.len() != extents.len() {
        return Err(GPError::InvalidArgument(
            "Slice 'starts'/'ends' must have one entry per axis".into(),
        ));
    }
    let mut starts = vec![0usize; extents.len()];
    let mut ends = vec![0usize; extents.len()];
    for i in 0..extents.len() {
        let extent = extents[i] as i64;
        let clamp = |v: i64| (if v < 0 { v + extent } else { v }).clamp(0, extent);
        let s = clamp(raw_starts[i]);
        let e = clamp(raw_ends[i]);
        if e <= s {
            return Err(GPError::InvalidArgument(format!("empty slice range on axis {i}")));
        }
        starts[i] = s as usize;
        ends[i] = e as usize;
    }
    Ok((starts, ends))
}

#[derive(Debug)]
struct Embedding;

impl Operator for Embedding {
    fn name(&self) -> &str {
        "Embedding"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 2, "Embedding")?;
        require_f32(inputs[0].dtype(), "Embedding")?;
        if inputs[0].shape().rank() != 2 {
            return Err(GPError::InvalidArgument("Embedding table must be rank-2 [vocab, dim]".into()));
        }
        Ok(())
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 2, "Embedding")?;
        let dim = input_shapes[0].extents()[1];
        let mut out = input_shapes[1].extents().to_vec();
        out.push(dim);
        Ok(vec![Shape::new(out)])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        let vocab_dim = inputs[0].shape().extents().to_vec();
        let dim = vocab_dim[1];
        let table = read_f32(inputs[0])?;
        let indices = read_index_vec(inputs[1])?;
        let mut result = vec![0f32; indices.len() * dim];
        for (row, &idx) in indices.iter().enumerate() {
            let idx = idx.rem_euclid(vocab_dim[0] as i64) as usize;
            result[row * dim..(row + 1) * dim].copy_from_slice(&table[idx * dim..(idx + 1) * dim]);
        }
        write_f32(outputs[0], &result)
    }
}

#[derive(Debug)]
struct Softmax;

impl Operator for Softmax {
    fn name(&self) -> &str {
        "Softmax"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 1, "Softmax")?;
        require_f32(inputs[0].dtype(), "Softmax")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 1, "Softmax")?;
        Ok(vec![input_shapes[0].clone()])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let shape = inputs[0].shape().extents().to_vec();
        let rank = shape.len();
        let axis = resolve_axis(attr_int(attrs, "axis", -1), rank);
        let axis_len = shape[axis];
        let outer: usize = shape[..axis].iter().product();
        let inner: usize = shape[axis + 1..].iter().product();
        let data = read_f32(inputs[0])?;
        let mut result = vec![0f32; data.len()];
        for o in 0..outer {
            for i in 0..inner {
                let mut max_v = f32::NEG_INFINITY;
                for a in 0..axis_len {
                    let idx = (o * axis_len + a) * inner + i;
                    max_v = max_v.max(data[idx]);
                }
                let mut sum = 0f32;
                for a in 0..axis_len {
                    let idx = (o * axis_len + a) * inner + i;
                    let e = (data[idx] - max_v).exp();
                    result[idx] = e;
                    sum += e;
                }
                for a in 0..axis_len {
                    let idx = (o * axis_len + a) * inner + i;
                    result[idx] /= sum;
                }
            }
        }
        write_f32(outputs[0], &result)
    }
}

// --- Fused kernels (§4.6) -------------------------------------------------

/// Conv → BatchNormalization → Relu, or Conv → Relu with synthesized
/// identity BN parameters. Inputs: `{input, weight, bias?, scale, B, mean,
/// var}` — `bias` is optional, distinguished by arity (6 vs 7 inputs).
#[derive(Debug)]
struct FusedConvBnRelu;

impl Operator for FusedConvBnRelu {
    fn name(&self) -> &str {
        "FusedConvBNReLU"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        if inputs.len() != 6 && inputs.len() != 7 {
            return Err(GPError::InvalidArgument(
                "FusedConvBNReLU expects 6 inputs (no bias) or 7 (with bias)".into(),
            ));
        }
        require_f32(inputs[0].dtype(), "FusedConvBNReLU")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], attrs: &Attributes) -> GPResult<Vec<Shape>> {
        let i = input_shapes[0].extents();
        let w = input_shapes[1].extents();
        let stride = (attr_int(attrs, "stride", 1) as usize).max(1);
        let padding = attr_int(attrs, "padding", 0) as usize;
        let (oh, ow) = conv_output_dims(i[2], i[3], w[2], w[3], stride, padding);
        Ok(vec![Shape::new(vec![i[0], w[0], oh, ow])])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], attrs: &Attributes) -> GPResult<()> {
        let has_bias = inputs.len() == 7;
        let stride = (attr_int(attrs, "stride", 1) as usize).max(1);
        let padding = attr_int(attrs, "padding", 0) as usize;
        let eps = attr_float(attrs, "epsilon", 1e-5);

        let conv_out = Tensor::tensor(outputs[0].shape().clone(), outputs[0].dtype(), outputs[0].device())?;
        conv2d_into(inputs[0], inputs[1], &conv_out, stride, padding)?;

        let (bias, scale, b, mean, var) = if has_bias {
            (Some(inputs[2]), inputs[3], inputs[4], inputs[5], inputs[6])
        } else {
            (None, inputs[2], inputs[3], inputs[4], inputs[5])
        };

        let e = outputs[0].shape().extents().to_vec();
        let (n, co, oh, ow) = (e[0], e[1], e[2], e[3]);
        let conv_data = read_f32(&conv_out)?;
        let bias_data = match bias {
            Some(b) => Some(read_f32(b)?),
            None => None,
        };
        let scale = read_f32(scale)?;
        let b = read_f32(b)?;
        let mean = read_f32(mean)?;
        let var = read_f32(var)?;

        let mut result = vec![0f32; conv_data.len()];
        for ni in 0..n {
            for ci in 0..co {
                let inv_std = 1.0 / (var[ci] + eps).sqrt();
                for hi in 0..oh {
                    for wi in 0..ow {
                        let idx = ((ni * co + ci) * oh + hi) * ow + wi;
                        let mut v = conv_data[idx];
                        if let Some(bd) = &bias_data {
                            v += bd[ci];
                        }
                        v = (v - mean[ci]) * inv_std * scale[ci] + b[ci];
                        result[idx] = v.max(0.0);
                    }
                }
            }
        }
        write_f32(outputs[0], &result)
    }
}

/// `MatMul → Add` fused into `A @ B + bias`.
#[derive(Debug)]
struct FusedMatMulAdd;

impl Operator for FusedMatMulAdd {
    fn name(&self) -> &str {
        "FusedMatMulAdd"
    }

    fn validate_inputs(&self, inputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        require_arity(inputs.len(), 3, "FusedMatMulAdd")?;
        require_f32(inputs[0].dtype(), "FusedMatMulAdd")
    }

    fn infer_output_shapes(&self, input_shapes: &[Shape], _attrs: &Attributes) -> GPResult<Vec<Shape>> {
        require_arity(input_shapes.len(), 3, "FusedMatMulAdd")?;
        let a = input_shapes[0].extents();
        let b = input_shapes[1].extents();
        if a[1] != b[0] {
            return Err(GPError::incompatible_shapes(a, b));
        }
        Ok(vec![Shape::new(vec![a[0], b[1]])])
    }

    fn execute(&self, inputs: &[&Tensor], outputs: &[&Tensor], _attrs: &Attributes) -> GPResult<()> {
        let mm = Tensor::tensor(outputs[0].shape().clone(), outputs[0].dtype(), outputs[0].device())?;
        matmul_into(inputs[0], inputs[1], &mm)?;
        let rank = outputs[0].shape().rank();
        let mm_data = read_f32(&mm)?;
        let bias_strides = broadcast_strides(inputs[2].shape().extents(), rank);
        let out_shape = outputs[0].shape().extents().to_vec();
        let out_strides = strides_for(&out_shape);
        let bias_data = read_f32(inputs[2])?;
        let total: usize = out_shape.iter().product();
        let mut result = vec![0f32; total];
        for flat in 0..total {
            let mut rem = flat;
            let mut bias_off = 0usize;
            for axis in 0..rank {
                let stride = out_strides[axis].max(1);
                let coord = rem / stride;
                rem %= stride;
                bias_off += coord * bias_strides[axis];
            }
            result[flat] = mm_data[flat] + bias_data[bias_off];
        }
        write_f32(outputs[0], &result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceKind;
    use std::collections::HashMap;

    fn f32_tensor(shape: Vec<usize>, data: &[f32]) -> Tensor {
        let t = Tensor::tensor(Shape::new(shape), DataType::F32, DeviceKind::Cpu).unwrap();
        t.with_f32_slice_mut(|s| s.copy_from_slice(data)).unwrap();
        t
    }

    #[test]
    fn add_broadcasts_a_bias_row() {
        let op = BinaryOp::new(BinaryKind::Add);
        let a = f32_tensor(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = f32_tensor(vec![2], &[10.0, 20.0]);
        let attrs = HashMap::new();
        let out_shape = op.infer_output_shapes(&[a.shape().clone(), b.shape().clone()], &attrs).unwrap();
        let out = Tensor::tensor(out_shape[0].clone(), DataType::F32, DeviceKind::Cpu).unwrap();
        op.execute(&[&a, &b], &[&out], &attrs).unwrap();
        out.with_f32_slice(|s| assert_eq!(s, &[11.0, 22.0, 13.0, 24.0])).unwrap();
    }

    #[test]
    fn matmul_computes_expected_product() {
        let a = f32_tensor(vec![2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = f32_tensor(vec![2, 2], &[5.0, 6.0, 7.0, 8.0]);
        let out = Tensor::tensor(Shape::new(vec![2, 2]), DataType::F32, DeviceKind::Cpu).unwrap();
        matmul_into(&a, &b, &out).unwrap();
        out.with_f32_slice(|s| assert_eq!(s, &[19.0, 22.0, 43.0, 50.0])).unwrap();
    }

    #[test]
    fn softmax_sums_to_one_per_row() {
        let op = Softmax;
        let x = f32_tensor(vec![2, 3], &[1.0, 2.0, 3.0, 1.0, 1.0, 1.0]);
        let attrs = HashMap::new();
        let out = Tensor::tensor(Shape::new(vec![2, 3]), DataType::F32, DeviceKind::Cpu).unwrap();
        op.execute(&[&x], &[&out], &attrs).unwrap();
        out.with_f32_slice(|s| {
            let row0: f32 = s[0..3].iter().sum();
            let row1: f32 = s[3..6].iter().sum();
            assert!((row0 - 1.0).abs() < 1e-5);
            assert!((row1 - 1.0).abs() < 1e-5);
        })
        .unwrap();
    }
}
