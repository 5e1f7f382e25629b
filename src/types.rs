//! Element types, device tags and shapes shared by the tensor and graph layers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of tensor element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F32,
    F16,
    Bf16,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
}

impl DataType {
    /// Fixed byte width for this element type.
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 | DataType::U32 => 4,
            DataType::F16 | DataType::Bf16 | DataType::I16 | DataType::U16 => 2,
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I64 | DataType::U64 => 8,
        }
    }

    /// Stable integer tag used by the tensor binary serialization format (§4.1).
    pub fn wire_tag(&self) -> u32 {
        match self {
            DataType::F32 => 0,
            DataType::F16 => 1,
            DataType::Bf16 => 2,
            DataType::I8 => 3,
            DataType::I16 => 4,
            DataType::I32 => 5,
            DataType::I64 => 6,
            DataType::U8 => 7,
            DataType::U16 => 8,
            DataType::U32 => 9,
            DataType::U64 => 10,
            DataType::Bool => 11,
        }
    }

    pub fn from_wire_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => DataType::F32,
            1 => DataType::F16,
            2 => DataType::Bf16,
            3 => DataType::I8,
            4 => DataType::I16,
            5 => DataType::I32,
            6 => DataType::I64,
            7 => DataType::U8,
            8 => DataType::U16,
            9 => DataType::U32,
            10 => DataType::U64,
            11 => DataType::Bool,
            _ => return None,
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Closed enumeration of devices a tensor or node may be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Cpu,
    Cuda(u32),
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "cpu"),
            DeviceKind::Cuda(i) => write!(f, "cuda:{i}"),
        }
    }
}

/// An ordered sequence of extents, some of which may be dynamic (unknown at
/// graph-construction time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    extents: Vec<usize>,
    dynamic: Vec<bool>,
}

impl Shape {
    pub fn new(extents: Vec<usize>) -> Self {
        let dynamic = vec![false; extents.len()];
        Self { extents, dynamic }
    }

    /// Construct a shape with some axes marked dynamic. `dynamic_axes` holds
    /// indices whose extent is not known statically; their entry in
    /// `extents` is ignored for element-count purposes.
    pub fn with_dynamic(extents: Vec<usize>, dynamic_axes: &[usize]) -> Self {
        let mut dynamic = vec![false; extents.len()];
        for &axis in dynamic_axes {
            if axis < dynamic.len() {
                dynamic[axis] = true;
            }
        }
        Self { extents, dynamic }
    }

    pub fn scalar() -> Self {
        Self { extents: vec![], dynamic: vec![] }
    }

    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.iter().any(|&d| d)
    }

    pub fn dynamic_axes(&self) -> &[bool] {
        &self.dynamic
    }

    /// Product of static extents. Dynamic axes are not reflected here;
    /// callers needing an exact count must resolve dynamic axes first.
    pub fn element_count(&self) -> usize {
        self.extents.iter().product()
    }
}

impl From<Vec<usize>> for Shape {
    fn from(extents: Vec<usize>) -> Self {
        Shape::new(extents)
    }
}

impl From<&[usize]> for Shape {
    fn from(extents: &[usize]) -> Self {
        Shape::new(extents.to_vec())
    }
}
