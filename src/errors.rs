//! Error taxonomy shared by every component (§7 of the spec).
//!
//! Kinds are opaque and stable across components; each carries a short
//! free-form message naming the offending node, value, or op-type.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GPError {
    /// Shape/dtype mismatch, arity violation, malformed configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocator failure.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Missing op-type, missing provider, missing input/output name.
    #[error("not found: {0}")]
    NotFound(String),

    /// Declared but not executable on the chosen device (e.g. cross-device
    /// copy without a backend).
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Graph-invariant violation detected during import or validate.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Kernel numeric/resource failure during execute.
    #[error("runtime error: {0}")]
    RuntimeError(String),

    /// Device API surfaced failure.
    #[error("device error: {0}")]
    DeviceError(String),

    /// Tensor/graph binary form is malformed or truncated.
    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GPResult<T> = Result<T, GPError>;

impl GPError {
    pub fn incompatible_shapes(expected: &[usize], found: &[usize]) -> Self {
        GPError::InvalidArgument(format!(
            "incompatible shapes: expected {:?}, found {:?}",
            expected, found
        ))
    }
}
