//! Binds a `MemoryPlan`'s block assignment to real backing storage (§4.2).
//!
//! Grounded on the teacher's `graph::buffer_pool::BufferPool` (an index ->
//! `Tensor` map, handed out via `Tensor::clone()`); `Tensor` here carries no
//! `Clone` impl (aliased mutation is gated on `Arc::strong_count`), so
//! reuse is rebuilt on `tensor::allocator::BlockPool`-style raw allocations:
//! one real allocation per block, and tenants materialize as
//! `Tensor::tensor_from_borrow` views into it instead of cloned tensors.

use crate::errors::GPResult;
use crate::graph::memory_planner::MemoryPlan;
use crate::tensor::allocator::{AllocHandle, Allocator, MIN_ALIGNMENT};
use crate::tensor::Tensor;
use crate::types::{DataType, DeviceKind, Shape};

/// Owns one allocation per block named in a `MemoryPlan`. Must outlive
/// every `Tensor` built from it via `tensor_for_block`.
pub struct BufferPool {
    handles: Vec<AllocHandle>,
    device: DeviceKind,
}

impl BufferPool {
    /// Allocates one block per entry in `plan.block_bytes`, sized to the
    /// largest value ever assigned to it, aligned to
    /// `tensor::allocator::MIN_ALIGNMENT` per §4.2's guarantee.
    pub fn for_plan(plan: &MemoryPlan, allocator: &dyn Allocator) -> GPResult<Self> {
        let mut handles = Vec::with_capacity(plan.block_count());
        for &size in &plan.block_bytes {
            handles.push(allocator.alloc_aligned(size.max(1), MIN_ALIGNMENT)?);
        }
        Ok(Self { handles, device: allocator.device() })
    }

    pub fn block_count(&self) -> usize {
        self.handles.len()
    }

    pub fn block_byte_len(&self, block_id: usize) -> usize {
        self.handles[block_id].len()
    }

    /// Builds a tensor viewing `block_id`'s backing allocation, shaped to
    /// `shape`.
    ///
    /// # Safety
    /// The caller must not keep two tensors alive over the same block with
    /// overlapping lifetimes; the planner's (birth, death) intervals
    /// guarantee this as long as tensors are materialized and dropped in
    /// the node execution order the plan was computed against.
    pub unsafe fn tensor_for_block(&self, block_id: usize, shape: Shape, dtype: DataType) -> Tensor {
        let handle = &self.handles[block_id];
        Tensor::tensor_from_borrow(shape, dtype, self.device, handle.as_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory_planner::LifetimeInterval;
    use crate::tensor::allocator::CpuAllocator;
    use std::collections::HashMap;

    #[test]
    fn blocks_are_sized_to_their_plan_entry() {
        let mut assignment = HashMap::new();
        assignment.insert(crate::graph::ValueId(0), 0usize);
        let plan = MemoryPlan {
            assignment,
            block_bytes: vec![256],
            intervals: {
                let mut m = HashMap::new();
                m.insert(crate::graph::ValueId(0), LifetimeInterval { birth: 0, death: 1 });
                m
            },
        };
        let allocator = CpuAllocator::new();
        let pool = BufferPool::for_plan(&plan, &allocator).unwrap();
        assert_eq!(pool.block_count(), 1);
        assert!(pool.block_byte_len(0) >= 256);
    }

    #[test]
    fn tensor_for_block_views_the_requested_shape() {
        let plan = MemoryPlan { assignment: HashMap::new(), block_bytes: vec![64], intervals: HashMap::new() };
        let allocator = CpuAllocator::new();
        let pool = BufferPool::for_plan(&plan, &allocator).unwrap();
        let tensor = unsafe { pool.tensor_for_block(0, Shape::new(vec![4, 4]), DataType::F32) };
        assert_eq!(tensor.shape().element_count(), 16);
    }
}
