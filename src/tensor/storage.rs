//! Byte-level storage backing a [`Tensor`](super::Tensor).
//!
//! Storage is always a flat little-endian byte buffer shared via `Arc`. A
//! tensor that *owns* its storage holds the only strong reference at
//! construction time; `reshape`/`slice` clone the `Arc` to produce a *view*,
//! which is how the producer-outlives-views invariant of the tensor contract
//! is upheld without lifetimes (mirrors the teacher's `Arc<CudaSlice<f32>>`
//! sharing in `backend/cuda`).

use std::sync::{Arc, Mutex};

/// Backing bytes for a tensor, either heap-allocated and refcounted or a
/// raw pointer supplied by the caller (`tensor_from_borrow`).
#[derive(Debug)]
pub enum Storage {
    Owned(Arc<Mutex<Vec<u8>>>),
    /// Non-owning view over caller-supplied memory. The caller guarantees
    /// the pointed-to region outlives every tensor built from it.
    Borrowed { ptr: *mut u8, len: usize },
}

// SAFETY: `Borrowed` is only ever produced by `tensor_from_borrow`, whose
// contract requires the caller to guarantee the region is valid for the
// lifetime of every tensor derived from it and not concurrently aliased
// outside the synchronization the caller already performs.
unsafe impl Send for Storage {}
unsafe impl Sync for Storage {}

impl Storage {
    pub fn owned(bytes: Vec<u8>) -> Self {
        Storage::Owned(Arc::new(Mutex::new(bytes)))
    }

    /// Number of live strong references sharing this storage. `1` means no
    /// other view is aliasing it. Borrowed storage always reports `1`
    /// since aliasing is the caller's responsibility.
    pub fn strong_count(&self) -> usize {
        match self {
            Storage::Owned(buf) => Arc::strong_count(buf),
            Storage::Borrowed { .. } => 1,
        }
    }

    pub fn share(&self) -> Storage {
        match self {
            Storage::Owned(buf) => Storage::Owned(Arc::clone(buf)),
            Storage::Borrowed { ptr, len } => Storage::Borrowed { ptr: *ptr, len: *len },
        }
    }
}
