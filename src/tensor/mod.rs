//! Tensor: the (shape, dtype, device, layout, data handle, ownership bit)
//! value described in §3/§4.1. Storage is always treated as a flat,
//! contiguous, row-major byte buffer; `reshape` and single-axis `slice`
//! return views that share storage via `Arc` rather than copying.

pub mod allocator;
pub mod storage;

use crate::errors::{GPError, GPResult};
use crate::types::{DataType, DeviceKind, Shape};
use storage::Storage;

/// A tensor: either the owner of freshly allocated storage, or a view
/// (produced by `reshape`/`slice`) sharing another tensor's storage.
#[derive(Debug)]
pub struct Tensor {
    shape: Shape,
    dtype: DataType,
    device: DeviceKind,
    storage: Storage,
    /// Byte offset of this tensor's first element within `storage`.
    offset: usize,
    owns: bool,
}

fn alloc_zeroed(nbytes: usize) -> GPResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(nbytes)
        .map_err(|e| GPError::OutOfMemory(format!("failed to allocate {nbytes} bytes: {e}")))?;
    buf.resize(nbytes, 0);
    Ok(buf)
}

impl Tensor {
    /// Allocates freshly owned, zero-initialized storage sized to the
    /// shape's element count times the dtype's byte width. True ≥16-byte
    /// aligned reuse is the memory planner's job (`tensor::allocator`);
    /// this constructor allocates a plain, independently-owned buffer.
    pub fn tensor(shape: Shape, dtype: DataType, device: DeviceKind) -> GPResult<Tensor> {
        let nbytes = shape.element_count() * dtype.size_bytes();
        Ok(Tensor {
            shape,
            dtype,
            device,
            storage: Storage::owned(alloc_zeroed(nbytes)?),
            offset: 0,
            owns: true,
        })
    }

    /// Non-owning view over caller-supplied memory.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of
    /// `shape.element_count() * dtype.size_bytes()` bytes, and that region
    /// must remain valid and otherwise unaliased for the lifetime of every
    /// tensor produced from it (directly or via `reshape`/`slice`).
    pub unsafe fn tensor_from_borrow(
        shape: Shape,
        dtype: DataType,
        device: DeviceKind,
        ptr: *mut u8,
    ) -> Tensor {
        let len = shape.element_count() * dtype.size_bytes();
        Tensor {
            shape,
            dtype,
            device,
            storage: Storage::Borrowed { ptr, len },
            offset: 0,
            owns: false,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn is_view(&self) -> bool {
        !self.owns
    }

    fn byte_len(&self) -> usize {
        self.shape.element_count() * self.dtype.size_bytes()
    }

    fn check_writable(&self) -> GPResult<()> {
        if self.storage.strong_count() == 1 {
            Ok(())
        } else {
            Err(GPError::InvalidArgument(
                "tensor storage is aliased by a live view and cannot be mutated".into(),
            ))
        }
    }

    /// Runs `f` over this tensor's bytes without copying them out.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> GPResult<R> {
        match &self.storage {
            Storage::Owned(buf) => {
                let guard = buf
                    .lock()
                    .map_err(|_| GPError::RuntimeError("tensor storage lock poisoned".into()))?;
                let end = self.offset + self.byte_len();
                if end > guard.len() {
                    return Err(GPError::InvalidArgument(
                        "tensor view extends past the end of its storage".into(),
                    ));
                }
                Ok(f(&guard[self.offset..end]))
            }
            Storage::Borrowed { ptr, len } => {
                let end = self.offset + self.byte_len();
                if end > *len {
                    return Err(GPError::InvalidArgument(
                        "tensor view extends past the end of its storage".into(),
                    ));
                }
                // SAFETY: validity of `ptr` for `len` bytes is the caller's
                // contract from `tensor_from_borrow`.
                let slice =
                    unsafe { std::slice::from_raw_parts(ptr.add(self.offset), end - self.offset) };
                Ok(f(slice))
            }
        }
    }

    /// Runs `f` over this tensor's bytes, failing if the storage is
    /// aliased by another live view (see the exclusive-mutation invariant
    /// of §3).
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> GPResult<R> {
        self.check_writable()?;
        match &self.storage {
            Storage::Owned(buf) => {
                let mut guard = buf
                    .lock()
                    .map_err(|_| GPError::RuntimeError("tensor storage lock poisoned".into()))?;
                let end = self.offset + self.byte_len();
                if end > guard.len() {
                    return Err(GPError::InvalidArgument(
                        "tensor view extends past the end of its storage".into(),
                    ));
                }
                Ok(f(&mut guard[self.offset..end]))
            }
            Storage::Borrowed { ptr, len } => {
                let end = self.offset + self.byte_len();
                if end > *len {
                    return Err(GPError::InvalidArgument(
                        "tensor view extends past the end of its storage".into(),
                    ));
                }
                // SAFETY: see `with_bytes`.
                let slice = unsafe {
                    std::slice::from_raw_parts_mut(ptr.add(self.offset), end - self.offset)
                };
                Ok(f(slice))
            }
        }
    }

    /// Zero-copy `f32` view. Fails for any other dtype.
    pub fn with_f32_slice<R>(&self, f: impl FnOnce(&[f32]) -> R) -> GPResult<R> {
        if self.dtype != DataType::F32 {
            return Err(GPError::InvalidArgument(format!(
                "expected F32 tensor, found {}",
                self.dtype
            )));
        }
        self.with_bytes(|b| f(bytemuck::cast_slice(b)))
    }

    pub fn with_f32_slice_mut<R>(&self, f: impl FnOnce(&mut [f32]) -> R) -> GPResult<R> {
        if self.dtype != DataType::F32 {
            return Err(GPError::InvalidArgument(format!(
                "expected F32 tensor, found {}",
                self.dtype
            )));
        }
        self.with_bytes_mut(|b| f(bytemuck::cast_slice_mut(b)))
    }

    /// Reshapes to `new_shape`, failing if the element count changes.
    /// Returns a view sharing storage with `self` (P4): no bytes are
    /// copied and the view's data pointer equals the source's.
    pub fn reshape(&self, new_shape: Shape) -> GPResult<Tensor> {
        if new_shape.element_count() != self.shape.element_count() {
            return Err(GPError::incompatible_shapes(
                self.shape.extents(),
                new_shape.extents(),
            ));
        }
        Ok(Tensor {
            shape: new_shape,
            dtype: self.dtype,
            device: self.device,
            storage: self.storage.share(),
            offset: self.offset,
            owns: false,
        })
    }

    /// Per-axis half-open ranges `[starts[i], ends[i])`. Negative indices
    /// count from the end of the axis; ranges are clamped to
    /// `[0, extent]`. Only zero-copy (contiguous) slices are supported:
    /// at most one axis may be a strict sub-range of its extent. Wider
    /// multi-axis partial slices would require a non-contiguous strided
    /// view, which this tensor representation does not carry.
    pub fn slice(&self, starts: &[i64], ends: &[i64]) -> GPResult<Tensor> {
        let rank = self.shape.rank();
        if starts.len() != rank || ends.len() != rank {
            return Err(GPError::InvalidArgument(format!(
                "slice rank mismatch: tensor has rank {}, got {} starts / {} ends",
                rank,
                starts.len(),
                ends.len()
            )));
        }
        let extents = self.shape.extents();
        let mut norm_starts = vec![0usize; rank];
        let mut norm_ends = vec![0usize; rank];
        let mut restricted_axis: Option<usize> = None;
        for i in 0..rank {
            let extent = extents[i] as i64;
            let clamp = |v: i64| -> i64 {
                let v = if v < 0 { v + extent } else { v };
                v.clamp(0, extent)
            };
            let s = clamp(starts[i]);
            let e = clamp(ends[i]);
            if e <= s {
                return Err(GPError::InvalidArgument(format!(
                    "empty or inverted slice range on axis {i}: [{s}, {e})"
                )));
            }
            norm_starts[i] = s as usize;
            norm_ends[i] = e as usize;
            if s != 0 || e != extent {
                if restricted_axis.is_some() {
                    return Err(GPError::InvalidArgument(
                        "multi-axis partial slicing is not supported for zero-copy tensor views"
                            .into(),
                    ));
                }
                restricted_axis = Some(i);
            }
        }

        let mut strides = vec![1usize; rank];
        for i in (0..rank.saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * extents[i + 1];
        }
        let offset_elems = match restricted_axis {
            Some(axis) => norm_starts[axis] * strides[axis],
            None => 0,
        };
        let new_extents: Vec<usize> = (0..rank).map(|i| norm_ends[i] - norm_starts[i]).collect();
        let new_shape = Shape::new(new_extents);
        let offset = self.offset + offset_elems * self.dtype.size_bytes();

        Ok(Tensor {
            shape: new_shape,
            dtype: self.dtype,
            device: self.device,
            storage: self.storage.share(),
            offset,
            owns: false,
        })
    }

    pub fn fill_zero(&self) -> GPResult<()> {
        self.with_bytes_mut(|b| b.fill(0))
    }

    pub fn fill_value(&self, v: f32) -> GPResult<()> {
        match self.dtype {
            DataType::F32 => self.with_f32_slice_mut(|s| s.fill(v)),
            DataType::I8 => self.with_bytes_mut(|b| b.fill(v as i8 as u8)),
            DataType::U8 | DataType::Bool => self.with_bytes_mut(|b| b.fill(v as u8)),
            DataType::I16 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(2) {
                    c.copy_from_slice(&(v as i16).to_le_bytes());
                }
            }),
            DataType::U16 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(2) {
                    c.copy_from_slice(&(v as u16).to_le_bytes());
                }
            }),
            DataType::I32 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(4) {
                    c.copy_from_slice(&(v as i32).to_le_bytes());
                }
            }),
            DataType::U32 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(4) {
                    c.copy_from_slice(&(v as u32).to_le_bytes());
                }
            }),
            DataType::I64 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(8) {
                    c.copy_from_slice(&(v as i64).to_le_bytes());
                }
            }),
            DataType::U64 => self.with_bytes_mut(|b| {
                for c in b.chunks_exact_mut(8) {
                    c.copy_from_slice(&(v as u64).to_le_bytes());
                }
            }),
            DataType::F16 | DataType::Bf16 => Err(GPError::NotImplemented(format!(
                "fill_value is not implemented for {}",
                self.dtype
            ))),
        }
    }

    /// Copies bytes into `dst`. Requires equal shape and dtype. Same
    /// device is a byte-copy; cross-device copy is not performed here
    /// (use the owning device's `CopyToHost`/`CopyFromHost`, §4.5).
    pub fn copy_to(&self, dst: &Tensor) -> GPResult<()> {
        if self.shape.extents() != dst.shape.extents() || self.dtype != dst.dtype {
            return Err(GPError::incompatible_shapes(
                self.shape.extents(),
                dst.shape.extents(),
            ));
        }
        if self.device != dst.device {
            return Err(GPError::NotImplemented(format!(
                "cross-device copy from {} to {} requires a device-provided copy path",
                self.device, dst.device
            )));
        }
        let bytes = self.with_bytes(|b| b.to_vec())?;
        dst.with_bytes_mut(|out| out.copy_from_slice(&bytes))?;
        Ok(())
    }

    pub fn copy_from(&self, src: &Tensor) -> GPResult<()> {
        src.copy_to(self)
    }

    /// Produces an explicit view sharing this tensor's storage, with the
    /// same shape. Used where a single producer's output must be handed to
    /// more than one consumer without copying bytes.
    pub fn share(&self) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            device: self.device,
            storage: self.storage.share(),
            offset: self.offset,
            owns: false,
        }
    }

    /// Allocates fresh storage and copies this tensor's bytes into it, so
    /// the result aliases nothing (used by `Graph::deep_clone`).
    pub fn deep_clone(&self) -> GPResult<Tensor> {
        let out = Tensor::tensor(self.shape.clone(), self.dtype, self.device)?;
        self.copy_to(&out)?;
        Ok(out)
    }

    /// `[rank: u64][dims: i64 × rank][dtype: u32][nbytes: u64][bytes]`,
    /// little-endian, no padding, no version prefix.
    pub fn serialize(&self) -> GPResult<Vec<u8>> {
        let extents = self.shape.extents();
        let nbytes = self.byte_len();
        let mut out = Vec::with_capacity(8 + extents.len() * 8 + 4 + 8 + nbytes);
        out.extend_from_slice(&(extents.len() as u64).to_le_bytes());
        for &d in extents {
            out.extend_from_slice(&(d as i64).to_le_bytes());
        }
        out.extend_from_slice(&self.dtype.wire_tag().to_le_bytes());
        out.extend_from_slice(&(nbytes as u64).to_le_bytes());
        self.with_bytes(|b| out.extend_from_slice(b))?;
        Ok(out)
    }

    /// Deserializes a tensor produced by [`Tensor::serialize`]. The device
    /// is not part of the wire form; callers choose where the bytes land.
    pub fn deserialize(bytes: &[u8], device: DeviceKind) -> GPResult<Tensor> {
        let mut cursor = 0usize;
        let take = |cursor: &mut usize, n: usize| -> GPResult<&[u8]> {
            if *cursor + n > bytes.len() {
                return Err(GPError::SerializationError(
                    "truncated tensor buffer".into(),
                ));
            }
            let s = &bytes[*cursor..*cursor + n];
            *cursor += n;
            Ok(s)
        };

        let rank = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap()) as usize;
        let mut extents = Vec::with_capacity(rank);
        for _ in 0..rank {
            let d = i64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap());
            if d < 0 {
                return Err(GPError::SerializationError(format!(
                    "negative dimension {d} in tensor buffer"
                )));
            }
            extents.push(d as usize);
        }
        let tag = u32::from_le_bytes(take(&mut cursor, 4)?.try_into().unwrap());
        let dtype = DataType::from_wire_tag(tag)
            .ok_or_else(|| GPError::SerializationError(format!("unknown dtype tag {tag}")))?;
        let nbytes = u64::from_le_bytes(take(&mut cursor, 8)?.try_into().unwrap()) as usize;
        let payload = take(&mut cursor, nbytes)?;
        if cursor != bytes.len() {
            return Err(GPError::SerializationError(
                "trailing bytes after tensor payload".into(),
            ));
        }
        let shape = Shape::new(extents);
        let expected = shape.element_count() * dtype.size_bytes();
        if expected != nbytes {
            return Err(GPError::SerializationError(format!(
                "declared byte length {nbytes} does not match shape/dtype ({expected})"
            )));
        }
        Ok(Tensor {
            shape,
            dtype,
            device,
            storage: Storage::owned(payload.to_vec()),
            offset: 0,
            owns: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reshape_shares_storage_and_preserves_element_count() {
        let t = Tensor::tensor(Shape::new(vec![2, 3]), DataType::F32, DeviceKind::Cpu).unwrap();
        t.with_f32_slice_mut(|s| s.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
            .unwrap();
        let r = t.reshape(Shape::new(vec![6])).unwrap();
        assert_eq!(r.shape().extents(), &[6]);
        r.with_f32_slice(|s| assert_eq!(s, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))
            .unwrap();
        assert!(t.reshape(Shape::new(vec![4])).is_err());
    }

    #[test]
    fn slice_returns_contiguous_sub_range() {
        let t = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
        t.with_f32_slice_mut(|s| s.copy_from_slice(&[10.0, 20.0, 30.0, 40.0]))
            .unwrap();
        let mid = t.slice(&[1], &[3]).unwrap();
        assert_eq!(mid.shape().extents(), &[2]);
        mid.with_f32_slice(|s| assert_eq!(s, &[20.0, 30.0])).unwrap();
    }

    #[test]
    fn slice_supports_negative_indices() {
        let t = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
        t.with_f32_slice_mut(|s| s.copy_from_slice(&[10.0, 20.0, 30.0, 40.0]))
            .unwrap();
        let tail = t.slice(&[-2], &[-1]).unwrap();
        tail.with_f32_slice(|s| assert_eq!(s, &[30.0])).unwrap();
    }

    #[test]
    fn mutation_is_rejected_while_a_view_is_aliasing_the_storage() {
        let t = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
        let view = t.reshape(Shape::new(vec![2, 2])).unwrap();
        assert!(t.fill_zero().is_err());
        assert!(view.fill_zero().is_err());
        drop(view);
        assert!(t.fill_zero().is_ok());
    }

    #[test]
    fn serialize_round_trips() {
        let t = Tensor::tensor(Shape::new(vec![2, 2]), DataType::F32, DeviceKind::Cpu).unwrap();
        t.with_f32_slice_mut(|s| s.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let bytes = t.serialize().unwrap();
        let back = Tensor::deserialize(&bytes, DeviceKind::Cpu).unwrap();
        assert_eq!(back.shape().extents(), t.shape().extents());
        assert_eq!(back.dtype(), t.dtype());
        back.with_f32_slice(|s| assert_eq!(s, &[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
    }

    #[test]
    fn copy_to_requires_matching_shape_and_dtype() {
        let a = Tensor::tensor(Shape::new(vec![3]), DataType::F32, DeviceKind::Cpu).unwrap();
        let b = Tensor::tensor(Shape::new(vec![4]), DataType::F32, DeviceKind::Cpu).unwrap();
        assert!(a.copy_to(&b).is_err());
        let c = Tensor::tensor(Shape::new(vec![3]), DataType::F32, DeviceKind::Cpu).unwrap();
        a.with_f32_slice_mut(|s| s.copy_from_slice(&[1.0, 2.0, 3.0]))
            .unwrap();
        a.copy_to(&c).unwrap();
        c.with_f32_slice(|s| assert_eq!(s, &[1.0, 2.0, 3.0])).unwrap();
    }
}
