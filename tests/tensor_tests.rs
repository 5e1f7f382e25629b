//! Tensor value type (§4.1): P3, P4, scenario 3.

use gran_prix_runtime::{DataType, DeviceKind, Shape, Tensor};

fn vector(data: &[f32]) -> Tensor {
    let t = Tensor::tensor(Shape::new(vec![data.len()]), DataType::F32, DeviceKind::Cpu).unwrap();
    t.with_f32_slice_mut(|s| s.copy_from_slice(data)).unwrap();
    t
}

/// P3: serialize/deserialize round-trips shape, dtype, and bytes exactly.
#[test]
fn serialize_round_trips_shape_dtype_and_bytes() {
    let t = vector(&[1.0, -2.5, 3.25, 0.0]);
    let bytes = t.serialize().unwrap();
    let back = Tensor::deserialize(&bytes, DeviceKind::Cpu).unwrap();

    assert_eq!(back.shape(), t.shape());
    assert_eq!(back.dtype(), t.dtype());
    t.with_bytes(|original| back.with_bytes(|restored| assert_eq!(original, restored)).unwrap()).unwrap();
}

#[test]
fn serialize_round_trips_an_integer_dtype() {
    let t = Tensor::tensor(Shape::new(vec![3]), DataType::I64, DeviceKind::Cpu).unwrap();
    t.with_bytes_mut(|bytes| {
        for (i, chunk) in bytes.chunks_mut(8).enumerate() {
            chunk.copy_from_slice(&(i as i64 * 7).to_le_bytes());
        }
    })
    .unwrap();

    let bytes = t.serialize().unwrap();
    let back = Tensor::deserialize(&bytes, DeviceKind::Cpu).unwrap();
    assert_eq!(back.dtype(), DataType::I64);
    t.with_bytes(|original| back.with_bytes(|restored| assert_eq!(original, restored)).unwrap()).unwrap();
}

/// P4: reshape shares storage with its source instead of copying — the
/// view reads the same bytes the source holds, with no element-count
/// changes and no copy ever taken.
#[test]
fn reshape_shares_storage_with_its_source() {
    let t = vector(&[1.0, 2.0, 3.0, 4.0]);
    let view = t.reshape(Shape::new(vec![2, 2])).unwrap();
    assert_eq!(view.shape().extents(), &[2, 2]);
    view.with_f32_slice(|s| assert_eq!(s, &[1.0, 2.0, 3.0, 4.0])).unwrap();

    // While the view is alive, storage is aliased: mutating either side
    // is rejected rather than silently racing the other view.
    assert!(view.with_f32_slice_mut(|s| s[0] = 99.0).is_err());
    assert!(t.with_f32_slice_mut(|s| s[0] = 99.0).is_err());

    drop(view);
    t.with_f32_slice_mut(|s| s[0] = 99.0).unwrap();
    let view2 = t.reshape(Shape::new(vec![4])).unwrap();
    view2.with_f32_slice(|s| assert_eq!(s[0], 99.0)).unwrap();
}

#[test]
fn reshape_rejects_a_changed_element_count() {
    let t = vector(&[1.0, 2.0, 3.0, 4.0]);
    assert!(t.reshape(Shape::new(vec![2, 3])).is_err());
}

/// Scenario 3: slicing `[1, 3)` out of a 4-element vector yields `[20, 30]`
/// and shares storage with the source — writing through the source is
/// visible to a view taken afterward, proving there is one underlying
/// buffer rather than a per-view copy.
#[test]
fn slice_yields_the_expected_view_and_shares_storage() {
    let t = vector(&[10.0, 20.0, 30.0, 40.0]);
    let view = t.slice(&[1], &[3]).unwrap();
    assert_eq!(view.shape().extents(), &[2]);
    view.with_f32_slice(|s| assert_eq!(s, &[20.0, 30.0])).unwrap();
    drop(view);

    t.with_f32_slice_mut(|s| s[1] = -1.0).unwrap();
    let view2 = t.slice(&[1], &[3]).unwrap();
    view2.with_f32_slice(|s| assert_eq!(s, &[-1.0, 30.0])).unwrap();
}

#[test]
fn slice_rejects_multi_axis_partial_ranges() {
    let t = Tensor::tensor(Shape::new(vec![4, 4]), DataType::F32, DeviceKind::Cpu).unwrap();
    assert!(t.slice(&[1, 1], &[3, 3]).is_err());
}
