use anyhow::Result;
use primbridge::{BridgeError, DataType, MemoryDesc};

#[test]
fn contiguous_layout_is_row_major() -> Result<()> {
    let md = MemoryDesc::contiguous([2, 3, 4], DataType::F16)?;
    assert_eq!(md.strides(), &[12, 4, 1]);
    assert_eq!(md.padded_dims(), md.dims());
    assert_eq!(md.nelems(), 24);
    assert_eq!(md.size_in_bytes(), 48);
    Ok(())
}

#[test]
fn padded_dims_grow_strides_and_size() -> Result<()> {
    let md = MemoryDesc::contiguous([2, 3, 5], DataType::F32)?.with_padded_dims([2, 4, 8])?;
    assert_eq!(md.dims(), &[2, 3, 5]);
    assert_eq!(md.strides(), &[32, 8, 1]);
    assert_eq!(md.nelems(), 30);
    assert_eq!(md.size_in_bytes(), 2 * 4 * 8 * 4);
    Ok(())
}

#[test]
fn padding_below_the_logical_extent_is_rejected() -> Result<()> {
    let err = MemoryDesc::contiguous([4, 4], DataType::F32)?
        .with_padded_dims([4, 3])
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)));

    let err = MemoryDesc::contiguous([4, 4], DataType::F32)?
        .with_padded_dims([4])
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)));
    Ok(())
}

#[test]
fn strided_size_covers_the_furthest_element() -> Result<()> {
    // Channel-last view of a 1x3x2x2 tensor.
    let md = MemoryDesc::strided([1, 3, 2, 2], [12, 1, 6, 3], DataType::S8)?;
    assert_eq!(md.size_in_bytes(), 12);

    let err = MemoryDesc::strided([2, 2], [1], DataType::F32).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)));
    Ok(())
}

#[test]
fn overflowing_shapes_are_rejected() {
    let huge = [usize::MAX / 2, 4];
    assert!(MemoryDesc::contiguous(huge, DataType::F32).is_err());
    assert!(MemoryDesc::strided(huge, [4, 1], DataType::F32).is_err());
}

#[test]
fn byte_spans_that_overflow_are_rejected() -> Result<()> {
    // Element counts fit in usize, but the addressed byte range does not.
    let extent = i32::MAX as usize;
    let err = MemoryDesc::strided([extent, extent], [extent, extent], DataType::F32).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)), "{err:?}");

    let err = MemoryDesc::contiguous([extent, extent], DataType::F64).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)), "{err:?}");

    let err = MemoryDesc::contiguous([extent], DataType::F32)?
        .with_padded_dims([usize::MAX / 2])
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)), "{err:?}");

    let md = MemoryDesc::strided([extent, 2], [2, 1], DataType::F64)?;
    assert_eq!(md.checked_size_in_bytes()?, md.size_in_bytes());
    assert_eq!(md.size_in_bytes(), ((extent - 1) * 2 + 2) * 8);
    Ok(())
}

#[test]
fn zero_extent_descriptors_span_no_bytes() -> Result<()> {
    let md = MemoryDesc::contiguous([3, 0, 7], DataType::F32)?;
    assert!(md.has_zero_dim());
    assert_eq!(md.nelems(), 0);
    assert_eq!(md.size_in_bytes(), 0);
    Ok(())
}

#[test]
fn element_sizes_follow_the_data_type() {
    let sizes: Vec<usize> = [
        DataType::S8,
        DataType::U8,
        DataType::F16,
        DataType::Bf16,
        DataType::F32,
        DataType::S32,
        DataType::F64,
    ]
    .into_iter()
    .map(DataType::size_in_bytes)
    .collect();
    assert_eq!(sizes, [1, 1, 2, 2, 4, 4, 8]);
}
