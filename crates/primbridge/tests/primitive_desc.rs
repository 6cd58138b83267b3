use anyhow::Result;
use primbridge::{
    Arg, BinaryAlg, BinaryDesc, BridgeError, DataType, LrnAlg, LrnDesc, MemoryDesc,
    PrimitiveAttr, PrimitiveDesc, PropKind,
};

fn f32_desc(dims: &[usize]) -> Result<MemoryDesc> {
    Ok(MemoryDesc::contiguous(dims.to_vec(), DataType::F32)?)
}

#[test]
fn binary_accepts_broadcastable_src1() -> Result<()> {
    let desc = BinaryDesc::new(
        BinaryAlg::Add,
        f32_desc(&[2, 3, 4])?,
        f32_desc(&[1, 3, 1])?,
        f32_desc(&[2, 3, 4])?,
        PrimitiveAttr::new(),
    )?;
    assert!(!desc.has_zero_dim());
    assert_eq!(PrimitiveDesc::Binary(desc).kind_name(), "binary");
    Ok(())
}

#[test]
fn binary_rejects_mismatched_shapes() -> Result<()> {
    let cases = [
        (f32_desc(&[2, 3])?, f32_desc(&[2, 3])?, f32_desc(&[2, 3, 1])?),
        (f32_desc(&[2, 4])?, f32_desc(&[2, 3])?, f32_desc(&[2, 3])?),
        (f32_desc(&[2, 3])?, f32_desc(&[2, 2])?, f32_desc(&[2, 3])?),
    ];
    for (src0, src1, dst) in cases {
        let err = BinaryDesc::new(BinaryAlg::Mul, src0, src1, dst, PrimitiveAttr::new())
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArguments(_)), "{err:?}");
    }
    Ok(())
}

#[test]
fn any_zero_extent_role_marks_the_primitive_degenerate() -> Result<()> {
    let desc = BinaryDesc::new(
        BinaryAlg::Max,
        f32_desc(&[2, 3])?,
        f32_desc(&[1, 3])?,
        f32_desc(&[2, 3])?,
        PrimitiveAttr::new(),
    )?;
    assert!(!PrimitiveDesc::Binary(desc).has_zero_dim());

    let empty = BinaryDesc::new(
        BinaryAlg::Max,
        f32_desc(&[2, 0])?,
        f32_desc(&[1, 0])?,
        f32_desc(&[2, 0])?,
        PrimitiveAttr::new(),
    )?;
    assert!(PrimitiveDesc::Binary(empty).has_zero_dim());

    let lrn = LrnDesc::backward(
        LrnAlg::AcrossChannels,
        f32_desc(&[0, 4, 2])?,
        f32_desc(&[0, 4, 2])?,
        3,
        1e-4,
        0.75,
        1.0,
    )?;
    assert!(PrimitiveDesc::LrnBackward(lrn).has_zero_dim());
    Ok(())
}

#[test]
fn lrn_forward_requires_forward_propagation() -> Result<()> {
    let err = LrnDesc::forward(
        PropKind::Backward,
        LrnAlg::AcrossChannels,
        f32_desc(&[1, 4, 2, 2])?,
        3,
        1e-4,
        0.75,
        1.0,
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)));

    let training = LrnDesc::forward(
        PropKind::ForwardTraining,
        LrnAlg::AcrossChannels,
        f32_desc(&[1, 4, 2, 2])?,
        3,
        1e-4,
        0.75,
        1.0,
    )?;
    assert!(training.is_training());
    assert!(training.diff_data_desc.is_none());
    Ok(())
}

#[test]
fn lrn_rejects_degenerate_geometry() -> Result<()> {
    let flat = LrnDesc::forward(
        PropKind::ForwardInference,
        LrnAlg::AcrossChannels,
        f32_desc(&[4, 4])?,
        3,
        1e-4,
        0.75,
        1.0,
    );
    assert!(flat.is_err());

    let empty_window = LrnDesc::forward(
        PropKind::ForwardInference,
        LrnAlg::AcrossChannels,
        f32_desc(&[1, 4, 4])?,
        0,
        1e-4,
        0.75,
        1.0,
    );
    assert!(empty_window.is_err());

    let mismatched = LrnDesc::backward(
        LrnAlg::AcrossChannels,
        f32_desc(&[1, 4, 4])?,
        f32_desc(&[1, 4, 5])?,
        3,
        1e-4,
        0.75,
        1.0,
    );
    assert!(mismatched.is_err());
    Ok(())
}

#[test]
fn scales_default_to_one_and_reject_empty_vectors() -> Result<()> {
    let mut attr = PrimitiveAttr::new();
    assert_eq!(attr.scales(Arg::Src0), &[1.0]);
    attr.set_scales(Arg::Src1, vec![0.5, 2.0])?;
    assert_eq!(attr.scales(Arg::Src1), &[0.5, 2.0]);
    assert!(attr.set_scales(Arg::Dst, Vec::new()).is_err());
    assert_eq!(attr.scales(Arg::Dst), &[1.0]);
    Ok(())
}

#[test]
fn argument_ids_follow_framework_numbering() {
    assert_eq!(Arg::SRC, Arg::Src0);
    let ids: Vec<i32> = [
        Arg::Src0,
        Arg::Src1,
        Arg::Dst,
        Arg::Workspace,
        Arg::DiffSrc,
        Arg::DiffDst,
    ]
    .into_iter()
    .map(Arg::id)
    .collect();
    assert_eq!(ids, [1, 2, 17, 64, 129, 145]);
}

#[test]
fn descriptors_round_trip_through_json() -> Result<()> {
    let attr = PrimitiveAttr::new().with_scales(Arg::Src0, vec![0.25])?;
    let desc = PrimitiveDesc::Binary(BinaryDesc::new(
        BinaryAlg::Min,
        MemoryDesc::contiguous([2, 3], DataType::S8)?,
        MemoryDesc::contiguous([1, 3], DataType::S8)?,
        MemoryDesc::contiguous([2, 3], DataType::F32)?.with_padded_dims([2, 4])?,
        attr,
    )?);
    let json = serde_json::to_string(&desc)?;
    let back: PrimitiveDesc = serde_json::from_str(&json)?;
    assert_eq!(back, desc);
    Ok(())
}

#[test]
fn initialization_failures_keep_out_of_memory_distinct() {
    let oom = BridgeError::OutOfMemory("arena".into()).into_initialization_failure("stream");
    assert!(matches!(oom, BridgeError::OutOfMemory(_)));

    let other = BridgeError::runtime("boom").into_initialization_failure("stream");
    match other {
        BridgeError::InitializationFailed(message) => assert!(message.starts_with("stream: ")),
        err => panic!("unexpected {err:?}"),
    }
}
