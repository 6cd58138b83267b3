use anyhow::Result;
use primbridge::{Arg, BinaryAlg, BridgeError, DataType, PrimitiveAttr};
use primbridge_cudnn::api::OpTensorOp;
use primbridge_cudnn::ops::convert_alg_kind;
use primbridge_cudnn::{resolve_coefficients, Coefficients};

#[test]
fn defaults_blend_without_accumulation() {
    let coeffs = resolve_coefficients(DataType::F32, &PrimitiveAttr::new());
    assert_eq!(coeffs, Coefficients::default());
    assert_eq!((coeffs.alpha0, coeffs.alpha1, coeffs.beta), (1.0, 1.0, 0.0));
}

#[test]
fn signed_int8_sources_take_their_first_scale() -> Result<()> {
    let attr = PrimitiveAttr::new()
        .with_scales(Arg::Src0, vec![0.125, 9.0])?
        .with_scales(Arg::Src1, vec![2.0])?;
    let coeffs = resolve_coefficients(DataType::S8, &attr);
    assert_eq!((coeffs.alpha0, coeffs.alpha1), (0.125, 2.0));

    let only_src0 = PrimitiveAttr::new().with_scales(Arg::Src0, vec![4.0])?;
    let coeffs = resolve_coefficients(DataType::S8, &only_src0);
    assert_eq!((coeffs.alpha0, coeffs.alpha1), (4.0, 1.0));
    Ok(())
}

#[test]
fn other_source_types_and_destination_scales_are_ignored() -> Result<()> {
    let attr = PrimitiveAttr::new()
        .with_scales(Arg::Src0, vec![0.5])?
        .with_scales(Arg::Dst, vec![3.0])?;
    for data_type in [DataType::U8, DataType::F32, DataType::F16, DataType::S32] {
        assert_eq!(resolve_coefficients(data_type, &attr), Coefficients::default());
    }
    let s8 = resolve_coefficients(DataType::S8, &attr);
    assert_eq!(s8.beta, 0.0);
    Ok(())
}

#[test]
fn only_four_algorithms_map_to_op_tensor() {
    assert_eq!(convert_alg_kind(BinaryAlg::Add), Ok(OpTensorOp::Add));
    assert_eq!(convert_alg_kind(BinaryAlg::Mul), Ok(OpTensorOp::Mul));
    assert_eq!(convert_alg_kind(BinaryAlg::Min), Ok(OpTensorOp::Min));
    assert_eq!(convert_alg_kind(BinaryAlg::Max), Ok(OpTensorOp::Max));
    for alg in [BinaryAlg::Sub, BinaryAlg::Div] {
        assert!(matches!(
            convert_alg_kind(alg),
            Err(BridgeError::Unimplemented { what: "binary", .. })
        ));
    }
}
