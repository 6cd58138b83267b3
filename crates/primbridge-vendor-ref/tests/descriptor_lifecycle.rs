use anyhow::Result;
use primbridge::{
    BinaryAlg, BinaryDesc, BridgeError, DataType, LrnAlg, LrnDesc, MemoryDesc, PrimitiveAttr,
    PropKind,
};
use primbridge_cudnn::api::{DNN_STATUS_ALLOC_FAILED, DNN_STATUS_BAD_PARAM};
use primbridge_cudnn::{BinaryPrimitive, LrnBackwardPrimitive, LrnForwardPrimitive};
use primbridge_vendor_ref::{DescriptorEvent, DescriptorKind, RefVendor};

fn binary_desc(alg: BinaryAlg, dims: &[usize], data_type: DataType) -> Result<BinaryDesc> {
    let md = MemoryDesc::contiguous(dims.to_vec(), data_type)?;
    Ok(BinaryDesc::new(alg, md.clone(), md.clone(), md, PrimitiveAttr::new())?)
}

fn lrn_backward_desc(alg: LrnAlg) -> Result<LrnDesc> {
    let md = MemoryDesc::contiguous([2, 6, 3, 3], DataType::F32)?;
    Ok(LrnDesc::backward(alg, md.clone(), md, 5, 1e-4, 0.75, 1.0)?)
}

fn created_ids(log: &[DescriptorEvent]) -> Vec<(DescriptorKind, usize)> {
    log.iter()
        .filter_map(|event| match *event {
            DescriptorEvent::Created { kind, id } => Some((kind, id)),
            DescriptorEvent::Destroyed { .. } => None,
        })
        .collect()
}

fn destroyed_ids(log: &[DescriptorEvent]) -> Vec<(DescriptorKind, usize)> {
    log.iter()
        .filter_map(|event| match *event {
            DescriptorEvent::Destroyed { kind, id } => Some((kind, id)),
            DescriptorEvent::Created { .. } => None,
        })
        .collect()
}

#[test]
fn binary_owns_three_tensors_and_one_op_descriptor() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let desc = binary_desc(BinaryAlg::Add, &[2, 3], DataType::F32)?;
    let primitive = BinaryPrimitive::new(&desc, &engine)?;
    assert_eq!(primitive.compiled().descriptor_count(), 4);
    assert_eq!(vendor.live_descriptors(), 4);

    let kinds: Vec<DescriptorKind> = created_ids(&vendor.descriptor_log())
        .into_iter()
        .map(|(kind, _)| kind)
        .collect();
    assert_eq!(
        kinds,
        [
            DescriptorKind::Tensor,
            DescriptorKind::Tensor,
            DescriptorKind::Tensor,
            DescriptorKind::OpTensor
        ]
    );

    drop(primitive);
    assert_eq!(vendor.live_descriptors(), 0);
    Ok(())
}

#[test]
fn descriptors_are_destroyed_in_reverse_creation_order() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let desc = lrn_backward_desc(LrnAlg::AcrossChannels)?;
    let primitive = LrnBackwardPrimitive::new(&desc, &engine)?;
    assert_eq!(vendor.live_descriptors(), 5);
    drop(primitive);

    let log = vendor.descriptor_log();
    let mut created = created_ids(&log);
    created.reverse();
    assert_eq!(destroyed_ids(&log), created);
    assert_eq!(created.first().map(|(kind, _)| *kind), Some(DescriptorKind::Lrn));
    Ok(())
}

#[test]
fn lrn_forward_owns_two_tensors_and_one_lrn_descriptor() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let md = MemoryDesc::contiguous([1, 4, 2, 2], DataType::F32)?;
    for prop_kind in [PropKind::ForwardInference, PropKind::ForwardTraining] {
        let desc =
            LrnDesc::forward(prop_kind, LrnAlg::AcrossChannels, md.clone(), 3, 1e-4, 0.75, 1.0)?;
        let primitive = LrnForwardPrimitive::new(&desc, &engine)?;
        assert_eq!(primitive.compiled().descriptor_count(), 3);
        assert_eq!(vendor.live_descriptors(), 3);
    }
    assert_eq!(vendor.live_descriptors(), 0);
    Ok(())
}

#[test]
fn rejected_descriptions_create_no_descriptors() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let cases = [
        binary_desc(BinaryAlg::Add, &[1; 9], DataType::F32)?,
        binary_desc(BinaryAlg::Div, &[2, 2], DataType::F32)?,
        binary_desc(BinaryAlg::Add, &[2, 2], DataType::Bf16)?,
        binary_desc(BinaryAlg::Add, &[2, 0], DataType::F32)?,
    ];
    for desc in &cases {
        let _ = BinaryPrimitive::new(desc, &engine);
    }
    let _ = LrnBackwardPrimitive::new(&lrn_backward_desc(LrnAlg::WithinChannel)?, &engine);

    let stats = vendor.stats();
    assert_eq!(stats.descriptors_created, 0);
    assert_eq!(stats.calls_to("cudnnCreateTensorDescriptor"), 0);
    assert!(vendor.descriptor_log().is_empty());
    Ok(())
}

#[test]
fn binary_failure_at_any_step_leaks_nothing() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let desc = binary_desc(BinaryAlg::Mul, &[2, 3, 4], DataType::F32)?;
    let steps = [
        ("cudnnCreateTensorDescriptor", 0),
        ("cudnnCreateTensorDescriptor", 1),
        ("cudnnCreateTensorDescriptor", 2),
        ("cudnnSetTensorNdDescriptor", 0),
        ("cudnnSetTensorNdDescriptor", 1),
        ("cudnnSetTensorNdDescriptor", 2),
        ("cudnnCreateOpTensorDescriptor", 0),
        ("cudnnSetOpTensorDescriptor", 0),
    ];
    for (call, skip) in steps {
        vendor.fail_call(call, skip, DNN_STATUS_BAD_PARAM);
        let err = BinaryPrimitive::new(&desc, &engine).unwrap_err();
        assert_eq!(
            err,
            BridgeError::VendorCallFailed {
                call: call.to_string(),
                status: DNN_STATUS_BAD_PARAM
            },
            "{call} after {skip} successes"
        );
        assert_eq!(vendor.live_descriptors(), 0, "{call} after {skip} successes");
    }
    let stats = vendor.stats();
    assert_eq!(stats.descriptors_created, stats.descriptors_destroyed);
    Ok(())
}

#[test]
fn lrn_backward_failure_at_any_step_leaks_nothing() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let desc = lrn_backward_desc(LrnAlg::AcrossChannels)?;
    let mut steps: Vec<(&str, usize)> = Vec::new();
    for skip in 0..4 {
        steps.push(("cudnnCreateTensorDescriptor", skip));
        steps.push(("cudnnSetTensorNdDescriptor", skip));
    }
    steps.push(("cudnnCreateLRNDescriptor", 0));
    steps.push(("cudnnSetLRNDescriptor", 0));

    for (call, skip) in steps {
        vendor.fail_call(call, skip, DNN_STATUS_BAD_PARAM);
        assert!(LrnBackwardPrimitive::new(&desc, &engine).is_err());
        assert_eq!(vendor.live_descriptors(), 0, "{call} after {skip} successes");
    }
    Ok(())
}

#[test]
fn descriptor_allocation_failure_reports_out_of_memory() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let desc = binary_desc(BinaryAlg::Max, &[4, 4], DataType::F32)?;
    vendor.fail_call("cudnnCreateOpTensorDescriptor", 0, DNN_STATUS_ALLOC_FAILED);
    let err = BinaryPrimitive::new(&desc, &engine).unwrap_err();
    assert!(matches!(err, BridgeError::OutOfMemory(_)), "{err:?}");
    assert_eq!(vendor.live_descriptors(), 0);

    // The fault fires once; the next compilation succeeds.
    let primitive = BinaryPrimitive::new(&desc, &engine)?;
    assert_eq!(primitive.compiled().descriptor_count(), 4);
    Ok(())
}
