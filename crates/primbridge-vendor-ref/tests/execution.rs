use std::thread;

use anyhow::Result;
use primbridge::{
    Arg, BinaryAlg, BinaryDesc, BridgeError, DataType, ExecCtx, LrnAlg, LrnDesc, ManagedBuffer,
    MemoryDesc, PrimitiveAttr, PropKind,
};
use primbridge_cudnn::api::DNN_STATUS_EXECUTION_FAILED;
use primbridge_cudnn::{BinaryPrimitive, CudnnEngine, LrnForwardPrimitive};
use primbridge_vendor_ref::{KernelLaunch, RefVendor};

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn f32_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

struct AddFixture {
    primitive: BinaryPrimitive,
    src0: ManagedBuffer,
    src1: ManagedBuffer,
    dst: ManagedBuffer,
}

impl AddFixture {
    fn new(engine: &CudnnEngine) -> Result<Self> {
        let md = MemoryDesc::contiguous([2, 2, 2], DataType::F32)?;
        let desc = BinaryDesc::new(
            BinaryAlg::Add,
            md.clone(),
            md.clone(),
            md.clone(),
            PrimitiveAttr::new(),
        )?;
        Ok(Self {
            primitive: BinaryPrimitive::new(&desc, engine)?,
            src0: engine.buffer_for(&md)?,
            src1: engine.buffer_for(&md)?,
            dst: engine.buffer_for(&md)?,
        })
    }

    fn ctx(&self) -> ExecCtx {
        ExecCtx::new()
            .with_arg(Arg::Src0, &self.src0)
            .with_arg(Arg::Src1, &self.src1)
            .with_arg(Arg::Dst, &self.dst)
    }
}

#[test]
fn kernels_launch_on_the_stream_handle() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let fixture = AddFixture::new(&engine)?;
    fixture.primitive.execute(&fixture.ctx(), &stream)?;

    assert_eq!(
        vendor.launches(),
        vec![KernelLaunch {
            call: "cudnnOpTensor",
            handle: stream.dnn_handle()?.0,
            stream: Some(stream.native_stream().0),
            context: engine.native_context().0,
        }]
    );
    Ok(())
}

#[test]
fn execution_synchronizes_the_native_stream_and_restores_context() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let fixture = AddFixture::new(&engine)?;
    let before = vendor.stats().stream_syncs;

    for _ in 0..3 {
        fixture.primitive.execute(&fixture.ctx(), &stream)?;
    }
    assert_eq!(vendor.stats().stream_syncs, before + 3);
    assert_eq!(engine.driver().current_context()?, None);
    Ok(())
}

#[test]
fn training_forward_copies_dst_after_normalizing() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let md = MemoryDesc::contiguous([1, 3, 2, 2], DataType::F32)?;
    let src = engine.buffer_for(&md)?;
    let dst = engine.buffer_for(&md)?;
    let ws = engine.buffer_for(&md)?;

    let lrn = |prop_kind| {
        LrnDesc::forward(prop_kind, LrnAlg::AcrossChannels, md.clone(), 3, 1e-4, 0.75, 1.0)
    };

    let inference = LrnForwardPrimitive::new(&lrn(PropKind::ForwardInference)?, &engine)?;
    let ctx = ExecCtx::new().with_arg(Arg::SRC, &src).with_arg(Arg::Dst, &dst);
    inference.execute(&ctx, &stream)?;
    let calls: Vec<&str> = vendor.launches().iter().map(|launch| launch.call).collect();
    assert_eq!(calls, ["cudnnLRNCrossChannelForward"]);

    let training = LrnForwardPrimitive::new(&lrn(PropKind::ForwardTraining)?, &engine)?;
    let ctx = ExecCtx::new()
        .with_arg(Arg::SRC, &src)
        .with_arg(Arg::Dst, &dst)
        .with_arg(Arg::Workspace, &ws);
    training.execute(&ctx, &stream)?;
    let calls: Vec<&str> = vendor.launches().iter().map(|launch| launch.call).collect();
    assert_eq!(
        calls,
        [
            "cudnnLRNCrossChannelForward",
            "cudnnLRNCrossChannelForward",
            "cudnnAddTensor"
        ]
    );
    Ok(())
}

#[test]
fn zero_extent_execution_never_reaches_the_vendor() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let md = MemoryDesc::contiguous([3, 0, 2], DataType::F32)?;
    let desc = BinaryDesc::new(BinaryAlg::Mul, md.clone(), md.clone(), md, PrimitiveAttr::new())?;
    let primitive = BinaryPrimitive::new(&desc, &engine)?;
    let before = vendor.stats();

    primitive.execute(&ExecCtx::new(), &stream)?;
    let after = vendor.stats();
    assert_eq!(after.kernel_launches, 0);
    assert_eq!(after.stream_syncs, before.stream_syncs);
    assert_eq!(after.descriptors_created, 0);
    Ok(())
}

#[test]
fn vendor_failure_during_execution_is_reported_and_recoverable() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let fixture = AddFixture::new(&engine)?;

    vendor.fail_call("cudnnOpTensor", 0, DNN_STATUS_EXECUTION_FAILED);
    let err = fixture.primitive.execute(&fixture.ctx(), &stream).unwrap_err();
    assert_eq!(
        err,
        BridgeError::VendorCallFailed {
            call: "cudnnOpTensor".to_string(),
            status: DNN_STATUS_EXECUTION_FAILED,
        }
    );
    assert_eq!(engine.driver().current_context()?, None);

    fixture.primitive.execute(&fixture.ctx(), &stream)?;
    fixture.dst.wait_idle()?;
    Ok(())
}

#[test]
fn execution_orders_after_queued_uploads() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let fixture = AddFixture::new(&engine)?;
    let lhs: Vec<f32> = (0..8).map(|value| value as f32).collect();
    let rhs = vec![0.5f32; 8];

    // Uploads are queued and not awaited before execution.
    stream.upload(&fixture.src0, f32_bytes(&lhs))?;
    stream.upload(&fixture.src1, f32_bytes(&rhs))?;
    fixture.primitive.execute(&fixture.ctx(), &stream)?;

    let out = f32_values(&stream.download(&fixture.dst)?);
    let expected: Vec<f32> = lhs.iter().map(|value| value + 0.5).collect();
    assert_eq!(out, expected);
    Ok(())
}

#[test]
fn streams_used_from_another_thread_make_their_context_current() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let fixture = AddFixture::new(&engine)?;

    thread::scope(|scope| {
        scope
            .spawn(|| fixture.primitive.execute(&fixture.ctx(), &stream))
            .join()
            .expect("worker thread panicked")
    })?;
    assert_eq!(vendor.stats().kernel_launches, 1);
    Ok(())
}

#[test]
fn buffers_keep_the_device_context_alive() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let buffer = engine.alloc_buffer(128)?;
    drop(engine);
    assert_eq!(vendor.live_contexts(), 1);

    drop(buffer);
    let stats = vendor.stats();
    assert_eq!(vendor.live_contexts(), 0);
    assert_eq!(stats.live_allocations, 0);
    assert_eq!(stats.leaked_allocations, 0);
    Ok(())
}
