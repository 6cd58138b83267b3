use std::collections::HashSet;

use anyhow::Result;
use primbridge::BridgeError;
use primbridge_cudnn::api::{
    BLAS_STATUS_NOT_INITIALIZED, CUDA_ERROR_OUT_OF_MEMORY, DNN_STATUS_ALLOC_FAILED,
    DNN_STATUS_BAD_PARAM, DNN_STATUS_NOT_INITIALIZED,
};
use primbridge_cudnn::CudnnEngine;
use primbridge_vendor_ref::RefVendor;

#[test]
fn dnn_handle_is_bound_to_the_native_stream_and_engine_context() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    let handle = stream.dnn_handle()?;

    assert_eq!(stream.native_context(), engine.native_context());
    assert_eq!(
        vendor.dnn_binding(handle),
        Some((engine.native_context(), Some(stream.native_stream())))
    );
    assert_eq!(vendor.live_dnn_handles(), 1);
    assert_eq!(vendor.stats().calls_to("cudnnCreate"), 1);
    Ok(())
}

#[test]
fn blas_handle_is_created_on_first_use() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;
    assert_eq!(vendor.live_blas_handles(), 0);

    let first = stream.blas_handle()?;
    let second = stream.blas_handle()?;
    assert_eq!(first, second);
    assert_eq!(vendor.stats().blas_handles_created, 1);
    assert_eq!(
        vendor.blas_bindings(),
        vec![(engine.native_context(), Some(stream.native_stream()))]
    );
    Ok(())
}

#[test]
fn dropping_a_stream_releases_its_vendor_objects() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    {
        let stream = engine.create_stream()?;
        stream.blas_handle()?;
        assert_eq!(vendor.live_streams(), 1);
    }
    assert_eq!(vendor.live_streams(), 0);
    assert_eq!(vendor.live_dnn_handles(), 0);
    assert_eq!(vendor.live_blas_handles(), 0);
    assert_eq!(vendor.live_contexts(), 1);

    drop(engine);
    assert_eq!(vendor.live_contexts(), 0);
    Ok(())
}

#[test]
fn stream_creation_failures_are_reported_and_unwound() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;

    vendor.fail_call("cuStreamCreate", 0, CUDA_ERROR_OUT_OF_MEMORY);
    let err = engine.create_stream().unwrap_err();
    assert!(matches!(err, BridgeError::OutOfMemory(_)), "{err:?}");

    vendor.fail_call("cudnnCreate", 0, DNN_STATUS_NOT_INITIALIZED);
    let err = engine.create_stream().unwrap_err();
    assert!(matches!(err, BridgeError::InitializationFailed(_)), "{err:?}");

    vendor.fail_call("cudnnCreate", 0, DNN_STATUS_ALLOC_FAILED);
    let err = engine.create_stream().unwrap_err();
    assert!(matches!(err, BridgeError::OutOfMemory(_)), "{err:?}");

    vendor.fail_call("cudnnSetStream", 0, DNN_STATUS_BAD_PARAM);
    let err = engine.create_stream().unwrap_err();
    assert!(matches!(err, BridgeError::InitializationFailed(_)), "{err:?}");

    assert_eq!(vendor.live_streams(), 0);
    assert_eq!(vendor.live_dnn_handles(), 0);
    Ok(())
}

#[test]
fn failed_blas_handle_creation_is_cached() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let stream = engine.create_stream()?;

    vendor.fail_call("cublasCreate_v2", 0, BLAS_STATUS_NOT_INITIALIZED);
    let first = stream.blas_handle().unwrap_err();
    let second = stream.blas_handle().unwrap_err();
    assert_eq!(first, second);
    assert_eq!(vendor.stats().calls_to("cublasCreate_v2"), 1);
    assert_eq!(vendor.live_blas_handles(), 0);
    Ok(())
}

#[test]
fn streams_never_share_handles() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    let streams = (0..3)
        .map(|_| engine.create_stream())
        .collect::<Result<Vec<_>, _>>()?;
    let handles = streams
        .iter()
        .map(|stream| stream.dnn_handle())
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(handles.iter().collect::<HashSet<_>>().len(), 3);
    for (stream, handle) in streams.iter().zip(&handles) {
        let binding = vendor.dnn_binding(*handle);
        assert_eq!(binding.and_then(|(_, native)| native), Some(stream.native_stream()));
    }
    Ok(())
}

#[test]
fn engine_selects_device_by_ordinal() -> Result<()> {
    let vendor = RefVendor::with_devices(2);
    let second = CudnnEngine::new(vendor.libraries(), 1)?;
    assert_eq!(second.device_ordinal(), 1);

    let err = CudnnEngine::new(vendor.libraries(), 2).unwrap_err();
    assert!(matches!(err, BridgeError::InitializationFailed(_)), "{err:?}");
    assert_eq!(vendor.live_contexts(), 1);
    Ok(())
}

#[test]
fn engine_and_stream_creation_leave_the_thread_context_unchanged() -> Result<()> {
    let vendor = RefVendor::new();
    let engine = vendor.engine()?;
    assert_eq!(engine.driver().current_context()?, None);
    let stream = engine.create_stream()?;
    stream.blas_handle()?;
    assert_eq!(engine.driver().current_context()?, None);
    Ok(())
}
