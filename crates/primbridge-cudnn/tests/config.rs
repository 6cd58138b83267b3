use anyhow::Result;
use primbridge::BridgeError;
use primbridge_cudnn::api::{VendorError, VendorLibraryKind, CUDA_ERROR_OUT_OF_MEMORY};
use primbridge_cudnn::{native, EngineConfig};

// Every test in this binary that loads the driver names this library, so whichever runs
// first fixes the process-wide driver to it.
const MISSING_DRIVER: &str = "/nonexistent/libcuda.so";

#[test]
fn config_fields_default_when_missing() -> Result<()> {
    let config: EngineConfig = serde_json::from_str(r#"{ "cudnn_library": "libcudnn.so.9" }"#)?;
    assert_eq!(config.device_ordinal, 0);
    assert_eq!(config.cudnn_library.as_deref(), Some("libcudnn.so.9"));
    assert!(config.cuda_library.is_none());

    let back: EngineConfig = serde_json::from_str(&serde_json::to_string(&config)?)?;
    assert_eq!(back, config);
    assert_eq!(config.with_device_ordinal(3).device_ordinal, 3);
    Ok(())
}

#[test]
fn missing_libraries_fail_initialization() {
    let config = EngineConfig {
        cuda_library: Some(MISSING_DRIVER.into()),
        cudnn_library: Some("/nonexistent/libcudnn.so".into()),
        cublas_library: Some("/nonexistent/libcublas.so".into()),
        ..EngineConfig::default()
    };
    assert!(matches!(
        native::load(&config),
        Err(BridgeError::InitializationFailed(_))
    ));
    assert!(!native::is_available(&config));
}

#[test]
fn driver_override_cannot_change_after_first_load() {
    let first = EngineConfig {
        cuda_library: Some(MISSING_DRIVER.into()),
        ..EngineConfig::default()
    };
    let Err(BridgeError::InitializationFailed(msg)) = native::load(&first) else {
        panic!("loading a missing driver must fail initialization");
    };
    assert!(msg.contains("unavailable"), "{msg}");

    let other = EngineConfig {
        cuda_library: Some("/nonexistent/other/libcuda.so".into()),
        ..EngineConfig::default()
    };
    let Err(BridgeError::InitializationFailed(msg)) = native::load(&other) else {
        panic!("a different driver override must be rejected");
    };
    assert!(msg.contains("already initialized"), "{msg}");
    assert!(msg.contains(MISSING_DRIVER), "{msg}");
}

#[test]
fn vendor_allocation_failures_map_to_out_of_memory() {
    let oom = VendorError::new(
        VendorLibraryKind::Driver,
        "cuMemAlloc_v2",
        CUDA_ERROR_OUT_OF_MEMORY,
    );
    assert!(matches!(BridgeError::from(oom), BridgeError::OutOfMemory(_)));

    let bad = VendorError::new(VendorLibraryKind::Dnn, "cudnnOpTensor", 3);
    assert_eq!(
        BridgeError::from(bad),
        BridgeError::VendorCallFailed {
            call: "cudnnOpTensor".into(),
            status: 3
        }
    );
}
