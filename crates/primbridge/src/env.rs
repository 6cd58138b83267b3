use std::env;
use std::sync::OnceLock;

static CUDA_LIB: OnceLock<Option<String>> = OnceLock::new();
static CUDNN_LIB: OnceLock<Option<String>> = OnceLock::new();
static CUBLAS_LIB: OnceLock<Option<String>> = OnceLock::new();
static DEVICE_ORDINAL: OnceLock<usize> = OnceLock::new();

fn non_empty(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

/// Path or soname overriding the CUDA driver library probe (`PRIMBRIDGE_CUDA_LIB`).
pub fn cuda_library_override() -> Option<&'static str> {
    CUDA_LIB
        .get_or_init(|| non_empty("PRIMBRIDGE_CUDA_LIB"))
        .as_deref()
}

/// Path or soname overriding the cuDNN library probe (`PRIMBRIDGE_CUDNN_LIB`).
pub fn cudnn_library_override() -> Option<&'static str> {
    CUDNN_LIB
        .get_or_init(|| non_empty("PRIMBRIDGE_CUDNN_LIB"))
        .as_deref()
}

/// Path or soname overriding the cuBLAS library probe (`PRIMBRIDGE_CUBLAS_LIB`).
pub fn cublas_library_override() -> Option<&'static str> {
    CUBLAS_LIB
        .get_or_init(|| non_empty("PRIMBRIDGE_CUBLAS_LIB"))
        .as_deref()
}

/// Device ordinal engines bind to by default (`PRIMBRIDGE_DEVICE`, default 0).
pub fn device_ordinal() -> usize {
    *DEVICE_ORDINAL.get_or_init(|| {
        non_empty("PRIMBRIDGE_DEVICE")
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    })
}
