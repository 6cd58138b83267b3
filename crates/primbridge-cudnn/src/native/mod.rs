//! Dynamically loaded vendor libraries.

mod cublas;
mod cudnn;
mod driver;

use std::sync::{Arc, OnceLock};

use libloading::Library;
use primbridge::{BridgeError, BridgeResult};

use crate::api::VendorLibraries;
use crate::config::EngineConfig;

pub use cublas::NativeBlas;
pub use cudnn::NativeDnn;
pub use driver::NativeDriver;

/// The process-wide driver together with the library override it was loaded from.
struct SharedDriver {
    requested: Option<String>,
    driver: Result<Arc<NativeDriver>, String>,
}

static NATIVE_DRIVER: OnceLock<SharedDriver> = OnceLock::new();

/// Loads the driver, primitive and linear-algebra libraries.
///
/// The driver is process-wide and initialized once; the other libraries are loaded per
/// call so configuration overrides take effect.
pub fn load(config: &EngineConfig) -> BridgeResult<VendorLibraries> {
    let driver = shared_driver(config)?;
    let dnn = Arc::new(NativeDnn::load(config.cudnn_library.as_deref())?);
    let blas = Arc::new(NativeBlas::load(config.cublas_library.as_deref())?);
    Ok(VendorLibraries {
        driver,
        dnn,
        blas,
    })
}

pub fn is_available(config: &EngineConfig) -> bool {
    load(config).is_ok()
}

fn shared_driver(config: &EngineConfig) -> BridgeResult<Arc<NativeDriver>> {
    let shared = NATIVE_DRIVER.get_or_init(|| SharedDriver {
        requested: config.cuda_library.clone(),
        driver: NativeDriver::load(config.cuda_library.as_deref())
            .map(Arc::new)
            .map_err(|err| err.to_string()),
    });
    if let Some(requested) = config.cuda_library.as_deref() {
        if shared.requested.as_deref() != Some(requested) {
            return Err(BridgeError::InitializationFailed(format!(
                "CUDA driver is already initialized from {:?}; cannot switch to {requested:?}",
                shared.requested.as_deref().unwrap_or("the default library search")
            )));
        }
    }
    match &shared.driver {
        Ok(driver) => Ok(Arc::clone(driver)),
        Err(msg) => Err(BridgeError::InitializationFailed(format!(
            "CUDA driver unavailable: {msg}"
        ))),
    }
}

fn load_library(
    what: &str,
    override_name: Option<&str>,
    candidates: &[&str],
) -> BridgeResult<Library> {
    let tried: Vec<&str> = match override_name {
        Some(name) => vec![name],
        None => candidates.to_vec(),
    };

    for candidate in &tried {
        // SAFETY: Dynamic library probe only; no symbols are invoked at this stage.
        if let Ok(lib) = unsafe { Library::new(candidate) } {
            tracing::debug!(library = what, path = candidate, "loaded vendor library");
            return Ok(lib);
        }
    }

    Err(BridgeError::InitializationFailed(format!(
        "failed to load {what} library (tried {})",
        tried.join(", ")
    )))
}

fn load_symbol<T: Copy>(lib: &Library, what: &str, name: &'static [u8]) -> BridgeResult<T> {
    // SAFETY: Caller provides the symbol type declared by the vendor API.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        BridgeError::InitializationFailed(format!(
            "failed to resolve {what} symbol {}: {err}",
            String::from_utf8_lossy(name).trim_end_matches('\0')
        ))
    })?;
    Ok(*sym)
}
