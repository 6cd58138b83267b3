use serde::{Deserialize, Serialize};

/// Engine construction options.
///
/// Library fields override the soname probe of the corresponding vendor library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub device_ordinal: usize,
    /// The driver is loaded once per process. Later configurations naming a different
    /// library fail with `InitializationFailed`; `None` accepts whichever driver is loaded.
    pub cuda_library: Option<String>,
    pub cudnn_library: Option<String>,
    pub cublas_library: Option<String>,
}

impl EngineConfig {
    /// Reads `PRIMBRIDGE_DEVICE` and the `PRIMBRIDGE_*_LIB` overrides.
    pub fn from_env() -> Self {
        Self {
            device_ordinal: primbridge::env::device_ordinal(),
            cuda_library: primbridge::env::cuda_library_override().map(str::to_string),
            cudnn_library: primbridge::env::cudnn_library_override().map(str::to_string),
            cublas_library: primbridge::env::cublas_library_override().map(str::to_string),
        }
    }

    pub fn with_device_ordinal(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }
}
