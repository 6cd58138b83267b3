use std::fmt;
use std::sync::Arc;

use primbridge::{BridgeError, BridgeResult, DeviceMemory, DevicePtr, ManagedBuffer, MemoryDesc};

use crate::api::{BlasLibrary, DnnLibrary, DriverLibrary, RawContext, VendorLibraries};
use crate::config::EngineConfig;
use crate::context::ScopedContext;
use crate::native;
use crate::stream::CudnnStream;

/// Device context owned by an engine. Managed buffers keep it alive through their memory
/// handle, so the context is destroyed only after the last allocation is released.
struct DeviceContext {
    driver: Arc<dyn DriverLibrary>,
    raw: RawContext,
    ordinal: usize,
}

impl DeviceContext {
    fn enter(&self) -> BridgeResult<ScopedContext> {
        ScopedContext::enter(&self.driver, self.raw)
    }
}

impl DeviceMemory for DeviceContext {
    fn alloc(&self, bytes: usize) -> BridgeResult<DevicePtr> {
        let _ctx = self.enter()?;
        Ok(self.driver.mem_alloc(bytes)?)
    }

    fn free(&self, ptr: DevicePtr) -> BridgeResult<()> {
        let _ctx = self.enter()?;
        Ok(self.driver.mem_free(ptr)?)
    }

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> BridgeResult<()> {
        let _ctx = self.enter()?;
        Ok(self.driver.memcpy_htod(dst, src)?)
    }

    fn download(&self, src: DevicePtr, dst: &mut [u8]) -> BridgeResult<()> {
        let _ctx = self.enter()?;
        self.driver.synchronize_context()?;
        Ok(self.driver.memcpy_dtoh(dst, src)?)
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        match self.driver.destroy_context(self.raw) {
            Ok(()) => tracing::debug!(ordinal = self.ordinal, "destroyed device context"),
            Err(err) => tracing::warn!(
                ordinal = self.ordinal,
                error = %err,
                "failed to destroy device context"
            ),
        }
    }
}

/// A device plus the vendor libraries that drive it.
///
/// Cheap to clone; clones share the device context.
#[derive(Clone)]
pub struct CudnnEngine {
    libs: VendorLibraries,
    context: Arc<DeviceContext>,
}

impl fmt::Debug for CudnnEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudnnEngine")
            .field("libs", &self.libs)
            .field("ordinal", &self.context.ordinal)
            .field("context", &self.context.raw)
            .finish()
    }
}

impl CudnnEngine {
    /// Creates a context on device `ordinal`. The calling thread's current context is left
    /// unchanged.
    pub fn new(libs: VendorLibraries, ordinal: usize) -> BridgeResult<Self> {
        let count = libs
            .driver
            .device_count()
            .map_err(|err| BridgeError::from(err).into_initialization_failure("device query"))?;
        if ordinal >= count {
            return Err(BridgeError::InitializationFailed(format!(
                "device ordinal {ordinal} out of range ({count} devices)"
            )));
        }

        let previous = libs.driver.current_context()?;
        let raw = libs
            .driver
            .create_context(ordinal)
            .map_err(|err| BridgeError::from(err).into_initialization_failure("device context"))?;
        let context = Arc::new(DeviceContext {
            driver: Arc::clone(&libs.driver),
            raw,
            ordinal,
        });
        libs.driver.set_current_context(previous)?;

        tracing::debug!(
            driver = libs.driver.name(),
            dnn = libs.dnn.name(),
            ordinal,
            "created engine"
        );
        Ok(Self { libs, context })
    }

    /// Engine over the dynamically loaded CUDA driver, cuDNN and cuBLAS.
    pub fn native(config: &EngineConfig) -> BridgeResult<Self> {
        let libs = native::load(config)?;
        Self::new(libs, config.device_ordinal)
    }

    pub fn is_native_available() -> bool {
        native::is_available(&EngineConfig::from_env())
    }

    pub fn create_stream(&self) -> BridgeResult<CudnnStream> {
        CudnnStream::create(self)
    }

    pub fn alloc_buffer(&self, bytes: usize) -> BridgeResult<ManagedBuffer> {
        ManagedBuffer::new(self.memory(), bytes)
    }

    pub fn buffer_for(&self, desc: &MemoryDesc) -> BridgeResult<ManagedBuffer> {
        ManagedBuffer::for_desc(self.memory(), desc)
    }

    pub fn memory(&self) -> Arc<dyn DeviceMemory> {
        self.context.clone()
    }

    pub fn libraries(&self) -> &VendorLibraries {
        &self.libs
    }

    pub fn driver(&self) -> &Arc<dyn DriverLibrary> {
        &self.libs.driver
    }

    pub fn dnn(&self) -> &Arc<dyn DnnLibrary> {
        &self.libs.dnn
    }

    pub fn blas(&self) -> &Arc<dyn BlasLibrary> {
        &self.libs.blas
    }

    pub fn device_ordinal(&self) -> usize {
        self.context.ordinal
    }

    pub fn native_context(&self) -> RawContext {
        self.context.raw
    }

    pub(crate) fn enter_context(&self) -> BridgeResult<ScopedContext> {
        self.context.enter()
    }
}
