//! Stream adapter: a managed queue paired with a native vendor stream and the per-stream
//! vendor handles bound to it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use primbridge::{
    Access, BridgeError, BridgeResult, DevicePtr, Event, InteropHandler, ManagedBuffer, Queue,
};

use crate::api::{
    BlasLibrary, DnnLibrary, RawBlasHandle, RawContext, RawDnnHandle, RawStream,
};
use crate::engine::CudnnEngine;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(0);

struct DnnHandle {
    dnn: Arc<dyn DnnLibrary>,
    raw: RawDnnHandle,
}

impl Drop for DnnHandle {
    fn drop(&mut self) {
        if let Err(err) = self.dnn.destroy_handle(self.raw) {
            tracing::warn!(error = %err, "failed to destroy cuDNN handle");
        }
    }
}

struct BlasHandle {
    blas: Arc<dyn BlasLibrary>,
    raw: RawBlasHandle,
}

impl Drop for BlasHandle {
    fn drop(&mut self) {
        if let Err(err) = self.blas.destroy_handle(self.raw) {
            tracing::warn!(error = %err, "failed to destroy cuBLAS handle");
        }
    }
}

/// Context and native stream a stream's handles are bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContextBinding {
    context: RawContext,
    stream: RawStream,
}

/// Execution stream of a [`CudnnEngine`].
///
/// The cuDNN handle is created with the stream; the cuBLAS handle on first use. Both are
/// attached to this stream's native stream and are never shared with other streams.
pub struct CudnnStream {
    id: u64,
    engine: CudnnEngine,
    queue: Queue,
    native: RawStream,
    binding: OnceLock<ContextBinding>,
    dnn: OnceLock<Result<DnnHandle, BridgeError>>,
    blas: OnceLock<Result<BlasHandle, BridgeError>>,
}

impl fmt::Debug for CudnnStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CudnnStream")
            .field("id", &self.id)
            .field("native", &self.native)
            .field("binding", &self.binding.get())
            .finish()
    }
}

impl CudnnStream {
    /// Creates the queue and native stream, binds them to the engine context and derives
    /// the cuDNN handle. Any failure aborts creation.
    pub fn create(engine: &CudnnEngine) -> BridgeResult<Self> {
        let id = NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed);
        let queue = Queue::new(format!("cudnn-{id}"))
            .map_err(|err| err.into_initialization_failure("stream queue"))?;
        let native = {
            let _ctx = engine.enter_context()?;
            engine
                .driver()
                .create_stream()
                .map_err(|err| BridgeError::from(err).into_initialization_failure("native stream"))?
        };

        let stream = Self {
            id,
            engine: engine.clone(),
            queue,
            native,
            binding: OnceLock::new(),
            dnn: OnceLock::new(),
            blas: OnceLock::new(),
        };
        stream.bind_to_context();
        stream
            .dnn_handle()
            .map_err(|err| err.into_initialization_failure("cuDNN handle"))?;
        tracing::debug!(stream = id, native = native.0, "created stream");
        Ok(stream)
    }

    /// Records the context and native stream every handle of this stream is bound to.
    /// Runs at most once.
    fn bind_to_context(&self) -> ContextBinding {
        *self.binding.get_or_init(|| ContextBinding {
            context: self.engine.native_context(),
            stream: self.native,
        })
    }

    /// The stream's cuDNN handle, created on first use.
    pub fn dnn_handle(&self) -> BridgeResult<RawDnnHandle> {
        match self.dnn.get_or_init(|| self.create_dnn_handle()) {
            Ok(handle) => Ok(handle.raw),
            Err(err) => Err(err.clone()),
        }
    }

    /// The stream's cuBLAS handle, created on first use.
    pub fn blas_handle(&self) -> BridgeResult<RawBlasHandle> {
        match self.blas.get_or_init(|| self.create_blas_handle()) {
            Ok(handle) => Ok(handle.raw),
            Err(err) => Err(err.clone()),
        }
    }

    fn create_dnn_handle(&self) -> BridgeResult<DnnHandle> {
        let binding = self.bind_to_context();
        let dnn = Arc::clone(self.engine.dnn());
        let _ctx = self.engine.enter_context()?;
        let handle = DnnHandle {
            raw: dnn.create_handle()?,
            dnn,
        };
        handle.dnn.set_stream(handle.raw, binding.stream)?;
        tracing::debug!(stream = self.id, handle = handle.raw.0, "created cuDNN handle");
        Ok(handle)
    }

    fn create_blas_handle(&self) -> BridgeResult<BlasHandle> {
        let binding = self.bind_to_context();
        let blas = Arc::clone(self.engine.blas());
        let _ctx = self.engine.enter_context()?;
        let handle = BlasHandle {
            raw: blas.create_handle()?,
            blas,
        };
        handle.blas.set_stream(handle.raw, binding.stream)?;
        tracing::debug!(stream = self.id, handle = handle.raw.0, "created cuBLAS handle");
        Ok(handle)
    }

    /// Runs `body` inside an interop region over `accesses`.
    ///
    /// Entry waits for pending managed work on the referenced buffers. The body runs on the
    /// calling thread with the engine context current; vendor work it issues has finished
    /// on the native stream when this returns.
    pub fn run_interop<F, R>(&self, accesses: &[Access], body: F) -> BridgeResult<R>
    where
        F: FnOnce(&InteropContext<'_>) -> BridgeResult<R>,
    {
        let dnn_handle = self.dnn_handle()?;
        self.queue.interop(accesses, |handler| {
            let _ctx = self.engine.enter_context()?;
            tracing::debug!(stream = self.id, buffers = accesses.len(), "interop region");
            let interop = InteropContext {
                handler,
                stream: self,
                dnn_handle,
            };
            let result = body(&interop)?;
            self.engine.driver().synchronize_stream(self.native)?;
            Ok(result)
        })
    }

    pub fn upload(&self, buffer: &ManagedBuffer, data: Vec<u8>) -> BridgeResult<Event> {
        self.queue.upload(buffer, data)
    }

    pub fn download(&self, buffer: &ManagedBuffer) -> BridgeResult<Vec<u8>> {
        self.queue.download(buffer)
    }

    /// Blocks until queued managed work and issued vendor work have finished.
    pub fn wait(&self) -> BridgeResult<()> {
        self.queue.wait()?;
        let _ctx = self.engine.enter_context()?;
        Ok(self.engine.driver().synchronize_stream(self.native)?)
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn engine(&self) -> &CudnnEngine {
        &self.engine
    }

    pub fn native_stream(&self) -> RawStream {
        self.native
    }

    pub fn native_context(&self) -> RawContext {
        self.bind_to_context().context
    }
}

impl Drop for CudnnStream {
    fn drop(&mut self) {
        if let Err(err) = self.queue.wait() {
            tracing::warn!(stream = self.id, error = %err, "pending stream work failed");
        }
        let ctx = match self.engine.enter_context() {
            Ok(ctx) => Some(ctx),
            Err(err) => {
                tracing::warn!(stream = self.id, error = %err, "cannot enter context on drop");
                None
            }
        };
        drop(self.blas.take());
        drop(self.dnn.take());
        if let Err(err) = self.engine.driver().destroy_stream(self.native) {
            tracing::warn!(stream = self.id, error = %err, "failed to destroy native stream");
        }
        drop(ctx);
    }
}

/// View of a stream inside an interop region.
pub struct InteropContext<'a> {
    handler: &'a InteropHandler<'a>,
    stream: &'a CudnnStream,
    dnn_handle: RawDnnHandle,
}

impl InteropContext<'_> {
    /// Raw device address of a buffer registered with the region.
    pub fn memory(&self, access: &Access) -> BridgeResult<DevicePtr> {
        self.handler.memory(access)
    }

    pub fn dnn(&self) -> &dyn DnnLibrary {
        self.stream.engine.dnn().as_ref()
    }

    pub fn dnn_handle(&self) -> RawDnnHandle {
        self.dnn_handle
    }

    pub fn blas_handle(&self) -> BridgeResult<RawBlasHandle> {
        self.stream.blas_handle()
    }

    pub fn native_stream(&self) -> RawStream {
        self.stream.native
    }

    pub fn native_context(&self) -> RawContext {
        self.stream.native_context()
    }
}
