use std::sync::Arc;

use primbridge::DevicePtr;
use primbridge_cudnn::api::{
    DriverLibrary, RawContext, RawStream, VendorError, VendorLibraryKind, VendorResult,
    CUDA_ERROR_INVALID_CONTEXT, CUDA_ERROR_INVALID_DEVICE, CUDA_ERROR_INVALID_HANDLE,
    CUDA_ERROR_INVALID_VALUE,
};

use crate::Shared;

const LIB: VendorLibraryKind = VendorLibraryKind::Driver;

fn error(call: &'static str, status: i32) -> VendorError {
    VendorError::new(LIB, call, status)
}

pub(crate) struct RefDriver {
    shared: Arc<Shared>,
}

impl RefDriver {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl DriverLibrary for RefDriver {
    fn name(&self) -> &str {
        "ref-driver"
    }

    fn device_count(&self) -> VendorResult<usize> {
        let state = self.shared.enter(LIB, "cuDeviceGetCount")?;
        Ok(state.devices())
    }

    fn create_context(&self, ordinal: usize) -> VendorResult<RawContext> {
        const CALL: &str = "cuCtxCreate_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        if ordinal >= state.devices() {
            return Err(error(CALL, CUDA_ERROR_INVALID_DEVICE));
        }
        let id = state.next_id();
        state.contexts.insert(id, ordinal);
        state.set_current_context(Some(id));
        state.stats.contexts_created += 1;
        Ok(RawContext(id))
    }

    fn destroy_context(&self, ctx: RawContext) -> VendorResult<()> {
        const CALL: &str = "cuCtxDestroy_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        if !state.destroy_context(ctx.0) {
            return Err(error(CALL, CUDA_ERROR_INVALID_CONTEXT));
        }
        state.stats.contexts_destroyed += 1;
        Ok(())
    }

    fn current_context(&self) -> VendorResult<Option<RawContext>> {
        let state = self.shared.enter(LIB, "cuCtxGetCurrent")?;
        Ok(state.current_context().map(RawContext))
    }

    fn set_current_context(&self, ctx: Option<RawContext>) -> VendorResult<()> {
        const CALL: &str = "cuCtxSetCurrent";
        let mut state = self.shared.enter(LIB, CALL)?;
        if let Some(ctx) = ctx {
            state.ensure_context(ctx.0, CALL)?;
        }
        state.set_current_context(ctx.map(|ctx| ctx.0));
        Ok(())
    }

    fn synchronize_context(&self) -> VendorResult<()> {
        const CALL: &str = "cuCtxSynchronize";
        let mut state = self.shared.enter(LIB, CALL)?;
        state.require_context(LIB, CALL, CUDA_ERROR_INVALID_CONTEXT)?;
        state.stats.context_syncs += 1;
        Ok(())
    }

    fn create_stream(&self) -> VendorResult<RawStream> {
        const CALL: &str = "cuStreamCreate";
        let mut state = self.shared.enter(LIB, CALL)?;
        let ctx = state.require_context(LIB, CALL, CUDA_ERROR_INVALID_CONTEXT)?;
        let id = state.next_id();
        state.streams.insert(id, ctx);
        state.stats.streams_created += 1;
        Ok(RawStream(id))
    }

    fn destroy_stream(&self, stream: RawStream) -> VendorResult<()> {
        const CALL: &str = "cuStreamDestroy_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.streams.remove(&stream.0).is_none() {
            return Err(error(CALL, CUDA_ERROR_INVALID_HANDLE));
        }
        state.stats.streams_destroyed += 1;
        Ok(())
    }

    fn synchronize_stream(&self, stream: RawStream) -> VendorResult<()> {
        const CALL: &str = "cuStreamSynchronize";
        let mut state = self.shared.enter(LIB, CALL)?;
        if !state.streams.contains_key(&stream.0) {
            return Err(error(CALL, CUDA_ERROR_INVALID_HANDLE));
        }
        state.stats.stream_syncs += 1;
        Ok(())
    }

    fn mem_alloc(&self, bytes: usize) -> VendorResult<DevicePtr> {
        const CALL: &str = "cuMemAlloc_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        let ctx = state.require_context(LIB, CALL, CUDA_ERROR_INVALID_CONTEXT)?;
        if bytes == 0 {
            return Err(error(CALL, CUDA_ERROR_INVALID_VALUE));
        }
        Ok(state.allocate(ctx, bytes))
    }

    fn mem_free(&self, ptr: DevicePtr) -> VendorResult<()> {
        const CALL: &str = "cuMemFree_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        if !state.free(ptr) {
            return Err(error(CALL, CUDA_ERROR_INVALID_VALUE));
        }
        Ok(())
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> VendorResult<()> {
        const CALL: &str = "cuMemcpyHtoD_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        state.copy_in(dst, src, CALL)
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> VendorResult<()> {
        const CALL: &str = "cuMemcpyDtoH_v2";
        let state = self.shared.enter(LIB, CALL)?;
        state.copy_out(dst, src, CALL)
    }
}
