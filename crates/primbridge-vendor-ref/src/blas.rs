use std::sync::Arc;

use primbridge_cudnn::api::{
    BlasLibrary, RawBlasHandle, RawStream, VendorError, VendorLibraryKind, VendorResult,
    BLAS_STATUS_INVALID_VALUE, BLAS_STATUS_NOT_INITIALIZED,
};

use crate::state::HandleState;
use crate::Shared;

const LIB: VendorLibraryKind = VendorLibraryKind::Blas;

pub(crate) struct RefBlas {
    shared: Arc<Shared>,
}

impl RefBlas {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl BlasLibrary for RefBlas {
    fn name(&self) -> &str {
        "ref-blas"
    }

    fn create_handle(&self) -> VendorResult<RawBlasHandle> {
        const CALL: &str = "cublasCreate_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        let context = state.require_context(LIB, CALL, BLAS_STATUS_NOT_INITIALIZED)?;
        let id = state.next_id();
        state.blas_handles.insert(
            id,
            HandleState {
                context,
                stream: None,
            },
        );
        state.stats.blas_handles_created += 1;
        Ok(RawBlasHandle(id))
    }

    fn destroy_handle(&self, handle: RawBlasHandle) -> VendorResult<()> {
        const CALL: &str = "cublasDestroy_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        if state.blas_handles.remove(&handle.0).is_none() {
            return Err(VendorError::new(LIB, CALL, BLAS_STATUS_NOT_INITIALIZED));
        }
        state.stats.blas_handles_destroyed += 1;
        Ok(())
    }

    fn set_stream(&self, handle: RawBlasHandle, stream: RawStream) -> VendorResult<()> {
        const CALL: &str = "cublasSetStream_v2";
        let mut state = self.shared.enter(LIB, CALL)?;
        let stream_ctx = state.streams.get(&stream.0).copied();
        let entry = state
            .blas_handles
            .get_mut(&handle.0)
            .ok_or_else(|| VendorError::new(LIB, CALL, BLAS_STATUS_NOT_INITIALIZED))?;
        if stream_ctx != Some(entry.context) {
            return Err(VendorError::new(LIB, CALL, BLAS_STATUS_INVALID_VALUE));
        }
        entry.stream = Some(stream.0);
        Ok(())
    }
}
