//! Host-memory reference vendor.
//!
//! Implements the driver, primitive and linear-algebra library traits over an in-process
//! device arena. Every object the bridge creates is tracked, so tests can check lifetimes,
//! bindings and call ordering, and any call can be armed to fail with a chosen status.

mod blas;
mod dnn;
mod driver;
mod element;
mod kernels;
mod state;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use primbridge::BridgeResult;
use primbridge_cudnn::api::{
    RawContext, RawDnnHandle, RawStream, VendorLibraries, VendorLibraryKind, VendorResult,
    VendorStatus,
};
use primbridge_cudnn::CudnnEngine;

use state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    Tensor,
    OpTensor,
    Lrn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorEvent {
    Created { kind: DescriptorKind, id: usize },
    Destroyed { kind: DescriptorKind, id: usize },
}

/// One kernel issued through a primitive-library handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunch {
    pub call: &'static str,
    pub handle: usize,
    pub stream: Option<usize>,
    pub context: usize,
}

/// Counters over the vendor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorStats {
    pub calls: BTreeMap<String, usize>,
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    pub streams_created: usize,
    pub streams_destroyed: usize,
    pub dnn_handles_created: usize,
    pub dnn_handles_destroyed: usize,
    pub blas_handles_created: usize,
    pub blas_handles_destroyed: usize,
    pub descriptors_created: usize,
    pub descriptors_destroyed: usize,
    pub allocations: usize,
    pub live_allocations: usize,
    /// Allocations still alive when their context was destroyed.
    pub leaked_allocations: usize,
    pub kernel_launches: usize,
    pub context_syncs: usize,
    pub stream_syncs: usize,
}

impl VendorStats {
    pub fn calls_to(&self, call: &str) -> usize {
        self.calls.get(call).copied().unwrap_or(0)
    }
}

pub(crate) struct Shared {
    state: Mutex<State>,
}

impl Shared {
    fn inspect(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Locks the state for `call`, failing it if a fault is armed.
    pub(crate) fn enter(
        &self,
        library: VendorLibraryKind,
        call: &'static str,
    ) -> VendorResult<MutexGuard<'_, State>> {
        let mut state = self.inspect();
        state.enter(library, call)?;
        Ok(state)
    }
}

/// Shared handle to one reference vendor instance. Clones observe the same state.
#[derive(Clone)]
pub struct RefVendor {
    shared: Arc<Shared>,
}

impl Default for RefVendor {
    fn default() -> Self {
        Self::new()
    }
}

impl RefVendor {
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    pub fn with_devices(devices: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(devices)),
            }),
        }
    }

    pub fn libraries(&self) -> VendorLibraries {
        VendorLibraries {
            driver: Arc::new(driver::RefDriver::new(Arc::clone(&self.shared))),
            dnn: Arc::new(dnn::RefDnn::new(Arc::clone(&self.shared))),
            blas: Arc::new(blas::RefBlas::new(Arc::clone(&self.shared))),
        }
    }

    /// Engine on device 0 of this vendor.
    pub fn engine(&self) -> BridgeResult<CudnnEngine> {
        CudnnEngine::new(self.libraries(), 0)
    }

    pub fn stats(&self) -> VendorStats {
        self.shared.inspect().stats.clone()
    }

    pub fn live_descriptors(&self) -> usize {
        self.shared.inspect().live_descriptors()
    }

    pub fn live_streams(&self) -> usize {
        self.shared.inspect().streams.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.shared.inspect().contexts.len()
    }

    pub fn live_dnn_handles(&self) -> usize {
        self.shared.inspect().dnn_handles.len()
    }

    pub fn live_blas_handles(&self) -> usize {
        self.shared.inspect().blas_handles.len()
    }

    pub fn descriptor_log(&self) -> Vec<DescriptorEvent> {
        self.shared.inspect().descriptor_log.clone()
    }

    pub fn launches(&self) -> Vec<KernelLaunch> {
        self.shared.inspect().launches.clone()
    }

    /// Context and stream a primitive-library handle is bound to.
    pub fn dnn_binding(&self, handle: RawDnnHandle) -> Option<(RawContext, Option<RawStream>)> {
        self.shared
            .inspect()
            .dnn_handles
            .get(&handle.0)
            .map(|state| (RawContext(state.context), state.stream.map(RawStream)))
    }

    /// Context and stream of every live linear-algebra handle.
    pub fn blas_bindings(&self) -> Vec<(RawContext, Option<RawStream>)> {
        self.shared
            .inspect()
            .blas_handles
            .values()
            .map(|state| (RawContext(state.context), state.stream.map(RawStream)))
            .collect()
    }

    /// Makes the next call named `call` fail with `status` after `skip` successful calls.
    /// Each armed fault fires once.
    pub fn fail_call(&self, call: &str, skip: usize, status: VendorStatus) {
        self.shared.inspect().arm_fault(call, skip, status);
    }

    pub fn clear_faults(&self) {
        self.shared.inspect().clear_faults();
    }
}
