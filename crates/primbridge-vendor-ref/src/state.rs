use std::collections::{BTreeMap, HashMap};
use std::thread::{self, ThreadId};

use primbridge::DevicePtr;
use primbridge_cudnn::api::{
    LrnConfig, OpTensorConfig, VendorDataType, VendorError, VendorLibraryKind, VendorResult,
    VendorStatus, CUDA_ERROR_INVALID_CONTEXT, CUDA_ERROR_INVALID_VALUE,
    DNN_STATUS_BAD_PARAM, DNN_STATUS_EXECUTION_FAILED,
};

use crate::element;
use crate::{DescriptorEvent, KernelLaunch, VendorStats};

const ARENA_BASE: u64 = 0x7f00_0000_0000;
const ARENA_ALIGN: u64 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TensorLayout {
    pub data_type: VendorDataType,
    pub dims: Vec<usize>,
    pub strides: Vec<usize>,
}

impl TensorLayout {
    pub(crate) fn count(&self) -> usize {
        self.dims.iter().product()
    }

    /// Bytes from the first element to one past the furthest.
    fn span(&self) -> usize {
        let last: usize = self
            .dims
            .iter()
            .zip(&self.strides)
            .map(|(dim, stride)| (dim - 1) * stride)
            .sum();
        (last + 1) * self.data_type.size_in_bytes()
    }

    /// Byte offset of each logical element, in row-major order.
    fn offsets(&self) -> impl Iterator<Item = usize> + '_ {
        let elem = self.data_type.size_in_bytes();
        (0..self.count()).map(move |linear| {
            let mut rem = linear;
            let mut offset = 0usize;
            for axis in (0..self.dims.len()).rev() {
                offset += (rem % self.dims[axis]) * self.strides[axis];
                rem /= self.dims[axis];
            }
            offset * elem
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleState {
    pub context: usize,
    pub stream: Option<usize>,
}

struct Allocation {
    context: usize,
    bytes: Vec<u8>,
}

struct Fault {
    call: String,
    skip: usize,
    status: VendorStatus,
}

pub(crate) struct State {
    devices: usize,
    next_id: usize,
    next_addr: u64,
    pub contexts: BTreeMap<usize, usize>,
    current: HashMap<ThreadId, usize>,
    pub streams: BTreeMap<usize, usize>,
    pub dnn_handles: BTreeMap<usize, HandleState>,
    pub blas_handles: BTreeMap<usize, HandleState>,
    pub tensors: BTreeMap<usize, Option<TensorLayout>>,
    pub op_tensors: BTreeMap<usize, Option<OpTensorConfig>>,
    pub lrns: BTreeMap<usize, Option<LrnConfig>>,
    arena: BTreeMap<u64, Allocation>,
    faults: Vec<Fault>,
    pub stats: VendorStats,
    pub descriptor_log: Vec<DescriptorEvent>,
    pub launches: Vec<KernelLaunch>,
}

impl State {
    pub(crate) fn new(devices: usize) -> Self {
        Self {
            devices,
            next_id: 0x10,
            next_addr: ARENA_BASE,
            contexts: BTreeMap::new(),
            current: HashMap::new(),
            streams: BTreeMap::new(),
            dnn_handles: BTreeMap::new(),
            blas_handles: BTreeMap::new(),
            tensors: BTreeMap::new(),
            op_tensors: BTreeMap::new(),
            lrns: BTreeMap::new(),
            arena: BTreeMap::new(),
            faults: Vec::new(),
            stats: VendorStats::default(),
            descriptor_log: Vec::new(),
            launches: Vec::new(),
        }
    }

    pub(crate) fn devices(&self) -> usize {
        self.devices
    }

    pub(crate) fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Counts the call and fails it when an armed fault matches.
    pub(crate) fn enter(
        &mut self,
        library: VendorLibraryKind,
        call: &'static str,
    ) -> VendorResult<()> {
        *self.stats.calls.entry(call.to_string()).or_default() += 1;
        let Some(index) = self.faults.iter().position(|fault| fault.call == call) else {
            return Ok(());
        };
        if self.faults[index].skip > 0 {
            self.faults[index].skip -= 1;
            return Ok(());
        }
        let fault = self.faults.remove(index);
        tracing::debug!(call, status = fault.status, "injected vendor failure");
        Err(VendorError::new(library, call, fault.status))
    }

    pub(crate) fn arm_fault(&mut self, call: &str, skip: usize, status: VendorStatus) {
        self.faults.push(Fault {
            call: call.to_string(),
            skip,
            status,
        });
    }

    pub(crate) fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub(crate) fn current_context(&self) -> Option<usize> {
        self.current.get(&thread::current().id()).copied()
    }

    pub(crate) fn set_current_context(&mut self, ctx: Option<usize>) {
        let id = thread::current().id();
        match ctx {
            Some(ctx) => self.current.insert(id, ctx),
            None => self.current.remove(&id),
        };
    }

    pub(crate) fn require_context(
        &self,
        library: VendorLibraryKind,
        call: &'static str,
        status: VendorStatus,
    ) -> VendorResult<usize> {
        self.current_context()
            .ok_or_else(|| VendorError::new(library, call, status))
    }

    pub(crate) fn destroy_context(&mut self, ctx: usize) -> bool {
        if self.contexts.remove(&ctx).is_none() {
            return false;
        }
        self.current.retain(|_, current| *current != ctx);
        let before = self.arena.len();
        self.arena.retain(|_, alloc| alloc.context != ctx);
        self.stats.leaked_allocations += before - self.arena.len();
        true
    }

    pub(crate) fn allocate(&mut self, context: usize, bytes: usize) -> DevicePtr {
        let addr = self.next_addr;
        let padded = (bytes as u64).div_ceil(ARENA_ALIGN) * ARENA_ALIGN;
        self.next_addr += padded + ARENA_ALIGN;
        self.arena.insert(
            addr,
            Allocation {
                context,
                bytes: vec![0u8; bytes],
            },
        );
        self.stats.allocations += 1;
        self.stats.live_allocations += 1;
        DevicePtr(addr)
    }

    pub(crate) fn free(&mut self, ptr: DevicePtr) -> bool {
        if self.arena.remove(&ptr.addr()).is_none() {
            return false;
        }
        self.stats.live_allocations -= 1;
        true
    }

    fn locate(&self, ptr: DevicePtr, len: usize) -> Option<(u64, usize)> {
        let (&base, alloc) = self.arena.range(..=ptr.addr()).next_back()?;
        let offset = usize::try_from(ptr.addr() - base).ok()?;
        (offset + len <= alloc.bytes.len()).then_some((base, offset))
    }

    pub(crate) fn region(&self, ptr: DevicePtr, len: usize) -> Option<&[u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        self.arena
            .get(&base)
            .map(|alloc| &alloc.bytes[offset..offset + len])
    }

    pub(crate) fn region_mut(&mut self, ptr: DevicePtr, len: usize) -> Option<&mut [u8]> {
        let (base, offset) = self.locate(ptr, len)?;
        self.arena
            .get_mut(&base)
            .map(|alloc| &mut alloc.bytes[offset..offset + len])
    }

    pub(crate) fn allocation_context(&self, ptr: DevicePtr) -> Option<usize> {
        let (base, _) = self.locate(ptr, 0)?;
        self.arena.get(&base).map(|alloc| alloc.context)
    }

    pub(crate) fn copy_in(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
        call: &'static str,
    ) -> VendorResult<()> {
        let region = self.region_mut(dst, src.len()).ok_or_else(|| {
            VendorError::new(VendorLibraryKind::Driver, call, CUDA_ERROR_INVALID_VALUE)
        })?;
        region.copy_from_slice(src);
        Ok(())
    }

    pub(crate) fn copy_out(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        call: &'static str,
    ) -> VendorResult<()> {
        let region = self.region(src, dst.len()).ok_or_else(|| {
            VendorError::new(VendorLibraryKind::Driver, call, CUDA_ERROR_INVALID_VALUE)
        })?;
        dst.copy_from_slice(region);
        Ok(())
    }

    pub(crate) fn log_descriptor(&mut self, event: DescriptorEvent) {
        match event {
            DescriptorEvent::Created { .. } => self.stats.descriptors_created += 1,
            DescriptorEvent::Destroyed { .. } => self.stats.descriptors_destroyed += 1,
        }
        self.descriptor_log.push(event);
    }

    pub(crate) fn live_descriptors(&self) -> usize {
        self.tensors.len() + self.op_tensors.len() + self.lrns.len()
    }

    pub(crate) fn tensor(&self, id: usize, call: &'static str) -> VendorResult<TensorLayout> {
        self.tensors
            .get(&id)
            .cloned()
            .flatten()
            .ok_or_else(|| dnn_error(call, DNN_STATUS_BAD_PARAM))
    }

    /// Validates the handle for a kernel launch and records the launch.
    pub(crate) fn launch(
        &mut self,
        call: &'static str,
        handle: usize,
    ) -> VendorResult<HandleState> {
        let state = *self
            .dnn_handles
            .get(&handle)
            .ok_or_else(|| dnn_error(call, DNN_STATUS_BAD_PARAM))?;
        if self.current_context() != Some(state.context) {
            return Err(dnn_error(call, DNN_STATUS_EXECUTION_FAILED));
        }
        self.stats.kernel_launches += 1;
        self.launches.push(KernelLaunch {
            call,
            handle,
            stream: state.stream,
            context: state.context,
        });
        Ok(state)
    }

    /// Decodes a tensor into logical row-major order.
    pub(crate) fn read_tensor(
        &self,
        layout: &TensorLayout,
        ptr: DevicePtr,
        context: usize,
        call: &'static str,
    ) -> VendorResult<Vec<f32>> {
        self.check_pointer(ptr, context, call)?;
        let bytes = self
            .region(ptr, layout.span())
            .ok_or_else(|| dnn_error(call, DNN_STATUS_EXECUTION_FAILED))?;
        let elem = layout.data_type.size_in_bytes();
        Ok(layout
            .offsets()
            .map(|offset| element::decode(layout.data_type, &bytes[offset..offset + elem]))
            .collect())
    }

    pub(crate) fn write_tensor(
        &mut self,
        layout: &TensorLayout,
        ptr: DevicePtr,
        context: usize,
        values: &[f32],
        call: &'static str,
    ) -> VendorResult<()> {
        self.check_pointer(ptr, context, call)?;
        let offsets: Vec<usize> = layout.offsets().collect();
        let elem = layout.data_type.size_in_bytes();
        let bytes = self
            .region_mut(ptr, layout.span())
            .ok_or_else(|| dnn_error(call, DNN_STATUS_EXECUTION_FAILED))?;
        for (offset, &value) in offsets.iter().zip(values) {
            element::encode(layout.data_type, value, &mut bytes[*offset..*offset + elem]);
        }
        Ok(())
    }

    /// Device pointers must come from an allocation of the handle's context.
    fn check_pointer(
        &self,
        ptr: DevicePtr,
        context: usize,
        call: &'static str,
    ) -> VendorResult<()> {
        if ptr.is_null() || self.allocation_context(ptr) != Some(context) {
            return Err(dnn_error(call, DNN_STATUS_EXECUTION_FAILED));
        }
        Ok(())
    }

    pub(crate) fn ensure_context(&self, ctx: usize, call: &'static str) -> VendorResult<()> {
        if self.contexts.contains_key(&ctx) {
            Ok(())
        } else {
            Err(VendorError::new(
                VendorLibraryKind::Driver,
                call,
                CUDA_ERROR_INVALID_CONTEXT,
            ))
        }
    }
}

pub(crate) fn dnn_error(call: &'static str, status: VendorStatus) -> VendorError {
    VendorError::new(VendorLibraryKind::Dnn, call, status)
}
