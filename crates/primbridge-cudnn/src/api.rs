//! Vendor library boundary.
//!
//! The bridge talks to three vendor libraries: the device driver (contexts, streams,
//! memory), the primitive library (handles, tensor/op/LRN descriptors, kernels) and the
//! linear-algebra library (handles only). Each is an object-safe trait so the dynamically
//! loaded native libraries and the reference vendor are interchangeable.

use std::fmt;
use std::sync::Arc;

use primbridge::{BridgeError, DevicePtr};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest tensor rank the primitive library accepts.
pub const MIN_RANK: usize = 4;
/// Largest tensor rank the primitive library accepts.
pub const DIM_MAX: usize = 8;

pub const LRN_MIN_N: u32 = 1;
pub const LRN_MAX_N: u32 = 16;
pub const LRN_MIN_K: f64 = 1e-5;
pub const LRN_MIN_BETA: f64 = 0.01;

pub type VendorStatus = i32;

pub const DNN_STATUS_SUCCESS: VendorStatus = 0;
pub const DNN_STATUS_NOT_INITIALIZED: VendorStatus = 1;
pub const DNN_STATUS_ALLOC_FAILED: VendorStatus = 2;
pub const DNN_STATUS_BAD_PARAM: VendorStatus = 3;
pub const DNN_STATUS_INTERNAL_ERROR: VendorStatus = 4;
pub const DNN_STATUS_EXECUTION_FAILED: VendorStatus = 8;
pub const DNN_STATUS_NOT_SUPPORTED: VendorStatus = 9;

pub const BLAS_STATUS_SUCCESS: VendorStatus = 0;
pub const BLAS_STATUS_NOT_INITIALIZED: VendorStatus = 1;
pub const BLAS_STATUS_ALLOC_FAILED: VendorStatus = 3;
pub const BLAS_STATUS_INVALID_VALUE: VendorStatus = 7;

pub const CUDA_SUCCESS: VendorStatus = 0;
pub const CUDA_ERROR_INVALID_VALUE: VendorStatus = 1;
pub const CUDA_ERROR_OUT_OF_MEMORY: VendorStatus = 2;
pub const CUDA_ERROR_INVALID_DEVICE: VendorStatus = 101;
pub const CUDA_ERROR_INVALID_CONTEXT: VendorStatus = 201;
pub const CUDA_ERROR_INVALID_HANDLE: VendorStatus = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VendorLibraryKind {
    Driver,
    Dnn,
    Blas,
}

impl fmt::Display for VendorLibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VendorLibraryKind::Driver => "driver",
            VendorLibraryKind::Dnn => "cuDNN",
            VendorLibraryKind::Blas => "cuBLAS",
        };
        f.write_str(name)
    }
}

/// Non-success status returned by a vendor call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{library} call {call} failed with status {status}")]
pub struct VendorError {
    pub library: VendorLibraryKind,
    pub call: &'static str,
    pub status: VendorStatus,
}

impl VendorError {
    pub fn new(library: VendorLibraryKind, call: &'static str, status: VendorStatus) -> Self {
        Self {
            library,
            call,
            status,
        }
    }

    pub fn is_alloc_failure(&self) -> bool {
        match self.library {
            VendorLibraryKind::Driver => self.status == CUDA_ERROR_OUT_OF_MEMORY,
            VendorLibraryKind::Dnn => self.status == DNN_STATUS_ALLOC_FAILED,
            VendorLibraryKind::Blas => self.status == BLAS_STATUS_ALLOC_FAILED,
        }
    }
}

impl From<VendorError> for BridgeError {
    fn from(err: VendorError) -> Self {
        if err.is_alloc_failure() {
            BridgeError::OutOfMemory(err.to_string())
        } else {
            BridgeError::VendorCallFailed {
                call: err.call.to_string(),
                status: err.status,
            }
        }
    }
}

pub type VendorResult<T> = Result<T, VendorError>;

/// Maps a raw status into a `VendorResult`.
pub fn check_status(
    library: VendorLibraryKind,
    status: VendorStatus,
    call: &'static str,
) -> VendorResult<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(VendorError::new(library, call, status))
    }
}

/// Element types of the primitive library. Discriminants follow its C enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum VendorDataType {
    Float = 0,
    Double = 1,
    Half = 2,
    Int8 = 3,
    Int32 = 4,
    Int8x4 = 5,
    Uint8 = 6,
}

impl VendorDataType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            VendorDataType::Int8 | VendorDataType::Uint8 => 1,
            VendorDataType::Half => 2,
            VendorDataType::Float | VendorDataType::Int32 | VendorDataType::Int8x4 => 4,
            VendorDataType::Double => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum OpTensorOp {
    Add = 0,
    Mul = 1,
    Min = 2,
    Max = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum NanPropagation {
    NotPropagate = 0,
    Propagate = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LrnMode {
    CrossChannelDim1 = 0,
}

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// Stored as `usize` so owners stay `Send + Sync`.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub usize);
    };
}

raw_handle!(
    /// Device context of the driver.
    RawContext
);
raw_handle!(
    /// Ordered command stream of the driver.
    RawStream
);
raw_handle!(
    /// Primitive-library handle.
    RawDnnHandle
);
raw_handle!(
    /// Linear-algebra library handle.
    RawBlasHandle
);
raw_handle!(RawTensorDescriptor);
raw_handle!(RawOpTensorDescriptor);
raw_handle!(RawLrnDescriptor);

/// N-d tensor layout handed to `set_tensor_nd_descriptor`.
#[derive(Debug, Clone, Copy)]
pub struct TensorNdConfig<'a> {
    pub data_type: VendorDataType,
    pub dims: &'a [i32],
    pub strides: &'a [i32],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpTensorConfig {
    pub op: OpTensorOp,
    pub compute_type: VendorDataType,
    pub nan_propagation: NanPropagation,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LrnConfig {
    pub n: u32,
    pub alpha: f64,
    pub beta: f64,
    pub k: f64,
}

/// `C = op(alpha1 * A, alpha2 * B) + beta * C`.
#[derive(Debug, Clone, Copy)]
pub struct OpTensorArgs {
    pub op_desc: RawOpTensorDescriptor,
    pub alpha1: f32,
    pub a_desc: RawTensorDescriptor,
    pub a: DevicePtr,
    pub alpha2: f32,
    pub b_desc: RawTensorDescriptor,
    pub b: DevicePtr,
    pub beta: f32,
    pub c_desc: RawTensorDescriptor,
    pub c: DevicePtr,
}

/// `C = alpha * A + beta * C`, broadcasting `A` into `C`.
#[derive(Debug, Clone, Copy)]
pub struct AddTensorArgs {
    pub alpha: f32,
    pub a_desc: RawTensorDescriptor,
    pub a: DevicePtr,
    pub beta: f32,
    pub c_desc: RawTensorDescriptor,
    pub c: DevicePtr,
}

#[derive(Debug, Clone, Copy)]
pub struct LrnForwardArgs {
    pub lrn_desc: RawLrnDescriptor,
    pub mode: LrnMode,
    pub alpha: f32,
    pub x_desc: RawTensorDescriptor,
    pub x: DevicePtr,
    pub beta: f32,
    pub y_desc: RawTensorDescriptor,
    pub y: DevicePtr,
}

#[derive(Debug, Clone, Copy)]
pub struct LrnBackwardArgs {
    pub lrn_desc: RawLrnDescriptor,
    pub mode: LrnMode,
    pub alpha: f32,
    pub y_desc: RawTensorDescriptor,
    pub y: DevicePtr,
    pub dy_desc: RawTensorDescriptor,
    pub dy: DevicePtr,
    pub x_desc: RawTensorDescriptor,
    pub x: DevicePtr,
    pub beta: f32,
    pub dx_desc: RawTensorDescriptor,
    pub dx: DevicePtr,
}

/// Device driver: contexts, streams and memory.
///
/// The current context is per calling thread, as in the driver API.
pub trait DriverLibrary: Send + Sync {
    fn name(&self) -> &str;

    fn device_count(&self) -> VendorResult<usize>;

    /// Creates a context on `ordinal` and makes it current on the calling thread.
    fn create_context(&self, ordinal: usize) -> VendorResult<RawContext>;

    fn destroy_context(&self, ctx: RawContext) -> VendorResult<()>;

    fn current_context(&self) -> VendorResult<Option<RawContext>>;

    fn set_current_context(&self, ctx: Option<RawContext>) -> VendorResult<()>;

    /// Waits for all work in the current context.
    fn synchronize_context(&self) -> VendorResult<()>;

    /// Creates a stream in the current context.
    fn create_stream(&self) -> VendorResult<RawStream>;

    fn destroy_stream(&self, stream: RawStream) -> VendorResult<()>;

    fn synchronize_stream(&self, stream: RawStream) -> VendorResult<()>;

    fn mem_alloc(&self, bytes: usize) -> VendorResult<DevicePtr>;

    fn mem_free(&self, ptr: DevicePtr) -> VendorResult<()>;

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> VendorResult<()>;

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> VendorResult<()>;
}

/// Primitive library: handles, descriptors and the kernels the bridge dispatches.
pub trait DnnLibrary: Send + Sync {
    fn name(&self) -> &str;

    /// Creates a handle bound to the calling thread's current context.
    fn create_handle(&self) -> VendorResult<RawDnnHandle>;

    fn destroy_handle(&self, handle: RawDnnHandle) -> VendorResult<()>;

    fn set_stream(&self, handle: RawDnnHandle, stream: RawStream) -> VendorResult<()>;

    fn create_tensor_descriptor(&self) -> VendorResult<RawTensorDescriptor>;

    fn set_tensor_nd_descriptor(
        &self,
        desc: RawTensorDescriptor,
        config: TensorNdConfig<'_>,
    ) -> VendorResult<()>;

    fn destroy_tensor_descriptor(&self, desc: RawTensorDescriptor) -> VendorResult<()>;

    fn create_op_tensor_descriptor(&self) -> VendorResult<RawOpTensorDescriptor>;

    fn set_op_tensor_descriptor(
        &self,
        desc: RawOpTensorDescriptor,
        config: OpTensorConfig,
    ) -> VendorResult<()>;

    fn destroy_op_tensor_descriptor(&self, desc: RawOpTensorDescriptor) -> VendorResult<()>;

    fn create_lrn_descriptor(&self) -> VendorResult<RawLrnDescriptor>;

    fn set_lrn_descriptor(&self, desc: RawLrnDescriptor, config: LrnConfig) -> VendorResult<()>;

    fn destroy_lrn_descriptor(&self, desc: RawLrnDescriptor) -> VendorResult<()>;

    fn op_tensor(&self, handle: RawDnnHandle, args: &OpTensorArgs) -> VendorResult<()>;

    fn add_tensor(&self, handle: RawDnnHandle, args: &AddTensorArgs) -> VendorResult<()>;

    fn lrn_cross_channel_forward(
        &self,
        handle: RawDnnHandle,
        args: &LrnForwardArgs,
    ) -> VendorResult<()>;

    fn lrn_cross_channel_backward(
        &self,
        handle: RawDnnHandle,
        args: &LrnBackwardArgs,
    ) -> VendorResult<()>;
}

/// Linear-algebra library. The bridge only manages its per-stream handle.
pub trait BlasLibrary: Send + Sync {
    fn name(&self) -> &str;

    fn create_handle(&self) -> VendorResult<RawBlasHandle>;

    fn destroy_handle(&self, handle: RawBlasHandle) -> VendorResult<()>;

    fn set_stream(&self, handle: RawBlasHandle, stream: RawStream) -> VendorResult<()>;
}

/// The set of vendor libraries an engine drives.
#[derive(Clone)]
pub struct VendorLibraries {
    pub driver: Arc<dyn DriverLibrary>,
    pub dnn: Arc<dyn DnnLibrary>,
    pub blas: Arc<dyn BlasLibrary>,
}

impl fmt::Debug for VendorLibraries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VendorLibraries")
            .field("driver", &self.driver.name())
            .field("dnn", &self.dnn.name())
            .field("blas", &self.blas.name())
            .finish()
    }
}
