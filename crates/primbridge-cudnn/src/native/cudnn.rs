use std::ffi::c_void;

use libloading::Library;
use primbridge::BridgeResult;

use super::{load_library, load_symbol};
use crate::api::{
    check_status, AddTensorArgs, DnnLibrary, LrnBackwardArgs, LrnConfig, LrnForwardArgs,
    OpTensorArgs, OpTensorConfig, RawDnnHandle, RawLrnDescriptor, RawOpTensorDescriptor,
    RawStream, RawTensorDescriptor, TensorNdConfig, VendorError, VendorLibraryKind, VendorResult,
    DNN_STATUS_BAD_PARAM,
};

type CudnnStatus = i32;
type CudnnHandle = *mut c_void;
type CudnnTensorDescriptor = *mut c_void;
type CudnnOpTensorDescriptor = *mut c_void;
type CudnnLrnDescriptor = *mut c_void;

type CreateFn = unsafe extern "C" fn(handle: *mut CudnnHandle) -> CudnnStatus;
type DestroyFn = unsafe extern "C" fn(handle: CudnnHandle) -> CudnnStatus;
type SetStreamFn = unsafe extern "C" fn(handle: CudnnHandle, stream: *mut c_void) -> CudnnStatus;
type CreateTensorDescriptorFn =
    unsafe extern "C" fn(desc: *mut CudnnTensorDescriptor) -> CudnnStatus;
type SetTensorNdDescriptorFn = unsafe extern "C" fn(
    desc: CudnnTensorDescriptor,
    data_type: i32,
    nb_dims: i32,
    dims: *const i32,
    strides: *const i32,
) -> CudnnStatus;
type DestroyTensorDescriptorFn = unsafe extern "C" fn(desc: CudnnTensorDescriptor) -> CudnnStatus;
type CreateOpTensorDescriptorFn =
    unsafe extern "C" fn(desc: *mut CudnnOpTensorDescriptor) -> CudnnStatus;
type SetOpTensorDescriptorFn = unsafe extern "C" fn(
    desc: CudnnOpTensorDescriptor,
    op: i32,
    comp_type: i32,
    nan_opt: i32,
) -> CudnnStatus;
type DestroyOpTensorDescriptorFn =
    unsafe extern "C" fn(desc: CudnnOpTensorDescriptor) -> CudnnStatus;
type CreateLrnDescriptorFn = unsafe extern "C" fn(desc: *mut CudnnLrnDescriptor) -> CudnnStatus;
type SetLrnDescriptorFn = unsafe extern "C" fn(
    desc: CudnnLrnDescriptor,
    n: u32,
    alpha: f64,
    beta: f64,
    k: f64,
) -> CudnnStatus;
type DestroyLrnDescriptorFn = unsafe extern "C" fn(desc: CudnnLrnDescriptor) -> CudnnStatus;
type OpTensorFn = unsafe extern "C" fn(
    handle: CudnnHandle,
    op_desc: CudnnOpTensorDescriptor,
    alpha1: *const c_void,
    a_desc: CudnnTensorDescriptor,
    a: *const c_void,
    alpha2: *const c_void,
    b_desc: CudnnTensorDescriptor,
    b: *const c_void,
    beta: *const c_void,
    c_desc: CudnnTensorDescriptor,
    c: *mut c_void,
) -> CudnnStatus;
type AddTensorFn = unsafe extern "C" fn(
    handle: CudnnHandle,
    alpha: *const c_void,
    a_desc: CudnnTensorDescriptor,
    a: *const c_void,
    beta: *const c_void,
    c_desc: CudnnTensorDescriptor,
    c: *mut c_void,
) -> CudnnStatus;
type LrnForwardFn = unsafe extern "C" fn(
    handle: CudnnHandle,
    norm_desc: CudnnLrnDescriptor,
    mode: i32,
    alpha: *const c_void,
    x_desc: CudnnTensorDescriptor,
    x: *const c_void,
    beta: *const c_void,
    y_desc: CudnnTensorDescriptor,
    y: *mut c_void,
) -> CudnnStatus;
type LrnBackwardFn = unsafe extern "C" fn(
    handle: CudnnHandle,
    norm_desc: CudnnLrnDescriptor,
    mode: i32,
    alpha: *const c_void,
    y_desc: CudnnTensorDescriptor,
    y: *const c_void,
    dy_desc: CudnnTensorDescriptor,
    dy: *const c_void,
    x_desc: CudnnTensorDescriptor,
    x: *const c_void,
    beta: *const c_void,
    dx_desc: CudnnTensorDescriptor,
    dx: *mut c_void,
) -> CudnnStatus;

struct CudnnFns {
    create: CreateFn,
    destroy: DestroyFn,
    set_stream: SetStreamFn,
    create_tensor_descriptor: CreateTensorDescriptorFn,
    set_tensor_nd_descriptor: SetTensorNdDescriptorFn,
    destroy_tensor_descriptor: DestroyTensorDescriptorFn,
    create_op_tensor_descriptor: CreateOpTensorDescriptorFn,
    set_op_tensor_descriptor: SetOpTensorDescriptorFn,
    destroy_op_tensor_descriptor: DestroyOpTensorDescriptorFn,
    create_lrn_descriptor: CreateLrnDescriptorFn,
    set_lrn_descriptor: SetLrnDescriptorFn,
    destroy_lrn_descriptor: DestroyLrnDescriptorFn,
    op_tensor: OpTensorFn,
    add_tensor: AddTensorFn,
    lrn_forward: LrnForwardFn,
    lrn_backward: LrnBackwardFn,
}

/// cuDNN resolved from its shared library.
pub struct NativeDnn {
    _lib: Library,
    fns: CudnnFns,
}

const WHAT: &str = "cuDNN";

impl NativeDnn {
    pub(super) fn load(override_name: Option<&str>) -> BridgeResult<Self> {
        let lib = load_library(
            WHAT,
            override_name,
            &[
                "libcudnn.so.9",
                "libcudnn.so.8",
                "libcudnn.so",
                "cudnn64_9.dll",
                "cudnn64_8.dll",
            ],
        )?;
        let fns = CudnnFns {
            create: load_symbol(&lib, WHAT, b"cudnnCreate\0")?,
            destroy: load_symbol(&lib, WHAT, b"cudnnDestroy\0")?,
            set_stream: load_symbol(&lib, WHAT, b"cudnnSetStream\0")?,
            create_tensor_descriptor: load_symbol(&lib, WHAT, b"cudnnCreateTensorDescriptor\0")?,
            set_tensor_nd_descriptor: load_symbol(&lib, WHAT, b"cudnnSetTensorNdDescriptor\0")?,
            destroy_tensor_descriptor: load_symbol(
                &lib,
                WHAT,
                b"cudnnDestroyTensorDescriptor\0",
            )?,
            create_op_tensor_descriptor: load_symbol(
                &lib,
                WHAT,
                b"cudnnCreateOpTensorDescriptor\0",
            )?,
            set_op_tensor_descriptor: load_symbol(&lib, WHAT, b"cudnnSetOpTensorDescriptor\0")?,
            destroy_op_tensor_descriptor: load_symbol(
                &lib,
                WHAT,
                b"cudnnDestroyOpTensorDescriptor\0",
            )?,
            create_lrn_descriptor: load_symbol(&lib, WHAT, b"cudnnCreateLRNDescriptor\0")?,
            set_lrn_descriptor: load_symbol(&lib, WHAT, b"cudnnSetLRNDescriptor\0")?,
            destroy_lrn_descriptor: load_symbol(&lib, WHAT, b"cudnnDestroyLRNDescriptor\0")?,
            op_tensor: load_symbol(&lib, WHAT, b"cudnnOpTensor\0")?,
            add_tensor: load_symbol(&lib, WHAT, b"cudnnAddTensor\0")?,
            lrn_forward: load_symbol(&lib, WHAT, b"cudnnLRNCrossChannelForward\0")?,
            lrn_backward: load_symbol(&lib, WHAT, b"cudnnLRNCrossChannelBackward\0")?,
        };
        Ok(Self { _lib: lib, fns })
    }
}

fn check(status: CudnnStatus, call: &'static str) -> VendorResult<()> {
    check_status(VendorLibraryKind::Dnn, status, call)
}

fn scalar(value: &f32) -> *const c_void {
    value as *const f32 as *const c_void
}

fn device(ptr: primbridge::DevicePtr) -> *mut c_void {
    ptr.addr() as usize as *mut c_void
}

impl DnnLibrary for NativeDnn {
    fn name(&self) -> &str {
        "cudnn"
    }

    fn create_handle(&self) -> VendorResult<RawDnnHandle> {
        let mut handle: CudnnHandle = std::ptr::null_mut();
        // SAFETY: cudnnCreate initializes the output handle pointer.
        check(
            unsafe { (self.fns.create)(&mut handle as *mut CudnnHandle) },
            "cudnnCreate",
        )?;
        Ok(RawDnnHandle(handle as usize))
    }

    fn destroy_handle(&self, handle: RawDnnHandle) -> VendorResult<()> {
        // SAFETY: Handle was created by `create_handle` and is destroyed once by its owner.
        check(
            unsafe { (self.fns.destroy)(handle.0 as CudnnHandle) },
            "cudnnDestroy",
        )
    }

    fn set_stream(&self, handle: RawDnnHandle, stream: RawStream) -> VendorResult<()> {
        // SAFETY: Both objects came from the vendor libraries.
        check(
            unsafe { (self.fns.set_stream)(handle.0 as CudnnHandle, stream.0 as *mut c_void) },
            "cudnnSetStream",
        )
    }

    fn create_tensor_descriptor(&self) -> VendorResult<RawTensorDescriptor> {
        let mut desc: CudnnTensorDescriptor = std::ptr::null_mut();
        // SAFETY: `desc` is a valid out pointer.
        check(
            unsafe { (self.fns.create_tensor_descriptor)(&mut desc as *mut CudnnTensorDescriptor) },
            "cudnnCreateTensorDescriptor",
        )?;
        Ok(RawTensorDescriptor(desc as usize))
    }

    fn set_tensor_nd_descriptor(
        &self,
        desc: RawTensorDescriptor,
        config: TensorNdConfig<'_>,
    ) -> VendorResult<()> {
        if config.dims.len() != config.strides.len() {
            return Err(VendorError::new(
                VendorLibraryKind::Dnn,
                "cudnnSetTensorNdDescriptor",
                DNN_STATUS_BAD_PARAM,
            ));
        }
        // SAFETY: dims/strides slices outlive the call and hold `nb_dims` entries each.
        check(
            unsafe {
                (self.fns.set_tensor_nd_descriptor)(
                    desc.0 as CudnnTensorDescriptor,
                    config.data_type as i32,
                    config.dims.len() as i32,
                    config.dims.as_ptr(),
                    config.strides.as_ptr(),
                )
            },
            "cudnnSetTensorNdDescriptor",
        )
    }

    fn destroy_tensor_descriptor(&self, desc: RawTensorDescriptor) -> VendorResult<()> {
        // SAFETY: Descriptor is destroyed once by its owner.
        check(
            unsafe { (self.fns.destroy_tensor_descriptor)(desc.0 as CudnnTensorDescriptor) },
            "cudnnDestroyTensorDescriptor",
        )
    }

    fn create_op_tensor_descriptor(&self) -> VendorResult<RawOpTensorDescriptor> {
        let mut desc: CudnnOpTensorDescriptor = std::ptr::null_mut();
        // SAFETY: `desc` is a valid out pointer.
        check(
            unsafe {
                (self.fns.create_op_tensor_descriptor)(&mut desc as *mut CudnnOpTensorDescriptor)
            },
            "cudnnCreateOpTensorDescriptor",
        )?;
        Ok(RawOpTensorDescriptor(desc as usize))
    }

    fn set_op_tensor_descriptor(
        &self,
        desc: RawOpTensorDescriptor,
        config: OpTensorConfig,
    ) -> VendorResult<()> {
        // SAFETY: Enum arguments are passed by value.
        check(
            unsafe {
                (self.fns.set_op_tensor_descriptor)(
                    desc.0 as CudnnOpTensorDescriptor,
                    config.op as i32,
                    config.compute_type as i32,
                    config.nan_propagation as i32,
                )
            },
            "cudnnSetOpTensorDescriptor",
        )
    }

    fn destroy_op_tensor_descriptor(&self, desc: RawOpTensorDescriptor) -> VendorResult<()> {
        // SAFETY: Descriptor is destroyed once by its owner.
        check(
            unsafe { (self.fns.destroy_op_tensor_descriptor)(desc.0 as CudnnOpTensorDescriptor) },
            "cudnnDestroyOpTensorDescriptor",
        )
    }

    fn create_lrn_descriptor(&self) -> VendorResult<RawLrnDescriptor> {
        let mut desc: CudnnLrnDescriptor = std::ptr::null_mut();
        // SAFETY: `desc` is a valid out pointer.
        check(
            unsafe { (self.fns.create_lrn_descriptor)(&mut desc as *mut CudnnLrnDescriptor) },
            "cudnnCreateLRNDescriptor",
        )?;
        Ok(RawLrnDescriptor(desc as usize))
    }

    fn set_lrn_descriptor(&self, desc: RawLrnDescriptor, config: LrnConfig) -> VendorResult<()> {
        // SAFETY: Scalar arguments are passed by value.
        check(
            unsafe {
                (self.fns.set_lrn_descriptor)(
                    desc.0 as CudnnLrnDescriptor,
                    config.n,
                    config.alpha,
                    config.beta,
                    config.k,
                )
            },
            "cudnnSetLRNDescriptor",
        )
    }

    fn destroy_lrn_descriptor(&self, desc: RawLrnDescriptor) -> VendorResult<()> {
        // SAFETY: Descriptor is destroyed once by its owner.
        check(
            unsafe { (self.fns.destroy_lrn_descriptor)(desc.0 as CudnnLrnDescriptor) },
            "cudnnDestroyLRNDescriptor",
        )
    }

    fn op_tensor(&self, handle: RawDnnHandle, args: &OpTensorArgs) -> VendorResult<()> {
        // SAFETY: Scalars live on this frame; device pointers were resolved inside an interop
        // region and stay valid until it closes.
        check(
            unsafe {
                (self.fns.op_tensor)(
                    handle.0 as CudnnHandle,
                    args.op_desc.0 as CudnnOpTensorDescriptor,
                    scalar(&args.alpha1),
                    args.a_desc.0 as CudnnTensorDescriptor,
                    device(args.a),
                    scalar(&args.alpha2),
                    args.b_desc.0 as CudnnTensorDescriptor,
                    device(args.b),
                    scalar(&args.beta),
                    args.c_desc.0 as CudnnTensorDescriptor,
                    device(args.c),
                )
            },
            "cudnnOpTensor",
        )
    }

    fn add_tensor(&self, handle: RawDnnHandle, args: &AddTensorArgs) -> VendorResult<()> {
        // SAFETY: See `op_tensor`.
        check(
            unsafe {
                (self.fns.add_tensor)(
                    handle.0 as CudnnHandle,
                    scalar(&args.alpha),
                    args.a_desc.0 as CudnnTensorDescriptor,
                    device(args.a),
                    scalar(&args.beta),
                    args.c_desc.0 as CudnnTensorDescriptor,
                    device(args.c),
                )
            },
            "cudnnAddTensor",
        )
    }

    fn lrn_cross_channel_forward(
        &self,
        handle: RawDnnHandle,
        args: &LrnForwardArgs,
    ) -> VendorResult<()> {
        // SAFETY: See `op_tensor`.
        check(
            unsafe {
                (self.fns.lrn_forward)(
                    handle.0 as CudnnHandle,
                    args.lrn_desc.0 as CudnnLrnDescriptor,
                    args.mode as i32,
                    scalar(&args.alpha),
                    args.x_desc.0 as CudnnTensorDescriptor,
                    device(args.x),
                    scalar(&args.beta),
                    args.y_desc.0 as CudnnTensorDescriptor,
                    device(args.y),
                )
            },
            "cudnnLRNCrossChannelForward",
        )
    }

    fn lrn_cross_channel_backward(
        &self,
        handle: RawDnnHandle,
        args: &LrnBackwardArgs,
    ) -> VendorResult<()> {
        // SAFETY: See `op_tensor`.
        check(
            unsafe {
                (self.fns.lrn_backward)(
                    handle.0 as CudnnHandle,
                    args.lrn_desc.0 as CudnnLrnDescriptor,
                    args.mode as i32,
                    scalar(&args.alpha),
                    args.y_desc.0 as CudnnTensorDescriptor,
                    device(args.y),
                    args.dy_desc.0 as CudnnTensorDescriptor,
                    device(args.dy),
                    args.x_desc.0 as CudnnTensorDescriptor,
                    device(args.x),
                    scalar(&args.beta),
                    args.dx_desc.0 as CudnnTensorDescriptor,
                    device(args.dx),
                )
            },
            "cudnnLRNCrossChannelBackward",
        )
    }
}
