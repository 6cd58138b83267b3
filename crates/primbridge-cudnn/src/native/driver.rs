use std::ffi::c_void;

use libloading::Library;
use primbridge::{BridgeResult, DevicePtr};

use super::{load_library, load_symbol};
use crate::api::{
    check_status, DriverLibrary, RawContext, RawStream, VendorLibraryKind, VendorResult,
};

type CUresult = i32;
type CUdevice = i32;
type CUcontext = *mut c_void;
type CUstream = *mut c_void;
type CUdeviceptr = u64;

const CU_STREAM_NON_BLOCKING: u32 = 1;

type CuInitFn = unsafe extern "C" fn(flags: u32) -> CUresult;
type CuDeviceGetCountFn = unsafe extern "C" fn(count: *mut i32) -> CUresult;
type CuDeviceGetFn = unsafe extern "C" fn(device: *mut CUdevice, ordinal: i32) -> CUresult;
type CuCtxCreateV2Fn =
    unsafe extern "C" fn(ctx: *mut CUcontext, flags: u32, dev: CUdevice) -> CUresult;
type CuCtxDestroyV2Fn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxGetCurrentFn = unsafe extern "C" fn(ctx: *mut CUcontext) -> CUresult;
type CuCtxSetCurrentFn = unsafe extern "C" fn(ctx: CUcontext) -> CUresult;
type CuCtxSynchronizeFn = unsafe extern "C" fn() -> CUresult;
type CuStreamCreateFn = unsafe extern "C" fn(stream: *mut CUstream, flags: u32) -> CUresult;
type CuStreamDestroyV2Fn = unsafe extern "C" fn(stream: CUstream) -> CUresult;
type CuStreamSynchronizeFn = unsafe extern "C" fn(stream: CUstream) -> CUresult;
type CuMemAllocV2Fn = unsafe extern "C" fn(dptr: *mut CUdeviceptr, bytesize: usize) -> CUresult;
type CuMemFreeV2Fn = unsafe extern "C" fn(dptr: CUdeviceptr) -> CUresult;
type CuMemcpyHtoDV2Fn = unsafe extern "C" fn(
    dst_device: CUdeviceptr,
    src_host: *const c_void,
    byte_count: usize,
) -> CUresult;
type CuMemcpyDtoHV2Fn = unsafe extern "C" fn(
    dst_host: *mut c_void,
    src_device: CUdeviceptr,
    byte_count: usize,
) -> CUresult;

struct DriverFns {
    cu_device_get_count: CuDeviceGetCountFn,
    cu_device_get: CuDeviceGetFn,
    cu_ctx_create_v2: CuCtxCreateV2Fn,
    cu_ctx_destroy_v2: CuCtxDestroyV2Fn,
    cu_ctx_get_current: CuCtxGetCurrentFn,
    cu_ctx_set_current: CuCtxSetCurrentFn,
    cu_ctx_synchronize: CuCtxSynchronizeFn,
    cu_stream_create: CuStreamCreateFn,
    cu_stream_destroy_v2: CuStreamDestroyV2Fn,
    cu_stream_synchronize: CuStreamSynchronizeFn,
    cu_mem_alloc_v2: CuMemAllocV2Fn,
    cu_mem_free_v2: CuMemFreeV2Fn,
    cu_memcpy_hto_d_v2: CuMemcpyHtoDV2Fn,
    cu_memcpy_dto_h_v2: CuMemcpyDtoHV2Fn,
}

/// CUDA driver API resolved from `libcuda`.
pub struct NativeDriver {
    _lib: Library,
    fns: DriverFns,
}

const WHAT: &str = "CUDA driver";

impl NativeDriver {
    pub(super) fn load(override_name: Option<&str>) -> BridgeResult<Self> {
        let lib = load_library(
            WHAT,
            override_name,
            &["libcuda.so.1", "libcuda.so", "nvcuda.dll", "libcuda.dylib"],
        )?;
        let cu_init: CuInitFn = load_symbol(&lib, WHAT, b"cuInit\0")?;
        let fns = DriverFns {
            cu_device_get_count: load_symbol(&lib, WHAT, b"cuDeviceGetCount\0")?,
            cu_device_get: load_symbol(&lib, WHAT, b"cuDeviceGet\0")?,
            cu_ctx_create_v2: load_symbol(&lib, WHAT, b"cuCtxCreate_v2\0")?,
            cu_ctx_destroy_v2: load_symbol(&lib, WHAT, b"cuCtxDestroy_v2\0")?,
            cu_ctx_get_current: load_symbol(&lib, WHAT, b"cuCtxGetCurrent\0")?,
            cu_ctx_set_current: load_symbol(&lib, WHAT, b"cuCtxSetCurrent\0")?,
            cu_ctx_synchronize: load_symbol(&lib, WHAT, b"cuCtxSynchronize\0")?,
            cu_stream_create: load_symbol(&lib, WHAT, b"cuStreamCreate\0")?,
            cu_stream_destroy_v2: load_symbol(&lib, WHAT, b"cuStreamDestroy_v2\0")?,
            cu_stream_synchronize: load_symbol(&lib, WHAT, b"cuStreamSynchronize\0")?,
            cu_mem_alloc_v2: load_symbol(&lib, WHAT, b"cuMemAlloc_v2\0")?,
            cu_mem_free_v2: load_symbol(&lib, WHAT, b"cuMemFree_v2\0")?,
            cu_memcpy_hto_d_v2: load_symbol(&lib, WHAT, b"cuMemcpyHtoD_v2\0")?,
            cu_memcpy_dto_h_v2: load_symbol(&lib, WHAT, b"cuMemcpyDtoH_v2\0")?,
        };

        // SAFETY: cuInit takes no pointers and must precede every other driver call.
        check(unsafe { cu_init(0) }, "cuInit")?;
        Ok(Self { _lib: lib, fns })
    }
}

fn check(status: CUresult, call: &'static str) -> VendorResult<()> {
    check_status(VendorLibraryKind::Driver, status, call)
}

impl DriverLibrary for NativeDriver {
    fn name(&self) -> &str {
        "cuda"
    }

    fn device_count(&self) -> VendorResult<usize> {
        let mut count = 0i32;
        // SAFETY: `count` is a valid out pointer.
        check(
            unsafe { (self.fns.cu_device_get_count)(&mut count as *mut i32) },
            "cuDeviceGetCount",
        )?;
        Ok(count.max(0) as usize)
    }

    fn create_context(&self, ordinal: usize) -> VendorResult<RawContext> {
        let mut dev: CUdevice = 0;
        let mut ctx: CUcontext = std::ptr::null_mut();
        // SAFETY: Out pointers are valid; the ordinal is range-checked by the driver.
        unsafe {
            check(
                (self.fns.cu_device_get)(&mut dev as *mut CUdevice, ordinal as i32),
                "cuDeviceGet",
            )?;
            check(
                (self.fns.cu_ctx_create_v2)(&mut ctx as *mut CUcontext, 0, dev),
                "cuCtxCreate_v2",
            )?;
        }
        Ok(RawContext(ctx as usize))
    }

    fn destroy_context(&self, ctx: RawContext) -> VendorResult<()> {
        // SAFETY: Context was created by `create_context` and is destroyed once by its owner.
        check(
            unsafe { (self.fns.cu_ctx_destroy_v2)(ctx.0 as CUcontext) },
            "cuCtxDestroy_v2",
        )
    }

    fn current_context(&self) -> VendorResult<Option<RawContext>> {
        let mut ctx: CUcontext = std::ptr::null_mut();
        // SAFETY: `ctx` is a valid out pointer.
        check(
            unsafe { (self.fns.cu_ctx_get_current)(&mut ctx as *mut CUcontext) },
            "cuCtxGetCurrent",
        )?;
        Ok((!ctx.is_null()).then_some(RawContext(ctx as usize)))
    }

    fn set_current_context(&self, ctx: Option<RawContext>) -> VendorResult<()> {
        let raw = ctx.map_or(std::ptr::null_mut(), |ctx| ctx.0 as CUcontext);
        // SAFETY: A null context unbinds the thread; any other value came from the driver.
        check(
            unsafe { (self.fns.cu_ctx_set_current)(raw) },
            "cuCtxSetCurrent",
        )
    }

    fn synchronize_context(&self) -> VendorResult<()> {
        // SAFETY: No pointer arguments.
        check(unsafe { (self.fns.cu_ctx_synchronize)() }, "cuCtxSynchronize")
    }

    fn create_stream(&self) -> VendorResult<RawStream> {
        let mut stream: CUstream = std::ptr::null_mut();
        // SAFETY: `stream` is a valid out pointer.
        check(
            unsafe {
                (self.fns.cu_stream_create)(&mut stream as *mut CUstream, CU_STREAM_NON_BLOCKING)
            },
            "cuStreamCreate",
        )?;
        Ok(RawStream(stream as usize))
    }

    fn destroy_stream(&self, stream: RawStream) -> VendorResult<()> {
        // SAFETY: Stream was created by `create_stream` and is destroyed once by its owner.
        check(
            unsafe { (self.fns.cu_stream_destroy_v2)(stream.0 as CUstream) },
            "cuStreamDestroy_v2",
        )
    }

    fn synchronize_stream(&self, stream: RawStream) -> VendorResult<()> {
        // SAFETY: Stream handle came from the driver.
        check(
            unsafe { (self.fns.cu_stream_synchronize)(stream.0 as CUstream) },
            "cuStreamSynchronize",
        )
    }

    fn mem_alloc(&self, bytes: usize) -> VendorResult<DevicePtr> {
        let mut ptr: CUdeviceptr = 0;
        // SAFETY: `ptr` is a valid out pointer for the allocation.
        check(
            unsafe { (self.fns.cu_mem_alloc_v2)(&mut ptr as *mut CUdeviceptr, bytes) },
            "cuMemAlloc_v2",
        )?;
        Ok(DevicePtr(ptr))
    }

    fn mem_free(&self, ptr: DevicePtr) -> VendorResult<()> {
        // SAFETY: Device pointer was allocated by this driver and is released once.
        check(
            unsafe { (self.fns.cu_mem_free_v2)(ptr.addr()) },
            "cuMemFree_v2",
        )
    }

    fn memcpy_htod(&self, dst: DevicePtr, src: &[u8]) -> VendorResult<()> {
        // SAFETY: Destination is a device allocation of at least `src.len()` bytes.
        check(
            unsafe {
                (self.fns.cu_memcpy_hto_d_v2)(dst.addr(), src.as_ptr() as *const c_void, src.len())
            },
            "cuMemcpyHtoD_v2",
        )
    }

    fn memcpy_dtoh(&self, dst: &mut [u8], src: DevicePtr) -> VendorResult<()> {
        // SAFETY: Source is a device allocation of at least `dst.len()` bytes.
        check(
            unsafe {
                (self.fns.cu_memcpy_dto_h_v2)(
                    dst.as_mut_ptr() as *mut c_void,
                    src.addr(),
                    dst.len(),
                )
            },
            "cuMemcpyDtoH_v2",
        )
    }
}
