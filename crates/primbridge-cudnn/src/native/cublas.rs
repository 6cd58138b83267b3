use std::ffi::c_void;

use libloading::Library;
use primbridge::BridgeResult;

use super::{load_library, load_symbol};
use crate::api::{
    check_status, BlasLibrary, RawBlasHandle, RawStream, VendorLibraryKind, VendorResult,
};

type CublasStatus = i32;
type CublasHandle = *mut c_void;

type CublasCreateFn = unsafe extern "C" fn(handle: *mut CublasHandle) -> CublasStatus;
type CublasDestroyFn = unsafe extern "C" fn(handle: CublasHandle) -> CublasStatus;
type CublasSetStreamFn =
    unsafe extern "C" fn(handle: CublasHandle, stream: *mut c_void) -> CublasStatus;

struct CublasFns {
    create: CublasCreateFn,
    destroy: CublasDestroyFn,
    set_stream: CublasSetStreamFn,
}

/// cuBLAS resolved from its shared library.
pub struct NativeBlas {
    _lib: Library,
    fns: CublasFns,
}

const WHAT: &str = "cuBLAS";

impl NativeBlas {
    pub(super) fn load(override_name: Option<&str>) -> BridgeResult<Self> {
        let lib = load_library(
            WHAT,
            override_name,
            &[
                "libcublas.so.12",
                "libcublas.so",
                "cublas64_12.dll",
                "cublas64_11.dll",
            ],
        )?;
        let fns = CublasFns {
            create: load_symbol(&lib, WHAT, b"cublasCreate_v2\0")?,
            destroy: load_symbol(&lib, WHAT, b"cublasDestroy_v2\0")?,
            set_stream: load_symbol(&lib, WHAT, b"cublasSetStream_v2\0")?,
        };
        Ok(Self { _lib: lib, fns })
    }
}

fn check(status: CublasStatus, call: &'static str) -> VendorResult<()> {
    check_status(VendorLibraryKind::Blas, status, call)
}

impl BlasLibrary for NativeBlas {
    fn name(&self) -> &str {
        "cublas"
    }

    fn create_handle(&self) -> VendorResult<RawBlasHandle> {
        let mut handle: CublasHandle = std::ptr::null_mut();
        // SAFETY: cublasCreate_v2 initializes the output handle pointer.
        check(
            unsafe { (self.fns.create)(&mut handle as *mut CublasHandle) },
            "cublasCreate_v2",
        )?;
        Ok(RawBlasHandle(handle as usize))
    }

    fn destroy_handle(&self, handle: RawBlasHandle) -> VendorResult<()> {
        // SAFETY: Handle is created once and destroyed once by its owner.
        check(
            unsafe { (self.fns.destroy)(handle.0 as CublasHandle) },
            "cublasDestroy_v2",
        )
    }

    fn set_stream(&self, handle: RawBlasHandle, stream: RawStream) -> VendorResult<()> {
        // SAFETY: Both objects came from the vendor libraries.
        check(
            unsafe { (self.fns.set_stream)(handle.0 as CublasHandle, stream.0 as *mut c_void) },
            "cublasSetStream_v2",
        )
    }
}
