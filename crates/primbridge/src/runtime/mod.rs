//! Managed runtime: device allocations wrapped in dependency-tracked buffers, an
//! asynchronous queue for host-side transfers, and the interop region that hands raw device
//! pointers to vendor code.

mod buffer;
mod event;
mod interop;
mod queue;

use std::fmt;

use crate::error::BridgeResult;

pub use buffer::ManagedBuffer;
pub use event::Event;
pub use interop::{Access, AccessMode, InteropHandler};
pub use queue::Queue;

/// Raw device address. Only meaningful to the device that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub const NULL: DevicePtr = DevicePtr(0);

    pub fn addr(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevicePtr({:#x})", self.0)
    }
}

/// Device memory provider a managed runtime allocates buffers from.
///
/// `download` must observe every vendor operation already issued against the memory, so
/// implementations synchronize the device before copying back.
pub trait DeviceMemory: Send + Sync {
    fn alloc(&self, bytes: usize) -> BridgeResult<DevicePtr>;

    fn free(&self, ptr: DevicePtr) -> BridgeResult<()>;

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> BridgeResult<()>;

    fn download(&self, src: DevicePtr, dst: &mut [u8]) -> BridgeResult<()>;
}
