pub mod env;
pub mod error;
pub mod exec;
pub mod logging;
pub mod memory;
pub mod primitive;
pub mod runtime;

pub use error::{BridgeError, BridgeResult};
pub use exec::ExecCtx;
pub use memory::{DataType, MemoryDesc};
pub use primitive::{
    Arg, BinaryAlg, BinaryDesc, LrnAlg, LrnDesc, PrimitiveAttr, PrimitiveDesc, PropKind,
};
pub use runtime::{
    Access, AccessMode, DeviceMemory, DevicePtr, Event, InteropHandler, ManagedBuffer, Queue,
};
