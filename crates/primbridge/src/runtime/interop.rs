use crate::error::{BridgeError, BridgeResult};

use super::{DevicePtr, ManagedBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn writes(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

/// A buffer together with the way an operation touches it.
#[derive(Debug, Clone)]
pub struct Access {
    buffer: ManagedBuffer,
    mode: AccessMode,
}

impl Access {
    pub fn new(buffer: &ManagedBuffer, mode: AccessMode) -> Self {
        Self {
            buffer: buffer.clone(),
            mode,
        }
    }

    pub fn read(buffer: &ManagedBuffer) -> Self {
        Self::new(buffer, AccessMode::Read)
    }

    pub fn write(buffer: &ManagedBuffer) -> Self {
        Self::new(buffer, AccessMode::Write)
    }

    pub fn read_write(buffer: &ManagedBuffer) -> Self {
        Self::new(buffer, AccessMode::ReadWrite)
    }

    pub fn buffer(&self) -> &ManagedBuffer {
        &self.buffer
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

/// Resolves registered accesses to raw device pointers while an interop region is open.
///
/// Handlers only exist for the duration of [`Queue::interop`](super::Queue::interop); the
/// pointers they return must not be kept beyond it.
pub struct InteropHandler<'a> {
    accesses: &'a [Access],
}

impl<'a> InteropHandler<'a> {
    pub(crate) fn new(accesses: &'a [Access]) -> Self {
        Self { accesses }
    }

    pub fn memory(&self, access: &Access) -> BridgeResult<DevicePtr> {
        let registered = self
            .accesses
            .iter()
            .any(|candidate| candidate.buffer.id() == access.buffer.id());
        if !registered {
            return Err(BridgeError::runtime(format!(
                "buffer {} was not registered with the interop region",
                access.buffer.id()
            )));
        }
        Ok(access.buffer.device_ptr())
    }

    pub fn accesses(&self) -> &[Access] {
        self.accesses
    }
}
