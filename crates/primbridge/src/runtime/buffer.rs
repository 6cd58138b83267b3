use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{BridgeError, BridgeResult};
use crate::memory::MemoryDesc;

use super::{DeviceMemory, DevicePtr, Event};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

struct BufferInner {
    id: u64,
    memory: Arc<dyn DeviceMemory>,
    ptr: DevicePtr,
    bytes: usize,
    deps: Mutex<BufferDeps>,
}

/// Outstanding work on one buffer: the newest writer and the readers issued after it.
#[derive(Default)]
struct BufferDeps {
    last_write: Option<Event>,
    readers: Vec<Event>,
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        if self.ptr.is_null() {
            return;
        }
        if let Err(err) = self.memory.free(self.ptr) {
            tracing::warn!(buffer = self.id, error = %err, "failed to release device buffer");
        }
    }
}

/// Device allocation whose raw address is only reachable inside an interop region.
///
/// Clones share the allocation; the memory is released when the last clone drops.
#[derive(Clone)]
pub struct ManagedBuffer {
    inner: Arc<BufferInner>,
}

impl fmt::Debug for ManagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedBuffer")
            .field("id", &self.inner.id)
            .field("bytes", &self.inner.bytes)
            .finish()
    }
}

impl ManagedBuffer {
    /// Allocates `bytes` from `memory`. Empty buffers hold no device allocation.
    pub fn new(memory: Arc<dyn DeviceMemory>, bytes: usize) -> BridgeResult<Self> {
        let ptr = if bytes == 0 {
            DevicePtr::NULL
        } else {
            memory.alloc(bytes)?
        };
        Ok(Self {
            inner: Arc::new(BufferInner {
                id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
                memory,
                ptr,
                bytes,
                deps: Mutex::new(BufferDeps::default()),
            }),
        })
    }

    pub fn for_desc(memory: Arc<dyn DeviceMemory>, desc: &MemoryDesc) -> BridgeResult<Self> {
        Self::new(memory, desc.size_in_bytes())
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn bytes(&self) -> usize {
        self.inner.bytes
    }

    /// Waits for every operation recorded against this buffer.
    pub fn wait_idle(&self) -> BridgeResult<()> {
        let deps = self.lock_deps()?;
        let pending: Vec<Event> = deps.last_write.iter().chain(&deps.readers).cloned().collect();
        drop(deps);
        pending.iter().try_for_each(Event::wait)
    }

    pub(crate) fn device_ptr(&self) -> DevicePtr {
        self.inner.ptr
    }

    pub(crate) fn memory(&self) -> &Arc<dyn DeviceMemory> {
        &self.inner.memory
    }

    /// Records `event` as the newest access and returns the events it must wait for.
    ///
    /// Reads wait for the last write only; writes wait for the last write and every read
    /// issued since.
    pub(crate) fn record(&self, event: &Event, writes: bool) -> BridgeResult<Vec<Event>> {
        let mut deps = self.lock_deps()?;
        deps.readers.retain(|reader| !reader.is_complete());
        let mut waits: Vec<Event> = deps.last_write.iter().cloned().collect();
        if writes {
            waits.append(&mut deps.readers);
            deps.last_write = Some(event.clone());
        } else {
            deps.readers.push(event.clone());
        }
        Ok(waits)
    }

    fn lock_deps(&self) -> BridgeResult<MutexGuard<'_, BufferDeps>> {
        self.inner
            .deps
            .lock()
            .map_err(|_| BridgeError::runtime("buffer dependency mutex poisoned"))
    }
}
