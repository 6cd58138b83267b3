use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::error::{BridgeError, BridgeResult};

use super::{Access, Event, InteropHandler, ManagedBuffer};

type Task = Box<dyn FnOnce() -> BridgeResult<()> + Send + 'static>;

struct Job {
    deps: Vec<Event>,
    task: Task,
    event: Event,
}

/// Asynchronous managed-runtime queue.
///
/// Submitted tasks run on a dedicated worker thread. Every task is recorded against the
/// buffers it accesses: later writes are ordered after it, and later reads are ordered
/// after it when it writes. Interop regions follow the same rules.
pub struct Queue {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    interop_lock: Mutex<()>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> BridgeResult<Self> {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(format!("primbridge-queue-{name}"))
            .spawn(move || run_worker(receiver))
            .map_err(|err| BridgeError::runtime(format!("failed to spawn queue worker: {err}")))?;
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            interop_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `task` after every pending operation on `accesses`.
    pub fn submit<F>(&self, accesses: &[Access], task: F) -> BridgeResult<Event>
    where
        F: FnOnce() -> BridgeResult<()> + Send + 'static,
    {
        let event = Event::pending();
        let deps = record_dependencies(accesses, &event)?;
        let job = Job {
            deps,
            task: Box::new(task),
            event: event.clone(),
        };

        let sender = lock_named(&self.sender, "queue sender")?;
        let Some(sender) = sender.as_ref() else {
            let err = BridgeError::runtime(format!("queue {} is shut down", self.name));
            event.complete(Err(err.clone()));
            return Err(err);
        };
        if let Err(mpsc::SendError(job)) = sender.send(job) {
            let err = BridgeError::runtime(format!("queue {} worker exited", self.name));
            job.event.complete(Err(err.clone()));
            return Err(err);
        }
        Ok(event)
    }

    /// Copies `data` into `buffer` once prior work on it has finished.
    pub fn upload(&self, buffer: &ManagedBuffer, data: Vec<u8>) -> BridgeResult<Event> {
        if data.len() != buffer.bytes() {
            return Err(BridgeError::invalid_arguments(format!(
                "upload of {} bytes into buffer of {} bytes",
                data.len(),
                buffer.bytes()
            )));
        }
        let target = buffer.clone();
        self.submit(&[Access::write(buffer)], move || {
            if data.is_empty() {
                return Ok(());
            }
            target.memory().upload(target.device_ptr(), &data)
        })
    }

    pub fn fill(&self, buffer: &ManagedBuffer, value: u8) -> BridgeResult<Event> {
        self.upload(buffer, vec![value; buffer.bytes()])
    }

    /// Reads `buffer` back to the host, blocking until the copy completes.
    pub fn download(&self, buffer: &ManagedBuffer) -> BridgeResult<Vec<u8>> {
        let out = Arc::new(Mutex::new(Vec::new()));
        let source = buffer.clone();
        let sink = Arc::clone(&out);
        let event = self.submit(&[Access::read(buffer)], move || {
            let mut bytes = vec![0u8; source.bytes()];
            if !bytes.is_empty() {
                source.memory().download(source.device_ptr(), &mut bytes)?;
            }
            *lock_named(&sink, "download sink")? = bytes;
            Ok(())
        })?;
        event.wait()?;
        let bytes = std::mem::take(&mut *lock_named(&out, "download sink")?);
        Ok(bytes)
    }

    /// Blocks until everything submitted so far has run.
    pub fn wait(&self) -> BridgeResult<()> {
        self.submit(&[], || Ok(()))?.wait()
    }

    /// Runs `body` with raw-pointer access to `accesses`.
    ///
    /// Regions on one queue are mutually exclusive. Entry blocks until the conflicting
    /// pending work on the referenced buffers has completed; conflicting work submitted while
    /// the region is open waits for the region to close. Reads never wait on reads. `body`
    /// runs on the calling thread and must not submit to this queue.
    pub fn interop<F, R>(&self, accesses: &[Access], body: F) -> BridgeResult<R>
    where
        F: FnOnce(&InteropHandler<'_>) -> BridgeResult<R>,
    {
        let _exclusive = lock_named(&self.interop_lock, "interop")?;
        let region = RegionGuard(Event::pending());
        for dep in record_dependencies(accesses, &region.0)? {
            dep.wait()?;
        }
        tracing::trace!(queue = %self.name, buffers = accesses.len(), "entering interop region");
        let handler = InteropHandler::new(accesses);
        body(&handler)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::warn!(queue = %self.name, "queue worker panicked");
            }
        }
    }
}

/// Completes the region's event however the body exits.
struct RegionGuard(Event);

impl Drop for RegionGuard {
    fn drop(&mut self) {
        self.0.complete(Ok(()));
    }
}

/// Serializes dependency snapshots across every queue, so each task or region sees the
/// buffers it touches in one consistent state and dependency edges only point backwards.
static DEPENDENCY_LOCK: Mutex<()> = Mutex::new(());

fn record_dependencies(accesses: &[Access], event: &Event) -> BridgeResult<Vec<Event>> {
    // Aliased accesses to one buffer collapse into a single access that writes if any does.
    let mut merged: Vec<(&ManagedBuffer, bool)> = Vec::with_capacity(accesses.len());
    for access in accesses {
        let writes = access.mode().writes();
        match merged
            .iter_mut()
            .find(|(buffer, _)| buffer.id() == access.buffer().id())
        {
            Some((_, merged_writes)) => *merged_writes |= writes,
            None => merged.push((access.buffer(), writes)),
        }
    }

    let _snapshot = lock_named(&DEPENDENCY_LOCK, "dependency")?;
    let mut deps = Vec::new();
    for (buffer, writes) in merged {
        deps.extend(buffer.record(event, writes)?);
    }
    Ok(deps)
}

fn run_worker(receiver: Receiver<Job>) {
    for job in receiver {
        let Job { deps, task, event } = job;
        let result = deps.iter().try_for_each(Event::wait).and_then(|()| {
            panic::catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|_| Err(BridgeError::runtime("queue task panicked")))
        });
        event.complete(result);
    }
}

fn lock_named<'a, T>(mutex: &'a Mutex<T>, name: &str) -> BridgeResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| BridgeError::runtime(format!("{name} mutex poisoned")))
}
