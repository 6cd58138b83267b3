use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use primbridge::{
    Access, Arg, BridgeError, BridgeResult, DeviceMemory, DevicePtr, ExecCtx, ManagedBuffer,
    Queue,
};

/// Host-backed device memory that counts live allocations.
#[derive(Default)]
struct HostMemory {
    next: AtomicU64,
    blocks: Mutex<HashMap<u64, Vec<u8>>>,
    frees: AtomicUsize,
}

impl HostMemory {
    fn live(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }
}

impl DeviceMemory for HostMemory {
    fn alloc(&self, bytes: usize) -> BridgeResult<DevicePtr> {
        let addr = 0x1000 * (self.next.fetch_add(1, Ordering::Relaxed) + 1);
        self.blocks.lock().unwrap().insert(addr, vec![0; bytes]);
        Ok(DevicePtr(addr))
    }

    fn free(&self, ptr: DevicePtr) -> BridgeResult<()> {
        self.frees.fetch_add(1, Ordering::Relaxed);
        self.blocks
            .lock()
            .unwrap()
            .remove(&ptr.addr())
            .map(|_| ())
            .ok_or_else(|| BridgeError::runtime("double free"))
    }

    fn upload(&self, dst: DevicePtr, src: &[u8]) -> BridgeResult<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let block = blocks
            .get_mut(&dst.addr())
            .ok_or_else(|| BridgeError::runtime("unknown pointer"))?;
        block[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn download(&self, src: DevicePtr, dst: &mut [u8]) -> BridgeResult<()> {
        let blocks = self.blocks.lock().unwrap();
        let block = blocks
            .get(&src.addr())
            .ok_or_else(|| BridgeError::runtime("unknown pointer"))?;
        dst.copy_from_slice(&block[..dst.len()]);
        Ok(())
    }
}

fn setup() -> Result<(Arc<HostMemory>, Queue)> {
    Ok((Arc::new(HostMemory::default()), Queue::new("test")?))
}

#[test]
fn upload_then_download_round_trips() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory.clone(), 6)?;
    queue.upload(&buffer, vec![1, 2, 3, 4, 5, 6])?;
    assert_eq!(queue.download(&buffer)?, [1, 2, 3, 4, 5, 6]);

    queue.fill(&buffer, 9)?.wait()?;
    assert_eq!(queue.download(&buffer)?, [9; 6]);
    Ok(())
}

#[test]
fn upload_size_must_match_the_buffer() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory, 4)?;
    let err = queue.upload(&buffer, vec![0; 3]).unwrap_err();
    assert!(matches!(err, BridgeError::InvalidArguments(_)));
    Ok(())
}

#[test]
fn empty_buffers_hold_no_allocation() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory.clone(), 0)?;
    assert_eq!(memory.live(), 0);
    assert!(queue.download(&buffer)?.is_empty());
    drop(buffer);
    assert_eq!(memory.frees.load(Ordering::Relaxed), 0);
    Ok(())
}

#[test]
fn last_clone_releases_the_allocation() -> Result<()> {
    let memory = Arc::new(HostMemory::default());
    let buffer = ManagedBuffer::new(memory.clone(), 32)?;
    let clone = buffer.clone();
    assert_eq!(clone.id(), buffer.id());
    drop(buffer);
    assert_eq!(memory.live(), 1);
    drop(clone);
    assert_eq!(memory.live(), 0);
    Ok(())
}

#[test]
fn interop_region_waits_for_pending_work() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory.clone(), 4)?;
    let (release, gate) = mpsc::channel::<()>();

    // Hold the queue worker until the region is already waiting.
    let blocker = queue.submit(&[Access::write(&buffer)], move || {
        gate.recv_timeout(Duration::from_secs(5))
            .map_err(|_| BridgeError::runtime("gate dropped"))
    })?;
    queue.upload(&buffer, vec![7, 7, 7, 7])?;
    let opener = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        release.send(()).ok();
    });

    let access = Access::read(&buffer);
    let seen = queue.interop(std::slice::from_ref(&access), |handler| {
        let ptr = handler.memory(&access)?;
        let mut host = [0u8; 4];
        memory.download(ptr, &mut host)?;
        Ok(host)
    })?;
    assert!(blocker.is_complete());
    assert_eq!(seen, [7; 4]);
    opener.join().unwrap();
    Ok(())
}

#[test]
fn work_submitted_after_a_region_observes_its_writes() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory.clone(), 2)?;
    let access = Access::write(&buffer);
    queue.interop(std::slice::from_ref(&access), |handler| {
        memory.upload(handler.memory(&access)?, &[4, 2])
    })?;
    assert_eq!(queue.download(&buffer)?, [4, 2]);
    Ok(())
}

#[test]
fn aliased_accesses_share_one_dependency() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory, 8)?;
    queue.fill(&buffer, 1)?;
    let accesses = [Access::read(&buffer), Access::write(&buffer)];
    let count = queue.interop(&accesses, |handler| Ok(handler.accesses().len()))?;
    assert_eq!(count, 2);
    buffer.wait_idle()?;
    Ok(())
}

#[test]
fn interop_rejects_unregistered_buffers_and_releases_on_error() -> Result<()> {
    let (memory, queue) = setup()?;
    let registered = ManagedBuffer::new(memory.clone(), 4)?;
    let stranger = ManagedBuffer::new(memory, 4)?;
    let access = Access::read(&registered);
    let err = queue
        .interop(std::slice::from_ref(&access), |handler| {
            handler.memory(&Access::read(&stranger))
        })
        .unwrap_err();
    assert!(matches!(err, BridgeError::Runtime(_)));

    // The failed region still completes, so later work is not blocked.
    queue.fill(&registered, 3)?.wait()?;
    assert_eq!(queue.download(&registered)?, [3; 4]);
    Ok(())
}

#[test]
fn failing_tasks_propagate_to_dependents() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory, 4)?;
    let failed = queue.submit(&[Access::write(&buffer)], || Err(BridgeError::runtime("boom")))?;
    assert_eq!(failed.wait(), Err(BridgeError::runtime("boom")));
    assert!(queue.download(&buffer).is_err());
    Ok(())
}

#[test]
fn panicking_tasks_fail_their_event() -> Result<()> {
    let (_, queue) = setup()?;
    let event = queue.submit(&[], || panic!("task panic"))?;
    assert!(matches!(event.wait(), Err(BridgeError::Runtime(_))));
    queue.wait()?;
    Ok(())
}

#[test]
fn exec_ctx_reports_missing_arguments() -> Result<()> {
    let memory = Arc::new(HostMemory::default());
    let buffer = ManagedBuffer::new(memory, 4)?;
    let ctx = ExecCtx::new().with_arg(Arg::Src0, &buffer);
    assert_eq!(ctx.input(Arg::Src0)?.buffer().id(), buffer.id());
    assert_eq!(ctx.output(Arg::Dst).unwrap_err(), BridgeError::MissingArgument(Arg::Dst));
    Ok(())
}

/// Runs `regions` interop regions on a fresh queue per thread and reports whether every
/// thread finished within the timeout.
fn run_crossing_regions(patterns: Vec<Vec<Access>>, regions: usize) -> Result<bool> {
    let (done, finished) = mpsc::channel::<BridgeResult<()>>();
    let workers = patterns.len();
    for (index, accesses) in patterns.into_iter().enumerate() {
        let done = done.clone();
        std::thread::spawn(move || {
            let result = Queue::new(format!("crossing-{index}")).and_then(|queue| {
                (0..regions).try_for_each(|_| queue.interop(&accesses, |_| Ok(())))
            });
            done.send(result).ok();
        });
    }
    for _ in 0..workers {
        match finished.recv_timeout(Duration::from_secs(30)) {
            Ok(result) => result?,
            Err(_) => return Ok(false),
        }
    }
    Ok(true)
}

#[test]
fn queues_reading_shared_buffers_make_progress() -> Result<()> {
    let memory = Arc::new(HostMemory::default());
    let x = ManagedBuffer::new(memory.clone(), 4)?;
    let y = ManagedBuffer::new(memory, 4)?;
    let patterns = vec![
        vec![Access::read(&x), Access::read(&y)],
        vec![Access::read(&y), Access::read(&x)],
    ];
    assert!(run_crossing_regions(patterns, 50_000)?, "regions deadlocked");
    Ok(())
}

#[test]
fn queues_writing_crossed_buffers_make_progress() -> Result<()> {
    let memory = Arc::new(HostMemory::default());
    let x = ManagedBuffer::new(memory.clone(), 4)?;
    let y = ManagedBuffer::new(memory, 4)?;
    let patterns = vec![
        vec![Access::read(&x), Access::write(&y)],
        vec![Access::write(&x), Access::read(&y)],
        vec![Access::read_write(&y), Access::read(&x)],
    ];
    assert!(run_crossing_regions(patterns, 20_000)?, "regions deadlocked");
    x.wait_idle()?;
    y.wait_idle()?;
    Ok(())
}

#[test]
fn concurrent_reads_do_not_wait_on_each_other() -> Result<()> {
    let (memory, first) = setup()?;
    let buffer = ManagedBuffer::new(memory, 4)?;
    let outer = [Access::read(&buffer)];
    first.interop(&outer, |_| {
        let (entered, seen) = mpsc::channel();
        let shared = buffer.clone();
        std::thread::spawn(move || {
            let inner = [Access::read(&shared)];
            let result =
                Queue::new("second").and_then(|second| second.interop(&inner, |_| Ok(())));
            entered.send(result).ok();
        });
        seen.recv_timeout(Duration::from_secs(5))
            .map_err(|_| BridgeError::runtime("nested read region blocked"))?
    })?;
    Ok(())
}

#[test]
fn writes_wait_for_open_read_regions() -> Result<()> {
    let (memory, reader) = setup()?;
    let writer = Queue::new("writer")?;
    let buffer = ManagedBuffer::new(memory, 4)?;
    writer.upload(&buffer, vec![1; 4])?.wait()?;

    let access = [Access::read(&buffer)];
    let upload = reader.interop(&access, |_| {
        let upload = writer.upload(&buffer, vec![2; 4])?;
        std::thread::sleep(Duration::from_millis(20));
        assert!(!upload.is_complete(), "write overtook an open read region");
        Ok(upload)
    })?;
    upload.wait()?;
    assert_eq!(writer.download(&buffer)?, [2; 4]);
    Ok(())
}

#[test]
fn reads_wait_only_for_the_last_write() -> Result<()> {
    let (memory, queue) = setup()?;
    let buffer = ManagedBuffer::new(memory, 4)?;
    let (release, gate) = mpsc::channel::<()>();
    // A pending read does not hold back a later read of the same buffer.
    let slow_read = queue.submit(&[Access::read(&buffer)], move || {
        gate.recv_timeout(Duration::from_secs(5))
            .map_err(|_| BridgeError::runtime("gate dropped"))
    })?;
    let other = Queue::new("other")?;
    let access = [Access::read(&buffer)];
    other.interop(&access, |_| Ok(()))?;
    assert!(!slow_read.is_complete());
    release.send(())?;
    slow_read.wait()?;
    Ok(())
}
