//! In-process backend: simulated processes on threads.
//!
//! [`LocalUniverse`] runs one closure per simulated process, each on its own
//! thread, and hands it a [`LocalComm`] for the whole universe. Every
//! simulated process is assigned a host name and a pid, so the discovery
//! protocol sees the same inputs it would see on a real multi-node job.
//!
//! Collectives are implemented with a [`Barrier`] per group and a slot per
//! member: a member deposits its record, waits for the rest, reads every slot,
//! and waits once more so nobody overwrites a slot that is still being read.
//!
//! # Example
//!
//! ```
//! use nodegroup::{Collective, LocalUniverse};
//!
//! let colors = LocalUniverse::new(["n0", "n0", "n1", "n1"]).run(|world| {
//!     let node = world.split(world.rank() / 2, world.rank())?;
//!     Ok((node.rank(), node.size()))
//! });
//! let colors: Vec<_> = colors.into_iter().map(Result::unwrap).collect();
//! assert_eq!(colors, vec![(0, 2), (1, 2), (0, 2), (1, 2)]);
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::{Arc, Barrier, Mutex, MutexGuard, PoisonError};

use crate::comm::{Collective, Segment};
use crate::datatype::{self, Wire};
use crate::error::{Error, Result};

/// Pid assigned to simulated rank 0 unless [`LocalUniverse::pid_base`] says otherwise.
const DEFAULT_PID_BASE: i64 = 4000;

/// Code reported by injected collective failures.
const INJECTED_FAILURE: i32 = 1;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Published outcome of a segment creation: the buffer, or the custodian's error.
type Published = std::result::Result<Arc<Buffer>, String>;

/// State shared by all members of one simulated group.
struct Group {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
    /// Sub-groups under construction, keyed by (split epoch, color).
    children: Mutex<HashMap<(u64, i32), Arc<Group>>>,
    segment: Mutex<Option<Published>>,
}

impl Group {
    fn new(size: usize) -> Self {
        Group {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
            children: Mutex::new(HashMap::new()),
            segment: Mutex::new(None),
        }
    }
}

/// Per-process state shared by every communicator that process derives.
struct Process {
    hostname: String,
    pid: i64,
    calls: Cell<usize>,
    fail_after: Option<usize>,
    segment_limit: Option<usize>,
}

/// A zero-initialized heap block shared between simulated processes.
struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl Buffer {
    fn zeroed(len: usize) -> std::result::Result<Self, String> {
        let mut bytes: Vec<u8> = Vec::new();
        bytes
            .try_reserve_exact(len)
            .map_err(|e| format!("cannot reserve {len} bytes: {e}"))?;
        bytes.resize(len, 0);
        let raw = Box::into_raw(bytes.into_boxed_slice());
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or_else(|| "null allocation".to_string())?;
        Ok(Buffer { ptr, len })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw of a boxed slice of exactly
        // this length and are released only here.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr(),
                self.len,
            )));
        }
    }
}

// SAFETY: the buffer is plain bytes; access discipline is the caller's, as it
// is for OS-level shared memory.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

/// A set of simulated processes, each with an assigned host name.
#[derive(Debug, Clone)]
pub struct LocalUniverse {
    hosts: Vec<String>,
    pid_base: i64,
    fail_after: Option<usize>,
    segment_limit: Option<usize>,
}

impl LocalUniverse {
    /// One simulated process per host name, ranked in iteration order.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LocalUniverse {
            hosts: hosts.into_iter().map(Into::into).collect(),
            pid_base: DEFAULT_PID_BASE,
            fail_after: None,
            segment_limit: None,
        }
    }

    /// Simulated pids are `base + global rank`.
    pub fn pid_base(mut self, base: i64) -> Self {
        self.pid_base = base;
        self
    }

    /// Make every process fail its collective call number `n` (0-based).
    ///
    /// All processes issue the same sequence of collectives, so the whole
    /// universe fails at the same protocol step.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Refuse to create shared segments larger than `bytes`.
    pub fn segment_limit(mut self, bytes: usize) -> Self {
        self.segment_limit = Some(bytes);
        self
    }

    /// Number of simulated processes.
    pub fn size(&self) -> usize {
        self.hosts.len()
    }

    /// Run `f` once per simulated process, each on its own thread.
    ///
    /// Results are returned in global rank order. A process that panics is
    /// reported as [`Error::System`]; note that its peers may then block in
    /// their next collective, exactly as they would on a real job.
    pub fn run<F, T>(&self, f: F) -> Vec<Result<T>>
    where
        F: Fn(LocalComm) -> Result<T> + Sync,
        T: Send,
    {
        let world = Arc::new(Group::new(self.hosts.len()));
        std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .hosts
                .iter()
                .enumerate()
                .map(|(rank, host)| {
                    let world = Arc::clone(&world);
                    let f = &f;
                    let process = Process {
                        hostname: host.clone(),
                        pid: self.pid_base + rank as i64,
                        calls: Cell::new(0),
                        fail_after: self.fail_after,
                        segment_limit: self.segment_limit,
                    };
                    scope.spawn(move || {
                        f(LocalComm {
                            group: world,
                            rank: rank as i32,
                            process: Rc::new(process),
                            epoch: Cell::new(0),
                            _marker: PhantomData,
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(Error::System("simulated process panicked".into())))
                })
                .collect()
        })
    }
}

/// A communicator over simulated processes.
///
/// Like an MPI communicator handle, a `LocalComm` belongs to one process and
/// is neither `Send` nor `Sync`.
pub struct LocalComm {
    group: Arc<Group>,
    rank: i32,
    process: Rc<Process>,
    epoch: Cell<u64>,
    _marker: PhantomData<*mut ()>,
}

impl LocalComm {
    /// Count a collective call and apply any injected failure.
    fn enter(&self, op: &'static str) -> Result<()> {
        let n = self.process.calls.get();
        self.process.calls.set(n + 1);
        match self.process.fail_after {
            Some(limit) if n >= limit => Err(Error::CollectiveFailure {
                op,
                code: INJECTED_FAILURE,
            }),
            _ => Ok(()),
        }
    }

    fn exchange(&self, op: &'static str, send: &[u8]) -> Result<Vec<u8>> {
        lock(&self.group.slots)[self.rank as usize] = send.to_vec();
        self.group.barrier.wait();
        let gathered = {
            let slots = lock(&self.group.slots);
            if slots.iter().any(|s| s.len() != send.len()) {
                None
            } else {
                Some(slots.concat())
            }
        };
        self.group.barrier.wait();
        gathered.ok_or(Error::CollectiveFailure { op, code: -1 })
    }

    fn derive(&self, group: Arc<Group>, rank: i32) -> LocalComm {
        LocalComm {
            group,
            rank,
            process: Rc::clone(&self.process),
            epoch: Cell::new(0),
            _marker: PhantomData,
        }
    }
}

impl Collective for LocalComm {
    type Owned = LocalSegment;
    type Attached = LocalAttachment;

    fn rank(&self) -> i32 {
        self.rank
    }

    fn size(&self) -> i32 {
        self.group.size as i32
    }

    fn processor_name(&self) -> Result<String> {
        Ok(self.process.hostname.clone())
    }

    fn process_id(&self) -> i64 {
        self.process.pid
    }

    fn duplicate(&self) -> Result<Self> {
        self.split(0, self.rank)
    }

    fn split(&self, color: i32, key: i32) -> Result<Self> {
        self.enter("split")?;
        let epoch = self.epoch.get();
        self.epoch.set(epoch + 1);

        let mut record = Vec::with_capacity(2 * i32::SIZE);
        color.encode(&mut record);
        key.encode(&mut record);
        let all = self.exchange("split", &record)?;
        let entries = datatype::decode_all::<i32>(&all)
            .ok_or(Error::CollectiveFailure { op: "split", code: -1 })?;

        let mut members: Vec<(i32, i32)> = entries
            .chunks_exact(2)
            .enumerate()
            .filter(|(_, e)| e[0] == color)
            .map(|(rank, e)| (e[1], rank as i32))
            .collect();
        members.sort_unstable();
        let new_rank = members
            .iter()
            .position(|&(_, r)| r == self.rank)
            .ok_or(Error::CollectiveFailure { op: "split", code: -1 })?;

        let child = Arc::clone(
            lock(&self.group.children)
                .entry((epoch, color))
                .or_insert_with(|| Arc::new(Group::new(members.len()))),
        );
        self.group.barrier.wait();
        if self.rank == 0 {
            lock(&self.group.children).retain(|(e, _), _| *e != epoch);
        }
        Ok(self.derive(child, new_rank as i32))
    }

    fn allgather_bytes(&self, send: &[u8]) -> Result<Vec<u8>> {
        self.enter("allgather")?;
        self.exchange("allgather", send)
    }

    fn allreduce_sum(&self, value: i64) -> Result<i64> {
        self.enter("allreduce")?;
        let all = self.exchange("allreduce", &datatype::encode_one(&value))?;
        datatype::decode_all::<i64>(&all)
            .and_then(|v| v.into_iter().try_fold(0i64, i64::checked_add))
            .ok_or(Error::CollectiveFailure {
                op: "allreduce",
                code: -1,
            })
    }

    fn create_segment(&self, bytes: usize) -> Result<LocalSegment> {
        if self.rank != 0 {
            return Err(Error::InvalidArgument(format!(
                "rank {} cannot create a node segment",
                self.rank
            )));
        }
        self.enter("create_segment")?;
        let created = match self.process.segment_limit {
            Some(limit) if bytes > limit => {
                Err(format!("{bytes} bytes exceeds the segment limit of {limit}"))
            }
            _ => Buffer::zeroed(bytes).map(Arc::new),
        };
        *lock(&self.group.segment) = Some(created.clone());
        self.group.barrier.wait();
        self.group.barrier.wait();
        lock(&self.group.segment).take();
        created
            .map(|buf| LocalSegment { buf })
            .map_err(Error::System)
    }

    fn attach_segment(&self) -> Result<LocalAttachment> {
        if self.rank == 0 {
            return Err(Error::InvalidArgument(
                "rank 0 creates the node segment, it cannot attach".into(),
            ));
        }
        self.enter("attach_segment")?;
        self.group.barrier.wait();
        let published = lock(&self.group.segment).clone();
        self.group.barrier.wait();
        match published {
            Some(Ok(buf)) => Ok(LocalAttachment { buf }),
            Some(Err(reason)) => Err(Error::System(format!("custodian failed: {reason}"))),
            None => Err(Error::System("no segment was published".into())),
        }
    }
}

/// The custodian's owning handle to a simulated node segment.
pub struct LocalSegment {
    buf: Arc<Buffer>,
}

impl Segment for LocalSegment {
    fn len(&self) -> usize {
        self.buf.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.buf.ptr.as_ptr()
    }
}

impl Drop for LocalSegment {
    fn drop(&mut self) {
        tracing::trace!(bytes = self.buf.len, "releasing owned local segment");
    }
}

/// A non-owning attachment to a simulated node segment.
pub struct LocalAttachment {
    buf: Arc<Buffer>,
}

impl Segment for LocalAttachment {
    fn len(&self) -> usize {
        self.buf.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.buf.ptr.as_ptr()
    }
}

impl Drop for LocalAttachment {
    fn drop(&mut self) {
        tracing::trace!(bytes = self.buf.len, "detaching from local segment");
    }
}
