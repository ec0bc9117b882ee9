//! MPI backend (feature `mpi`).
//!
//! [`Mpi`] owns the MPI environment; [`MpiComm`] wraps an MPI communicator
//! and implements [`Collective`]. Node segments are MPI shared-memory
//! windows: the custodian allocates the whole segment, every other member
//! allocates zero bytes and queries the custodian's base address.
//!
//! Freeing a window is collective in MPI, so every member of a node must drop
//! its segment handle at the same protocol step.
//!
//! # Example
//!
//! ```no_run
//! use nodegroup::{Config, Mpi, NodeContext, Xpm};
//!
//! fn main() -> Result<(), nodegroup::Error> {
//!     let mpi = Mpi::init()?;
//!     let world = mpi.world();
//!     let ctx = NodeContext::from_config(&world, &Config::from_env()?)?;
//!     let xpm = Xpm::allocate_shared(&ctx, 4096)?;
//!     println!("node {} holds {} bytes", ctx.color(), xpm.global_size());
//!     Ok(())
//! }
//! ```

use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::comm::{Collective, Segment};
use crate::error::{Error, Result};
use crate::ffi;

/// Global flag tracking whether MPI has been initialized
static MPI_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// MPI environment handle.
///
/// There can only be one instance at a time. When dropped, it finalizes MPI.
pub struct Mpi {
    /// Marker to make Mpi !Send and !Sync
    _marker: PhantomData<*const ()>,
}

impl Mpi {
    /// Initialize MPI.
    ///
    /// # Errors
    ///
    /// Returns an error if MPI is already initialized or if initialization fails.
    pub fn init() -> Result<Self> {
        if MPI_INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }
        let ret = unsafe { ffi::nodegroup_init() };
        if ret != 0 {
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
            return Err(Error::from_code(ret, "init"));
        }
        Ok(Mpi {
            _marker: PhantomData,
        })
    }

    /// Get a handle to `MPI_COMM_WORLD`.
    pub fn world(&self) -> MpiComm {
        MpiComm {
            handle: unsafe { ffi::nodegroup_comm_world() },
            _marker: PhantomData,
        }
    }

    /// Check if MPI has been initialized.
    pub fn is_initialized() -> bool {
        let mut flag: i32 = 0;
        unsafe { ffi::nodegroup_initialized(&mut flag) };
        flag != 0
    }
}

impl Drop for Mpi {
    fn drop(&mut self) {
        if MPI_INITIALIZED.load(Ordering::SeqCst) {
            unsafe {
                ffi::nodegroup_finalize();
            }
            MPI_INITIALIZED.store(false, Ordering::SeqCst);
        }
    }
}

/// An MPI communicator.
pub struct MpiComm {
    handle: i32,
    /// Marker to prevent Send/Sync (MPI communicators are not thread-safe)
    _marker: PhantomData<*mut ()>,
}

impl MpiComm {
    /// Get the raw communicator handle (for advanced use).
    pub fn raw_handle(&self) -> i32 {
        self.handle
    }

    fn window(&self, bytes: usize) -> Result<MpiWindow> {
        let size = i64::try_from(bytes)
            .map_err(|_| Error::InvalidArgument(format!("{bytes} bytes exceeds i64")))?;
        let mut baseptr: *mut std::ffi::c_void = std::ptr::null_mut();
        let mut segsize: i64 = 0;
        let mut win: i32 = 0;
        // SAFETY: valid out-pointers; the shim allocates the window and queries
        // rank 0's segment.
        let ret = unsafe {
            ffi::nodegroup_win_allocate_shared(size, self.handle, &mut baseptr, &mut segsize, &mut win)
        };
        if ret != 0 {
            return Err(Error::System(format!(
                "MPI_Win_allocate_shared failed (code {ret})"
            )));
        }
        let len = usize::try_from(segsize)
            .map_err(|_| Error::System(format!("negative segment size {segsize}")))?;
        let base = match NonNull::new(baseptr.cast::<u8>()) {
            Some(p) => p,
            // Zero-byte segments may have a null base.
            None if len == 0 => NonNull::dangling(),
            None => {
                unsafe { ffi::nodegroup_win_free(win) };
                return Err(Error::System("shared query returned null".into()));
            }
        };
        Ok(MpiWindow { win, base, len })
    }
}

impl Collective for MpiComm {
    type Owned = MpiSegment;
    type Attached = MpiAttachment;

    fn rank(&self) -> i32 {
        let mut rank: i32 = 0;
        unsafe { ffi::nodegroup_comm_rank(self.handle, &mut rank) };
        rank
    }

    fn size(&self) -> i32 {
        let mut size: i32 = 0;
        unsafe { ffi::nodegroup_comm_size(self.handle, &mut size) };
        size
    }

    fn processor_name(&self) -> Result<String> {
        let mut buf = [0u8; 256];
        let mut len: i32 = 0;
        let ret = unsafe {
            ffi::nodegroup_get_processor_name(buf.as_mut_ptr().cast::<std::os::raw::c_char>(), &mut len)
        };
        Error::check(ret, "processor_name")?;
        let len = (len.max(0) as usize).min(buf.len());
        let s = std::str::from_utf8(&buf[..len]).map_err(|_| Error::Resolution {
            host: String::from_utf8_lossy(&buf[..len]).into_owned(),
            reason: "processor name is not UTF-8".into(),
        })?;
        Ok(s.to_string())
    }

    fn duplicate(&self) -> Result<Self> {
        let mut new_handle: i32 = 0;
        let ret = unsafe { ffi::nodegroup_comm_dup(self.handle, &mut new_handle) };
        Error::check(ret, "comm_dup")?;
        Ok(MpiComm {
            handle: new_handle,
            _marker: PhantomData,
        })
    }

    fn split(&self, color: i32, key: i32) -> Result<Self> {
        if color < 0 {
            return Err(Error::InvalidArgument(format!("split color {color} is negative")));
        }
        let mut new_handle: i32 = 0;
        let ret = unsafe { ffi::nodegroup_comm_split(self.handle, color, key, &mut new_handle) };
        Error::check(ret, "comm_split")?;
        Ok(MpiComm {
            handle: new_handle,
            _marker: PhantomData,
        })
    }

    fn allgather_bytes(&self, send: &[u8]) -> Result<Vec<u8>> {
        let size = usize::try_from(self.size()).unwrap_or(0);
        let mut recv = vec![0u8; send.len() * size];
        let ret = unsafe {
            ffi::nodegroup_allgather_bytes(
                send.as_ptr().cast(),
                send.len() as i64,
                recv.as_mut_ptr().cast(),
                self.handle,
            )
        };
        Error::check(ret, "allgather")?;
        Ok(recv)
    }

    fn allreduce_sum(&self, value: i64) -> Result<i64> {
        let mut result: i64 = 0;
        let ret = unsafe { ffi::nodegroup_allreduce_sum_i64(value, &mut result, self.handle) };
        Error::check(ret, "allreduce")?;
        Ok(result)
    }

    fn create_segment(&self, bytes: usize) -> Result<MpiSegment> {
        if self.rank() != 0 {
            return Err(Error::InvalidArgument(
                "only node rank 0 creates the node segment".into(),
            ));
        }
        self.window(bytes).map(|window| MpiSegment { window })
    }

    fn attach_segment(&self) -> Result<MpiAttachment> {
        if self.rank() == 0 {
            return Err(Error::InvalidArgument(
                "node rank 0 creates the node segment, it cannot attach".into(),
            ));
        }
        self.window(0).map(|window| MpiAttachment { window })
    }
}

impl Drop for MpiComm {
    fn drop(&mut self) {
        // Don't free COMM_WORLD (handle 0)
        if self.handle != 0 {
            unsafe { ffi::nodegroup_comm_free(self.handle) };
        }
    }
}

/// A shared window plus the base of rank 0's segment.
struct MpiWindow {
    win: i32,
    base: NonNull<u8>,
    len: usize,
}

impl Drop for MpiWindow {
    fn drop(&mut self) {
        // SAFETY: win was allocated by nodegroup_win_allocate_shared and is
        // freed only here.
        let ret = unsafe { ffi::nodegroup_win_free(self.win) };
        if ret != 0 {
            tracing::warn!(code = ret, "MPI_Win_free failed");
        }
    }
}

/// The custodian's window: it holds the segment memory.
pub struct MpiSegment {
    window: MpiWindow,
}

impl Segment for MpiSegment {
    fn len(&self) -> usize {
        self.window.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.window.base.as_ptr()
    }
}

/// A zero-byte window of a non-custodian, addressing the custodian's memory.
pub struct MpiAttachment {
    window: MpiWindow,
}

impl Segment for MpiAttachment {
    fn len(&self) -> usize {
        self.window.len
    }

    fn as_ptr(&self) -> *mut u8 {
        self.window.base.as_ptr()
    }
}
