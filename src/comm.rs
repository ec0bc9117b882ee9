//! The collective-communication and shared-memory collaborator.
//!
//! Discovery and cooperative allocation are protocols built on top of a small
//! set of group primitives. [`Collective`] names exactly those primitives so
//! the protocols can run over a real MPI library ([`MpiComm`](crate::MpiComm),
//! feature `mpi`) or over simulated processes on threads
//! ([`LocalComm`](crate::LocalComm)).
//!
//! Every method that touches more than one participant is **collective**: all
//! members of the group must issue the matching call, in the same order, and
//! the call blocks until the whole group has done so.

use crate::datatype::{self, Wire};
use crate::error::{Error, Result};

/// A contiguous block of node-shared memory.
///
/// Implemented by the custodian's owning handle and by the attachment
/// handles of every other participant. Releasing the memory happens when the
/// handle is dropped; owning and attached handles are distinct types so their
/// release logic never aliases.
pub trait Segment {
    /// Length of the segment in bytes.
    fn len(&self) -> usize;

    /// Whether the segment has zero length.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Base address of the segment in this process's address space.
    ///
    /// Valid for [`len()`](Self::len) bytes for the lifetime of the handle.
    fn as_ptr(&self) -> *mut u8;
}

/// A process group that supports the collectives discovery needs.
///
/// # Example
///
/// ```
/// use nodegroup::{Collective, LocalUniverse};
///
/// let results = LocalUniverse::new(["a", "a", "b"]).run(|world| {
///     let sum = world.allreduce_sum(1)?;
///     let ranks = world.allgather(world.rank())?;
///     Ok((sum, ranks))
/// });
/// for r in results {
///     let (sum, ranks) = r.unwrap();
///     assert_eq!(sum, 3);
///     assert_eq!(ranks, vec![0, 1, 2]);
/// }
/// ```
pub trait Collective: Sized {
    /// Owning handle returned to the custodian by [`create_segment`](Self::create_segment).
    type Owned: Segment;
    /// Non-owning handle returned to everyone else by [`attach_segment`](Self::attach_segment).
    type Attached: Segment;

    /// Rank of the calling process in this group.
    fn rank(&self) -> i32;

    /// Number of processes in this group.
    fn size(&self) -> i32;

    /// Name of the host this process runs on.
    fn processor_name(&self) -> Result<String>;

    /// OS process id of the calling process.
    fn process_id(&self) -> i64 {
        i64::from(std::process::id())
    }

    /// Duplicate this group into an independent channel (collective).
    fn duplicate(&self) -> Result<Self>;

    /// Split this group by `color`, ordering members of each part by `key` (collective).
    ///
    /// Members that pass equal keys are ordered by their rank in this group.
    fn split(&self, color: i32, key: i32) -> Result<Self>;

    /// Gather one fixed-size record from every member, in rank order (collective).
    ///
    /// Every member must contribute the same number of bytes.
    fn allgather_bytes(&self, send: &[u8]) -> Result<Vec<u8>>;

    /// Sum a scalar across the group (collective).
    fn allreduce_sum(&self, value: i64) -> Result<i64>;

    /// Create a shared segment of `bytes` bytes (collective, rank 0 only).
    ///
    /// Pairs with [`attach_segment`](Self::attach_segment) on every other member.
    fn create_segment(&self, bytes: usize) -> Result<Self::Owned>;

    /// Attach to the segment rank 0 is creating (collective, ranks > 0).
    fn attach_segment(&self) -> Result<Self::Attached>;

    /// Gather one typed value from every member, in rank order (collective).
    fn allgather<T: Wire>(&self, value: T) -> Result<Vec<T>> {
        let recv = self.allgather_bytes(&datatype::encode_one(&value))?;
        let values = datatype::decode_all::<T>(&recv).ok_or(Error::CollectiveFailure {
            op: "allgather",
            code: -1,
        })?;
        if values.len() != self.size() as usize {
            return Err(Error::CollectiveFailure {
                op: "allgather",
                code: -1,
            });
        }
        Ok(values)
    }
}
