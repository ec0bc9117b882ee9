//! Cooperative node-local shared memory (xpm).
//!
//! Every process on a node asks for some number of bytes; together they
//! receive one contiguous segment that holds all requests back to back in
//! node-rank order. The node's rank 0 is the **custodian**: it creates and
//! owns the segment, everyone else attaches to it.
//!
//! ```text
//!   node rank:      0           1        2
//!   request:     [ 100 bytes ][ 50 ][  0  ]
//!   segment:     [0 ........ 100 ... 150)
//! ```
//!
//! # Lifecycle
//!
//! `Uninitialized → Sizing → Ready → Destroyed`
//!
//! - [`Xpm::construct`] records the request ([`XpmState::Sizing`]).
//! - [`Xpm::allocate`] exchanges the requests, sums them, and creates or
//!   attaches the segment ([`XpmState::Ready`]). Any failure destroys the
//!   allocator before the error is returned.
//! - [`Xpm::destroy`] (or drop) releases the segment. It is idempotent.
//!
//! # Example
//!
//! ```
//! use std::net::IpAddr;
//! use nodegroup::{LocalUniverse, NodeContext, StaticResolver, Xpm};
//!
//! let hosts = StaticResolver::new().with("n0", "10.0.0.1".parse::<IpAddr>().unwrap());
//! let out = LocalUniverse::new(["n0", "n0"]).run(|world| {
//!     let ctx = NodeContext::discover(&world, &hosts)?;
//!     let request = if ctx.node_local_rank() == 0 { 100 } else { 50 };
//!     let xpm = Xpm::allocate_shared(&ctx, request)?;
//!     let mine = xpm.local_view()?;
//!     Ok((xpm.global_size(), mine.range()))
//! });
//! let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
//! assert_eq!(out, vec![(150, 0..100), (150, 100..150)]);
//! ```

use std::ops::Range;

use crate::comm::{Collective, Segment};
use crate::error::{Error, Result};
use crate::node::NodeContext;

/// Allocator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XpmState {
    /// No bookkeeping allocated yet.
    Uninitialized,
    /// Request recorded; waiting for [`Xpm::allocate`].
    Sizing,
    /// Segment created or attached.
    Ready,
    /// Segment released.
    Destroyed,
}

/// A byte range of the shared segment covering a run of participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpmView {
    participants: Range<i32>,
    offset: usize,
    len: usize,
}

impl XpmView {
    /// Node ranks whose regions the view covers (half-open).
    pub fn participants(&self) -> Range<i32> {
        self.participants.clone()
    }

    /// Byte offset of the view from the start of the segment.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte range of the view within the segment.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Backing segment: owned by the custodian, attached by everyone else.
enum Backing<C: Collective> {
    Custodian(C::Owned),
    Attached(C::Attached),
}

impl<C: Collective> Backing<C> {
    fn len(&self) -> usize {
        match self {
            Backing::Custodian(s) => s.len(),
            Backing::Attached(s) => s.len(),
        }
    }

    fn as_ptr(&self) -> *mut u8 {
        match self {
            Backing::Custodian(s) => s.as_ptr(),
            Backing::Attached(s) => s.as_ptr(),
        }
    }

    fn release(self) {
        match self {
            Backing::Custodian(owned) => {
                tracing::debug!(bytes = owned.len(), "custodian releasing node segment");
                drop(owned);
            }
            Backing::Attached(attached) => {
                tracing::trace!(bytes = attached.len(), "detaching from node segment");
                drop(attached);
            }
        }
    }
}

/// Sum of every participant's request.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if any request is negative or the total
/// does not fit in the address space.
pub fn aggregate_size(sizes: &[i64]) -> Result<usize> {
    let mut total: i64 = 0;
    for (qid, &size) in sizes.iter().enumerate() {
        if size < 0 {
            return Err(Error::InvalidArgument(format!(
                "node rank {qid} requested {size} bytes"
            )));
        }
        total = total.checked_add(size).ok_or_else(|| {
            Error::InvalidArgument("aggregate shared size overflows".into())
        })?;
    }
    usize::try_from(total)
        .map_err(|_| Error::InvalidArgument(format!("aggregate size {total} is not addressable")))
}

/// Sum of `sizes[start..end]`; entries are known to be non-negative.
fn range_sum(sizes: &[i64], start: usize, end: usize) -> usize {
    sizes[start..end].iter().map(|&s| s as usize).sum()
}

/// One process's handle on a cooperative node-shared allocation.
pub struct Xpm<'a, C: Collective> {
    ctx: &'a NodeContext<C>,
    state: XpmState,
    custodian: bool,
    local_size: i64,
    local_sizes: Vec<i64>,
    global_size: usize,
    backing: Option<Backing<C>>,
}

impl<'a, C: Collective> Xpm<'a, C> {
    /// Record this process's request of `local_size` bytes.
    ///
    /// Local only; no communication happens until [`allocate`](Self::allocate).
    /// The request is validated during allocation, where every participant
    /// sees every request and all of them fail together.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `ctx` has been torn down
    /// - [`Error::OutOfResources`] if the size table cannot be allocated
    pub fn construct(ctx: &'a NodeContext<C>, local_size: i64) -> Result<Self> {
        let mut xpm = Xpm {
            ctx,
            state: XpmState::Uninitialized,
            custodian: false,
            local_size: 0,
            local_sizes: Vec::new(),
            global_size: 0,
            backing: None,
        };
        ctx.node_comm()?;

        let n = usize::try_from(ctx.node_group_size())
            .map_err(|_| Error::InvalidArgument("negative node group size".into()))?;
        xpm.local_sizes
            .try_reserve_exact(n)
            .map_err(|e| Error::OutOfResources(format!("xpm size table: {e}")))?;
        xpm.local_sizes.resize(n, 0);
        xpm.custodian = ctx.is_custodian();
        xpm.local_size = local_size;
        xpm.state = XpmState::Sizing;
        Ok(xpm)
    }

    /// Construct and allocate in one step (collective over the node).
    pub fn allocate_shared(ctx: &'a NodeContext<C>, local_size: i64) -> Result<Self> {
        let mut xpm = Self::construct(ctx, local_size)?;
        xpm.allocate()?;
        Ok(xpm)
    }

    /// Exchange requests and create or attach the segment (collective over the node).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if not in [`XpmState::Sizing`], or if any
    ///   participant's request is invalid
    /// - [`Error::CollectiveFailure`] if the size exchange fails
    /// - [`Error::System`] if the segment cannot be created or attached
    ///
    /// On error the allocator is left [`XpmState::Destroyed`].
    pub fn allocate(&mut self) -> Result<()> {
        if self.state != XpmState::Sizing {
            return Err(Error::InvalidArgument(format!(
                "allocate called in state {:?}",
                self.state
            )));
        }
        match self.negotiate() {
            Ok(backing) => {
                self.backing = Some(backing);
                self.state = XpmState::Ready;
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, "xpm allocation failed; destroying");
                self.destroy();
                Err(e)
            }
        }
    }

    fn negotiate(&mut self) -> Result<Backing<C>> {
        let ctx = self.ctx;
        let comm = ctx.node_comm()?;
        let sizes = comm.allgather(self.local_size)?;
        if sizes.len() != self.local_sizes.len() {
            return Err(Error::CollectiveFailure {
                op: "allgather",
                code: -1,
            });
        }
        self.local_sizes.copy_from_slice(&sizes);
        self.global_size = aggregate_size(&self.local_sizes)?;
        tracing::debug!(
            node_rank = ctx.node_local_rank(),
            sizes = ?self.local_sizes,
            bytes = self.global_size,
            "negotiated xpm layout"
        );

        let backing = if self.custodian {
            Backing::Custodian(comm.create_segment(self.global_size)?)
        } else {
            Backing::Attached(comm.attach_segment()?)
        };
        if backing.len() < self.global_size {
            let have = backing.len();
            backing.release();
            return Err(Error::System(format!(
                "segment holds {have} bytes, layout needs {}",
                self.global_size
            )));
        }
        Ok(backing)
    }

    /// The view covering participants `qid_start..qid_end` (half-open).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if the allocator is not ready,
    /// `qid_start > qid_end`, or either bound is outside `0..=node_group_size`.
    pub fn view_by_range(&self, qid_start: i32, qid_end: i32) -> Result<XpmView> {
        if self.state != XpmState::Ready {
            return Err(Error::InvalidArgument(format!(
                "view requested in state {:?}",
                self.state
            )));
        }
        let n = self.local_sizes.len();
        let (start, end) = match (usize::try_from(qid_start), usize::try_from(qid_end)) {
            (Ok(s), Ok(e)) if s <= e && e <= n => (s, e),
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "participant range {qid_start}..{qid_end} invalid for {n} participants"
                )))
            }
        };
        Ok(XpmView {
            participants: qid_start..qid_end,
            offset: range_sum(&self.local_sizes, 0, start),
            len: range_sum(&self.local_sizes, start, end),
        })
    }

    /// The view covering this process's own request.
    pub fn local_view(&self) -> Result<XpmView> {
        let me = self.ctx.node_local_rank();
        self.view_by_range(me, me + 1)
    }

    /// Read access to the bytes of `view`.
    ///
    /// # Safety Contract
    ///
    /// Other participants may write the segment at any time; the caller must
    /// synchronize (e.g. with a node-wide collective) before reading data
    /// written by another process.
    pub fn bytes(&self, view: &XpmView) -> Result<&[u8]> {
        let ptr = self.checked_ptr(view)?;
        // SAFETY: checked_ptr verified the view lies within the live segment.
        Ok(unsafe { std::slice::from_raw_parts(ptr, view.len) })
    }

    /// Write access to the bytes of `view`.
    ///
    /// # Safety Contract
    ///
    /// The segment is shared; `&mut self` only excludes other users of this
    /// handle. The caller must ensure no other process accesses the same bytes
    /// concurrently.
    pub fn bytes_mut(&mut self, view: &XpmView) -> Result<&mut [u8]> {
        let ptr = self.checked_ptr(view)?;
        // SAFETY: checked_ptr verified the view lies within the live segment,
        // and `&mut self` gives exclusive access through this handle.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, view.len) })
    }

    fn checked_ptr(&self, view: &XpmView) -> Result<*mut u8> {
        let backing = match (&self.backing, self.state) {
            (Some(b), XpmState::Ready) => b,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "segment access in state {:?}",
                    self.state
                )))
            }
        };
        let end = view.offset.checked_add(view.len);
        if end.map_or(true, |end| end > backing.len()) {
            return Err(Error::InvalidArgument(format!(
                "view {:?} exceeds segment of {} bytes",
                view.range(),
                backing.len()
            )));
        }
        // SAFETY: offset is within the segment (checked above).
        Ok(unsafe { backing.as_ptr().add(view.offset) })
    }

    /// Release the segment and size table. Idempotent.
    pub fn destroy(&mut self) {
        if let Some(backing) = self.backing.take() {
            backing.release();
        }
        self.local_sizes = Vec::new();
        self.global_size = 0;
        self.state = XpmState::Destroyed;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> XpmState {
        self.state
    }

    /// Whether this process owns the segment.
    pub fn is_custodian(&self) -> bool {
        self.custodian
    }

    /// This process's request in bytes.
    pub fn local_size(&self) -> i64 {
        self.local_size
    }

    /// Every participant's request, indexed by node rank.
    pub fn local_sizes(&self) -> &[i64] {
        &self.local_sizes
    }

    /// Total size of the segment layout in bytes.
    pub fn global_size(&self) -> usize {
        self.global_size
    }
}

impl<C: Collective> Drop for Xpm<'_, C> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sums_every_participant() {
        assert_eq!(aggregate_size(&[100, 50]), Ok(150));
        assert_eq!(aggregate_size(&[1, 2, 3, 4]), Ok(10));
        assert_eq!(aggregate_size(&[]), Ok(0));
    }

    #[test]
    fn aggregate_rejects_negative_and_overflow() {
        assert!(matches!(
            aggregate_size(&[10, -1]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            aggregate_size(&[i64::MAX, 1]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn range_sum_is_half_open() {
        let sizes = [100, 50, 25];
        assert_eq!(range_sum(&sizes, 0, 0), 0);
        assert_eq!(range_sum(&sizes, 0, 1), 100);
        assert_eq!(range_sum(&sizes, 1, 3), 75);
    }

    #[test]
    fn view_range_arithmetic() {
        let view = XpmView {
            participants: 1..2,
            offset: 100,
            len: 50,
        };
        assert_eq!(view.range(), 100..150);
        assert!(!view.is_empty());
        assert_eq!(view.participants(), 1..2);
    }
}
