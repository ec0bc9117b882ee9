//! Node coloring: partition a flat process set into node groups.
//!
//! Every process contributes its [`NetworkId`] to one all-gather over the
//! whole job. Because every process then holds the identical sequence, each
//! one can compute the partition on its own: sort the identifiers, count
//! distinct values up to the first occurrence of your own, and that count is
//! your node's color. Processes that share a host share an identifier and
//! therefore a color, and colors are dense in `0..node_count`.
//!
//! The color becomes the split key and the global rank the ordering key, so
//! node-local ranks follow ascending global rank and node-local rank 0 is the
//! lowest global rank on the node.

use crate::comm::Collective;
use crate::error::{Error, Result};
use crate::identity::NetworkId;

/// Color of the process owning `mine`, given every process's identifier.
///
/// `ids` may be in any order; it is not modified.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if `mine` does not appear in `ids`.
///
/// # Example
///
/// ```
/// use nodegroup::{node_color, NetworkId};
///
/// let ids: Vec<NetworkId> = [30, 10, 30, 20].into_iter().map(NetworkId::from_raw).collect();
/// assert_eq!(node_color(&ids, NetworkId::from_raw(10)).unwrap(), 0);
/// assert_eq!(node_color(&ids, NetworkId::from_raw(20)).unwrap(), 1);
/// assert_eq!(node_color(&ids, NetworkId::from_raw(30)).unwrap(), 2);
/// ```
pub fn node_color(ids: &[NetworkId], mine: NetworkId) -> Result<i32> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();

    let mut color = 0i32;
    for (i, id) in sorted.iter().enumerate() {
        if i > 0 && *id != sorted[i - 1] {
            color += 1;
        }
        if *id == mine {
            return Ok(color);
        }
    }
    Err(Error::InvalidArgument(format!(
        "identifier {mine} is not among the {} gathered identifiers",
        ids.len()
    )))
}

/// Number of distinct nodes represented in `ids`.
pub fn distinct_nodes(ids: &[NetworkId]) -> usize {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

/// This process's node-scoped group, as produced by [`split_by_node`].
pub struct NodeGroup<C> {
    color: i32,
    node_rank: i32,
    node_size: i32,
    comm: C,
}

impl<C: Collective> NodeGroup<C> {
    /// Dense node index of this process.
    pub fn color(&self) -> i32 {
        self.color
    }

    /// Rank of this process within its node.
    pub fn node_rank(&self) -> i32 {
        self.node_rank
    }

    /// Number of processes on this node.
    pub fn node_size(&self) -> i32 {
        self.node_size
    }

    /// The node-scoped communicator.
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Give up the node-scoped communicator.
    pub fn into_comm(self) -> C {
        self.comm
    }
}

/// Gather identities over `chan`, color, and split into node groups (collective).
///
/// `chan` must span the whole job and `rank` order in it is the global rank order.
pub fn split_by_node<C: Collective>(chan: &C, mine: NetworkId) -> Result<NodeGroup<C>> {
    let ids = chan.allgather(mine)?;
    let color = node_color(&ids, mine)?;
    tracing::debug!(rank = chan.rank(), %mine, color, "computed node color");

    let comm = chan.split(color, chan.rank())?;
    Ok(NodeGroup {
        color,
        node_rank: comm.rank(),
        node_size: comm.size(),
        comm,
    })
}

/// Count nodes: each node's rank 0 contributes one to a job-wide sum (collective).
pub fn count_nodes<C: Collective>(chan: &C, group: &NodeGroup<C>) -> Result<i32> {
    let contrib = i64::from(group.node_rank == 0);
    let total = chan.allreduce_sum(contrib)?;
    i32::try_from(total).map_err(|_| Error::CollectiveFailure {
        op: "allreduce",
        code: -1,
    })
}
