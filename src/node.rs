//! Node group context: who shares this node with me.
//!
//! [`NodeContext`] runs the discovery protocol once and caches its results:
//!
//! 1. duplicate the world group into a private channel and read rank, size
//!    and host name;
//! 2. resolve the host name and color the job ([`crate::coloring`]);
//! 3. split into node groups and count nodes;
//! 4. exchange `(pid, node rank)` records within the node;
//! 5. exchange global ranks within the node (the rank roster).
//!
//! Each step is a collective; a failure at any step tears down whatever was
//! already built before the error is returned, so callers never see a
//! half-initialized context.
//!
//! # Example
//!
//! ```
//! use std::net::IpAddr;
//! use nodegroup::{LocalUniverse, NodeContext, StaticResolver};
//!
//! let hosts = StaticResolver::new()
//!     .with("n0", "10.0.0.1".parse::<IpAddr>().unwrap())
//!     .with("n1", "10.0.0.2".parse::<IpAddr>().unwrap());
//!
//! let out = LocalUniverse::new(["n0", "n1", "n0", "n1"]).run(|world| {
//!     let ctx = NodeContext::discover(&world, &hosts)?;
//!     Ok((ctx.node_count(), ctx.node_local_rank(), ctx.ranks_on_node()))
//! });
//! let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
//! assert_eq!(out[0], (2, 0, vec![0, 2]));
//! assert_eq!(out[3], (2, 1, vec![1, 3]));
//! ```

use crate::coloring::{self, NodeGroup};
use crate::comm::Collective;
use crate::config::Config;
use crate::datatype::{sealed, Wire};
use crate::error::{Error, Result};
use crate::identity::{HostResolver, NetworkId};
use crate::slurm;

/// OS process id as exchanged between participants.
pub type Pid = i64;

/// One `(pid, node rank)` record of the pid exchange.
///
/// On the wire the fields are sent in declaration order, each big-endian,
/// with no padding: 8 bytes of pid followed by 4 bytes of node rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRankRecord {
    /// Process id of the sender.
    pub pid: Pid,
    /// Node-local rank of the sender.
    pub node_rank: i32,
}

impl sealed::Sealed for PidRankRecord {}

impl Wire for PidRankRecord {
    const SIZE: usize = i64::SIZE + i32::SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.pid.encode(out);
        self.node_rank.encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        PidRankRecord {
            pid: i64::decode(&bytes[..i64::SIZE]),
            node_rank: i32::decode(&bytes[i64::SIZE..Self::SIZE]),
        }
    }
}

/// Node rank → pid table for every process on this node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PidRankMap {
    entries: Vec<PidRankRecord>,
}

impl PidRankMap {
    /// Build from gathered records.
    pub fn new(entries: Vec<PidRankRecord>) -> Self {
        PidRankMap { entries }
    }

    /// Pid of the process with node-local rank `node_rank`.
    pub fn lookup(&self, node_rank: i32) -> Result<Pid> {
        self.entries
            .iter()
            .find(|e| e.node_rank == node_rank)
            .map(|e| e.pid)
            .ok_or(Error::NotFound(node_rank))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records in gather order.
    pub fn iter(&self) -> impl Iterator<Item = &PidRankRecord> {
        self.entries.iter()
    }
}

/// Discovered node topology of the calling process.
///
/// Holds a private duplicate of the world group and the node-scoped group;
/// both are released by [`teardown`](Self::teardown) or on drop.
pub struct NodeContext<C: Collective> {
    hostname: String,
    network_id: Option<NetworkId>,
    rank: i32,
    nranks: i32,
    nnodes: i32,
    color: i32,
    node_rank: i32,
    node_size: i32,
    chan: Option<C>,
    node_comm: Option<C>,
    pid_map: PidRankMap,
    roster: Vec<i32>,
}

impl<C: Collective> NodeContext<C> {
    fn empty() -> Self {
        NodeContext {
            hostname: String::new(),
            network_id: None,
            rank: 0,
            nranks: 0,
            nnodes: 0,
            color: 0,
            node_rank: 0,
            node_size: 0,
            chan: None,
            node_comm: None,
            pid_map: PidRankMap::default(),
            roster: Vec::new(),
        }
    }

    /// Discover the node topology of `world` (collective).
    ///
    /// The host name comes from [`Collective::processor_name`].
    ///
    /// # Errors
    ///
    /// - [`Error::Resolution`] if the host name cannot be resolved
    /// - [`Error::CollectiveFailure`] if any exchange fails
    pub fn discover(world: &C, resolver: impl HostResolver) -> Result<Self> {
        let hostname = world.processor_name()?;
        Self::discover_as(world, &hostname, resolver)
    }

    /// Discover the node topology using `hostname` as this process's host (collective).
    pub fn discover_as(world: &C, hostname: &str, resolver: impl HostResolver) -> Result<Self> {
        let mut ctx = Self::empty();
        match ctx.setup(world, hostname, &resolver) {
            Ok(()) => Ok(ctx),
            Err(e) => {
                tracing::debug!(error = %e, "node discovery failed; tearing down");
                ctx.teardown();
                Err(e)
            }
        }
    }

    /// Discover using the host override, resolver and checks from `config` (collective).
    pub fn from_config(world: &C, config: &Config) -> Result<Self> {
        let hostname = match &config.hostname {
            Some(h) => h.clone(),
            None => world.processor_name()?,
        };
        let ctx = Self::discover_as(world, &hostname, config.resolver())?;
        if config.slurm_check {
            ctx.check_slurm();
        }
        Ok(ctx)
    }

    fn setup(&mut self, world: &C, hostname: &str, resolver: &dyn HostResolver) -> Result<()> {
        let chan = world.duplicate()?;
        self.rank = chan.rank();
        self.nranks = chan.size();
        self.hostname = hostname.to_string();
        let chan = self.chan.insert(chan);

        let mine = resolver.resolve(hostname)?;
        self.network_id = Some(mine);

        let group: NodeGroup<C> = coloring::split_by_node(chan, mine)?;
        self.color = group.color();
        self.node_rank = group.node_rank();
        self.node_size = group.node_size();
        let nnodes = coloring::count_nodes(chan, &group);
        let node_comm = self.node_comm.insert(group.into_comm());
        self.nnodes = nnodes?;

        let me = PidRankRecord {
            pid: world.process_id(),
            node_rank: self.node_rank,
        };
        self.pid_map = PidRankMap::new(node_comm.allgather(me)?);
        tracing::debug!(rank = self.rank, node_rank = self.node_rank, "exchanged pid map");

        self.roster = node_comm.allgather(self.rank)?;
        tracing::debug!(rank = self.rank, roster = ?self.roster, "exchanged rank roster");

        if self.rank == 0 {
            tracing::info!(
                nnodes = self.nnodes,
                nranks = self.nranks,
                "node discovery complete"
            );
        }
        Ok(())
    }

    fn check_slurm(&self) {
        if !slurm::is_slurm_job() {
            return;
        }
        if let Some(expected) = slurm::num_nodes() {
            if expected != self.nnodes {
                tracing::warn!(
                    discovered = self.nnodes,
                    slurm = expected,
                    "discovered node count disagrees with SLURM_NNODES"
                );
            }
        }
        if let (Some(local), Some(tasks)) = (slurm::local_rank(), slurm::local_size()) {
            tracing::debug!(
                job = slurm::job_id().unwrap_or_default(),
                slurm_local_rank = local,
                slurm_tasks = tasks,
                node_rank = self.node_rank,
                node_size = self.node_size,
                "slurm placement"
            );
        }
    }

    /// Number of distinct nodes in the job.
    pub fn node_count(&self) -> i32 {
        self.nnodes
    }

    /// Number of processes on this node.
    pub fn node_group_size(&self) -> i32 {
        self.node_size
    }

    /// Rank of this process within its node.
    pub fn node_local_rank(&self) -> i32 {
        self.node_rank
    }

    /// Dense node index of this process.
    pub fn color(&self) -> i32 {
        self.color
    }

    /// Whether this process is its node's custodian (node-local rank 0).
    pub fn is_custodian(&self) -> bool {
        self.node_rank == 0
    }

    /// Global rank of this process.
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Number of processes in the job.
    pub fn nranks(&self) -> i32 {
        self.nranks
    }

    /// Host name used for discovery.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Resolved network identity of this host.
    pub fn network_id(&self) -> Option<NetworkId> {
        self.network_id
    }

    /// Global ranks of every process on this node, indexed by node-local rank.
    ///
    /// Returns a copy the caller owns.
    pub fn ranks_on_node(&self) -> Vec<i32> {
        self.roster.clone()
    }

    /// Pid of the process with node-local rank `node_rank`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no process on this node has that rank.
    pub fn lookup_pid(&self, node_rank: i32) -> Result<Pid> {
        self.pid_map.lookup(node_rank)
    }

    /// The pid table exchanged within this node.
    pub fn pid_map(&self) -> &PidRankMap {
        &self.pid_map
    }

    /// The node-scoped communicator.
    pub fn node_comm(&self) -> Result<&C> {
        self.node_comm
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("node context has been torn down".into()))
    }

    /// Release the communicators and cached tables. Idempotent.
    pub fn teardown(&mut self) {
        if self.node_comm.take().is_some() {
            tracing::trace!(rank = self.rank, "released node communicator");
        }
        if self.chan.take().is_some() {
            tracing::trace!(rank = self.rank, "released discovery channel");
        }
        self.pid_map = PidRankMap::default();
        self.roster = Vec::new();
    }
}

impl<C: Collective> Drop for NodeContext<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticResolver;
    use crate::local::LocalUniverse;
    use std::net::IpAddr;

    fn resolver() -> StaticResolver {
        StaticResolver::new()
            .with("a", "10.0.0.1".parse::<IpAddr>().unwrap())
            .with("b", "10.0.0.2".parse::<IpAddr>().unwrap())
    }

    #[test]
    fn pid_record_layout_is_packed_in_field_order() {
        let rec = PidRankRecord {
            pid: 0x0102_0304_0506_0708,
            node_rank: 0x0a0b_0c0d,
        };
        let mut buf = Vec::new();
        rec.encode(&mut buf);
        assert_eq!(buf, vec![1, 2, 3, 4, 5, 6, 7, 8, 0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(PidRankRecord::SIZE, 12);
        assert_eq!(PidRankRecord::decode(&buf), rec);
    }

    #[test]
    fn pid_map_lookup_misses_are_not_found() {
        let map = PidRankMap::new(vec![
            PidRankRecord { pid: 11, node_rank: 1 },
            PidRankRecord { pid: 10, node_rank: 0 },
        ]);
        assert_eq!(map.lookup(0), Ok(10));
        assert_eq!(map.lookup(1), Ok(11));
        assert_eq!(map.lookup(2), Err(Error::NotFound(2)));
        assert_eq!(map.lookup(-1), Err(Error::NotFound(-1)));
    }

    #[test]
    fn discovery_populates_every_field() {
        let r = resolver();
        let out = LocalUniverse::new(["b", "a", "b"]).pid_base(500).run(|w| {
            let ctx = NodeContext::discover(&w, &r)?;
            Ok((
                ctx.color(),
                ctx.node_local_rank(),
                ctx.node_group_size(),
                ctx.node_count(),
                ctx.ranks_on_node(),
                ctx.lookup_pid(0)?,
                ctx.hostname().to_string(),
                ctx.is_custodian(),
            ))
        });
        let out: Vec<_> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(out[0], (1, 0, 2, 2, vec![0, 2], 500, "b".into(), true));
        assert_eq!(out[1], (0, 0, 1, 2, vec![1], 501, "a".into(), true));
        assert_eq!(out[2], (1, 1, 2, 2, vec![0, 2], 500, "b".into(), false));
    }

    #[test]
    fn unresolvable_host_fails_discovery() {
        let r = resolver();
        let out = LocalUniverse::new(["zz"]).run(|w| NodeContext::discover(&w, &r).map(|_| ()));
        assert!(matches!(out[0], Err(Error::Resolution { .. })));
    }

    #[test]
    fn teardown_is_idempotent() {
        let r = resolver();
        let out = LocalUniverse::new(["a", "a"]).run(|w| {
            let mut ctx = NodeContext::discover(&w, &r)?;
            ctx.teardown();
            ctx.teardown();
            Ok((ctx.node_comm().is_err(), ctx.lookup_pid(0), ctx.ranks_on_node()))
        });
        for r in out {
            assert_eq!(r.unwrap(), (true, Err(Error::NotFound(0)), vec![]));
        }
    }
}
