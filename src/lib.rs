//! # nodegroup
//!
//! Node discovery and cooperative shared-memory allocation for
//! multi-process jobs.
//!
//! Processes that share a physical machine find each other through a short
//! collective protocol, then jointly allocate one shared segment per node:
//! - Each process resolves its host name to a [`NetworkId`]
//! - Identifiers are all-gathered, sorted, and turned into a dense node
//!   color; the world is split into one node group per color
//! - Node groups exchange process ids and global ranks ([`NodeContext`])
//! - [`Xpm`] sums everyone's requested sizes, lets node rank 0 (the
//!   custodian) create the segment and hands out per-participant views
//!
//! The protocols are generic over [`Collective`]. Two backends ship with the
//! crate: [`LocalUniverse`]/[`LocalComm`] simulates processes on threads and
//! needs nothing installed, and `MpiComm` (feature `mpi`) runs over a real
//! MPI library.
//!
//! ## Quick Start
//!
//! ```
//! use nodegroup::{LocalUniverse, NodeContext, StaticResolver, Xpm};
//!
//! let hosts = StaticResolver::parse("a=10.0.0.1,b=10.0.0.2").unwrap();
//! let results = LocalUniverse::new(["a", "b", "a"]).run(|world| {
//!     let ctx = NodeContext::discover(&world, &hosts)?;
//!     let xpm = Xpm::allocate_shared(&ctx, 64)?;
//!     Ok((ctx.color(), ctx.node_count(), xpm.global_size()))
//! });
//!
//! let summary: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();
//! assert_eq!(summary, vec![(0, 2, 128), (1, 2, 64), (0, 2, 128)]);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description | Dependencies |
//! |---------|-------------|--------------|
//! | `mpi`   | MPI backend through a C shim | an MPI installation |
//!
//! ## Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `NODEGROUP_HOSTNAME` | Overrides the host name used for discovery |
//! | `NODEGROUP_HOSTS` | Static `name=addr,...` table instead of DNS |
//! | `NODEGROUP_SLURM_CHECK` | Compare discovery with SLURM (default on) |
//! | `NODEGROUP_LOG` | `tracing` filter used by [`logging::init`] |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod coloring;
mod comm;
mod config;
mod datatype;
mod error;
#[cfg(feature = "mpi")]
mod ffi;
mod identity;
mod local;
pub mod logging;
#[cfg(feature = "mpi")]
mod mpi;
mod node;
pub mod slurm;
mod xpm;

pub use coloring::{count_nodes, distinct_nodes, node_color, split_by_node, NodeGroup};
pub use comm::{Collective, Segment};
pub use config::{Config, HOSTNAME_ENV, HOSTS_ENV, SLURM_CHECK_ENV};
pub use datatype::Wire;
pub use error::{Error, Result};
pub use identity::{DnsResolver, HostResolver, NetworkId, StaticResolver};
pub use local::{LocalAttachment, LocalComm, LocalSegment, LocalUniverse};
#[cfg(feature = "mpi")]
pub use mpi::{Mpi, MpiAttachment, MpiComm, MpiSegment};
pub use node::{NodeContext, Pid, PidRankMap, PidRankRecord};
pub use xpm::{aggregate_size, Xpm, XpmState, XpmView};
