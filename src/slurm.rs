//! SLURM scheduler environment readers.
//!
//! Discovery never trusts these values; they are only compared against what
//! the protocol found, to flag misconfigured jobs (for example two nodes whose
//! host names resolve to the same address). Each reader returns `None` when the
//! variable is unset or unparsable.
//!
//! | Function | Variable | Description |
//! |----------|----------|-------------|
//! | `job_id()` | `SLURM_JOB_ID` | Unique job identifier |
//! | `local_rank()` | `SLURM_LOCALID` | Task ID relative to this node |
//! | `local_size()` | `SLURM_NTASKS_PER_NODE` | Number of tasks on this node |
//! | `num_nodes()` | `SLURM_NNODES` | Total number of nodes |

use std::env;

/// Check if running under SLURM job scheduler.
pub fn is_slurm_job() -> bool {
    env::var("SLURM_JOB_ID").is_ok()
}

/// Get the SLURM job ID.
pub fn job_id() -> Option<String> {
    env::var("SLURM_JOB_ID").ok()
}

/// Get the local (intra-node) rank of this process.
pub fn local_rank() -> Option<i32> {
    env::var("SLURM_LOCALID").ok().and_then(|s| s.parse().ok())
}

/// Get the number of tasks per node.
pub fn local_size() -> Option<i32> {
    env::var("SLURM_NTASKS_PER_NODE")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| {
            // Fallback: first entry of SLURM_TASKS_PER_NODE, e.g. "4(x2),3"
            env::var("SLURM_TASKS_PER_NODE")
                .ok()
                .and_then(|s| first_task_count(&s))
        })
}

/// Get the total number of nodes allocated.
pub fn num_nodes() -> Option<i32> {
    env::var("SLURM_NNODES").ok().and_then(|s| s.parse().ok())
}

fn first_task_count(spec: &str) -> Option<i32> {
    spec.split(|c: char| c == ',' || c == '(').next().and_then(|n| n.trim().parse().ok())
}
