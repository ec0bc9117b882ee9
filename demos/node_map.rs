//! Node map example: discover the node layout of an MPI job and share a
//! segment per node.
//!
//! Each rank requests `64 * (node_rank + 1)` bytes, writes its node rank into
//! its own view, and after a node-wide collective reads every other view.
//!
//! Run with: mpiexec -n 4 cargo run --example node_map --features mpi

use nodegroup::{Collective, Config, Mpi, NodeContext, Result, Xpm};

fn main() -> Result<()> {
    nodegroup::logging::init();

    let mpi = Mpi::init()?;
    let world = mpi.world();
    let config = Config::from_env()?;

    let ctx = NodeContext::from_config(&world, &config)?;
    println!(
        "rank {}/{} on {}: node {} of {}, node rank {} of {}, ranks on node {:?}",
        ctx.rank(),
        ctx.nranks(),
        ctx.hostname(),
        ctx.color(),
        ctx.node_count(),
        ctx.node_local_rank(),
        ctx.node_group_size(),
        ctx.ranks_on_node()
    );

    let request = 64 * i64::from(ctx.node_local_rank() + 1);
    let mut xpm = Xpm::allocate_shared(&ctx, request)?;

    let mine = xpm.local_view()?;
    xpm.bytes_mut(&mine)?.fill(ctx.node_local_rank() as u8);

    // Order the writes before anyone reads.
    ctx.node_comm()?.allreduce_sum(0)?;

    for q in 0..ctx.node_group_size() {
        let view = xpm.view_by_range(q, q + 1)?;
        let bytes = xpm.bytes(&view)?;
        assert!(
            bytes.iter().all(|&b| b == q as u8),
            "rank {}: view of node rank {q} holds foreign bytes",
            ctx.rank()
        );
        println!(
            "rank {}: node rank {q} owns bytes {:?} (pid {})",
            ctx.rank(),
            view.range(),
            ctx.lookup_pid(q)?
        );
    }

    // Window and communicator release is collective; drop in protocol order.
    drop(xpm);
    drop(ctx);
    Ok(())
}
