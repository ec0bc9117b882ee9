//! Integration tests for node discovery over simulated processes.
//!
//! Each test runs the full protocol (duplicate, resolve, color, split, count,
//! pid and roster exchange) with one thread per simulated process.

use std::net::IpAddr;

use nodegroup::{
    Collective, Config, Error, LocalUniverse, NodeContext, Result, StaticResolver,
};

fn hosts() -> StaticResolver {
    StaticResolver::parse("n0=10.1.0.1,n1=10.1.0.2,n2=10.1.0.3,n3=10.1.0.4").unwrap()
}

fn unwrap_all<T>(results: Vec<Result<T>>) -> Vec<T> {
    results.into_iter().map(Result::unwrap).collect()
}

#[test]
fn colors_are_dense_and_follow_address_order() {
    // Host names deliberately out of address order relative to ranks.
    let resolver = hosts();
    let layout = ["n3", "n0", "n3", "n2", "n0", "n2"];
    let out = unwrap_all(LocalUniverse::new(layout).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        Ok((ctx.color(), ctx.node_count()))
    }));

    let colors: Vec<i32> = out.iter().map(|&(c, _)| c).collect();
    assert_eq!(colors, vec![2, 0, 2, 1, 0, 1]);
    assert!(out.iter().all(|&(_, n)| n == 3));
}

#[test]
fn single_process_job() {
    let resolver = hosts();
    let out = unwrap_all(LocalUniverse::new(["n1"]).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        Ok((
            ctx.color(),
            ctx.node_count(),
            ctx.node_group_size(),
            ctx.node_local_rank(),
            ctx.ranks_on_node(),
        ))
    }));
    assert_eq!(out, vec![(0, 1, 1, 0, vec![0])]);
}

#[test]
fn node_ranks_follow_global_rank_order() {
    let resolver = hosts();
    let layout = ["n1", "n0", "n1", "n1", "n0"];
    let out = unwrap_all(LocalUniverse::new(layout).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        Ok((ctx.rank(), ctx.node_local_rank(), ctx.ranks_on_node()))
    }));

    assert_eq!(out[0], (0, 0, vec![0, 2, 3]));
    assert_eq!(out[1], (1, 0, vec![1, 4]));
    assert_eq!(out[2], (2, 1, vec![0, 2, 3]));
    assert_eq!(out[3], (3, 2, vec![0, 2, 3]));
    assert_eq!(out[4], (4, 1, vec![1, 4]));
}

#[test]
fn every_node_member_sees_the_same_pid_map() {
    let resolver = hosts();
    let layout = ["n0", "n1", "n0", "n1"];
    let out = unwrap_all(LocalUniverse::new(layout).pid_base(9000).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        let pids: Vec<i64> = (0..ctx.node_group_size())
            .map(|r| ctx.lookup_pid(r))
            .collect::<Result<_>>()?;
        let missing = ctx.lookup_pid(ctx.node_group_size());
        Ok((ctx.color(), pids, missing, ctx.pid_map().len()))
    }));

    for (color, pids, missing, len) in out {
        let expected = if color == 0 {
            vec![9000, 9002]
        } else {
            vec![9001, 9003]
        };
        assert_eq!(pids, expected);
        assert_eq!(missing, Err(Error::NotFound(2)));
        assert_eq!(len, 2);
    }
}

#[test]
fn roster_maps_node_rank_to_global_rank() {
    let resolver = hosts();
    let layout = ["n2", "n2", "n0", "n2"];
    let out = unwrap_all(LocalUniverse::new(layout).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        let roster = ctx.ranks_on_node();
        Ok((ctx.rank(), roster[ctx.node_local_rank() as usize]))
    }));
    for (rank, from_roster) in out {
        assert_eq!(rank, from_roster);
    }
}

#[test]
fn aliases_for_one_address_share_a_node() {
    let resolver = StaticResolver::new()
        .with("login", "192.168.7.7".parse::<IpAddr>().unwrap())
        .with("login.cluster", "192.168.7.7".parse::<IpAddr>().unwrap())
        .with("compute", "192.168.7.8".parse::<IpAddr>().unwrap());
    let out = unwrap_all(
        LocalUniverse::new(["login", "compute", "login.cluster"]).run(|w| {
            let ctx = NodeContext::discover(&w, &resolver)?;
            Ok((ctx.color(), ctx.node_group_size()))
        }),
    );
    assert_eq!(out, vec![(0, 2), (1, 1), (0, 2)]);
}

#[test]
fn discovery_leaves_the_world_group_usable() {
    let resolver = hosts();
    let out = unwrap_all(LocalUniverse::new(["n0", "n1", "n1"]).run(|w| {
        let ctx = NodeContext::discover(&w, &resolver)?;
        let node_sum = ctx.node_comm()?.allreduce_sum(1)?;
        drop(ctx);
        let world_sum = w.allreduce_sum(1)?;
        Ok((node_sum, world_sum))
    }));
    assert_eq!(out, vec![(1, 3), (2, 3), (2, 3)]);
}

#[test]
fn failure_at_any_step_fails_every_process() {
    let resolver = hosts();
    // Discovery issues six collectives: duplicate, identity allgather,
    // node split, node count, pid exchange and roster exchange.
    for step in 0..6 {
        let out = LocalUniverse::new(["n0", "n1", "n0"])
            .fail_after(step)
            .run(|w| NodeContext::discover(&w, &resolver).map(|ctx| ctx.node_count()));
        for r in out {
            let err = r.unwrap_err();
            assert!(err.is_collective(), "step {step}: {err:?}");
        }
    }

    let out = LocalUniverse::new(["n0", "n1", "n0"])
        .fail_after(6)
        .run(|w| NodeContext::discover(&w, &resolver).map(|ctx| ctx.node_count()));
    assert_eq!(unwrap_all(out), vec![2, 2, 2]);
}

#[test]
fn unknown_host_is_a_resolution_error() {
    let resolver = hosts();
    let out = LocalUniverse::new(["ghost", "ghost"])
        .run(|w| NodeContext::discover(&w, &resolver).map(|_| ()));
    for r in out {
        match r {
            Err(Error::Resolution { host, .. }) => assert_eq!(host, "ghost"),
            other => panic!("expected resolution error, got {other:?}"),
        }
    }
}

#[test]
fn config_overrides_host_and_resolver() {
    let config = Config::from_lookup(|key| match key {
        "NODEGROUP_HOSTNAME" => Some("pinned".to_string()),
        "NODEGROUP_HOSTS" => Some("pinned=10.9.9.9".to_string()),
        "NODEGROUP_SLURM_CHECK" => Some("off".to_string()),
        _ => None,
    })
    .unwrap();

    let out = unwrap_all(LocalUniverse::new(["x", "y", "z"]).run(|w| {
        let ctx = NodeContext::from_config(&w, &config)?;
        Ok((
            ctx.hostname().to_string(),
            ctx.node_count(),
            ctx.network_id().map(|id| id.addr()),
        ))
    }));
    let pinned: IpAddr = "10.9.9.9".parse().unwrap();
    for (host, nodes, addr) in out {
        assert_eq!(host, "pinned");
        assert_eq!(nodes, 1);
        assert_eq!(addr, Some(pinned));
    }
}
