//! Property tests for node coloring and segment layout.

use nodegroup::{
    aggregate_size, distinct_nodes, node_color, LocalUniverse, NetworkId, NodeContext,
    StaticResolver, Xpm,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

/// Identifiers drawn from a small pool so that collisions are common.
fn arb_ids() -> impl Strategy<Value = Vec<NetworkId>> {
    let pool = prop::collection::vec(any::<u128>(), 1..6);
    pool.prop_flat_map(|pool| {
        let n = pool.len();
        prop::collection::vec(0..n, 1..24)
            .prop_map(move |picks| picks.into_iter().map(|i| NetworkId::from_raw(pool[i])).collect())
    })
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Colors cover exactly 0..distinct and respect identifier order.
    #[test]
    fn colors_are_dense_and_monotone(ids in arb_ids()) {
        let colors: Vec<i32> = ids
            .iter()
            .map(|&id| node_color(&ids, id).unwrap())
            .collect();
        let distinct = distinct_nodes(&ids) as i32;

        let mut seen: Vec<i32> = colors.clone();
        seen.sort_unstable();
        seen.dedup();
        prop_assert_eq!(seen, (0..distinct).collect::<Vec<_>>());

        for (i, a) in ids.iter().enumerate() {
            for (j, b) in ids.iter().enumerate() {
                prop_assert_eq!(a == b, colors[i] == colors[j]);
                prop_assert_eq!(a < b, colors[i] < colors[j]);
            }
        }
    }

    /// The color does not depend on the order identifiers were gathered in.
    #[test]
    fn colors_ignore_gather_order(ids in arb_ids(), rotate in 0usize..24) {
        let mut shuffled = ids.clone();
        let k = rotate % shuffled.len();
        shuffled.rotate_left(k);
        for &id in &ids {
            prop_assert_eq!(node_color(&ids, id).unwrap(), node_color(&shuffled, id).unwrap());
        }
    }

    /// The aggregate equals the plain sum for non-negative requests.
    #[test]
    fn aggregate_is_the_sum(sizes in prop::collection::vec(0i64..1 << 20, 0..16)) {
        let expected: i64 = sizes.iter().sum();
        prop_assert_eq!(aggregate_size(&sizes).unwrap(), expected as usize);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Per-participant views tile the segment in node-rank order.
    #[test]
    fn views_tile_the_segment(sizes in prop::collection::vec(0i64..256, 1..6)) {
        let resolver = StaticResolver::parse("n=10.3.0.1").unwrap();
        let hosts = vec!["n"; sizes.len()];
        let out = LocalUniverse::new(hosts).run(|w| {
            let ctx = NodeContext::discover(&w, &resolver)?;
            let xpm = Xpm::allocate_shared(&ctx, sizes[ctx.node_local_rank() as usize])?;
            let n = ctx.node_group_size();
            let views = (0..n)
                .map(|q| xpm.view_by_range(q, q + 1).map(|v| v.range()))
                .collect::<nodegroup::Result<Vec<_>>>()?;
            Ok((xpm.global_size(), views, xpm.view_by_range(0, n)?.range()))
        });

        let total: i64 = sizes.iter().sum();
        for r in out {
            let (global, views, whole) = r.unwrap();
            prop_assert_eq!(global, total as usize);
            prop_assert_eq!(whole, 0..global);
            let mut cursor = 0;
            for (q, view) in views.iter().enumerate() {
                prop_assert_eq!(view.start, cursor);
                prop_assert_eq!(view.len(), sizes[q] as usize);
                cursor = view.end;
            }
            prop_assert_eq!(cursor, global);
        }
    }
}
