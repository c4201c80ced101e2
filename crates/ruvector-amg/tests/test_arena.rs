//! Property tests for the scratch arena.
//!
//! Random programs of nested scopes and allocations over both regions are
//! checked against a simple stack model of the two cursors.

use proptest::prelude::*;
use ruvector_amg::arena::{Arena, ArenaScope, Region, MAX_MARK_DEPTH};
use ruvector_amg::AmgError;

#[derive(Debug, Clone)]
enum Op {
    Open(Region),
    Alloc(usize),
    Close,
}

fn region() -> impl Strategy<Value = Region> {
    prop_oneof![Just(Region::Top), Just(Region::Bottom)]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => region().prop_map(Op::Open),
        3 => (1usize..64).prop_map(Op::Alloc),
        2 => Just(Op::Close),
    ]
}

fn index(region: Region) -> usize {
    match region {
        Region::Top => 0,
        Region::Bottom => 1,
    }
}

proptest! {
    #[test]
    fn prop_used_follows_the_scope_stack(ops in proptest::collection::vec(op(), 1..80)) {
        let arena = Arena::with_capacity(1 << 20);
        let mut scopes: Vec<ArenaScope<'_>> = Vec::new();
        // (region, bytes used in that region when the scope opened)
        let mut model: Vec<(Region, usize)> = Vec::new();
        let mut used = [0usize; 2];
        let mut depth = [0usize; 2];
        let mut peak = 0usize;

        for op in ops {
            match op {
                Op::Open(r) => {
                    let opened = arena.scope(r);
                    if depth[index(r)] == MAX_MARK_DEPTH {
                        prop_assert!(
                            matches!(opened, Err(AmgError::MarkStackOverflow { .. })),
                            "expected overflow, got {:?}",
                            opened
                        );
                    } else {
                        scopes.push(opened.unwrap());
                        model.push((r, used[index(r)]));
                        depth[index(r)] += 1;
                    }
                }
                Op::Alloc(len) => {
                    if let Some(scope) = scopes.last() {
                        let r = scope.region();
                        let slice: &mut [f64] = scope.alloc_slice(len).unwrap();
                        prop_assert!(slice.iter().all(|&v| v == 0.0));
                        slice.fill(len as f64);
                        used[index(r)] += len * std::mem::size_of::<f64>();
                        peak = peak.max(used[0] + used[1]);
                    }
                }
                Op::Close => {
                    if let Some(scope) = scopes.pop() {
                        let (r, before) = model.pop().unwrap();
                        prop_assert_eq!(scope.region(), r);
                        scope.release().unwrap();
                        used[index(r)] = before;
                        depth[index(r)] -= 1;
                    }
                }
            }
            prop_assert_eq!(arena.used(Region::Top), used[0]);
            prop_assert_eq!(arena.used(Region::Bottom), used[1]);
            prop_assert_eq!(arena.depth(Region::Top), depth[0]);
            prop_assert_eq!(arena.depth(Region::Bottom), depth[1]);
        }
        prop_assert_eq!(arena.peak(), peak);

        // Dropping the remaining scopes innermost first empties the arena.
        while let Some(scope) = scopes.pop() {
            drop(scope);
        }
        prop_assert_eq!(arena.used(Region::Top), 0);
        prop_assert_eq!(arena.used(Region::Bottom), 0);
        prop_assert_eq!(arena.available(), arena.capacity());
    }

    #[test]
    fn prop_exhaustion_never_moves_the_cursors(first in 1usize..512, second in 1usize..512) {
        let arena = Arena::with_capacity(4096);
        let top = arena.scope(Region::Top).unwrap();
        let bottom = arena.scope(Region::Bottom).unwrap();
        let fits = (first + second) * 8 <= arena.capacity();

        let a: Result<&mut [f64], _> = top.alloc_slice(first);
        let used_top = arena.used(Region::Top);
        let b: Result<&mut [f64], _> = bottom.alloc_slice(second);
        match (a.is_ok(), b.is_ok()) {
            (true, true) => prop_assert!(fits),
            (true, false) => {
                prop_assert!(!fits);
                prop_assert_eq!(arena.used(Region::Bottom), 0);
                prop_assert_eq!(arena.used(Region::Top), used_top);
            }
            (false, _) => prop_assert!(first * 8 > arena.capacity()),
        }
    }
}

#[test]
fn test_outer_data_survives_inner_scopes() {
    let arena = Arena::with_capacity(1 << 16);
    let outer = arena.scope(Region::Top).unwrap();
    let table: &mut [u32] = outer.alloc_slice(100).unwrap();
    for (k, v) in table.iter_mut().enumerate() {
        *v = k as u32 * 3;
    }

    for round in 0..10 {
        let inner = arena.scope(Region::Top).unwrap();
        let scratch: &mut [u32] = inner.alloc_slice(50 + round).unwrap();
        scratch.fill(u32::MAX);
        let other = arena.scope(Region::Bottom).unwrap();
        let gram: &mut [f64] = other.alloc_slice(64).unwrap();
        gram.fill(-1.0);
    }

    assert!(table.iter().enumerate().all(|(k, &v)| v == k as u32 * 3));
    assert_eq!(arena.used(Region::Bottom), 0);
    assert_eq!(arena.used(Region::Top), 400);
    drop(outer);
    assert_eq!(arena.used(Region::Top), 0);
}
