use super::*;
use crate::comm::local::{LocalFabric, SendMode};
use std::cell::Cell;

fn walk(rank: usize, mask: &[bool], order: Option<&CompositeOrder>, first: Direction) -> Vec<usize> {
    PivotWalk::new(rank, mask, order, first).collect()
}

#[test]
fn unordered_walks_wrap_around_the_pivot() {
    let all = [true; 5];
    assert_eq!(walk(2, &all, None, Direction::Backward), vec![1, 0, 4, 3]);
    assert_eq!(walk(2, &all, None, Direction::Forward), vec![3, 4, 0, 1]);
    let sparse = [true, false, false, true, false];
    assert_eq!(walk(2, &sparse, None, Direction::Backward), vec![0, 3]);
    assert!(walk(0, &[true], None, Direction::Forward).is_empty());
    assert!(walk(0, &[], None, Direction::Forward).is_empty());
}

#[test]
fn ordered_walks_turn_at_the_ends() {
    let order = CompositeOrder::new(vec![3, 1, 0, 2, 4], 5).unwrap();
    let all = [true; 5];
    // rank 0 sits at position 2
    assert_eq!(walk(0, &all, Some(&order), Direction::Backward), vec![1, 3, 2, 4]);
    assert_eq!(walk(0, &all, Some(&order), Direction::Forward), vec![2, 4, 1, 3]);
    assert_eq!(walk(3, &all, Some(&order), Direction::Backward), vec![1, 0, 2, 4]);
    assert_eq!(walk(4, &all, Some(&order), Direction::Forward), vec![2, 0, 1, 3]);
}

/// Run one exchange where rank `s` sends to rank `d` iff bit `s * n + d` of
/// `mask` is set. Returns, per rank, the sources in handling order.
fn run_exchange(n: usize, mask: u32, order: Option<CompositeOrder>, mode: SendMode) -> Vec<Vec<usize>> {
    LocalFabric::run_with_mode(n, mode, |comm| {
        let rank = comm.rank();
        let destinations: Vec<usize> = (0..n).filter(|d| mask & (1 << (rank * n + d)) != 0).collect();
        let mut seen = Vec::new();
        let stashed = Cell::new(None);
        exchange_large_messages(
            &comm,
            &destinations,
            order.as_ref(),
            16,
            |id, dest| {
                assert_eq!(destinations[id], dest);
                if dest == rank {
                    stashed.set(Some(rank));
                    Ok(Vec::new())
                } else {
                    Ok(vec![rank as u8, dest as u8])
                }
            },
            |data, src| {
                match data {
                    None => assert_eq!(stashed.take(), Some(src)),
                    Some(bytes) => assert_eq!(bytes, vec![src as u8, rank as u8]),
                }
                seen.push(src);
                Ok(())
            },
        )?;
        Ok(seen)
    })
    .unwrap()
}

fn expected_sources(n: usize, mask: u32, rank: usize) -> Vec<usize> {
    (0..n).filter(|s| mask & (1 << (s * n + rank)) != 0).collect()
}

fn check_every_small_mask(mode: SendMode) {
    for n in 1..=3usize {
        for mask in 0..(1u32 << (n * n)) {
            let seen = run_exchange(n, mask, None, mode);
            for (rank, mut got) in seen.into_iter().enumerate() {
                got.sort_unstable();
                assert_eq!(got, expected_sources(n, mask, rank), "{mode:?} n={n} mask={mask:#b}");
            }
        }
    }
}

#[test]
fn every_small_mask_terminates_unordered() {
    check_every_small_mask(SendMode::Buffered);
}

#[test]
fn every_small_mask_terminates_with_rendezvous_sends() {
    check_every_small_mask(SendMode::Rendezvous);
}

#[test]
fn ordered_receives_resolve_nearest_in_front_first() {
    let n = 3;
    let order = CompositeOrder::new(vec![2, 0, 1], n).unwrap();
    for (mask, mode) in (0..(1u32 << (n * n))).flat_map(|m| [(m, SendMode::Buffered), (m, SendMode::Rendezvous)]) {
        let seen = run_exchange(n, mask, Some(order.clone()), mode);
        for (rank, got) in seen.into_iter().enumerate() {
            let me = order.position_of(rank);
            let sources = expected_sources(n, mask, rank);
            let mut expected: Vec<usize> = sources.iter().copied().filter(|&s| s == rank).collect();
            let mut front: Vec<usize> = sources.iter().copied().filter(|&s| order.position_of(s) < me).collect();
            front.sort_by_key(|&s| std::cmp::Reverse(order.position_of(s)));
            let mut back: Vec<usize> = sources.iter().copied().filter(|&s| order.position_of(s) > me).collect();
            back.sort_by_key(|&s| order.position_of(s));
            expected.extend(front);
            expected.extend(back);
            assert_eq!(got, expected, "{mode:?} mask={mask:#b} rank={rank}");
        }
    }
}

#[test]
fn duplicate_destinations_are_rejected() {
    let comm = LocalFabric::new(1).into_endpoints().remove(0);
    let err = exchange_large_messages(&comm, &[0, 0], None, 8, |_, _| Ok(Vec::new()), |_, _| Ok(()))
        .unwrap_err();
    assert!(matches!(err, SortlastError::InvalidValue(_)));
}

#[test]
fn oversized_messages_fail_the_sanity_check() {
    let results = LocalFabric::run(2, |comm| {
        let dest = [1 - comm.rank()];
        let res = exchange_large_messages(&comm, &dest, None, 4, |_, _| Ok(vec![0; 8]), |_, _| Ok(()));
        Ok(res.map_err(|e| e.is_fatal()))
    })
    .unwrap();
    assert!(results.iter().all(|r| *r == Err(true)));
}
