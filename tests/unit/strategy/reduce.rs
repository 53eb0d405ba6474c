use super::*;

fn check_plans(info: &TileInfo, display_nodes: &[usize], order: Option<&CompositeOrder>, size: usize) {
    let plans: Vec<Delegation> = (0..size)
        .map(|rank| delegate(info, display_nodes, order, size, rank).unwrap())
        .collect();
    for (tile, &display) in display_nodes.iter().enumerate() {
        let members: Vec<usize> = (0..size).filter(|&r| plans[r].compose_tile == Some(tile)).collect();
        if info.contrib_counts()[tile] == 0 {
            assert!(members.is_empty(), "tile {tile} has no images but got ranks");
            continue;
        }
        assert!(members.contains(&display), "display of tile {tile} not in its group");
        let group = &plans[display].compose_group;
        let mut sorted = group.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, members);
        for &m in &members {
            assert_eq!(&plans[m].compose_group, group, "group members disagree on tile {tile}");
            assert_eq!(group[plans[m].group_image_dest], display);
        }
        for rank in 0..size {
            if info.contains(rank, tile) {
                let dest = plans[rank].tile_image_dest[tile];
                assert!(members.contains(&dest), "rank {rank} sends tile {tile} outside its group");
            }
        }
    }
}

#[test]
fn ranks_follow_contributions() {
    assert_eq!(procs_per_tile(&[4, 2, 0], 6, 6), vec![4, 2, 0]);
    assert_eq!(procs_per_tile(&[10, 1], 4, 11), vec![3, 1]);
    // Never more ranks than images.
    assert_eq!(procs_per_tile(&[1, 1], 8, 2), vec![1, 1]);
    let counts = [5, 3, 7, 1];
    let num_proc = procs_per_tile(&counts, 9, 16);
    assert_eq!(num_proc.iter().sum::<usize>(), 9);
    assert!(num_proc.iter().zip(&counts).all(|(&n, &c)| n >= 1 && n <= c));
}

#[test]
fn groups_cover_contributors_and_displays() {
    #[rustfmt::skip]
    let masks = vec![
        true, true,
        true, false,
        false, true,
        true, true,
        false, false,
        true, false,
    ];
    let info = TileInfo::from_masks(2, masks);
    check_plans(&info, &[0, 3], None, 6);
    let order = CompositeOrder::new(vec![5, 2, 0, 4, 1, 3], 6).unwrap();
    check_plans(&info, &[0, 3], Some(&order), 6);
}

#[test]
fn everyone_contributing_to_one_tile() {
    let info = TileInfo::from_masks(1, vec![true; 5]);
    let plans: Vec<Delegation> = (0..5).map(|r| delegate(&info, &[2], None, 5, r).unwrap()).collect();
    for plan in &plans {
        assert_eq!(plan.compose_tile, Some(0));
        // Each rank keeps its own image when it composites the tile.
        assert_eq!(plan.compose_group.len(), 5);
    }
    for (rank, plan) in plans.iter().enumerate() {
        assert_eq!(plan.tile_image_dest[0], rank);
    }
    check_plans(&info, &[2], None, 5);
}

#[test]
fn tile_without_images_gets_no_group() {
    #[rustfmt::skip]
    let masks = vec![
        true, false, false,
        true, false, false,
        false, false, true,
        true, false, false,
    ];
    let info = TileInfo::from_masks(3, masks);
    check_plans(&info, &[0, 1, 2], None, 4);
    let plan = delegate(&info, &[0, 1, 2], None, 4, 1).unwrap();
    assert_ne!(plan.compose_tile, Some(1));
}

#[test]
fn nobody_drawing_delegates_nothing() {
    let info = TileInfo::from_masks(2, vec![false; 6]);
    let plan = delegate(&info, &[0, 1], None, 3, 0).unwrap();
    assert_eq!(plan.compose_tile, None);
    assert!(plan.compose_group.is_empty());
}
