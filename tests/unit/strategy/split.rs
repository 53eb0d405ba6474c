use super::*;

#[test]
fn groups_partition_every_rank() {
    for (counts, size) in [
        (vec![3, 1], 4),
        (vec![1, 1, 1], 7),
        (vec![5, 0, 2, 9], 6),
        (vec![1, 0, 0], 5),
        (vec![4, 4], 2),
    ] {
        let groups = tile_groups(&counts, size).unwrap();
        assert_eq!(groups.len(), counts.len() + 1);
        assert_eq!(groups[0], 0);
        assert_eq!(*groups.last().unwrap(), size, "{counts:?} over {size}");
        for (tile, &c) in counts.iter().enumerate() {
            let members = groups[tile + 1] - groups[tile];
            if c == 0 {
                assert_eq!(members, 0, "empty tile {tile} got ranks");
            } else {
                assert!(members >= 1, "tile {tile} of {counts:?} got no ranks");
            }
        }
    }
}

#[test]
fn busier_tiles_get_more_ranks() {
    let groups = tile_groups(&[6, 2], 8).unwrap();
    assert_eq!(groups, vec![0, 6, 8]);
}

#[test]
fn no_images_cannot_be_split() {
    assert!(tile_groups(&[0, 0], 3).is_err());
}

#[test]
fn fragments_tile_the_image() {
    for total in [0, 1, 7, 64, 100] {
        for pieces in [1, 2, 3, 8, 150] {
            let mut next = 0;
            for index in 0..pieces {
                let (offset, count) = fragment(total, pieces, index);
                assert_eq!(offset, next.min(total), "{total} pixels, {pieces} pieces");
                next = offset + count;
            }
            assert_eq!(next, total);
        }
    }
    assert_eq!(fragment_size(10, 3), 4);
    assert_eq!(fragment(10, 3, 2), (8, 2));
}
