use super::*;
use crate::comm::local::LocalFabric;

#[test]
fn counts_contributors_per_tile() {
    #[rustfmt::skip]
    let masks = vec![
        true, false,
        true, true,
        false, false,
    ];
    let info = TileInfo::from_masks(2, masks);
    assert_eq!(info.contrib_counts(), &[2, 1]);
    assert_eq!(info.total_image_count(), 3);
    assert_eq!(info.contained_list(1), vec![0, 1]);
    assert!(info.contained_list(2).is_empty());
    assert_eq!(info.mask_of(0), &[true, false]);
    assert!(!info.contains(2, 0));
}

#[test]
fn gather_sees_every_rank() {
    let infos = LocalFabric::run(3, |comm| {
        let rank = comm.rank();
        let mask = [rank == 0, rank != 1, true];
        TileInfo::gather(&comm, &mask)
    })
    .unwrap();
    for info in &infos {
        assert_eq!(info, &infos[0]);
    }
    assert_eq!(infos[0].contrib_counts(), &[1, 2, 3]);
    assert_eq!(infos[0].total_image_count(), 6);
}
