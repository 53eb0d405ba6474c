use super::*;
use crate::comm::local::LocalFabric;

#[test]
fn words_round_trip_and_reject_ragged_input() {
    let bytes = encode_words(&[1, 0xdead_beef, 7]);
    assert_eq!(bytes.len(), 12);
    assert_eq!(decode_words(&bytes).unwrap(), vec![1, 0xdead_beef, 7]);
    assert!(decode_words(&bytes[..5]).is_err());
}

#[test]
fn default_collectives_over_threads() {
    let results = LocalFabric::run(5, |comm| {
        let rank = comm.rank() as u8;
        let all = comm.allgather(&[rank, rank])?;
        let chunks: Vec<Vec<u8>> = (0..5).map(|d| vec![rank * 10 + d as u8]).collect();
        let swapped = comm.alltoall(&chunks)?;
        let gathered = comm.gatherv(&vec![rank; rank as usize], 2)?;
        let root_value = comm.bcast(&[42, rank], 3)?;
        comm.barrier()?;
        let words = allgather_word(&comm, u32::from(rank) * 3)?;
        Ok((all, swapped, gathered, root_value, words))
    })
    .unwrap();

    for (rank, (all, swapped, gathered, root_value, words)) in results.into_iter().enumerate() {
        let r = rank as u8;
        assert_eq!(all, (0..5u8).map(|s| vec![s, s]).collect::<Vec<_>>());
        assert_eq!(swapped, (0..5u8).map(|s| vec![s * 10 + r]).collect::<Vec<_>>());
        if rank == 2 {
            let parts = gathered.unwrap();
            assert_eq!(parts[4], vec![4, 4, 4, 4]);
            assert!(parts[0].is_empty());
        } else {
            assert!(gathered.is_none());
        }
        assert_eq!(root_value, vec![42, 3]);
        assert_eq!(words, vec![0, 3, 6, 9, 12]);
    }
}

#[test]
fn gather_rejects_uneven_contributions() {
    let results = LocalFabric::run(2, |comm| {
        let data = vec![0u8; comm.rank() + 1];
        Ok(comm.gather(&data, 0).is_err())
    })
    .unwrap();
    assert_eq!(results, vec![true, false]);
}

#[test]
fn sendrecv_ring_does_not_deadlock() {
    let results = LocalFabric::run(4, |comm| {
        let (rank, size) = (comm.rank(), comm.size());
        comm.sendrecv((rank + 1) % size, 9, &[rank as u8], (rank + size - 1) % size, 9)
    })
    .unwrap();
    assert_eq!(results, vec![vec![3], vec![0], vec![1], vec![2]]);
}
