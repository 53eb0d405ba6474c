//! Deadlock-free exchange of arbitrarily sized messages.
//!
//! Nobody knows up front who sends to whom, so every rank runs the same
//! symmetric walk over partners: receives step backward from the local rank
//! and sends step forward. The `i`-th receive one rank posts is always paired
//! with a send some other rank posts at the same step of its own walk, which
//! keeps every posted receive matched.

use crate::comm::{Communicator, Request, Tag};
use crate::foundation::error::{SortlastError, SortlastResult};
use crate::session::config::CompositeOrder;

/// Tag of exchanged payloads.
pub(crate) const LARGE_MESSAGE: Tag = 23;

const RECV_IDX: usize = 0;
const SEND_IDX: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Backward,
    Forward,
}

impl Direction {
    fn flip(self) -> Self {
        match self {
            Direction::Backward => Direction::Forward,
            Direction::Forward => Direction::Backward,
        }
    }
}

/// Partner ranks in pivot order, starting next to the local position.
///
/// Unordered walks wrap around and stop on returning to the pivot. Ordered
/// walks follow the composite order without wrapping: they run to one end,
/// then restart from the pivot in the other direction.
#[derive(Clone, Debug)]
pub(crate) struct PivotWalk<'a> {
    order: Option<&'a CompositeOrder>,
    mask: &'a [bool],
    size: usize,
    pivot: usize,
    pos: usize,
    dir: Direction,
    turned: bool,
    done: bool,
}

impl<'a> PivotWalk<'a> {
    /// Walk from `rank` over ranks whose `mask` bit is set, starting in
    /// direction `first`.
    pub(crate) fn new(
        rank: usize,
        mask: &'a [bool],
        order: Option<&'a CompositeOrder>,
        first: Direction,
    ) -> Self {
        let pivot = order.map_or(rank, |o| o.position_of(rank));
        Self {
            order,
            mask,
            size: mask.len(),
            pivot,
            pos: pivot,
            dir: first,
            turned: false,
            done: mask.is_empty(),
        }
    }

    /// Where receives are walked: backward first.
    pub(crate) fn receives(rank: usize, mask: &'a [bool], order: Option<&'a CompositeOrder>) -> Self {
        Self::new(rank, mask, order, Direction::Backward)
    }

    /// Where sends are walked: forward first.
    pub(crate) fn sends(rank: usize, mask: &'a [bool], order: Option<&'a CompositeOrder>) -> Self {
        Self::new(rank, mask, order, Direction::Forward)
    }

    /// Move one position; `false` when the walk has run off its end.
    fn step(&mut self) -> bool {
        let at_end = match self.dir {
            Direction::Backward => self.pos == 0,
            Direction::Forward => self.pos + 1 >= self.size,
        };
        if at_end {
            if self.order.is_some() {
                if self.turned {
                    return false;
                }
                self.turned = true;
                self.dir = self.dir.flip();
                self.pos = self.pivot;
                return self.step();
            }
            self.pos = match self.dir {
                Direction::Backward => self.size - 1,
                Direction::Forward => 0,
            };
        } else {
            self.pos = match self.dir {
                Direction::Backward => self.pos - 1,
                Direction::Forward => self.pos + 1,
            };
        }
        self.pos != self.pivot
    }
}

impl Iterator for PivotWalk<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while !self.done {
            if !self.step() {
                self.done = true;
                break;
            }
            let rank = self.order.map_or(self.pos, |o| o.rank_at(self.pos));
            if self.mask[rank] {
                return Some(rank);
            }
        }
        None
    }
}

/// Send message `id` to `destinations[id]` for every id and receive whatever
/// other ranks address here.
///
/// `generate(id, dest)` produces the payload for one message just before it
/// is posted. A message addressed to this rank never touches the
/// communicator: `generate` runs first (it should stash its data locally and
/// may return an empty payload) and `handle(None, rank)` follows. Every
/// received payload is passed to `handle(Some(data), src)`.
///
/// With `order`, receives resolve in composite order: first the ranks in
/// front of this one from nearest to farthest, then the ranks behind it.
pub(crate) fn exchange_large_messages<G, H>(
    comm: &dyn Communicator,
    destinations: &[usize],
    order: Option<&CompositeOrder>,
    max_message_size: usize,
    mut generate: G,
    mut handle: H,
) -> SortlastResult<()>
where
    G: FnMut(usize, usize) -> SortlastResult<Vec<u8>>,
    H: FnMut(Option<Vec<u8>>, usize) -> SortlastResult<()>,
{
    let (rank, size) = (comm.rank(), comm.size());
    if let Some(order) = order {
        if order.len() != size {
            return Err(SortlastError::sanity("composite order does not cover the communicator"));
        }
    }

    let mut send_ids = vec![usize::MAX; size];
    let mut dest_mask = vec![false; size];
    for (id, &dest) in destinations.iter().enumerate() {
        if dest >= size {
            return Err(SortlastError::invalid_value(format!("message destination {dest} out of range")));
        }
        if dest_mask[dest] {
            return Err(SortlastError::invalid_value(format!("two messages addressed to rank {dest}")));
        }
        dest_mask[dest] = true;
        send_ids[dest] = id;
    }

    let chunks: Vec<Vec<u8>> = dest_mask.iter().map(|&b| vec![u8::from(b)]).collect();
    let src_mask = comm
        .alltoall(&chunks)?
        .iter()
        .map(|flag| match flag.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(SortlastError::sanity("malformed send mask received")),
        })
        .collect::<SortlastResult<Vec<bool>>>()?;
    if src_mask[rank] != dest_mask[rank] {
        return Err(SortlastError::sanity("send to self not reciprocated"));
    }

    if dest_mask[rank] {
        tracing::debug!("sending to self");
        generate(send_ids[rank], rank)?;
        handle(None, rank)?;
    }

    let mut recv_walk = PivotWalk::receives(rank, &src_mask, order);
    let mut send_walk = PivotWalk::sends(rank, &dest_mask, order);
    let mut requests = [Request::NULL; 2];
    let mut recv_src = None;
    let mut recv_done = false;
    let mut send_done = false;

    loop {
        if requests[RECV_IDX].is_null() && !recv_done {
            match recv_walk.next() {
                Some(src) => {
                    requests[RECV_IDX] = comm.irecv(src, LARGE_MESSAGE)?;
                    recv_src = Some(src);
                }
                None => recv_done = true,
            }
        }
        if requests[SEND_IDX].is_null() && !send_done {
            match send_walk.next() {
                Some(dest) => {
                    let data = generate(send_ids[dest], dest)?;
                    requests[SEND_IDX] = comm.isend(dest, LARGE_MESSAGE, data)?;
                }
                None => send_done = true,
            }
        }
        if recv_done && send_done {
            break;
        }

        let (idx, data) = comm.waitany(&mut requests)?;
        if idx == RECV_IDX {
            let src = recv_src.take().ok_or_else(|| SortlastError::sanity("receive completed without a source"))?;
            let data = data.ok_or_else(|| SortlastError::sanity("receive completed without data"))?;
            if data.len() > max_message_size {
                return Err(SortlastError::sanity(format!(
                    "message of {} bytes from rank {src} exceeds the {max_message_size} byte bound",
                    data.len()
                )));
            }
            handle(Some(data), src)?;
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/schedule/large_messages.rs"]
mod tests;
