//! Transport abstraction used by every compositing strategy.
//!
//! The engine only needs point-to-point byte messages and a handful of
//! collectives. Collectives have default implementations built from the
//! point-to-point calls, so a transport only has to supply those.

pub(crate) mod counted;
pub(crate) mod local;

use crate::foundation::error::{SortlastError, SortlastResult};

/// Message tag. Values at or above [`RESERVED_TAG_BASE`] belong to the
/// default collective implementations.
pub type Tag = u32;

/// First tag used internally by collectives.
pub const RESERVED_TAG_BASE: Tag = 0x7000_0000;

const TAG_BARRIER_IN: Tag = RESERVED_TAG_BASE;
const TAG_BARRIER_OUT: Tag = RESERVED_TAG_BASE + 1;
const TAG_ALLGATHER: Tag = RESERVED_TAG_BASE + 2;
const TAG_ALLTOALL: Tag = RESERVED_TAG_BASE + 3;
const TAG_GATHER: Tag = RESERVED_TAG_BASE + 4;
const TAG_BCAST: Tag = RESERVED_TAG_BASE + 5;

/// Handle of an outstanding non-blocking operation.
///
/// The id is transport defined; a completed or never-posted request is
/// [`Request::NULL`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Request(Option<u64>);

impl Request {
    /// Request that refers to nothing.
    pub const NULL: Request = Request(None);

    /// Wrap a transport-specific id.
    pub const fn new(id: u64) -> Self {
        Self(Some(id))
    }

    /// Transport id, `None` for the null request.
    pub fn id(self) -> Option<u64> {
        self.0
    }

    /// Whether this request has completed or was never posted.
    pub fn is_null(self) -> bool {
        self.0.is_none()
    }
}

/// Process group the compositing engine runs over.
///
/// Every rank of the group must issue the same sequence of collective calls.
/// Messages between one pair of ranks with the same tag are never reordered.
pub trait Communicator {
    /// Rank of this process in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of processes.
    fn size(&self) -> usize;

    /// Post a send. The payload is owned by the request until it completes.
    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> SortlastResult<Request>;

    /// Post a receive from `src` with `tag`.
    fn irecv(&self, src: usize, tag: Tag) -> SortlastResult<Request>;

    /// Block until `request` completes and reset it to [`Request::NULL`].
    /// Receives yield their payload; sends and null requests yield `None`.
    fn wait(&self, request: &mut Request) -> SortlastResult<Option<Vec<u8>>>;

    /// Block until any non-null request completes. Returns its index and
    /// payload; the completed entry becomes [`Request::NULL`].
    fn waitany(&self, requests: &mut [Request]) -> SortlastResult<(usize, Option<Vec<u8>>)>;

    /// Complete every request, in order.
    fn waitall(&self, requests: &mut [Request]) -> SortlastResult<Vec<Option<Vec<u8>>>> {
        requests.iter_mut().map(|r| self.wait(r)).collect()
    }

    /// Blocking send.
    fn send(&self, dest: usize, tag: Tag, data: &[u8]) -> SortlastResult<()> {
        let mut req = self.isend(dest, tag, data.to_vec())?;
        self.wait(&mut req)?;
        Ok(())
    }

    /// Blocking receive.
    fn recv(&self, src: usize, tag: Tag) -> SortlastResult<Vec<u8>> {
        let mut req = self.irecv(src, tag)?;
        self.wait(&mut req)?
            .ok_or_else(|| SortlastError::communication(format!("receive from {src} yielded no data")))
    }

    /// Send to `dest` and receive from `src` without risking deadlock.
    fn sendrecv(
        &self,
        dest: usize,
        send_tag: Tag,
        data: &[u8],
        src: usize,
        recv_tag: Tag,
    ) -> SortlastResult<Vec<u8>> {
        let mut incoming = self.irecv(src, recv_tag)?;
        let mut outgoing = self.isend(dest, send_tag, data.to_vec())?;
        let received = self.wait(&mut incoming)?;
        self.wait(&mut outgoing)?;
        received.ok_or_else(|| SortlastError::communication(format!("sendrecv from {src} yielded no data")))
    }

    /// Synchronize all ranks.
    fn barrier(&self) -> SortlastResult<()> {
        let size = self.size();
        if self.rank() == 0 {
            for src in 1..size {
                self.recv(src, TAG_BARRIER_IN)?;
            }
            let mut reqs = Vec::with_capacity(size);
            for dest in 1..size {
                reqs.push(self.isend(dest, TAG_BARRIER_OUT, Vec::new())?);
            }
            self.waitall(&mut reqs)?;
        } else {
            self.send(0, TAG_BARRIER_IN, &[])?;
            self.recv(0, TAG_BARRIER_OUT)?;
        }
        Ok(())
    }

    /// Every rank contributes `data`; every rank receives all contributions
    /// indexed by rank.
    fn allgather(&self, data: &[u8]) -> SortlastResult<Vec<Vec<u8>>> {
        let (rank, size) = (self.rank(), self.size());
        let mut sends = Vec::with_capacity(size);
        for dest in (0..size).filter(|&d| d != rank) {
            sends.push(self.isend(dest, TAG_ALLGATHER, data.to_vec())?);
        }
        let mut out = Vec::with_capacity(size);
        for src in 0..size {
            if src == rank {
                out.push(data.to_vec());
            } else {
                out.push(self.recv(src, TAG_ALLGATHER)?);
            }
        }
        self.waitall(&mut sends)?;
        Ok(out)
    }

    /// `chunks[d]` goes to rank `d`; the result holds what each rank sent
    /// here, indexed by source.
    fn alltoall(&self, chunks: &[Vec<u8>]) -> SortlastResult<Vec<Vec<u8>>> {
        let (rank, size) = (self.rank(), self.size());
        if chunks.len() != size {
            return Err(SortlastError::invalid_value(format!(
                "alltoall needs {size} chunks, got {}",
                chunks.len()
            )));
        }
        let mut sends = Vec::with_capacity(size);
        for (dest, chunk) in chunks.iter().enumerate().filter(|(d, _)| *d != rank) {
            sends.push(self.isend(dest, TAG_ALLTOALL, chunk.clone())?);
        }
        let mut out = Vec::with_capacity(size);
        for src in 0..size {
            if src == rank {
                out.push(chunks[rank].clone());
            } else {
                out.push(self.recv(src, TAG_ALLTOALL)?);
            }
        }
        self.waitall(&mut sends)?;
        Ok(out)
    }

    /// Equal-sized contributions collected at `root`. Non-root ranks get
    /// `None`.
    fn gather(&self, data: &[u8], root: usize) -> SortlastResult<Option<Vec<Vec<u8>>>> {
        let gathered = self.gatherv(data, root)?;
        if let Some(parts) = &gathered {
            if parts.iter().any(|p| p.len() != data.len()) {
                return Err(SortlastError::invalid_value("gather contributions differ in size"));
            }
        }
        Ok(gathered)
    }

    /// Contributions of any size collected at `root`, indexed by rank.
    fn gatherv(&self, data: &[u8], root: usize) -> SortlastResult<Option<Vec<Vec<u8>>>> {
        let (rank, size) = (self.rank(), self.size());
        if root >= size {
            return Err(SortlastError::invalid_value(format!("gather root {root} out of range")));
        }
        if rank != root {
            self.send(root, TAG_GATHER, data)?;
            return Ok(None);
        }
        let mut out = Vec::with_capacity(size);
        for src in 0..size {
            if src == rank {
                out.push(data.to_vec());
            } else {
                out.push(self.recv(src, TAG_GATHER)?);
            }
        }
        Ok(Some(out))
    }

    /// Broadcast `data` from `root`; other ranks' `data` is ignored.
    fn bcast(&self, data: &[u8], root: usize) -> SortlastResult<Vec<u8>> {
        let (rank, size) = (self.rank(), self.size());
        if root >= size {
            return Err(SortlastError::invalid_value(format!("broadcast root {root} out of range")));
        }
        if rank != root {
            return self.recv(root, TAG_BCAST);
        }
        let mut sends = Vec::with_capacity(size);
        for dest in (0..size).filter(|&d| d != root) {
            sends.push(self.isend(dest, TAG_BCAST, data.to_vec())?);
        }
        self.waitall(&mut sends)?;
        Ok(data.to_vec())
    }
}

/// Little-endian encoding of a word list for transfer.
pub(crate) fn encode_words(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Inverse of [`encode_words`].
pub(crate) fn decode_words(bytes: &[u8]) -> SortlastResult<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return Err(SortlastError::invalid_value(format!(
            "word message has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Allgather of one word per rank.
pub(crate) fn allgather_word(comm: &dyn Communicator, word: u32) -> SortlastResult<Vec<u32>> {
    comm.allgather(&word.to_le_bytes())?
        .iter()
        .map(|bytes| {
            let words = decode_words(bytes)?;
            words
                .first()
                .copied()
                .ok_or_else(|| SortlastError::communication("allgather contribution was empty"))
        })
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/comm/mod.rs"]
mod tests;
