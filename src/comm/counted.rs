use std::cell::Cell;

use crate::comm::{Communicator, Request, Tag};
use crate::foundation::error::SortlastResult;

/// Wraps a communicator for one frame and counts outgoing traffic.
///
/// Collectives use the trait defaults so their point-to-point traffic is
/// counted too.
pub(crate) struct CountedComm<'a> {
    inner: &'a dyn Communicator,
    bytes_sent: Cell<u64>,
    messages_sent: Cell<u64>,
}

impl<'a> CountedComm<'a> {
    pub(crate) fn new(inner: &'a dyn Communicator) -> Self {
        Self {
            inner,
            bytes_sent: Cell::new(0),
            messages_sent: Cell::new(0),
        }
    }

    pub(crate) fn bytes_sent(&self) -> u64 {
        self.bytes_sent.get()
    }

    pub(crate) fn messages_sent(&self) -> u64 {
        self.messages_sent.get()
    }
}

impl Communicator for CountedComm<'_> {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> SortlastResult<Request> {
        self.bytes_sent.set(self.bytes_sent.get() + data.len() as u64);
        self.messages_sent.set(self.messages_sent.get() + 1);
        self.inner.isend(dest, tag, data)
    }

    fn irecv(&self, src: usize, tag: Tag) -> SortlastResult<Request> {
        self.inner.irecv(src, tag)
    }

    fn wait(&self, request: &mut Request) -> SortlastResult<Option<Vec<u8>>> {
        self.inner.wait(request)
    }

    fn waitany(&self, requests: &mut [Request]) -> SortlastResult<(usize, Option<Vec<u8>>)> {
        self.inner.waitany(requests)
    }
}
