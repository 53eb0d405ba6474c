//! In-process communicator: one endpoint per thread, connected by channels.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::sync::mpsc;
use std::time::Duration;

use crate::comm::{Communicator, Request, Tag};
use crate::foundation::error::{SortlastError, SortlastResult};

/// When a posted send counts as complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SendMode {
    /// The payload is buffered and the send completes at once.
    #[default]
    Buffered,
    /// The send completes only after the destination has matched it with a
    /// posted receive. A schedule that relies on buffering stalls here.
    Rendezvous,
}

/// How long a rendezvous endpoint waits without any message arriving before
/// it reports a stall.
const STALL_TIMEOUT: Duration = Duration::from_secs(if cfg!(test) { 3 } else { 20 });

#[derive(Debug)]
enum Envelope {
    Data {
        src: usize,
        tag: Tag,
        data: Vec<u8>,
        /// Sender's request to acknowledge once matched.
        ack: Option<u64>,
    },
    /// The receiver matched the send posted as request `id`.
    Ack { id: u64 },
}

/// A data message not yet claimed by a receive.
#[derive(Debug)]
struct Unclaimed {
    src: usize,
    tag: Tag,
    data: Vec<u8>,
    ack: Option<u64>,
}

#[derive(Debug)]
enum Pending {
    Sent {
        matched: bool,
    },
    Recv {
        src: usize,
        tag: Tag,
        data: Option<Vec<u8>>,
    },
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    /// Arrived messages no posted receive has claimed yet, in arrival order.
    unexpected: VecDeque<Unclaimed>,
    /// Outstanding requests keyed by posting order.
    pending: BTreeMap<u64, Pending>,
}

impl State {
    fn post(&mut self, p: Pending) -> Request {
        let id = self.reserve();
        self.pending.insert(id, p);
        Request::new(id)
    }

    fn reserve(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Hand `msg` to the earliest-posted matching receive, else queue it.
    /// Returns the acknowledgement owed to the sender when matched.
    fn deliver(&mut self, msg: Unclaimed) -> Option<(usize, u64)> {
        for p in self.pending.values_mut() {
            if let Pending::Recv { src, tag, data } = p {
                if data.is_none() && *src == msg.src && *tag == msg.tag {
                    *data = Some(msg.data);
                    return msg.ack.map(|id| (msg.src, id));
                }
            }
        }
        self.unexpected.push_back(msg);
        None
    }

    fn acknowledge(&mut self, id: u64) {
        if let Some(Pending::Sent { matched }) = self.pending.get_mut(&id) {
            *matched = true;
        }
    }

    fn is_complete(&self, id: u64) -> SortlastResult<bool> {
        match self.pending.get(&id) {
            Some(Pending::Sent { matched }) => Ok(*matched),
            Some(Pending::Recv { data, .. }) => Ok(data.is_some()),
            None => Err(SortlastError::invalid_operation(format!("unknown request {id}"))),
        }
    }

    fn complete(&mut self, id: u64) -> Option<Vec<u8>> {
        match self.pending.remove(&id) {
            Some(Pending::Recv { data, .. }) => data,
            _ => None,
        }
    }
}

/// One rank of a [`LocalFabric`].
///
/// Sends complete as set by the fabric's [`SendMode`]. Receives match MPI
/// rules: messages from one source with one tag arrive in send order and are
/// claimed by receives in posting order.
#[derive(Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mode: SendMode,
    /// Outgoing channels indexed by rank; `None` for this rank.
    peers: Vec<Option<mpsc::Sender<Envelope>>>,
    inbox: mpsc::Receiver<Envelope>,
    state: RefCell<State>,
}

impl LocalComm {
    /// Pull one message off the channel, blocking when `block`.
    fn progress(&self, block: bool) -> SortlastResult<bool> {
        let env = if block {
            match self.mode {
                SendMode::Buffered => self.inbox.recv().map_err(|mpsc::RecvError| self.hung_up())?,
                SendMode::Rendezvous => match self.inbox.recv_timeout(STALL_TIMEOUT) {
                    Ok(env) => env,
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        return Err(SortlastError::communication(format!(
                            "rank {} stalled for {STALL_TIMEOUT:?} waiting on unmatched messages",
                            self.rank
                        )));
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => return Err(self.hung_up()),
                },
            }
        } else {
            match self.inbox.try_recv() {
                Ok(env) => env,
                Err(mpsc::TryRecvError::Empty) => return Ok(false),
                Err(mpsc::TryRecvError::Disconnected) => return Ok(false),
            }
        };
        match env {
            Envelope::Data { src, tag, data, ack } => {
                let owed = self.state.borrow_mut().deliver(Unclaimed { src, tag, data, ack });
                self.send_ack(owed);
            }
            Envelope::Ack { id } => self.state.borrow_mut().acknowledge(id),
        }
        Ok(true)
    }

    fn hung_up(&self) -> SortlastError {
        SortlastError::communication(format!("rank {} is waiting but every peer has hung up", self.rank))
    }

    fn send_ack(&self, owed: Option<(usize, u64)>) {
        let Some((dest, id)) = owed else {
            return;
        };
        match &self.peers[dest] {
            None => self.state.borrow_mut().acknowledge(id),
            // A sender that already hung up no longer waits for the ack.
            Some(tx) => {
                let _ = tx.send(Envelope::Ack { id });
            }
        }
    }

    fn check_rank(&self, rank: usize, what: &str) -> SortlastResult<()> {
        if rank >= self.size {
            return Err(SortlastError::invalid_value(format!(
                "{what} rank {rank} outside communicator of size {}",
                self.size
            )));
        }
        Ok(())
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, dest: usize, tag: Tag, data: Vec<u8>) -> SortlastResult<Request> {
        self.check_rank(dest, "destination")?;
        let (id, ack) = {
            let mut state = self.state.borrow_mut();
            let id = state.reserve();
            let matched = self.mode == SendMode::Buffered;
            state.pending.insert(id, Pending::Sent { matched });
            (id, (!matched).then_some(id))
        };
        match &self.peers[dest] {
            None => {
                let owed = self.state.borrow_mut().deliver(Unclaimed {
                    src: self.rank,
                    tag,
                    data,
                    ack,
                });
                self.send_ack(owed);
            }
            Some(tx) => tx
                .send(Envelope::Data {
                    src: self.rank,
                    tag,
                    data,
                    ack,
                })
                .map_err(|_| SortlastError::communication(format!("rank {dest} hung up before receiving")))?,
        }
        Ok(Request::new(id))
    }

    fn irecv(&self, src: usize, tag: Tag) -> SortlastResult<Request> {
        self.check_rank(src, "source")?;
        // Drain what already arrived so the queue reflects send order.
        while self.progress(false)? {}
        let (request, owed) = {
            let mut state = self.state.borrow_mut();
            let found = state
                .unexpected
                .iter()
                .position(|m| m.src == src && m.tag == tag);
            let claimed = found.and_then(|i| state.unexpected.remove(i));
            let owed = claimed.as_ref().and_then(|m| m.ack.map(|id| (m.src, id)));
            let data = claimed.map(|m| m.data);
            (state.post(Pending::Recv { src, tag, data }), owed)
        };
        self.send_ack(owed);
        Ok(request)
    }

    fn wait(&self, request: &mut Request) -> SortlastResult<Option<Vec<u8>>> {
        let Some(id) = request.id() else {
            return Ok(None);
        };
        while !self.state.borrow().is_complete(id)? {
            self.progress(true)?;
        }
        *request = Request::NULL;
        Ok(self.state.borrow_mut().complete(id))
    }

    fn waitany(&self, requests: &mut [Request]) -> SortlastResult<(usize, Option<Vec<u8>>)> {
        if requests.iter().all(|r| r.is_null()) {
            return Err(SortlastError::invalid_operation("waitany called without active requests"));
        }
        loop {
            for (idx, req) in requests.iter_mut().enumerate() {
                let Some(id) = req.id() else {
                    continue;
                };
                if self.state.borrow().is_complete(id)? {
                    *req = Request::NULL;
                    return Ok((idx, self.state.borrow_mut().complete(id)));
                }
            }
            self.progress(true)?;
        }
    }
}

/// Builder of connected [`LocalComm`] endpoints.
#[derive(Debug)]
pub struct LocalFabric {
    endpoints: Vec<LocalComm>,
}

impl LocalFabric {
    /// `size` connected endpoints with buffered sends. A single endpoint is
    /// a loopback.
    pub fn new(size: usize) -> Self {
        Self::with_mode(size, SendMode::Buffered)
    }

    /// `size` connected endpoints whose sends complete as `mode` says.
    pub fn with_mode(size: usize, mode: SendMode) -> Self {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        let endpoints = receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalComm {
                rank,
                size,
                mode,
                peers: senders
                    .iter()
                    .enumerate()
                    .map(|(r, tx)| (r != rank).then(|| tx.clone()))
                    .collect(),
                inbox,
                state: RefCell::new(State::default()),
            })
            .collect();
        Self { endpoints }
    }

    /// The endpoints, indexed by rank.
    pub fn into_endpoints(self) -> Vec<LocalComm> {
        self.endpoints
    }

    /// Run `f` on `size` threads, one rank each, and return the per-rank
    /// results in rank order.
    pub fn run<T, F>(size: usize, f: F) -> SortlastResult<Vec<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> SortlastResult<T> + Sync,
    {
        Self::run_with_mode(size, SendMode::Buffered, f)
    }

    /// [`LocalFabric::run`] with sends completing as `mode` says.
    pub fn run_with_mode<T, F>(size: usize, mode: SendMode, f: F) -> SortlastResult<Vec<T>>
    where
        T: Send,
        F: Fn(LocalComm) -> SortlastResult<T> + Sync,
    {
        let endpoints = Self::with_mode(size, mode).into_endpoints();
        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    scope.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join()
                        .map_err(|_| SortlastError::communication(format!("rank {rank} panicked")))?
                })
                .collect()
        })
    }
}

#[cfg(test)]
#[path = "../../tests/unit/comm/local.rs"]
mod tests;
