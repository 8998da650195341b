//! Message passing between participants.
//!
//! Participants share nothing. Everything they learn about each other goes
//! through a `Communicator`: point-to-point sends, receives matched by
//! `(source, tag)` or by tag alone, and a sum-reduction built on top of those.
//! `ChannelComm` runs every participant as a thread in one process; a real
//! multi-process transport only has to implement the required methods.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use crate::error::{Result, SpmvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Global ids a participant wants from the owner, sent once per plan.
    Request,
    /// Halo values, sent once per multiply.
    Halo,
    Reduce,
    Broadcast,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Values(Vec<f64>),
    Indices(Vec<usize>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Values(v) => v.len(),
            Payload::Indices(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub payload: Payload,
}

/// Element types that can travel in a `Payload`.
pub trait Wire: Copy + std::ops::AddAssign + Send + 'static {
    fn into_payload(data: Vec<Self>) -> Payload;
    fn from_payload(payload: Payload) -> Option<Vec<Self>>;
}

impl Wire for f64 {
    fn into_payload(data: Vec<Self>) -> Payload {
        Payload::Values(data)
    }

    fn from_payload(payload: Payload) -> Option<Vec<Self>> {
        match payload {
            Payload::Values(v) => Some(v),
            Payload::Indices(_) => None,
        }
    }
}

impl Wire for usize {
    fn into_payload(data: Vec<Self>) -> Payload {
        Payload::Indices(data)
    }

    fn from_payload(payload: Payload) -> Option<Vec<Self>> {
        match payload {
            Payload::Indices(v) => Some(v),
            Payload::Values(_) => None,
        }
    }
}

pub trait Communicator {
    fn rank(&self) -> usize;

    /// Number of participants.
    fn size(&self) -> usize;

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()>;

    /// Blocks until a message from `source` with `tag` arrives.
    fn recv(&self, source: usize, tag: Tag) -> Result<Payload>;

    /// Blocks until a message with `tag` arrives from anyone.
    fn recv_any(&self, tag: Tag) -> Result<(usize, Payload)>;

    fn send_slice<T: Wire>(&self, dest: usize, tag: Tag, data: Vec<T>) -> Result<()>
    where
        Self: Sized,
    {
        self.send(dest, tag, T::into_payload(data))
    }

    fn recv_slice<T: Wire>(&self, source: usize, tag: Tag) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        let payload = self.recv(source, tag)?;
        T::from_payload(payload).ok_or_else(|| {
            SpmvError::communication(self.rank(), source, format!("unexpected payload kind for {:?}", tag))
        })
    }

    /// Element-wise sum over all participants; everyone gets the result.
    fn all_reduce_sum<T: Wire>(&self, local: &[T]) -> Result<Vec<T>>
    where
        Self: Sized,
    {
        let rank = self.rank();
        if self.size() == 1 {
            return Ok(local.to_vec());
        }
        if rank != 0 {
            self.send_slice(0, Tag::Reduce, local.to_vec())?;
            let total: Vec<T> = self.recv_slice(0, Tag::Broadcast)?;
            if total.len() != local.len() {
                return Err(SpmvError::communication(
                    rank,
                    0,
                    format!("reduction returned {} entries, expected {}", total.len(), local.len()),
                ));
            }
            return Ok(total);
        }

        let mut total = local.to_vec();
        for source in 1..self.size() {
            let part: Vec<T> = self.recv_slice(source, Tag::Reduce)?;
            if part.len() != total.len() {
                return Err(SpmvError::communication(
                    rank,
                    source,
                    format!("reduction contribution has {} entries, expected {}", part.len(), total.len()),
                ));
            }
            total.iter_mut().zip(part).for_each(|(t, p)| *t += p);
        }
        for dest in 1..self.size() {
            self.send_slice(dest, Tag::Broadcast, total.clone())?;
        }
        Ok(total)
    }

    fn barrier(&self) -> Result<()>
    where
        Self: Sized,
    {
        self.all_reduce_sum::<usize>(&[])?;
        Ok(())
    }
}

/// The only participant. Nothing is ever transmitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, dest: usize, _tag: Tag, _payload: Payload) -> Result<()> {
        Err(SpmvError::communication(0, dest, "single participant has no peers"))
    }

    fn recv(&self, source: usize, _tag: Tag) -> Result<Payload> {
        Err(SpmvError::communication(0, source, "single participant has no peers"))
    }

    fn recv_any(&self, _tag: Tag) -> Result<(usize, Payload)> {
        Err(SpmvError::communication(0, 0, "single participant has no peers"))
    }
}

/// One endpoint of an in-process group of participants.
///
/// Messages from one source arrive in the order they were sent. Messages that
/// arrive before anyone asks for them are parked until a matching receive.
pub struct ChannelComm {
    rank: usize,
    peers: Vec<Option<Sender<Envelope>>>,
    inbox: Receiver<Envelope>,
    parked: RefCell<VecDeque<Envelope>>,
}

impl ChannelComm {
    /// Creates `size` connected endpoints, endpoint `r` having rank `r`.
    pub fn cluster(size: usize) -> Vec<ChannelComm> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| mpsc::channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| {
                // no sender to ourselves, so the inbox hangs up once every peer is gone
                let peers = senders
                    .iter()
                    .enumerate()
                    .map(|(r, s)| if r == rank { None } else { Some(s.clone()) })
                    .collect();
                ChannelComm {
                    rank,
                    peers,
                    inbox,
                    parked: RefCell::new(VecDeque::new()),
                }
            })
            .collect()
    }

    fn take_parked<F>(&self, matches: F) -> Option<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        let mut parked = self.parked.borrow_mut();
        let pos = parked.iter().position(matches)?;
        parked.remove(pos)
    }

    fn wait_for<F>(&self, peer: usize, matches: F) -> Result<Envelope>
    where
        F: Fn(&Envelope) -> bool,
    {
        if let Some(envelope) = self.take_parked(&matches) {
            return Ok(envelope);
        }
        loop {
            let envelope = self.inbox.recv().map_err(|_| {
                SpmvError::communication(self.rank, peer, "every peer hung up before the message arrived")
            })?;
            if matches(&envelope) {
                return Ok(envelope);
            }
            trace!(
                "participant {}: parking {:?} from {}",
                self.rank,
                envelope.tag,
                envelope.source
            );
            self.parked.borrow_mut().push_back(envelope);
        }
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        let sender = self
            .peers
            .get(dest)
            .and_then(|s| s.as_ref())
            .ok_or_else(|| SpmvError::communication(self.rank, dest, "no such peer"))?;
        sender
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| SpmvError::communication(self.rank, dest, "peer hung up"))
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Payload> {
        let envelope = self.wait_for(source, |e| e.source == source && e.tag == tag)?;
        Ok(envelope.payload)
    }

    fn recv_any(&self, tag: Tag) -> Result<(usize, Payload)> {
        let envelope = self.wait_for(self.rank, |e| e.tag == tag)?;
        Ok((envelope.source, envelope.payload))
    }
}

/// Runs `task` once per participant, each on its own thread with its own
/// endpoint, and returns the results in rank order.
pub fn spawn_cluster<F, T>(size: usize, task: F) -> Vec<T>
where
    F: Fn(ChannelComm) -> T + Sync,
    T: Send,
{
    let task = &task;
    thread::scope(|scope| {
        let handles: Vec<_> = ChannelComm::cluster(size)
            .into_iter()
            .map(|comm| {
                thread::Builder::new()
                    .name(format!("participant-{}", comm.rank()))
                    .spawn_scoped(scope, move || task(comm))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                },
                Err(err) => panic!("failed to spawn participant thread: {err}"),
            })
            .collect()
    })
}
