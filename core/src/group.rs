//! Group membership and the frame router shared by all collectives.
//!
//! Every peer link is drained by one router task that decodes frames and
//! files them by operation name. A collective then waits on the mailbox for
//! `(peer, op)` only, so frames of overlapping operations on different tables
//! never steal each other's data.

use crate::partition::Partition;
use crate::transport::Transport;
use crate::wire::{Frame, FrameKind, FrameRef};
use chorus_common::{ChorusError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Position of one worker in its group. Fixed for a computation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMembership {
    rank: usize,
    size: usize,
    leader: usize,
}

impl GroupMembership {
    pub fn new(rank: usize, size: usize, leader: usize) -> Result<Self> {
        if size == 0 || rank >= size || leader >= size {
            return Err(ChorusError::configuration_error(format!(
                "invalid membership: rank {} leader {} in a group of {}",
                rank, leader, size
            )));
        }
        Ok(Self { rank, size, leader })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn leader(&self) -> usize {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.rank == self.leader
    }

    /// Every other rank, ascending.
    pub fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |r| *r != self.rank)
    }

    /// Previous rank on the ring.
    pub fn left(&self) -> usize {
        (self.rank + self.size - 1) % self.size
    }

    /// Next rank on the ring.
    pub fn right(&self) -> usize {
        (self.rank + 1) % self.size
    }
}

#[derive(Default)]
struct MailSlot {
    frames: Mutex<VecDeque<Frame>>,
    notify: Notify,
}

#[derive(Default)]
struct PeerMailbox {
    slots: HashMap<String, Arc<MailSlot>>,
    failure: Option<String>,
}

struct Shared {
    membership: GroupMembership,
    mailboxes: Vec<Mutex<PeerMailbox>>,
    active: Mutex<HashSet<String>>,
}

impl Shared {
    fn slot(&self, peer: usize, op: &str) -> Arc<MailSlot> {
        let mut mailbox = self.mailboxes[peer].lock();
        Arc::clone(mailbox.slots.entry(op.to_string()).or_default())
    }

    fn deliver(&self, peer: usize, frame: Frame) {
        // The mailbox stays locked until the frame is queued, otherwise
        // `finish` could drop the slot in between.
        let mut mailbox = self.mailboxes[peer].lock();
        let slot = mailbox.slots.entry(frame.op.clone()).or_default();
        slot.frames.lock().push_back(frame);
        slot.notify.notify_one();
    }

    fn fail_peer(&self, peer: usize, reason: String) {
        let mut mailbox = self.mailboxes[peer].lock();
        mailbox.failure = Some(reason);
        for slot in mailbox.slots.values() {
            slot.notify.notify_one();
        }
    }

    fn failure(&self, peer: usize) -> Option<String> {
        self.mailboxes[peer].lock().failure.clone()
    }

    fn finish(&self, op: &str) {
        self.active.lock().remove(op);
        // Frames a fast peer already sent for a later use of the same name
        // must survive, so only drained slots go.
        for mailbox in &self.mailboxes {
            let mut mailbox = mailbox.lock();
            let drained = mailbox
                .slots
                .get(op)
                .is_some_and(|slot| slot.frames.lock().is_empty());
            if drained {
                mailbox.slots.remove(op);
            }
        }
    }
}

/// Marks a collective operation name as in use until dropped.
#[must_use = "the operation name is released when the guard is dropped"]
pub struct OpGuard<'a> {
    shared: &'a Shared,
    op: String,
}

impl OpGuard<'_> {
    pub fn op(&self) -> &str {
        &self.op
    }
}

impl fmt::Debug for OpGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpGuard").field("op", &self.op).finish()
    }
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.shared.finish(&self.op);
    }
}

/// Process-group handle used by every collective operation.
pub struct GroupCommunicator {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    routers: Mutex<Vec<JoinHandle<()>>>,
}

impl GroupCommunicator {
    /// Wrap `transport` and start routing frames from every peer.
    ///
    /// Fails with `InvalidState` outside a tokio runtime.
    pub fn new(membership: GroupMembership, transport: Arc<dyn Transport>) -> Result<Self> {
        if transport.rank() != membership.rank() || transport.size() != membership.size() {
            return Err(ChorusError::configuration_error(format!(
                "transport is rank {} of {} but membership is rank {} of {}",
                transport.rank(),
                transport.size(),
                membership.rank(),
                membership.size()
            )));
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ChorusError::invalid_state(
                "a group communicator must be created inside a tokio runtime",
            ));
        }

        let shared = Arc::new(Shared {
            membership,
            mailboxes: (0..membership.size())
                .map(|_| Mutex::new(PeerMailbox::default()))
                .collect(),
            active: Mutex::new(HashSet::new()),
        });

        let routers = membership
            .peers()
            .map(|peer| {
                tokio::spawn(route_frames(
                    Arc::clone(&shared),
                    Arc::clone(&transport),
                    peer,
                ))
            })
            .collect();

        debug!(
            "rank {} communicator started, group of {}, leader {}",
            membership.rank(),
            membership.size(),
            membership.leader()
        );
        Ok(Self {
            shared,
            transport,
            routers: Mutex::new(routers),
        })
    }

    pub fn membership(&self) -> &GroupMembership {
        &self.shared.membership
    }

    pub fn rank(&self) -> usize {
        self.shared.membership.rank()
    }

    pub fn size(&self) -> usize {
        self.shared.membership.size()
    }

    pub fn leader(&self) -> usize {
        self.shared.membership.leader()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Claim `op` for the duration of one collective call.
    ///
    /// Fails with `Protocol` if a call with the same name is still running
    /// on this rank.
    pub fn begin(&self, op: &str) -> Result<OpGuard<'_>> {
        if !self.shared.active.lock().insert(op.to_string()) {
            return Err(ChorusError::protocol_error(format!(
                "operation '{}' is already in progress on rank {}",
                op,
                self.rank()
            )));
        }
        Ok(OpGuard {
            shared: &self.shared,
            op: op.to_string(),
        })
    }

    pub async fn send_partitions(
        &self,
        to: usize,
        op: &str,
        table_id: i32,
        kind: FrameKind,
        origin: usize,
        partitions: &[&Partition],
    ) -> Result<()> {
        let bytes = FrameRef {
            op,
            table_id,
            kind,
            origin: origin as u32,
            partitions,
        }
        .encode()?;
        self.transport.send(to, bytes).await
    }

    /// Send a frame without partitions.
    pub async fn send_control(
        &self,
        to: usize,
        op: &str,
        table_id: i32,
        kind: FrameKind,
    ) -> Result<()> {
        self.send_partitions(to, op, table_id, kind, self.rank(), &[])
            .await
    }

    /// Wait for the next frame of `op` from `from`.
    ///
    /// Frames of other operations from the same peer stay queued for their
    /// own receivers.
    pub async fn recv_frame(
        &self,
        op: &str,
        from: usize,
        expected: FrameKind,
        table_id: i32,
    ) -> Result<Frame> {
        if from >= self.size() || from == self.rank() {
            return Err(ChorusError::protocol_error(format!(
                "rank {} cannot receive from rank {}",
                self.rank(),
                from
            )));
        }

        let slot = self.shared.slot(from, op);
        let frame = loop {
            let next = slot.frames.lock().pop_front();
            if let Some(frame) = next {
                break frame;
            }
            if let Some(reason) = self.shared.failure(from) {
                return Err(ChorusError::communication_error(format!(
                    "op '{}' on rank {}: link to rank {} failed: {}",
                    op,
                    self.rank(),
                    from,
                    reason
                )));
            }
            slot.notify.notified().await;
        };

        if frame.kind != expected {
            return Err(ChorusError::protocol_error(format!(
                "op '{}' expected a {:?} frame from rank {}, got {:?}",
                op, expected, from, frame.kind
            )));
        }
        if frame.table_id != table_id {
            return Err(ChorusError::protocol_error(format!(
                "op '{}' is running on table {} but rank {} sent table {}",
                op, table_id, from, frame.table_id
            )));
        }
        Ok(frame)
    }

    /// Stop the frame routers. Pending and future receives fail once they
    /// have drained what was already routed.
    pub fn shutdown(&self) {
        let routers = std::mem::take(&mut *self.routers.lock());
        for router in &routers {
            router.abort();
        }
        for peer in self.shared.membership.peers() {
            self.shared
                .fail_peer(peer, "communicator shut down".to_string());
        }
        if !routers.is_empty() {
            debug!("rank {} communicator shut down", self.rank());
        }
    }
}

async fn route_frames(shared: Arc<Shared>, transport: Arc<dyn Transport>, peer: usize) {
    let rank = shared.membership.rank();
    loop {
        let bytes = match transport.receive(peer).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("rank {} lost link to rank {}: {}", rank, peer, e);
                shared.fail_peer(peer, e.to_string());
                return;
            }
        };
        match Frame::decode(&bytes) {
            Ok(frame) => shared.deliver(peer, frame),
            Err(e) => {
                warn!("rank {} got an undecodable frame from rank {}: {}", rank, peer, e);
                shared.fail_peer(peer, e.to_string());
                return;
            }
        }
    }
}

impl fmt::Debug for GroupCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupCommunicator")
            .field("membership", &self.shared.membership)
            .field("transport", &self.transport)
            .finish()
    }
}

impl Drop for GroupCommunicator {
    fn drop(&mut self) {
        for router in self.routers.get_mut().drain(..) {
            router.abort();
        }
    }
}
