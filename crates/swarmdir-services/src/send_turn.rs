//! Per-peer send-turn.
//!
//! At most one registry-initiated DOWNLOAD may be outstanding on a peer's
//! relay connection. The requester's session acquires the turn, parks it in
//! the owner's slot together with a [`RelayTicket`], and only then writes the
//! instruction. The owner's relay session takes the parked turn when an
//! UPLOAD matching the ticket arrives and drops it once the copy has finished.
//!
//! Waiters are served FIFO (tokio's semaphore is fair). A parked turn that is
//! never picked up is reclaimed by [`SendTurn::expire`]. Closing the turn
//! leaves a parked ticket in place so whoever watches the hand-off can still
//! reclaim it and answer the requester.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use swarmdir_core::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TurnError {
    #[error("timed out waiting for send turn")]
    TimedOut,
    #[error("peer has exited")]
    Closed,
}

/// What the owner's relay is expected to upload, and for whom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTicket {
    pub chunk: Chunk,
    pub requester: String,
}

/// An acquired turn that has not been handed off yet.
#[derive(Debug)]
pub struct TurnPermit(OwnedSemaphorePermit);

/// A handed-off turn. Dropping it releases the turn.
#[derive(Debug)]
pub struct InFlight {
    pub id: u64,
    pub ticket: RelayTicket,
    pub handed_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    pub fn release(self) {}
}

#[derive(Clone, Debug)]
pub struct SendTurn {
    sem: Arc<Semaphore>,
    slot: Arc<Mutex<Option<InFlight>>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<watch::Sender<bool>>,
}

impl Default for SendTurn {
    fn default() -> Self {
        Self::new()
    }
}

impl SendTurn {
    pub fn new() -> Self {
        Self {
            sem: Arc::new(Semaphore::new(1)),
            slot: Arc::new(Mutex::new(None)),
            next_id: Arc::new(AtomicU64::new(1)),
            closed: Arc::new(watch::channel(false).0),
        }
    }

    /// Wait for the turn, at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<TurnPermit, TurnError> {
        match tokio::time::timeout(timeout, self.sem.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(TurnPermit(permit)),
            Ok(Err(_)) => Err(TurnError::Closed),
            Err(_) => Err(TurnError::TimedOut),
        }
    }

    /// Park `permit` with `ticket` until the owner's relay picks it up.
    /// Returns the hand-off id used by [`expire`](Self::expire).
    pub fn hand_off(&self, permit: TurnPermit, ticket: RelayTicket) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let in_flight = InFlight {
            id,
            ticket,
            handed_at: Instant::now(),
            _permit: permit.0,
        };
        // The turn is exclusive, so the slot is empty here.
        *self.lock_slot() = Some(in_flight);
        id
    }

    /// Take the parked turn only if its ticket satisfies `accept`. A
    /// non-matching ticket stays parked.
    pub fn take_if(&self, accept: impl FnOnce(&RelayTicket) -> bool) -> Option<InFlight> {
        let mut slot = self.lock_slot();
        if slot.as_ref().is_some_and(|f| accept(&f.ticket)) {
            return slot.take();
        }
        None
    }

    /// Reclaim the parked turn if hand-off `id` is still waiting.
    pub fn expire(&self, id: u64) -> bool {
        let mut slot = self.lock_slot();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            *slot = None;
            return true;
        }
        false
    }

    /// Fail all current and future waiters. A parked turn stays until it is
    /// taken or expired.
    pub fn close(&self) {
        self.sem.close();
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.sem.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// True if nobody holds the turn.
    pub fn is_available(&self) -> bool {
        self.sem.available_permits() > 0
    }

    /// Ticket of the parked turn, if any.
    pub fn pending(&self) -> Option<RelayTicket> {
        self.lock_slot().as_ref().map(|f| f.ticket.clone())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
