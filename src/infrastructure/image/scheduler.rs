//! Bounded, priority-aware admission for network retrievals.
//!
//! A fixed number of slots is shared by all loads. When every slot is taken,
//! requests wait in one FIFO queue per priority; a released slot always goes
//! to the oldest normal-priority ticket before any low-priority one.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::domain::entities::Priority;

/// Identifier of a queued request.
pub type TicketId = u64;

/// Default number of concurrent network retrievals.
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

struct Ticket {
    id: TicketId,
    tx: oneshot::Sender<FetchPermit>,
}

struct SchedulerState {
    available: usize,
    next_ticket: TicketId,
    normal: VecDeque<Ticket>,
    low: VecDeque<Ticket>,
}

impl SchedulerState {
    fn pop_next(&mut self) -> Option<Ticket> {
        self.normal.pop_front().or_else(|| self.low.pop_front())
    }

    fn take(&mut self, ticket: TicketId) -> Option<Ticket> {
        for queue in [&mut self.normal, &mut self.low] {
            if let Some(pos) = queue.iter().position(|t| t.id == ticket) {
                return queue.remove(pos);
            }
        }
        None
    }
}

/// Shared pool of network slots.
pub struct FetchScheduler {
    state: Mutex<SchedulerState>,
    capacity: usize,
}

impl std::fmt::Debug for FetchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchScheduler")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("queued", &self.queued())
            .finish()
    }
}

/// A held network slot; returned to the pool on drop.
pub struct FetchPermit {
    scheduler: Arc<FetchScheduler>,
}

impl std::fmt::Debug for FetchPermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPermit").finish_non_exhaustive()
    }
}

impl Drop for FetchPermit {
    fn drop(&mut self) {
        self.scheduler.release();
    }
}

/// Result of asking for a slot.
#[derive(Debug)]
pub enum Admission {
    /// A slot was free.
    Granted(FetchPermit),
    /// Waiting in the queue.
    Queued {
        /// Ticket to promote or cancel the request.
        ticket: TicketId,
        /// Receives the slot once granted.
        rx: oneshot::Receiver<FetchPermit>,
    },
}

impl Admission {
    /// Ticket of a queued admission.
    #[must_use]
    pub const fn ticket(&self) -> Option<TicketId> {
        match self {
            Self::Granted(_) => None,
            Self::Queued { ticket, .. } => Some(*ticket),
        }
    }

    /// Waits for the slot. Returns `None` if the ticket was cancelled.
    pub async fn wait(self) -> Option<FetchPermit> {
        match self {
            Self::Granted(permit) => Some(permit),
            Self::Queued { rx, .. } => rx.await.ok(),
        }
    }
}

impl FetchScheduler {
    /// Creates a pool with `capacity` slots (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        Arc::new(Self {
            state: Mutex::new(SchedulerState {
                available: capacity,
                next_ticket: 0,
                normal: VecDeque::new(),
                low: VecDeque::new(),
            }),
            capacity,
        })
    }

    /// Takes a free slot or enqueues a ticket at `priority`.
    pub fn admit(self: &Arc<Self>, priority: Priority) -> Admission {
        let mut state = self.state.lock();
        if state.available > 0 {
            state.available -= 1;
            return Admission::Granted(FetchPermit {
                scheduler: self.clone(),
            });
        }

        let id = state.next_ticket;
        state.next_ticket += 1;
        let (tx, rx) = oneshot::channel();
        let ticket = Ticket { id, tx };
        match priority {
            Priority::Normal => state.normal.push_back(ticket),
            Priority::Low => state.low.push_back(ticket),
        }
        trace!(ticket = id, priority = %priority, "Queued network fetch");
        Admission::Queued { ticket: id, rx }
    }

    /// Moves a queued low-priority ticket to the back of the normal queue.
    ///
    /// Returns false if the ticket is not waiting in the low queue.
    pub fn promote(&self, ticket: TicketId) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.low.iter().position(|t| t.id == ticket) else {
            return false;
        };
        if let Some(t) = state.low.remove(pos) {
            state.normal.push_back(t);
            trace!(ticket, "Promoted queued fetch");
            return true;
        }
        false
    }

    /// Withdraws a queued ticket. Returns false if it was not queued.
    pub fn cancel(&self, ticket: TicketId) -> bool {
        self.state.lock().take(ticket).is_some()
    }

    /// Hands the released slot to the next live ticket, or back to the pool.
    fn release(self: &Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pop_next() {
                    Some(ticket) => ticket,
                    None => {
                        state.available += 1;
                        return;
                    }
                }
            };

            if next.tx.is_closed() {
                continue;
            }

            // A failed send drops the permit, which releases again.
            let _ = next.tx.send(FetchPermit {
                scheduler: self.clone(),
            });
            return;
        }
    }

    /// Total number of slots.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Tickets waiting for a slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        let state = self.state.lock();
        state.normal.len() + state.low.len()
    }
}
