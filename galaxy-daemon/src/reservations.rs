//! Reservation table: one FIFO queue per resource key.
//!
//! The dispatcher calls [`Reservations::reserve`] for each task in the order
//! tasks leave the queue, before the task is spawned. The returned [`Ticket`]
//! resolves once every earlier ticket sharing one of its keys has been
//! released, so tasks with a common key run one at a time and in enqueue
//! order. Tickets are issued under a single lock, so all per-key queues agree
//! on the order and two tasks cannot deadlock on each other.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

use galaxy_sync::ResourceKey;

/// Most recent ticket for a key; the next reservation waits on its release.
struct Tail {
    ticket: u64,
    released: oneshot::Receiver<()>,
}

#[derive(Default)]
struct State {
    next_ticket: u64,
    tails: HashMap<ResourceKey, Tail>,
    held: BTreeSet<ResourceKey>,
}

#[derive(Default)]
pub struct Reservations {
    state: Arc<Mutex<State>>,
}

/// A place in the queue of every key of one task.
pub struct Ticket {
    state: Arc<Mutex<State>>,
    ticket: u64,
    keys: Vec<ResourceKey>,
    waits: Vec<oneshot::Receiver<()>>,
    release: Vec<oneshot::Sender<()>>,
}

/// Held reservations; dropping it releases every key to the next ticket.
pub struct Reserved {
    state: Arc<Mutex<State>>,
    ticket: u64,
    keys: Vec<ResourceKey>,
    _release: Vec<oneshot::Sender<()>>,
}

impl std::fmt::Debug for Reserved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reserved")
            .field("ticket", &self.ticket)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Reservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue behind every current holder or waiter of `keys`. Never blocks.
    pub fn reserve(&self, keys: &[ResourceKey]) -> Ticket {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let mut state = lock(&self.state);
        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let mut waits = Vec::new();
        let mut release = Vec::with_capacity(keys.len());
        for key in &keys {
            let (tx, rx) = oneshot::channel();
            if let Some(previous) = state.tails.insert(
                key.clone(),
                Tail {
                    ticket,
                    released: rx,
                },
            ) {
                waits.push(previous.released);
            }
            release.push(tx);
        }

        Ticket {
            state: self.state.clone(),
            ticket,
            keys,
            waits,
            release,
        }
    }

    /// Reserve `keys` and wait for them.
    pub async fn acquire(&self, keys: &[ResourceKey]) -> Reserved {
        self.reserve(keys).wait().await
    }

    /// Keys currently held by a running task.
    pub fn held(&self) -> Vec<ResourceKey> {
        lock(&self.state).held.iter().cloned().collect()
    }
}

impl Ticket {
    /// Wait until every earlier ticket on these keys has been released.
    pub async fn wait(mut self) -> Reserved {
        while let Some(released) = self.waits.last_mut() {
            // A dropped sender also means released.
            let _ = released.await;
            self.waits.pop();
        }

        lock(&self.state).held.extend(self.keys.iter().cloned());
        Reserved {
            state: self.state.clone(),
            ticket: self.ticket,
            keys: std::mem::take(&mut self.keys),
            _release: std::mem::take(&mut self.release),
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            forget_tails(&self.state, self.ticket, &self.keys);
            return;
        };
        let state = self.state.clone();
        let ticket = self.ticket;
        let keys = std::mem::take(&mut self.keys);
        let waits = std::mem::take(&mut self.waits);
        let senders = std::mem::take(&mut self.release);

        // An abandoned ticket must not let its successors overtake its
        // predecessors.
        let finish = async move {
            for released in waits {
                let _ = released.await;
            }
            forget_tails(&state, ticket, &keys);
            drop(senders);
        };
        handle.spawn(finish);
    }
}

impl Drop for Reserved {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for key in &self.keys {
            state.held.remove(key);
            if state.tails.get(key).is_some_and(|tail| tail.ticket == self.ticket) {
                state.tails.remove(key);
            }
        }
    }
}

fn forget_tails(state: &Mutex<State>, ticket: u64, keys: &[ResourceKey]) {
    let mut state = lock(state);
    for key in keys {
        if state.tails.get(key).is_some_and(|tail| tail.ticket == ticket) {
            state.tails.remove(key);
        }
    }
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
