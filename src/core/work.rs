//! Pooled work items and the per-tick work state machine.
//!
//! A work item carries one decoded message from the framing layer to the
//! handler and, if the handler answers, the reply back to a connection's
//! outbound ring. Items are allocated once and recycled.
//!
//! The pool keeps an ordering of item ids whose prefix `order[..active]` holds
//! exactly the items that are not `Free`. Every dispatch walks that prefix once
//! and relinks it as `deferred -> released -> untouched free`, so deferred work
//! is retried before any slot that was already free is handed out again.

use std::time::Instant;

use bytes::BytesMut;
use tracing::{trace, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Free,
    /// The handler runs on it next dispatch.
    NeedsProcessing,
    /// The payload goes to the target connection next dispatch.
    NeedsOutput,
    /// Released next dispatch without output.
    Done,
}

/// Where an item's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkTarget {
    Connection(usize),
    /// Resolved at write time to the oldest connected slot.
    Any,
}

/// One unit of message-in-flight state.
pub struct WorkItem<M> {
    id: usize,
    target: WorkTarget,
    requested_at: Instant,
    state: WorkState,
    payload: BytesMut,
    message: M,
}

impl<M: Default> WorkItem<M> {
    fn new(id: usize) -> Self {
        Self {
            id,
            target: WorkTarget::Any,
            requested_at: Instant::now(),
            state: WorkState::Free,
            payload: BytesMut::new(),
            message: M::default(),
        }
    }

    fn release(&mut self) {
        self.target = WorkTarget::Any;
        self.state = WorkState::Free;
        self.payload.clear();
        self.message = M::default();
    }
}

impl<M> WorkItem<M> {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn target(&self) -> WorkTarget {
        self.target
    }

    /// Connection the item came from or is addressed to.
    pub fn connection_id(&self) -> Option<usize> {
        match self.target {
            WorkTarget::Connection(id) => Some(id),
            WorkTarget::Any => None,
        }
    }

    /// Redirects the item's output.
    pub fn set_target(&mut self, target: WorkTarget) {
        self.target = target;
    }

    #[inline]
    pub fn requested_at(&self) -> Instant {
        self.requested_at
    }

    #[inline]
    pub fn state(&self) -> WorkState {
        self.state
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut BytesMut {
        &mut self.payload
    }

    /// Protocol-specific decoded form (HTTP request/response, nothing for Tcp0).
    #[inline]
    pub fn message(&self) -> &M {
        &self.message
    }

    #[inline]
    pub fn message_mut(&mut self) -> &mut M {
        &mut self.message
    }

    /// Replaces the payload with `data` and marks the item for output.
    pub fn reply(&mut self, data: &[u8]) {
        self.payload.clear();
        self.payload.extend_from_slice(data);
        self.state = WorkState::NeedsOutput;
    }

    /// Sends the current payload as is.
    pub fn send(&mut self) {
        self.state = WorkState::NeedsOutput;
    }

    /// Asks to be handled again next tick.
    pub fn defer(&mut self) {
        self.state = WorkState::NeedsProcessing;
    }

    /// No reply.
    pub fn finish(&mut self) {
        self.state = WorkState::Done;
    }
}

/// Application callback invoked once per tick for every `NeedsProcessing` item.
///
/// The handler sets the next state itself through [`WorkItem::reply`],
/// [`WorkItem::send`], [`WorkItem::defer`] or [`WorkItem::finish`].
pub trait WorkHandler<M> {
    fn handle(&mut self, item: &mut WorkItem<M>);
}

impl<M, F> WorkHandler<M> for F
where
    F: FnMut(&mut WorkItem<M>),
{
    #[inline]
    fn handle(&mut self, item: &mut WorkItem<M>) {
        self(item)
    }
}

/// What the engine did with a `NeedsOutput` item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Copied into a connection's outbound ring.
    Staged,
    /// Target is gone; the item is released without output.
    Dropped,
    /// No connection can take it yet; keep it queued.
    Pending,
}

/// Counters from one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub handled: usize,
    pub staged: usize,
    pub released: usize,
}

/// Fixed set of work items plus the ordering that keeps active ones in front.
pub struct WorkPool<M> {
    items: Vec<WorkItem<M>>,
    order: Vec<usize>,
    active: usize,
    // Scratch list of ids released during one dispatch
    released: Vec<usize>,
}

impl<M: Default> WorkPool<M> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: (0..capacity).map(WorkItem::new).collect(),
            order: (0..capacity).collect(),
            active: 0,
            released: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.items.len()
    }

    /// Number of items not in `Free`.
    #[inline]
    pub fn active_len(&self) -> usize {
        self.active
    }

    #[inline]
    pub fn has_free(&self) -> bool {
        self.active < self.items.len()
    }

    /// Active item ids, in processing order.
    pub fn active_ids(&self) -> &[usize] {
        &self.order[..self.active]
    }

    pub fn get(&self, id: usize) -> Option<&WorkItem<M>> {
        self.items.get(id)
    }

    /// The item the next claim will hand out, still `Free`.
    ///
    /// Framing code decodes straight into it and then calls
    /// [`WorkPool::claim_next`]; if it decodes nothing the item stays free.
    pub fn next_free(&mut self) -> Option<&mut WorkItem<M>> {
        let id = *self.order.get(self.active)?;
        Some(&mut self.items[id])
    }

    /// Commits the item returned by [`WorkPool::next_free`] as `NeedsProcessing`.
    pub fn claim_next(&mut self, target: WorkTarget) -> Result<usize> {
        self.claim(target, WorkState::NeedsProcessing)
    }

    /// Queues `data` for output to `target`, bypassing the handler.
    pub fn stage_output(&mut self, target: WorkTarget, data: &[u8]) -> Result<usize> {
        let capacity = self.items.len();
        let item = self.next_free().ok_or(Error::NoFreeWork { capacity })?;
        item.payload.clear();
        item.payload.extend_from_slice(data);
        self.claim(target, WorkState::NeedsOutput)
    }

    fn claim(&mut self, target: WorkTarget, state: WorkState) -> Result<usize> {
        let id = *self.order.get(self.active).ok_or(Error::NoFreeWork {
            capacity: self.items.len(),
        })?;
        let item = &mut self.items[id];
        item.target = target;
        item.requested_at = Instant::now();
        item.state = state;
        self.active += 1;
        Ok(id)
    }

    /// Runs the state machine over every active item once.
    ///
    /// `deliver` copies a `NeedsOutput` payload to its connection. Items still
    /// `NeedsProcessing` (or `Pending` output) are kept, in their current
    /// order, in front of the items released by this pass.
    pub fn dispatch<H, D>(&mut self, handler: &mut H, mut deliver: D) -> DispatchStats
    where
        H: WorkHandler<M> + ?Sized,
        D: FnMut(&mut WorkItem<M>) -> Delivery,
    {
        let mut stats = DispatchStats::default();
        let mut kept = 0;
        self.released.clear();

        for i in 0..self.active {
            let id = self.order[i];
            let item = &mut self.items[id];

            if item.state == WorkState::NeedsProcessing {
                handler.handle(item);
                stats.handled += 1;

                if item.state == WorkState::Free {
                    warn!(work = id, "handler left work item free, forcing done");
                    item.state = WorkState::Done;
                }
            }

            let keep = match item.state {
                WorkState::NeedsProcessing => true,
                WorkState::NeedsOutput => match deliver(item) {
                    Delivery::Staged => {
                        stats.staged += 1;
                        false
                    }
                    Delivery::Dropped => false,
                    Delivery::Pending => true,
                },
                WorkState::Done | WorkState::Free => false,
            };

            if keep {
                self.order[kept] = id;
                kept += 1;
            } else {
                item.release();
                self.released.push(id);
            }
        }

        // order = deferred -> released -> untouched free
        stats.released = self.released.len();
        self.order[kept..self.active].copy_from_slice(&self.released);
        self.active = kept;

        if stats.handled > 0 || stats.released > 0 {
            trace!(
                handled = stats.handled,
                staged = stats.staged,
                released = stats.released,
                active = self.active,
                "work dispatch"
            );
        }
        stats
    }

    /// Releases every item bound to `conn`.
    pub fn drop_connection(&mut self, conn: usize) {
        let mut kept = 0;
        self.released.clear();

        for i in 0..self.active {
            let id = self.order[i];
            let item = &mut self.items[id];
            if item.target == WorkTarget::Connection(conn) {
                item.release();
                self.released.push(id);
            } else {
                self.order[kept] = id;
                kept += 1;
            }
        }

        self.order[kept..self.active].copy_from_slice(&self.released);
        self.active = kept;
    }
}
