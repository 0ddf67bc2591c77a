//! Connection pool
//!
//! Slots live in a flat arena for the whole life of the engine. Free slot ids
//! wait in a FIFO queue (released slots go to the back), and in-use ids sit in
//! an ordered list, oldest first, which is the scan order of every tick.

use std::collections::VecDeque;
use std::time::Instant;

use super::connection::{ConnectionSlot, LinkState};
use crate::config::EngineConfig;

pub struct ConnectionPool<C> {
    slots: Vec<ConnectionSlot<C>>,
    free: VecDeque<usize>,
    active: Vec<usize>,
    // Ids released by the last sweep
    released: Vec<usize>,
}

impl<C: Default> ConnectionPool<C> {
    pub fn new(config: &EngineConfig) -> Self {
        let capacity = config.max_connections;
        Self {
            slots: (0..capacity)
                .map(|id| ConnectionSlot::new(id, config))
                .collect(),
            free: (0..capacity).collect(),
            active: Vec::with_capacity(capacity),
            released: Vec::with_capacity(capacity),
        }
    }

    /// Ambil slot free berikutnya dan taruh di akhir scan order.
    pub fn acquire(&mut self) -> Option<usize> {
        let id = self.free.pop_front()?;
        self.active.push(id);
        Some(id)
    }

    /// Releases every `Disconnect` slot whose deadline has passed.
    ///
    /// Surviving slots keep their relative order. Returns the released ids.
    pub fn sweep(&mut self, now: Instant) -> &[usize] {
        let slots = &mut self.slots;
        let free = &mut self.free;
        let released = &mut self.released;
        released.clear();

        self.active.retain(|&id| {
            let slot = &mut slots[id];
            if slot.disconnect_expired(now) {
                slot.release();
                free.push_back(id);
                released.push(id);
                false
            } else {
                true
            }
        });

        &self.released
    }
}

impl<C> ConnectionPool<C> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Jumlah slot yang sedang dipakai.
    #[inline]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// In-use slot ids, oldest first.
    pub fn active_ids(&self) -> &[usize] {
        &self.active
    }

    #[inline]
    pub(crate) fn active_id(&self, index: usize) -> usize {
        self.active[index]
    }

    pub fn get(&self, id: usize) -> Option<&ConnectionSlot<C>> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut ConnectionSlot<C>> {
        self.slots.get_mut(id)
    }

    /// Slot `id` if it is currently in use.
    pub fn in_use_mut(&mut self, id: usize) -> Option<&mut ConnectionSlot<C>> {
        self.slots.get_mut(id).filter(|slot| slot.is_in_use())
    }

    /// Oldest slot that is `Connected` right now.
    pub fn oldest_connected(&self) -> Option<usize> {
        self.active
            .iter()
            .copied()
            .find(|&id| self.slots[id].state() == LinkState::Connected)
    }
}
