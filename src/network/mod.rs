//! Network layer: connection slots, the pool, and the two tick-driven engines.
//!
//! - [`Listener`]: accepts inbound connections (acceptor thread polled with mio).
//! - [`Dialer`]: owns outbound connections with reconnect and heartbeat.
//! - [`Registry`]: ticks many engines keyed by port or site.
//!
//! Every engine runs the same four phases per tick: intake, per-slot scan,
//! disconnect sweep, work dispatch. Only the thread calling `run_once` touches
//! slots, rings and work items.

mod connection;
mod dialer;
mod listener;
mod pool;
mod registry;
mod scan;

use std::ops::AddAssign;

use crate::error::Result;

pub use connection::{ConnectionMode, ConnectionSlot, LinkState};
pub use dialer::{DialOptions, Dialer};
pub use listener::Listener;
pub use pool::ConnectionPool;
pub use registry::Registry;

/// Counters for one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    /// Connections accepted or established.
    pub accepted: u64,
    pub released: u64,
    /// Messages produced by framing.
    pub decoded: u64,
    /// Handler invocations.
    pub dispatched: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl TickStats {
    /// True when the tick moved nothing at all.
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for TickStats {
    fn add_assign(&mut self, other: Self) {
        self.accepted += other.accepted;
        self.released += other.released;
        self.decoded += other.decoded;
        self.dispatched += other.dispatched;
        self.bytes_in += other.bytes_in;
        self.bytes_out += other.bytes_out;
    }
}

/// Operations every engine offers, for driving them as trait objects.
pub trait Engine {
    /// One tick.
    fn run_once(&mut self) -> TickStats;

    /// Stages `payload` for connection `conn`, framed by the engine's protocol.
    fn write(&mut self, conn: usize, payload: &[u8]) -> Result<()>;

    /// Queues `payload` for the oldest connected slot, whenever there is one.
    fn send_any(&mut self, payload: &[u8]) -> Result<()>;

    /// Moves `conn` to `Disconnect` with the usual grace period.
    fn disconnect(&mut self, conn: usize) -> Result<()>;

    /// Connections currently holding a slot.
    fn connection_count(&self) -> usize;
}
