//! Per-slot steps shared by the listener and dialer ticks.

use std::io;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::connection::{ConnectionSlot, LinkState, ReadFailure};
use super::pool::ConnectionPool;
use super::TickStats;
use crate::core::{Delivery, WorkItem, WorkPool, WorkTarget};
use crate::error::{Error, Result};
use crate::protocol::Protocol;

pub(crate) fn log_read_failure(conn: usize, failure: &ReadFailure) {
    match failure {
        ReadFailure::TimedOut => debug!(conn, "read timed out"),
        ReadFailure::Closed => info!(conn, "peer closed connection"),
        ReadFailure::Error(err) => warn!(conn, error = %err, "read failed"),
    }
}

/// Decodes every complete message buffered on `slot` into new work items.
///
/// Stops when framing needs more bytes or the work pool is exhausted; in the
/// latter case the bytes stay in the ring until an item frees up.
pub(crate) fn decode_inbound<P: Protocol>(
    protocol: &P,
    slot: &mut ConnectionSlot<P::Cursor>,
    works: &mut WorkPool<P::Message>,
    stats: &mut TickStats,
) -> Result<()> {
    let capacity = works.capacity();

    loop {
        let Some(item) = works.next_free() else {
            if !slot.inbound().is_empty() {
                slot.note_starved(capacity);
            }
            return Ok(());
        };

        let (cursor, inbound) = slot.parts_mut();
        if !protocol.decode(cursor, inbound, item)? {
            return Ok(());
        }

        let work = works.claim_next(WorkTarget::Connection(slot.id()))?;
        slot.clear_starved();
        stats.decoded += 1;
        debug!(conn = slot.id(), work, "message decoded");
    }
}

/// Why a live slot stopped being usable during [`drive_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotFault {
    Framing,
    Write,
}

/// Runs decode then the blocking flush for one slot.
///
/// Faults are only reported for slots that are not already in `Disconnect`;
/// the caller picks the follow-up state. Once the protocol says the exchange
/// is over and the outbound ring is empty, the slot is released on the next
/// sweep.
pub(crate) fn drive_slot<P: Protocol>(
    protocol: &P,
    slot: &mut ConnectionSlot<P::Cursor>,
    works: &mut WorkPool<P::Message>,
    stats: &mut TickStats,
) -> std::result::Result<(), SlotFault> {
    let id = slot.id();
    let live = slot.state() != LinkState::Disconnect;

    if let Err(err) = decode_inbound(protocol, slot, works, stats) {
        let (_, inbound) = slot.parts_mut();
        inbound.clear();
        if live {
            warn!(conn = id, error = %err, "framing error");
            return Err(SlotFault::Framing);
        }
        return Ok(());
    }

    match slot.flush() {
        Ok(n) => stats.bytes_out += n as u64,
        Err(err) if live => {
            log_write_failure(id, &err);
            return Err(SlotFault::Write);
        }
        Err(_) => return Ok(()),
    }

    if protocol.should_close(slot.cursor(), slot.outbound()) {
        debug!(conn = id, "exchange complete, closing");
        slot.begin_disconnect(Duration::ZERO);
    }
    Ok(())
}

fn log_write_failure(conn: usize, err: &io::Error) {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            warn!(conn, "write timed out")
        }
        _ => warn!(conn, error = %err, "write failed"),
    }
}

/// Frames `payload` into the outbound ring of connection `conn`.
pub(crate) fn stage<P: Protocol>(
    protocol: &P,
    pool: &mut ConnectionPool<P::Cursor>,
    conn: usize,
    payload: &[u8],
) -> Result<()> {
    let slot = pool
        .in_use_mut(conn)
        .ok_or(Error::UnknownConnection(conn))?;
    slot.stage_with(|cursor, outbound| protocol.encode(cursor, payload, outbound))
}

/// Output step of the work dispatch.
pub(crate) fn deliver<P: Protocol>(
    protocol: &P,
    pool: &mut ConnectionPool<P::Cursor>,
    item: &mut WorkItem<P::Message>,
) -> Delivery {
    let conn = match item.target() {
        WorkTarget::Connection(conn) => conn,
        WorkTarget::Any => match pool.oldest_connected() {
            Some(conn) => conn,
            None => return Delivery::Pending,
        },
    };

    let Some(slot) = pool.in_use_mut(conn) else {
        debug!(conn, work = item.id(), "target connection gone, output dropped");
        return Delivery::Dropped;
    };
    if !slot.accepts_output() {
        return Delivery::Dropped;
    }

    let capacity = slot.outbound().capacity();
    match slot.stage_with(|cursor, outbound| protocol.encode(cursor, item.payload(), outbound)) {
        Ok(()) => Delivery::Staged,
        // Retried after the next flush frees space
        Err(Error::CapacityExceeded { needed, .. }) if needed <= capacity => Delivery::Pending,
        Err(err) => {
            warn!(conn, work = item.id(), error = %err, "output dropped");
            Delivery::Dropped
        }
    }
}
