//! Protocol layer: framing strategies that sit on top of the connection rings.
//!
//! A [`Protocol`] is picked when an engine is built and decides, from the bytes
//! buffered in a connection's inbound ring, when a whole application message
//! has arrived. It also stages outbound payloads into the outbound ring.
//!
//! - [`Tcp0`]: 4-byte little-endian `i32` length prefix, then the payload.
//! - [`http`]: HTTP/1.1 subset, one request and one response per connection.

pub mod http;
mod payload;
mod tcp0;

use crate::core::{ByteRing, WorkItem};
use crate::error::Result;

pub use payload::{PayloadDecoder, PayloadEncoder};
pub use tcp0::{Tcp0, Tcp0Cursor};

/// Framing strategy shared by every connection of one engine.
pub trait Protocol {
    /// Per-connection parse state.
    type Cursor: Default;
    /// Decoded form attached to work items next to the raw payload.
    type Message: Default;

    /// Decodes at most one message out of `inbound` into `item`.
    ///
    /// Returns `Ok(true)` when `item` now holds a complete message. Nothing is
    /// consumed for a stage whose bytes have not all arrived yet. An `Err`
    /// means the stream cannot be trusted any more.
    fn decode(
        &self,
        cursor: &mut Self::Cursor,
        inbound: &mut ByteRing,
        item: &mut WorkItem<Self::Message>,
    ) -> Result<bool>;

    /// Stages one outbound payload, fully or not at all.
    fn encode(&self, cursor: &mut Self::Cursor, payload: &[u8], outbound: &mut ByteRing)
        -> Result<()>;

    /// Whether the connection is finished once the outbound ring is flushed.
    fn should_close(&self, _cursor: &Self::Cursor, _outbound: &ByteRing) -> bool {
        false
    }
}
