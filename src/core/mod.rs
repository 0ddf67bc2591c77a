//! Core module: byte ring buffer and pooled work items.
//!
//! Keduanya dialokasi sekali saat engine dibuat, setelah itu hanya dipakai
//! oleh tick thread.

mod ring_buffer;
mod work;

pub use ring_buffer::{ByteRing, RingView};
pub use work::{
    Delivery, DispatchStats, WorkHandler, WorkItem, WorkPool, WorkState, WorkTarget,
};
