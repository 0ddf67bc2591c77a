//! Tickwire - tick-driven TCP engine
//!
//! Architecture:
//! - One reader thread per connection doing blocking reads, one tick thread
//!   doing everything else (framing, work dispatch, writes).
//! - Fixed pools: connection slots, work items and read buffers are allocated
//!   once and recycled.
//! - Ring buffers per connection direction, bounds-checked.
//! - Pluggable framing: Tcp0 length prefix or an HTTP/1.1 subset.
//!
//! ```no_run
//! use tickwire::{EngineConfig, Listener, WorkItem};
//!
//! let mut server = Listener::tcp0("127.0.0.1:9000", EngineConfig::default(), |item: &mut WorkItem<()>| {
//!     let upper = item.payload().to_ascii_uppercase();
//!     item.reply(&upper);
//! })?;
//! loop {
//!     server.run_once();
//!     std::thread::sleep(std::time::Duration::from_millis(1));
//! }
//! # Ok::<(), tickwire::Error>(())
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::EngineConfig;
pub use core::{ByteRing, WorkHandler, WorkItem, WorkState, WorkTarget};
pub use error::{Error, Result};
pub use network::{
    ConnectionMode, DialOptions, Dialer, Engine, LinkState, Listener, Registry, TickStats,
};
pub use protocol::{PayloadDecoder, PayloadEncoder, Protocol, Tcp0};
