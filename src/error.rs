//! Error types shared by every layer of the engine.
//!
//! Transport failures on a live connection never surface here: the tick loop
//! turns them into lifecycle transitions. These errors come back from setup
//! calls (`bind`, `dial`, `write`, `disconnect`) and from buffer/framing code.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A write would overrun the fixed ring capacity.
    #[error("ring buffer capacity exceeded: need {needed} bytes, {available} available")]
    CapacityExceeded { needed: usize, available: usize },

    /// A read asked for more bytes than are buffered.
    #[error("buffer underflow: requested {requested} bytes, {available} available")]
    Underflow { requested: usize, available: usize },

    #[error("no free connection slot (pool capacity {capacity})")]
    NoFreeConnection { capacity: usize },

    #[error("no free work item (pool capacity {capacity})")]
    NoFreeWork { capacity: usize },

    #[error("no connection with id {0}")]
    UnknownConnection(usize),

    #[error("no engine registered under {0}")]
    UnknownEngine(String),

    /// Bytes on the wire that the active framing cannot accept.
    #[error("framing error: {0}")]
    Framing(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }
}
