//! Engine configuration.
//!
//! All capacities are fixed at construction: connection slots, work items and
//! the per-connection read buffers are allocated once and then recycled.

use std::time::Duration;

use crate::error::{Error, Result};

/// Size of the Tcp0 length header in bytes.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Tuning knobs shared by listener and dialer engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of pre-allocated connection slots.
    pub max_connections: usize,
    /// Number of pre-allocated work items.
    pub max_works: usize,
    /// Largest single socket read.
    pub read_chunk_size: usize,
    /// Read buffers per connection; also the bound of the read channel.
    pub read_chunks: usize,
    /// OS read timeout, re-armed by every read.
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    /// How long a connection lingers in Disconnect before it is released.
    pub disconnect_grace: Duration,
    /// Pause before a keep-alive dialer slot re-dials.
    pub reconnect_delay: Duration,
    /// Bound on a single outbound connect attempt.
    pub connect_timeout: Duration,
    /// Period of the dialer heartbeat frame.
    pub heartbeat_interval: Duration,
    /// Largest acceptable Tcp0 payload; `None` means "whatever fits the ring".
    pub max_frame_length: Option<usize>,
    /// SO_SNDBUF / SO_RCVBUF override (unix only).
    pub socket_buffer_size: Option<usize>,
    pub nodelay: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            max_works: 64,
            read_chunk_size: 4096,
            read_chunks: 32,
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            disconnect_grace: Duration::from_secs(2),
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            max_frame_length: None,
            socket_buffer_size: None,
            nodelay: true,
        }
    }
}

impl EngineConfig {
    /// Capacity of each direction's ring buffer.
    #[inline]
    pub fn ring_capacity(&self) -> usize {
        self.read_chunk_size * self.read_chunks
    }

    /// Effective Tcp0 payload limit.
    pub fn frame_limit(&self) -> usize {
        let fits = self.ring_capacity().saturating_sub(LENGTH_HEADER_SIZE);
        self.max_frame_length.map_or(fits, |limit| limit.min(fits))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max_connections must be non-zero"));
        }
        if self.max_works == 0 {
            return Err(Error::InvalidConfig("max_works must be non-zero"));
        }
        if self.read_chunk_size == 0 || self.read_chunks == 0 {
            return Err(Error::InvalidConfig("read buffers must be non-empty"));
        }
        if self.read_timeout == Some(Duration::ZERO) || self.write_timeout == Some(Duration::ZERO)
        {
            return Err(Error::InvalidConfig("socket timeouts must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::InvalidConfig("connect_timeout must be non-zero"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::InvalidConfig("heartbeat_interval must be non-zero"));
        }
        Ok(())
    }

    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn with_max_works(mut self, n: usize) -> Self {
        self.max_works = n;
        self
    }

    pub fn with_read_buffers(mut self, chunk_size: usize, chunks: usize) -> Self {
        self.read_chunk_size = chunk_size;
        self.read_chunks = chunks;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_max_frame_length(mut self, limit: usize) -> Self {
        self.max_frame_length = Some(limit);
        self
    }

    pub fn with_socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = Some(size);
        self
    }
}
