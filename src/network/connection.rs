//! Connection slot: one socket, its two rings and its reader thread.
//!
//! The reader thread does blocking reads into buffers it takes from a recycle
//! channel and hands every result to the tick thread over a bounded events
//! channel. The tick thread copies the bytes into the inbound ring and sends
//! the buffer back. Both channels and all read buffers belong to the slot and
//! outlive any single connection that passes through it.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use tracing::{debug, trace, warn};

use super::TickStats;
use crate::config::EngineConfig;
use crate::core::ByteRing;
use crate::error;

/// Lifecycle of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// In the free queue.
    Unused,
    /// Dial in flight.
    Connecting,
    Connected,
    /// The last read aged out or failed; resolved on the next tick.
    Timeout,
    /// Waiting for its grace deadline before release.
    Disconnect,
    /// Socket torn down, re-dial scheduled.
    Reconnect,
}

/// What to do when the link fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Discard the slot.
    Close,
    /// Re-dial to the same address, keeping the slot id.
    #[default]
    KeepAlive,
}

/// Result of one blocking read, as published by the reader thread.
pub(crate) enum ReadEvent {
    Data(Vec<u8>, usize),
    Closed,
    Failed(io::Error),
}

/// Why the inbound side stopped.
#[derive(Debug)]
pub(crate) enum ReadFailure {
    TimedOut,
    Closed,
    Error(io::Error),
}

impl ReadFailure {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Error(err),
        }
    }
}

/// Read buffer whose bytes did not all fit the inbound ring yet.
struct PendingChunk {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

/// One reusable unit of connection state.
pub struct ConnectionSlot<C> {
    id: usize,
    state: LinkState,
    mode: ConnectionMode,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    inbound: ByteRing,
    outbound: ByteRing,
    // Sisa panjang setiap frame yang belum terkirim, urut dari yang tertua
    frames: VecDeque<usize>,
    // Byte frame terdepan yang sudah terkirim
    head_sent: usize,
    cursor: C,
    disconnect_at: Option<Instant>,
    // Remembers that a capacity warning was already logged
    starved: bool,
    pending: Option<PendingChunk>,
    events_tx: Sender<ReadEvent>,
    events_rx: Receiver<ReadEvent>,
    recycle_tx: Sender<Vec<u8>>,
    recycle_rx: Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<C: Default> ConnectionSlot<C> {
    pub(crate) fn new(id: usize, config: &EngineConfig) -> Self {
        let chunks = config.read_chunks;
        // Satu tempat ekstra untuk event Closed/Failed terakhir
        let (events_tx, events_rx) = bounded(chunks + 1);
        let (recycle_tx, recycle_rx) = bounded(chunks);

        for _ in 0..chunks {
            let _ = recycle_tx.try_send(vec![0u8; config.read_chunk_size]);
        }

        Self {
            id,
            state: LinkState::Unused,
            mode: ConnectionMode::Close,
            stream: None,
            peer: None,
            inbound: ByteRing::with_capacity(config.ring_capacity()),
            outbound: ByteRing::with_capacity(config.ring_capacity()),
            frames: VecDeque::new(),
            head_sent: 0,
            cursor: C::default(),
            disconnect_at: None,
            starved: false,
            pending: None,
            events_tx,
            events_rx,
            recycle_tx,
            recycle_rx,
            stop: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    /// Takes ownership of a connected socket and starts its reader thread.
    ///
    /// `preface` is written before the reader starts, ahead of anything queued
    /// in the outbound ring.
    pub(crate) fn attach(
        &mut self,
        mut stream: TcpStream,
        peer: SocketAddr,
        config: &EngineConfig,
        preface: Option<&[u8]>,
    ) -> io::Result<()> {
        configure_stream(&stream, config)?;

        if let Some(bytes) = preface {
            stream.write_all(bytes)?;
        }

        let reader_stream = stream.try_clone()?;
        let events = self.events_tx.clone();
        let recycle_rx = self.recycle_rx.clone();
        let recycle_tx = self.recycle_tx.clone();
        let stop = Arc::clone(&self.stop);
        let id = self.id;

        self.stop.store(false, Ordering::Release);
        let handle = thread::Builder::new()
            .name(format!("tickwire-reader-{}", id))
            .spawn(move || read_loop(id, reader_stream, events, recycle_rx, recycle_tx, stop))?;

        self.stream = Some(stream);
        self.peer = Some(peer);
        self.reader = Some(handle);
        self.state = LinkState::Connected;
        self.disconnect_at = None;
        self.starved = false;
        Ok(())
    }

    /// Closes the socket and stops the reader, keeping the rings.
    ///
    /// The socket is shut down first so a reader blocked in `read` returns at
    /// once; the slot is only reusable after the reader has been joined.
    pub(crate) fn teardown(&mut self) {
        self.stop.store(true, Ordering::Release);

        // Hand every buffer back so a reader parked on the recycle channel wakes up
        if let Some(chunk) = self.pending.take() {
            let _ = self.recycle_tx.try_send(chunk.buf);
        }
        self.drain_events();

        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }

        if let Some(handle) = self.reader.take() {
            if handle.join().is_err() {
                warn!(conn = self.id, "reader thread panicked");
            }
        }

        // Results published between the first drain and the join
        self.drain_events();
    }

    /// Full release back to `Unused`.
    pub(crate) fn release(&mut self) {
        self.teardown();
        self.inbound.clear();
        self.outbound.clear();
        self.frames.clear();
        self.head_sent = 0;
        self.cursor = C::default();
        self.peer = None;
        self.disconnect_at = None;
        self.starved = false;
        self.state = LinkState::Unused;
    }

    /// Teardown for a re-dial: queued whole frames survive, inbound state does
    /// not. A frame the old socket only partly sent is dropped so the new
    /// socket starts on a frame boundary.
    pub(crate) fn reset_for_reconnect(&mut self) {
        self.teardown();
        self.inbound.clear();
        self.cursor = C::default();
        self.drop_partial_frame();
    }
}

impl<C> ConnectionSlot<C> {
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn state(&self) -> LinkState {
        self.state
    }

    #[inline]
    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    #[inline]
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: ConnectionMode) {
        self.mode = mode;
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_in_use(&self) -> bool {
        self.state != LinkState::Unused
    }

    /// Whether output may still be staged for this slot.
    pub(crate) fn accepts_output(&self) -> bool {
        self.state != LinkState::Unused
    }

    pub fn disconnect_deadline(&self) -> Option<Instant> {
        self.disconnect_at
    }

    pub fn inbound(&self) -> &ByteRing {
        &self.inbound
    }

    pub fn outbound(&self) -> &ByteRing {
        &self.outbound
    }

    /// Inbound ring and framing cursor, borrowed together for decoding.
    pub(crate) fn parts_mut(&mut self) -> (&mut C, &mut ByteRing) {
        (&mut self.cursor, &mut self.inbound)
    }

    /// Runs `encode` against the outbound ring and records what it added as
    /// one frame. Encoders either stage a whole frame or nothing.
    pub(crate) fn stage_with<F>(&mut self, encode: F) -> error::Result<()>
    where
        F: FnOnce(&mut C, &mut ByteRing) -> error::Result<()>,
    {
        let before = self.outbound.len();
        encode(&mut self.cursor, &mut self.outbound)?;
        let added = self.outbound.len().saturating_sub(before);
        if added > 0 {
            self.frames.push_back(added);
        }
        Ok(())
    }

    /// Staged frames not fully written yet.
    pub fn queued_frames(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn cursor(&self) -> &C {
        &self.cursor
    }

    /// Moves to `Disconnect`. Repeated calls never push the deadline out.
    pub(crate) fn begin_disconnect(&mut self, grace: Duration) {
        let deadline = Instant::now() + grace;
        self.disconnect_at = Some(match self.disconnect_at {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        });
        self.state = LinkState::Disconnect;
    }

    pub(crate) fn disconnect_expired(&self, now: Instant) -> bool {
        self.state == LinkState::Disconnect && self.disconnect_at.map_or(true, |at| at <= now)
    }

    /// Logs a capacity warning once per starvation episode.
    pub(crate) fn note_starved(&mut self, capacity: usize) {
        if !self.starved {
            warn!(conn = self.id, capacity, "no free work item, message stays buffered");
            self.starved = true;
        }
    }

    pub(crate) fn clear_starved(&mut self) {
        self.starved = false;
    }

    /// Moves every read result that has arrived into the inbound ring.
    ///
    /// Stops early, keeping the rest pending, once the ring is full.
    pub(crate) fn pump_reads(&mut self, stats: &mut TickStats) -> Result<(), ReadFailure> {
        if let Some(chunk) = self.pending.take() {
            if !self.absorb(chunk, stats) {
                return Ok(());
            }
        }

        loop {
            match self.events_rx.try_recv() {
                Ok(ReadEvent::Data(buf, n)) => {
                    let chunk = PendingChunk { buf, start: 0, end: n };
                    if !self.absorb(chunk, stats) {
                        return Ok(());
                    }
                }
                Ok(ReadEvent::Closed) => return Err(ReadFailure::Closed),
                Ok(ReadEvent::Failed(err)) => return Err(ReadFailure::from_io(err)),
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => return Err(ReadFailure::Closed),
            }
        }
    }

    /// Copies as much of `chunk` as fits. Returns false if some is left over.
    fn absorb(&mut self, mut chunk: PendingChunk, stats: &mut TickStats) -> bool {
        let fit = (chunk.end - chunk.start).min(self.inbound.remaining());
        if fit > 0 && self.inbound.write(&chunk.buf[chunk.start..chunk.start + fit]).is_ok() {
            chunk.start += fit;
            stats.bytes_in += fit as u64;
        }

        if chunk.start == chunk.end {
            let _ = self.recycle_tx.try_send(chunk.buf);
            true
        } else {
            trace!(conn = self.id, left = chunk.end - chunk.start, "inbound ring full");
            self.pending = Some(chunk);
            false
        }
    }

    /// Blocking write of the whole outbound ring.
    ///
    /// On failure the bytes the socket did take are still accounted against
    /// the frames they belong to.
    pub(crate) fn flush(&mut self) -> io::Result<usize> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(0);
        };
        let outcome = self.write_frames(&mut stream);
        self.stream = Some(stream);
        outcome
    }

    fn write_frames<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.outbound.is_empty() {
            return Ok(0);
        }
        let before = self.outbound.len();
        let outcome = self.outbound.write_to(writer);
        self.mark_sent(before - self.outbound.len());
        outcome
    }

    fn mark_sent(&mut self, sent: usize) {
        let mut sent = sent + self.head_sent;
        self.head_sent = 0;
        while let Some(&len) = self.frames.front() {
            if sent < len {
                self.head_sent = sent;
                return;
            }
            sent -= len;
            self.frames.pop_front();
        }
    }

    fn drop_partial_frame(&mut self) {
        if self.head_sent == 0 {
            return;
        }
        if let Some(len) = self.frames.pop_front() {
            let rest = (len - self.head_sent).min(self.outbound.len());
            if self.outbound.discard(rest).is_ok() {
                debug!(conn = self.id, dropped = rest, "partly sent frame dropped");
            }
        }
        self.head_sent = 0;
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            if let ReadEvent::Data(buf, _) = event {
                let _ = self.recycle_tx.try_send(buf);
            }
        }
    }
}

impl<C> Drop for ConnectionSlot<C> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(chunk) = self.pending.take() {
            let _ = self.recycle_tx.try_send(chunk.buf);
        }
        self.drain_events();
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

fn read_loop(
    id: usize,
    mut stream: TcpStream,
    events: Sender<ReadEvent>,
    recycle_rx: Receiver<Vec<u8>>,
    recycle_tx: Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) {
    trace!(conn = id, "reader started");

    while !stop.load(Ordering::Acquire) {
        // Blocks while the tick thread holds every buffer
        let mut buf = match recycle_rx.recv() {
            Ok(buf) => buf,
            Err(_) => break,
        };

        if stop.load(Ordering::Acquire) {
            let _ = recycle_tx.try_send(buf);
            break;
        }

        let outcome = loop {
            match stream.read(&mut buf) {
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match outcome {
            Ok(0) => {
                let _ = recycle_tx.try_send(buf);
                let _ = events.try_send(ReadEvent::Closed);
                break;
            }
            Ok(n) => {
                if events.try_send(ReadEvent::Data(buf, n)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = recycle_tx.try_send(buf);
                let _ = events.try_send(ReadEvent::Failed(e));
                break;
            }
        }
    }

    trace!(conn = id, "reader stopped");
}

/// Applies the per-socket options from `config`.
fn configure_stream(stream: &TcpStream, config: &EngineConfig) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(config.nodelay)?;
    stream.set_read_timeout(config.read_timeout)?;
    stream.set_write_timeout(config.write_timeout)?;

    #[cfg(unix)]
    {
        if let Some(size) = config.socket_buffer_size {
            set_buffer_sizes(stream, size);
        }
    }

    Ok(())
}

/// SO_SNDBUF / SO_RCVBUF. Failures are logged and ignored.
#[cfg(unix)]
fn set_buffer_sizes(stream: &TcpStream, size: usize) {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let optval = size.min(libc::c_int::MAX as usize) as libc::c_int;

    for option in [libc::SO_SNDBUF, libc::SO_RCVBUF] {
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                option,
                &optval as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            debug!(option, error = %io::Error::last_os_error(), "setsockopt failed");
        }
    }
}
