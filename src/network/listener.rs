//! Listener engine: accepts inbound connections and runs the accept-side tick.
//!
//! A dedicated acceptor thread waits on the listening socket with mio and
//! pushes every accepted stream onto a bounded channel. Everything else happens
//! in [`Listener::run_once`] on the caller's thread.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use mio::net::TcpListener as MioTcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, trace, warn};

use super::connection::{ConnectionMode, LinkState};
use super::pool::ConnectionPool;
use super::scan::{deliver, drive_slot, log_read_failure, stage};
use super::{Engine, TickStats};
use crate::config::EngineConfig;
use crate::core::{WorkHandler, WorkPool, WorkTarget};
use crate::error::{Error, Result};
use crate::protocol::{Protocol, Tcp0};

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const EVENTS_CAPACITY: usize = 128;

type ConnectedHook = Box<dyn FnMut(usize, SocketAddr)>;
type DisconnectedHook = Box<dyn FnMut(usize)>;

/// Accept-side engine
pub struct Listener<P: Protocol, H> {
    config: EngineConfig,
    protocol: P,
    handler: H,
    pool: ConnectionPool<P::Cursor>,
    works: WorkPool<P::Message>,
    accepted: Receiver<(TcpStream, SocketAddr)>,
    local_addr: SocketAddr,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
    // Di-drop terakhir: menghentikan acceptor thread
    _acceptor: Acceptor,
}

impl<H: WorkHandler<()>> Listener<Tcp0, H> {
    /// Length-prefix listener with the frame limit taken from `config`.
    pub fn tcp0<A: ToSocketAddrs>(addr: A, config: EngineConfig, handler: H) -> Result<Self> {
        let codec = Tcp0::from_config(&config);
        Self::bind(addr, config, codec, handler)
    }
}

impl<P, H> Listener<P, H>
where
    P: Protocol,
    H: WorkHandler<P::Message>,
{
    /// Binds `addr` and starts the acceptor thread.
    pub fn bind<A: ToSocketAddrs>(addr: A, config: EngineConfig, protocol: P, handler: H) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let (tx, accepted) = bounded(config.max_connections);
        let acceptor = Acceptor::spawn(listener, tx)?;

        info!(addr = %local_addr, max_connections = config.max_connections, "listening");

        Ok(Self {
            pool: ConnectionPool::new(&config),
            works: WorkPool::new(config.max_works),
            config,
            protocol,
            handler,
            accepted,
            local_addr,
            on_connected: None,
            on_disconnected: None,
            _acceptor: acceptor,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Called with the slot id and peer address of every accepted connection.
    pub fn on_connected<F>(&mut self, hook: F)
    where
        F: FnMut(usize, SocketAddr) + 'static,
    {
        self.on_connected = Some(Box::new(hook));
    }

    /// Called with the slot id when a connection is released.
    pub fn on_disconnected<F>(&mut self, hook: F)
    where
        F: FnMut(usize) + 'static,
    {
        self.on_disconnected = Some(Box::new(hook));
    }

    pub fn link_state(&self, conn: usize) -> Option<LinkState> {
        self.pool.get(conn).map(|slot| slot.state())
    }

    /// In-use slot ids in scan order.
    pub fn connections(&self) -> &[usize] {
        self.pool.active_ids()
    }

    pub fn peer_addr(&self, conn: usize) -> Option<SocketAddr> {
        self.pool.get(conn).and_then(|slot| slot.peer_addr())
    }

    /// One tick: intake, per-slot scan, disconnect sweep, work dispatch.
    pub fn run_once(&mut self) -> TickStats {
        let mut stats = TickStats::default();

        // === PHASE 1: Connection intake ===
        self.intake(&mut stats);

        let Self {
            config,
            protocol,
            handler,
            pool,
            works,
            on_disconnected,
            ..
        } = self;
        let grace = config.disconnect_grace;

        // === PHASE 2: Per-slot scan ===
        for index in 0..pool.active_len() {
            let id = pool.active_id(index);
            let Some(slot) = pool.get_mut(id) else {
                continue;
            };

            match slot.state() {
                LinkState::Connected => {
                    if let Err(failure) = slot.pump_reads(&mut stats) {
                        log_read_failure(id, &failure);
                        slot.begin_disconnect(grace);
                    }
                    if drive_slot(protocol, slot, works, &mut stats).is_err() {
                        slot.begin_disconnect(grace);
                    }
                }
                // Reply yang sudah antri tetap di-flush selama grace period
                LinkState::Disconnect => {
                    let _ = drive_slot(protocol, slot, works, &mut stats);
                }
                _ => {}
            }
        }

        // === PHASE 3: Disconnect sweep ===
        let released = pool.sweep(Instant::now());
        for &id in released {
            works.drop_connection(id);
            info!(conn = id, "connection released");
            if let Some(hook) = on_disconnected.as_mut() {
                hook(id);
            }
        }
        stats.released += released.len() as u64;

        // === PHASE 4: Work dispatch ===
        let dispatch = works.dispatch(handler, |item| deliver(protocol, pool, item));
        stats.dispatched += dispatch.handled as u64;

        if !stats.is_idle() {
            trace!(?stats, "listener tick");
        }
        stats
    }

    fn intake(&mut self, stats: &mut TickStats) {
        while let Ok((stream, peer)) = self.accepted.try_recv() {
            let Some(id) = self.pool.acquire() else {
                warn!(
                    addr = %peer,
                    capacity = self.pool.capacity(),
                    "connection pool exhausted, dropping connection"
                );
                continue;
            };

            let Some(slot) = self.pool.get_mut(id) else {
                continue;
            };
            slot.set_mode(ConnectionMode::Close);

            match slot.attach(stream, peer, &self.config, None) {
                Ok(()) => {
                    info!(conn = id, addr = %peer, "connection accepted");
                    stats.accepted += 1;
                    if let Some(hook) = self.on_connected.as_mut() {
                        hook(id, peer);
                    }
                }
                Err(err) => {
                    warn!(conn = id, addr = %peer, error = %err, "failed to set up connection");
                    slot.begin_disconnect(Duration::ZERO);
                }
            }
        }
    }

    /// Frames `payload` straight into the outbound ring of `conn`.
    pub fn write(&mut self, conn: usize, payload: &[u8]) -> Result<()> {
        stage(&self.protocol, &mut self.pool, conn, payload)
    }

    /// Queues `payload` for the oldest connected peer.
    pub fn send_any(&mut self, payload: &[u8]) -> Result<()> {
        self.works.stage_output(WorkTarget::Any, payload).map(|_| ())
    }

    /// Starts the grace period for `conn`.
    pub fn disconnect(&mut self, conn: usize) -> Result<()> {
        let slot = self
            .pool
            .in_use_mut(conn)
            .ok_or(Error::UnknownConnection(conn))?;
        debug!(conn, "disconnect requested");
        slot.begin_disconnect(self.config.disconnect_grace);
        Ok(())
    }
}

impl<P, H> Engine for Listener<P, H>
where
    P: Protocol,
    H: WorkHandler<P::Message>,
{
    fn run_once(&mut self) -> TickStats {
        Listener::run_once(self)
    }

    fn write(&mut self, conn: usize, payload: &[u8]) -> Result<()> {
        Listener::write(self, conn, payload)
    }

    fn send_any(&mut self, payload: &[u8]) -> Result<()> {
        Listener::send_any(self, payload)
    }

    fn disconnect(&mut self, conn: usize) -> Result<()> {
        Listener::disconnect(self, conn)
    }

    fn connection_count(&self) -> usize {
        self.pool.active_len()
    }
}

/// Acceptor thread handle. Dropping it wakes the poll and joins the thread.
struct Acceptor {
    waker: Waker,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Acceptor {
    fn spawn(listener: TcpListener, accepted: Sender<(TcpStream, SocketAddr)>) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let mut listener = MioTcpListener::from_std(listener);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name("tickwire-acceptor".to_string())
            .spawn(move || accept_loop(poll, listener, accepted, flag))?;

        Ok(Self {
            waker,
            shutdown,
            handle: Some(handle),
        })
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "failed to wake acceptor");
            return;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    mut poll: Poll,
    listener: MioTcpListener,
    accepted: Sender<(TcpStream, SocketAddr)>,
    shutdown: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    loop {
        if let Err(err) = poll.poll(&mut events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            error!(error = %err, "acceptor poll failed");
            return;
        }

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN && !accept_ready(&listener, &accepted) {
                return;
            }
        }

        if shutdown.load(Ordering::Acquire) {
            trace!("acceptor stopped");
            return;
        }
    }
}

/// Accept sampai backlog kosong. Return false kalau engine sudah tidak ada.
fn accept_ready(listener: &MioTcpListener, accepted: &Sender<(TcpStream, SocketAddr)>) -> bool {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => match accepted.try_send((into_std(stream), peer)) {
                Ok(()) => trace!(addr = %peer, "accepted"),
                Err(TrySendError::Full(_)) => {
                    warn!(addr = %peer, "intake queue full, dropping connection")
                }
                Err(TrySendError::Disconnected(_)) => return false,
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(error = %err, "accept failed");
                return true;
            }
        }
    }
}

/// Hands the accepted socket over to std; it is switched to blocking mode
/// when the slot attaches it.
fn into_std(stream: mio::net::TcpStream) -> TcpStream {
    #[cfg(unix)]
    {
        use std::os::unix::io::{FromRawFd, IntoRawFd};
        unsafe { TcpStream::from_raw_fd(stream.into_raw_fd()) }
    }

    #[cfg(windows)]
    {
        use std::os::windows::io::{FromRawSocket, IntoRawSocket};
        unsafe { TcpStream::from_raw_socket(stream.into_raw_socket()) }
    }
}
