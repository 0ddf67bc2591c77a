//! Dialer engine: outbound connections with reconnect and heartbeat.
//!
//! Each dial is pinned to a slot id chosen up front. Connect attempts run on
//! short-lived connector threads and report back over a channel; the tick
//! thread attaches the socket to the slot it was dialled for. Keep-alive slots
//! survive link failures: the socket is torn down, queued output is kept, and
//! the same slot re-dials the same address after `reconnect_delay`.

use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, trace, warn};

use super::connection::{ConnectionMode, ConnectionSlot, LinkState};
use super::pool::ConnectionPool;
use super::scan::{deliver, drive_slot, log_read_failure, stage};
use super::{Engine, TickStats};
use crate::config::EngineConfig;
use crate::core::{ByteRing, WorkHandler, WorkPool, WorkTarget};
use crate::error::{Error, Result};
use crate::protocol::{Protocol, Tcp0};

type ConnectedHook = Box<dyn FnMut(usize, SocketAddr)>;
type DisconnectedHook = Box<dyn FnMut(usize)>;

/// Optional parts of a dial.
#[derive(Default)]
pub struct DialOptions {
    introduction: Option<Bytes>,
    heartbeat: Option<Bytes>,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload written as soon as each socket connects, ahead of queued output.
    pub fn introduction(mut self, payload: impl Into<Bytes>) -> Self {
        self.introduction = Some(payload.into());
        self
    }

    /// Payload staged every `heartbeat_interval` while connected.
    pub fn heartbeat(mut self, payload: impl Into<Bytes>) -> Self {
        self.heartbeat = Some(payload.into());
        self
    }

    /// Called every time the link comes up, including after a reconnect.
    pub fn on_connected<F>(mut self, hook: F) -> Self
    where
        F: FnMut(usize, SocketAddr) + 'static,
    {
        self.on_connected = Some(Box::new(hook));
        self
    }

    /// Called every time an established link goes down.
    pub fn on_disconnected<F>(mut self, hook: F) -> Self
    where
        F: FnMut(usize) + 'static,
    {
        self.on_disconnected = Some(Box::new(hook));
        self
    }
}

/// Per-slot dial state.
struct DialPlan {
    addr: SocketAddr,
    // Introduction, already framed by the protocol
    preface: Option<Vec<u8>>,
    heartbeat: Option<Bytes>,
    next_heartbeat: Instant,
    reconnect_at: Instant,
    // Id of the connect attempt in flight; other results are discarded
    attempt: u64,
    linked: bool,
    on_connected: Option<ConnectedHook>,
    on_disconnected: Option<DisconnectedHook>,
}

impl DialPlan {
    fn link_lost(&mut self, id: usize) {
        if std::mem::take(&mut self.linked) {
            if let Some(hook) = self.on_disconnected.as_mut() {
                hook(id);
            }
        }
    }
}

struct ConnectOutcome {
    id: usize,
    attempt: u64,
    result: io::Result<TcpStream>,
}

/// Connect-side engine
pub struct Dialer<P: Protocol, H> {
    config: EngineConfig,
    protocol: P,
    handler: H,
    pool: ConnectionPool<P::Cursor>,
    works: WorkPool<P::Message>,
    plans: Vec<Option<DialPlan>>,
    outcomes_tx: Sender<ConnectOutcome>,
    outcomes_rx: Receiver<ConnectOutcome>,
    // Attempt ids are unique across slots and dials
    next_attempt: u64,
    scratch: ByteRing,
}

impl<H: WorkHandler<()>> Dialer<Tcp0, H> {
    /// Length-prefix dialer with the frame limit taken from `config`.
    pub fn tcp0(config: EngineConfig, handler: H) -> Result<Self> {
        let codec = Tcp0::from_config(&config);
        Self::new(config, codec, handler)
    }
}

impl<P, H> Dialer<P, H>
where
    P: Protocol,
    H: WorkHandler<P::Message>,
{
    pub fn new(config: EngineConfig, protocol: P, handler: H) -> Result<Self> {
        config.validate()?;

        let (outcomes_tx, outcomes_rx) = bounded(config.max_connections);
        Ok(Self {
            pool: ConnectionPool::new(&config),
            works: WorkPool::new(config.max_works),
            plans: (0..config.max_connections).map(|_| None).collect(),
            scratch: ByteRing::with_capacity(config.ring_capacity()),
            next_attempt: 0,
            outcomes_tx,
            outcomes_rx,
            config,
            protocol,
            handler,
        })
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

    pub fn link_state(&self, conn: usize) -> Option<LinkState> {
        self.pool.get(conn).map(|slot| slot.state())
    }

    /// In-use slot ids in scan order.
    pub fn connections(&self) -> &[usize] {
        self.pool.active_ids()
    }

    /// Claims a slot for `addr` and starts connecting. Returns the slot id,
    /// which stays the same across reconnects.
    pub fn dial(&mut self, addr: SocketAddr, mode: ConnectionMode, options: DialOptions) -> Result<usize> {
        let preface = match options.introduction.as_deref() {
            Some(payload) => Some(self.frame(payload)?),
            None => None,
        };

        let id = self.pool.acquire().ok_or(Error::NoFreeConnection {
            capacity: self.pool.capacity(),
        })?;

        let now = Instant::now();
        let attempt = bump(&mut self.next_attempt);
        self.plans[id] = Some(DialPlan {
            addr,
            preface,
            heartbeat: options.heartbeat,
            next_heartbeat: now,
            reconnect_at: now,
            attempt,
            linked: false,
            on_connected: options.on_connected,
            on_disconnected: options.on_disconnected,
        });

        let slot = self.pool.get_mut(id).ok_or(Error::UnknownConnection(id))?;
        slot.set_mode(mode);
        slot.set_state(LinkState::Connecting);

        if let Err(err) = spawn_connect(id, attempt, addr, self.config.connect_timeout, &self.outcomes_tx) {
            slot.begin_disconnect(Duration::ZERO);
            return Err(err.into());
        }

        info!(conn = id, addr = %addr, ?mode, "dialing");
        Ok(id)
    }

    /// Runs one payload through the protocol's framing.
    fn frame(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.scratch.clear();
        let mut cursor = P::Cursor::default();
        self.protocol.encode(&mut cursor, payload, &mut self.scratch)?;
        let mut framed = vec![0u8; self.scratch.len()];
        self.scratch.read(&mut framed)?;
        Ok(framed)
    }

    /// One tick: connect results, per-slot scan, disconnect sweep, work dispatch.
    pub fn run_once(&mut self) -> TickStats {
        let mut stats = TickStats::default();

        // === PHASE 1: Connect results ===
        self.intake(&mut stats);

        let Self {
            config,
            protocol,
            handler,
            pool,
            works,
            plans,
            outcomes_tx,
            next_attempt,
            ..
        } = self;
        let now = Instant::now();

        // === PHASE 2: Per-slot scan ===
        for index in 0..pool.active_len() {
            let id = pool.active_id(index);
            let (Some(slot), Some(Some(plan))) = (pool.get_mut(id), plans.get_mut(id)) else {
                continue;
            };

            match slot.state() {
                LinkState::Connected => {
                    if let Err(failure) = slot.pump_reads(&mut stats) {
                        log_read_failure(id, &failure);
                        // Whatever arrived before the failure is still decoded
                        let _ = drive_slot(protocol, slot, works, &mut stats);
                        if slot.state() == LinkState::Connected {
                            slot.set_state(LinkState::Timeout);
                        }
                        continue;
                    }

                    if let Some(heartbeat) = plan.heartbeat.as_deref() {
                        if now >= plan.next_heartbeat {
                            match slot.stage_with(|cursor, outbound| {
                                protocol.encode(cursor, heartbeat, outbound)
                            }) {
                                Ok(()) => trace!(conn = id, "heartbeat staged"),
                                Err(err) => debug!(conn = id, error = %err, "heartbeat skipped"),
                            }
                            plan.next_heartbeat = now + config.heartbeat_interval;
                        }
                    }

                    if drive_slot(protocol, slot, works, &mut stats).is_err() {
                        slot.set_state(LinkState::Timeout);
                    }
                }
                LinkState::Timeout => match slot.mode() {
                    ConnectionMode::KeepAlive => {
                        slot.reset_for_reconnect();
                        slot.set_state(LinkState::Reconnect);
                        plan.reconnect_at = now + config.reconnect_delay;
                        plan.link_lost(id);
                        info!(
                            conn = id,
                            addr = %plan.addr,
                            delay_ms = config.reconnect_delay.as_millis() as u64,
                            "link lost, reconnect scheduled"
                        );
                    }
                    ConnectionMode::Close => slot.begin_disconnect(config.disconnect_grace),
                },
                LinkState::Reconnect if now >= plan.reconnect_at => {
                    plan.attempt = bump(next_attempt);
                    slot.set_state(LinkState::Connecting);
                    debug!(conn = id, attempt = plan.attempt, "re-dialing");
                    if let Err(err) =
                        spawn_connect(id, plan.attempt, plan.addr, config.connect_timeout, outcomes_tx)
                    {
                        warn!(conn = id, error = %err, "failed to start connect");
                        slot.set_state(LinkState::Reconnect);
                        plan.reconnect_at = now + config.reconnect_delay;
                    }
                }
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
            if let Some(mut plan) = plans[id].take() {
                plan.link_lost(id);
            }
            info!(conn = id, "connection released");
        }
        stats.released += released.len() as u64;

        // === PHASE 4: Work dispatch ===
        let dispatch = works.dispatch(handler, |item| deliver(protocol, pool, item));
        stats.dispatched += dispatch.handled as u64;

        if !stats.is_idle() {
            trace!(?stats, "dialer tick");
        }
        stats
    }

    fn intake(&mut self, stats: &mut TickStats) {
        while let Ok(outcome) = self.outcomes_rx.try_recv() {
            let ConnectOutcome { id, attempt, result } = outcome;

            let (Some(slot), Some(Some(plan))) = (self.pool.get_mut(id), self.plans.get_mut(id)) else {
                continue;
            };
            if plan.attempt != attempt || slot.state() != LinkState::Connecting {
                trace!(conn = id, attempt, "stale connect result discarded");
                continue;
            }

            let attached = result.and_then(|stream| {
                slot.attach(stream, plan.addr, &self.config, plan.preface.as_deref())
            });

            match attached {
                Ok(()) => {
                    info!(conn = id, addr = %plan.addr, "connected");
                    stats.accepted += 1;
                    plan.linked = true;
                    plan.next_heartbeat = Instant::now() + self.config.heartbeat_interval;
                    if let Some(hook) = plan.on_connected.as_mut() {
                        hook(id, plan.addr);
                    }
                }
                Err(err) => connect_failed(slot, plan, &self.config, err),
            }
        }
    }

    /// Frames `payload` into the outbound ring of `conn`. Works while the slot
    /// is still connecting or waiting to reconnect; the bytes go out once the
    /// link is up.
    pub fn write(&mut self, conn: usize, payload: &[u8]) -> Result<()> {
        stage(&self.protocol, &mut self.pool, conn, payload)
    }

    /// Queues `payload` for the oldest connected slot.
    pub fn send_any(&mut self, payload: &[u8]) -> Result<()> {
        self.works.stage_output(WorkTarget::Any, payload).map(|_| ())
    }

    /// Stops `conn` for good, whatever its mode.
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

fn connect_failed<C>(
    slot: &mut ConnectionSlot<C>,
    plan: &mut DialPlan,
    config: &EngineConfig,
    err: io::Error,
) {
    let id = slot.id();
    match slot.mode() {
        ConnectionMode::KeepAlive => {
            warn!(conn = id, addr = %plan.addr, error = %err, "connect failed, retrying");
            slot.set_state(LinkState::Reconnect);
            plan.reconnect_at = Instant::now() + config.reconnect_delay;
        }
        ConnectionMode::Close => {
            warn!(conn = id, addr = %plan.addr, error = %err, "connect failed");
            slot.begin_disconnect(Duration::ZERO);
        }
    }
}

fn bump(counter: &mut u64) -> u64 {
    *counter += 1;
    *counter
}

fn spawn_connect(
    id: usize,
    attempt: u64,
    addr: SocketAddr,
    timeout: Duration,
    outcomes: &Sender<ConnectOutcome>,
) -> io::Result<()> {
    let outcomes = outcomes.clone();
    thread::Builder::new()
        .name(format!("tickwire-dial-{}", id))
        .spawn(move || {
            let result = TcpStream::connect_timeout(&addr, timeout);
            let _ = outcomes.send(ConnectOutcome { id, attempt, result });
        })?;
    Ok(())
}

impl<P, H> Engine for Dialer<P, H>
where
    P: Protocol,
    H: WorkHandler<P::Message>,
{
    fn run_once(&mut self) -> TickStats {
        Dialer::run_once(self)
    }

    fn write(&mut self, conn: usize, payload: &[u8]) -> Result<()> {
        Dialer::write(self, conn, payload)
    }

    fn send_any(&mut self, payload: &[u8]) -> Result<()> {
        Dialer::send_any(self, payload)
    }

    fn disconnect(&mut self, conn: usize) -> Result<()> {
        Dialer::disconnect(self, conn)
    }

    fn connection_count(&self) -> usize {
        self.pool.active_len()
    }
}
