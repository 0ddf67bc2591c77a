//! Many engines, one tick loop.
//!
//! Listeners are keyed by their port and dialers by a site name chosen by the
//! caller. Engines are stored type-erased so different protocols and handlers
//! can share one registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{Engine, TickStats};
use crate::error::{Error, Result};

/// Default length of one frame of [`Registry::run_frames`].
pub const DEFAULT_FRAME: Duration = Duration::from_millis(200);

#[derive(Default)]
pub struct Registry {
    listeners: BTreeMap<u16, Box<dyn Engine>>,
    dialers: BTreeMap<String, Box<dyn Engine>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener under `port`, replacing any earlier one.
    pub fn add_listener<E: Engine + 'static>(&mut self, port: u16, engine: E) {
        if self.listeners.insert(port, Box::new(engine)).is_some() {
            warn!(port, "listener replaced");
        }
    }

    /// Registers a dialer under `site`, replacing any earlier one.
    pub fn add_dialer<E: Engine + 'static>(&mut self, site: impl Into<String>, engine: E) {
        let site = site.into();
        if self.dialers.contains_key(&site) {
            warn!(site = %site, "dialer replaced");
        }
        self.dialers.insert(site, Box::new(engine));
    }

    pub fn listener_mut(&mut self, port: u16) -> Option<&mut (dyn Engine + 'static)> {
        self.listeners.get_mut(&port).map(|engine| engine.as_mut())
    }

    pub fn dialer_mut(&mut self, site: &str) -> Option<&mut (dyn Engine + 'static)> {
        self.dialers.get_mut(site).map(|engine| engine.as_mut())
    }

    pub fn len(&self) -> usize {
        self.listeners.len() + self.dialers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ticks every listener, then every dialer.
    pub fn run_once(&mut self) -> TickStats {
        let mut total = TickStats::default();
        for engine in self.listeners.values_mut() {
            total += engine.run_once();
        }
        for engine in self.dialers.values_mut() {
            total += engine.run_once();
        }
        total
    }

    /// Stages `payload` for connection `conn` of the listener on `port`.
    pub fn send_to_client(&mut self, port: u16, conn: usize, payload: &[u8]) -> Result<()> {
        self.listeners
            .get_mut(&port)
            .ok_or_else(|| Error::UnknownEngine(format!("listener :{}", port)))?
            .write(conn, payload)
    }

    /// Queues `payload` for whichever connection of `site` is up.
    pub fn send_to_server(&mut self, site: &str, payload: &[u8]) -> Result<()> {
        self.dialers
            .get_mut(site)
            .ok_or_else(|| Error::UnknownEngine(format!("dialer {}", site)))?
            .send_any(payload)
    }

    pub fn disconnect(&mut self, port: u16, conn: usize) -> Result<()> {
        self.listeners
            .get_mut(&port)
            .ok_or_else(|| Error::UnknownEngine(format!("listener :{}", port)))?
            .disconnect(conn)
    }

    /// Fixed-frame loop: tick, then sleep out the rest of `frame`, until `stop`
    /// is set. Returns the accumulated statistics.
    pub fn run_frames(&mut self, frame: Duration, stop: &AtomicBool) -> TickStats {
        info!(
            engines = self.len(),
            frame_ms = frame.as_millis() as u64,
            "frame loop started"
        );

        let mut total = TickStats::default();
        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();
            total += self.run_once();

            let spent = started.elapsed();
            match frame.checked_sub(spent) {
                Some(rest) => thread::sleep(rest),
                None => debug!(spent_ms = spent.as_millis() as u64, "frame overran"),
            }
        }

        info!(?total, "frame loop stopped");
        total
    }
}
