//! Tickwire echo client
//!
//! Keep-alive Tcp0 dialer that sends numbered frames to an echo server and
//! counts the replies. Survives server restarts through reconnect.
//!
//! Usage:
//!   cargo run --release --bin tickwire_echo_client -- --host 127.0.0.1:9999 --count 1000

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tickwire::{
    ConnectionMode, DialOptions, Dialer, EngineConfig, LinkState, PayloadDecoder, PayloadEncoder,
    WorkHandler, WorkItem,
};

/// Client configuration
struct ClientConfig {
    host: String,
    count: u64,
    interval_ms: u64,
    heartbeat: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:9999".to_string(),
            count: 100,
            interval_ms: 10,
            heartbeat: false,
        }
    }
}

/// Counts echoed frames and their round-trip times.
///
/// Frames carry only a string (`ping <seq>`) so the uppercasing echo leaves
/// the length prefix intact.
#[derive(Default)]
struct EchoTally {
    sent_at: Vec<Instant>,
    received: u64,
    rtt_sum: Duration,
    rtt_max: Duration,
}

impl EchoTally {
    fn record(&mut self, text: &str) -> Option<Duration> {
        let seq: usize = text.strip_prefix("PING ")?.parse().ok()?;
        let rtt = self.sent_at.get(seq)?.elapsed();
        self.received += 1;
        self.rtt_sum += rtt;
        self.rtt_max = self.rtt_max.max(rtt);
        Some(rtt)
    }
}

impl WorkHandler<()> for EchoTally {
    fn handle(&mut self, item: &mut WorkItem<()>) {
        let mut decoder = PayloadDecoder::from_slice(item.payload());
        // Heartbeat echoes are not PayloadEncoder frames
        if let Ok(text) = decoder.get_string() {
            if self.record(&text).is_none() {
                warn!(text = %text, "unexpected echo");
            }
        }
        item.finish();
    }
}

fn run_client(config: ClientConfig) -> tickwire::Result<()> {
    let addr: SocketAddr = config
        .host
        .parse()
        .map_err(|_| tickwire::Error::InvalidConfig("--host must be IP:PORT"))?;

    let engine_config = EngineConfig::default()
        .with_max_connections(1)
        .with_read_timeout(None);
    let mut dialer = Dialer::tcp0(engine_config, EchoTally::default())?;

    let mut options = DialOptions::new()
        .on_connected(|conn, peer| info!(conn, addr = %peer, "link up"))
        .on_disconnected(|conn| warn!(conn, "link down"));
    if config.heartbeat {
        options = options.heartbeat(&b"hb"[..]);
    }
    let conn = dialer.dial(addr, ConnectionMode::KeepAlive, options)?;

    let started = Instant::now();
    let interval = Duration::from_millis(config.interval_ms);
    let mut sent = 0u64;
    let mut next_send = started;
    let give_up = started + interval * config.count as u32 + Duration::from_secs(10);

    while dialer.handler().received < config.count && Instant::now() < give_up {
        // === PHASE 1: Produce ===
        if sent < config.count && Instant::now() >= next_send {
            let mut frame = PayloadEncoder::with_capacity(32);
            frame.put_str(&format!("ping {}", sent))?;
            // Queued even while the link is down
            match dialer.write(conn, frame.as_bytes()) {
                Ok(()) => {
                    dialer.handler_mut().sent_at.push(Instant::now());
                    sent += 1;
                }
                Err(e) => warn!(error = %e, "frame not queued"),
            }
            next_send += interval;
        }

        // === PHASE 2: Tick ===
        let stats = dialer.run_once();
        if stats.is_idle() {
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    let tally = dialer.handler();
    let avg = if tally.received > 0 {
        tally.rtt_sum / tally.received as u32
    } else {
        Duration::ZERO
    };
    info!(
        sent,
        received = tally.received,
        avg_rtt_us = avg.as_micros() as u64,
        max_rtt_us = tally.rtt_max.as_micros() as u64,
        state = ?dialer.link_state(conn).unwrap_or(LinkState::Unused),
        "done"
    );
    Ok(())
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                if i + 1 < args.len() {
                    config.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--count" | "-n" => {
                if i + 1 < args.len() {
                    config.count = args[i + 1].parse().unwrap_or(100);
                    i += 1;
                }
            }
            "--interval-ms" => {
                if i + 1 < args.len() {
                    config.interval_ms = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "--heartbeat" => {
                config.heartbeat = true;
            }
            "--help" | "-h" => {
                println!("Tickwire echo client\n");
                println!("Usage: tickwire_echo_client [OPTIONS]\n");
                println!("Options:");
                println!("      --host <ADDR>         Server address (default: 127.0.0.1:9999)");
                println!("  -n, --count <N>           Frames to send (default: 100)");
                println!("      --interval-ms <MS>    Pause between frames (default: 10)");
                println!("      --heartbeat           Send a heartbeat frame every second");
                println!("  -h, --help                Show this help");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = parse_args();

    if let Err(e) = run_client(config) {
        eprintln!("client error: {}", e);
        std::process::exit(1);
    }
}
