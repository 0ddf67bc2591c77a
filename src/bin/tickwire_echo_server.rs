//! Tickwire echo server
//!
//! Tcp0 listener that answers every frame with its payload uppercased, plus an
//! optional HTTP listener with a couple of routes.
//!
//! Usage:
//!   cargo run --release --bin tickwire_echo_server -- [OPTIONS]

use std::time::{Duration, Instant};

use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tickwire::protocol::http::HttpServer;
use tickwire::{EngineConfig, Listener, Registry, TickStats, WorkItem};

/// Konfigurasi server
struct ServerConfig {
    bind_addr: String,
    http_addr: Option<String>,
    max_connections: usize,
    frame_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9999".to_string(),
            http_addr: None,
            max_connections: 64,
            frame_ms: 1,
        }
    }
}

fn echo_upper(item: &mut WorkItem<()>) {
    let upper = item.payload().to_ascii_uppercase();
    item.reply(&upper);
}

fn run_server(config: ServerConfig) -> tickwire::Result<()> {
    let engine_config = EngineConfig::default().with_max_connections(config.max_connections);
    engine_config.validate()?;

    let mut registry = Registry::new();

    let echo = Listener::tcp0(config.bind_addr.as_str(), engine_config.clone(), echo_upper)?;
    info!(addr = %echo.local_addr(), "tcp0 echo listening");
    registry.add_listener(echo.local_addr().port(), echo);

    if let Some(addr) = config.http_addr.as_deref() {
        let mut http = HttpServer::http(addr, engine_config)?;
        let started = Instant::now();
        http.handler_mut()
            .get("/health", move |_, res| {
                let body = json!({ "status": "ok", "uptime_s": started.elapsed().as_secs() });
                if res.json(200, &body).is_err() {
                    res.status(500);
                }
            })
            .post("/echo", |req, res| {
                res.status(200);
                res.body = req.body.clone();
            });
        info!(addr = %http.local_addr(), "http listening");
        registry.add_listener(http.local_addr().port(), http);
    }

    let frame = Duration::from_millis(config.frame_ms);
    let mut window = TickStats::default();
    let mut last_report = Instant::now();

    loop {
        let started = Instant::now();

        // === PHASE 1: Tick every engine ===
        let stats = registry.run_once();
        window += stats;

        // === PHASE 2: Periodic report ===
        if last_report.elapsed() > Duration::from_secs(5) {
            info!(
                accepted = window.accepted,
                released = window.released,
                decoded = window.decoded,
                bytes_in = window.bytes_in,
                bytes_out = window.bytes_out,
                "server stats"
            );
            window = TickStats::default();
            last_report = Instant::now();
        }

        // === PHASE 3: Sleep sisa frame kalau idle ===
        if stats.is_idle() {
            if let Some(rest) = frame.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].clone();
                    i += 1;
                }
            }
            "--http" => {
                if i + 1 < args.len() {
                    config.http_addr = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--max-connections" | "-c" => {
                if i + 1 < args.len() {
                    config.max_connections = args[i + 1].parse().unwrap_or(64);
                    i += 1;
                }
            }
            "--frame-ms" => {
                if i + 1 < args.len() {
                    config.frame_ms = args[i + 1].parse().unwrap_or(1);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tickwire echo server\n");
                println!("Usage: tickwire_echo_server [OPTIONS]\n");
                println!("Options:");
                println!("  -b, --bind <ADDR>             Tcp0 bind address (default: 0.0.0.0:9999)");
                println!("      --http <ADDR>             Also serve HTTP on ADDR");
                println!("  -c, --max-connections <N>     Connection slots per listener (default: 64)");
                println!("      --frame-ms <MS>           Idle frame length (default: 1)");
                println!("  -h, --help                    Show this help");
                println!("\nLog level comes from RUST_LOG (default: info).");
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

    if let Err(e) = run_server(config) {
        eprintln!("server error: {}", e);
        std::process::exit(1);
    }
}
