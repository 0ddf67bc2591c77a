//! Frame blaster
//!
//! Pushes Tcp0 frames at a fixed rate over a plain blocking socket and reads
//! the echoes back, then prints round-trip percentiles. Point it at
//! `tickwire_echo_server`.
//!
//! Usage:
//!   cargo run --release --example frame_blaster -- [options]
//!
//! Options:
//!   --frames <N>     Frames to send (default: 1000)
//!   --rate <N>       Frames per second (default: 100)
//!   --size <N>       Padding bytes per frame (default: 32)
//!   --host <addr>    Server address (default: 127.0.0.1:9999)

use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use tickwire::{PayloadDecoder, PayloadEncoder, Tcp0};

struct BlastConfig {
    host: String,
    frames: u32,
    rate: u32,
    size: usize,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:9999".to_string(),
            frames: 1000,
            rate: 100,
            size: 32,
        }
    }
}

/// Round-trip samples in nanoseconds
struct LatencyStats {
    samples: Vec<u64>,
    total_ns: u64,
}

impl LatencyStats {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            total_ns: 0,
        }
    }

    fn record(&mut self, latency: Duration) {
        let ns = latency.as_nanos() as u64;
        self.samples.push(ns);
        self.total_ns += ns;
    }

    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = ((sorted.len() as f64 * p / 100.0) as usize).min(sorted.len() - 1);
        sorted[idx]
    }

    fn print_report(&self) {
        if self.samples.is_empty() {
            println!("  No samples collected");
            return;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let us = |ns: u64| ns as f64 / 1000.0;

        println!("  Samples:  {}", sorted.len());
        println!("  Min:      {:.2} us", us(sorted[0]));
        println!("  Max:      {:.2} us", us(sorted[sorted.len() - 1]));
        println!("  Avg:      {:.2} us", us(self.total_ns / sorted.len() as u64));
        println!("  P50:      {:.2} us", us(Self::percentile(&sorted, 50.0)));
        println!("  P95:      {:.2} us", us(Self::percentile(&sorted, 95.0)));
        println!("  P99:      {:.2} us", us(Self::percentile(&sorted, 99.0)));
    }
}

/// Builds one framed request: sequence string plus lowercase padding.
fn build_frame(seq: u32, size: usize, wire: &mut Vec<u8>) -> tickwire::Result<()> {
    let mut payload = PayloadEncoder::with_capacity(size + 16);
    payload
        .put_str(&format!("blast {}", seq))?
        .put_str(&"x".repeat(size))?;
    wire.clear();
    Tcp0::frame_into(payload.as_bytes(), wire)
}

/// Reads one echoed frame and returns the sequence number it carries.
fn read_echo(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<Option<u32>> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let length = i32::from_le_bytes(header);
    if length < 0 {
        return Ok(None);
    }

    buf.resize(length as usize, 0);
    stream.read_exact(buf)?;

    let mut decoder = PayloadDecoder::from_slice(&buf[..]);
    let seq = decoder
        .get_string()
        .ok()
        .and_then(|text| text.strip_prefix("BLAST ")?.parse().ok());
    Ok(seq)
}

fn run_blast(config: &BlastConfig) -> std::io::Result<()> {
    println!("Tickwire frame blaster");
    println!("======================\n");
    println!("  Server:   {}", config.host);
    println!("  Frames:   {}", config.frames);
    println!("  Rate:     {} frames/sec", config.rate);
    println!("  Padding:  {} bytes\n", config.size);

    let mut stream = TcpStream::connect(&config.host)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;

    let interval = Duration::from_nanos(1_000_000_000u64 / config.rate.max(1) as u64);
    let mut stats = LatencyStats::new(config.frames as usize);
    let mut wire = Vec::with_capacity(config.size + 32);
    let mut buf = Vec::new();
    let mut mismatched = 0u32;

    let started = Instant::now();
    let mut next_send = Instant::now();

    for seq in 0..config.frames {
        let now = Instant::now();
        if now < next_send {
            thread::sleep(next_send - now);
        }
        next_send = Instant::now() + interval;

        build_frame(seq, config.size, &mut wire)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let sent_at = Instant::now();
        stream.write_all(&wire)?;

        match read_echo(&mut stream, &mut buf)? {
            Some(echoed) if echoed == seq => stats.record(sent_at.elapsed()),
            _ => mismatched += 1,
        }

        if (seq + 1) % 100 == 0 {
            print!("\r  Progress: {}/{}", seq + 1, config.frames);
            std::io::stdout().flush().ok();
        }
    }

    let elapsed = started.elapsed();
    println!("\n");
    println!("Results");
    println!("-------");
    println!("  Duration:    {:.2}s", elapsed.as_secs_f64());
    println!(
        "  Actual rate: {:.1} frames/sec",
        config.frames as f64 / elapsed.as_secs_f64()
    );
    println!("  Mismatched:  {}\n", mismatched);
    println!("Round trip:");
    stats.print_report();

    Ok(())
}

fn parse_args() -> BlastConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = BlastConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--frames" | "-n" => {
                if i + 1 < args.len() {
                    config.frames = args[i + 1].parse().unwrap_or(1000);
                    i += 1;
                }
            }
            "--rate" | "-r" => {
                if i + 1 < args.len() {
                    config.rate = args[i + 1].parse().unwrap_or(100);
                    i += 1;
                }
            }
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    config.size = args[i + 1].parse().unwrap_or(32);
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    config.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tickwire frame blaster\n");
                println!("Usage: frame_blaster [OPTIONS]\n");
                println!("Options:");
                println!("  -n, --frames <N>   Frames to send (default: 1000)");
                println!("  -r, --rate <N>     Frames per second (default: 100)");
                println!("  -s, --size <N>     Padding bytes per frame (default: 32)");
                println!("      --host <ADDR>  Server address (default: 127.0.0.1:9999)");
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn main() {
    let config = parse_args();

    if let Err(e) = run_blast(&config) {
        eprintln!("blast failed: {}", e);
        eprintln!("\nIs the echo server running?");
        eprintln!("   cargo run --release --bin tickwire_echo_server");
        std::process::exit(1);
    }
}
