//! Kinetic Simulator Binary
//!
//! Runs an in-memory Kinetic drive on a TCP port.

use std::thread;
use std::time::Duration;

use clap::Parser;
use kinetic::{SimulatorConfig, Simulator};
use tracing_subscriber::{fmt, EnvFilter};

/// Kinetic drive simulator
#[derive(Parser, Debug)]
#[command(name = "kinetic-simulator")]
#[command(about = "In-memory Kinetic drive simulator")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8123")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Cluster version the drive starts at
    #[arg(short, long, default_value = "0")]
    cluster_version: i64,

    /// Drive capacity in MB
    #[arg(long, default_value = "4096")]
    capacity_mb: u64,

    /// Maximum operations per batch
    #[arg(long, default_value = "100")]
    max_batch_operations: usize,

    /// Serial number reported in the drive log
    #[arg(long, default_value = "SIM-0001")]
    serial_number: String,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kinetic=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("Kinetic Simulator v{}", kinetic::VERSION);
    tracing::info!("Listen address: {}", args.listen);
    tracing::info!("Cluster version: {}", args.cluster_version);

    let config = SimulatorConfig::builder()
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .cluster_version(args.cluster_version)
        .capacity_bytes(args.capacity_mb * 1024 * 1024)
        .max_batch_operations(args.max_batch_operations)
        .serial_number(&args.serial_number)
        .build();

    let simulator = match Simulator::start(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to start simulator: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Drive ready on {}", simulator.local_addr());

    // Serve until the process is killed
    while simulator.is_running() {
        thread::sleep(Duration::from_secs(1));
    }
}
