use std::{error::Error, net::SocketAddr, sync::atomic::Ordering, time::Duration};

use ais140::protocol::{DEFAULT_WORKERS, TrackingServer, parse_downlink};
use clap::Parser;
use log::info;

const DEFAULT_DOWNLINK: [&str; 14] = [
    "SET PIP:example.com",
    "SET PPT:8011",
    "SET SIP:example.com",
    "SET SPT:8011",
    "SET EO",
    "SET ED:50",
    "SET APN:CMNET",
    "SET SL:120",
    "SET VN:666",
    "SET UR:10",
    "SET URE:20",
    "SET URH:5",
    "SET VID:ISTARTEK",
    "SET ODM:123",
];

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for devices at address
    #[arg(default_value = "0.0.0.0:31500")]
    address: SocketAddr,
    /// Number of concurrent device sessions
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,
    /// Command sent after an emergency record; repeat for several
    #[arg(long = "command")]
    commands: Vec<String>,
    /// Milliseconds between downlink commands
    #[arg(long, default_value_t = 1000)]
    interval: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let downlink = if cli.commands.is_empty() {
        parse_downlink(DEFAULT_DOWNLINK)?
    } else {
        parse_downlink(&cli.commands)?
    };

    let server = TrackingServer::bind(cli.address, cli.workers)?
        .with_downlink(downlink, Duration::from_millis(cli.interval));
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("interrupt received, stopping");
        shutdown.store(true, Ordering::SeqCst);
    })?;

    server.listen()?;
    Ok(())
}
