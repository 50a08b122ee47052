//! Entry point for the dualping client.
//!
//! Parses CLI arguments and hands off to the library; this file owns only
//! process setup (logging, argument parsing, address resolution) and the
//! exit status.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::error;

use dualping::client::{Client, Config};
use dualping::logger::StdLogger;

/// Probe a dualping server over TCP and UDP and report loss and latency.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Server host name or ip address.
    #[arg(short, long)]
    server: String,

    /// Server port (TCP & UDP).
    #[arg(short, long)]
    port: u16,

    /// Probe interval in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,

    /// Probe timeout in milliseconds; must be at least the interval.
    #[arg(short, long, default_value_t = 10_000)]
    timeout: u64,

    /// Rolling statistics report file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Increase log verbosity.
    #[arg(short, long)]
    verbose: bool,
}

fn resolve(server: &str, port: u16) -> std::io::Result<SocketAddr> {
    (server, port).to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address found for {}", server),
        )
    })
}

fn main() {
    let cli = Cli::parse();

    StdLogger::init(cli.verbose);

    if cli.timeout < cli.interval {
        error!("probe timeout must be at least the probe interval");
        process::exit(1);
    }

    let server_addr = match resolve(&cli.server, cli.port) {
        Ok(addr) => addr,
        Err(err) => {
            error!("could not resolve {}: {}", cli.server, err);
            process::exit(1);
        }
    };

    let config = Config {
        server_addr,
        probe_interval_ms: cli.interval,
        probe_timeout_ms: cli.timeout,
        report_path: cli.output,
    };

    let mut client = match Client::new(config) {
        Ok(client) => client,
        Err(err) => {
            error!("could not create client: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = client.run() {
        error!("client terminated: {}", err);
        process::exit(1);
    }
}
