//! Entry point for the dualping server.
//!
//! Binds both transports on one port and echoes until a listener-level
//! fault; such a fault is fatal by design and exits the process.

use std::net::{IpAddr, SocketAddr};
use std::process;

use clap::Parser;
use log::error;

use dualping::logger::StdLogger;
use dualping::server::Server;

/// Echo dualping probes back to their sender over TCP and UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Listen ip address.
    #[arg(short, long, default_value = "0.0.0.0")]
    listen: String,

    /// Listen port (TCP & UDP).
    #[arg(short, long)]
    port: u16,

    /// Increase log verbosity.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    StdLogger::init(cli.verbose);

    let listen_ip = match cli.listen.parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(err) => {
            error!("invalid listen address {}: {}", cli.listen, err);
            process::exit(1);
        }
    };

    let mut server = match Server::bind(SocketAddr::new(listen_ip, cli.port)) {
        Ok(server) => server,
        Err(err) => {
            error!("could not bind server: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        error!("server terminated: {}", err);
        process::exit(1);
    }
}
