//! Network diagnostic tools: an ICMP ping, a traceroute, a static file web
//! server and a forwarding web proxy.

pub mod cli;
pub mod error;
pub mod net;
pub mod ping;
pub mod proxy;
pub mod traceroute;
pub mod web;

use cli::Command;
use ping::Pinger;

pub use error::{Error, Result};

/// Runs the selected tool to completion.
pub fn run(command: Command) -> Result<()> {
    match command {
        Command::Ping(args) => {
            Pinger::new(args.hostname.clone(), args.config()).ping()?;
        }
        Command::Traceroute(args) => traceroute::run(&args.hostname, args.config())?,
        Command::Web(args) => web::run(args.port, args.root)?,
        Command::Proxy(args) => proxy::run(args.port)?,
    }
    Ok(())
}
