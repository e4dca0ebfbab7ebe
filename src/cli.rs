use std::path::PathBuf;
use std::time::Duration;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

use crate::ping::probe::MismatchPolicy;
use crate::ping::{PingConfig, DEFAULT_TTL};
use crate::traceroute::{ProbeProtocol, TraceConfig};

/// Host pinged when no subcommand is given.
pub const DEFAULT_HOST: &str = "lancaster.ac.uk";
pub const DEFAULT_COUNT: u32 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "netapps",
    version,
    about = "A collection of network applications: ping, traceroute, a web server and a web proxy."
)]
pub struct Cli {
    /// More diagnostics on stderr (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The selected subcommand, falling back to pinging [`DEFAULT_HOST`].
    pub fn into_command(self) -> Command {
        self.command
            .unwrap_or_else(|| Command::Ping(PingArgs::new(DEFAULT_HOST.to_string())))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run ping
    #[command(visible_alias = "p")]
    Ping(PingArgs),
    /// Run traceroute
    #[command(visible_alias = "t")]
    Traceroute(TracerouteArgs),
    /// Run web server
    #[command(visible_alias = "w")]
    Web(WebArgs),
    /// Run proxy
    #[command(visible_alias = "x")]
    Proxy(ProxyArgs),
}

#[derive(Debug, Args)]
pub struct PingArgs {
    /// Host to ping towards
    pub hostname: String,

    /// Number of times to ping the host before stopping
    #[arg(short, long, default_value_t = DEFAULT_COUNT, value_parser = value_parser!(u32).range(1..))]
    pub count: u32,

    /// Maximum timeout in seconds before considering a request lost
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Seconds to wait between probes
    #[arg(short, long, default_value = "1", value_parser = parse_seconds)]
    pub interval: Duration,

    /// IP time to live of outgoing requests
    #[arg(long, default_value_t = DEFAULT_TTL, value_parser = value_parser!(u32).range(1..=255))]
    pub ttl: u32,

    /// What to do when a reply with another identifier arrives
    #[arg(long, value_enum, default_value_t = MismatchPolicy::Wait)]
    pub on_mismatch: MismatchPolicy,
}

impl PingArgs {
    pub fn new(hostname: String) -> Self {
        let config = PingConfig::default();
        PingArgs {
            hostname,
            count: config.count,
            timeout: config.timeout.as_secs(),
            interval: config.interval,
            ttl: config.ttl,
            on_mismatch: config.on_mismatch,
        }
    }

    pub fn config(&self) -> PingConfig {
        PingConfig {
            count: self.count,
            timeout: Duration::from_secs(self.timeout),
            interval: self.interval,
            ttl: self.ttl,
            on_mismatch: self.on_mismatch,
        }
    }
}

#[derive(Debug, Args)]
pub struct TracerouteArgs {
    /// Host to traceroute towards
    pub hostname: String,

    /// Maximum timeout in seconds before considering a request lost
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS, value_parser = value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Protocol to send requests with
    #[arg(short, long, value_enum, default_value_t = ProbeProtocol::Icmp)]
    pub protocol: ProbeProtocol,

    /// Give up after this many hops
    #[arg(short, long, default_value_t = 30, value_parser = value_parser!(u8).range(1..))]
    pub max_hops: u8,

    /// Probes sent per hop
    #[arg(short, long, default_value_t = 3, value_parser = value_parser!(u8).range(1..))]
    pub queries: u8,

    /// Print hop addresses without reverse DNS lookups
    #[arg(short, long)]
    pub numeric: bool,
}

impl TracerouteArgs {
    pub fn config(&self) -> TraceConfig {
        TraceConfig {
            protocol: self.protocol,
            timeout: Duration::from_secs(self.timeout),
            max_hops: self.max_hops,
            queries: self.queries,
            resolve_names: !self.numeric,
        }
    }
}

#[derive(Debug, Args)]
pub struct WebArgs {
    /// Port number to start the web server listening on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Directory files are served from
    #[arg(short, long, env = "NETAPPS_WEB_ROOT", default_value = "htdocs")]
    pub root: PathBuf,
}

#[derive(Debug, Args)]
pub struct ProxyArgs {
    /// Port number to start the proxy listening on
    #[arg(short, long, env = "NETAPPS_PROXY_PORT", default_value_t = 8000)]
    pub port: u16,
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}
