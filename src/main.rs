use std::process::ExitCode;

use clap::Parser;
use netapps::cli::Cli;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cmd = std::env::args().next().unwrap_or_else(|| "netapps".to_string());
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = netapps::run(cli.into_command()) {
        eprintln!("{cmd}: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
