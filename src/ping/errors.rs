use std::io;

use thiserror::Error;

use crate::net::socket::SocketError;
use crate::net::ResolveError;

/// Failures that abort a whole ping session. Lost probes are not errors,
/// see [`super::probe::ProbeOutcome`].
#[derive(Debug, Error)]
pub enum PingError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("unable to set up SIGINT handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("unable to write output: {0}")]
    Io(#[from] io::Error),
}
