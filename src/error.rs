use thiserror::Error;

use crate::ping::errors::PingError;
use crate::proxy::ProxyError;
use crate::traceroute::TraceError;
use crate::web::WebError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Ping(#[from] PingError),
    #[error(transparent)]
    Traceroute(#[from] TraceError),
    #[error(transparent)]
    Web(#[from] WebError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

pub type Result<T> = std::result::Result<T, Error>;
