use std::fs;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

pub const REQUEST_BUFFER_SIZE: usize = 1024;

const OK_HEAD: &[u8] = b"HTTP/1.0 200 OK\n\n";
const NOT_FOUND: &[u8] = b"HTTP/1.0 404 NOT FOUND\n\nFile Not Found";
const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 BAD REQUEST\n\nBad Request";

#[derive(Debug, Error)]
pub enum WebError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("web server i/o failed: {0}")]
    Io(#[from] io::Error),
}

/// Serves files below `root` on every interface.
pub fn run(port: u16, root: PathBuf) -> Result<(), WebError> {
    println!("Web Server starting on port: {}...", port);
    let server = WebServer::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into(), root)?;
    println!("The server is ready to receive");
    server.serve()
}

pub struct WebServer {
    listener: TcpListener,
    root: Arc<PathBuf>,
}

impl WebServer {
    pub fn bind(addr: SocketAddr, root: PathBuf) -> Result<Self, WebError> {
        let listener = TcpListener::bind(addr).map_err(|source| WebError::Bind { addr, source })?;
        Ok(WebServer {
            listener,
            root: Arc::new(root),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, handing each to its own thread.
    pub fn serve(self) -> Result<(), WebError> {
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };
            let root = Arc::clone(&self.root);
            thread::spawn(move || {
                let peer = stream.peer_addr().ok();
                if let Err(err) = handle_connection(stream, &root) {
                    warn!(?peer, %err, "connection failed");
                }
            });
        }
        Ok(())
    }
}

/// Answers one request on `stream`. The stream is closed when this returns,
/// whichever way it returns.
pub fn handle_connection<S: Read + Write>(mut stream: S, root: &Path) -> io::Result<()> {
    let mut buf = [0u8; REQUEST_BUFFER_SIZE];
    let n = stream.read(&mut buf)?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let response = respond(&request, root);
    stream.write_all(&response)?;
    stream.flush()
}

fn respond(request: &str, root: &Path) -> Vec<u8> {
    let Some(path) = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
    else {
        return BAD_REQUEST.to_vec();
    };
    let path = if path == "/" { "/index.html" } else { path };
    debug!(path, "request");

    match read_document(root, path) {
        Some(content) => [OK_HEAD, content.as_slice()].concat(),
        None => NOT_FOUND.to_vec(),
    }
}

/// Reads `path` relative to `root`, refusing anything that would escape it.
fn read_document(root: &Path, path: &str) -> Option<Vec<u8>> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    fs::read(root.join(relative)).ok()
}
