use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::thread;

use thiserror::Error;
use tracing::{debug, warn};

pub const REQUEST_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_UPSTREAM_PORT: u16 = 80;

const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 BAD REQUEST\r\n\r\nBad Request";
const NOT_IMPLEMENTED: &[u8] = b"HTTP/1.0 501 NOT IMPLEMENTED\r\n\r\nNot Implemented";
const BAD_GATEWAY: &[u8] = b"HTTP/1.0 502 BAD GATEWAY\r\n\r\nBad Gateway";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("proxy i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
enum RequestError {
    #[error("malformed request line")]
    Malformed,
    #[error("unsupported target {0}")]
    Unsupported(String),
}

impl RequestError {
    fn response(&self) -> &'static [u8] {
        match self {
            RequestError::Malformed => BAD_REQUEST,
            RequestError::Unsupported(_) => NOT_IMPLEMENTED,
        }
    }
}

/// A client request aimed at an absolute `http://` URI. Only the head is
/// held here; the body is relayed as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ProxyRequest {
    method: String,
    host: String,
    port: u16,
    path: String,
    headers: Vec<String>,
    content_length: u64,
}

impl ProxyRequest {
    fn parse(head: &str) -> Result<Self, RequestError> {
        let mut lines = head.lines();

        let mut request_line = lines.next().unwrap_or_default().split_whitespace();
        let (Some(method), Some(uri), Some(_version)) =
            (request_line.next(), request_line.next(), request_line.next())
        else {
            return Err(RequestError::Malformed);
        };

        let rest = uri
            .strip_prefix("http://")
            .ok_or_else(|| RequestError::Unsupported(uri.to_string()))?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| RequestError::Malformed)?,
            ),
            None => (authority, DEFAULT_UPSTREAM_PORT),
        };
        if host.is_empty() {
            return Err(RequestError::Malformed);
        }

        let mut content_length = 0;
        let mut headers = Vec::new();
        for line in lines.filter(|line| !line.is_empty()) {
            let (name, value) = line.split_once(':').unwrap_or((line, ""));
            let name = name.trim();
            if name.eq_ignore_ascii_case("connection")
                || name.eq_ignore_ascii_case("proxy-connection")
            {
                continue;
            }
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().map_err(|_| RequestError::Malformed)?;
            }
            headers.push(line.to_string());
        }

        Ok(ProxyRequest {
            method: method.to_string(),
            host: host.to_string(),
            port,
            path: path.to_string(),
            headers,
            content_length,
        })
    }

    /// The request head as sent to the origin server.
    fn forward(&self) -> String {
        let mut out = format!("{} {} HTTP/1.0\r\n", self.method, self.path);
        let has_host = self
            .headers
            .iter()
            .any(|h| h.split(':').next().is_some_and(|n| n.trim().eq_ignore_ascii_case("host")));
        if !has_host {
            out.push_str(&format!("Host: {}\r\n", self.host));
        }
        for header in &self.headers {
            out.push_str(header);
            out.push_str("\r\n");
        }
        out.push_str("Connection: close\r\n\r\n");
        out
    }
}

/// Offset of the blank line ending a request head, and of the body after it.
fn head_end(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Reads from `client` until the request head is complete. Returns the head
/// and whatever body bytes arrived with it. A head larger than
/// [`REQUEST_BUFFER_SIZE`] or cut short by EOF is returned as read.
fn read_head<R: Read>(client: &mut R) -> io::Result<(String, Vec<u8>)> {
    let mut received = Vec::new();
    let mut buf = [0u8; REQUEST_BUFFER_SIZE];
    loop {
        if let Some((end, body)) = head_end(&received) {
            let rest = received.split_off(body);
            received.truncate(end);
            return Ok((String::from_utf8_lossy(&received).into_owned(), rest));
        }
        if received.len() >= REQUEST_BUFFER_SIZE {
            break;
        }
        let n = client.read(&mut buf)?;
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    Ok((String::from_utf8_lossy(&received).into_owned(), Vec::new()))
}

/// Relays `http://` requests to their origin servers.
pub fn run(port: u16) -> Result<(), ProxyError> {
    println!("Web Proxy starting on port: {}...", port);
    let proxy = Proxy::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    proxy.serve()
}

pub struct Proxy {
    listener: TcpListener,
}

impl Proxy {
    pub fn bind(addr: SocketAddr) -> Result<Self, ProxyError> {
        let listener = TcpListener::bind(addr).map_err(|source| ProxyError::Bind { addr, source })?;
        Ok(Proxy { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, one worker thread each.
    pub fn serve(self) -> Result<(), ProxyError> {
        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    thread::spawn(move || {
                        if let Err(err) = handle_connection(stream) {
                            warn!(%err, "proxied connection failed");
                        }
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
        Ok(())
    }
}

pub fn handle_connection(mut client: TcpStream) -> io::Result<()> {
    let (head, mut body) = read_head(&mut client)?;

    let request = match ProxyRequest::parse(&head) {
        Ok(request) => request,
        Err(err) => {
            debug!(%err, "rejecting request");
            return client.write_all(err.response());
        }
    };
    debug!(method = %request.method, host = %request.host, port = request.port, path = %request.path, "forwarding");

    let mut upstream = match TcpStream::connect((request.host.as_str(), request.port)) {
        Ok(upstream) => upstream,
        Err(err) => {
            warn!(host = %request.host, %err, "upstream unreachable");
            return client.write_all(BAD_GATEWAY);
        }
    };
    upstream.write_all(request.forward().as_bytes())?;

    // Bytes past the declared body are dropped.
    body.truncate(usize::try_from(request.content_length).unwrap_or(usize::MAX));
    upstream.write_all(&body)?;
    let outstanding = request.content_length.saturating_sub(body.len() as u64);
    if outstanding > 0 {
        io::copy(&mut Read::by_ref(&mut client).take(outstanding), &mut upstream)?;
    }

    io::copy(&mut upstream, &mut client)?;
    client.flush()
}
