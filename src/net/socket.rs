use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;

pub const RECV_BUFFER_SIZE: usize = 1024;

/// Shortest read timeout handed to the kernel. A zero `SO_RCVTIMEO` means
/// block forever, so sub-microsecond waits must not truncate to it.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("permission denied opening a raw ICMP socket, try again with elevated privileges (e.g. sudo)")]
    Privilege(#[source] io::Error),
    #[error("unable to open raw ICMP socket: {0}")]
    Open(#[source] io::Error),
    #[error("unable to configure raw ICMP socket: {0}")]
    Configure(#[source] io::Error),
}

/// Sends ICMP datagrams and reads whatever ICMP traffic comes back.
pub trait Transport {
    fn send_to(&mut self, buf: &[u8], dest: Ipv4Addr) -> io::Result<usize>;

    /// Blocks until a datagram arrives or `deadline` passes, returning
    /// `Ok(None)` in the latter case.
    fn recv_until(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<usize>>;

    fn set_ttl(&mut self, ttl: u32) -> io::Result<()>;
}

/// A raw IPv4 ICMP socket. Closed when dropped.
pub struct IcmpSocket {
    socket: Socket,
}

impl IcmpSocket {
    pub fn open(ttl: u32) -> Result<Self, SocketError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                SocketError::Privilege(e)
            } else {
                SocketError::Open(e)
            }
        })?;
        socket.set_ttl(ttl).map_err(SocketError::Configure)?;
        debug!(ttl, "opened raw ICMP socket");
        Ok(IcmpSocket { socket })
    }
}

impl Transport for IcmpSocket {
    fn send_to(&mut self, buf: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
        let addr = SocketAddrV4::new(dest, 0);
        self.socket.send_to(buf, &SockAddr::from(addr))
    }

    fn recv_until(&mut self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<usize>> {
        loop {
            // Recomputed on every wait so spurious wakeups never extend the budget.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            arm_read_timeout(&self.socket, remaining)?;
            match self.socket.read(buf) {
                Ok(n) => return Ok(Some(n)),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn set_ttl(&mut self, ttl: u32) -> io::Result<()> {
        self.socket.set_ttl(ttl)
    }
}

/// Arms `SO_RCVTIMEO` for a wait of `remaining`, which must be non-zero.
fn arm_read_timeout(socket: &Socket, remaining: Duration) -> io::Result<()> {
    socket.set_read_timeout(Some(remaining.max(MIN_READ_TIMEOUT)))
}

#[cfg(test)]
pub(crate) mod scripted {
    use std::collections::VecDeque;
    use std::io;
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::{Duration, Instant};

    use super::Transport;

    type Responder = Box<dyn FnOnce(&[u8]) -> Option<Vec<u8>>>;

    /// In-memory transport answering each receive with the next scripted
    /// responder, which sees the most recently sent packet. A responder
    /// returning `None`, or an exhausted script, behaves like an expired
    /// deadline.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub sent: Vec<(Vec<u8>, Ipv4Addr)>,
        pub ttls: Vec<u32>,
        send_delay: Duration,
        script: VecDeque<Responder>,
    }

    impl ScriptedTransport {
        pub fn then(mut self, responder: impl FnOnce(&[u8]) -> Option<Vec<u8>> + 'static) -> Self {
            self.script.push_back(Box::new(responder));
            self
        }

        /// Makes every send block for `delay` before returning.
        pub fn with_send_delay(mut self, delay: Duration) -> Self {
            self.send_delay = delay;
            self
        }
    }

    impl Transport for ScriptedTransport {
        fn send_to(&mut self, buf: &[u8], dest: Ipv4Addr) -> io::Result<usize> {
            thread::sleep(self.send_delay);
            self.sent.push((buf.to_vec(), dest));
            Ok(buf.len())
        }

        fn recv_until(&mut self, buf: &mut [u8], _deadline: Instant) -> io::Result<Option<usize>> {
            let last = self.sent.last().map(|(p, _)| p.clone()).unwrap_or_default();
            match self.script.pop_front().and_then(|respond| respond(&last)) {
                Some(reply) => {
                    let n = reply.len().min(buf.len());
                    buf[..n].copy_from_slice(&reply[..n]);
                    Ok(Some(n))
                }
                None => Ok(None),
            }
        }

        fn set_ttl(&mut self, ttl: u32) -> io::Result<()> {
            self.ttls.push(ttl);
            Ok(())
        }
    }
}
