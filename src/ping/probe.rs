use std::io;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use clap::ValueEnum;
use tracing::{debug, trace};

use crate::net::icmp::{Datagram, EchoRequest, ECHO_REPLY4_TYPE};
use crate::net::now_secs;
use crate::net::socket::{Transport, RECV_BUFFER_SIZE};

/// What to do with an echo reply carrying someone else's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MismatchPolicy {
    /// Skip it and keep waiting for our reply until the deadline.
    #[default]
    Wait,
    /// Give up on the probe immediately.
    Return,
}

/// A decoded echo reply that belongs to the outstanding probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EchoReply {
    pub id: u16,
    pub seq: u16,
    pub ttl: u8,
    pub received_at: f64,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProbeOutcome {
    Success {
        rtt_ms: f64,
        ttl: u8,
        size: u32,
        seq: u16,
    },
    Timeout,
    IdentifierMismatch,
    /// A datagram arrived that could not be decoded.
    Malformed,
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}

/// One echo round trip.
pub trait Probe {
    fn probe(
        &mut self,
        dest: Ipv4Addr,
        id: u16,
        seq: u16,
        timeout: Duration,
    ) -> io::Result<ProbeOutcome>;
}

pub struct ProbeEngine<T> {
    transport: T,
    on_mismatch: MismatchPolicy,
}

impl<T: Transport> ProbeEngine<T> {
    pub fn new(transport: T, on_mismatch: MismatchPolicy) -> Self {
        ProbeEngine {
            transport,
            on_mismatch,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends a single echo request and waits up to `timeout` for its reply.
    ///
    /// Only echo replies are considered. Anything else arriving on the raw
    /// socket, our own requests looped back on localhost included, is skipped.
    pub fn probe_once(
        &mut self,
        dest: Ipv4Addr,
        id: u16,
        seq: u16,
        timeout: Duration,
    ) -> io::Result<ProbeOutcome> {
        let packet = EchoRequest {
            id,
            seq,
            sent_at: now_secs(),
        }
        .encode();
        self.transport.send_to(&packet, dest)?;
        let sent_at = now_secs();
        trace!(%dest, id, seq, "sent echo request");

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let Some(len) = self.transport.recv_until(&mut buf, deadline)? else {
                return Ok(ProbeOutcome::Timeout);
            };
            let received_at = now_secs();

            let datagram = match Datagram::decode(&buf[..len]) {
                Ok(datagram) => datagram,
                Err(err) => {
                    debug!(%err, "dropping undecodable datagram");
                    match self.on_mismatch {
                        MismatchPolicy::Return => return Ok(ProbeOutcome::Malformed),
                        MismatchPolicy::Wait => continue,
                    }
                }
            };
            if datagram.header.typ != ECHO_REPLY4_TYPE {
                trace!(typ = datagram.header.typ, "skipping non echo reply");
                continue;
            }
            if datagram.header.id != id {
                debug!(
                    expected = id,
                    got = datagram.header.id,
                    "echo reply identifier does not match"
                );
                match self.on_mismatch {
                    MismatchPolicy::Return => return Ok(ProbeOutcome::IdentifierMismatch),
                    MismatchPolicy::Wait => continue,
                }
            }

            let reply = EchoReply {
                id: datagram.header.id,
                seq: datagram.header.seq,
                ttl: datagram.ttl,
                received_at,
                len: datagram.len as u32,
            };
            return Ok(ProbeOutcome::Success {
                rtt_ms: (reply.received_at - sent_at) * 1000.0,
                ttl: reply.ttl,
                size: reply.len,
                seq: reply.seq,
            });
        }
    }
}

impl<T: Transport> Probe for ProbeEngine<T> {
    fn probe(
        &mut self,
        dest: Ipv4Addr,
        id: u16,
        seq: u16,
        timeout: Duration,
    ) -> io::Result<ProbeOutcome> {
        self.probe_once(dest, id, seq, timeout)
    }
}
