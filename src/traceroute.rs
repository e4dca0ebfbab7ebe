use std::fmt::Write as _;
use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::time::{Duration, Instant};

use clap::ValueEnum;
use thiserror::Error;
use tracing::{debug, trace};

use crate::net::icmp::{
    Datagram, EchoRequest, Header, DEST_UNREACHABLE4_TYPE, ECHO_REPLY4_TYPE, IPPROTO_ICMP,
    IPPROTO_UDP, PORT_UNREACHABLE4_CODE,
};
use crate::net::socket::{IcmpSocket, SocketError, Transport, RECV_BUFFER_SIZE};
use crate::net::{self, now_secs, ResolveError};

/// First destination port of UDP probes, as used by classic traceroute.
pub const UDP_BASE_PORT: u16 = 33434;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ProbeProtocol {
    #[default]
    Icmp,
    Udp,
}

#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("traceroute i/o failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub protocol: ProbeProtocol,
    pub timeout: Duration,
    pub max_hops: u8,
    pub queries: u8,
    /// Look up hop names with reverse DNS.
    pub resolve_names: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        TraceConfig {
            protocol: ProbeProtocol::Icmp,
            timeout: Duration::from_secs(2),
            max_hops: 30,
            queries: 3,
            resolve_names: true,
        }
    }
}

/// Identifies which probe a response belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeKey {
    Echo(u16),
    Port(u16),
}

/// A response to a single probe.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Answer {
    from: Ipv4Addr,
    rtt_ms: f64,
    reached: bool,
}

/// Resolves `target` and prints one line per hop until it answers.
pub fn run(target: &str, config: TraceConfig) -> Result<(), TraceError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "Traceroute to: {}...", target)?;

    let dest = net::resolve(target)?;
    let socket = IcmpSocket::open(1)?;
    let udp = match config.protocol {
        ProbeProtocol::Udp => Some(UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?),
        ProbeProtocol::Icmp => None,
    };
    let mut tracer = Tracer::new(socket, udp, config);
    tracer.trace(dest, &mut out)
}

pub struct Tracer<T> {
    transport: T,
    udp: Option<UdpSocket>,
    config: TraceConfig,
    ident_base: u16,
    probes_sent: u16,
}

impl<T: Transport> Tracer<T> {
    /// `udp` is the sending socket for [`ProbeProtocol::Udp`]; responses are
    /// always read from `transport`.
    pub fn new(transport: T, udp: Option<UdpSocket>, config: TraceConfig) -> Self {
        Tracer {
            transport,
            udp,
            config,
            ident_base: std::process::id() as u16,
            probes_sent: 0,
        }
    }

    pub fn trace<W: Write>(&mut self, dest: Ipv4Addr, out: &mut W) -> Result<(), TraceError> {
        for ttl in 1..=self.config.max_hops {
            let mut rtts = Vec::with_capacity(usize::from(self.config.queries));
            let mut from = None;
            let mut reached = false;

            for _ in 0..self.config.queries {
                match self.probe(dest, ttl)? {
                    Some(answer) => {
                        from.get_or_insert(answer.from);
                        reached |= answer.reached;
                        rtts.push(Some(answer.rtt_ms));
                    }
                    None => rtts.push(None),
                }
            }

            let hop = from.map(|addr| {
                let name = if self.config.resolve_names {
                    net::reverse_lookup(addr)
                } else {
                    addr.to_string()
                };
                (name, addr)
            });
            let line = format_hop(ttl, hop.as_ref().map(|(n, a)| (n.as_str(), *a)), &rtts);
            writeln!(out, "{}", line)?;

            if reached {
                debug!(ttl, "destination reached");
                break;
            }
        }
        Ok(())
    }

    fn probe(&mut self, dest: Ipv4Addr, ttl: u8) -> io::Result<Option<Answer>> {
        let n = self.probes_sent;
        self.probes_sent = self.probes_sent.wrapping_add(1);

        let key = match self.config.protocol {
            ProbeProtocol::Icmp => {
                let id = self.ident_base.wrapping_add(n);
                let packet = EchoRequest {
                    id,
                    seq: n.wrapping_add(1),
                    sent_at: now_secs(),
                }
                .encode();
                self.transport.set_ttl(u32::from(ttl))?;
                self.transport.send_to(&packet, dest)?;
                ProbeKey::Echo(id)
            }
            ProbeProtocol::Udp => {
                let port = UDP_BASE_PORT.wrapping_add(n);
                let udp = self.udp.as_ref().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotConnected, "no UDP socket for UDP probes")
                })?;
                udp.set_ttl(u32::from(ttl))?;
                udp.send_to(&[], SocketAddrV4::new(dest, port))?;
                ProbeKey::Port(port)
            }
        };
        trace!(ttl, ?key, "sent probe");

        let sent = Instant::now();
        let deadline = sent + self.config.timeout;
        let mut buf = [0u8; RECV_BUFFER_SIZE];
        loop {
            let Some(len) = self.transport.recv_until(&mut buf, deadline)? else {
                return Ok(None);
            };
            let Ok(datagram) = Datagram::decode(&buf[..len]) else {
                continue;
            };
            if let Some(reached) = classify(&datagram, key, dest) {
                return Ok(Some(Answer {
                    from: datagram.source,
                    rtt_ms: sent.elapsed().as_secs_f64() * 1000.0,
                    reached,
                }));
            }
        }
    }
}

/// Decides whether `datagram` answers the probe identified by `key`.
/// Returns `Some(true)` when it comes from the destination itself.
fn classify(datagram: &Datagram<'_>, key: ProbeKey, dest: Ipv4Addr) -> Option<bool> {
    let header = datagram.header;
    if let ProbeKey::Echo(id) = key {
        if header.typ == ECHO_REPLY4_TYPE {
            return (header.id == id).then_some(true);
        }
    }

    let quoted = datagram.quoted()?;
    if quoted.destination != dest {
        return None;
    }
    let matches = match key {
        ProbeKey::Echo(id) => {
            quoted.protocol == IPPROTO_ICMP
                && Header::decode(quoted.payload).is_ok_and(|h| h.id == id)
        }
        ProbeKey::Port(port) => {
            quoted.protocol == IPPROTO_UDP
                && quoted.payload.len() >= 4
                && u16::from_be_bytes([quoted.payload[2], quoted.payload[3]]) == port
        }
    };
    if !matches {
        return None;
    }
    Some(
        matches!(key, ProbeKey::Port(_))
            && header.typ == DEST_UNREACHABLE4_TYPE
            && header.code == PORT_UNREACHABLE4_CODE,
    )
}

/// Renders one hop: `"<ttl> <name> (<addr>) <latencies>"` when some probe
/// was answered, `"<ttl> <latencies>"` otherwise.
pub fn format_hop(ttl: u8, hop: Option<(&str, Ipv4Addr)>, rtts: &[Option<f64>]) -> String {
    let mut latencies = String::new();
    for rtt in rtts {
        match rtt {
            Some(ms) => {
                let _ = write!(latencies, "{} ms  ", round_ms(*ms));
            }
            None => latencies.push_str("* "),
        }
    }

    match hop {
        Some((name, addr)) if rtts.iter().any(Option::is_some) => {
            format!("{} {} ({}) {}", ttl, name, addr, latencies)
        }
        _ => format!("{} {}", ttl, latencies),
    }
}

/// Rounds to three decimals, keeping at least one.
fn round_ms(ms: f64) -> String {
    let rounded = (ms * 1000.0).round() / 1000.0;
    if rounded.fract() == 0.0 {
        format!("{:.1}", rounded)
    } else {
        format!("{}", rounded)
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use super::{classify, format_hop, ProbeKey, ProbeProtocol, TraceConfig, Tracer};
    use crate::net::checksum::write_checksum;
    use crate::net::icmp::{
        wrap_ipv4, Datagram, Header, DEST_UNREACHABLE4_TYPE, ECHO_REPLY4_TYPE, IPPROTO_ICMP,
        IPPROTO_UDP, IPV4_HEADER_SIZE, PORT_UNREACHABLE4_CODE, TIME_EXCEEDED4_TYPE,
    };
    use crate::net::socket::scripted::ScriptedTransport;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DEST: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 9);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 254);

    /// An ICMP error from `from` quoting `probe` (transport header onwards).
    fn icmp_error(from: Ipv4Addr, typ: u8, code: u8, protocol: u8, probe: &[u8]) -> Vec<u8> {
        let original = wrap_ipv4(LOCAL, DEST, 1, protocol, probe);
        let mut icmp = vec![0u8; 8];
        Header {
            typ,
            code,
            checksum: 0,
            id: 0,
            seq: 0,
        }
        .encode(&mut icmp);
        icmp.extend_from_slice(&original[..IPV4_HEADER_SIZE + 8]);
        write_checksum(&mut icmp, 2);
        wrap_ipv4(from, LOCAL, 250, IPPROTO_ICMP, &icmp)
    }

    fn echo_reply(request: &[u8]) -> Vec<u8> {
        let mut icmp = request.to_vec();
        icmp[0] = ECHO_REPLY4_TYPE;
        icmp[2] = 0;
        icmp[3] = 0;
        write_checksum(&mut icmp, 2);
        wrap_ipv4(DEST, LOCAL, 60, IPPROTO_ICMP, &icmp)
    }

    fn udp_header(dst_port: u16) -> Vec<u8> {
        let mut header = vec![0u8; 8];
        header[0..2].copy_from_slice(&40000u16.to_be_bytes());
        header[2..4].copy_from_slice(&dst_port.to_be_bytes());
        header[4..6].copy_from_slice(&8u16.to_be_bytes());
        header
    }

    #[test]
    fn format_hop_with_answers() {
        let line = format_hop(
            3,
            Some(("gw.example.net", ROUTER)),
            &[Some(1.23456), None, Some(2.0)],
        );
        assert_eq!(line, "3 gw.example.net (10.0.0.254) 1.235 ms  * 2.0 ms  ");
    }

    #[test]
    fn format_hop_without_answers() {
        assert_eq!(format_hop(7, None, &[None, None, None]), "7 * * * ");
    }

    #[test]
    fn classify_time_exceeded_for_echo() {
        let probe = super::EchoRequest {
            id: 77,
            seq: 1,
            sent_at: 0.0,
        }
        .encode();
        let raw = icmp_error(ROUTER, TIME_EXCEEDED4_TYPE, 0, IPPROTO_ICMP, &probe);
        let datagram = Datagram::decode(&raw).unwrap();
        assert_eq!(classify(&datagram, ProbeKey::Echo(77), DEST), Some(false));
        assert_eq!(classify(&datagram, ProbeKey::Echo(78), DEST), None);
        assert_eq!(
            classify(&datagram, ProbeKey::Echo(77), Ipv4Addr::new(1, 1, 1, 1)),
            None
        );
    }

    #[test]
    fn classify_port_unreachable_reaches_destination() {
        let raw = icmp_error(
            DEST,
            DEST_UNREACHABLE4_TYPE,
            PORT_UNREACHABLE4_CODE,
            IPPROTO_UDP,
            &udp_header(33435),
        );
        let datagram = Datagram::decode(&raw).unwrap();
        assert_eq!(classify(&datagram, ProbeKey::Port(33435), DEST), Some(true));
        assert_eq!(classify(&datagram, ProbeKey::Port(33434), DEST), None);
    }

    #[test]
    fn trace_over_icmp_stops_at_destination() {
        let transport = ScriptedTransport::default()
            // ttl 1: two answers from the router, one lost
            .then(|req| Some(icmp_error(ROUTER, TIME_EXCEEDED4_TYPE, 0, IPPROTO_ICMP, req)))
            .then(|_| None)
            .then(|req| Some(icmp_error(ROUTER, TIME_EXCEEDED4_TYPE, 0, IPPROTO_ICMP, req)))
            // ttl 2: the destination
            .then(|req| Some(echo_reply(req)))
            .then(|req| Some(echo_reply(req)))
            .then(|req| Some(echo_reply(req)));
        let config = TraceConfig {
            protocol: ProbeProtocol::Icmp,
            timeout: Duration::from_millis(10),
            resolve_names: false,
            ..TraceConfig::default()
        };
        let mut tracer = Tracer::new(transport, None, config);
        let mut out = Vec::new();
        tracer.trace(DEST, &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("1 10.0.0.254 (10.0.0.254) "));
        assert_eq!(lines[0].matches(" ms  ").count(), 2);
        assert!(lines[0].contains("* "));
        assert!(lines[1].starts_with("2 198.51.100.9 (198.51.100.9) "));
        assert_eq!(tracer.transport.ttls, vec![1, 1, 1, 2, 2, 2]);
    }
}
