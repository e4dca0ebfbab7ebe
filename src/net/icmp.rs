use std::net::Ipv4Addr;

use thiserror::Error;

use super::checksum::write_checksum;

pub const ECHO_REPLY4_TYPE: u8 = 0;
pub const ECHO_REQUEST4_TYPE: u8 = 8;
pub const ECHO_REQUEST4_CODE: u8 = 0;
pub const DEST_UNREACHABLE4_TYPE: u8 = 3;
pub const PORT_UNREACHABLE4_CODE: u8 = 3;
pub const TIME_EXCEEDED4_TYPE: u8 = 11;

pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_UDP: u8 = 17;

pub const HEADER_SIZE: usize = 8;
pub const TIMESTAMP_SIZE: usize = 8;
pub const PACKET_SIZE: usize = HEADER_SIZE + TIMESTAMP_SIZE;

/// Size of an IPv4 header without options.
pub const IPV4_HEADER_SIZE: usize = 20;

const IPV4_TTL_OFFSET: usize = 8;
const IPV4_PROTOCOL_OFFSET: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram too short ({len} bytes)")]
    Truncated { len: usize },
    #[error("invalid IPv4 header length {0}")]
    BadHeaderLength(u8),
}

/// The fixed eight byte ICMP header shared by echo and error messages.
///
/// ```text
/// offset 0: type     offset 1: code     offset 2..4: checksum
/// offset 4..6: identifier               offset 6..8: sequence
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub typ: u8,
    pub code: u8,
    pub checksum: u16,
    pub id: u16,
    pub seq: u16,
}

impl Header {
    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.typ;
        buf[1] = self.code;
        buf[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        buf[4..6].copy_from_slice(&self.id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.seq.to_be_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated { len: buf.len() });
        }
        Ok(Header {
            typ: buf[0],
            code: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
            id: u16::from_be_bytes([buf[4], buf[5]]),
            seq: u16::from_be_bytes([buf[6], buf[7]]),
        })
    }
}

/// An ICMPv4 echo request carrying its send time as payload.
#[derive(Debug, Clone, Copy)]
pub struct EchoRequest {
    pub id: u16,
    pub seq: u16,
    /// Seconds since the Unix epoch.
    pub sent_at: f64,
}

impl EchoRequest {
    pub fn encode(&self) -> [u8; PACKET_SIZE] {
        let mut buf = [0u8; PACKET_SIZE];
        let header = Header {
            typ: ECHO_REQUEST4_TYPE,
            code: ECHO_REQUEST4_CODE,
            checksum: 0,
            id: self.id,
            seq: self.seq,
        };
        header.encode(&mut buf);
        buf[HEADER_SIZE..].copy_from_slice(&self.sent_at.to_ne_bytes());

        write_checksum(&mut buf, 2);
        buf
    }
}

/// Reads a timestamp written by [`EchoRequest::encode`] back out of an
/// echo payload.
#[cfg(test)]
pub(crate) fn decode_timestamp(payload: &[u8]) -> Option<f64> {
    let bytes: [u8; TIMESTAMP_SIZE] = payload.get(..TIMESTAMP_SIZE)?.try_into().ok()?;
    Some(f64::from_ne_bytes(bytes))
}

/// An ICMP message as read from a raw IPv4 socket, IP header included.
#[derive(Debug)]
pub struct Datagram<'a> {
    pub source: Ipv4Addr,
    pub ttl: u8,
    pub header: Header,
    /// Everything after the ICMP header.
    pub body: &'a [u8],
    /// Length of the whole datagram.
    pub len: usize,
}

impl<'a> Datagram<'a> {
    pub fn decode(buf: &'a [u8]) -> Result<Self, DecodeError> {
        if buf.len() < IPV4_HEADER_SIZE + HEADER_SIZE {
            return Err(DecodeError::Truncated { len: buf.len() });
        }
        let ihl = buf[0] & 0x0f;
        let ip_len = usize::from(ihl) * 4;
        if ip_len < IPV4_HEADER_SIZE {
            return Err(DecodeError::BadHeaderLength(ihl));
        }
        if buf.len() < ip_len + HEADER_SIZE {
            return Err(DecodeError::Truncated { len: buf.len() });
        }

        Ok(Datagram {
            source: Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15]),
            ttl: buf[IPV4_TTL_OFFSET],
            header: Header::decode(&buf[ip_len..])?,
            body: &buf[ip_len + HEADER_SIZE..],
            len: buf.len(),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self.header.typ,
            TIME_EXCEEDED4_TYPE | DEST_UNREACHABLE4_TYPE
        )
    }

    /// The offending datagram quoted by a Time Exceeded or Destination
    /// Unreachable message.
    pub fn quoted(&self) -> Option<Quoted<'a>> {
        if !self.is_error() {
            return None;
        }
        let body = self.body;
        if body.len() < IPV4_HEADER_SIZE {
            return None;
        }
        let ip_len = usize::from(body[0] & 0x0f) * 4;
        if ip_len < IPV4_HEADER_SIZE || body.len() < ip_len {
            return None;
        }
        Some(Quoted {
            protocol: body[IPV4_PROTOCOL_OFFSET],
            destination: Ipv4Addr::new(body[16], body[17], body[18], body[19]),
            payload: &body[ip_len..],
        })
    }
}

/// Leading part of a datagram echoed back inside an ICMP error.
#[derive(Debug)]
pub struct Quoted<'a> {
    pub protocol: u8,
    pub destination: Ipv4Addr,
    /// At least the first eight bytes of the original transport header.
    pub payload: &'a [u8],
}

/// Prefixes `payload` with a minimal IPv4 header, as the kernel hands it to
/// raw socket readers.
#[cfg(test)]
pub(crate) fn wrap_ipv4(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    ttl: u8,
    protocol: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = vec![0u8; IPV4_HEADER_SIZE];
    buf[0] = 0x45;
    buf[2..4].copy_from_slice(&((IPV4_HEADER_SIZE + payload.len()) as u16).to_be_bytes());
    buf[IPV4_TTL_OFFSET] = ttl;
    buf[IPV4_PROTOCOL_OFFSET] = protocol;
    buf[12..16].copy_from_slice(&source.octets());
    buf[16..20].copy_from_slice(&destination.octets());
    write_checksum(&mut buf, 10);
    buf.extend_from_slice(payload);
    buf
}
