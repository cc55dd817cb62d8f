//! Endpoint address encoding.
//!
//! Subflow requests carry endpoints as raw `sockaddr_in` / `sockaddr_in6`
//! records laid end to end. A record's length is fixed by its address
//! family, so a pair is decoded by reading the first record's family,
//! skipping its length, then reading the second's.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use zerocopy::byteorder::network_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

const AF_INET: u16 = libc::AF_INET as u16;
const AF_INET6: u16 = libc::AF_INET6 as u16;

/// `struct sockaddr_in`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct SockaddrIn {
    family: u16,
    port: U16,
    addr: [u8; 4],
    zero: [u8; 8],
}

/// `struct sockaddr_in6`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct SockaddrIn6 {
    family: u16,
    port: U16,
    flowinfo: U32,
    addr: [u8; 16],
    scope_id: u32,
}

/// Encoded size of an IPv4 endpoint.
pub const SOCKADDR_IN_LEN: usize = size_of::<SockaddrIn>();

/// Encoded size of an IPv6 endpoint.
pub const SOCKADDR_IN6_LEN: usize = size_of::<SockaddrIn6>();

/// Shortest record the decoder accepts.
pub const MIN_RECORD_LEN: usize = SOCKADDR_IN_LEN;

/// Encoded size of an endpoint, determined by its family alone.
pub fn encoded_len(addr: &SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => SOCKADDR_IN_LEN,
        SocketAddr::V6(_) => SOCKADDR_IN6_LEN,
    }
}

/// Append one endpoint record to `buf`.
pub fn encode(addr: &SocketAddr, buf: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(v4) => {
            let rec = SockaddrIn {
                family: AF_INET,
                port: U16::new(v4.port()),
                addr: v4.ip().octets(),
                ..Default::default()
            };
            buf.extend_from_slice(rec.as_bytes());
        }
        SocketAddr::V6(v6) => {
            let rec = SockaddrIn6 {
                family: AF_INET6,
                port: U16::new(v6.port()),
                flowinfo: U32::new(v6.flowinfo()),
                addr: v6.ip().octets(),
                scope_id: v6.scope_id(),
            };
            buf.extend_from_slice(rec.as_bytes());
        }
    }
}

/// Encode a local/remote pair with no padding between the records.
pub fn encode_pair(local: &SocketAddr, remote: &SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_len(local) + encoded_len(remote));
    encode(local, &mut buf);
    encode(remote, &mut buf);
    buf
}

/// Decode one endpoint record starting at `offset`.
///
/// Returns the endpoint and the offset just past its record.
pub fn decode(bytes: &[u8], offset: usize) -> Result<(SocketAddr, usize)> {
    let rest = bytes.get(offset..).unwrap_or_default();
    if rest.len() < MIN_RECORD_LEN {
        return Err(Error::malformed(
            offset,
            format!(
                "{} bytes left, a record needs at least {}",
                rest.len(),
                MIN_RECORD_LEN
            ),
        ));
    }

    let family = u16::from_ne_bytes([rest[0], rest[1]]);
    match family {
        AF_INET => {
            let (rec, _) = SockaddrIn::read_from_prefix(rest)
                .map_err(|_| Error::malformed(offset, "short sockaddr_in"))?;
            let addr = SocketAddrV4::new(Ipv4Addr::from(rec.addr), rec.port.get());
            Ok((SocketAddr::V4(addr), offset + SOCKADDR_IN_LEN))
        }
        AF_INET6 => {
            let (rec, _) = SockaddrIn6::read_from_prefix(rest).map_err(|_| {
                Error::malformed(
                    offset,
                    format!(
                        "{} bytes left, sockaddr_in6 needs {}",
                        rest.len(),
                        SOCKADDR_IN6_LEN
                    ),
                )
            })?;
            let addr = SocketAddrV6::new(
                Ipv6Addr::from(rec.addr),
                rec.port.get(),
                rec.flowinfo.get(),
                rec.scope_id,
            );
            Ok((SocketAddr::V6(addr), offset + SOCKADDR_IN6_LEN))
        }
        other => Err(Error::malformed(
            offset,
            format!("unknown address family {}", other),
        )),
    }
}

/// Decode a local/remote pair starting at `offset`.
///
/// Each record is sized by its own family, so mixed IPv4/IPv6 pairs decode
/// correctly.
pub fn decode_pair(bytes: &[u8], offset: usize) -> Result<(SocketAddr, SocketAddr)> {
    let (local, next) = decode(bytes, offset)?;
    let (remote, _) = decode(bytes, next)?;
    Ok((local, remote))
}
