//! Ethernet / IP / transport header parser.
//!
//! Extracts the flow key of IPv4 and IPv6 packets and, for TCP SYN packets,
//! a fingerprint string built from the advertised window and the options:
//!
//! ```text
//! (faf0)((020405b4)(01)(030307))
//!  window  MSS      NOP  WS
//! ```
//!
//! MSS and window-scale options carry their values; every other option is
//! represented by its kind alone.

use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_ACK: u8 = 0x10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated {layer} header: need {needed} bytes, have {available}")]
    Truncated {
        layer: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("malformed {layer} header: {reason}")]
    Malformed {
        layer: &'static str,
        reason: &'static str,
    },
}

/// Flow key and fingerprints of one IP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// Present for TCP SYN packets (SYN set, ACK clear).
    pub tcp_fingerprint: Option<String>,
}

impl PacketMetadata {
    pub fn has_fingerprint(&self) -> bool {
        self.tcp_fingerprint.is_some()
    }
}

fn need(layer: &'static str, data: &[u8], needed: usize) -> Result<(), ParseError> {
    if data.len() < needed {
        Err(ParseError::Truncated {
            layer,
            needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

/// Parse an Ethernet frame.
///
/// Returns `Ok(None)` for frames that do not carry IPv4 or IPv6.
pub fn parse_packet(frame: &[u8]) -> Result<Option<PacketMetadata>, ParseError> {
    need("ethernet", frame, 14)?;
    let mut ethertype = be16(frame, 12);
    let mut offset = 14;
    if ethertype == ETHERTYPE_VLAN {
        need("vlan", frame, 18)?;
        ethertype = be16(frame, 16);
        offset = 18;
    }

    let ip = &frame[offset..];
    let (src_ip, dst_ip, protocol, transport) = match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(ip)?,
        ETHERTYPE_IPV6 => parse_ipv6(ip)?,
        _ => return Ok(None),
    };

    let mut meta = PacketMetadata {
        src_ip,
        dst_ip,
        protocol,
        src_port: 0,
        dst_port: 0,
        tcp_fingerprint: None,
    };
    match protocol {
        IPPROTO_TCP => {
            let (src_port, dst_port, fingerprint) = parse_tcp(transport)?;
            meta.src_port = src_port;
            meta.dst_port = dst_port;
            meta.tcp_fingerprint = fingerprint;
        }
        IPPROTO_UDP => {
            need("udp", transport, 8)?;
            meta.src_port = be16(transport, 0);
            meta.dst_port = be16(transport, 2);
        }
        _ => {}
    }
    Ok(Some(meta))
}

fn parse_ipv4(data: &[u8]) -> Result<(IpAddr, IpAddr, u8, &[u8]), ParseError> {
    need("ipv4", data, 20)?;
    if data[0] >> 4 != 4 {
        return Err(ParseError::Malformed {
            layer: "ipv4",
            reason: "version is not 4",
        });
    }
    let ihl = usize::from(data[0] & 0x0f) * 4;
    if ihl < 20 {
        return Err(ParseError::Malformed {
            layer: "ipv4",
            reason: "header length below 20",
        });
    }
    need("ipv4", data, ihl)?;
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    Ok((src.into(), dst.into(), data[9], &data[ihl..]))
}

fn parse_ipv6(data: &[u8]) -> Result<(IpAddr, IpAddr, u8, &[u8]), ParseError> {
    need("ipv6", data, 40)?;
    let mut src = [0u8; 16];
    let mut dst = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    dst.copy_from_slice(&data[24..40]);
    Ok((
        Ipv6Addr::from(src).into(),
        Ipv6Addr::from(dst).into(),
        data[6],
        &data[40..],
    ))
}

fn parse_tcp(data: &[u8]) -> Result<(u16, u16, Option<String>), ParseError> {
    need("tcp", data, 20)?;
    let src_port = be16(data, 0);
    let dst_port = be16(data, 2);
    let header_len = usize::from(data[12] >> 4) * 4;
    if header_len < 20 {
        return Err(ParseError::Malformed {
            layer: "tcp",
            reason: "data offset below 5",
        });
    }
    let flags = data[13];
    if flags & TCP_FLAG_SYN == 0 || flags & TCP_FLAG_ACK != 0 {
        return Ok((src_port, dst_port, None));
    }
    need("tcp", data, header_len)?;
    let fingerprint = syn_fingerprint(be16(data, 14), &data[20..header_len])?;
    Ok((src_port, dst_port, Some(fingerprint)))
}

fn syn_fingerprint(window: u16, options: &[u8]) -> Result<String, ParseError> {
    let mut fp = String::with_capacity(16 + options.len() * 3);
    let _ = write!(fp, "({window:04x})(");
    let mut i = 0;
    while i < options.len() {
        let kind = options[i];
        match kind {
            0 => {
                fp.push_str("(00)");
                break;
            }
            1 => {
                fp.push_str("(01)");
                i += 1;
            }
            _ => {
                need("tcp option", &options[i..], 2)?;
                let len = usize::from(options[i + 1]);
                if len < 2 {
                    return Err(ParseError::Malformed {
                        layer: "tcp option",
                        reason: "option length below 2",
                    });
                }
                need("tcp option", &options[i..], len)?;
                fp.push('(');
                let shown = if kind == 2 || kind == 3 { len } else { 1 };
                for b in &options[i..i + shown] {
                    let _ = write!(fp, "{b:02x}");
                }
                fp.push(')');
                i += len;
            }
        }
    }
    fp.push(')');
    Ok(fp)
}
