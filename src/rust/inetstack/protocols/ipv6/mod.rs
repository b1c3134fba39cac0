// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! IPv6 wire formats (RFC 2460) and the ICMPv6 subset used by neighbor discovery (RFC 4443, RFC 2461).

pub mod icmpv6;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::conduit::messenger::sum_words,
    runtime::fail::Fail,
};
use ::libc::{
    EBADMSG,
    ENOTSUP,
};
use ::std::net::Ipv6Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const IPV6_HEADER_SIZE: usize = 40;

/// Smallest MTU every IPv6 link must support.
pub const IPV6_MIN_MTU: usize = 1280;

pub const IPV6_FRAGMENT_HEADER_SIZE: usize = 8;

const IPV6_VERSION: u8 = 6;

// Next header values.
pub const NEXT_HOP_BY_HOP: u8 = 0;
pub const NEXT_ROUTING: u8 = 43;
pub const NEXT_FRAGMENT: u8 = 44;
pub const NEXT_ICMPV6: u8 = 58;
pub const NEXT_NONE: u8 = 59;
pub const NEXT_DESTINATION_OPTIONS: u8 = 60;

// Options carried in hop-by-hop and destination options headers.
pub const IP6OPT_PAD1: u8 = 0;
pub const IP6OPT_PADN: u8 = 1;
pub const IP6OPT_ROUTER_ALERT: u8 = 5;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv6Header {
    traffic_class: u8,
    flow_label: u32,
    payload_length: u16,
    next_header: u8,
    hop_limit: u8,
    src_addr: Ipv6Addr,
    dst_addr: Ipv6Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FragmentHeader {
    pub next_header: u8,
    /// Offset of the fragment data in 8-byte units.
    pub offset: u16,
    pub more: bool,
    pub identification: u32,
}

/// One extension header found between the fixed header and the upper-layer payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExtensionHeader {
    HopByHop(Vec<(u8, Vec<u8>)>),
    Routing { routing_type: u8, segments_left: u8, data: Vec<u8> },
    Fragment(FragmentHeader),
    DestinationOptions(Vec<(u8, Vec<u8>)>),
}

/// Result of walking the extension header chain of a datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderChain {
    pub extensions: Vec<ExtensionHeader>,
    /// Upper-layer protocol, or [NEXT_NONE].
    pub upper_layer: u8,
    /// Offset of the upper-layer payload from the start of the extension headers.
    pub offset: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Ipv6Header {
    pub fn new(src_addr: Ipv6Addr, dst_addr: Ipv6Addr, next_header: u8, hop_limit: u8) -> Self {
        Self {
            traffic_class: 0,
            flow_label: 0,
            payload_length: 0,
            next_header,
            hop_limit,
            src_addr,
            dst_addr,
        }
    }

    /// Parses the fixed header. The payload length must fit in `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < IPV6_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "ipv6 datagram too small"));
        }
        if buf[0] >> 4 != IPV6_VERSION {
            return Err(Fail::new(ENOTSUP, "unsupported IP version"));
        }
        let word: u32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let payload_length: u16 = u16::from_be_bytes([buf[4], buf[5]]);
        if IPV6_HEADER_SIZE + payload_length as usize > buf.len() {
            return Err(Fail::new(EBADMSG, "ipv6 datagram size mismatch"));
        }
        let mut src: [u8; 16] = [0; 16];
        let mut dst: [u8; 16] = [0; 16];
        src.copy_from_slice(&buf[8..24]);
        dst.copy_from_slice(&buf[24..40]);
        Ok(Self {
            traffic_class: (word >> 20) as u8,
            flow_label: word & 0xf_ffff,
            payload_length,
            next_header: buf[6],
            hop_limit: buf[7],
            src_addr: Ipv6Addr::from(src),
            dst_addr: Ipv6Addr::from(dst),
        })
    }

    pub fn serialize(&self, buf: &mut [u8]) {
        let buf: &mut [u8] = &mut buf[..IPV6_HEADER_SIZE];
        let word: u32 = (IPV6_VERSION as u32) << 28 | (self.traffic_class as u32) << 20 | self.flow_label & 0xf_ffff;
        buf[0..4].copy_from_slice(&word.to_be_bytes());
        buf[4..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[6] = self.next_header;
        buf[7] = self.hop_limit;
        buf[8..24].copy_from_slice(&self.src_addr.octets());
        buf[24..40].copy_from_slice(&self.dst_addr.octets());
    }

    pub fn get_src_addr(&self) -> Ipv6Addr {
        self.src_addr
    }

    pub fn get_dest_addr(&self) -> Ipv6Addr {
        self.dst_addr
    }

    pub fn get_next_header(&self) -> u8 {
        self.next_header
    }

    pub fn get_hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn get_traffic_class(&self) -> u8 {
        self.traffic_class
    }

    pub fn set_traffic_class(&mut self, traffic_class: u8) {
        self.traffic_class = traffic_class;
    }

    pub fn get_flow_label(&self) -> u32 {
        self.flow_label
    }

    pub fn set_flow_label(&mut self, flow_label: u32) {
        self.flow_label = flow_label & 0xf_ffff;
    }

    pub fn get_payload_length(&self) -> usize {
        self.payload_length as usize
    }

    pub fn set_payload_length(&mut self, len: usize) {
        self.payload_length = len as u16;
    }
}

impl FragmentHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < IPV6_FRAGMENT_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "ipv6 fragment header truncated"));
        }
        let field: u16 = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(Self {
            next_header: buf[0],
            offset: field >> 3,
            more: field & 1 != 0,
            identification: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }

    pub fn serialize(&self) -> [u8; IPV6_FRAGMENT_HEADER_SIZE] {
        let mut buf: [u8; IPV6_FRAGMENT_HEADER_SIZE] = [0; IPV6_FRAGMENT_HEADER_SIZE];
        buf[0] = self.next_header;
        buf[2..4].copy_from_slice(&(self.offset << 3 | self.more as u16).to_be_bytes());
        buf[4..8].copy_from_slice(&self.identification.to_be_bytes());
        buf
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Walks the extension headers in `buf`, which starts right after the fixed header whose next header is `next`.
/// Stops at the first upper-layer protocol. Extension headers must appear at most once, except destination options
/// which may precede a routing header and the upper layer, and hop-by-hop must come first (RFC 2460 section 4.1).
pub fn walk_extensions(mut next: u8, buf: &[u8]) -> Result<HeaderChain, Fail> {
    let mut extensions: Vec<ExtensionHeader> = Vec::new();
    let mut offset: usize = 0;
    loop {
        match next {
            NEXT_HOP_BY_HOP | NEXT_DESTINATION_OPTIONS | NEXT_ROUTING => {
                if next == NEXT_HOP_BY_HOP && !extensions.is_empty() {
                    return Err(Fail::new(EBADMSG, "hop-by-hop options header is not first"));
                }
                let rest: &[u8] = buf.get(offset..).unwrap_or(&[]);
                if rest.len() < 8 {
                    return Err(Fail::new(EBADMSG, "ipv6 extension header truncated"));
                }
                let len: usize = (rest[1] as usize + 1) * 8;
                if rest.len() < len {
                    return Err(Fail::new(EBADMSG, "ipv6 extension header truncated"));
                }
                let body: &[u8] = &rest[2..len];
                let header: ExtensionHeader = match next {
                    NEXT_HOP_BY_HOP => ExtensionHeader::HopByHop(parse_options(body)?),
                    NEXT_DESTINATION_OPTIONS => ExtensionHeader::DestinationOptions(parse_options(body)?),
                    _ => ExtensionHeader::Routing {
                        routing_type: body[0],
                        segments_left: body[1],
                        data: body[2..].to_vec(),
                    },
                };
                extensions.push(header);
                next = rest[0];
                offset += len;
            },
            NEXT_FRAGMENT => {
                let fragment: FragmentHeader = FragmentHeader::parse(buf.get(offset..).unwrap_or(&[]))?;
                if extensions.iter().any(|e| matches!(e, ExtensionHeader::Fragment(_))) {
                    return Err(Fail::new(EBADMSG, "duplicate ipv6 fragment header"));
                }
                extensions.push(ExtensionHeader::Fragment(fragment));
                next = fragment.next_header;
                offset += IPV6_FRAGMENT_HEADER_SIZE;
            },
            upper_layer => {
                return Ok(HeaderChain {
                    extensions,
                    upper_layer,
                    offset,
                })
            },
        }
    }
}

/// Parses the TLV options of a hop-by-hop or destination options header.
fn parse_options(mut body: &[u8]) -> Result<Vec<(u8, Vec<u8>)>, Fail> {
    let mut options: Vec<(u8, Vec<u8>)> = Vec::new();
    while let Some(&kind) = body.first() {
        if kind == IP6OPT_PAD1 {
            body = &body[1..];
            continue;
        }
        if body.len() < 2 || body.len() < 2 + body[1] as usize {
            return Err(Fail::new(EBADMSG, "ipv6 option truncated"));
        }
        let len: usize = body[1] as usize;
        if kind != IP6OPT_PADN {
            options.push((kind, body[2..2 + len].to_vec()));
        }
        body = &body[2 + len..];
    }
    Ok(options)
}

/// Ones' complement sum of the upper-layer pseudo header (RFC 2460 section 8.1).
pub fn pseudo_header_sum(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, length: usize) -> u32 {
    let mut sum: u32 = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum = sum_words(&(length as u32).to_be_bytes(), sum);
    sum + next_header as u32
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        walk_extensions,
        ExtensionHeader,
        FragmentHeader,
        HeaderChain,
        Ipv6Header,
        IP6OPT_ROUTER_ALERT,
        IPV6_HEADER_SIZE,
        NEXT_FRAGMENT,
        NEXT_HOP_BY_HOP,
        NEXT_ICMPV6,
    };
    use ::anyhow::Result;
    use ::std::net::Ipv6Addr;

    #[test]
    fn fixed_header_layout() -> Result<()> {
        let src: Ipv6Addr = "fe80::1".parse()?;
        let dst: Ipv6Addr = "ff02::1:ff00:2".parse()?;
        let mut header: Ipv6Header = Ipv6Header::new(src, dst, NEXT_ICMPV6, 255);
        header.set_traffic_class(0xb8);
        header.set_flow_label(0x12345);
        header.set_payload_length(0);
        let mut buf: [u8; IPV6_HEADER_SIZE] = [0; IPV6_HEADER_SIZE];
        header.serialize(&mut buf);
        crate::ensure_eq!(&buf[0..4], &[0x6b, 0x81, 0x23, 0x45]);
        crate::ensure_eq!(buf[6], NEXT_ICMPV6);
        crate::ensure_eq!(buf[7], 255);
        crate::ensure_eq!(Ipv6Header::parse(&buf)?, header);
        Ok(())
    }

    #[test]
    fn truncated_payload_is_rejected() -> Result<()> {
        let mut header: Ipv6Header = Ipv6Header::new(Ipv6Addr::LOCALHOST, Ipv6Addr::LOCALHOST, NEXT_ICMPV6, 64);
        header.set_payload_length(8);
        let mut buf: [u8; IPV6_HEADER_SIZE] = [0; IPV6_HEADER_SIZE];
        header.serialize(&mut buf);
        crate::ensure_eq!(Ipv6Header::parse(&buf).is_err(), true);
        Ok(())
    }

    #[test]
    fn walk_hop_by_hop_and_fragment() -> Result<()> {
        let fragment: FragmentHeader = FragmentHeader {
            next_header: NEXT_ICMPV6,
            offset: 185,
            more: true,
            identification: 0xdeadbeef,
        };
        let mut buf: Vec<u8> = vec![
            NEXT_FRAGMENT,
            0,
            IP6OPT_ROUTER_ALERT,
            2,
            0,
            0,
            1, // PadN
            0,
        ];
        buf.extend_from_slice(&fragment.serialize());
        buf.extend_from_slice(&[0x80, 0, 0, 0]);

        let chain: HeaderChain = walk_extensions(NEXT_HOP_BY_HOP, &buf)?;
        crate::ensure_eq!(chain.upper_layer, NEXT_ICMPV6);
        crate::ensure_eq!(chain.offset, 16);
        crate::ensure_eq!(chain.extensions.len(), 2);
        crate::ensure_eq!(
            chain.extensions[0].clone(),
            ExtensionHeader::HopByHop(vec![(IP6OPT_ROUTER_ALERT, vec![0, 0])])
        );
        crate::ensure_eq!(chain.extensions[1].clone(), ExtensionHeader::Fragment(fragment));
        Ok(())
    }

    #[test]
    fn hop_by_hop_must_come_first() -> Result<()> {
        let fragment: FragmentHeader = FragmentHeader {
            next_header: NEXT_HOP_BY_HOP,
            offset: 0,
            more: false,
            identification: 1,
        };
        let mut buf: Vec<u8> = fragment.serialize().to_vec();
        buf.extend_from_slice(&[NEXT_ICMPV6, 0, 1, 4, 0, 0, 0, 0]);
        crate::ensure_eq!(walk_extensions(NEXT_FRAGMENT, &buf).is_err(), true);
        Ok(())
    }
}
