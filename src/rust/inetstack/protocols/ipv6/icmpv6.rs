// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    pseudo_header_sum,
    NEXT_ICMPV6,
};
use crate::{
    inetstack::conduit::messenger::{
        fold_checksum,
        sum_words,
    },
    runtime::{
        fail::Fail,
        network::types::MacAddress,
    },
};
use ::libc::EBADMSG;
use ::std::net::Ipv6Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const ICMPV6_HEADER_SIZE: usize = 8;

pub const ICMPV6_DESTINATION_UNREACHABLE: u8 = 1;
pub const ICMPV6_PACKET_TOO_BIG: u8 = 2;
pub const ICMPV6_TIME_EXCEEDED: u8 = 3;
pub const ICMPV6_PARAMETER_PROBLEM: u8 = 4;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;
pub const MLD_LISTENER_QUERY: u8 = 130;
pub const MLD_LISTENER_REPORT: u8 = 131;
pub const MLD_LISTENER_DONE: u8 = 132;
pub const ND_ROUTER_SOLICIT: u8 = 133;
pub const ND_ROUTER_ADVERT: u8 = 134;
pub const ND_NEIGHBOR_SOLICIT: u8 = 135;
pub const ND_NEIGHBOR_ADVERT: u8 = 136;
pub const ND_REDIRECT: u8 = 137;

// Neighbor discovery option types (RFC 2461 section 4.6).
const ND_OPT_SOURCE_LINKADDR: u8 = 1;
const ND_OPT_TARGET_LINKADDR: u8 = 2;
const ND_OPT_PREFIX_INFORMATION: u8 = 3;
const ND_OPT_MTU: u8 = 5;

const NA_FLAG_ROUTER: u8 = 0x80;
const NA_FLAG_SOLICITED: u8 = 0x40;
const NA_FLAG_OVERRIDE: u8 = 0x20;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Icmpv6Header {
    icmp_type: u8,
    code: u8,
    rest_of_header: [u8; 4],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NdOption {
    SourceLinkAddr(MacAddress),
    TargetLinkAddr(MacAddress),
    PrefixInformation {
        prefix_length: u8,
        on_link: bool,
        autonomous: bool,
        valid_lifetime: u32,
        preferred_lifetime: u32,
        prefix: Ipv6Addr,
    },
    Mtu(u32),
    Unknown(u8, Vec<u8>),
}

/// Body of a neighbor solicitation or advertisement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NeighborMessage {
    pub router: bool,
    pub solicited: bool,
    pub override_flag: bool,
    pub target: Ipv6Addr,
    pub options: Vec<NdOption>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Icmpv6Header {
    pub fn new(icmp_type: u8, code: u8, rest_of_header: [u8; 4]) -> Self {
        Self {
            icmp_type,
            code,
            rest_of_header,
        }
    }

    /// Parses the header at the front of `buf`, which holds the whole message sent from `src` to `dst`.
    pub fn parse(src: Ipv6Addr, dst: Ipv6Addr, buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < ICMPV6_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "ICMPv6 message too small for header"));
        }
        let sum: u32 = pseudo_header_sum(src, dst, NEXT_ICMPV6, buf.len());
        if fold_checksum(sum_words(buf, sum)) != 0 {
            return Err(Fail::new(EBADMSG, "ICMPv6 checksum mismatch"));
        }
        Ok(Self {
            icmp_type: buf[0],
            code: buf[1],
            rest_of_header: [buf[4], buf[5], buf[6], buf[7]],
        })
    }

    /// Builds the whole message, this header followed by `data`, checksummed for `src` to `dst`.
    pub fn to_message(&self, src: Ipv6Addr, dst: Ipv6Addr, data: &[u8]) -> Vec<u8> {
        let mut message: Vec<u8> = vec![0; ICMPV6_HEADER_SIZE + data.len()];
        message[0] = self.icmp_type;
        message[1] = self.code;
        message[4..8].copy_from_slice(&self.rest_of_header);
        message[ICMPV6_HEADER_SIZE..].copy_from_slice(data);
        let sum: u32 = pseudo_header_sum(src, dst, NEXT_ICMPV6, message.len());
        let checksum: u16 = fold_checksum(sum_words(&message, sum));
        message[2..4].copy_from_slice(&checksum.to_be_bytes());
        message
    }

    pub fn get_type(&self) -> u8 {
        self.icmp_type
    }

    pub fn get_code(&self) -> u8 {
        self.code
    }

    pub fn get_rest_of_header(&self) -> [u8; 4] {
        self.rest_of_header
    }

    /// MTU reported by a packet too big message.
    pub fn get_mtu(&self) -> u32 {
        u32::from_be_bytes(self.rest_of_header)
    }

    pub fn is_error(&self) -> bool {
        self.icmp_type < 128
    }
}

impl NdOption {
    fn serialize(&self, buf: &mut Vec<u8>) {
        match self {
            NdOption::SourceLinkAddr(mac) | NdOption::TargetLinkAddr(mac) => {
                let kind: u8 = match self {
                    NdOption::SourceLinkAddr(_) => ND_OPT_SOURCE_LINKADDR,
                    _ => ND_OPT_TARGET_LINKADDR,
                };
                buf.extend_from_slice(&[kind, 1]);
                buf.extend_from_slice(&mac.octets());
            },
            NdOption::PrefixInformation {
                prefix_length,
                on_link,
                autonomous,
                valid_lifetime,
                preferred_lifetime,
                prefix,
            } => {
                let flags: u8 = (*on_link as u8) << 7 | (*autonomous as u8) << 6;
                buf.extend_from_slice(&[ND_OPT_PREFIX_INFORMATION, 4, *prefix_length, flags]);
                buf.extend_from_slice(&valid_lifetime.to_be_bytes());
                buf.extend_from_slice(&preferred_lifetime.to_be_bytes());
                buf.extend_from_slice(&[0; 4]);
                buf.extend_from_slice(&prefix.octets());
            },
            NdOption::Mtu(mtu) => {
                buf.extend_from_slice(&[ND_OPT_MTU, 1, 0, 0]);
                buf.extend_from_slice(&mtu.to_be_bytes());
            },
            NdOption::Unknown(kind, data) => {
                let len: usize = (data.len() + 2 + 7) / 8;
                buf.extend_from_slice(&[*kind, len as u8]);
                buf.extend_from_slice(data);
                buf.resize(buf.len() + len * 8 - 2 - data.len(), 0);
            },
        }
    }

    /// Parses the options trailing a neighbor discovery message. A zero length option invalidates the message.
    pub fn parse_all(mut buf: &[u8]) -> Result<Vec<NdOption>, Fail> {
        let mut options: Vec<NdOption> = Vec::new();
        while buf.len() >= 2 {
            let len: usize = buf[1] as usize * 8;
            if len == 0 || buf.len() < len {
                return Err(Fail::new(EBADMSG, "malformed neighbor discovery option"));
            }
            let body: &[u8] = &buf[2..len];
            let option: NdOption = match buf[0] {
                ND_OPT_SOURCE_LINKADDR if body.len() >= 6 => NdOption::SourceLinkAddr(MacAddress::from_bytes(&body[..6])?),
                ND_OPT_TARGET_LINKADDR if body.len() >= 6 => NdOption::TargetLinkAddr(MacAddress::from_bytes(&body[..6])?),
                ND_OPT_PREFIX_INFORMATION if len == 32 => {
                    let mut prefix: [u8; 16] = [0; 16];
                    prefix.copy_from_slice(&body[14..30]);
                    NdOption::PrefixInformation {
                        prefix_length: body[0],
                        on_link: body[1] & 0x80 != 0,
                        autonomous: body[1] & 0x40 != 0,
                        valid_lifetime: u32::from_be_bytes([body[2], body[3], body[4], body[5]]),
                        preferred_lifetime: u32::from_be_bytes([body[6], body[7], body[8], body[9]]),
                        prefix: Ipv6Addr::from(prefix),
                    }
                },
                ND_OPT_MTU if len == 8 => NdOption::Mtu(u32::from_be_bytes([body[2], body[3], body[4], body[5]])),
                kind => NdOption::Unknown(kind, body.to_vec()),
            };
            options.push(option);
            buf = &buf[len..];
        }
        Ok(options)
    }
}

impl NeighborMessage {
    /// Parses the body of a solicitation or advertisement, following the 8-byte ICMPv6 header.
    pub fn parse(header: &Icmpv6Header, body: &[u8]) -> Result<Self, Fail> {
        if body.len() < 16 {
            return Err(Fail::new(EBADMSG, "neighbor discovery message too small"));
        }
        let flags: u8 = header.rest_of_header[0];
        let mut target: [u8; 16] = [0; 16];
        target.copy_from_slice(&body[..16]);
        Ok(Self {
            router: flags & NA_FLAG_ROUTER != 0,
            solicited: flags & NA_FLAG_SOLICITED != 0,
            override_flag: flags & NA_FLAG_OVERRIDE != 0,
            target: Ipv6Addr::from(target),
            options: NdOption::parse_all(&body[16..])?,
        })
    }

    /// Builds a complete solicitation (`icmp_type` [ND_NEIGHBOR_SOLICIT]) or advertisement message.
    pub fn to_message(&self, icmp_type: u8, src: Ipv6Addr, dst: Ipv6Addr) -> Vec<u8> {
        let mut flags: u8 = 0;
        if icmp_type == ND_NEIGHBOR_ADVERT {
            flags = (self.router as u8) << 7 | (self.solicited as u8) << 6 | (self.override_flag as u8) << 5;
        }
        let mut body: Vec<u8> = self.target.octets().to_vec();
        for option in &self.options {
            option.serialize(&mut body);
        }
        Icmpv6Header::new(icmp_type, 0, [flags, 0, 0, 0]).to_message(src, dst, &body)
    }

    /// Link address carried in a source or target link-layer address option.
    pub fn get_link_addr(&self) -> Option<MacAddress> {
        self.options.iter().find_map(|o| match o {
            NdOption::SourceLinkAddr(mac) | NdOption::TargetLinkAddr(mac) => Some(*mac),
            _ => None,
        })
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Solicited-node multicast address of `addr` (RFC 2373 section 2.7.1).
pub fn solicited_node(addr: Ipv6Addr) -> Ipv6Addr {
    let o: [u8; 16] = addr.octets();
    Ipv6Addr::new(
        0xff02,
        0,
        0,
        0,
        0,
        1,
        0xff00 | o[13] as u16,
        u16::from_be_bytes([o[14], o[15]]),
    )
}

/// Link address of an IPv6 multicast group on Ethernet (RFC 2464 section 7).
pub fn multicast_link_addr(group: Ipv6Addr) -> MacAddress {
    let o: [u8; 16] = group.octets();
    MacAddress::new([0x33, 0x33, o[12], o[13], o[14], o[15]])
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        multicast_link_addr,
        solicited_node,
        Icmpv6Header,
        NdOption,
        NeighborMessage,
        ICMPV6_ECHO_REQUEST,
        ICMPV6_HEADER_SIZE,
        ND_NEIGHBOR_ADVERT,
        ND_NEIGHBOR_SOLICIT,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;
    use ::std::net::Ipv6Addr;

    const MAC: MacAddress = MacAddress::new([0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);

    #[test]
    fn checksum_covers_pseudo_header() -> Result<()> {
        let src: Ipv6Addr = "fe80::1".parse()?;
        let dst: Ipv6Addr = "fe80::2".parse()?;
        let message: Vec<u8> = Icmpv6Header::new(ICMPV6_ECHO_REQUEST, 0, [0, 1, 0, 2]).to_message(src, dst, b"ping");
        let header: Icmpv6Header = Icmpv6Header::parse(src, dst, &message)?;
        crate::ensure_eq!(header.get_type(), ICMPV6_ECHO_REQUEST);
        crate::ensure_eq!(header.is_error(), false);

        // Same bytes, different destination.
        crate::ensure_eq!(Icmpv6Header::parse(src, "fe80::3".parse()?, &message).is_err(), true);
        Ok(())
    }

    #[test]
    fn neighbor_solicitation_layout() -> Result<()> {
        let src: Ipv6Addr = "fe80::1".parse()?;
        let target: Ipv6Addr = "fe80::2:3344".parse()?;
        let dst: Ipv6Addr = solicited_node(target);
        crate::ensure_eq!(dst, "ff02::1:ff02:3344".parse::<Ipv6Addr>()?);
        crate::ensure_eq!(
            multicast_link_addr(dst),
            MacAddress::new([0x33, 0x33, 0xff, 0x02, 0x33, 0x44])
        );

        let ns: NeighborMessage = NeighborMessage {
            router: false,
            solicited: false,
            override_flag: false,
            target,
            options: vec![NdOption::SourceLinkAddr(MAC)],
        };
        let message: Vec<u8> = ns.to_message(ND_NEIGHBOR_SOLICIT, src, dst);
        crate::ensure_eq!(message.len(), ICMPV6_HEADER_SIZE + 16 + 8);
        crate::ensure_eq!(&message[24..26], &[1, 1]);

        let header: Icmpv6Header = Icmpv6Header::parse(src, dst, &message)?;
        let parsed: NeighborMessage = NeighborMessage::parse(&header, &message[ICMPV6_HEADER_SIZE..])?;
        crate::ensure_eq!(parsed, ns);
        crate::ensure_eq!(parsed.get_link_addr(), Some(MAC));
        Ok(())
    }

    #[test]
    fn advertisement_flags() -> Result<()> {
        let target: Ipv6Addr = "fe80::2".parse()?;
        let na: NeighborMessage = NeighborMessage {
            router: false,
            solicited: true,
            override_flag: true,
            target,
            options: vec![NdOption::TargetLinkAddr(MAC)],
        };
        let message: Vec<u8> = na.to_message(ND_NEIGHBOR_ADVERT, target, "fe80::1".parse()?);
        crate::ensure_eq!(message[4], 0x60);
        Ok(())
    }

    #[test]
    fn zero_length_option_is_malformed() -> Result<()> {
        crate::ensure_eq!(NdOption::parse_all(&[1, 0, 0, 0, 0, 0, 0, 0]).is_err(), true);
        Ok(())
    }
}
