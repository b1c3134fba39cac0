// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        conduit::messenger::{
            fold_checksum,
            sum_words,
        },
        protocols::ipv4::{
            Ipv4Header,
            IPV4_HEADER_MIN_SIZE,
        },
    },
    runtime::{
        fail::Fail,
        network::consts::MIN_PATH_MTU,
    },
};
use ::libc::{
    EBADMSG,
    ECONNREFUSED,
    EMSGSIZE,
    ENETUNREACH,
    ENOBUFS,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Size of ICMPv4 Headers (in bytes)
pub const ICMPV4_HEADER_SIZE: usize = 8;

pub const ICMPV4_ECHO_REPLY: u8 = 0;
pub const ICMPV4_DESTINATION_UNREACHABLE: u8 = 3;
pub const ICMPV4_SOURCE_QUENCH: u8 = 4;
pub const ICMPV4_ECHO_REQUEST: u8 = 8;
pub const ICMPV4_TIME_EXCEEDED: u8 = 11;
pub const ICMPV4_PARAMETER_PROBLEM: u8 = 12;

/// Codes of a Destination Unreachable message (RFC 792, RFC 1191).
pub const UNREACH_NET: u8 = 0;
pub const UNREACH_HOST: u8 = 1;
pub const UNREACH_PROTOCOL: u8 = 2;
pub const UNREACH_PORT: u8 = 3;
pub const UNREACH_NEEDFRAG: u8 = 4;

/// Code of a Time Exceeded message sent when reassembly times out.
pub const TIME_EXCEEDED_REASSEMBLY: u8 = 1;

/// Bytes of the offending datagram's payload quoted after its header.
pub const ICMPV4_QUOTED_PAYLOAD: usize = 8;

/// MTU plateaus used when a router reports fragmentation needed without a next-hop MTU (RFC 1191).
const MTU_PLATEAUS: [usize; 10] = [32000, 17914, 8166, 4352, 2002, 1492, 1006, 508, 296, MIN_PATH_MTU];

//======================================================================================================================
// Structures
//======================================================================================================================

/// Common header of every ICMPv4 message. The last four bytes depend on the type: identifier and sequence number
/// for echo messages, the next-hop MTU for fragmentation needed, the pointer for parameter problems.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Icmpv4Header {
    icmp_type: u8,
    code: u8,
    rest_of_header: [u8; 4],
}

/// What an ICMP error means to the transport endpoint it names.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Icmpv4Report {
    /// The endpoint should give up (protocol or port unreachable).
    Hard(i32),
    /// A hint only; established connections keep going.
    Soft(i32),
    /// The path MTU towards the destination dropped to the given value.
    PathMtu(usize),
    /// Source quench: back off as after a retransmission timeout.
    Quench,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Icmpv4Header
impl Icmpv4Header {
    /// Creates a header for a ICMP Message.
    pub fn new(icmp_type: u8, code: u8, rest_of_header: [u8; 4]) -> Self {
        Self {
            icmp_type,
            code,
            rest_of_header,
        }
    }

    pub fn new_echo(icmp_type: u8, id: u16, seq_num: u16) -> Self {
        let mut rest_of_header: [u8; 4] = [0; 4];
        rest_of_header[0..2].copy_from_slice(&id.to_be_bytes());
        rest_of_header[2..4].copy_from_slice(&seq_num.to_be_bytes());
        Self::new(icmp_type, 0, rest_of_header)
    }

    /// Parses the header at the front of `buf`, verifying the checksum over the whole message.
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < ICMPV4_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "ICMPv4 datagram too small for header"));
        }
        if fold_checksum(sum_words(buf, 0)) != 0 {
            return Err(Fail::new(EBADMSG, "ICMPv4 checksum mismatch"));
        }
        Ok(Self {
            icmp_type: buf[0],
            code: buf[1],
            rest_of_header: [buf[4], buf[5], buf[6], buf[7]],
        })
    }

    /// Serializes the header into the first bytes of `buf`. The checksum covers the header and `data`.
    pub fn serialize(&self, buf: &mut [u8], data: &[u8]) {
        let buf: &mut [u8] = &mut buf[..ICMPV4_HEADER_SIZE];
        buf[0] = self.icmp_type;
        buf[1] = self.code;
        // Skip the checksum for now.
        buf[2] = 0;
        buf[3] = 0;
        buf[4..8].copy_from_slice(&self.rest_of_header);
        let checksum: u16 = fold_checksum(sum_words(data, sum_words(buf, 0)));
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Builds a whole message: this header followed by `data`.
    pub fn to_message(&self, data: &[u8]) -> Vec<u8> {
        let mut message: Vec<u8> = vec![0; ICMPV4_HEADER_SIZE + data.len()];
        message[ICMPV4_HEADER_SIZE..].copy_from_slice(data);
        self.serialize(&mut message, data);
        message
    }

    pub fn get_type(&self) -> u8 {
        self.icmp_type
    }

    pub fn get_code(&self) -> u8 {
        self.code
    }

    pub fn get_id(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[0], self.rest_of_header[1]])
    }

    pub fn get_seq_num(&self) -> u16 {
        u16::from_be_bytes([self.rest_of_header[2], self.rest_of_header[3]])
    }

    /// Next-hop MTU of a fragmentation needed message (zero if the router predates RFC 1191).
    pub fn get_next_hop_mtu(&self) -> usize {
        u16::from_be_bytes([self.rest_of_header[2], self.rest_of_header[3]]) as usize
    }

    /// True for the messages that report a problem with a datagram we sent.
    pub fn is_error(&self) -> bool {
        matches!(
            self.icmp_type,
            ICMPV4_DESTINATION_UNREACHABLE | ICMPV4_SOURCE_QUENCH | ICMPV4_TIME_EXCEEDED | ICMPV4_PARAMETER_PROBLEM
        )
    }

    /// Classifies an error message. `current_mtu` is our current estimate of the path MTU towards the destination.
    pub fn report(&self, current_mtu: usize) -> Option<Icmpv4Report> {
        match self.icmp_type {
            ICMPV4_DESTINATION_UNREACHABLE => Some(match self.code {
                UNREACH_PROTOCOL | UNREACH_PORT => Icmpv4Report::Hard(ECONNREFUSED),
                UNREACH_NEEDFRAG => {
                    let mtu: usize = match self.get_next_hop_mtu() {
                        0 => next_plateau(current_mtu),
                        mtu => mtu,
                    };
                    Icmpv4Report::PathMtu(mtu.min(current_mtu).max(MIN_PATH_MTU))
                },
                _ => Icmpv4Report::Soft(ENETUNREACH),
            }),
            ICMPV4_TIME_EXCEEDED | ICMPV4_PARAMETER_PROBLEM => Some(Icmpv4Report::Soft(ENETUNREACH)),
            ICMPV4_SOURCE_QUENCH => Some(Icmpv4Report::Quench),
            _ => None,
        }
    }
}

impl Icmpv4Report {
    /// Error code delivered to the transport endpoint.
    pub fn errno(&self) -> i32 {
        match self {
            Icmpv4Report::Hard(errno) | Icmpv4Report::Soft(errno) => *errno,
            Icmpv4Report::PathMtu(_) => EMSGSIZE,
            Icmpv4Report::Quench => ENOBUFS,
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Largest plateau strictly below `mtu`.
fn next_plateau(mtu: usize) -> usize {
    MTU_PLATEAUS
        .iter()
        .copied()
        .find(|plateau| *plateau < mtu)
        .unwrap_or(MIN_PATH_MTU)
}

/// Builds an ICMP error message about `datagram`, quoting its IP header plus the first payload bytes (RFC 792).
pub fn error_message(icmp_type: u8, code: u8, rest_of_header: [u8; 4], datagram: &[u8]) -> Vec<u8> {
    let hdr_size: usize = match datagram.first() {
        Some(b) => (((b & 0xf) as usize) << 2).max(IPV4_HEADER_MIN_SIZE),
        None => IPV4_HEADER_MIN_SIZE,
    };
    let quote: &[u8] = &datagram[..datagram.len().min(hdr_size + ICMPV4_QUOTED_PAYLOAD)];
    Icmpv4Header::new(icmp_type, code, rest_of_header).to_message(quote)
}

/// Returns false for datagrams that must never trigger an ICMP error: those sent to a broadcast or multicast address,
/// those from an address that does not name a single host, later fragments, and ICMP errors themselves (RFC 1122).
pub fn may_report(header: &Ipv4Header, payload: &[u8], broadcast: bool) -> bool {
    let dst: Ipv4Addr = header.get_dest_addr();
    let src: Ipv4Addr = header.get_src_addr();
    if broadcast || dst.is_broadcast() || dst.is_multicast() {
        return false;
    }
    if src.is_unspecified() || src.is_broadcast() || src.is_multicast() {
        return false;
    }
    if header.get_fragment_offset() != 0 {
        return false;
    }
    if header.get_protocol() == crate::inetstack::protocols::ip::IpProtocol::ICMPv4 as u8 {
        if let Some(&icmp_type) = payload.first() {
            return !matches!(
                icmp_type,
                ICMPV4_DESTINATION_UNREACHABLE | ICMPV4_SOURCE_QUENCH | ICMPV4_TIME_EXCEEDED | ICMPV4_PARAMETER_PROBLEM
            );
        }
    }
    true
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        error_message,
        may_report,
        Icmpv4Header,
        Icmpv4Report,
        ICMPV4_DESTINATION_UNREACHABLE,
        ICMPV4_ECHO_REQUEST,
        ICMPV4_HEADER_SIZE,
        ICMPV4_TIME_EXCEEDED,
        UNREACH_HOST,
        UNREACH_NEEDFRAG,
        UNREACH_PORT,
    };
    use crate::inetstack::protocols::{
        ip::IpProtocol,
        ipv4::Ipv4Header,
    };
    use ::anyhow::Result;
    use ::libc::{
        ECONNREFUSED,
        ENETUNREACH,
    };
    use ::std::net::Ipv4Addr;

    fn datagram(len: usize) -> Vec<u8> {
        let mut header: Ipv4Header =
            Ipv4Header::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), IpProtocol::UDP as u8, 64);
        header.set_total_length(20 + len);
        let mut bytes: Vec<u8> = vec![0xab; 20 + len];
        header.serialize(&mut bytes);
        bytes
    }

    #[test]
    fn echo_round_trip() -> Result<()> {
        let message: Vec<u8> = Icmpv4Header::new_echo(ICMPV4_ECHO_REQUEST, 0x1234, 7).to_message(b"ping");
        let header: Icmpv4Header = Icmpv4Header::parse(&message)?;
        crate::ensure_eq!(header.get_type(), ICMPV4_ECHO_REQUEST);
        crate::ensure_eq!(header.get_id(), 0x1234);
        crate::ensure_eq!(header.get_seq_num(), 7);
        crate::ensure_eq!(&message[ICMPV4_HEADER_SIZE..], b"ping");

        let mut corrupted: Vec<u8> = message.clone();
        corrupted[9] ^= 0xff;
        crate::ensure_eq!(Icmpv4Header::parse(&corrupted).is_err(), true);
        Ok(())
    }

    #[test]
    fn error_quotes_header_and_eight_bytes() -> Result<()> {
        let message: Vec<u8> = error_message(ICMPV4_DESTINATION_UNREACHABLE, UNREACH_PORT, [0; 4], &datagram(100));
        crate::ensure_eq!(message.len(), ICMPV4_HEADER_SIZE + 20 + 8);
        let header: Icmpv4Header = Icmpv4Header::parse(&message)?;
        crate::ensure_eq!(header.report(1500), Some(Icmpv4Report::Hard(ECONNREFUSED)));
        Ok(())
    }

    #[test]
    fn errors_are_classified() -> Result<()> {
        let unreachable: Icmpv4Header = Icmpv4Header::new(ICMPV4_DESTINATION_UNREACHABLE, UNREACH_HOST, [0; 4]);
        crate::ensure_eq!(unreachable.report(1500), Some(Icmpv4Report::Soft(ENETUNREACH)));

        let exceeded: Icmpv4Header = Icmpv4Header::new(ICMPV4_TIME_EXCEEDED, 0, [0; 4]);
        crate::ensure_eq!(exceeded.report(1500), Some(Icmpv4Report::Soft(ENETUNREACH)));

        let needfrag: Icmpv4Header = Icmpv4Header::new(ICMPV4_DESTINATION_UNREACHABLE, UNREACH_NEEDFRAG, [0, 0, 5, 0]);
        crate::ensure_eq!(needfrag.report(1500), Some(Icmpv4Report::PathMtu(1280)));

        // No next-hop MTU: drop to the next plateau.
        let old: Icmpv4Header = Icmpv4Header::new(ICMPV4_DESTINATION_UNREACHABLE, UNREACH_NEEDFRAG, [0; 4]);
        crate::ensure_eq!(old.report(1500), Some(Icmpv4Report::PathMtu(1492)));

        // Never below the minimum.
        let tiny: Icmpv4Header = Icmpv4Header::new(ICMPV4_DESTINATION_UNREACHABLE, UNREACH_NEEDFRAG, [0, 0, 0, 10]);
        crate::ensure_eq!(tiny.report(1500), Some(Icmpv4Report::PathMtu(68)));
        Ok(())
    }

    #[test]
    fn no_errors_about_errors_or_broadcasts() -> Result<()> {
        let bytes: Vec<u8> = datagram(8);
        let header: Ipv4Header = Ipv4Header::parse(&bytes)?;
        crate::ensure_eq!(may_report(&header, &bytes[20..], false), true);
        crate::ensure_eq!(may_report(&header, &bytes[20..], true), false);

        let mut icmp: Ipv4Header = Ipv4Header::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            IpProtocol::ICMPv4 as u8,
            64,
        );
        icmp.set_total_length(28);
        let payload: [u8; 8] = [ICMPV4_DESTINATION_UNREACHABLE, 3, 0, 0, 0, 0, 0, 0];
        crate::ensure_eq!(may_report(&icmp, &payload, false), false);
        Ok(())
    }
}
