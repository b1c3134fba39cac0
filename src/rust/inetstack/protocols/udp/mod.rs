// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod receiver;

//==============================================================================
// Exports
//==============================================================================

pub use self::receiver::{
    DatagramReceiver,
    DatagramRecord,
};

//==============================================================================
// Imports
//==============================================================================

use crate::{
    inetstack::{
        conduit::messenger::{
            fold_checksum,
            sum_words,
        },
        protocols::{
            ip::IpProtocol,
            ipv4::pseudo_header_sum,
        },
    },
    runtime::fail::Fail,
};
use ::libc::EBADMSG;
use ::std::net::Ipv4Addr;

//==============================================================================
// Constants
//==============================================================================

/// Size of a UDP header (in bytes).
pub const UDP_HEADER_SIZE: usize = 8;

//==============================================================================
// Structures
//==============================================================================

/// UDP Datagram Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHeader {
    /// Port used on sender side (optional).
    src_port: u16,
    /// Port used receiver side.
    dest_port: u16,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for UDP Datagram Headers
impl UdpHeader {
    /// Creates a UDP header.
    pub fn new(src_port: u16, dest_port: u16) -> Self {
        Self { src_port, dest_port }
    }

    /// Returns the source port stored in the target UDP header.
    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    /// Returns the destination port stored in the target UDP header.
    pub fn dest_port(&self) -> u16 {
        self.dest_port
    }

    /// Parses the datagram in `buf`, which spans exactly the IP payload. A zero checksum means the sender did not
    /// compute one.
    pub fn parse(src: Ipv4Addr, dst: Ipv4Addr, buf: &[u8], checksum_offload: bool) -> Result<Self, Fail> {
        // Malformed header.
        if buf.len() < UDP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "UDP segment too small"));
        }

        let src_port: u16 = u16::from_be_bytes([buf[0], buf[1]]);
        let dest_port: u16 = u16::from_be_bytes([buf[2], buf[3]]);
        let length: usize = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if length < UDP_HEADER_SIZE || length > buf.len() {
            return Err(Fail::new(EBADMSG, "UDP length mismatch"));
        }

        if !checksum_offload {
            let checksum: u16 = u16::from_be_bytes([buf[6], buf[7]]);
            if checksum != 0 && Self::checksum(src, dst, &buf[..length]) != 0 {
                return Err(Fail::new(EBADMSG, "UDP checksum mismatch"));
            }
        }

        Ok(Self::new(src_port, dest_port))
    }

    /// Serializes the target UDP header into the first bytes of `buf`. `data` is the payload that follows it.
    pub fn serialize(&self, buf: &mut [u8], src: Ipv4Addr, dst: Ipv4Addr, data: &[u8], checksum_offload: bool) {
        let buf: &mut [u8] = &mut buf[..UDP_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        buf[4..6].copy_from_slice(&((UDP_HEADER_SIZE + data.len()) as u16).to_be_bytes());
        buf[6..8].copy_from_slice(&[0, 0]);
        let checksum: u16 = if checksum_offload {
            0
        } else {
            let sum: u32 = pseudo_header_sum(src, dst, IpProtocol::UDP as u8, UDP_HEADER_SIZE + data.len());
            match fold_checksum(sum_words(data, sum_words(buf, sum))) {
                // An all-zero result goes on the wire as all ones (RFC 768).
                0 => 0xffff,
                checksum => checksum,
            }
        };
        buf[6..8].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Verifies a whole datagram. Returns zero when the checksum field is correct.
    fn checksum(src: Ipv4Addr, dst: Ipv4Addr, datagram: &[u8]) -> u16 {
        let sum: u32 = pseudo_header_sum(src, dst, IpProtocol::UDP as u8, datagram.len());
        fold_checksum(sum_words(datagram, sum))
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        UdpHeader,
        UDP_HEADER_SIZE,
    };
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    fn datagram(data: &[u8]) -> Vec<u8> {
        let mut buf: Vec<u8> = vec![0; UDP_HEADER_SIZE + data.len()];
        buf[UDP_HEADER_SIZE..].copy_from_slice(data);
        UdpHeader::new(5000, 53).serialize(&mut buf, SRC, DST, data, false);
        buf
    }

    #[test]
    fn checksum_is_verified() -> Result<()> {
        let buf: Vec<u8> = datagram(b"odd");
        let header: UdpHeader = UdpHeader::parse(SRC, DST, &buf, false)?;
        crate::ensure_eq!(header.src_port(), 5000);
        crate::ensure_eq!(header.dest_port(), 53);

        // The pseudo header is covered too.
        crate::ensure_eq!(UdpHeader::parse(SRC, Ipv4Addr::new(192, 168, 1, 3), &buf, false).is_err(), true);
        // Unless the hardware already checked it.
        crate::ensure_eq!(UdpHeader::parse(SRC, Ipv4Addr::new(192, 168, 1, 3), &buf, true).is_ok(), true);
        Ok(())
    }

    #[test]
    fn zero_checksum_is_not_verified() -> Result<()> {
        let mut buf: Vec<u8> = datagram(b"payload");
        buf[6] = 0;
        buf[7] = 0;
        buf[8] ^= 0xff;
        crate::ensure_eq!(UdpHeader::parse(SRC, DST, &buf, false).is_ok(), true);
        Ok(())
    }

    #[test]
    fn bad_length_is_rejected() -> Result<()> {
        let mut buf: Vec<u8> = datagram(b"payload");
        buf[5] = 200;
        crate::ensure_eq!(UdpHeader::parse(SRC, DST, &buf, true).is_err(), true);
        crate::ensure_eq!(UdpHeader::parse(SRC, DST, &buf[..4], true).is_err(), true);
        Ok(())
    }
}
