// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::types::MacAddress,
};
use ::libc::{
    EBADMSG,
    ENOTSUP,
};
use ::std::convert::TryFrom;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const ETHERNET2_HEADER_SIZE: usize = 14;
pub const MIN_PAYLOAD_SIZE: usize = 46;

//======================================================================================================================
// Structures
//======================================================================================================================

#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EtherType2 {
    Arp = 0x806,
    Ipv4 = 0x800,
    Ipv6 = 0x86dd,
}

#[derive(Clone, Debug)]
pub struct Ethernet2Header {
    // Bytes 0..6
    dst_addr: MacAddress,
    // Bytes 6..12
    src_addr: MacAddress,
    // Bytes 12..14
    ether_type: EtherType2,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Ethernet2Header {
    /// Creates a header for an Ethernet frame.
    pub fn new(dst_addr: MacAddress, src_addr: MacAddress, ether_type: EtherType2) -> Self {
        Self {
            dst_addr,
            src_addr,
            ether_type,
        }
    }

    /// Parses the link header at the front of `frame`.
    pub fn parse(frame: &[u8]) -> Result<Self, Fail> {
        if frame.len() < ETHERNET2_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "frame too small"));
        }
        let hdr_buf: &[u8] = &frame[..ETHERNET2_HEADER_SIZE];
        let dst_addr: MacAddress = MacAddress::from_bytes(&hdr_buf[0..6])?;
        let src_addr: MacAddress = MacAddress::from_bytes(&hdr_buf[6..12])?;
        let ether_type: EtherType2 = EtherType2::try_from(u16::from_be_bytes([hdr_buf[12], hdr_buf[13]]))?;
        Ok(Self {
            dst_addr,
            src_addr,
            ether_type,
        })
    }

    /// Builds a frame around `payload`, padding it to the minimum Ethernet payload size.
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut frame: Vec<u8> = Vec::with_capacity(ETHERNET2_HEADER_SIZE + payload.len().max(MIN_PAYLOAD_SIZE));
        frame.extend_from_slice(&self.dst_addr.octets());
        frame.extend_from_slice(&self.src_addr.octets());
        frame.extend_from_slice(&(self.ether_type as u16).to_be_bytes());
        frame.extend_from_slice(payload);
        if payload.len() < MIN_PAYLOAD_SIZE {
            frame.resize(ETHERNET2_HEADER_SIZE + MIN_PAYLOAD_SIZE, 0);
        }
        frame
    }

    pub fn dst_addr(&self) -> MacAddress {
        self.dst_addr
    }

    pub fn src_addr(&self) -> MacAddress {
        self.src_addr
    }

    pub fn ether_type(&self) -> EtherType2 {
        self.ether_type
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TryFrom<u16> for EtherType2 {
    type Error = Fail;

    fn try_from(n: u16) -> Result<Self, Fail> {
        match n {
            0x806 => Ok(EtherType2::Arp),
            0x800 => Ok(EtherType2::Ipv4),
            0x86dd => Ok(EtherType2::Ipv6),
            _ => Err(Fail::new(ENOTSUP, "unsupported ETHERTYPE")),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        EtherType2,
        Ethernet2Header,
        ETHERNET2_HEADER_SIZE,
        MIN_PAYLOAD_SIZE,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;

    #[test]
    fn short_payload_is_padded() -> Result<()> {
        let src: MacAddress = MacAddress::new([0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);
        let header: Ethernet2Header = Ethernet2Header::new(MacAddress::broadcast(), src, EtherType2::Arp);
        let frame: Vec<u8> = header.frame(&[1, 2, 3]);
        crate::ensure_eq!(frame.len(), ETHERNET2_HEADER_SIZE + MIN_PAYLOAD_SIZE);
        let parsed: Ethernet2Header = Ethernet2Header::parse(&frame)?;
        crate::ensure_eq!(parsed.src_addr(), src);
        crate::ensure_eq!(parsed.dst_addr(), MacAddress::broadcast());
        crate::ensure_eq!(parsed.ether_type(), EtherType2::Arp);
        Ok(())
    }

    #[test]
    fn unknown_ether_type_is_rejected() -> Result<()> {
        let mut frame: Vec<u8> = vec![0; 60];
        frame[12..14].copy_from_slice(&0x88ccu16.to_be_bytes());
        crate::ensure_eq!(Ethernet2Header::parse(&frame).is_err(), true);
        Ok(())
    }
}
