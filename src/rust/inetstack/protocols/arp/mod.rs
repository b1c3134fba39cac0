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
use ::std::{
    convert::TryFrom,
    net::Ipv4Addr,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const ARP_HTYPE_ETHER2: u16 = 1;
const ARP_HLEN_ETHER2: u8 = 6;
const ARP_PTYPE_IPV4: u16 = 0x800;
const ARP_PLEN_IPV4: u8 = 4;
pub const ARP_MESSAGE_SIZE: usize = 28;

//======================================================================================================================
// Enumerations
//======================================================================================================================

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

//======================================================================================================================
// Structures
//======================================================================================================================

///
/// # Protocol Data Unit (PDU) for ARP
///
/// Only Ethernet hardware addresses and IPv4 protocol addresses are supported, so the type and length fields are
/// implied.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArpHeader {
    operation: ArpOperation,
    sender_hardware_addr: MacAddress,
    sender_protocol_addr: Ipv4Addr,
    target_hardware_addr: MacAddress,
    target_protocol_addr: Ipv4Addr,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ArpHeader {
    /// Creates an ARP protocol data unit.
    pub fn new(
        op: ArpOperation,
        local_link_addr: MacAddress,
        local_ipv4_addr: Ipv4Addr,
        remote_link_addr: MacAddress,
        remote_ipv4_addr: Ipv4Addr,
    ) -> Self {
        Self {
            operation: op,
            sender_hardware_addr: local_link_addr,
            sender_protocol_addr: local_ipv4_addr,
            target_hardware_addr: remote_link_addr,
            target_protocol_addr: remote_ipv4_addr,
        }
    }

    /// Request asking who owns `target`.
    pub fn request(local_link_addr: MacAddress, local_ipv4_addr: Ipv4Addr, target: Ipv4Addr) -> Self {
        Self::new(ArpOperation::Request, local_link_addr, local_ipv4_addr, MacAddress::nil(), target)
    }

    /// Conflict check for a tentative address (RFC 5227): a request with an all-zero sender protocol address.
    pub fn conflict_check(local_link_addr: MacAddress, tentative: Ipv4Addr) -> Self {
        Self::request(local_link_addr, Ipv4Addr::UNSPECIFIED, tentative)
    }

    /// Announcement of an address that has just become preferred: a request for our own address.
    pub fn announce(local_link_addr: MacAddress, local_ipv4_addr: Ipv4Addr) -> Self {
        Self::request(local_link_addr, local_ipv4_addr, local_ipv4_addr)
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < ARP_MESSAGE_SIZE {
            return Err(Fail::new(EBADMSG, "ARP message too short"));
        }
        let hardware_type: u16 = u16::from_be_bytes([buf[0], buf[1]]);
        if hardware_type != ARP_HTYPE_ETHER2 {
            return Err(Fail::new(ENOTSUP, "unsupported HTYPE"));
        }
        let protocol_type: u16 = u16::from_be_bytes([buf[2], buf[3]]);
        if protocol_type != ARP_PTYPE_IPV4 {
            return Err(Fail::new(ENOTSUP, "unsupported PTYPE"));
        }
        if buf[4] != ARP_HLEN_ETHER2 {
            return Err(Fail::new(ENOTSUP, "unsupported HLEN"));
        }
        if buf[5] != ARP_PLEN_IPV4 {
            return Err(Fail::new(ENOTSUP, "unsupported PLEN"));
        }
        let operation: ArpOperation = ArpOperation::try_from(u16::from_be_bytes([buf[6], buf[7]]))?;
        Ok(Self {
            operation,
            sender_hardware_addr: MacAddress::from_bytes(&buf[8..14])?,
            sender_protocol_addr: Ipv4Addr::new(buf[14], buf[15], buf[16], buf[17]),
            target_hardware_addr: MacAddress::from_bytes(&buf[18..24])?,
            target_protocol_addr: Ipv4Addr::new(buf[24], buf[25], buf[26], buf[27]),
        })
    }

    /// Serializes the target ARP PDU.
    pub fn serialize(&self) -> [u8; ARP_MESSAGE_SIZE] {
        let mut buf: [u8; ARP_MESSAGE_SIZE] = [0; ARP_MESSAGE_SIZE];
        buf[0..2].copy_from_slice(&ARP_HTYPE_ETHER2.to_be_bytes());
        buf[2..4].copy_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
        buf[4] = ARP_HLEN_ETHER2;
        buf[5] = ARP_PLEN_IPV4;
        buf[6..8].copy_from_slice(&(self.operation as u16).to_be_bytes());
        buf[8..14].copy_from_slice(&self.sender_hardware_addr.octets());
        buf[14..18].copy_from_slice(&self.sender_protocol_addr.octets());
        buf[18..24].copy_from_slice(&self.target_hardware_addr.octets());
        buf[24..28].copy_from_slice(&self.target_protocol_addr.octets());
        buf
    }

    pub fn get_operation(&self) -> ArpOperation {
        self.operation
    }

    pub fn get_sender_hardware_addr(&self) -> MacAddress {
        self.sender_hardware_addr
    }

    pub fn get_sender_protocol_addr(&self) -> Ipv4Addr {
        self.sender_protocol_addr
    }

    pub fn get_destination_protocol_addr(&self) -> Ipv4Addr {
        self.target_protocol_addr
    }

    /// A conflict check carries no sender protocol address.
    pub fn is_conflict_check(&self) -> bool {
        self.operation == ArpOperation::Request && self.sender_protocol_addr.is_unspecified()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl TryFrom<u16> for ArpOperation {
    type Error = Fail;

    /// Attempts to convert a [u16] into a [ArpOperation].
    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ArpOperation::Request),
            2 => Ok(ArpOperation::Reply),
            _ => Err(Fail::new(ENOTSUP, "unsupported ARP operation")),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        ArpHeader,
        ArpOperation,
        ARP_MESSAGE_SIZE,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    #[test]
    fn conflict_check_has_no_sender_address() -> Result<()> {
        let mac: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        let bytes: [u8; ARP_MESSAGE_SIZE] = ArpHeader::conflict_check(mac, Ipv4Addr::new(192, 168, 1, 1)).serialize();
        let parsed: ArpHeader = ArpHeader::parse(&bytes)?;
        crate::ensure_eq!(parsed.is_conflict_check(), true);
        crate::ensure_eq!(parsed.get_operation(), ArpOperation::Request);
        crate::ensure_eq!(parsed.get_destination_protocol_addr(), Ipv4Addr::new(192, 168, 1, 1));
        crate::ensure_eq!(parsed.get_sender_hardware_addr(), mac);
        Ok(())
    }

    #[test]
    fn unknown_operation_is_rejected() -> Result<()> {
        let mac: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 1]);
        let mut bytes: [u8; ARP_MESSAGE_SIZE] = ArpHeader::announce(mac, Ipv4Addr::new(10, 0, 0, 1)).serialize();
        bytes[7] = 9;
        crate::ensure_eq!(ArpHeader::parse(&bytes).is_err(), true);
        crate::ensure_eq!(ArpHeader::parse(&bytes[..20]).is_err(), true);
        Ok(())
    }
}
