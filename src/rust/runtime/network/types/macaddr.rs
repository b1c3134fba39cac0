// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::{
    EBADMSG,
    EINVAL,
};
use ::std::{
    fmt,
    net::Ipv4Addr,
    str::FromStr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// MAC Address
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct MacAddress(eui48::MacAddress);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MacAddress {
    pub const fn new(bytes: [u8; 6]) -> Self {
        MacAddress(eui48::MacAddress::new(bytes))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Fail> {
        match eui48::MacAddress::from_bytes(bytes) {
            Ok(addr) => Ok(Self(addr)),
            Err(_) => Err(Fail::new(EBADMSG, "malformed MAC address")),
        }
    }

    /// Maps an IPv4 multicast group onto its Ethernet group address (RFC 1112, section 6.4).
    pub fn from_ipv4_multicast(group: Ipv4Addr) -> Self {
        let octets: [u8; 4] = group.octets();
        Self::new([0x01, 0x00, 0x5e, octets[1] & 0x7f, octets[2], octets[3]])
    }

    /// Returns the array of bytes composing the target [MacAddress].
    pub fn octets(&self) -> [u8; 6] {
        self.0.to_array()
    }

    pub fn broadcast() -> MacAddress {
        MacAddress(eui48::MacAddress::broadcast())
    }

    pub fn nil() -> MacAddress {
        MacAddress(eui48::MacAddress::nil())
    }

    pub fn is_nil(self) -> bool {
        self.0.is_nil()
    }

    pub fn is_broadcast(self) -> bool {
        self.0.is_broadcast()
    }

    pub fn is_multicast(self) -> bool {
        self.0.is_multicast()
    }

    pub fn is_unicast(self) -> bool {
        self.0.is_unicast()
    }

    pub fn to_canonical(self) -> String {
        self.0.to_canonical()
    }

    pub fn parse_canonical_str(canonical_macaddr_string: &str) -> Result<Self, Fail> {
        match eui48::MacAddress::parse_str(canonical_macaddr_string) {
            Ok(addr) => Ok(Self(addr)),
            Err(_) => Err(Fail::new(EINVAL, "failed to parse MAC Address")),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.to_canonical())
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddress({})", &self.to_canonical())
    }
}

impl FromStr for MacAddress {
    type Err = Fail;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddress::parse_canonical_str(s)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::MacAddress;
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    #[test]
    fn maps_multicast_group() -> Result<()> {
        let mac: MacAddress = MacAddress::from_ipv4_multicast(Ipv4Addr::new(239, 129, 2, 3));
        crate::ensure_eq!(mac.octets(), [0x01, 0x00, 0x5e, 0x01, 0x02, 0x03]);
        crate::ensure_eq!(mac.is_multicast(), true);
        Ok(())
    }

    #[test]
    fn parses_canonical_string() -> Result<()> {
        let mac: MacAddress = match "12-23-45-67-89-ab".parse::<MacAddress>() {
            Ok(mac) => mac,
            Err(e) => anyhow::bail!("failed to parse MAC address: {:?}", e),
        };
        crate::ensure_eq!(mac.octets(), [0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);
        crate::ensure_eq!(MacAddress::from_bytes(&[1, 2, 3]).is_err(), true);
        Ok(())
    }
}
