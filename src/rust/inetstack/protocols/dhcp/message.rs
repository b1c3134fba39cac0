// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::types::MacAddress,
};
use ::libc::EBADMSG;
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const DHCP_SERVER_PORT: u16 = 67;
pub const DHCP_CLIENT_PORT: u16 = 68;

pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;

/// Asks the server to broadcast its replies (RFC 2131 4.1).
pub const FLAG_BROADCAST: u16 = 0x8000;

pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Everything in front of the magic cookie.
const FIXED_SIZE: usize = 236;
/// BOOTP relay agents drop shorter messages (RFC 1542 2.1).
const MIN_MESSAGE_SIZE: usize = 300;

const SNAME_OFFSET: usize = 44;
const FILE_OFFSET: usize = 108;
const OPTIONS_OFFSET: usize = FIXED_SIZE + MAGIC_COOKIE.len();

pub const OPTION_PAD: u8 = 0;
pub const OPTION_SUBNET_MASK: u8 = 1;
pub const OPTION_ROUTER: u8 = 3;
pub const OPTION_DNS: u8 = 6;
pub const OPTION_HOST_NAME: u8 = 12;
pub const OPTION_DOMAIN_NAME: u8 = 15;
pub const OPTION_DEFAULT_TTL: u8 = 23;
pub const OPTION_INTERFACE_MTU: u8 = 26;
pub const OPTION_BROADCAST_ADDRESS: u8 = 28;
pub const OPTION_STATIC_ROUTE: u8 = 33;
pub const OPTION_REQUESTED_ADDRESS: u8 = 50;
pub const OPTION_LEASE_TIME: u8 = 51;
pub const OPTION_OVERLOAD: u8 = 52;
pub const OPTION_MESSAGE_TYPE: u8 = 53;
pub const OPTION_SERVER_ID: u8 = 54;
pub const OPTION_REQUEST_LIST: u8 = 55;
pub const OPTION_RENEWAL_TIME: u8 = 58;
pub const OPTION_REBINDING_TIME: u8 = 59;
pub const OPTION_END: u8 = 255;

/// Parameters a client asks for.
pub const REQUEST_LIST: [u8; 9] = [
    OPTION_SUBNET_MASK,
    OPTION_ROUTER,
    OPTION_DNS,
    OPTION_HOST_NAME,
    OPTION_DOMAIN_NAME,
    OPTION_BROADCAST_ADDRESS,
    OPTION_STATIC_ROUTE,
    OPTION_RENEWAL_TIME,
    OPTION_REBINDING_TIME,
];

/// Smallest MTU an interface may be configured with (RFC 2132 5.1).
const MIN_INTERFACE_MTU: u16 = 68;

const OVERLOAD_FILE: u8 = 1;
const OVERLOAD_SNAME: u8 = 2;

//======================================================================================================================
// Structures
//======================================================================================================================

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpMessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

/// Options a message carries. Options the client has no use for are skipped when parsing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DhcpOptions {
    pub message_type: Option<DhcpMessageType>,
    pub subnet_mask: Option<Ipv4Addr>,
    pub routers: Vec<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub host_name: Option<String>,
    pub domain_name: Option<String>,
    pub default_ttl: Option<u8>,
    pub interface_mtu: Option<u16>,
    pub broadcast_address: Option<Ipv4Addr>,
    pub requested_address: Option<Ipv4Addr>,
    /// Seconds.
    pub lease_time: Option<u32>,
    pub server_id: Option<Ipv4Addr>,
    pub renewal_time: Option<u32>,
    pub rebinding_time: Option<u32>,
    pub request_list: Vec<u8>,
}

/// A BOOTP message with DHCP options (RFC 2131 2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhcpMessage {
    op: u8,
    htype: u8,
    hlen: u8,
    xid: u32,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: MacAddress,
    options: DhcpOptions,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TryFrom<u8> for DhcpMessageType {
    type Error = Fail;

    fn try_from(value: u8) -> Result<Self, Fail> {
        match value {
            1 => Ok(DhcpMessageType::Discover),
            2 => Ok(DhcpMessageType::Offer),
            3 => Ok(DhcpMessageType::Request),
            4 => Ok(DhcpMessageType::Decline),
            5 => Ok(DhcpMessageType::Ack),
            6 => Ok(DhcpMessageType::Nak),
            7 => Ok(DhcpMessageType::Release),
            8 => Ok(DhcpMessageType::Inform),
            _ => Err(Fail::new(EBADMSG, "unknown DHCP message type")),
        }
    }
}

impl DhcpMessage {
    /// A client message from the interface with link address `chaddr`.
    pub fn new_request(message_type: DhcpMessageType, xid: u32, chaddr: MacAddress) -> Self {
        Self {
            op: BOOTREQUEST,
            htype: HTYPE_ETHERNET,
            hlen: 6,
            xid,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            options: DhcpOptions {
                message_type: Some(message_type),
                ..Default::default()
            },
        }
    }

    /// The server's answer to `request`.
    pub fn new_reply(message_type: DhcpMessageType, request: &DhcpMessage, yiaddr: Ipv4Addr) -> Self {
        Self {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: 6,
            xid: request.xid,
            flags: request.flags,
            ciaddr: request.ciaddr,
            yiaddr,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            options: DhcpOptions {
                message_type: Some(message_type),
                ..Default::default()
            },
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < OPTIONS_OFFSET {
            return Err(Fail::new(EBADMSG, "DHCP message too small"));
        }
        if buf[FIXED_SIZE..OPTIONS_OFFSET] != MAGIC_COOKIE {
            return Err(Fail::new(EBADMSG, "DHCP magic cookie mismatch"));
        }
        let address = |offset: usize| Ipv4Addr::new(buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]);
        let mut options: DhcpOptions = DhcpOptions::default();
        let overload: u8 = parse_options(&buf[OPTIONS_OFFSET..], &mut options)?;
        // The file field is read before sname (RFC 2131 4.1).
        if overload & OVERLOAD_FILE != 0 {
            parse_options(&buf[FILE_OFFSET..FIXED_SIZE], &mut options)?;
        }
        if overload & OVERLOAD_SNAME != 0 {
            parse_options(&buf[SNAME_OFFSET..FILE_OFFSET], &mut options)?;
        }
        Ok(Self {
            op: buf[0],
            htype: buf[1],
            hlen: buf[2],
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            flags: u16::from_be_bytes([buf[10], buf[11]]),
            ciaddr: address(12),
            yiaddr: address(16),
            siaddr: address(20),
            giaddr: address(24),
            chaddr: MacAddress::from_bytes(&buf[28..34])?,
            options,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = vec![0; OPTIONS_OFFSET];
        buf[0] = self.op;
        buf[1] = self.htype;
        buf[2] = self.hlen;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        buf[24..28].copy_from_slice(&self.giaddr.octets());
        buf[28..34].copy_from_slice(&self.chaddr.octets());
        buf[FIXED_SIZE..OPTIONS_OFFSET].copy_from_slice(&MAGIC_COOKIE);

        let options: &DhcpOptions = &self.options;
        if let Some(message_type) = options.message_type {
            push_option(&mut buf, OPTION_MESSAGE_TYPE, &[message_type as u8]);
        }
        if let Some(mask) = options.subnet_mask {
            push_option(&mut buf, OPTION_SUBNET_MASK, &mask.octets());
        }
        push_addresses(&mut buf, OPTION_ROUTER, &options.routers);
        push_addresses(&mut buf, OPTION_DNS, &options.dns_servers);
        if let Some(name) = &options.host_name {
            push_option(&mut buf, OPTION_HOST_NAME, name.as_bytes());
        }
        if let Some(name) = &options.domain_name {
            push_option(&mut buf, OPTION_DOMAIN_NAME, name.as_bytes());
        }
        if let Some(ttl) = options.default_ttl {
            push_option(&mut buf, OPTION_DEFAULT_TTL, &[ttl]);
        }
        if let Some(mtu) = options.interface_mtu {
            push_option(&mut buf, OPTION_INTERFACE_MTU, &mtu.to_be_bytes());
        }
        if let Some(addr) = options.broadcast_address {
            push_option(&mut buf, OPTION_BROADCAST_ADDRESS, &addr.octets());
        }
        if let Some(addr) = options.requested_address {
            push_option(&mut buf, OPTION_REQUESTED_ADDRESS, &addr.octets());
        }
        if let Some(secs) = options.lease_time {
            push_option(&mut buf, OPTION_LEASE_TIME, &secs.to_be_bytes());
        }
        if let Some(addr) = options.server_id {
            push_option(&mut buf, OPTION_SERVER_ID, &addr.octets());
        }
        if !options.request_list.is_empty() {
            push_option(&mut buf, OPTION_REQUEST_LIST, &options.request_list);
        }
        if let Some(secs) = options.renewal_time {
            push_option(&mut buf, OPTION_RENEWAL_TIME, &secs.to_be_bytes());
        }
        if let Some(secs) = options.rebinding_time {
            push_option(&mut buf, OPTION_REBINDING_TIME, &secs.to_be_bytes());
        }
        buf.push(OPTION_END);
        if buf.len() < MIN_MESSAGE_SIZE {
            buf.resize(MIN_MESSAGE_SIZE, OPTION_PAD);
        }
        buf
    }

    pub fn get_op(&self) -> u8 {
        self.op
    }

    /// Was this message sent by a server for an Ethernet client?
    pub fn is_ethernet_reply(&self) -> bool {
        self.op == BOOTREPLY && self.htype == HTYPE_ETHERNET && self.hlen == 6
    }

    pub fn get_xid(&self) -> u32 {
        self.xid
    }

    pub fn get_flags(&self) -> u16 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.flags = flags;
    }

    pub fn get_ciaddr(&self) -> Ipv4Addr {
        self.ciaddr
    }

    pub fn set_ciaddr(&mut self, addr: Ipv4Addr) {
        self.ciaddr = addr;
    }

    pub fn get_yiaddr(&self) -> Ipv4Addr {
        self.yiaddr
    }

    pub fn get_siaddr(&self) -> Ipv4Addr {
        self.siaddr
    }

    pub fn get_chaddr(&self) -> MacAddress {
        self.chaddr
    }

    pub fn get_message_type(&self) -> Option<DhcpMessageType> {
        self.options.message_type
    }

    pub fn options(&self) -> &DhcpOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut DhcpOptions {
        &mut self.options
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn push_option(buf: &mut Vec<u8>, code: u8, value: &[u8]) {
    // Longer values are split over repeated options (RFC 3396).
    for chunk in value.chunks(u8::MAX as usize) {
        buf.push(code);
        buf.push(chunk.len() as u8);
        buf.extend_from_slice(chunk);
    }
}

fn push_addresses(buf: &mut Vec<u8>, code: u8, addrs: &[Ipv4Addr]) {
    if addrs.is_empty() {
        return;
    }
    let value: Vec<u8> = addrs.iter().flat_map(|addr| addr.octets()).collect();
    push_option(buf, code, &value);
}

/// Decodes one option area into `options` and returns the value of the overload option, if it was there.
fn parse_options(mut area: &[u8], options: &mut DhcpOptions) -> Result<u8, Fail> {
    let mut overload: u8 = 0;
    while let Some((&code, rest)) = area.split_first() {
        match code {
            OPTION_PAD => {
                area = rest;
                continue;
            },
            OPTION_END => break,
            _ => (),
        }
        let (&len, rest) = rest
            .split_first()
            .ok_or_else(|| Fail::new(EBADMSG, "DHCP option without length"))?;
        if rest.len() < len as usize {
            return Err(Fail::new(EBADMSG, "DHCP option overruns its area"));
        }
        let (value, rest) = rest.split_at(len as usize);
        area = rest;
        match code {
            OPTION_MESSAGE_TYPE if len == 1 => options.message_type = DhcpMessageType::try_from(value[0]).ok(),
            OPTION_SUBNET_MASK => options.subnet_mask = to_address(value),
            OPTION_ROUTER => options.routers.extend(to_addresses(value)),
            OPTION_DNS => options.dns_servers.extend(to_addresses(value)),
            OPTION_HOST_NAME => options.host_name = Some(String::from_utf8_lossy(value).into_owned()),
            OPTION_DOMAIN_NAME => options.domain_name = Some(String::from_utf8_lossy(value).into_owned()),
            OPTION_DEFAULT_TTL if len == 1 && value[0] > 0 => options.default_ttl = Some(value[0]),
            OPTION_INTERFACE_MTU if len == 2 => {
                let mtu: u16 = u16::from_be_bytes([value[0], value[1]]);
                if mtu >= MIN_INTERFACE_MTU {
                    options.interface_mtu = Some(mtu);
                }
            },
            OPTION_BROADCAST_ADDRESS => options.broadcast_address = to_address(value),
            OPTION_REQUESTED_ADDRESS => options.requested_address = to_address(value),
            OPTION_LEASE_TIME => options.lease_time = to_seconds(value),
            OPTION_OVERLOAD if len == 1 => overload = value[0],
            OPTION_SERVER_ID => options.server_id = to_address(value),
            OPTION_REQUEST_LIST => options.request_list.extend_from_slice(value),
            OPTION_RENEWAL_TIME => options.renewal_time = to_seconds(value),
            OPTION_REBINDING_TIME => options.rebinding_time = to_seconds(value),
            _ => trace!("parse_options(): skipping option {:?}", code),
        }
    }
    Ok(overload)
}

fn to_address(value: &[u8]) -> Option<Ipv4Addr> {
    match value {
        [a, b, c, d] => Some(Ipv4Addr::new(*a, *b, *c, *d)),
        _ => None,
    }
}

fn to_addresses(value: &[u8]) -> impl Iterator<Item = Ipv4Addr> + '_ {
    value
        .chunks_exact(4)
        .map(|octets| Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
}

fn to_seconds(value: &[u8]) -> Option<u32> {
    match value {
        [a, b, c, d] => Some(u32::from_be_bytes([*a, *b, *c, *d])),
        _ => None,
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        DhcpMessage,
        DhcpMessageType,
        FILE_OFFSET,
        MIN_MESSAGE_SIZE,
        OPTIONS_OFFSET,
        OPTION_DNS,
        OPTION_END,
        OPTION_MESSAGE_TYPE,
        OPTION_OVERLOAD,
        OPTION_ROUTER,
        OPTION_SUBNET_MASK,
        REQUEST_LIST,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;
    use ::std::net::Ipv4Addr;

    const CLIENT_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

    #[test]
    fn request_is_padded_and_parses_back() -> Result<()> {
        let mut request: DhcpMessage = DhcpMessage::new_request(DhcpMessageType::Request, 0x1234_5678, CLIENT_MAC);
        request.options_mut().requested_address = Some(Ipv4Addr::new(10, 0, 0, 7));
        request.options_mut().server_id = Some(Ipv4Addr::new(10, 0, 0, 1));
        request.options_mut().request_list = REQUEST_LIST.to_vec();
        let bytes: Vec<u8> = request.serialize();
        crate::ensure_eq!(bytes.len(), MIN_MESSAGE_SIZE);

        let parsed: DhcpMessage = DhcpMessage::parse(&bytes)?;
        crate::ensure_eq!(parsed, request);
        crate::ensure_eq!(parsed.is_ethernet_reply(), false);
        Ok(())
    }

    #[test]
    fn malformed_messages_are_rejected() -> Result<()> {
        let bytes: Vec<u8> = DhcpMessage::new_request(DhcpMessageType::Discover, 1, CLIENT_MAC).serialize();
        crate::ensure_eq!(DhcpMessage::parse(&bytes[..OPTIONS_OFFSET - 1]).is_err(), true);

        let mut bad_cookie: Vec<u8> = bytes.clone();
        bad_cookie[OPTIONS_OFFSET - 1] ^= 0xff;
        crate::ensure_eq!(DhcpMessage::parse(&bad_cookie).is_err(), true);

        // An option whose length runs past the end of the message.
        let mut truncated: Vec<u8> = bytes[..OPTIONS_OFFSET].to_vec();
        truncated.extend_from_slice(&[OPTION_ROUTER, 8, 10, 0, 0, 1]);
        crate::ensure_eq!(DhcpMessage::parse(&truncated).is_err(), true);
        Ok(())
    }

    #[test]
    fn overloaded_file_field_carries_options() -> Result<()> {
        let request: DhcpMessage = DhcpMessage::new_request(DhcpMessageType::Discover, 7, CLIENT_MAC);
        let mut bytes: Vec<u8> = DhcpMessage::new_reply(DhcpMessageType::Offer, &request, Ipv4Addr::new(10, 0, 0, 7))
            .serialize();
        // Replace the options area with an overload option, and move the rest into the file field.
        bytes.truncate(OPTIONS_OFFSET);
        bytes.extend_from_slice(&[OPTION_MESSAGE_TYPE, 1, DhcpMessageType::Offer as u8, OPTION_OVERLOAD, 1, 1]);
        bytes.push(OPTION_END);
        let file: [u8; 17] = [
            OPTION_SUBNET_MASK,
            4,
            255,
            255,
            255,
            0,
            OPTION_DNS,
            8,
            10,
            0,
            0,
            53,
            10,
            0,
            1,
            53,
            OPTION_END,
        ];
        bytes[FILE_OFFSET..FILE_OFFSET + file.len()].copy_from_slice(&file);

        let offer: DhcpMessage = DhcpMessage::parse(&bytes)?;
        crate::ensure_eq!(offer.is_ethernet_reply(), true);
        crate::ensure_eq!(offer.get_message_type(), Some(DhcpMessageType::Offer));
        crate::ensure_eq!(offer.get_yiaddr(), Ipv4Addr::new(10, 0, 0, 7));
        crate::ensure_eq!(offer.options().subnet_mask, Some(Ipv4Addr::new(255, 255, 255, 0)));
        crate::ensure_eq!(
            offer.options().dns_servers,
            vec![Ipv4Addr::new(10, 0, 0, 53), Ipv4Addr::new(10, 0, 1, 53)]
        );
        Ok(())
    }
}
