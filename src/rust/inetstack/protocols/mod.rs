// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod address;
pub mod arp;
pub mod dhcp;
pub mod ethernet2;
pub mod icmpv4;
pub mod igmp;
pub mod ip;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::inetstack::{
    protocols::{
        ethernet2::ETHERNET2_HEADER_SIZE,
        ipv4::IPV4_HEADER_MAX_SIZE,
        tcp::MAX_TCP_HEADER_SIZE,
    },
    SocketDesc,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Headroom reserved in front of the payload of an output messenger for every header down to the link layer.
pub const MAX_HEADER_SIZE: usize = ETHERNET2_HEADER_SIZE + IPV4_HEADER_MAX_SIZE + MAX_TCP_HEADER_SIZE;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Receivers bound to the conduits of the stack's graph. Each one names the protocol state that handles a messenger
/// reaching its conduit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receiver {
    /// Ethernet II framing and ARP.
    Link,
    /// IPv4 header processing and routing.
    Inet,
    /// IPv4 fragments waiting for reassembly.
    Reassembly,
    Icmp,
    EchoRequest,
    EchoReply,
    /// ICMP error messages of the given type.
    IcmpError(u8),
    Igmp,
    /// Host membership of one group.
    Membership(Ipv4Addr),
    Udp,
    Tcp,
    /// Datagrams for a UDP port nobody is bound to.
    UdpUnreachable,
    /// Segments for a TCP port nobody is bound to.
    TcpUnbound,
    /// Datagrams for an upper-layer protocol the stack does not implement.
    ProtocolUnreachable,
    /// Leaf protocol of a UDP socket path.
    Datagram(SocketDesc),
    /// Leaf protocol of a TCP socket path.
    Stream(SocketDesc),
    /// Socket end of a path.
    Socket(SocketDesc),
}
