// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Engine,
    Interface,
    Timeout,
    FLAG_BROADCAST,
};
use crate::{
    inetstack::{
        conduit::messenger::Messenger,
        protocols::{
            address::{
                AddressEffect,
                AddressState,
                Inet4Address,
                Resolution,
            },
            arp::{
                ArpHeader,
                ArpOperation,
            },
            ethernet2::{
                EtherType2,
                Ethernet2Header,
                ETHERNET2_HEADER_SIZE,
            },
        },
    },
    runtime::{
        network::{
            consts::LOOPBACK_SCOPE,
            types::MacAddress,
        },
        timer::TimerId,
    },
};
use ::libc::EHOSTUNREACH;
use ::std::{
    net::Ipv4Addr,
    time::Duration,
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    pub(super) fn link_input(&mut self, m: &mut Messenger) -> bool {
        let header: Ethernet2Header = match Ethernet2Header::parse(m.data()) {
            Ok(header) => header,
            Err(e) => {
                debug!("link_input(): dropping frame ({:?})", e);
                return false;
            },
        };
        let scope: u32 = m.get_scope_id();
        let link_addr: MacAddress = match self.get_interface(scope) {
            Some(iface) => iface.link_addr,
            None => return false,
        };
        let dst: MacAddress = header.dst_addr();
        if scope != LOOPBACK_SCOPE && dst != link_addr && !dst.is_broadcast() && !dst.is_multicast() {
            trace!("link_input(): not for us (dst={:?})", dst);
            return false;
        }
        m.move_position(ETHERNET2_HEADER_SIZE as isize);
        match header.ether_type() {
            EtherType2::Arp => {
                self.arp_input(scope, link_addr, m);
                false
            },
            EtherType2::Ipv4 => {
                if dst.is_broadcast() || dst.is_multicast() {
                    m.set_flag(m.get_flag() | FLAG_BROADCAST);
                }
                true
            },
            EtherType2::Ipv6 => false,
        }
    }

    fn arp_input(&mut self, scope: u32, link_addr: MacAddress, m: &Messenger) {
        let arp: ArpHeader = match ArpHeader::parse(m.data()) {
            Ok(arp) => arp,
            Err(e) => {
                debug!("arp_input(): dropping message ({:?})", e);
                return;
            },
        };
        let sender_mac: MacAddress = arp.get_sender_hardware_addr();
        let sender_ip: Ipv4Addr = arp.get_sender_protocol_addr();
        let target_ip: Ipv4Addr = arp.get_destination_protocol_addr();
        if sender_mac == link_addr {
            return;
        }
        trace!("arp_input(): {:?} {:?} ({:?}) -> {:?}", arp.get_operation(), sender_ip, sender_mac, target_ip);

        // Someone else uses one of our addresses, or checks for a tentative one.
        let claimed: Option<Ipv4Addr> = match self.addresses.get(scope, sender_ip) {
            Some(entry) if entry.is_local() => Some(sender_ip),
            _ if arp.is_conflict_check() => match self.addresses.get(scope, target_ip) {
                Some(entry) if entry.get_state() == AddressState::Tentative => Some(target_ip),
                _ => None,
            },
            _ => None,
        };
        if let Some(addr) = claimed {
            let effects: Vec<AddressEffect> = match self.addresses.get_mut(scope, addr) {
                Some(entry) => entry.conflict(sender_mac),
                None => Vec::new(),
            };
            self.apply_address_effects(scope, addr, effects);
            return;
        }

        let target_is_ours: bool = self
            .addresses
            .get(scope, target_ip)
            .map_or(false, |entry| entry.is_preferred());
        let known: bool = self.addresses.get(scope, sender_ip).is_some();
        if !sender_ip.is_unspecified() && (target_is_ours || known) {
            let effects: Vec<AddressEffect> = self
                .addresses
                .intern(scope, sender_ip)
                .confirm(sender_mac, &self.config.inet);
            self.apply_address_effects(scope, sender_ip, effects);
        }

        if arp.get_operation() == ArpOperation::Request && target_is_ours {
            let reply: ArpHeader = ArpHeader::new(ArpOperation::Reply, link_addr, target_ip, sender_mac, sender_ip);
            self.transmit(scope, sender_mac, EtherType2::Arp, &reply.serialize());
        }
    }

    /// Frames an outgoing datagram. The messenger position is at the IP header.
    pub(super) fn link_output(&mut self, m: &mut Messenger) -> bool {
        let dst: Ipv4Addr = match m.get_remote() {
            Some(dst) => dst,
            None => {
                warn!("link_output(): datagram without destination");
                return false;
            },
        };
        let (scope, next_hop): (u32, Ipv4Addr) = match self.route_output(m, dst) {
            Ok(route) => route,
            Err(e) => {
                warn!("link_output(): {:?} ({:?})", dst, e);
                return false;
            },
        };
        if scope == LOOPBACK_SCOPE {
            self.transmit(scope, MacAddress::nil(), EtherType2::Ipv4, m.data());
            return true;
        }
        if dst.is_multicast() {
            self.transmit(scope, MacAddress::from_ipv4_multicast(dst), EtherType2::Ipv4, m.data());
            return true;
        }
        if self.addresses.is_broadcast(scope, dst) {
            self.transmit(scope, MacAddress::broadcast(), EtherType2::Ipv4, m.data());
            return true;
        }
        match self
            .addresses
            .intern(scope, next_hop)
            .resolve(m.clone(), &self.config.inet)
        {
            Resolution::Ready(link_addr, m) => self.transmit(scope, link_addr, EtherType2::Ipv4, m.data()),
            Resolution::Pending(effects) => self.apply_address_effects(scope, next_hop, effects),
        }
        true
    }

    /// Sends one frame through the interface at `scope`.
    pub(super) fn transmit(&mut self, scope: u32, dst: MacAddress, ether_type: EtherType2, payload: &[u8]) {
        let iface: &mut Interface = match self.interfaces.iter_mut().find(|iface| iface.scope == scope) {
            Some(iface) => iface,
            None => {
                warn!("transmit(): no interface at scope {:?}", scope);
                return;
            },
        };
        let frame: Vec<u8> = Ethernet2Header::new(dst, iface.link_addr, ether_type).frame(payload);
        if let Err(e) = iface.nic.transmit(frame) {
            warn!("transmit(): scope {:?} ({:?})", scope, e);
        }
    }

    /// Carries out what a transition of the address entry `addr` asked for.
    pub fn apply_address_effects(&mut self, scope: u32, addr: Ipv4Addr, effects: Vec<AddressEffect>) {
        if scope == LOOPBACK_SCOPE {
            return;
        }
        let link_addr: MacAddress = match self.get_interface(scope) {
            Some(iface) => iface.link_addr,
            None => return,
        };
        for effect in effects {
            match effect {
                AddressEffect::Solicit(target_mac) => {
                    let source: Ipv4Addr = self.addresses.select_source(scope).unwrap_or(Ipv4Addr::UNSPECIFIED);
                    let request: ArpHeader = ArpHeader::request(link_addr, source, addr);
                    let dst: MacAddress = if target_mac.is_nil() {
                        MacAddress::broadcast()
                    } else {
                        target_mac
                    };
                    self.transmit(scope, dst, EtherType2::Arp, &request.serialize());
                },
                AddressEffect::CheckConflict => {
                    let check: ArpHeader = ArpHeader::conflict_check(link_addr, addr);
                    self.transmit(scope, MacAddress::broadcast(), EtherType2::Arp, &check.serialize());
                },
                AddressEffect::Announce => {
                    let announce: ArpHeader = ArpHeader::announce(link_addr, addr);
                    self.transmit(scope, MacAddress::broadcast(), EtherType2::Arp, &announce.serialize());
                },
                AddressEffect::Release(m) => {
                    let dst: MacAddress = match self.addresses.get(scope, addr) {
                        Some(entry) => entry.get_link_addr(),
                        None => continue,
                    };
                    self.transmit(scope, dst, EtherType2::Ipv4, m.data());
                },
                AddressEffect::Unreachable(m) => self.report_error(m.data(), EHOSTUNREACH, 0),
                AddressEffect::Arm(delay) => {
                    let old: Option<TimerId> = self.addresses.get_mut(scope, addr).and_then(Inet4Address::take_timer);
                    self.cancel_timer(old);
                    let timer: TimerId = self.timers.schedule_after(delay, Timeout::Address(scope, addr));
                    if let Some(entry) = self.addresses.get_mut(scope, addr) {
                        entry.set_timer(Some(timer));
                    }
                },
                AddressEffect::Disarm => {
                    let old: Option<TimerId> = self.addresses.get_mut(scope, addr).and_then(Inet4Address::take_timer);
                    self.cancel_timer(old);
                },
                AddressEffect::Forget => {
                    if let Some(mut entry) = self.addresses.remove(scope, addr) {
                        self.cancel_timer(entry.take_timer());
                        trace!("apply_address_effects(): forgot {:?}", addr);
                    }
                },
            }
        }
    }

    /// Assigns `addr`/`prefix` to the interface at `scope`. Unless probing is disabled, the address starts out
    /// tentative.
    pub fn assign_address(&mut self, scope: u32, addr: Ipv4Addr, prefix: u8) {
        let link_addr: MacAddress = match self.get_interface(scope) {
            Some(iface) => iface.link_addr,
            None => return,
        };
        let delay: Duration = self.random_delay(Duration::from_secs(1));
        let effects: Vec<AddressEffect> = self
            .addresses
            .add_local(scope, addr, prefix, link_addr)
            .start(&self.config.inet, delay);
        self.apply_address_effects(scope, addr, effects);
    }

    /// Takes `addr` off the interface at `scope`.
    pub fn unassign_address(&mut self, scope: u32, addr: Ipv4Addr) {
        if !self.addresses.get(scope, addr).map_or(false, Inet4Address::is_local) {
            return;
        }
        if let Some(mut entry) = self.addresses.remove(scope, addr) {
            self.cancel_timer(entry.take_timer());
            debug!("unassign_address(): {:?} off scope {:?}", addr, scope);
        }
    }

    pub(super) fn address_expired(&mut self, scope: u32, addr: Ipv4Addr) {
        let jitter: Duration = self.random_delay(Duration::from_millis(999));
        let effects: Vec<AddressEffect> = match self.addresses.get_mut(scope, addr) {
            Some(entry) => {
                entry.set_timer(None);
                entry.expired(&self.config.inet, jitter)
            },
            None => return,
        };
        self.apply_address_effects(scope, addr, effects);
    }
}
