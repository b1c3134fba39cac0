// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Action,
    Echo,
    Engine,
    Group,
    Timeout,
    FLAG_BROADCAST,
};
use crate::{
    inetstack::{
        conduit::{
            messenger::Messenger,
            ConduitId,
        },
        protocols::{
            address::AddressEffect,
            ethernet2::ETHERNET2_HEADER_SIZE,
            icmpv4::{
                error_message,
                may_report,
                Icmpv4Header,
                Icmpv4Report,
                ICMPV4_DESTINATION_UNREACHABLE,
                ICMPV4_ECHO_REPLY,
                ICMPV4_ECHO_REQUEST,
                ICMPV4_HEADER_SIZE,
                ICMPV4_TIME_EXCEEDED,
                TIME_EXCEEDED_REASSEMBLY,
                UNREACH_PROTOCOL,
            },
            igmp::{
                IgmpHeader,
                MembershipEffect,
                ALL_ROUTERS,
                ALL_SYSTEMS,
                IGMP_LEAVE_GROUP,
                IGMP_V2_MEMBERSHIP_REPORT,
                ROUTER_ALERT,
            },
            ip::IpProtocol,
            ipv4::{
                fragment,
                Ipv4Header,
                Reassembly,
                ReassemblyKey,
                IPV4_HEADER_MIN_SIZE,
            },
            MAX_HEADER_SIZE,
        },
    },
    runtime::{
        network::consts::LOOPBACK_SCOPE,
        timer::TimerId,
    },
};
use ::std::{
    net::Ipv4Addr,
    time::Duration,
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    pub(super) fn inet_input(&mut self, m: &mut Messenger) -> bool {
        let header: Ipv4Header = match Ipv4Header::parse(m.data()) {
            Ok(header) => header,
            Err(e) => {
                debug!("inet_input(): dropping datagram ({:?})", e);
                return false;
            },
        };
        let scope: u32 = m.get_scope_id();
        let src: Ipv4Addr = header.get_src_addr();
        let dst: Ipv4Addr = header.get_dest_addr();
        if src.is_multicast() || src.is_broadcast() {
            debug!("inet_input(): bad source address {:?}", src);
            return false;
        }
        let broadcast: bool = dst.is_multicast() || self.addresses.is_broadcast(scope, dst);
        let acceptable: bool = scope == LOOPBACK_SCOPE
            || self.addresses.is_local(dst)
            || self.addresses.is_broadcast(scope, dst)
            || dst == ALL_SYSTEMS
            || self.is_member(dst);
        if !acceptable {
            trace!("inet_input(): not for us (dst={:?})", dst);
            return false;
        }
        // Drop link-layer padding.
        if m.truncate(header.get_total_length()).is_err() {
            return false;
        }
        if scope != LOOPBACK_SCOPE {
            self.intern_endpoints(scope, src, dst);
        }
        m.save_position();
        m.set_local(Some(dst));
        m.set_remote(Some(src));
        if broadcast {
            m.set_flag(m.get_flag() | FLAG_BROADCAST);
        }
        if header.is_fragment() {
            m.set_type(IpProtocol::FRAGMENT as u32);
            return true;
        }
        m.set_type(header.get_protocol() as u32);
        m.move_position(header.compute_size() as isize);
        true
    }

    /// Makes sure both ends of a received datagram have an entry in the address table. The messenger carries the
    /// raw addresses, which together with its scope name those entries.
    fn intern_endpoints(&mut self, scope: u32, src: Ipv4Addr, dst: Ipv4Addr) {
        if !src.is_unspecified() {
            let effects: Vec<AddressEffect> = self.addresses.intern_source(scope, src);
            self.apply_address_effects(scope, src, effects);
        }
        if self.addresses.get(scope, dst).is_none() && (dst.is_multicast() || self.addresses.is_broadcast(scope, dst)) {
            self.addresses.intern(scope, dst);
        }
    }

    /// Prepends the IP header, fragmenting the datagram if it does not fit the path MTU.
    pub(super) fn inet_output(&mut self, m: &mut Messenger) -> bool {
        let dst: Ipv4Addr = match m.get_remote() {
            Some(dst) => dst,
            None => {
                warn!("inet_output(): datagram without destination");
                return false;
            },
        };
        let scope: u32 = match self.route_output(m, dst) {
            Ok((scope, _)) => scope,
            Err(e) => {
                warn!("inet_output(): {:?} ({:?})", dst, e);
                return false;
            },
        };
        let src: Ipv4Addr = match m
            .get_local()
            .filter(|src| !src.is_unspecified())
            .or_else(|| self.source_on(scope, dst))
        {
            Some(src) => src,
            None => {
                warn!("inet_output(): no source address towards {:?}", dst);
                return false;
            },
        };
        m.set_scope_id(scope);
        m.set_local(Some(src));

        let protocol: u8 = m.get_type() as u8;
        let ttl: u8 = if dst.is_multicast() {
            1
        } else {
            self.config.inet.get_default_ttl()
        };
        let mut header: Ipv4Header = Ipv4Header::new(src, dst, protocol, ttl);
        if protocol == IpProtocol::IGMP as u8 {
            if let Err(e) = header.push_option(&ROUTER_ALERT) {
                warn!("inet_output(): {:?}", e);
            }
        }
        if protocol == IpProtocol::TCP as u8 {
            header.set_dont_fragment(true);
        }
        let id: u16 = self.next_ip_id();
        header.set_identification(id);

        let mtu: usize = self.get_mtu(dst);
        let size: usize = header.compute_size() + m.get_length();
        if size <= mtu {
            header.set_total_length(size);
            return match m.prepend(header.compute_size()) {
                Ok(buf) => {
                    header.serialize(buf);
                    true
                },
                Err(e) => {
                    warn!("inet_output(): {:?}", e);
                    false
                },
            };
        }

        match fragment(&header, m.data(), mtu) {
            Ok(fragments) => {
                debug!("inet_output(): {:?} bytes to {:?} in {:?} fragments", size, dst, fragments.len());
                for bytes in fragments {
                    let mut piece: Messenger = Messenger::new_output(&bytes, ETHERNET2_HEADER_SIZE);
                    piece.set_scope_id(scope);
                    piece.set_local(Some(src));
                    piece.set_remote(Some(dst));
                    self.actions.push_back(Action::Output(self.nodes.link, piece));
                }
            },
            Err(e) => warn!("inet_output(): dropping datagram to {:?} ({:?})", dst, e),
        }
        false
    }

    fn is_member(&self, group: Ipv4Addr) -> bool {
        group.is_multicast()
            && self
                .memberships
                .get(&group)
                .map_or(false, |g| g.membership.is_member())
    }

    //==================================================================================================================
    // Reassembly
    //==================================================================================================================

    /// Collects a fragment. The messenger position is still at the IP header.
    pub(super) fn reassembly_input(&mut self, m: &mut Messenger) -> bool {
        let datagram: &[u8] = m.data();
        let header: Ipv4Header = match Ipv4Header::parse(datagram) {
            Ok(header) => header,
            Err(_) => return false,
        };
        if !header.is_fragment() {
            return self.answer_unreachable(m, UNREACH_PROTOCOL);
        }
        let scope: u32 = m.get_scope_id();
        let key: ReassemblyKey = ReassemblyKey::of(&header);
        let timeout: Duration = self.config.inet.get_reassembly_timeout();
        let Engine {
            reassemblies, timers, ..
        } = self;
        let entry: &mut Reassembly = reassemblies.entry(key).or_insert_with(|| {
            let mut reassembly: Reassembly = Reassembly::new(scope);
            reassembly.set_timer(Some(timers.schedule_after(timeout, Timeout::Reassembly(key))));
            reassembly
        });
        let whole: Vec<u8> = match entry.insert(&header, &datagram[header.compute_size()..], datagram) {
            Some(whole) => whole,
            None => return false,
        };
        if let Some(reassembly) = self.reassemblies.remove(&key) {
            self.cancel_timer(reassembly.get_timer());
        }
        debug!("reassembly_input(): {:?} bytes from {:?}", whole.len(), key.src);
        let mut m2: Messenger = Messenger::new_input(whole, scope);
        m2.set_flag(m.get_flag());
        self.actions.push_back(Action::Input(m2));
        false
    }

    pub(super) fn reassembly_expired(&mut self, key: ReassemblyKey) {
        let reassembly: Reassembly = match self.reassemblies.remove(&key) {
            Some(reassembly) => reassembly,
            None => return,
        };
        warn!("reassembly_expired(): giving up on datagram {:?} from {:?}", key.identification, key.src);
        // Only the first fragment can be quoted, and only unicast datagrams are answered.
        let quote: &[u8] = match reassembly.get_quote() {
            Some(quote) => quote,
            None => return,
        };
        if !self.addresses.is_local(key.dst) || key.src.is_unspecified() || key.src.is_multicast() {
            return;
        }
        let message: Vec<u8> = error_message(ICMPV4_TIME_EXCEEDED, TIME_EXCEEDED_REASSEMBLY, [0; 4], quote);
        self.send_icmp(Some(key.dst), key.src, message);
    }

    //==================================================================================================================
    // ICMP
    //==================================================================================================================

    pub(super) fn send_icmp(&mut self, local: Option<Ipv4Addr>, remote: Ipv4Addr, message: Vec<u8>) {
        let mut m: Messenger = Messenger::new_output(&message, MAX_HEADER_SIZE);
        m.set_type(IpProtocol::ICMPv4 as u32);
        m.set_local(local);
        m.set_remote(Some(remote));
        self.actions.push_back(Action::Output(self.nodes.icmp, m));
    }

    /// Sends an echo request to `remote` and returns its identifier.
    pub fn send_echo(&mut self, remote: Ipv4Addr, payload: &[u8]) -> u16 {
        self.echo_id = self.echo_id.wrapping_add(1);
        let id: u16 = self.echo_id;
        let seq_num: u16 = 1;
        self.echoes.insert(
            id,
            Echo {
                remote,
                seq_num,
                replied: false,
            },
        );
        let message: Vec<u8> = Icmpv4Header::new_echo(ICMPV4_ECHO_REQUEST, id, seq_num).to_message(payload);
        self.send_icmp(None, remote, message);
        id
    }

    pub(super) fn icmp_input(&mut self, m: &mut Messenger) -> bool {
        match Icmpv4Header::parse(m.data()) {
            Ok(header) => {
                m.set_type(header.get_type() as u32);
                true
            },
            Err(e) => {
                debug!("icmp_input(): dropping message ({:?})", e);
                false
            },
        }
    }

    pub(super) fn echo_request(&mut self, m: &mut Messenger) -> bool {
        if m.get_flag() & FLAG_BROADCAST != 0 {
            return false;
        }
        let (local, remote): (Ipv4Addr, Ipv4Addr) = match (m.get_local(), m.get_remote()) {
            (Some(local), Some(remote)) => (local, remote),
            _ => return false,
        };
        let header: Icmpv4Header = match Icmpv4Header::parse(m.data()) {
            Ok(header) => header,
            Err(_) => return false,
        };
        trace!("echo_request(): {:?} id={:?} seq={:?}", remote, header.get_id(), header.get_seq_num());
        let reply: Vec<u8> = Icmpv4Header::new_echo(ICMPV4_ECHO_REPLY, header.get_id(), header.get_seq_num())
            .to_message(&m.data()[ICMPV4_HEADER_SIZE..]);
        self.send_icmp(Some(local), remote, reply);
        false
    }

    pub(super) fn echo_reply(&mut self, m: &mut Messenger) -> bool {
        let header: Icmpv4Header = match Icmpv4Header::parse(m.data()) {
            Ok(header) if header.get_type() == ICMPV4_ECHO_REPLY => header,
            _ => return false,
        };
        match self.echoes.get_mut(&header.get_id()) {
            Some(echo) if echo.seq_num == header.get_seq_num() && Some(echo.remote) == m.get_remote() => {
                echo.replied = true
            },
            _ => debug!("echo_reply(): unexpected reply id={:?}", header.get_id()),
        }
        false
    }

    /// Maps an ICMP error to the transport endpoint named by the datagram it quotes.
    pub(super) fn icmp_error(&mut self, m: &mut Messenger, icmp_type: u8) -> bool {
        let header: Icmpv4Header = match Icmpv4Header::parse(m.data()) {
            Ok(header) if header.get_type() == icmp_type => header,
            _ => return false,
        };
        let quote: &[u8] = &m.data()[ICMPV4_HEADER_SIZE..];
        if quote.len() < IPV4_HEADER_MIN_SIZE {
            return false;
        }
        let src: Ipv4Addr = Ipv4Addr::new(quote[12], quote[13], quote[14], quote[15]);
        let dst: Ipv4Addr = Ipv4Addr::new(quote[16], quote[17], quote[18], quote[19]);
        if !self.addresses.is_local(src) && !src.is_loopback() {
            debug!("icmp_error(): quoted datagram is not ours ({:?})", src);
            return false;
        }
        let report: Icmpv4Report = match header.report(self.get_mtu(dst)) {
            Some(report) => report,
            None => return false,
        };
        debug!("icmp_error(): {:?} about {:?} -> {:?}", report, src, dst);
        let mtu: usize = match report {
            Icmpv4Report::PathMtu(mtu) => {
                self.path_mtu.insert(dst, mtu);
                mtu
            },
            _ => 0,
        };
        self.report_error(quote, report.errno(), mtu);
        false
    }

    /// Queues an error for the socket that sent `datagram`. The datagram must hold the IP header and at least the
    /// ports of the transport header.
    pub(super) fn report_error(&mut self, datagram: &[u8], errno: i32, mtu: usize) {
        if datagram.len() < IPV4_HEADER_MIN_SIZE {
            return;
        }
        let hdr_size: usize = ((datagram[0] & 0xf) as usize) << 2;
        if hdr_size < IPV4_HEADER_MIN_SIZE || datagram.len() < hdr_size + 4 {
            return;
        }
        let protocol: u8 = datagram[9];
        let node: ConduitId = match IpProtocol::try_from(protocol) {
            Ok(IpProtocol::TCP) => self.nodes.tcp,
            Ok(IpProtocol::UDP) => self.nodes.udp,
            _ => return,
        };
        let ports: &[u8] = &datagram[hdr_size..hdr_size + 4];
        let mut m: Messenger = Messenger::new_error(errno);
        m.set_type(protocol as u32);
        m.set_local(Some(Ipv4Addr::new(datagram[12], datagram[13], datagram[14], datagram[15])));
        m.set_remote(Some(Ipv4Addr::new(datagram[16], datagram[17], datagram[18], datagram[19])));
        m.set_local_port(u16::from_be_bytes([ports[0], ports[1]]));
        m.set_remote_port(u16::from_be_bytes([ports[2], ports[3]]));
        m.set_flag(mtu as u32);
        self.actions.push_back(Action::Error(node, m));
    }

    /// Answers a datagram nobody takes with a destination unreachable message.
    pub(super) fn answer_unreachable(&mut self, m: &Messenger, code: u8) -> bool {
        let datagram: &[u8] = &m.chunk()[m.get_saved_position()..];
        let header: Ipv4Header = match Ipv4Header::parse(datagram) {
            Ok(header) => header,
            Err(_) => return false,
        };
        let payload: &[u8] = &datagram[header.compute_size()..];
        if !may_report(&header, payload, m.get_flag() & FLAG_BROADCAST != 0) {
            return false;
        }
        debug!("answer_unreachable(): code {:?} to {:?}", code, header.get_src_addr());
        let message: Vec<u8> = error_message(ICMPV4_DESTINATION_UNREACHABLE, code, [0; 4], datagram);
        self.send_icmp(Some(header.get_dest_addr()), header.get_src_addr(), message);
        false
    }

    //==================================================================================================================
    // IGMP
    //==================================================================================================================

    pub(super) fn igmp_input(&mut self, m: &mut Messenger) -> bool {
        let header: IgmpHeader = match IgmpHeader::parse(m.data()) {
            Ok(header) => header,
            Err(e) => {
                debug!("igmp_input(): dropping message ({:?})", e);
                return false;
            },
        };
        if header.get_group().is_unspecified() {
            // General query: every group answers.
            self.actions.push_back(Action::Broadcast(self.nodes.igmp_mux, m.clone()));
            return false;
        }
        m.set_local(Some(header.get_group()));
        true
    }

    pub(super) fn membership_input(&mut self, m: &mut Messenger, group: Ipv4Addr) -> bool {
        let header: IgmpHeader = match IgmpHeader::parse(m.data()) {
            Ok(header) => header,
            Err(_) => return false,
        };
        if !header.get_group().is_unspecified() && header.get_group() != group {
            return false;
        }
        let max_resp_time: Duration = header.get_max_resp_time(self.config.inet.get_query_response_interval());
        let delay: Duration = self.random_delay(max_resp_time);
        let effects: Vec<MembershipEffect> = match self.memberships.get_mut(&group) {
            Some(g) => g.membership.input(&header, delay, max_resp_time),
            None => return false,
        };
        self.apply_membership_effects(group, effects);
        false
    }

    pub fn apply_membership_effects(&mut self, group: Ipv4Addr, effects: Vec<MembershipEffect>) {
        for effect in effects {
            match effect {
                MembershipEffect::Report => {
                    // The all-systems group is never reported (RFC 2236).
                    if group != ALL_SYSTEMS {
                        self.send_igmp(group, IgmpHeader::new(IGMP_V2_MEMBERSHIP_REPORT, 0, group));
                    }
                },
                MembershipEffect::Leave => self.send_igmp(ALL_ROUTERS, IgmpHeader::new(IGMP_LEAVE_GROUP, 0, group)),
                MembershipEffect::Arm(delay) => {
                    let old: Option<TimerId> = self.memberships.get_mut(&group).and_then(|g| g.membership.take_timer());
                    self.cancel_timer(old);
                    let timer: TimerId = self.timers.schedule_after(delay, Timeout::Membership(group));
                    if let Some(g) = self.memberships.get_mut(&group) {
                        g.membership.set_timer(Some(timer));
                    }
                },
                MembershipEffect::Disarm => {
                    let old: Option<TimerId> = self.memberships.get_mut(&group).and_then(|g| g.membership.take_timer());
                    self.cancel_timer(old);
                },
            }
        }
    }

    pub(super) fn membership_expired(&mut self, group: Ipv4Addr) {
        let effects: Vec<MembershipEffect> = match self.memberships.get_mut(&group) {
            Some(g) => {
                g.membership.set_timer(None);
                g.membership.expired()
            },
            None => return,
        };
        self.apply_membership_effects(group, effects);
    }

    fn send_igmp(&mut self, dst: Ipv4Addr, header: IgmpHeader) {
        let mut m: Messenger = Messenger::new_output(&header.serialize(), MAX_HEADER_SIZE);
        m.set_type(IpProtocol::IGMP as u32);
        m.set_remote(Some(dst));
        self.actions.push_back(Action::Output(self.nodes.igmp, m));
    }

    /// Takes a group the host has no member left in out of the table.
    pub fn forget_group(&mut self, group: Ipv4Addr) -> Option<Group> {
        match self.memberships.get(&group) {
            Some(g) if !g.membership.is_member() => self.memberships.remove(&group),
            _ => None,
        }
    }
}
