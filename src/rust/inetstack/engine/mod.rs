// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Protocol state of a stack and the [Dispatcher] that runs it.
//!
//! The [ConduitGraph] only knows which receiver sits at which conduit. The [Engine] owns everything those receivers
//! stand for: interfaces, the address table, sockets, timers and the per-protocol tables. Work that must go back
//! through the graph (an output from inside an input, a reassembled datagram, a path to install) is queued as an
//! [Action] and carried out by the owning stack once the current traversal returns.

mod dhcp;
mod inet;
mod link;
mod transport;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        conduit::{
            messenger::{
                Messenger,
                Operation,
            },
            Accessor,
            ConduitGraph,
            ConduitId,
            Dispatcher,
            MuxKey,
            Template,
            DEFAULT_KEY,
        },
        protocols::{
            icmpv4::{
                ICMPV4_DESTINATION_UNREACHABLE,
                ICMPV4_ECHO_REPLY,
                ICMPV4_ECHO_REQUEST,
                ICMPV4_PARAMETER_PROBLEM,
                ICMPV4_SOURCE_QUENCH,
                ICMPV4_TIME_EXCEEDED,
                UNREACH_PORT,
                UNREACH_PROTOCOL,
            },
            dhcp::{
                DhcpClient,
                Lease,
            },
            igmp::Membership,
            ip::IpProtocol,
            ipv4::{
                Reassembly,
                ReassemblyKey,
                IPV4_HEADER_MIN_SIZE,
            },
            address::AddressTable,
            tcp::{
                IsnGenerator,
                SeqNumber,
                Stream,
                StreamHost,
                StreamSignal,
                StreamTimer,
                MIN_TCP_HEADER_SIZE,
            },
            Receiver,
        },
        socket::Socket,
        SocketDesc,
    },
    runtime::{
        fail::Fail,
        network::{
            config::StackConfig,
            consts::{
                DEFAULT_MTU,
                LOOPBACK_SCOPE,
                MIN_MSS,
            },
            ephemeral::EphemeralPorts,
            types::MacAddress,
            NetworkInterface,
        },
        timer::{
            TimerId,
            TimerService,
        },
    },
};
use ::libc::{
    EBADF,
    ENETUNREACH,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::slab::Slab;
use ::std::{
    collections::{
        HashMap,
        VecDeque,
    },
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Messenger flag set on datagrams received as link-layer or IP broadcast or multicast.
pub const FLAG_BROADCAST: u32 = 0x1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Conduits of the graph every stack is built with.
#[derive(Clone, Copy, Debug)]
pub struct Nodes {
    pub link: ConduitId,
    pub inet: ConduitId,
    pub proto_mux: ConduitId,
    pub reassembly: ConduitId,
    pub icmp: ConduitId,
    pub icmp_mux: ConduitId,
    pub igmp: ConduitId,
    pub igmp_mux: ConduitId,
    pub udp: ConduitId,
    pub udp_mux: ConduitId,
    pub tcp: ConduitId,
    pub tcp_mux: ConduitId,
}

/// Events scheduled on the stack's timer service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Stream(SocketDesc, StreamTimer),
    Address(u32, Ipv4Addr),
    Reassembly(ReassemblyKey),
    Membership(Ipv4Addr),
    /// DHCP client of the interface at the given scope.
    Dhcp(u32),
}

/// Work queued by a receiver for the stack to carry out after the current traversal.
#[derive(Debug)]
pub enum Action {
    /// Send a messenger down from the given conduit.
    Output(ConduitId, Messenger),
    /// Feed a whole IP datagram back into the IP layer.
    Input(Messenger),
    /// Deliver an error to the transport endpoint it names, starting below the given protocol.
    Error(ConduitId, Messenger),
    /// Visit every child of a mux.
    Broadcast(ConduitId, Messenger),
    /// Install the path of a connection spawned by a listener.
    Install(SocketDesc),
    Uninstall(SocketDesc),
    /// Hand a segment to the TCP demultiplexer again.
    Redeliver(Messenger),
    /// Free a socket once the transport and the application are both done with it.
    Release(SocketDesc),
    /// Take down a DHCP lease on the given interface, after whatever was queued ahead of it went out.
    Unconfigure(u32, Lease),
}

pub struct Interface {
    pub scope: u32,
    pub nic: Box<dyn NetworkInterface>,
    pub link_addr: MacAddress,
    pub mtu: usize,
}

/// Host membership of one multicast group.
pub struct Group {
    pub membership: Membership,
    /// Membership leaf under the IGMP mux.
    pub conduit: Option<ConduitId>,
}

/// An outstanding ICMP echo request.
#[derive(Clone, Copy, Debug)]
pub struct Echo {
    pub remote: Ipv4Addr,
    pub seq_num: u16,
    pub replied: bool,
}

pub struct Engine {
    pub(super) config: StackConfig,
    pub(super) nodes: Nodes,
    pub(super) timers: TimerService<Timeout>,
    pub(super) interfaces: Vec<Interface>,
    pub(super) gateway: Option<Ipv4Addr>,
    pub(super) addresses: AddressTable,
    pub(super) sockets: Slab<Socket>,
    pub(super) tcp_ports: EphemeralPorts,
    pub(super) udp_ports: EphemeralPorts,
    isn: IsnGenerator,
    ip_id: u16,
    reassemblies: HashMap<ReassemblyKey, Reassembly>,
    pub(super) memberships: HashMap<Ipv4Addr, Group>,
    path_mtu: HashMap<Ipv4Addr, usize>,
    pub(super) echoes: HashMap<u16, Echo>,
    pub(super) echo_id: u16,
    /// DHCP clients by interface scope.
    pub(super) dhcp: HashMap<u32, DhcpClient>,
    /// Socket bound to the DHCP client port, shared by every client.
    pub(super) dhcp_socket: Option<SocketDesc>,
    rng: SmallRng,
    pub(super) actions: VecDeque<Action>,
}

/// [StreamHost] of one control block for the duration of a call into it.
struct Host<'a> {
    desc: SocketDesc,
    /// Conduit the control block's segments are sent from.
    origin: ConduitId,
    timers: &'a mut TimerService<Timeout>,
    actions: &'a mut VecDeque<Action>,
    isn: &'a IsnGenerator,
    signals: Vec<StreamSignal>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Nodes {
    /// Builds the fixed part of the graph: link, IP, and the protocols on top of it.
    pub fn build(graph: &mut ConduitGraph<Receiver>) -> Self {
        let link: ConduitId = graph.add_protocol("ethernet2", Some(Receiver::Link));
        let inet: ConduitId = graph.add_protocol("ipv4", Some(Receiver::Inet));
        graph.connect_ba(link, inet, DEFAULT_KEY);
        let proto_mux: ConduitId =
            graph.add_mux("ipv4 protocol", Accessor::Type, None, Some(Receiver::ProtocolUnreachable));
        graph.connect_ba(inet, proto_mux, DEFAULT_KEY);

        let reassembly: ConduitId = graph.add_protocol("ipv4 reassembly", Some(Receiver::Reassembly));
        graph.connect_ab(reassembly, proto_mux, IpProtocol::FRAGMENT as MuxKey);

        let icmp: ConduitId = graph.add_protocol("icmpv4", Some(Receiver::Icmp));
        graph.connect_ab(icmp, proto_mux, IpProtocol::ICMPv4 as MuxKey);
        let icmp_mux: ConduitId = graph.add_mux("icmpv4 type", Accessor::Type, None, None);
        graph.connect_ba(icmp, icmp_mux, DEFAULT_KEY);
        let echo_request: ConduitId = graph.add_protocol("icmpv4 echo", Some(Receiver::EchoRequest));
        graph.connect_ab(echo_request, icmp_mux, ICMPV4_ECHO_REQUEST as MuxKey);
        let echo_reply: ConduitId = graph.add_protocol("icmpv4 echo reply", Some(Receiver::EchoReply));
        graph.connect_ab(echo_reply, icmp_mux, ICMPV4_ECHO_REPLY as MuxKey);
        for icmp_type in [
            ICMPV4_DESTINATION_UNREACHABLE,
            ICMPV4_SOURCE_QUENCH,
            ICMPV4_TIME_EXCEEDED,
            ICMPV4_PARAMETER_PROBLEM,
        ] {
            let error: ConduitId = graph.add_protocol("icmpv4 error", Some(Receiver::IcmpError(icmp_type)));
            graph.connect_ab(error, icmp_mux, icmp_type as MuxKey);
        }

        let igmp: ConduitId = graph.add_protocol("igmp", Some(Receiver::Igmp));
        graph.connect_ab(igmp, proto_mux, IpProtocol::IGMP as MuxKey);
        let igmp_mux: ConduitId = graph.add_mux("igmp group", Accessor::LocalAddress, None, None);
        graph.connect_ba(igmp, igmp_mux, DEFAULT_KEY);

        // Socket paths: local port, then remote address, then remote port. Zero keys are wildcards.
        let path: Template = Template::Mux(
            Accessor::RemoteAddress,
            Box::new(Template::Mux(Accessor::RemotePort, Box::new(Template::Protocol))),
        );

        let udp: ConduitId = graph.add_protocol("udp", Some(Receiver::Udp));
        graph.connect_ab(udp, proto_mux, IpProtocol::UDP as MuxKey);
        let udp_mux: ConduitId = graph.add_mux(
            "udp port",
            Accessor::LocalPort,
            Some(path.clone()),
            Some(Receiver::UdpUnreachable),
        );
        graph.connect_ba(udp, udp_mux, DEFAULT_KEY);

        let tcp: ConduitId = graph.add_protocol("tcp", Some(Receiver::Tcp));
        graph.connect_ab(tcp, proto_mux, IpProtocol::TCP as MuxKey);
        let tcp_mux: ConduitId = graph.add_mux("tcp port", Accessor::LocalPort, Some(path), Some(Receiver::TcpUnbound));
        graph.connect_ba(tcp, tcp_mux, DEFAULT_KEY);

        Self {
            link,
            inet,
            proto_mux,
            reassembly,
            icmp,
            icmp_mux,
            igmp,
            igmp_mux,
            udp,
            udp_mux,
            tcp,
            tcp_mux,
        }
    }
}

impl Engine {
    pub fn new(config: StackConfig, nodes: Nodes, now: Instant, seed: u64) -> Self {
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        let isn: IsnGenerator = IsnGenerator::new(rng.gen::<u32>(), now);
        let tcp_ports: EphemeralPorts = EphemeralPorts::new(rng.gen::<u64>());
        let udp_ports: EphemeralPorts = EphemeralPorts::new(rng.gen::<u64>());
        let ip_id: u16 = rng.gen::<u16>();
        Self {
            config,
            nodes,
            timers: TimerService::new(now),
            interfaces: Vec::new(),
            gateway: None,
            addresses: AddressTable::new(),
            sockets: Slab::new(),
            tcp_ports,
            udp_ports,
            isn,
            ip_id,
            reassemblies: HashMap::new(),
            memberships: HashMap::new(),
            path_mtu: HashMap::new(),
            echoes: HashMap::new(),
            echo_id: 0,
            dhcp: HashMap::new(),
            dhcp_socket: None,
            rng,
            actions: VecDeque::new(),
        }
    }

    pub fn get_socket(&self, desc: SocketDesc) -> Result<&Socket, Fail> {
        self.sockets
            .get(usize::from(desc))
            .ok_or_else(|| Fail::new(EBADF, "bad socket descriptor"))
    }

    pub fn get_socket_mut(&mut self, desc: SocketDesc) -> Result<&mut Socket, Fail> {
        self.sockets
            .get_mut(usize::from(desc))
            .ok_or_else(|| Fail::new(EBADF, "bad socket descriptor"))
    }

    pub fn get_interface(&self, scope: u32) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.scope == scope)
    }

    /// Picks the interface and next hop for `dst`. Local addresses go through loopback.
    pub fn route(&self, dst: Ipv4Addr) -> Result<(u32, Ipv4Addr), Fail> {
        if dst.is_loopback() || self.addresses.is_local(dst) {
            return Ok((LOOPBACK_SCOPE, dst));
        }
        let scopes: Vec<u32> = self
            .interfaces
            .iter()
            .map(|iface| iface.scope)
            .filter(|scope| *scope != LOOPBACK_SCOPE)
            .collect();
        if dst.is_multicast() || dst.is_broadcast() {
            if let Some(scope) = scopes.first() {
                return Ok((*scope, dst));
            }
        }
        for scope in &scopes {
            if self.addresses.locals(*scope).any(|a| a.is_on_link(dst)) {
                return Ok((*scope, dst));
            }
        }
        if let Some(gateway) = self.gateway {
            for scope in &scopes {
                if self.addresses.locals(*scope).any(|a| a.is_on_link(gateway)) {
                    return Ok((*scope, gateway));
                }
            }
        }
        Err(Fail::new(ENETUNREACH, "no route to host"))
    }

    /// Like [Engine::route], except that a limited broadcast leaves through the interface `m` names, if any.
    pub fn route_output(&self, m: &Messenger, dst: Ipv4Addr) -> Result<(u32, Ipv4Addr), Fail> {
        let scope: u32 = m.get_scope_id();
        if dst.is_broadcast() && scope != LOOPBACK_SCOPE && self.get_interface(scope).is_some() {
            return Ok((scope, dst));
        }
        self.route(dst)
    }

    /// Source address of datagrams sent to `dst`.
    pub fn source_for(&self, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        let (scope, _): (u32, Ipv4Addr) = self.route(dst).ok()?;
        self.source_on(scope, dst)
    }

    /// Source address of datagrams sent to `dst` through the interface at `scope`.
    pub fn source_on(&self, scope: u32, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        if scope == LOOPBACK_SCOPE {
            if !dst.is_loopback() && self.addresses.is_local(dst) {
                return Some(dst);
            }
            return Some(Ipv4Addr::LOCALHOST);
        }
        match self.addresses.select_source(scope) {
            Some(src) => Some(src),
            // Hosts still looking for an address broadcast from 0.0.0.0 (RFC 2131 4.1).
            None if dst.is_broadcast() => Some(Ipv4Addr::UNSPECIFIED),
            None => None,
        }
    }

    /// Largest datagram that can be sent to `dst` without fragmentation.
    pub fn get_mtu(&self, dst: Ipv4Addr) -> usize {
        let link_mtu: usize = match self.route(dst) {
            Ok((scope, _)) => self.get_interface(scope).map_or(DEFAULT_MTU, |iface| iface.mtu),
            Err(_) => DEFAULT_MTU,
        };
        match self.path_mtu.get(&dst) {
            Some(mtu) => link_mtu.min(*mtu),
            None => link_mtu,
        }
    }

    /// MSS to offer to `remote`.
    pub fn mss_for(&self, remote: Ipv4Addr) -> usize {
        self.get_mtu(remote)
            .saturating_sub(IPV4_HEADER_MIN_SIZE + MIN_TCP_HEADER_SIZE)
            .min(self.config.tcp.get_advertised_mss())
            .max(MIN_MSS)
    }

    fn next_ip_id(&mut self) -> u16 {
        self.ip_id = self.ip_id.wrapping_add(1);
        self.ip_id
    }

    /// Random delay in `[0, max]`.
    pub fn random_delay(&mut self, max: Duration) -> Duration {
        Duration::from_millis(self.rng.gen_range(0..=max.as_millis() as u64))
    }

    fn cancel_timer(&mut self, timer: Option<TimerId>) {
        if let Some(timer) = timer {
            self.timers.cancel(timer);
        }
    }

    /// Runs `f` on the control block of `desc`, then handles the signals it raised.
    pub fn with_stream<T>(
        &mut self,
        desc: SocketDesc,
        f: impl FnOnce(&mut Stream, &mut dyn StreamHost) -> T,
    ) -> Result<T, Fail> {
        let Engine {
            sockets,
            timers,
            actions,
            isn,
            nodes,
            ..
        } = self;
        let socket: &mut Socket = sockets
            .get_mut(usize::from(desc))
            .ok_or_else(|| Fail::new(EBADF, "bad socket descriptor"))?;
        let origin: ConduitId = socket.get_conduit().unwrap_or(nodes.tcp);
        let stream: &mut Stream = socket.stream_mut()?;
        let mut host: Host = Host {
            desc,
            origin,
            timers,
            actions,
            isn,
            signals: Vec::new(),
        };
        let result: T = f(stream, &mut host);
        let signals: Vec<StreamSignal> = host.signals;
        for signal in signals {
            match signal {
                StreamSignal::Changed => (),
                StreamSignal::Established => self.stream_established(desc),
                StreamSignal::Closed => self.stream_closed(desc),
            }
        }
        Ok(result)
    }

    fn stream_established(&mut self, desc: SocketDesc) {
        let parent: Option<SocketDesc> = match self.sockets.get_mut(usize::from(desc)) {
            Some(socket) => {
                socket.set_established();
                socket.get_parent()
            },
            None => return,
        };
        if let Some(parent) = parent {
            if let Some(Ok(listener)) = self.sockets.get_mut(usize::from(parent)).map(|s| s.stream_mut()) {
                listener.child_established(desc);
            }
        }
    }

    /// The connection of `desc` reached Closed.
    fn stream_closed(&mut self, desc: SocketDesc) {
        let (installed, parent, established, closed): (bool, Option<SocketDesc>, bool, bool) =
            match self.sockets.get(usize::from(desc)) {
                Some(socket) => (
                    socket.get_conduit().is_some(),
                    socket.get_parent(),
                    socket.is_established(),
                    socket.is_closed(),
                ),
                None => return,
            };
        if installed {
            self.actions.push_back(Action::Uninstall(desc));
        }
        match parent {
            Some(parent) if !established => {
                if let Some(Ok(listener)) = self.sockets.get_mut(usize::from(parent)).map(|s| s.stream_mut()) {
                    listener.child_aborted();
                }
                self.release(desc);
            },
            _ if closed => self.release(desc),
            _ => (),
        }
    }

    /// Queues the release of `desc`, once.
    pub fn release(&mut self, desc: SocketDesc) {
        if let Some(socket) = self.sockets.get_mut(usize::from(desc)) {
            if socket.set_releasing() {
                self.actions.push_back(Action::Release(desc));
            }
        }
    }

    /// Moves the clock to `now` and runs every timer that expired.
    pub fn advance_clock(&mut self, now: Instant) {
        for timeout in self.timers.advance_clock(now) {
            match timeout {
                Timeout::Stream(desc, timer) => {
                    if let Err(e) = self.with_stream(desc, |stream, host| stream.on_timer(host, timer)) {
                        debug!("advance_clock(): stale stream timer ({:?})", e);
                    }
                },
                Timeout::Address(scope, addr) => self.address_expired(scope, addr),
                Timeout::Reassembly(key) => self.reassembly_expired(key),
                Timeout::Membership(group) => self.membership_expired(group),
                Timeout::Dhcp(scope) => self.dhcp_expired(scope),
            }
        }
    }

    /// Pulls every pending frame off the interfaces.
    pub fn receive(&mut self) -> Vec<(u32, Vec<u8>)> {
        let mut frames: Vec<(u32, Vec<u8>)> = Vec::new();
        for iface in self.interfaces.iter_mut() {
            match iface.nic.receive() {
                Ok(batch) => frames.extend(batch.into_iter().map(|frame| (iface.scope, frame))),
                Err(e) => warn!("receive(): scope {:?} ({:?})", iface.scope, e),
            }
        }
        frames
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl StreamHost for Host<'_> {
    fn now(&self) -> Instant {
        self.timers.now()
    }

    fn schedule(&mut self, timer: StreamTimer, delay: Duration) -> TimerId {
        self.timers.schedule_after(delay, Timeout::Stream(self.desc, timer))
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.cancel(id);
    }

    fn transmit(&mut self, segment: Messenger) {
        self.actions.push_back(Action::Output(self.origin, segment));
    }

    fn signal(&mut self, signal: StreamSignal) {
        self.signals.push(signal);
    }

    fn generate_isn(&self, local: &SocketAddrV4, remote: &SocketAddrV4) -> SeqNumber {
        self.isn.generate(local, remote, self.timers.now())
    }
}

impl Dispatcher<Receiver> for Engine {
    fn apply(&mut self, _conduit: ConduitId, receiver: Receiver, m: &mut Messenger) -> bool {
        match (receiver, m.get_op()) {
            (Receiver::Link, Operation::Input) => self.link_input(m),
            (Receiver::Link, Operation::Output) => self.link_output(m),
            (Receiver::Inet, Operation::Input) => self.inet_input(m),
            (Receiver::Inet, Operation::Output) => self.inet_output(m),
            (Receiver::Reassembly, Operation::Input) => self.reassembly_input(m),
            (Receiver::Icmp, Operation::Input) => self.icmp_input(m),
            (Receiver::EchoRequest, Operation::Input) => self.echo_request(m),
            (Receiver::EchoReply, Operation::Input) => self.echo_reply(m),
            (Receiver::IcmpError(icmp_type), Operation::Input) => self.icmp_error(m, icmp_type),
            (Receiver::Igmp, Operation::Input) => self.igmp_input(m),
            (Receiver::Membership(group), Operation::Input) => self.membership_input(m, group),
            (Receiver::Udp, Operation::Input) => self.udp_input(m),
            (Receiver::Udp, Operation::Output) => self.udp_output(m),
            (Receiver::Tcp, Operation::Input) => self.tcp_input(m),
            (Receiver::Tcp, Operation::Output) => self.tcp_output(m),
            (Receiver::UdpUnreachable, Operation::Input) => self.answer_unreachable(m, UNREACH_PORT),
            (Receiver::ProtocolUnreachable, Operation::Input) => self.answer_unreachable(m, UNREACH_PROTOCOL),
            (Receiver::TcpUnbound, Operation::Input) => self.tcp_unbound(m),
            (Receiver::Datagram(desc), Operation::Input) => self.datagram_input(desc, m),
            (Receiver::Datagram(desc), Operation::Error) => self.datagram_error(desc, m),
            (Receiver::Stream(desc), Operation::Input) => self.stream_input(desc, m),
            (Receiver::Stream(desc), Operation::Error) => self.stream_error(desc, m),
            (Receiver::Socket(desc), Operation::Input) => self.socket_input(desc, m),
            (_, Operation::Output) => true,
            _ => false,
        }
    }
}
