// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod blocking;
pub mod conduit;
mod engine;
mod loopback;
pub mod protocols;
pub mod socket;

#[cfg(test)]
pub mod test_helpers;


pub use self::{
    blocking::SharedInetStack,
    loopback::LoopbackInterface,
    socket::{
        SocketDesc,
        SocketType,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use self::{
    conduit::{
        messenger::Messenger,
        ConduitGraph,
        ConduitId,
        MuxKey,
        Visitor,
    },
    engine::{
        Action,
        Engine,
        Group,
        Interface,
        Nodes,
    },
    loopback::LOOPBACK_MTU,
    protocols::{
        address::AddressEffect,
        dhcp::{
            DhcpClient,
            DhcpState,
            Lease,
            DHCP_CLIENT_PORT,
        },
        igmp::{
            Membership,
            MembershipEffect,
        },
        ip::IpProtocol,
        tcp::{
            State,
            Stream,
        },
        udp::DatagramRecord,
        Receiver,
        MAX_HEADER_SIZE,
    },
    socket::{
        Datagram,
        Socket,
        Transport,
        DEFAULT_DATAGRAM_BUFFER_SIZE,
    },
};
use crate::runtime::{
    fail::Fail,
    network::{
        config::{
            InetConfig,
            StackConfig,
        },
        consts::{
            FIRST_INTERFACE_SCOPE,
            LOOPBACK_SCOPE,
        },
        ephemeral::EphemeralPorts,
        types::MacAddress,
        NetworkInterface,
    },
};
use ::libc::{
    EADDRINUSE,
    EADDRNOTAVAIL,
    EAGAIN,
    EALREADY,
    EBADF,
    EDESTADDRREQ,
    EINVAL,
    EISCONN,
    EMSGSIZE,
    ENETUNREACH,
    ENOTCONN,
};
use ::rand::Rng;
use ::std::{
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

/// Rounds of receive processing per poll. Loopback traffic generated in one round is picked up by the next.
const MAX_RECV_ROUNDS: usize = 16;

//======================================================================================================================
// Structures
//======================================================================================================================

/// An IPv4 host stack: the conduit graph, the protocol state behind it, and a non-blocking socket API on top.
///
/// The stack never blocks and never reads the clock by itself. [InetStack::poll] moves time forward, runs the
/// timers that expired and processes every frame pending on the interfaces.
pub struct InetStack {
    graph: ConduitGraph<Receiver>,
    engine: Engine,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl InetStack {
    /// Creates a stack with only the loopback interface.
    pub fn new(config: StackConfig, now: Instant) -> Self {
        Self::with_seed(config, now, ::rand::thread_rng().gen::<u64>())
    }

    /// Like [InetStack::new], with the initial sequence numbers, port order and delays derived from `seed`.
    pub fn with_seed(config: StackConfig, now: Instant, seed: u64) -> Self {
        let mut graph: ConduitGraph<Receiver> = ConduitGraph::new();
        let nodes: Nodes = Nodes::build(&mut graph);
        let mut stack: Self = Self {
            graph,
            engine: Engine::new(config, nodes, now, seed),
        };
        stack.add_loopback();
        stack
    }

    fn add_loopback(&mut self) {
        self.engine.interfaces.push(Interface {
            scope: LOOPBACK_SCOPE,
            nic: Box::new(LoopbackInterface::new()),
            link_addr: MacAddress::nil(),
            mtu: LOOPBACK_MTU,
        });
        let config: InetConfig = self.engine.config.inet.clone().set_conflict_checks(0);
        // Loopback has no link to announce on.
        let _: Vec<AddressEffect> = self
            .engine
            .addresses
            .add_local(LOOPBACK_SCOPE, Ipv4Addr::LOCALHOST, 8, MacAddress::nil())
            .start(&config, Duration::ZERO);
    }

    ///
    /// **Brief**
    ///
    /// Attaches a network interface to the stack and assigns `addr`/`prefix` to it. Unless probing is disabled in
    /// the configuration, the address starts out tentative and becomes usable once conflict detection completes.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the scope identifier of the new interface is returned. Upon failure, `Fail` is
    /// returned instead.
    ///
    pub fn add_interface(&mut self, nic: Box<dyn NetworkInterface>, addr: Ipv4Addr, prefix: u8) -> Result<u32, Fail> {
        trace!("add_interface(): addr={:?}/{:?}", addr, prefix);
        if prefix > 32 {
            return Err(Fail::new(EINVAL, "invalid prefix length"));
        }
        if addr.is_unspecified() || addr.is_multicast() || addr.is_broadcast() || addr.is_loopback() {
            return Err(Fail::new(EADDRNOTAVAIL, "address cannot be assigned to an interface"));
        }
        if self.engine.addresses.is_local(addr) {
            return Err(Fail::new(EADDRINUSE, "address is already assigned"));
        }
        let scope: u32 = self.attach_interface(nic);
        self.engine.assign_address(scope, addr, prefix);
        self.run_actions();
        info!("add_interface(): {:?}/{:?} on scope {:?}", addr, prefix, scope);
        Ok(scope)
    }

    ///
    /// **Brief**
    ///
    /// Attaches a network interface to the stack and configures it through DHCP. The interface takes broadcasts
    /// right away; its address becomes usable once a server grants a lease and conflict detection completes.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the scope identifier of the new interface is returned. Upon failure, `Fail` is
    /// returned instead.
    ///
    pub fn add_dhcp_interface(&mut self, nic: Box<dyn NetworkInterface>) -> Result<u32, Fail> {
        trace!("add_dhcp_interface()");
        let scope: u32 = self.attach_interface(nic);
        self.start_dhcp(scope)?;
        Ok(scope)
    }

    fn attach_interface(&mut self, nic: Box<dyn NetworkInterface>) -> u32 {
        let scope: u32 = self
            .engine
            .interfaces
            .iter()
            .map(|iface| iface.scope + 1)
            .max()
            .unwrap_or(FIRST_INTERFACE_SCOPE)
            .max(FIRST_INTERFACE_SCOPE);
        let link_addr: MacAddress = nic.get_link_addr();
        let mtu: usize = nic.get_mtu();
        self.engine.interfaces.push(Interface {
            scope,
            nic,
            link_addr,
            mtu,
        });
        debug!("attach_interface(): scope {:?} ({:?}, mtu {:?})", scope, link_addr, mtu);
        scope
    }

    ///
    /// **Brief**
    ///
    /// Starts a DHCP client on the interface at `scope`. Every client shares one datagram socket bound to the client
    /// port.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. `EADDRINUSE` means another socket holds the client port.
    /// Upon failure, `Fail` is returned instead.
    ///
    pub fn start_dhcp(&mut self, scope: u32) -> Result<(), Fail> {
        trace!("start_dhcp(): scope={:?}", scope);
        let socket: SocketDesc = match self.engine.dhcp_socket {
            Some(socket) => socket,
            None => {
                let socket: SocketDesc = self.socket(SocketType::Datagram)?;
                if let Err(e) = self.bind(socket, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DHCP_CLIENT_PORT)) {
                    self.close(socket)?;
                    return Err(e);
                }
                socket
            },
        };
        let result: Result<(), Fail> = self.engine.start_dhcp(scope, socket);
        if result.is_err() && self.engine.dhcp.is_empty() {
            self.engine.dhcp_socket = None;
            self.close(socket)?;
        }
        self.run_actions();
        result
    }

    ///
    /// **Brief**
    ///
    /// Stops the DHCP client on the interface at `scope`. A lease in hand is released and its address and router
    /// are taken down.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn stop_dhcp(&mut self, scope: u32) -> Result<(), Fail> {
        trace!("stop_dhcp(): scope={:?}", scope);
        let socket: Option<SocketDesc> = self.engine.stop_dhcp(scope)?;
        self.run_actions();
        if let Some(socket) = socket {
            self.close(socket)?;
        }
        Ok(())
    }

    /// State of the DHCP client on the interface at `scope`.
    pub fn get_dhcp_state(&self, scope: u32) -> Option<DhcpState> {
        self.engine.get_dhcp_client(scope).map(DhcpClient::get_state)
    }

    /// Lease the DHCP client on the interface at `scope` holds.
    pub fn get_dhcp_lease(&self, scope: u32) -> Option<Lease> {
        self.engine.get_dhcp_client(scope).and_then(DhcpClient::get_lease).cloned()
    }

    /// Router datagrams for off-link destinations are sent to.
    pub fn get_default_gateway(&self) -> Option<Ipv4Addr> {
        self.engine.gateway
    }

    /// Sets the router that datagrams for off-link destinations are sent to.
    pub fn set_default_gateway(&mut self, gateway: Option<Ipv4Addr>) {
        trace!("set_default_gateway(): gateway={:?}", gateway);
        self.engine.gateway = gateway;
    }

    /// Is `addr` a local address ready for use?
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.engine.addresses.is_local(addr)
    }

    /// Time as last seen by [InetStack::poll].
    pub fn now(&self) -> Instant {
        self.engine.timers.now()
    }

    /// Deadline of the earliest armed timer.
    pub fn next_timeout(&mut self) -> Option<Instant> {
        self.engine.timers.next_expiry()
    }

    ///
    /// **Brief**
    ///
    /// Moves the clock to `now`, runs the timers that expired and processes the frames pending on every interface.
    /// An instant earlier than the last one seen is treated as the last one seen.
    ///
    pub fn poll(&mut self, now: Instant) {
        let now: Instant = now.max(self.engine.timers.now());
        self.engine.advance_clock(now);
        self.run_actions();
        for _ in 0..MAX_RECV_ROUNDS {
            let frames: Vec<(u32, Vec<u8>)> = self.engine.receive();
            if frames.is_empty() {
                break;
            }
            for (scope, frame) in frames {
                let link: ConduitId = self.engine.nodes.link;
                let mut m: Messenger = Messenger::new_input(frame, scope);
                self.graph
                    .accept(link, None, &mut Visitor::Transporter, &mut m, &mut self.engine);
                self.run_actions();
            }
            self.engine.dhcp_receive();
            self.run_actions();
        }
    }

    /// Carries out the work receivers queued during the last traversal.
    fn run_actions(&mut self) {
        while let Some(action) = self.engine.actions.pop_front() {
            match action {
                Action::Output(at, mut m) => {
                    if !self.graph.contains(at) {
                        debug!("run_actions(): dropping output from a removed conduit");
                        continue;
                    }
                    let sender: Option<ConduitId> = self.graph.get_b(at);
                    self.graph
                        .accept(at, sender, &mut Visitor::Plain, &mut m, &mut self.engine);
                },
                Action::Input(mut m) => {
                    let (inet, link): (ConduitId, ConduitId) = (self.engine.nodes.inet, self.engine.nodes.link);
                    self.graph
                        .accept(inet, Some(link), &mut Visitor::Transporter, &mut m, &mut self.engine);
                },
                Action::Error(proto, mut m) => {
                    // Datagram paths are keyed on the local port only; the leaf checks the peer.
                    let mut visitor: Visitor<Receiver> = if proto == self.engine.nodes.udp {
                        Visitor::Transporter
                    } else {
                        Visitor::Plain
                    };
                    if let Some(mux) = self.graph.get_b(proto) {
                        self.graph.accept(mux, Some(proto), &mut visitor, &mut m, &mut self.engine);
                    }
                },
                Action::Broadcast(mux, mut m) => {
                    let sender: Option<ConduitId> = self.graph.get_a(mux);
                    self.graph
                        .accept(mux, sender, &mut Visitor::Broadcast, &mut m, &mut self.engine);
                },
                Action::Install(desc) => self.install_child(desc),
                Action::Uninstall(desc) => self.uninstall(desc),
                Action::Redeliver(mut m) => {
                    let (mux, tcp): (ConduitId, ConduitId) = (self.engine.nodes.tcp_mux, self.engine.nodes.tcp);
                    self.graph
                        .accept(mux, Some(tcp), &mut Visitor::Transporter, &mut m, &mut self.engine);
                },
                Action::Release(desc) => self.release(desc),
                Action::Unconfigure(scope, lease) => self.engine.unconfigure_lease(scope, &lease),
            }
        }
    }

    /// Builds the path of a socket below the demultiplexer of its protocol: local port, remote address, remote port.
    fn install_path(
        &mut self,
        socket_type: SocketType,
        local_port: u16,
        remote: Option<SocketAddrV4>,
        desc: SocketDesc,
    ) -> Result<ConduitId, Fail> {
        let (mux, proto, mut visitor): (ConduitId, ConduitId, Visitor<Receiver>) = match socket_type {
            SocketType::Stream => (
                self.engine.nodes.tcp_mux,
                self.engine.nodes.tcp,
                Visitor::installer(Receiver::Stream(desc), None),
            ),
            SocketType::Datagram => (
                self.engine.nodes.udp_mux,
                self.engine.nodes.udp,
                Visitor::installer(Receiver::Datagram(desc), Some(Receiver::Socket(desc))),
            ),
        };
        let mut m: Messenger = Self::path_keys(local_port, remote);
        self.graph.accept(mux, Some(proto), &mut visitor, &mut m, &mut self.engine);
        match (visitor.get_conduit(), visitor.get_errno()) {
            (Some(conduit), 0) => {
                trace!("install_path(): {:?} port={:?} remote={:?}", desc, local_port, remote);
                Ok(conduit)
            },
            _ => Err(Fail::new(EADDRINUSE, "address already in use")),
        }
    }

    fn path_keys(local_port: u16, remote: Option<SocketAddrV4>) -> Messenger {
        let mut m: Messenger = Messenger::new_input(Vec::new(), 0);
        m.set_local_port(local_port);
        if let Some(remote) = remote {
            m.set_remote(Some(*remote.ip()));
            m.set_remote_port(remote.port());
        }
        m
    }

    /// Installs the path of a connection spawned by a listener. A connection whose path is taken is reset.
    fn install_child(&mut self, desc: SocketDesc) {
        let (local, remote): (SocketAddrV4, SocketAddrV4) = match self.engine.get_socket(desc) {
            Ok(socket) => match (socket.get_local(), socket.get_remote()) {
                (Some(local), Some(remote)) if socket.get_conduit().is_none() => (local, remote),
                _ => return,
            },
            Err(_) => return,
        };
        match self.install_path(SocketType::Stream, local.port(), Some(remote), desc) {
            Ok(conduit) => {
                if let Ok(socket) = self.engine.get_socket_mut(desc) {
                    socket.set_conduit(Some(conduit));
                }
            },
            Err(e) => {
                warn!("install_child(): {:?} ({:?})", desc, e);
                if let Err(e) = self.engine.with_stream(desc, |stream, host| stream.abort_with_reset(host)) {
                    warn!("install_child(): {:?}", e);
                }
            },
        }
    }

    /// Removes the path of a socket from the graph.
    fn uninstall(&mut self, desc: SocketDesc) {
        let (conduit, socket_type, local, remote): (ConduitId, SocketType, Option<SocketAddrV4>, Option<SocketAddrV4>) =
            match self.engine.get_socket(desc) {
                Ok(socket) => match socket.get_conduit() {
                    Some(conduit) => (conduit, socket.get_type(), socket.get_local(), socket.get_remote()),
                    None => return,
                },
                Err(_) => return,
            };
        let (mux, proto, remote): (ConduitId, ConduitId, Option<SocketAddrV4>) = match socket_type {
            SocketType::Stream => (self.engine.nodes.tcp_mux, self.engine.nodes.tcp, remote),
            // Datagram paths never name the remote.
            SocketType::Datagram => (self.engine.nodes.udp_mux, self.engine.nodes.udp, None),
        };
        let parent: Option<ConduitId> = if self.graph.contains(conduit) {
            self.graph.get_a(conduit)
        } else {
            None
        };
        let mut m: Messenger = Self::path_keys(local.map_or(0, |local| local.port()), remote);
        let mut visitor: Visitor<Receiver> = Visitor::uninstaller();
        self.graph.accept(mux, Some(proto), &mut visitor, &mut m, &mut self.engine);
        if visitor.get_conduit() == Some(conduit) {
            self.graph.remove_subtree(conduit);
            if let Some(parent) = parent {
                self.graph.prune(parent);
            }
            trace!("uninstall(): {:?}", desc);
        } else {
            warn!("uninstall(): path of {:?} not found", desc);
        }
        if let Ok(socket) = self.engine.get_socket_mut(desc) {
            socket.set_conduit(None);
        }
    }

    /// Frees a socket queued for release.
    fn release(&mut self, desc: SocketDesc) {
        match self.engine.get_socket(desc) {
            Ok(socket) if socket.is_releasing() => (),
            _ => return,
        }
        self.uninstall(desc);
        let mut socket: Socket = self.engine.sockets.remove(usize::from(desc));
        if let (true, Some(local)) = (socket.is_ephemeral(), socket.get_local()) {
            let socket_type: SocketType = socket.get_type();
            // Accepted connections share their listener's port.
            if self.is_port_in_use(socket_type, local.port()) {
                trace!("release(): port {:?} still in use", local.port());
            } else {
                match socket_type {
                    SocketType::Stream => self.engine.tcp_ports.free(local.port()),
                    SocketType::Datagram => self.engine.udp_ports.free(local.port()),
                }
            }
        }
        if let Transport::Datagram(datagram) = socket.get_transport() {
            for group in datagram.take_groups() {
                self.leave(group);
            }
        }
        debug!("release(): {:?}", desc);
    }

    fn is_port_in_use(&self, socket_type: SocketType, port: u16) -> bool {
        self.engine.sockets.iter().any(|(_, socket)| {
            socket.get_type() == socket_type && socket.get_local().map_or(false, |local| local.port() == port)
        })
    }

    /// Gives an unbound socket a local address: the given port or an ephemeral one.
    fn bind_port(&mut self, sd: SocketDesc, addr: Ipv4Addr, port: u16) -> Result<SocketAddrV4, Fail> {
        let socket_type: SocketType = self.engine.get_socket(sd)?.get_type();
        let ports: &mut EphemeralPorts = match socket_type {
            SocketType::Stream => &mut self.engine.tcp_ports,
            SocketType::Datagram => &mut self.engine.udp_ports,
        };
        let (port, ephemeral): (u16, bool) = if port == 0 {
            (ports.alloc()?, true)
        } else {
            ports.reserve(port);
            (port, EphemeralPorts::is_private(port))
        };
        let local: SocketAddrV4 = SocketAddrV4::new(addr, port);
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        socket.set_local(Some(local));
        socket.set_ephemeral(ephemeral);
        Ok(local)
    }

    /// Undoes [Self::bind_port].
    fn unbind_port(&mut self, sd: SocketDesc) {
        if let Ok(socket) = self.engine.get_socket_mut(sd) {
            let (local, ephemeral, socket_type): (Option<SocketAddrV4>, bool, SocketType) =
                (socket.get_local(), socket.is_ephemeral(), socket.get_type());
            socket.set_local(None);
            socket.set_ephemeral(false);
            if let (Some(local), true) = (local, ephemeral) {
                match socket_type {
                    SocketType::Stream => self.engine.tcp_ports.free(local.port()),
                    SocketType::Datagram => self.engine.udp_ports.free(local.port()),
                }
            }
        }
    }

    //==================================================================================================================
    // Socket API
    //==================================================================================================================

    ///
    /// **Brief**
    ///
    /// Creates an endpoint for communication of the given type.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the descriptor of the new socket is returned. Upon failure, `Fail` is returned
    /// instead.
    ///
    pub fn socket(&mut self, socket_type: SocketType) -> Result<SocketDesc, Fail> {
        trace!("socket(): type={:?}", socket_type);
        let socket: Socket = match socket_type {
            SocketType::Stream => Socket::new_stream(&self.engine.config.tcp),
            SocketType::Datagram => Socket::new_datagram(DEFAULT_DATAGRAM_BUFFER_SIZE),
        };
        Ok(SocketDesc::from(self.engine.sockets.insert(socket)))
    }

    ///
    /// **Brief**
    ///
    /// Binds the socket referred to by `sd` to the local endpoint specified by `local`. A zero port picks an
    /// ephemeral one. Datagram sockets start receiving as soon as they are bound.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn bind(&mut self, sd: SocketDesc, local: SocketAddrV4) -> Result<(), Fail> {
        trace!("bind(): sd={:?} local={:?}", sd, local);
        let socket: &Socket = self.engine.get_socket(sd)?;
        let socket_type: SocketType = socket.get_type();
        if socket.get_local().is_some() {
            return Err(Fail::new(EINVAL, "socket is already bound"));
        }
        let addr: Ipv4Addr = *local.ip();
        let multicast: bool = addr.is_multicast() && socket_type == SocketType::Datagram;
        if !addr.is_unspecified() && !addr.is_loopback() && !multicast && !self.engine.addresses.is_local(addr) {
            return Err(Fail::new(EADDRNOTAVAIL, "address not available"));
        }
        if local.port() != 0 && self.is_port_in_use(socket_type, local.port()) {
            return Err(Fail::new(EADDRINUSE, "address already in use"));
        }
        let local: SocketAddrV4 = self.bind_port(sd, addr, local.port())?;
        if socket_type == SocketType::Datagram {
            match self.install_path(SocketType::Datagram, local.port(), None, sd) {
                Ok(conduit) => self.engine.get_socket_mut(sd)?.set_conduit(Some(conduit)),
                Err(e) => {
                    self.unbind_port(sd);
                    return Err(e);
                },
            }
        }
        Ok(())
    }

    ///
    /// **Brief**
    ///
    /// Marks the stream socket referred to by `sd` as passive, accepting up to `backlog` pending connections. An
    /// unbound socket is bound to an ephemeral port first.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn listen(&mut self, sd: SocketDesc, backlog: usize) -> Result<(), Fail> {
        trace!("listen(): sd={:?} backlog={:?}", sd, backlog);
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        match socket.stream_mut()?.get_state() {
            State::Closed | State::Listen => (),
            _ => return Err(Fail::new(EISCONN, "socket is already connected")),
        }
        let local: SocketAddrV4 = match socket.get_local() {
            Some(local) => local,
            None => self.bind_port(sd, Ipv4Addr::UNSPECIFIED, 0)?,
        };
        if self.engine.get_socket(sd)?.get_conduit().is_none() {
            match self.install_path(SocketType::Stream, local.port(), None, sd) {
                Ok(conduit) => self.engine.get_socket_mut(sd)?.set_conduit(Some(conduit)),
                Err(e) => return Err(e),
            }
        }
        self.engine.get_socket_mut(sd)?.stream_mut()?.listen(local, Some(backlog))
    }

    ///
    /// **Brief**
    ///
    /// Dequeues an established connection from the listening socket referred to by `sd`.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the descriptor of the new connection and the address of its peer are returned.
    /// `EAGAIN` means no connection is pending. Upon failure, `Fail` is returned instead.
    ///
    pub fn accept(&mut self, sd: SocketDesc) -> Result<(SocketDesc, SocketAddrV4), Fail> {
        trace!("accept(): sd={:?}", sd);
        let child: SocketDesc = self.engine.get_socket_mut(sd)?.stream_mut()?.accept()?;
        let socket: &mut Socket = self.engine.get_socket_mut(child)?;
        socket.take_parent();
        let remote: SocketAddrV4 = socket
            .get_remote()
            .ok_or_else(|| Fail::new(ENOTCONN, "connection has no peer"))?;
        debug!("accept(): {:?} accepted {:?} from {:?}", sd, child, remote);
        Ok((child, remote))
    }

    ///
    /// **Brief**
    ///
    /// Connects the socket referred to by `sd` to `remote`. For a stream socket this starts the handshake;
    /// completion shows in [InetStack::is_connected] and failures in [InetStack::get_error]. A datagram socket only
    /// records its peer: it then sends there by default and receives from there only.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn connect(&mut self, sd: SocketDesc, remote: SocketAddrV4) -> Result<(), Fail> {
        trace!("connect(): sd={:?} remote={:?}", sd, remote);
        if remote.ip().is_unspecified() || remote.port() == 0 {
            return Err(Fail::new(EINVAL, "invalid remote address"));
        }
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        if socket.get_type() == SocketType::Datagram {
            if socket.get_local().is_none() {
                self.bind(sd, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
            }
            self.engine.get_socket_mut(sd)?.set_remote(Some(remote));
            return Ok(());
        }
        let stream: &mut Stream = socket.stream_mut()?;
        match stream.get_state() {
            State::Closed => (),
            State::SynSent | State::SynReceived => return Err(Fail::new(EALREADY, "connection already in progress")),
            State::Listen => return Err(Fail::new(EINVAL, "socket is listening")),
            _ => return Err(Fail::new(EISCONN, "socket is already connected")),
        }
        if let Some(e) = stream.get_error() {
            return Err(e);
        }
        if remote.ip().is_multicast() || remote.ip().is_broadcast() {
            return Err(Fail::new(ENETUNREACH, "cannot connect a stream to a group"));
        }
        self.connect_stream(sd, remote)
    }

    fn connect_stream(&mut self, sd: SocketDesc, remote: SocketAddrV4) -> Result<(), Fail> {
        let source: Ipv4Addr = self
            .engine
            .source_for(*remote.ip())
            .ok_or_else(|| Fail::new(ENETUNREACH, "no route to host"))?;
        let bound: Option<SocketAddrV4> = self.engine.get_socket(sd)?.get_local();
        let local: SocketAddrV4 = match bound {
            Some(local) if local.ip().is_unspecified() => SocketAddrV4::new(source, local.port()),
            Some(local) => local,
            None => {
                let local: SocketAddrV4 = self.bind_port(sd, source, 0)?;
                SocketAddrV4::new(source, local.port())
            },
        };
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        socket.set_local(Some(local));
        socket.set_remote(Some(remote));
        match self.install_path(SocketType::Stream, local.port(), Some(remote), sd) {
            Ok(conduit) => self.engine.get_socket_mut(sd)?.set_conduit(Some(conduit)),
            Err(e) => {
                let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
                socket.set_remote(None);
                match bound {
                    Some(bound) => socket.set_local(Some(bound)),
                    None => self.unbind_port(sd),
                }
                return Err(e);
            },
        }
        let mss: usize = self.engine.mss_for(*remote.ip());
        let result: Result<(), Fail> = self
            .engine
            .with_stream(sd, |stream, host| stream.connect(host, local, remote, mss))?;
        self.run_actions();
        result
    }

    /// Has the stream socket referred to by `sd` completed its handshake, with data able to flow?
    pub fn is_connected(&self, sd: SocketDesc) -> Result<bool, Fail> {
        match self.engine.get_socket(sd)?.stream() {
            Some(stream) => Ok(stream.is_connected()),
            None => Ok(self.engine.get_socket(sd)?.get_remote().is_some()),
        }
    }

    ///
    /// **Brief**
    ///
    /// Reads from the socket referred to by `sd` into `buf`. On a datagram socket this dequeues one datagram.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the number of bytes read is returned; zero means the peer closed the stream.
    /// `EAGAIN` means no data is available yet. Upon failure, `Fail` is returned instead.
    ///
    pub fn read(&mut self, sd: SocketDesc, buf: &mut [u8]) -> Result<usize, Fail> {
        trace!("read(): sd={:?} len={:?}", sd, buf.len());
        match self.engine.get_socket(sd)?.get_type() {
            SocketType::Stream => {
                let result: Result<usize, Fail> = self.engine.with_stream(sd, |stream, host| stream.read(host, buf))?;
                self.run_actions();
                result
            },
            SocketType::Datagram => self.recv_from(sd, buf).map(|(len, _)| len),
        }
    }

    ///
    /// **Brief**
    ///
    /// Writes `data` to the socket referred to by `sd`. A stream socket queues as much as fits in its send buffer;
    /// a datagram socket sends one datagram to its connected peer.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the number of bytes taken is returned. `EAGAIN` means the send buffer is full.
    /// Upon failure, `Fail` is returned instead.
    ///
    pub fn write(&mut self, sd: SocketDesc, data: &[u8]) -> Result<usize, Fail> {
        trace!("write(): sd={:?} len={:?}", sd, data.len());
        let socket: &Socket = self.engine.get_socket(sd)?;
        match socket.get_type() {
            SocketType::Stream => {
                let result: Result<usize, Fail> =
                    self.engine.with_stream(sd, |stream, host| stream.write(host, data))?;
                self.run_actions();
                result
            },
            SocketType::Datagram => {
                let remote: SocketAddrV4 = socket
                    .get_remote()
                    .ok_or_else(|| Fail::new(EDESTADDRREQ, "socket is not connected"))?;
                self.send_to(sd, data, remote)
            },
        }
    }

    /// Like [InetStack::write] on a stream socket, with the end of `data` marked urgent.
    pub fn write_urgent(&mut self, sd: SocketDesc, data: &[u8]) -> Result<usize, Fail> {
        trace!("write_urgent(): sd={:?} len={:?}", sd, data.len());
        let result: Result<usize, Fail> = self
            .engine
            .with_stream(sd, |stream, host| stream.write_urgent(host, data))?;
        self.run_actions();
        result
    }

    ///
    /// **Brief**
    ///
    /// Sends `data` as one datagram from the socket referred to by `sd` to `remote`. An unbound socket is bound to
    /// an ephemeral port first.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the number of bytes sent is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn send_to(&mut self, sd: SocketDesc, data: &[u8], remote: SocketAddrV4) -> Result<usize, Fail> {
        trace!("send_to(): sd={:?} remote={:?} len={:?}", sd, remote, data.len());
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        if data.len() > socket.datagram_mut()?.get_send_buffer_size() {
            return Err(Fail::new(EMSGSIZE, "datagram too large"));
        }
        if remote.port() == 0 || remote.ip().is_unspecified() {
            return Err(Fail::new(EINVAL, "invalid remote address"));
        }
        self.engine.route(*remote.ip())?;
        let local: SocketAddrV4 = match self.engine.get_socket(sd)?.get_local() {
            Some(local) => local,
            None => {
                self.bind(sd, SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
                self.engine
                    .get_socket(sd)?
                    .get_local()
                    .ok_or_else(|| Fail::new(EINVAL, "socket is not bound"))?
            },
        };
        let mut m: Messenger = Messenger::new_output(data, MAX_HEADER_SIZE);
        m.set_type(IpProtocol::UDP as u32);
        if !local.ip().is_unspecified() && !local.ip().is_multicast() {
            m.set_local(Some(*local.ip()));
        }
        m.set_local_port(local.port());
        m.set_remote(Some(*remote.ip()));
        m.set_remote_port(remote.port());
        self.engine.actions.push_back(Action::Output(self.engine.nodes.udp, m));
        self.run_actions();
        Ok(data.len())
    }

    ///
    /// **Brief**
    ///
    /// Dequeues one datagram from the socket referred to by `sd` into `buf`. A datagram longer than `buf` is
    /// truncated. An error reported for the socket (such as `ECONNREFUSED` after a port unreachable) is returned
    /// once, ahead of queued data.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the number of bytes copied and the sender are returned. `EAGAIN` means nothing is
    /// queued. Upon failure, `Fail` is returned instead.
    ///
    pub fn recv_from(&mut self, sd: SocketDesc, buf: &mut [u8]) -> Result<(usize, SocketAddrV4), Fail> {
        trace!("recv_from(): sd={:?} len={:?}", sd, buf.len());
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        let datagram: &mut Datagram = socket.datagram_mut()?;
        if let Some(errno) = datagram.get_receiver().take_error() {
            return Err(Fail::new(errno, "datagram socket error"));
        }
        match datagram.get_receiver().pop(buf) {
            Some(DatagramRecord { len, remote }) => Ok((len.min(buf.len()), remote)),
            None => Err(Fail::new(EAGAIN, "no datagram available")),
        }
    }

    ///
    /// **Brief**
    ///
    /// Closes the socket referred to by `sd`. A stream sends a FIN once queued data drains and is freed when the
    /// connection is over. Connections a listener spawned but nobody accepted are reset.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn close(&mut self, sd: SocketDesc) -> Result<(), Fail> {
        trace!("close(): sd={:?}", sd);
        let socket: &mut Socket = self.engine.get_socket_mut(sd)?;
        if socket.is_closed() {
            return Err(Fail::new(EBADF, "socket is already closed"));
        }
        socket.set_closed();
        match socket.get_type() {
            SocketType::Datagram => self.engine.release(sd),
            SocketType::Stream => {
                let children: Vec<SocketDesc> = self
                    .engine
                    .sockets
                    .iter()
                    .filter(|(_, socket)| socket.get_parent() == Some(sd))
                    .map(|(index, _)| SocketDesc::from(index))
                    .collect();
                for child in children {
                    let socket: &mut Socket = self.engine.get_socket_mut(child)?;
                    socket.set_closed();
                    socket.take_parent();
                    self.engine
                        .with_stream(child, |stream, host| stream.abort_with_reset(host))?;
                    self.engine.release(child);
                }
                let state: State = self.engine.with_stream(sd, |stream, host| {
                    stream.close(host);
                    stream.get_state()
                })?;
                if state == State::Closed {
                    self.engine.release(sd);
                }
            },
        }
        self.run_actions();
        Ok(())
    }

    /// Stops sending on the stream socket referred to by `sd`. A FIN follows the data already queued.
    pub fn shutdown_output(&mut self, sd: SocketDesc) -> Result<(), Fail> {
        trace!("shutdown_output(): sd={:?}", sd);
        let result: Result<(), Fail> = self
            .engine
            .with_stream(sd, |stream, host| stream.shutdown_output(host))?;
        self.run_actions();
        result
    }

    /// Stops receiving on the stream socket referred to by `sd`. Data arriving afterwards resets the connection.
    pub fn shutdown_input(&mut self, sd: SocketDesc) -> Result<(), Fail> {
        trace!("shutdown_input(): sd={:?}", sd);
        let result: Result<(), Fail> = self
            .engine
            .with_stream(sd, |stream, host| stream.shutdown_input(host))?;
        self.run_actions();
        result
    }

    pub fn set_receive_buffer_size(&mut self, sd: SocketDesc, size: usize) -> Result<(), Fail> {
        trace!("set_receive_buffer_size(): sd={:?} size={:?}", sd, size);
        match self.engine.get_socket_mut(sd)?.get_transport() {
            Transport::Stream(stream) => stream.set_receive_buffer_size(size),
            Transport::Datagram(datagram) => match datagram.get_receiver().resize(size) {
                true => Ok(()),
                false => Err(Fail::new(EINVAL, "receive buffer too small for queued datagrams")),
            },
        }
    }

    pub fn set_send_buffer_size(&mut self, sd: SocketDesc, size: usize) -> Result<(), Fail> {
        trace!("set_send_buffer_size(): sd={:?} size={:?}", sd, size);
        match self.engine.get_socket_mut(sd)?.get_transport() {
            Transport::Stream(stream) => stream.set_send_buffer_size(size),
            Transport::Datagram(datagram) => {
                datagram.set_send_buffer_size(size);
                Ok(())
            },
        }
    }

    ///
    /// **Brief**
    ///
    /// Joins the datagram socket referred to by `sd` to the multicast `group`. The first socket to join makes the
    /// host report its membership.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead.
    ///
    pub fn join_group(&mut self, sd: SocketDesc, group: Ipv4Addr) -> Result<(), Fail> {
        trace!("join_group(): sd={:?} group={:?}", sd, group);
        if !group.is_multicast() {
            return Err(Fail::new(EINVAL, "not a multicast group"));
        }
        if !self.engine.get_socket_mut(sd)?.datagram_mut()?.add_group(group) {
            return Err(Fail::new(EADDRINUSE, "socket is already a member of the group"));
        }
        let interval: Duration = self.engine.config.inet.get_unsolicited_report_interval();
        let igmp_mux: ConduitId = self.engine.nodes.igmp_mux;
        let entry: &mut Group = self.engine.memberships.entry(group).or_insert_with(|| Group {
            membership: Membership::new(),
            conduit: None,
        });
        let effects: Vec<MembershipEffect> = entry.membership.join(interval);
        if entry.conduit.is_none() {
            let leaf: ConduitId = self.graph.add_protocol("igmp membership", Some(Receiver::Membership(group)));
            self.graph.connect_ab(leaf, igmp_mux, u32::from(group) as MuxKey);
            entry.conduit = Some(leaf);
        }
        self.engine.apply_membership_effects(group, effects);
        self.run_actions();
        Ok(())
    }

    /// Takes the datagram socket referred to by `sd` out of the multicast `group`.
    pub fn leave_group(&mut self, sd: SocketDesc, group: Ipv4Addr) -> Result<(), Fail> {
        trace!("leave_group(): sd={:?} group={:?}", sd, group);
        if !self.engine.get_socket_mut(sd)?.datagram_mut()?.remove_group(group) {
            return Err(Fail::new(EADDRNOTAVAIL, "socket is not a member of the group"));
        }
        self.leave(group);
        self.run_actions();
        Ok(())
    }

    /// One socket less in `group`. The last one out removes the host's membership.
    fn leave(&mut self, group: Ipv4Addr) {
        let effects: Vec<MembershipEffect> = match self.engine.memberships.get_mut(&group) {
            Some(entry) => entry.membership.leave(),
            None => return,
        };
        self.engine.apply_membership_effects(group, effects);
        if let Some(entry) = self.engine.forget_group(group) {
            if let Some(leaf) = entry.conduit {
                self.graph
                    .remove_b(self.engine.nodes.igmp_mux, u32::from(group) as MuxKey);
                self.graph.remove_subtree(leaf);
            }
        }
    }

    ///
    /// **Brief**
    ///
    /// Takes the pending error of the socket referred to by `sd`: the reason a connection failed, or an error
    /// reported for a datagram socket.
    ///
    /// **Return Value**
    ///
    /// The pending error, if any. Upon failure, `Fail` is returned instead.
    ///
    pub fn get_error(&mut self, sd: SocketDesc) -> Result<Option<Fail>, Fail> {
        match self.engine.get_socket_mut(sd)?.get_transport() {
            Transport::Stream(stream) => Ok(stream.get_error()),
            Transport::Datagram(datagram) => Ok(datagram
                .get_receiver()
                .take_error()
                .map(|errno| Fail::new(errno, "datagram socket error"))),
        }
    }

    /// Would a read on the socket referred to by `sd` return without `EAGAIN`?
    pub fn is_readable(&mut self, sd: SocketDesc) -> Result<bool, Fail> {
        match self.engine.get_socket_mut(sd)?.get_transport() {
            Transport::Stream(stream) => Ok(stream.is_readable()),
            Transport::Datagram(datagram) => Ok(datagram.get_receiver().is_readable()),
        }
    }

    /// Would a write on the socket referred to by `sd` return without `EAGAIN`?
    pub fn is_writable(&mut self, sd: SocketDesc) -> Result<bool, Fail> {
        match self.engine.get_socket_mut(sd)?.get_transport() {
            Transport::Stream(stream) => Ok(stream.is_writable()),
            Transport::Datagram(_) => Ok(true),
        }
    }

    pub fn get_local(&self, sd: SocketDesc) -> Result<Option<SocketAddrV4>, Fail> {
        Ok(self.engine.get_socket(sd)?.get_local())
    }

    pub fn get_remote(&self, sd: SocketDesc) -> Result<Option<SocketAddrV4>, Fail> {
        Ok(self.engine.get_socket(sd)?.get_remote())
    }

    /// Sets how long blocking operations on `sd` wait. `None` waits forever.
    pub fn set_timeout(&mut self, sd: SocketDesc, timeout: Option<Duration>) -> Result<(), Fail> {
        trace!("set_timeout(): sd={:?} timeout={:?}", sd, timeout);
        self.engine.get_socket_mut(sd)?.set_timeout(timeout);
        Ok(())
    }

    pub fn get_timeout(&self, sd: SocketDesc) -> Result<Option<Duration>, Fail> {
        Ok(self.engine.get_socket(sd)?.get_timeout())
    }

    //==================================================================================================================
    // Echo
    //==================================================================================================================

    ///
    /// **Brief**
    ///
    /// Sends an ICMP echo request carrying `payload` to `remote`.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, the identifier to poll with [InetStack::is_reachable] is returned. Upon failure,
    /// `Fail` is returned instead.
    ///
    pub fn ping(&mut self, remote: Ipv4Addr, payload: &[u8]) -> Result<u16, Fail> {
        trace!("ping(): remote={:?} len={:?}", remote, payload.len());
        self.engine.route(remote)?;
        let id: u16 = self.engine.send_echo(remote, payload);
        self.run_actions();
        Ok(id)
    }

    /// Has the echo request `id` been answered?
    pub fn is_reachable(&self, id: u16) -> Result<bool, Fail> {
        match self.engine.echoes.get(&id) {
            Some(echo) => Ok(echo.replied),
            None => Err(Fail::new(EINVAL, "no such echo request")),
        }
    }

    /// Forgets the echo request `id`.
    pub fn cancel_echo(&mut self, id: u16) {
        self.engine.echoes.remove(&id);
    }
}
