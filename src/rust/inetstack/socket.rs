// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        conduit::ConduitId,
        protocols::{
            tcp::Stream,
            udp::DatagramReceiver,
        },
    },
    runtime::{
        fail::Fail,
        network::config::TcpConfig,
    },
};
use ::libc::ENOTSUP;
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Default size of the receive queue of a datagram socket.
pub const DEFAULT_DATAGRAM_BUFFER_SIZE: usize = 16 * 1024;

/// Largest payload of a single UDP datagram.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Socket descriptor.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SocketDesc(u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketType {
    /// Connection-oriented byte stream (TCP).
    Stream,
    /// Connectionless datagrams (UDP).
    Datagram,
}

/// State of a datagram socket.
pub struct Datagram {
    receiver: DatagramReceiver,
    send_buffer_size: usize,
    groups: Vec<Ipv4Addr>,
}

pub enum Transport {
    Stream(Stream),
    Datagram(Datagram),
}

/// A socket of the stack: the transport state plus the bookkeeping that ties it to the conduit graph.
pub struct Socket {
    transport: Transport,
    local: Option<SocketAddrV4>,
    remote: Option<SocketAddrV4>,
    /// Leaf protocol of the socket's path in the graph, once installed.
    conduit: Option<ConduitId>,
    /// Listener that spawned this connection and has not handed it out yet.
    parent: Option<SocketDesc>,
    /// The local port goes back to the ephemeral pool on release.
    ephemeral: bool,
    /// The application closed the socket. It is released once the transport is done with it.
    closed: bool,
    /// The connection completed its handshake at least once.
    established: bool,
    /// A release is queued.
    releasing: bool,
    timeout: Option<Duration>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Datagram {
    pub fn new(size: usize) -> Self {
        Self {
            receiver: DatagramReceiver::new(size),
            send_buffer_size: MAX_DATAGRAM_SIZE,
            groups: Vec::new(),
        }
    }

    pub fn get_receiver(&mut self) -> &mut DatagramReceiver {
        &mut self.receiver
    }

    pub fn get_send_buffer_size(&self) -> usize {
        self.send_buffer_size
    }

    pub fn set_send_buffer_size(&mut self, size: usize) {
        self.send_buffer_size = size.min(MAX_DATAGRAM_SIZE);
    }

    pub fn get_groups(&self) -> &[Ipv4Addr] {
        &self.groups
    }

    /// Records membership of `group`. Returns false if the socket is a member already.
    pub fn add_group(&mut self, group: Ipv4Addr) -> bool {
        if self.groups.contains(&group) {
            return false;
        }
        self.groups.push(group);
        true
    }

    /// Drops membership of `group`. Returns false if the socket was not a member.
    pub fn remove_group(&mut self, group: Ipv4Addr) -> bool {
        let count: usize = self.groups.len();
        self.groups.retain(|g| *g != group);
        self.groups.len() != count
    }

    pub fn take_groups(&mut self) -> Vec<Ipv4Addr> {
        ::std::mem::take(&mut self.groups)
    }
}

impl Socket {
    pub fn new_stream(config: &TcpConfig) -> Self {
        Self::new(Transport::Stream(Stream::new(config)))
    }

    pub fn new_datagram(size: usize) -> Self {
        Self::new(Transport::Datagram(Datagram::new(size)))
    }

    /// Wraps a connection spawned by the listener `parent`.
    pub fn new_child(stream: Stream, parent: SocketDesc) -> Self {
        let mut socket: Self = Self::new(Transport::Stream(stream));
        if let Transport::Stream(stream) = &socket.transport {
            socket.local = Some(stream.get_local());
            socket.remote = Some(stream.get_remote());
        }
        socket.parent = Some(parent);
        socket
    }

    fn new(transport: Transport) -> Self {
        Self {
            transport,
            local: None,
            remote: None,
            conduit: None,
            parent: None,
            ephemeral: false,
            closed: false,
            established: false,
            releasing: false,
            timeout: None,
        }
    }

    pub fn get_type(&self) -> SocketType {
        match self.transport {
            Transport::Stream(_) => SocketType::Stream,
            Transport::Datagram(_) => SocketType::Datagram,
        }
    }

    pub fn get_transport(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn stream(&self) -> Option<&Stream> {
        match &self.transport {
            Transport::Stream(stream) => Some(stream),
            Transport::Datagram(_) => None,
        }
    }

    /// The TCP control block, or `ENOTSUP` for a datagram socket.
    pub fn stream_mut(&mut self) -> Result<&mut Stream, Fail> {
        match &mut self.transport {
            Transport::Stream(stream) => Ok(stream),
            Transport::Datagram(_) => Err(Fail::new(ENOTSUP, "operation not supported on datagram sockets")),
        }
    }

    /// The UDP state, or `ENOTSUP` for a stream socket.
    pub fn datagram_mut(&mut self) -> Result<&mut Datagram, Fail> {
        match &mut self.transport {
            Transport::Datagram(datagram) => Ok(datagram),
            Transport::Stream(_) => Err(Fail::new(ENOTSUP, "operation not supported on stream sockets")),
        }
    }

    pub fn get_local(&self) -> Option<SocketAddrV4> {
        self.local
    }

    pub fn set_local(&mut self, local: Option<SocketAddrV4>) {
        self.local = local;
    }

    pub fn get_remote(&self) -> Option<SocketAddrV4> {
        self.remote
    }

    pub fn set_remote(&mut self, remote: Option<SocketAddrV4>) {
        self.remote = remote;
    }

    pub fn get_conduit(&self) -> Option<ConduitId> {
        self.conduit
    }

    pub fn set_conduit(&mut self, conduit: Option<ConduitId>) {
        self.conduit = conduit;
    }

    pub fn get_parent(&self) -> Option<SocketDesc> {
        self.parent
    }

    pub fn take_parent(&mut self) -> Option<SocketDesc> {
        self.parent.take()
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    pub fn set_ephemeral(&mut self, ephemeral: bool) {
        self.ephemeral = ephemeral;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn set_closed(&mut self) {
        self.closed = true;
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn set_established(&mut self) {
        self.established = true;
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing
    }

    /// Marks the socket for release. Returns false if it was marked already.
    pub fn set_releasing(&mut self) -> bool {
        !::std::mem::replace(&mut self.releasing, true)
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<SocketDesc> for u32 {
    fn from(val: SocketDesc) -> Self {
        val.0
    }
}

impl From<u32> for SocketDesc {
    fn from(val: u32) -> Self {
        SocketDesc(val)
    }
}

impl From<SocketDesc> for usize {
    fn from(val: SocketDesc) -> Self {
        val.0 as usize
    }
}

impl From<usize> for SocketDesc {
    fn from(val: usize) -> Self {
        SocketDesc(val as u32)
    }
}
