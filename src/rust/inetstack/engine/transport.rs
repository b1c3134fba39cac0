// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Action,
    Engine,
    FLAG_BROADCAST,
};
use crate::{
    inetstack::{
        conduit::messenger::{
            fold_checksum,
            sum_words,
            Messenger,
        },
        protocols::{
            ip::IpProtocol,
            ipv4::pseudo_header_sum,
            tcp::{
                reset_for,
                State,
                Stream,
                TcpHeader,
            },
            udp::{
                UdpHeader,
                UDP_HEADER_SIZE,
            },
        },
        socket::Socket,
        SocketDesc,
    },
    runtime::fail::Fail,
};
use ::libc::{
    ECONNREFUSED,
    EHOSTUNREACH,
    EMSGSIZE,
    ENETUNREACH,
};
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    time::Duration,
};

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    //==================================================================================================================
    // UDP
    //==================================================================================================================

    pub(super) fn udp_input(&mut self, m: &mut Messenger) -> bool {
        let (local, remote): (Ipv4Addr, Ipv4Addr) = match (m.get_local(), m.get_remote()) {
            (Some(local), Some(remote)) => (local, remote),
            _ => return false,
        };
        let header: UdpHeader = match UdpHeader::parse(remote, local, m.data(), false) {
            Ok(header) => header,
            Err(e) => {
                debug!("udp_input(): dropping datagram ({:?})", e);
                return false;
            },
        };
        let len: usize = u16::from_be_bytes([m.data()[4], m.data()[5]]) as usize;
        m.set_local_port(header.dest_port());
        m.set_remote_port(header.src_port());
        m.move_position(UDP_HEADER_SIZE as isize);
        if m.truncate(len - UDP_HEADER_SIZE).is_err() {
            return false;
        }
        true
    }

    pub(super) fn udp_output(&mut self, m: &mut Messenger) -> bool {
        let dst: Ipv4Addr = match m.get_remote() {
            Some(dst) => dst,
            None => return false,
        };
        let src: Ipv4Addr = match self.resolve_source(m, dst) {
            Some(src) => src,
            None => {
                warn!("udp_output(): no source address towards {:?}", dst);
                return false;
            },
        };
        let header: UdpHeader = UdpHeader::new(m.get_local_port(), m.get_remote_port());
        let mut buf: [u8; UDP_HEADER_SIZE] = [0; UDP_HEADER_SIZE];
        header.serialize(&mut buf, src, dst, m.data(), false);
        match m.prepend(UDP_HEADER_SIZE) {
            Ok(hdr) => {
                hdr.copy_from_slice(&buf);
                true
            },
            Err(e) => {
                warn!("udp_output(): {:?}", e);
                false
            },
        }
    }

    /// Pins the source address of an outgoing segment, so that the transport checksum and the IP header agree.
    fn resolve_source(&self, m: &mut Messenger, dst: Ipv4Addr) -> Option<Ipv4Addr> {
        let src: Ipv4Addr = match m.get_local().filter(|src| !src.is_unspecified()) {
            Some(src) => src,
            None => {
                let (scope, _): (u32, Ipv4Addr) = self.route_output(m, dst).ok()?;
                self.source_on(scope, dst)?
            },
        };
        m.set_local(Some(src));
        Some(src)
    }

    /// Filters datagrams reaching the path of a UDP socket.
    pub(super) fn datagram_input(&mut self, desc: SocketDesc, m: &mut Messenger) -> bool {
        let socket: &mut Socket = match self.sockets.get_mut(usize::from(desc)) {
            Some(socket) => socket,
            None => return false,
        };
        let dst: Option<Ipv4Addr> = m.get_local();
        if let Some(local) = socket.get_local() {
            if !local.ip().is_unspecified() && Some(*local.ip()) != dst {
                return false;
            }
        }
        if let Some(remote) = socket.get_remote() {
            if Some(*remote.ip()) != m.get_remote() || remote.port() != m.get_remote_port() {
                return false;
            }
        }
        if let Some(group) = dst.filter(|dst| dst.is_multicast()) {
            match socket.datagram_mut() {
                Ok(datagram) if datagram.get_groups().contains(&group) => (),
                _ => return false,
            }
        }
        true
    }

    /// Records an ICMP error on a connected socket. Unconnected sockets never see errors.
    pub(super) fn datagram_error(&mut self, desc: SocketDesc, m: &mut Messenger) -> bool {
        let errno: i32 = m.get_errno();
        let socket: &mut Socket = match self.sockets.get_mut(usize::from(desc)) {
            Some(socket) => socket,
            None => return false,
        };
        match socket.get_remote() {
            Some(remote) if Some(*remote.ip()) == m.get_remote() && remote.port() == m.get_remote_port() => (),
            _ => return false,
        }
        if let Ok(datagram) = socket.datagram_mut() {
            match errno {
                ECONNREFUSED | ENETUNREACH | EHOSTUNREACH => {
                    debug!("datagram_error(): {:?} errno={:?}", desc, errno);
                    datagram.get_receiver().set_error(errno);
                },
                _ => (),
            }
        }
        false
    }

    /// Queues a datagram on its socket.
    pub(super) fn socket_input(&mut self, desc: SocketDesc, m: &mut Messenger) -> bool {
        let remote: SocketAddrV4 = match m.get_remote() {
            Some(addr) => SocketAddrV4::new(addr, m.get_remote_port()),
            None => return false,
        };
        if let Some(Ok(datagram)) = self.sockets.get_mut(usize::from(desc)).map(Socket::datagram_mut) {
            datagram.get_receiver().push(remote, m.data());
        }
        false
    }

    //==================================================================================================================
    // TCP
    //==================================================================================================================

    pub(super) fn tcp_input(&mut self, m: &mut Messenger) -> bool {
        if m.get_flag() & FLAG_BROADCAST != 0 {
            return false;
        }
        let (local, remote): (Ipv4Addr, Ipv4Addr) = match (m.get_local(), m.get_remote()) {
            (Some(local), Some(remote)) => (local, remote),
            _ => return false,
        };
        let rx_offload: bool = self.config.tcp.get_rx_checksum_offload();
        let (header, _): (TcpHeader, usize) = match TcpHeader::parse(remote, local, m.data(), rx_offload) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("tcp_input(): dropping segment ({:?})", e);
                return false;
            },
        };
        m.set_local_port(header.dst_port);
        m.set_remote_port(header.src_port);
        true
    }

    pub(super) fn tcp_output(&mut self, m: &mut Messenger) -> bool {
        let dst: Ipv4Addr = match m.get_remote() {
            Some(dst) => dst,
            None => return false,
        };
        let src: Ipv4Addr = match self.resolve_source(m, dst) {
            Some(src) => src,
            None => {
                warn!("tcp_output(): no source address towards {:?}", dst);
                return false;
            },
        };
        if !self.config.tcp.get_tx_checksum_offload() {
            let len: usize = m.get_length();
            let sum: u32 = pseudo_header_sum(src, dst, IpProtocol::TCP as u8, len);
            let segment: &mut [u8] = m.data_mut();
            segment[16..18].copy_from_slice(&[0, 0]);
            let checksum: u16 = fold_checksum(sum_words(segment, sum));
            segment[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
        true
    }

    /// Answers a segment for a port nobody listens on with a reset.
    pub(super) fn tcp_unbound(&mut self, m: &mut Messenger) -> bool {
        let (local, remote): (SocketAddrV4, SocketAddrV4) = match Self::endpoints(m) {
            Some(endpoints) => endpoints,
            None => return false,
        };
        let (header, offset): (TcpHeader, usize) = match TcpHeader::parse(*remote.ip(), *local.ip(), m.data(), true) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };
        trace!("tcp_unbound(): {:?} -> {:?}", remote, local);
        if let Some(rst) = reset_for(&header, m.get_length() - offset, local, remote) {
            self.actions.push_back(Action::Output(self.nodes.tcp, rst));
        }
        false
    }

    fn endpoints(m: &Messenger) -> Option<(SocketAddrV4, SocketAddrV4)> {
        Some((
            SocketAddrV4::new(m.get_local()?, m.get_local_port()),
            SocketAddrV4::new(m.get_remote()?, m.get_remote_port()),
        ))
    }

    pub(super) fn stream_input(&mut self, desc: SocketDesc, m: &mut Messenger) -> bool {
        let (local, remote): (SocketAddrV4, SocketAddrV4) = match Self::endpoints(m) {
            Some(endpoints) => endpoints,
            None => return false,
        };
        let (header, offset): (TcpHeader, usize) = match TcpHeader::parse(*remote.ip(), *local.ip(), m.data(), true) {
            Ok(parsed) => parsed,
            Err(_) => return false,
        };
        let data: &[u8] = &m.data()[offset..];
        let state: State = match self.sockets.get(usize::from(desc)).and_then(Socket::stream) {
            Some(stream) => stream.get_state(),
            None => return false,
        };
        let result: Result<(), Fail> = match state {
            State::Listen => self.listener_input(desc, &header, data, local, remote),
            State::TimeWait if header.syn && !header.ack => {
                // A new incarnation of the connection may take over from TimeWait (RFC 1122 4.2.2.13).
                let closed: Result<bool, Fail> = self.with_stream(desc, |stream, host| {
                    stream.input(host, &header, data);
                    stream.get_state() == State::Closed
                });
                if let Ok(true) = closed {
                    self.actions.push_back(Action::Redeliver(m.clone()));
                }
                closed.map(|_| ())
            },
            _ => self.with_stream(desc, |stream, host| stream.input(host, &header, data)),
        };
        if let Err(e) = result {
            warn!("stream_input(): {:?} ({:?})", desc, e);
        }
        false
    }

    /// A segment reached a listener: spawns the control block of the new connection and feeds the segment to it.
    fn listener_input(
        &mut self,
        desc: SocketDesc,
        header: &TcpHeader,
        data: &[u8],
        local: SocketAddrV4,
        remote: SocketAddrV4,
    ) -> Result<(), Fail> {
        let mss: usize = self.mss_for(*remote.ip());
        let stream: Option<Stream> =
            self.with_stream(desc, |listener, host| listener.spawn(host, header, data, local, remote, mss))?;
        let stream: Stream = match stream {
            Some(stream) => stream,
            None => return Ok(()),
        };
        let (timeout, ephemeral): (Option<Duration>, bool) = {
            let listener: &Socket = self.get_socket(desc)?;
            (listener.get_timeout(), listener.is_ephemeral())
        };
        let mut socket: Socket = Socket::new_child(stream, desc);
        socket.set_timeout(timeout);
        // Whichever of the listener and its connections goes last hands the port back.
        socket.set_ephemeral(ephemeral);
        let child: SocketDesc = SocketDesc::from(self.sockets.insert(socket));
        debug!("listener_input(): {:?} spawned {:?} for {:?}", desc, child, remote);
        self.actions.push_back(Action::Install(child));
        self.with_stream(child, |stream, host| stream.input(host, header, data))
    }

    pub(super) fn stream_error(&mut self, desc: SocketDesc, m: &mut Messenger) -> bool {
        let errno: i32 = m.get_errno();
        let mtu: usize = m.get_flag() as usize;
        let result: Result<(), Fail> = self.with_stream(desc, |stream, host| {
            if errno == EMSGSIZE {
                stream.set_path_mtu(mtu);
            }
            stream.error(host, errno)
        });
        if let Err(e) = result {
            debug!("stream_error(): {:?} ({:?})", desc, e);
        }
        false
    }
}
