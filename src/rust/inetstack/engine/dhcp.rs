// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Action,
    Engine,
    Timeout,
};
use crate::{
    inetstack::{
        conduit::messenger::Messenger,
        protocols::{
            dhcp::{
                DhcpClient,
                DhcpEffect,
                DhcpMessage,
                Lease,
                DHCP_CLIENT_PORT,
                DHCP_SERVER_PORT,
            },
            ip::IpProtocol,
            udp::DatagramRecord,
            MAX_HEADER_SIZE,
        },
        socket::Socket,
        SocketDesc,
    },
    runtime::{
        fail::Fail,
        network::types::MacAddress,
        timer::TimerId,
    },
};
use ::libc::{
    EALREADY,
    EINVAL,
};
use ::rand::Rng;
use ::std::{
    net::Ipv4Addr,
    time::Instant,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Largest DHCP message a client must accept (RFC 2131 2).
const MAX_DHCP_MESSAGE_SIZE: usize = 576;

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Engine {
    /// Starts a DHCP client on the interface at `scope`. Messages travel through `socket`, bound to the client port.
    pub fn start_dhcp(&mut self, scope: u32, socket: SocketDesc) -> Result<(), Fail> {
        let link_addr: MacAddress = match self.get_interface(scope) {
            Some(iface) if !iface.link_addr.is_nil() => iface.link_addr,
            _ => return Err(Fail::new(EINVAL, "no such interface")),
        };
        if self.dhcp.contains_key(&scope) {
            return Err(Fail::new(EALREADY, "DHCP client already running"));
        }
        self.dhcp_socket = Some(socket);
        let octets: [u8; 6] = link_addr.octets();
        let xid: u32 = self.rng.gen::<u32>() ^ u32::from_be_bytes([octets[2], octets[3], octets[4], octets[5]]);
        let mut client: DhcpClient = DhcpClient::new(link_addr);
        let effects: Vec<DhcpEffect> = client.start(xid);
        self.dhcp.insert(scope, client);
        info!("start_dhcp(): scope {:?} ({:?})", scope, link_addr);
        self.apply_dhcp_effects(scope, effects);
        Ok(())
    }

    /// Stops the DHCP client of `scope`, giving its lease back. Returns the shared socket once no client is left.
    pub fn stop_dhcp(&mut self, scope: u32) -> Result<Option<SocketDesc>, Fail> {
        let effects: Vec<DhcpEffect> = match self.dhcp.get_mut(&scope) {
            Some(client) => client.stop(),
            None => return Err(Fail::new(EINVAL, "no DHCP client on this interface")),
        };
        self.apply_dhcp_effects(scope, effects);
        if let Some(mut client) = self.dhcp.remove(&scope) {
            self.cancel_timer(client.take_timer());
        }
        info!("stop_dhcp(): scope {:?}", scope);
        if self.dhcp.is_empty() {
            return Ok(self.dhcp_socket.take());
        }
        Ok(None)
    }

    pub fn get_dhcp_client(&self, scope: u32) -> Option<&DhcpClient> {
        self.dhcp.get(&scope)
    }

    pub(super) fn dhcp_expired(&mut self, scope: u32) {
        let now: Instant = self.timers.now();
        let effects: Vec<DhcpEffect> = match self.dhcp.get_mut(&scope) {
            Some(client) => {
                client.set_timer(None);
                client.expired(now)
            },
            None => return,
        };
        self.apply_dhcp_effects(scope, effects);
    }

    /// Hands every message queued on the client port to the clients. Each one keeps the replies to its own exchange.
    pub fn dhcp_receive(&mut self) {
        let desc: SocketDesc = match self.dhcp_socket {
            Some(desc) => desc,
            None => return,
        };
        let mut buf: [u8; MAX_DHCP_MESSAGE_SIZE] = [0; MAX_DHCP_MESSAGE_SIZE];
        loop {
            let record: DatagramRecord = match self
                .sockets
                .get_mut(usize::from(desc))
                .map(Socket::datagram_mut)
            {
                Some(Ok(datagram)) => match datagram.get_receiver().pop(&mut buf) {
                    Some(record) => record,
                    None => return,
                },
                _ => return,
            };
            let message: DhcpMessage = match DhcpMessage::parse(&buf[..record.len.min(buf.len())]) {
                Ok(message) => message,
                Err(e) => {
                    debug!("dhcp_receive(): dropping message from {:?} ({:?})", record.remote, e);
                    continue;
                },
            };
            let now: Instant = self.timers.now();
            let scopes: Vec<u32> = self.dhcp.keys().copied().collect();
            for scope in scopes {
                let effects: Vec<DhcpEffect> = match self.dhcp.get_mut(&scope) {
                    Some(client) => client.input(now, &message),
                    None => continue,
                };
                self.apply_dhcp_effects(scope, effects);
            }
        }
    }

    /// Carries out what a transition of the client of `scope` asked for.
    fn apply_dhcp_effects(&mut self, scope: u32, effects: Vec<DhcpEffect>) {
        for effect in effects {
            match effect {
                DhcpEffect::Send { message, src, dst } => {
                    let mut m: Messenger = Messenger::new_output(&message, MAX_HEADER_SIZE);
                    m.set_type(IpProtocol::UDP as u32);
                    m.set_scope_id(scope);
                    if !src.is_unspecified() {
                        m.set_local(Some(src));
                    }
                    m.set_local_port(DHCP_CLIENT_PORT);
                    m.set_remote(Some(dst));
                    m.set_remote_port(DHCP_SERVER_PORT);
                    self.actions.push_back(Action::Output(self.nodes.udp, m));
                },
                DhcpEffect::Arm(delay) => {
                    let old: Option<TimerId> = self.dhcp.get_mut(&scope).and_then(DhcpClient::take_timer);
                    self.cancel_timer(old);
                    let timer: TimerId = self.timers.schedule_after(delay, Timeout::Dhcp(scope));
                    if let Some(client) = self.dhcp.get_mut(&scope) {
                        client.set_timer(Some(timer));
                    }
                },
                DhcpEffect::Disarm => {
                    let old: Option<TimerId> = self.dhcp.get_mut(&scope).and_then(DhcpClient::take_timer);
                    self.cancel_timer(old);
                },
                DhcpEffect::Configure(lease) => self.configure_lease(scope, &lease),
                // The RELEASE ahead of it still needs the address and the route.
                DhcpEffect::Unconfigure(lease) => self.actions.push_back(Action::Unconfigure(scope, lease)),
            }
        }
    }

    fn configure_lease(&mut self, scope: u32, lease: &Lease) {
        let addr: Ipv4Addr = lease.get_addr();
        info!(
            "configure_lease(): {:?}/{:?} on scope {:?} from {:?}",
            addr,
            lease.get_prefix(),
            scope,
            lease.get_server()
        );
        let assigned: bool = self.addresses.locals(scope).any(|a| a.get_addr() == addr);
        if !assigned {
            self.assign_address(scope, addr, lease.get_prefix());
        }
        if let Some(router) = lease.get_router() {
            self.gateway = Some(router);
        }
    }

    pub fn unconfigure_lease(&mut self, scope: u32, lease: &Lease) {
        info!("unconfigure_lease(): {:?} on scope {:?}", lease.get_addr(), scope);
        self.unassign_address(scope, lease.get_addr());
        let router: Option<Ipv4Addr> = lease.get_router();
        // A renewed lease may name the same router.
        let still_leased: bool = self
            .dhcp
            .values()
            .filter_map(DhcpClient::get_lease)
            .any(|current| current.get_router() == router);
        if router.is_some() && self.gateway == router && !still_leased {
            self.gateway = None;
        }
    }
}
