// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! DHCP client (RFC 2131): the message codec and the lease state machine of one interface.
//!
//! The client does no I/O of its own. Every transition returns the [DhcpEffect]s the engine must carry out: messages
//! to send from the client port, the one timer to (re)arm, and the address to configure or take down.

mod message;

pub use self::message::{
    DhcpMessage,
    DhcpMessageType,
    DhcpOptions,
    DHCP_CLIENT_PORT,
    DHCP_SERVER_PORT,
    FLAG_BROADCAST,
    REQUEST_LIST,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::types::MacAddress,
    timer::TimerId,
};
use ::libc::{
    EBADMSG,
    EINVAL,
};
use ::std::{
    net::Ipv4Addr,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Wait before the first retransmission. Doubled on every attempt.
const MIN_RETRANSMIT_WAIT: Duration = Duration::from_secs(4);

/// Messages sent per exchange before the client gives up.
const MAX_ATTEMPTS: u32 = 4;

/// Shortest wait between requests while renewing or rebinding (RFC 2131 4.4.5).
const MIN_RENEW_WAIT: Duration = Duration::from_secs(60);

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DhcpState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Rebinding,
}

/// Configuration handed out by a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lease {
    addr: Ipv4Addr,
    prefix: u8,
    server: Ipv4Addr,
    router: Option<Ipv4Addr>,
    dns_servers: Vec<Ipv4Addr>,
    domain_name: Option<String>,
    interface_mtu: Option<u16>,
    duration: Duration,
    renewal: Duration,
    rebinding: Duration,
}

/// Side effects requested by a client transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DhcpEffect {
    /// Send a message from the client port to the server port of `dst`. An unspecified `src` lets the stack pick.
    Send {
        message: Vec<u8>,
        src: Ipv4Addr,
        dst: Ipv4Addr,
    },
    /// (Re)arm the client timer.
    Arm(Duration),
    Disarm,
    /// Assign the leased address and install the router.
    Configure(Lease),
    /// Take down what a lease configured.
    Unconfigure(Lease),
}

/// The client side of DHCP on one interface.
#[derive(Debug)]
pub struct DhcpClient {
    state: DhcpState,
    chaddr: MacAddress,
    xid: u32,
    /// Messages sent in the current exchange.
    attempts: u32,
    /// When the last request went out. A lease granted in answer to it starts there.
    requested_at: Option<Instant>,
    offer: Option<Lease>,
    lease: Option<Lease>,
    /// Start of the current lease.
    epoch: Option<Instant>,
    timer: Option<TimerId>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Lease {
    /// Reads the configuration out of an OFFER or an ACK.
    pub fn from_reply(reply: &DhcpMessage) -> Result<Self, Fail> {
        let addr: Ipv4Addr = reply.get_yiaddr();
        if !is_assignable(addr) {
            return Err(Fail::new(EINVAL, "DHCP server offered an unusable address"));
        }
        let options: &DhcpOptions = reply.options();
        let server: Ipv4Addr = match options.server_id {
            Some(server) => server,
            None if !reply.get_siaddr().is_unspecified() => reply.get_siaddr(),
            None => return Err(Fail::new(EBADMSG, "DHCP reply without server identifier")),
        };
        let prefix: u8 = match options.subnet_mask.and_then(mask_to_prefix) {
            Some(prefix) => prefix,
            None => classful_prefix(addr),
        };
        let duration: Duration = Duration::from_secs(options.lease_time.unwrap_or(0) as u64);
        let renewal: Duration = options
            .renewal_time
            .map(|secs| Duration::from_secs(secs as u64))
            .filter(|t1| !t1.is_zero() && *t1 < duration)
            .unwrap_or(duration / 2);
        let rebinding: Duration = options
            .rebinding_time
            .map(|secs| Duration::from_secs(secs as u64))
            .filter(|t2| !t2.is_zero() && *t2 < duration)
            .unwrap_or(duration * 7 / 8);
        let renewal: Duration = if rebinding <= renewal {
            rebinding * 4 / 7
        } else {
            renewal
        };
        Ok(Self {
            addr,
            prefix,
            server,
            router: options.routers.first().copied(),
            dns_servers: options.dns_servers.clone(),
            domain_name: options.domain_name.clone(),
            interface_mtu: options.interface_mtu,
            duration,
            renewal,
            rebinding,
        })
    }

    pub fn get_addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn get_prefix(&self) -> u8 {
        self.prefix
    }

    pub fn get_server(&self) -> Ipv4Addr {
        self.server
    }

    pub fn get_router(&self) -> Option<Ipv4Addr> {
        self.router
    }

    pub fn get_dns_servers(&self) -> &[Ipv4Addr] {
        &self.dns_servers
    }

    pub fn get_domain_name(&self) -> Option<&str> {
        self.domain_name.as_deref()
    }

    pub fn get_interface_mtu(&self) -> Option<u16> {
        self.interface_mtu
    }

    pub fn get_duration(&self) -> Duration {
        self.duration
    }

    /// T1: when the client starts renewing with the server that granted the lease.
    pub fn get_renewal(&self) -> Duration {
        self.renewal
    }

    /// T2: when the client starts asking any server.
    pub fn get_rebinding(&self) -> Duration {
        self.rebinding
    }
}

impl DhcpClient {
    pub fn new(chaddr: MacAddress) -> Self {
        Self {
            state: DhcpState::Init,
            chaddr,
            xid: 0,
            attempts: 0,
            requested_at: None,
            offer: None,
            lease: None,
            epoch: None,
            timer: None,
        }
    }

    pub fn get_state(&self) -> DhcpState {
        self.state
    }

    pub fn get_lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn take_timer(&mut self) -> Option<TimerId> {
        self.timer.take()
    }

    pub fn set_timer(&mut self, timer: Option<TimerId>) {
        self.timer = timer;
    }

    /// Starts looking for a server, with `xid` naming this client's exchanges.
    pub fn start(&mut self, xid: u32) -> Vec<DhcpEffect> {
        if self.state != DhcpState::Init {
            return Vec::new();
        }
        self.xid = xid;
        self.select()
    }

    /// Gives the lease back, if there is one, and goes idle.
    pub fn stop(&mut self) -> Vec<DhcpEffect> {
        debug!("stop(): {:?} -> Init", self.state);
        let mut effects: Vec<DhcpEffect> = vec![DhcpEffect::Disarm];
        if let Some(lease) = self.lease.take() {
            let mut release: DhcpMessage = self.new_message(DhcpMessageType::Release);
            release.set_ciaddr(lease.addr);
            release.options_mut().server_id = Some(lease.server);
            effects.push(DhcpEffect::Send {
                message: release.serialize(),
                src: lease.addr,
                dst: lease.server,
            });
            effects.push(DhcpEffect::Unconfigure(lease));
        }
        self.reset();
        effects
    }

    /// The client timer fired.
    pub fn expired(&mut self, now: Instant) -> Vec<DhcpEffect> {
        match self.state {
            DhcpState::Selecting | DhcpState::Requesting => {
                self.attempts += 1;
                if self.attempts >= MAX_ATTEMPTS {
                    warn!("expired(): no answer from any DHCP server ({:?})", self.state);
                    self.reset();
                    return Vec::new();
                }
                let message: Vec<u8> = match self.state {
                    DhcpState::Selecting => self.discover(),
                    _ => self.request_offer(),
                };
                vec![
                    DhcpEffect::Send {
                        message,
                        src: Ipv4Addr::UNSPECIFIED,
                        dst: Ipv4Addr::BROADCAST,
                    },
                    DhcpEffect::Arm(retransmit_wait(self.attempts)),
                ]
            },
            DhcpState::Bound => {
                debug!("expired(): Bound -> Renewing");
                self.state = DhcpState::Renewing;
                self.renew(now)
            },
            DhcpState::Renewing => match self.deadline(Lease::get_rebinding) {
                Some(t2) if now < t2 => self.renew(now),
                _ => {
                    debug!("expired(): Renewing -> Rebinding");
                    self.state = DhcpState::Rebinding;
                    self.rebind(now)
                },
            },
            DhcpState::Rebinding => self.rebind(now),
            DhcpState::Init => Vec::new(),
        }
    }

    /// A message arrived on the client port.
    pub fn input(&mut self, now: Instant, reply: &DhcpMessage) -> Vec<DhcpEffect> {
        if !reply.is_ethernet_reply() || reply.get_xid() != self.xid || reply.get_chaddr() != self.chaddr {
            return Vec::new();
        }
        match (self.state, reply.get_message_type()) {
            (DhcpState::Selecting, Some(DhcpMessageType::Offer)) => match Lease::from_reply(reply) {
                Ok(offer) => {
                    debug!("input(): Selecting -> Requesting ({:?} from {:?})", offer.addr, offer.server);
                    self.offer = Some(offer);
                    self.state = DhcpState::Requesting;
                    self.attempts = 0;
                    self.requested_at = Some(now);
                    vec![
                        DhcpEffect::Send {
                            message: self.request_offer(),
                            src: Ipv4Addr::UNSPECIFIED,
                            dst: Ipv4Addr::BROADCAST,
                        },
                        DhcpEffect::Arm(retransmit_wait(0)),
                    ]
                },
                Err(e) => {
                    debug!("input(): ignoring offer ({:?})", e);
                    Vec::new()
                },
            },
            (DhcpState::Requesting, Some(DhcpMessageType::Ack))
            | (DhcpState::Renewing, Some(DhcpMessageType::Ack))
            | (DhcpState::Rebinding, Some(DhcpMessageType::Ack)) => match Lease::from_reply(reply) {
                Ok(lease) if !lease.duration.is_zero() => self.bind(now, lease),
                Ok(_) => self.decline("ACK without a lease time"),
                Err(e) => {
                    warn!("input(): {:?}", e);
                    self.decline("unusable ACK")
                },
            },
            (DhcpState::Requesting, Some(DhcpMessageType::Nak)) => self.decline("request refused"),
            (DhcpState::Renewing, Some(DhcpMessageType::Nak)) | (DhcpState::Rebinding, Some(DhcpMessageType::Nak)) => {
                // The lease is gone; look for a new one.
                warn!("input(): lease refused by the server");
                let mut effects: Vec<DhcpEffect> = Vec::new();
                if let Some(lease) = self.lease.take() {
                    effects.push(DhcpEffect::Unconfigure(lease));
                }
                effects.extend(self.select());
                effects
            },
            _ => Vec::new(),
        }
    }

    fn select(&mut self) -> Vec<DhcpEffect> {
        debug!("select(): {:?} -> Selecting", self.state);
        self.state = DhcpState::Selecting;
        self.attempts = 0;
        self.offer = None;
        self.epoch = None;
        vec![
            DhcpEffect::Send {
                message: self.discover(),
                src: Ipv4Addr::UNSPECIFIED,
                dst: Ipv4Addr::BROADCAST,
            },
            DhcpEffect::Arm(retransmit_wait(0)),
        ]
    }

    fn bind(&mut self, now: Instant, lease: Lease) -> Vec<DhcpEffect> {
        debug!("bind(): {:?} -> Bound ({:?} for {:?})", self.state, lease.addr, lease.duration);
        let mut effects: Vec<DhcpEffect> = Vec::new();
        match self.lease.take() {
            Some(old) if old == lease => (),
            Some(old) => {
                if old.addr != lease.addr {
                    effects.push(DhcpEffect::Unconfigure(old));
                }
                effects.push(DhcpEffect::Configure(lease.clone()));
            },
            None => effects.push(DhcpEffect::Configure(lease.clone())),
        }
        let epoch: Instant = self.requested_at.take().unwrap_or(now);
        let wait: Duration = (epoch + lease.renewal).saturating_duration_since(now);
        self.epoch = Some(epoch);
        self.lease = Some(lease);
        self.offer = None;
        self.state = DhcpState::Bound;
        effects.push(DhcpEffect::Arm(wait));
        effects
    }

    /// Gives up on the current exchange without a lease.
    fn decline(&mut self, reason: &str) -> Vec<DhcpEffect> {
        warn!("decline(): {:?} -> Init ({})", self.state, reason);
        let mut effects: Vec<DhcpEffect> = vec![DhcpEffect::Disarm];
        if let Some(lease) = self.lease.take() {
            effects.push(DhcpEffect::Unconfigure(lease));
        }
        self.reset();
        effects
    }

    /// Asks the server that granted the lease to extend it, or waits out what is left until T2.
    fn renew(&mut self, now: Instant) -> Vec<DhcpEffect> {
        let (lease, t2): (&Lease, Instant) = match (self.lease.as_ref(), self.deadline(Lease::get_rebinding)) {
            (Some(lease), Some(t2)) => (lease, t2),
            _ => return Vec::new(),
        };
        let remaining: Duration = t2.saturating_duration_since(now);
        if remaining / 2 < MIN_RENEW_WAIT {
            return vec![DhcpEffect::Arm(remaining)];
        }
        let (src, dst): (Ipv4Addr, Ipv4Addr) = (lease.addr, lease.server);
        let message: Vec<u8> = self.request_extension();
        self.requested_at = Some(now);
        vec![
            DhcpEffect::Send { message, src, dst },
            DhcpEffect::Arm(remaining / 2),
        ]
    }

    /// Asks any server to extend the lease. Once the lease runs out, starts over.
    fn rebind(&mut self, now: Instant) -> Vec<DhcpEffect> {
        let (lease, expiry): (&Lease, Instant) = match (self.lease.as_ref(), self.deadline(Lease::get_duration)) {
            (Some(lease), Some(expiry)) => (lease, expiry),
            _ => return Vec::new(),
        };
        if now >= expiry {
            warn!("rebind(): lease on {:?} expired", lease.addr);
            let mut effects: Vec<DhcpEffect> = Vec::new();
            if let Some(lease) = self.lease.take() {
                effects.push(DhcpEffect::Unconfigure(lease));
            }
            effects.extend(self.select());
            return effects;
        }
        let remaining: Duration = expiry - now;
        if remaining / 2 < MIN_RENEW_WAIT {
            return vec![DhcpEffect::Arm(remaining)];
        }
        let src: Ipv4Addr = lease.addr;
        let message: Vec<u8> = self.request_extension();
        self.requested_at = Some(now);
        vec![
            DhcpEffect::Send {
                message,
                src,
                dst: Ipv4Addr::BROADCAST,
            },
            DhcpEffect::Arm(remaining / 2),
        ]
    }

    /// Start of the current lease plus one of its timers.
    fn deadline(&self, timer: fn(&Lease) -> Duration) -> Option<Instant> {
        let lease: &Lease = self.lease.as_ref()?;
        self.epoch?.checked_add(timer(lease))
    }

    fn reset(&mut self) {
        self.state = DhcpState::Init;
        self.attempts = 0;
        self.requested_at = None;
        self.offer = None;
        self.lease = None;
        self.epoch = None;
    }

    fn new_message(&self, message_type: DhcpMessageType) -> DhcpMessage {
        DhcpMessage::new_request(message_type, self.xid, self.chaddr)
    }

    fn discover(&self) -> Vec<u8> {
        let mut discover: DhcpMessage = self.new_message(DhcpMessageType::Discover);
        // Without an address the stack only takes broadcasts.
        discover.set_flags(FLAG_BROADCAST);
        discover.options_mut().request_list = REQUEST_LIST.to_vec();
        discover.serialize()
    }

    /// REQUEST accepting the offer in hand.
    fn request_offer(&self) -> Vec<u8> {
        let mut request: DhcpMessage = self.new_message(DhcpMessageType::Request);
        request.set_flags(FLAG_BROADCAST);
        if let Some(offer) = &self.offer {
            request.options_mut().requested_address = Some(offer.addr);
            request.options_mut().server_id = Some(offer.server);
        }
        request.options_mut().request_list = REQUEST_LIST.to_vec();
        request.serialize()
    }

    /// REQUEST extending the lease in hand.
    fn request_extension(&self) -> Vec<u8> {
        let mut request: DhcpMessage = self.new_message(DhcpMessageType::Request);
        if let Some(lease) = &self.lease {
            request.set_ciaddr(lease.addr);
        }
        request.options_mut().request_list = REQUEST_LIST.to_vec();
        request.serialize()
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

fn retransmit_wait(attempt: u32) -> Duration {
    MIN_RETRANSMIT_WAIT * (1 << attempt.min(MAX_ATTEMPTS))
}

/// Can `addr` be assigned to an interface?
fn is_assignable(addr: Ipv4Addr) -> bool {
    // Class E is reserved.
    !(addr.is_unspecified()
        || addr.is_loopback()
        || addr.is_multicast()
        || addr.is_broadcast()
        || addr.octets()[0] >= 240)
}

/// Prefix length of a contiguous subnet mask.
fn mask_to_prefix(mask: Ipv4Addr) -> Option<u8> {
    let bits: u32 = u32::from(mask);
    let prefix: u32 = bits.leading_ones();
    if bits.count_ones() != prefix || prefix == 0 {
        return None;
    }
    Some(prefix as u8)
}

/// Mask implied by the address class, for servers that send none (RFC 1122 3.3.1.1).
fn classful_prefix(addr: Ipv4Addr) -> u8 {
    match addr.octets()[0] {
        0..=127 => 8,
        128..=191 => 16,
        _ => 24,
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        DhcpClient,
        DhcpEffect,
        DhcpMessage,
        DhcpMessageType,
        DhcpOptions,
        DhcpState,
        Lease,
        FLAG_BROADCAST,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;
    use ::std::{
        net::Ipv4Addr,
        time::{
            Duration,
            Instant,
        },
    };

    const CLIENT_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const XID: u32 = 0xdead_beef;
    const SERVER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const OFFERED: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);
    const LEASE_SECS: u32 = 3600;

    /// Decodes the message of a `Send` effect.
    fn sent(effect: &DhcpEffect) -> Result<(DhcpMessage, Ipv4Addr, Ipv4Addr)> {
        match effect {
            DhcpEffect::Send { message, src, dst } => Ok((DhcpMessage::parse(message)?, *src, *dst)),
            other => anyhow::bail!("expected a message, got {:?}", other),
        }
    }

    fn reply(message_type: DhcpMessageType, request: &DhcpMessage, addr: Ipv4Addr) -> DhcpMessage {
        let mut reply: DhcpMessage = DhcpMessage::new_reply(message_type, request, addr);
        let options: &mut DhcpOptions = reply.options_mut();
        options.server_id = Some(SERVER);
        options.subnet_mask = Some(Ipv4Addr::new(255, 255, 255, 0));
        options.routers = vec![SERVER];
        options.lease_time = Some(LEASE_SECS);
        reply
    }

    /// Runs a client through DISCOVER/OFFER/REQUEST/ACK and returns the effects of the ACK.
    fn bound_client(now: Instant) -> Result<(DhcpClient, Vec<DhcpEffect>)> {
        let mut client: DhcpClient = DhcpClient::new(CLIENT_MAC);
        let effects: Vec<DhcpEffect> = client.start(XID);
        let (discover, _, _) = sent(&effects[0])?;
        let effects: Vec<DhcpEffect> = client.input(now, &reply(DhcpMessageType::Offer, &discover, OFFERED));
        let (request, _, _) = sent(&effects[0])?;
        let effects: Vec<DhcpEffect> = client.input(now, &reply(DhcpMessageType::Ack, &request, OFFERED));
        Ok((client, effects))
    }

    #[test]
    fn acquires_a_lease() -> Result<()> {
        let now: Instant = Instant::now();
        let mut client: DhcpClient = DhcpClient::new(CLIENT_MAC);
        let effects: Vec<DhcpEffect> = client.start(XID);
        crate::ensure_eq!(client.get_state(), DhcpState::Selecting);
        crate::ensure_eq!(effects[1], DhcpEffect::Arm(Duration::from_secs(4)));
        let (discover, src, dst) = sent(&effects[0])?;
        crate::ensure_eq!(discover.get_message_type(), Some(DhcpMessageType::Discover));
        crate::ensure_eq!(discover.get_xid(), XID);
        crate::ensure_eq!(discover.get_chaddr(), CLIENT_MAC);
        crate::ensure_eq!(discover.get_flags(), FLAG_BROADCAST);
        crate::ensure_eq!((src, dst), (Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST));

        let effects: Vec<DhcpEffect> = client.input(now, &reply(DhcpMessageType::Offer, &discover, OFFERED));
        crate::ensure_eq!(client.get_state(), DhcpState::Requesting);
        let (request, _, dst) = sent(&effects[0])?;
        crate::ensure_eq!(dst, Ipv4Addr::BROADCAST);
        crate::ensure_eq!(request.get_message_type(), Some(DhcpMessageType::Request));
        crate::ensure_eq!(request.options().requested_address, Some(OFFERED));
        crate::ensure_eq!(request.options().server_id, Some(SERVER));

        let effects: Vec<DhcpEffect> = client.input(now, &reply(DhcpMessageType::Ack, &request, OFFERED));
        crate::ensure_eq!(client.get_state(), DhcpState::Bound);
        let lease: Lease = match &effects[0] {
            DhcpEffect::Configure(lease) => lease.clone(),
            other => anyhow::bail!("expected a configuration, got {:?}", other),
        };
        crate::ensure_eq!(lease.get_addr(), OFFERED);
        crate::ensure_eq!(lease.get_prefix(), 24);
        crate::ensure_eq!(lease.get_router(), Some(SERVER));
        crate::ensure_eq!(lease.get_renewal(), Duration::from_secs(1800));
        crate::ensure_eq!(lease.get_rebinding(), Duration::from_secs(3150));
        crate::ensure_eq!(effects[1], DhcpEffect::Arm(Duration::from_secs(1800)));
        Ok(())
    }

    #[test]
    fn foreign_replies_are_ignored() -> Result<()> {
        let now: Instant = Instant::now();
        let mut client: DhcpClient = DhcpClient::new(CLIENT_MAC);
        let effects: Vec<DhcpEffect> = client.start(XID);
        let (discover, _, _) = sent(&effects[0])?;

        let mut other_xid: DhcpMessage = DhcpMessage::new_request(DhcpMessageType::Discover, XID + 1, CLIENT_MAC);
        other_xid.set_flags(FLAG_BROADCAST);
        crate::ensure_eq!(client.input(now, &reply(DhcpMessageType::Offer, &other_xid, OFFERED)), vec![]);
        // Broadcast addresses are never assignable.
        let broadcast: DhcpMessage = reply(DhcpMessageType::Offer, &discover, Ipv4Addr::BROADCAST);
        crate::ensure_eq!(client.input(now, &broadcast), vec![]);
        crate::ensure_eq!(client.get_state(), DhcpState::Selecting);
        Ok(())
    }

    #[test]
    fn discovery_gives_up_after_four_attempts() -> Result<()> {
        let mut now: Instant = Instant::now();
        let mut client: DhcpClient = DhcpClient::new(CLIENT_MAC);
        client.start(XID);
        for wait in [4, 8, 16] {
            now += Duration::from_secs(wait);
            let effects: Vec<DhcpEffect> = client.expired(now);
            sent(&effects[0])?;
            crate::ensure_eq!(effects[1], DhcpEffect::Arm(Duration::from_secs(wait * 2)));
        }
        now += Duration::from_secs(32);
        crate::ensure_eq!(client.expired(now), vec![]);
        crate::ensure_eq!(client.get_state(), DhcpState::Init);
        Ok(())
    }

    #[test]
    fn renews_with_the_server_then_rebinds() -> Result<()> {
        let start: Instant = Instant::now();
        let (mut client, _) = bound_client(start)?;

        // T1: unicast to the server, from the leased address.
        let effects: Vec<DhcpEffect> = client.expired(start + Duration::from_secs(1800));
        crate::ensure_eq!(client.get_state(), DhcpState::Renewing);
        let (request, src, dst) = sent(&effects[0])?;
        crate::ensure_eq!((src, dst), (OFFERED, SERVER));
        crate::ensure_eq!(request.get_ciaddr(), OFFERED);
        crate::ensure_eq!(request.options().server_id, None);
        crate::ensure_eq!(effects[1], DhcpEffect::Arm(Duration::from_secs(675)));

        // Less than two minutes to T2: wait it out.
        let effects: Vec<DhcpEffect> = client.expired(start + Duration::from_secs(3100));
        crate::ensure_eq!(effects, vec![DhcpEffect::Arm(Duration::from_secs(50))]);

        // T2: broadcast.
        let effects: Vec<DhcpEffect> = client.expired(start + Duration::from_secs(3150));
        crate::ensure_eq!(client.get_state(), DhcpState::Rebinding);
        let (_, src, dst) = sent(&effects[0])?;
        crate::ensure_eq!((src, dst), (OFFERED, Ipv4Addr::BROADCAST));

        // An ACK restarts the lease from the time of the last request.
        let renewed_at: Instant = start + Duration::from_secs(3150);
        let effects: Vec<DhcpEffect> = client.input(
            renewed_at + Duration::from_secs(1),
            &reply(DhcpMessageType::Ack, &request, OFFERED),
        );
        crate::ensure_eq!(client.get_state(), DhcpState::Bound);
        crate::ensure_eq!(effects, vec![DhcpEffect::Arm(Duration::from_secs(1799))]);
        Ok(())
    }

    #[test]
    fn expired_lease_is_taken_down() -> Result<()> {
        let start: Instant = Instant::now();
        let (mut client, _) = bound_client(start)?;
        client.expired(start + Duration::from_secs(1800));
        client.expired(start + Duration::from_secs(3150));
        let effects: Vec<DhcpEffect> = client.expired(start + Duration::from_secs(3600));
        match &effects[0] {
            DhcpEffect::Unconfigure(lease) => crate::ensure_eq!(lease.get_addr(), OFFERED),
            other => anyhow::bail!("expected the lease to go, got {:?}", other),
        }
        let (discover, _, _) = sent(&effects[1])?;
        crate::ensure_eq!(discover.get_message_type(), Some(DhcpMessageType::Discover));
        crate::ensure_eq!(client.get_state(), DhcpState::Selecting);
        crate::ensure_eq!(client.get_lease(), None);
        Ok(())
    }

    #[test]
    fn stop_releases_the_lease() -> Result<()> {
        let (mut client, _) = bound_client(Instant::now())?;
        let effects: Vec<DhcpEffect> = client.stop();
        crate::ensure_eq!(effects[0], DhcpEffect::Disarm);
        let (release, src, dst) = sent(&effects[1])?;
        crate::ensure_eq!(release.get_message_type(), Some(DhcpMessageType::Release));
        crate::ensure_eq!(release.get_ciaddr(), OFFERED);
        crate::ensure_eq!((src, dst), (OFFERED, SERVER));
        crate::ensure_eq!(matches!(effects[2], DhcpEffect::Unconfigure(_)), true);
        crate::ensure_eq!(client.get_state(), DhcpState::Init);
        Ok(())
    }

    #[test]
    fn nak_while_renewing_starts_over() -> Result<()> {
        let start: Instant = Instant::now();
        let (mut client, _) = bound_client(start)?;
        let effects: Vec<DhcpEffect> = client.expired(start + Duration::from_secs(1800));
        let (request, _, _) = sent(&effects[0])?;
        let effects: Vec<DhcpEffect> = client.input(
            start + Duration::from_secs(1801),
            &DhcpMessage::new_reply(DhcpMessageType::Nak, &request, Ipv4Addr::UNSPECIFIED),
        );
        crate::ensure_eq!(matches!(effects[0], DhcpEffect::Unconfigure(_)), true);
        crate::ensure_eq!(client.get_state(), DhcpState::Selecting);
        Ok(())
    }

    #[test]
    fn lease_timers_follow_the_defaults() -> Result<()> {
        let request: DhcpMessage = DhcpMessage::new_request(DhcpMessageType::Request, XID, CLIENT_MAC);
        let mut ack: DhcpMessage = reply(DhcpMessageType::Ack, &request, OFFERED);
        // T2 before T1: T1 becomes 4/7 of T2.
        ack.options_mut().renewal_time = Some(3000);
        ack.options_mut().rebinding_time = Some(1400);
        ack.options_mut().subnet_mask = None;
        let lease: Lease = Lease::from_reply(&ack)?;
        crate::ensure_eq!(lease.get_rebinding(), Duration::from_secs(1400));
        crate::ensure_eq!(lease.get_renewal(), Duration::from_secs(800));
        // 10/8 without a mask.
        crate::ensure_eq!(lease.get_prefix(), 8);
        Ok(())
    }
}
