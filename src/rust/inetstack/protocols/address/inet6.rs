// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! IPv6 address state machines.
//!
//! One [Inet6Address] plays one of five roles, each with its own group of states:
//!
//! - neighbor cache entry (RFC 2461 section 7.3.2): Init, Incomplete, Reachable, Stale, Delay, Verify;
//! - local address under autoconfiguration (RFC 2462): Tentative, Preferred, Deprecated;
//! - multicast listener (RFC 2710 section 6): NonListener, DelayingListener, IdleListener;
//! - destination cache entry: Destination;
//! - on-link prefix: Prefix.
//!
//! Every state has its own transition function over [Inet6Event]; the outcome is a list of [Inet6Effect]s.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::ipv6::IPV6_MIN_MTU,
    runtime::network::types::MacAddress,
};
use ::std::{
    net::Ipv6Addr,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const MAX_MULTICAST_SOLICIT: usize = 3;
const MAX_UNICAST_SOLICIT: usize = 3;
const RETRANS_TIMER: Duration = Duration::from_secs(1);
pub const REACHABLE_TIME: Duration = Duration::from_secs(30);
const DELAY_FIRST_VERIFY_TIME: Duration = Duration::from_secs(5);
const DUP_ADDR_DETECT_TRANSMITS: usize = 1;

/// Upper bound of the delay before a listener's first unsolicited report.
pub const UNSOLICITED_REPORT_INTERVAL: Duration = Duration::from_secs(10);

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inet6State {
    Init,
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Verify,
    Tentative,
    Preferred,
    Deprecated,
    NonListener,
    DelayingListener,
    IdleListener,
    Destination,
    Prefix,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inet6Event {
    /// A datagram has to go to this address.
    Output(Vec<u8>),
    /// Neighbor advertisement for this address.
    Advertisement {
        link_addr: Option<MacAddress>,
        solicited: bool,
        override_flag: bool,
    },
    /// Neighbor solicitation, router solicitation or advertisement, or redirect naming this address and its link
    /// address.
    Solicitation { link_addr: Option<MacAddress> },
    /// Another node uses or checks for this tentative address.
    DuplicateDetected,
    /// Upper-layer protocol saw forward progress towards this neighbor.
    Confirmed,
    Timer,
    PreferredLifetimeExpired,
    ValidLifetimeExpired,
    Join,
    Leave,
    Query { max_delay: Duration },
    ReportHeard,
    PacketTooBig(usize),
    PrefixAdvertised { valid_lifetime: Duration },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inet6Effect {
    /// Send a neighbor solicitation, to the solicited-node group or to the cached link address.
    Solicit { multicast: bool },
    /// Send a duplicate address detection check (a solicitation from the unspecified address).
    SolicitDuplicate,
    /// Send a neighbor advertisement for a local address.
    Advertise,
    Report,
    Done,
    /// Send a datagram to the given link address.
    Transmit(MacAddress, Vec<u8>),
    /// Hand a datagram to the neighbor entry of the next hop.
    Route(Ipv6Addr, Vec<u8>),
    /// Resolution failed; the datagram is dropped and the sender told the address is unreachable.
    Unreachable(Vec<u8>),
    Arm(Duration),
    Disarm,
    /// The entry is no longer needed.
    Remove,
}

pub struct Inet6Address {
    addr: Ipv6Addr,
    scope_id: u32,
    state: Inet6State,
    link_addr: Option<MacAddress>,
    count: usize,
    pending: Option<Vec<u8>>,
    /// Set when duplicate address detection failed.
    duplicate: bool,
    last_reporter: bool,
    next_hop: Ipv6Addr,
    link_mtu: usize,
    path_mtu: usize,
    prefix_len: u8,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Inet6Address {
    fn new(addr: Ipv6Addr, scope_id: u32, state: Inet6State) -> Self {
        Self {
            addr,
            scope_id,
            state,
            link_addr: None,
            count: 0,
            pending: None,
            duplicate: false,
            last_reporter: false,
            next_hop: addr,
            link_mtu: IPV6_MIN_MTU,
            path_mtu: IPV6_MIN_MTU,
            prefix_len: 128,
        }
    }

    pub fn new_neighbor(addr: Ipv6Addr, scope_id: u32) -> Self {
        Self::new(addr, scope_id, Inet6State::Init)
    }

    /// A local address starting duplicate address detection. The caller arms the first check after a random delay.
    pub fn new_local(addr: Ipv6Addr, scope_id: u32, link_addr: MacAddress) -> Self {
        let mut a: Self = Self::new(addr, scope_id, Inet6State::Tentative);
        a.link_addr = Some(link_addr);
        a
    }

    pub fn new_group(addr: Ipv6Addr, scope_id: u32) -> Self {
        Self::new(addr, scope_id, Inet6State::NonListener)
    }

    pub fn new_destination(addr: Ipv6Addr, scope_id: u32, next_hop: Ipv6Addr, link_mtu: usize) -> Self {
        let mut a: Self = Self::new(addr, scope_id, Inet6State::Destination);
        a.next_hop = next_hop;
        a.link_mtu = link_mtu.max(IPV6_MIN_MTU);
        a.path_mtu = a.link_mtu;
        a
    }

    pub fn new_prefix(prefix: Ipv6Addr, scope_id: u32, prefix_len: u8) -> Self {
        let mut a: Self = Self::new(prefix, scope_id, Inet6State::Prefix);
        a.prefix_len = prefix_len.min(128);
        a
    }

    pub fn get_addr(&self) -> Ipv6Addr {
        self.addr
    }

    pub fn get_scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn get_state(&self) -> Inet6State {
        self.state
    }

    pub fn get_link_addr(&self) -> Option<MacAddress> {
        self.link_addr
    }

    pub fn get_path_mtu(&self) -> usize {
        self.path_mtu
    }

    pub fn get_next_hop(&self) -> Ipv6Addr {
        self.next_hop
    }

    /// Does `addr` fall under this on-link prefix?
    pub fn covers(&self, addr: Ipv6Addr) -> bool {
        if self.prefix_len == 0 {
            return true;
        }
        let mask: u128 = u128::MAX << (128 - self.prefix_len as u32);
        u128::from(addr) & mask == u128::from(self.addr) & mask
    }

    fn set_state(&mut self, state: Inet6State) {
        debug!("set_state(): {:?} {:?} -> {:?}", self.addr, self.state, state);
        self.count = 0;
        self.state = state;
    }

    /// Runs `event` through the transition table of the current state. `delay` is a random delay used where the
    /// protocols call for one (listener reports).
    pub fn handle(&mut self, event: Inet6Event, delay: Duration) -> Vec<Inet6Effect> {
        match self.state {
            Inet6State::Init => self.on_init(event),
            Inet6State::Incomplete => self.on_incomplete(event),
            Inet6State::Reachable => self.on_reachable(event),
            Inet6State::Stale => self.on_stale(event),
            Inet6State::Delay => self.on_delay(event),
            Inet6State::Verify => self.on_verify(event),
            Inet6State::Tentative => self.on_tentative(event),
            Inet6State::Preferred => self.on_preferred(event),
            Inet6State::Deprecated => self.on_deprecated(event),
            Inet6State::NonListener => self.on_non_listener(event, delay),
            Inet6State::DelayingListener => self.on_delaying_listener(event, delay),
            Inet6State::IdleListener => self.on_idle_listener(event, delay),
            Inet6State::Destination => self.on_destination(event),
            Inet6State::Prefix => self.on_prefix(event),
        }
    }

    //==================================================================================================================
    // Neighbor cache
    //==================================================================================================================

    fn on_init(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => {
                self.pending = Some(datagram);
                self.set_state(Inet6State::Incomplete);
                self.count = 1;
                vec![Inet6Effect::Solicit { multicast: true }, Inet6Effect::Arm(RETRANS_TIMER)]
            },
            Inet6Event::Solicitation {
                link_addr: Some(link_addr),
            } => {
                self.link_addr = Some(link_addr);
                self.set_state(Inet6State::Stale);
                Vec::new()
            },
            // No entry to update for advertisements nobody asked for.
            _ => Vec::new(),
        }
    }

    fn on_incomplete(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => {
                self.pending = Some(datagram);
                Vec::new()
            },
            Inet6Event::Timer if self.count < MAX_MULTICAST_SOLICIT => {
                self.count += 1;
                vec![Inet6Effect::Solicit { multicast: true }, Inet6Effect::Arm(RETRANS_TIMER)]
            },
            Inet6Event::Timer => {
                self.set_state(Inet6State::Init);
                self.pending.take().map(Inet6Effect::Unreachable).into_iter().collect()
            },
            Inet6Event::Advertisement {
                link_addr: Some(link_addr),
                solicited,
                ..
            } => {
                self.link_addr = Some(link_addr);
                let mut effects: Vec<Inet6Effect> = vec![Inet6Effect::Disarm];
                if solicited {
                    self.set_state(Inet6State::Reachable);
                    effects.push(Inet6Effect::Arm(REACHABLE_TIME));
                } else {
                    self.set_state(Inet6State::Stale);
                }
                effects.extend(self.pending.take().map(|d| Inet6Effect::Transmit(link_addr, d)));
                effects
            },
            Inet6Event::Solicitation {
                link_addr: Some(link_addr),
            } => {
                self.link_addr = Some(link_addr);
                self.set_state(Inet6State::Stale);
                let mut effects: Vec<Inet6Effect> = vec![Inet6Effect::Disarm];
                effects.extend(self.pending.take().map(|d| Inet6Effect::Transmit(link_addr, d)));
                effects
            },
            _ => Vec::new(),
        }
    }

    fn on_reachable(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => self.transmit(datagram),
            Inet6Event::Timer => {
                self.set_state(Inet6State::Stale);
                Vec::new()
            },
            Inet6Event::Confirmed => vec![Inet6Effect::Arm(REACHABLE_TIME)],
            Inet6Event::Advertisement {
                link_addr,
                solicited,
                override_flag,
            } => self.on_advertisement(link_addr, solicited, override_flag),
            Inet6Event::Solicitation { link_addr } => self.on_solicitation(link_addr),
            _ => Vec::new(),
        }
    }

    fn on_stale(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => {
                self.set_state(Inet6State::Delay);
                let mut effects: Vec<Inet6Effect> = self.transmit(datagram);
                effects.push(Inet6Effect::Arm(DELAY_FIRST_VERIFY_TIME));
                effects
            },
            Inet6Event::Confirmed => {
                self.set_state(Inet6State::Reachable);
                vec![Inet6Effect::Arm(REACHABLE_TIME)]
            },
            Inet6Event::Advertisement {
                link_addr,
                solicited,
                override_flag,
            } => self.on_advertisement(link_addr, solicited, override_flag),
            Inet6Event::Solicitation { link_addr } => self.on_solicitation(link_addr),
            _ => Vec::new(),
        }
    }

    fn on_delay(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => self.transmit(datagram),
            Inet6Event::Timer => {
                self.set_state(Inet6State::Verify);
                self.count = 1;
                vec![Inet6Effect::Solicit { multicast: false }, Inet6Effect::Arm(RETRANS_TIMER)]
            },
            Inet6Event::Confirmed => {
                self.set_state(Inet6State::Reachable);
                vec![Inet6Effect::Arm(REACHABLE_TIME)]
            },
            Inet6Event::Advertisement {
                link_addr,
                solicited,
                override_flag,
            } => self.on_advertisement(link_addr, solicited, override_flag),
            Inet6Event::Solicitation { link_addr } => self.on_solicitation(link_addr),
            _ => Vec::new(),
        }
    }

    fn on_verify(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => self.transmit(datagram),
            Inet6Event::Timer if self.count < MAX_UNICAST_SOLICIT => {
                self.count += 1;
                vec![Inet6Effect::Solicit { multicast: false }, Inet6Effect::Arm(RETRANS_TIMER)]
            },
            Inet6Event::Timer => {
                self.link_addr = None;
                self.set_state(Inet6State::Init);
                vec![Inet6Effect::Remove]
            },
            Inet6Event::Confirmed => {
                self.set_state(Inet6State::Reachable);
                vec![Inet6Effect::Arm(REACHABLE_TIME)]
            },
            Inet6Event::Advertisement {
                link_addr,
                solicited,
                override_flag,
            } => self.on_advertisement(link_addr, solicited, override_flag),
            Inet6Event::Solicitation { link_addr } => self.on_solicitation(link_addr),
            _ => Vec::new(),
        }
    }

    fn transmit(&self, datagram: Vec<u8>) -> Vec<Inet6Effect> {
        match self.link_addr {
            Some(link_addr) => vec![Inet6Effect::Transmit(link_addr, datagram)],
            None => vec![Inet6Effect::Unreachable(datagram)],
        }
    }

    /// Advertisement received for an entry with a cached link address (RFC 2461 section 7.2.5).
    fn on_advertisement(
        &mut self,
        link_addr: Option<MacAddress>,
        solicited: bool,
        override_flag: bool,
    ) -> Vec<Inet6Effect> {
        let changed: bool = link_addr.is_some() && link_addr != self.link_addr;
        if !override_flag && changed {
            if self.state == Inet6State::Reachable {
                self.set_state(Inet6State::Stale);
            }
            return Vec::new();
        }
        if changed {
            self.link_addr = link_addr;
        }
        if solicited {
            self.set_state(Inet6State::Reachable);
            return vec![Inet6Effect::Arm(REACHABLE_TIME)];
        }
        if changed {
            self.set_state(Inet6State::Stale);
            return vec![Inet6Effect::Disarm];
        }
        Vec::new()
    }

    fn on_solicitation(&mut self, link_addr: Option<MacAddress>) -> Vec<Inet6Effect> {
        match link_addr {
            Some(link_addr) if Some(link_addr) != self.link_addr => {
                self.link_addr = Some(link_addr);
                self.set_state(Inet6State::Stale);
                vec![Inet6Effect::Disarm]
            },
            _ => Vec::new(),
        }
    }

    //==================================================================================================================
    // Local addresses
    //==================================================================================================================

    fn on_tentative(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Timer if self.count < DUP_ADDR_DETECT_TRANSMITS => {
                self.count += 1;
                vec![Inet6Effect::SolicitDuplicate, Inet6Effect::Arm(RETRANS_TIMER)]
            },
            Inet6Event::Timer => {
                self.set_state(Inet6State::Preferred);
                vec![Inet6Effect::Advertise]
            },
            Inet6Event::DuplicateDetected => {
                warn!("on_tentative(): duplicate address {:?}", self.addr);
                self.duplicate = true;
                self.set_state(Inet6State::Deprecated);
                vec![Inet6Effect::Disarm]
            },
            // A tentative address may not be used as a source.
            Inet6Event::Output(datagram) => vec![Inet6Effect::Unreachable(datagram)],
            _ => Vec::new(),
        }
    }

    fn on_preferred(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Solicitation { .. } => vec![Inet6Effect::Advertise],
            Inet6Event::PreferredLifetimeExpired => {
                self.set_state(Inet6State::Deprecated);
                Vec::new()
            },
            Inet6Event::ValidLifetimeExpired => {
                self.set_state(Inet6State::Init);
                vec![Inet6Effect::Disarm, Inet6Effect::Remove]
            },
            Inet6Event::DuplicateDetected => {
                warn!("on_preferred(): {:?} is also in use by another node", self.addr);
                Vec::new()
            },
            _ => Vec::new(),
        }
    }

    fn on_deprecated(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            // Still valid: keep answering for established communication.
            Inet6Event::Solicitation { .. } if !self.duplicate => vec![Inet6Effect::Advertise],
            Inet6Event::ValidLifetimeExpired => {
                self.set_state(Inet6State::Init);
                vec![Inet6Effect::Disarm, Inet6Effect::Remove]
            },
            _ => Vec::new(),
        }
    }

    //==================================================================================================================
    // Multicast listener
    //==================================================================================================================

    fn on_non_listener(&mut self, event: Inet6Event, delay: Duration) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Join => {
                self.set_state(Inet6State::DelayingListener);
                self.last_reporter = true;
                vec![
                    Inet6Effect::Report,
                    Inet6Effect::Arm(delay.min(UNSOLICITED_REPORT_INTERVAL)),
                ]
            },
            _ => Vec::new(),
        }
    }

    fn on_delaying_listener(&mut self, event: Inet6Event, delay: Duration) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Timer => {
                self.set_state(Inet6State::IdleListener);
                self.last_reporter = true;
                vec![Inet6Effect::Report]
            },
            Inet6Event::ReportHeard => {
                self.set_state(Inet6State::IdleListener);
                self.last_reporter = false;
                vec![Inet6Effect::Disarm]
            },
            Inet6Event::Query { max_delay } => vec![Inet6Effect::Arm(delay.min(max_delay))],
            Inet6Event::Leave => self.stop_listening(),
            _ => Vec::new(),
        }
    }

    fn on_idle_listener(&mut self, event: Inet6Event, delay: Duration) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Query { max_delay } => {
                self.set_state(Inet6State::DelayingListener);
                vec![Inet6Effect::Arm(delay.min(max_delay))]
            },
            Inet6Event::Leave => self.stop_listening(),
            _ => Vec::new(),
        }
    }

    fn stop_listening(&mut self) -> Vec<Inet6Effect> {
        self.set_state(Inet6State::NonListener);
        let mut effects: Vec<Inet6Effect> = vec![Inet6Effect::Disarm];
        if self.last_reporter {
            effects.push(Inet6Effect::Done);
        }
        self.last_reporter = false;
        effects
    }

    //==================================================================================================================
    // Destination cache and prefix list
    //==================================================================================================================

    fn on_destination(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::Output(datagram) => vec![Inet6Effect::Route(self.next_hop, datagram)],
            Inet6Event::PacketTooBig(mtu) => {
                self.path_mtu = mtu.clamp(IPV6_MIN_MTU, self.path_mtu);
                Vec::new()
            },
            // Path MTU estimates age out (RFC 1981 section 5.3).
            Inet6Event::Timer => {
                self.path_mtu = self.link_mtu;
                Vec::new()
            },
            _ => Vec::new(),
        }
    }

    fn on_prefix(&mut self, event: Inet6Event) -> Vec<Inet6Effect> {
        match event {
            Inet6Event::PrefixAdvertised { valid_lifetime } if valid_lifetime.is_zero() => {
                self.set_state(Inet6State::Init);
                vec![Inet6Effect::Disarm, Inet6Effect::Remove]
            },
            Inet6Event::PrefixAdvertised { valid_lifetime } => vec![Inet6Effect::Arm(valid_lifetime)],
            Inet6Event::Timer | Inet6Event::ValidLifetimeExpired => {
                self.set_state(Inet6State::Init);
                vec![Inet6Effect::Remove]
            },
            _ => Vec::new(),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Inet6Address,
        Inet6Effect,
        Inet6Event,
        Inet6State,
        DELAY_FIRST_VERIFY_TIME,
        MAX_MULTICAST_SOLICIT,
        MAX_UNICAST_SOLICIT,
        REACHABLE_TIME,
    };
    use crate::runtime::network::types::MacAddress;
    use ::anyhow::Result;
    use ::std::{
        net::Ipv6Addr,
        time::Duration,
    };

    const MAC: MacAddress = MacAddress::new([0xab, 0x89, 0x67, 0x45, 0x23, 0x12]);
    const OTHER_MAC: MacAddress = MacAddress::new([0x02, 0, 0, 0, 0, 0x01]);

    fn neighbor() -> Inet6Address {
        Inet6Address::new_neighbor(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2), 2)
    }

    fn advertisement(link_addr: MacAddress, solicited: bool, override_flag: bool) -> Inet6Event {
        Inet6Event::Advertisement {
            link_addr: Some(link_addr),
            solicited,
            override_flag,
        }
    }

    #[test]
    fn resolution_to_reachable() -> Result<()> {
        let mut a: Inet6Address = neighbor();
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Output(vec![1]), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Incomplete);
        crate::ensure_eq!(effects[0].clone(), Inet6Effect::Solicit { multicast: true });

        let effects: Vec<Inet6Effect> = a.handle(advertisement(MAC, true, true), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Reachable);
        crate::ensure_eq!(
            effects,
            vec![
                Inet6Effect::Disarm,
                Inet6Effect::Arm(REACHABLE_TIME),
                Inet6Effect::Transmit(MAC, vec![1])
            ]
        );
        Ok(())
    }

    #[test]
    fn incomplete_gives_up() -> Result<()> {
        let mut a: Inet6Address = neighbor();
        a.handle(Inet6Event::Output(vec![1]), Duration::ZERO);
        for _ in 1..MAX_MULTICAST_SOLICIT {
            a.handle(Inet6Event::Timer, Duration::ZERO);
            crate::ensure_eq!(a.get_state(), Inet6State::Incomplete);
        }
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Init);
        crate::ensure_eq!(effects, vec![Inet6Effect::Unreachable(vec![1])]);
        Ok(())
    }

    #[test]
    fn reachability_confirmation_cycle() -> Result<()> {
        let mut a: Inet6Address = neighbor();
        a.handle(Inet6Event::Output(vec![1]), Duration::ZERO);
        a.handle(advertisement(MAC, true, false), Duration::ZERO);

        a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Stale);

        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Output(vec![2]), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Delay);
        crate::ensure_eq!(
            effects,
            vec![
                Inet6Effect::Transmit(MAC, vec![2]),
                Inet6Effect::Arm(DELAY_FIRST_VERIFY_TIME)
            ]
        );

        a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Verify);
        for _ in 1..MAX_UNICAST_SOLICIT {
            let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
            crate::ensure_eq!(effects[0].clone(), Inet6Effect::Solicit { multicast: false });
        }
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Init);
        crate::ensure_eq!(effects, vec![Inet6Effect::Remove]);
        Ok(())
    }

    #[test]
    fn delay_confirmed_by_upper_layer() -> Result<()> {
        let mut a: Inet6Address = neighbor();
        a.handle(
            Inet6Event::Solicitation {
                link_addr: Some(MAC),
            },
            Duration::ZERO,
        );
        crate::ensure_eq!(a.get_state(), Inet6State::Stale);
        a.handle(Inet6Event::Output(vec![1]), Duration::ZERO);
        a.handle(Inet6Event::Confirmed, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Reachable);
        Ok(())
    }

    #[test]
    fn advertisement_override_rules() -> Result<()> {
        let mut a: Inet6Address = neighbor();
        a.handle(Inet6Event::Output(vec![1]), Duration::ZERO);
        a.handle(advertisement(MAC, true, false), Duration::ZERO);

        // Different address without override: keep it but stop trusting it.
        a.handle(advertisement(OTHER_MAC, false, false), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Stale);
        crate::ensure_eq!(a.get_link_addr(), Some(MAC));

        // Unsolicited override replaces the address.
        a.handle(advertisement(OTHER_MAC, false, true), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Stale);
        crate::ensure_eq!(a.get_link_addr(), Some(OTHER_MAC));

        a.handle(advertisement(OTHER_MAC, true, false), Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Reachable);
        Ok(())
    }

    #[test]
    fn duplicate_address_detection() -> Result<()> {
        let addr: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let mut a: Inet6Address = Inet6Address::new_local(addr, 2, MAC);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(effects[0].clone(), Inet6Effect::SolicitDuplicate);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::Preferred);
        crate::ensure_eq!(effects, vec![Inet6Effect::Advertise]);

        let mut b: Inet6Address = Inet6Address::new_local(addr, 2, MAC);
        b.handle(Inet6Event::Timer, Duration::ZERO);
        b.handle(Inet6Event::DuplicateDetected, Duration::ZERO);
        crate::ensure_eq!(b.get_state(), Inet6State::Deprecated);
        let effects: Vec<Inet6Effect> = b.handle(Inet6Event::Solicitation { link_addr: None }, Duration::ZERO);
        crate::ensure_eq!(effects.is_empty(), true);
        Ok(())
    }

    #[test]
    fn listener_suppresses_report() -> Result<()> {
        let group: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x1234);
        let mut a: Inet6Address = Inet6Address::new_group(group, 2);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Join, Duration::from_secs(3));
        crate::ensure_eq!(
            effects,
            vec![Inet6Effect::Report, Inet6Effect::Arm(Duration::from_secs(3))]
        );
        a.handle(Inet6Event::ReportHeard, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), Inet6State::IdleListener);

        let effects: Vec<Inet6Effect> = a.handle(
            Inet6Event::Query {
                max_delay: Duration::from_secs(1),
            },
            Duration::from_secs(5),
        );
        crate::ensure_eq!(a.get_state(), Inet6State::DelayingListener);
        crate::ensure_eq!(effects, vec![Inet6Effect::Arm(Duration::from_secs(1))]);

        // Someone else reported last: leave quietly.
        a.handle(Inet6Event::ReportHeard, Duration::ZERO);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Leave, Duration::ZERO);
        crate::ensure_eq!(effects, vec![Inet6Effect::Disarm]);
        crate::ensure_eq!(a.get_state(), Inet6State::NonListener);
        Ok(())
    }

    #[test]
    fn destination_path_mtu() -> Result<()> {
        let dst: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let router: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let mut a: Inet6Address = Inet6Address::new_destination(dst, 2, router, 1500);
        a.handle(Inet6Event::PacketTooBig(1400), Duration::ZERO);
        crate::ensure_eq!(a.get_path_mtu(), 1400);
        a.handle(Inet6Event::PacketTooBig(600), Duration::ZERO);
        crate::ensure_eq!(a.get_path_mtu(), 1280);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Output(vec![9]), Duration::ZERO);
        crate::ensure_eq!(effects, vec![Inet6Effect::Route(router, vec![9])]);
        a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(a.get_path_mtu(), 1500);
        Ok(())
    }

    #[test]
    fn prefix_lifetime() -> Result<()> {
        let prefix: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 0);
        let mut a: Inet6Address = Inet6Address::new_prefix(prefix, 2, 64);
        crate::ensure_eq!(a.covers(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 1, 2, 3, 4)), true);
        crate::ensure_eq!(a.covers(Ipv6Addr::new(0x2001, 0xdb9, 0, 0, 0, 0, 0, 1)), false);
        let effects: Vec<Inet6Effect> = a.handle(
            Inet6Event::PrefixAdvertised {
                valid_lifetime: Duration::from_secs(3600),
            },
            Duration::ZERO,
        );
        crate::ensure_eq!(effects, vec![Inet6Effect::Arm(Duration::from_secs(3600))]);
        let effects: Vec<Inet6Effect> = a.handle(Inet6Event::Timer, Duration::ZERO);
        crate::ensure_eq!(effects, vec![Inet6Effect::Remove]);
        crate::ensure_eq!(a.get_state(), Inet6State::Init);
        Ok(())
    }
}
