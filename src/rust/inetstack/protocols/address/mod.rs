// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Interned IPv4 addresses and their state machines.
//!
//! Every address the stack deals with (its own, a neighbor's, a multicast group) is represented by exactly one
//! [Inet4Address] per scope in the [AddressTable]. Neighbor entries run the ARP cache states of RFC 826, local entries
//! run address conflict detection after RFC 5227. Transitions return [AddressEffect]s for the stack to carry out, so
//! the state machine itself never touches the wire or the clock.

pub mod inet6;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::conduit::messenger::Messenger,
    runtime::{
        network::{
            config::InetConfig,
            types::MacAddress,
        },
        timer::TimerId,
    },
};
use ::std::{
    collections::HashMap,
    net::Ipv4Addr,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Minimum delay between two conflict checks of a tentative address (RFC 5227).
const CHECK_MIN: Duration = Duration::from_secs(1);

/// Delay between the last conflict check and the first announcement.
const ANNOUNCE_WAIT: Duration = Duration::from_secs(2);

/// Number of announcements sent once an address becomes preferred.
const ANNOUNCE_NUM: usize = 2;

const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// Idle time after which an address known only as a datagram source is forgotten.
pub const DESTINATION_IDLE: Duration = Duration::from_secs(600);

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressState {
    /// Neighbor whose link address is unknown and not being resolved.
    Init,
    /// Remote address known only as the source of received datagrams.
    Destination,
    /// Neighbor being resolved.
    Incomplete,
    /// Neighbor with a confirmed link address.
    Reachable,
    /// Neighbor whose cached link address is being revalidated.
    Verify,
    /// Local address checked for conflicts before use.
    Tentative,
    /// Local address in use.
    Preferred,
    /// Local address found to conflict with another host.
    Deprecated,
}

/// Side effects requested by an address transition.
#[derive(Debug)]
pub enum AddressEffect {
    /// Send an ARP request for the address, to the given link address or to everyone if it is nil.
    Solicit(MacAddress),
    /// Send a conflict check for a tentative address.
    CheckConflict,
    /// Announce a preferred address.
    Announce,
    /// Send a datagram that waited for resolution.
    Release(Messenger),
    /// Resolution failed; the datagram that waited for it is dropped.
    Unreachable(Messenger),
    /// (Re)arm the address timer.
    Arm(Duration),
    Disarm,
    /// Drop the entry from the table.
    Forget,
}

/// What became of a datagram handed to [Inet4Address::resolve].
#[derive(Debug)]
pub enum Resolution {
    /// The link address is known; send right away.
    Ready(MacAddress, Messenger),
    /// The datagram is held until the neighbor answers.
    Pending(Vec<AddressEffect>),
}

pub struct Inet4Address {
    addr: Ipv4Addr,
    scope_id: u32,
    state: AddressState,
    link_addr: MacAddress,
    /// Link address derived from the IP address (multicast and broadcast), never resolved nor expired.
    fixed: bool,
    prefix: u8,
    timeout_count: usize,
    pending: Option<Messenger>,
    timer: Option<TimerId>,
    // Datagrams arrived from a destination entry since its timer was armed.
    seen: bool,
}

/// Every address known to the stack, interned by scope and value.
#[derive(Default)]
pub struct AddressTable {
    entries: HashMap<(u32, Ipv4Addr), Inet4Address>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Inet4Address {
    /// Creates the entry of a remote address.
    pub fn new_neighbor(addr: Ipv4Addr, scope_id: u32) -> Self {
        let (state, link_addr, fixed): (AddressState, MacAddress, bool) = if addr.is_multicast() {
            (AddressState::Reachable, MacAddress::from_ipv4_multicast(addr), true)
        } else if addr.is_broadcast() {
            (AddressState::Reachable, MacAddress::broadcast(), true)
        } else {
            (AddressState::Init, MacAddress::nil(), false)
        };
        Self {
            addr,
            scope_id,
            state,
            link_addr,
            fixed,
            prefix: 0,
            timeout_count: 0,
            pending: None,
            timer: None,
            seen: false,
        }
    }

    /// Creates the provisional entry of a remote address first met as the source of a datagram.
    pub fn new_destination(addr: Ipv4Addr, scope_id: u32) -> Self {
        let mut entry: Self = Self::new_neighbor(addr, scope_id);
        if !entry.fixed {
            entry.state = AddressState::Destination;
        }
        entry
    }

    /// Creates the entry of an address assigned to the interface `link_addr` belongs to.
    pub fn new_local(addr: Ipv4Addr, scope_id: u32, prefix: u8, link_addr: MacAddress) -> Self {
        Self {
            addr,
            scope_id,
            state: AddressState::Tentative,
            link_addr,
            fixed: false,
            prefix: prefix.min(32),
            timeout_count: 0,
            pending: None,
            timer: None,
            seen: false,
        }
    }

    pub fn get_addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn get_scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn get_state(&self) -> AddressState {
        self.state
    }

    pub fn get_link_addr(&self) -> MacAddress {
        self.link_addr
    }

    pub fn get_prefix(&self) -> u8 {
        self.prefix
    }

    pub fn get_mask(&self) -> Ipv4Addr {
        match self.prefix {
            0 => Ipv4Addr::UNSPECIFIED,
            prefix => Ipv4Addr::from(u32::MAX << (32 - prefix as u32)),
        }
    }

    /// Does `addr` belong to the subnet of this local address?
    pub fn is_on_link(&self, addr: Ipv4Addr) -> bool {
        let mask: u32 = u32::from(self.get_mask());
        self.is_local() && u32::from(addr) & mask == u32::from(self.addr) & mask
    }

    /// Directed broadcast address of the subnet of this local address.
    pub fn get_broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !u32::from(self.get_mask()))
    }

    pub fn is_local(&self) -> bool {
        matches!(
            self.state,
            AddressState::Tentative | AddressState::Preferred | AddressState::Deprecated
        )
    }

    pub fn is_preferred(&self) -> bool {
        self.state == AddressState::Preferred
    }

    pub fn take_timer(&mut self) -> Option<TimerId> {
        self.timer.take()
    }

    pub fn set_timer(&mut self, timer: Option<TimerId>) {
        self.timer = timer;
    }

    fn set_state(&mut self, state: AddressState) {
        debug!("set_state(): {:?} {:?} -> {:?}", self.addr, self.state, state);
        self.timeout_count = 0;
        self.state = state;
    }

    /// Starts conflict detection on a local address. With no checks configured the address is preferred at once.
    pub fn start(&mut self, config: &InetConfig, delay: Duration) -> Vec<AddressEffect> {
        if config.get_conflict_checks() == 0 {
            self.set_state(AddressState::Preferred);
            return self.announce();
        }
        self.set_state(AddressState::Tentative);
        vec![AddressEffect::Arm(delay)]
    }

    /// Hands a datagram bound to this neighbor to the link layer.
    pub fn resolve(&mut self, m: Messenger, config: &InetConfig) -> Resolution {
        match self.state {
            AddressState::Reachable | AddressState::Verify => Resolution::Ready(self.link_addr, m),
            AddressState::Init | AddressState::Destination => {
                self.pending = Some(m);
                self.set_state(AddressState::Incomplete);
                Resolution::Pending(self.expired(config, Duration::ZERO))
            },
            AddressState::Incomplete => {
                if self.pending.replace(m).is_some() {
                    debug!("resolve(): {:?} still incomplete, dropping older datagram", self.addr);
                }
                Resolution::Pending(Vec::new())
            },
            // Local addresses go through loopback and never get here.
            AddressState::Tentative | AddressState::Preferred | AddressState::Deprecated => {
                Resolution::Ready(self.link_addr, m)
            },
        }
    }

    /// The address timer fired. `jitter` is a random delay below one second used to spread conflict checks.
    pub fn expired(&mut self, config: &InetConfig, jitter: Duration) -> Vec<AddressEffect> {
        match self.state {
            AddressState::Incomplete => {
                self.timeout_count += 1;
                if self.timeout_count <= config.get_resolution_retries() {
                    return vec![
                        AddressEffect::Solicit(MacAddress::nil()),
                        AddressEffect::Arm(config.get_resolution_interval(self.timeout_count)),
                    ];
                }
                warn!("expired(): no answer from {:?}", self.addr);
                self.set_state(AddressState::Init);
                self.pending.take().map(AddressEffect::Unreachable).into_iter().collect()
            },
            AddressState::Reachable if !self.fixed => {
                self.set_state(AddressState::Verify);
                self.expired(config, jitter)
            },
            AddressState::Verify => {
                self.timeout_count += 1;
                if self.timeout_count <= config.get_resolution_retries() {
                    return vec![
                        AddressEffect::Solicit(self.link_addr),
                        AddressEffect::Arm(config.get_resolution_interval(self.timeout_count)),
                    ];
                }
                self.set_state(AddressState::Init);
                self.link_addr = MacAddress::nil();
                Vec::new()
            },
            AddressState::Tentative => {
                self.timeout_count += 1;
                if self.timeout_count <= config.get_conflict_checks() {
                    let delay: Duration = if self.timeout_count < config.get_conflict_checks() {
                        CHECK_MIN + jitter
                    } else {
                        ANNOUNCE_WAIT
                    };
                    return vec![AddressEffect::CheckConflict, AddressEffect::Arm(delay)];
                }
                self.set_state(AddressState::Preferred);
                self.announce()
            },
            AddressState::Preferred => {
                if self.timeout_count < ANNOUNCE_NUM {
                    return self.announce();
                }
                Vec::new()
            },
            AddressState::Destination if self.seen => {
                self.seen = false;
                vec![AddressEffect::Arm(DESTINATION_IDLE)]
            },
            AddressState::Destination => vec![AddressEffect::Forget],
            _ => Vec::new(),
        }
    }

    fn announce(&mut self) -> Vec<AddressEffect> {
        self.timeout_count += 1;
        let mut effects: Vec<AddressEffect> = vec![AddressEffect::Announce];
        if self.timeout_count < ANNOUNCE_NUM {
            effects.push(AddressEffect::Arm(ANNOUNCE_INTERVAL));
        }
        effects
    }

    /// The neighbor revealed its link address (any ARP message sent by it).
    pub fn confirm(&mut self, link_addr: MacAddress, config: &InetConfig) -> Vec<AddressEffect> {
        if self.is_local() || self.fixed {
            return Vec::new();
        }
        self.link_addr = link_addr;
        if self.state != AddressState::Reachable {
            self.set_state(AddressState::Reachable);
        }
        let mut effects: Vec<AddressEffect> = vec![AddressEffect::Arm(config.get_reachable_time())];
        if let Some(m) = self.pending.take() {
            effects.push(AddressEffect::Release(m));
        }
        effects
    }

    /// Another host claims this local address.
    pub fn conflict(&mut self, link_addr: MacAddress) -> Vec<AddressEffect> {
        match self.state {
            AddressState::Tentative => {
                warn!("conflict(): {:?} is in use by {:?}", self.addr, link_addr);
                self.set_state(AddressState::Deprecated);
                vec![AddressEffect::Disarm]
            },
            AddressState::Preferred => {
                // Defend the address (RFC 5227 section 2.4 (b)).
                warn!("conflict(): {:?} also claimed by {:?}", self.addr, link_addr);
                vec![AddressEffect::Announce]
            },
            _ => Vec::new(),
        }
    }
}

impl AddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, scope_id: u32, addr: Ipv4Addr) -> Option<&Inet4Address> {
        self.entries.get(&(scope_id, addr))
    }

    pub fn get_mut(&mut self, scope_id: u32, addr: Ipv4Addr) -> Option<&mut Inet4Address> {
        self.entries.get_mut(&(scope_id, addr))
    }

    /// Returns the one entry for `addr` on `scope_id`, creating a neighbor entry if there is none.
    pub fn intern(&mut self, scope_id: u32, addr: Ipv4Addr) -> &mut Inet4Address {
        self.entries
            .entry((scope_id, addr))
            .or_insert_with(|| Inet4Address::new_neighbor(addr, scope_id))
    }

    /// Records `addr` as the source of a datagram received on `scope_id`. A new entry starts in
    /// [AddressState::Destination]; the returned effects arm its idle timer.
    pub fn intern_source(&mut self, scope_id: u32, addr: Ipv4Addr) -> Vec<AddressEffect> {
        match self.entries.get_mut(&(scope_id, addr)) {
            Some(entry) => {
                entry.seen = true;
                Vec::new()
            },
            None => {
                self.entries
                    .insert((scope_id, addr), Inet4Address::new_destination(addr, scope_id));
                vec![AddressEffect::Arm(DESTINATION_IDLE)]
            },
        }
    }

    /// Assigns `addr` to the interface at `scope_id`, replacing any neighbor entry for it.
    pub fn add_local(&mut self, scope_id: u32, addr: Ipv4Addr, prefix: u8, link_addr: MacAddress) -> &mut Inet4Address {
        let entry: &mut Inet4Address = self
            .entries
            .entry((scope_id, addr))
            .or_insert_with(|| Inet4Address::new_local(addr, scope_id, prefix, link_addr));
        if !entry.is_local() {
            *entry = Inet4Address::new_local(addr, scope_id, prefix, link_addr);
        }
        entry
    }

    pub fn remove(&mut self, scope_id: u32, addr: Ipv4Addr) -> Option<Inet4Address> {
        self.entries.remove(&(scope_id, addr))
    }

    /// Local addresses of one interface.
    pub fn locals(&self, scope_id: u32) -> impl Iterator<Item = &Inet4Address> {
        self.entries
            .values()
            .filter(move |a| a.scope_id == scope_id && a.is_local())
    }

    /// Is `addr` one of our preferred addresses, on any interface?
    pub fn is_local(&self, addr: Ipv4Addr) -> bool {
        self.entries.values().any(|a| a.addr == addr && a.is_preferred())
    }

    /// Source address for datagrams leaving through `scope_id`.
    pub fn select_source(&self, scope_id: u32) -> Option<Ipv4Addr> {
        self.locals(scope_id).find(|a| a.is_preferred()).map(|a| a.addr)
    }

    /// Is `addr` the limited broadcast or the directed broadcast of a subnet on `scope_id`?
    pub fn is_broadcast(&self, scope_id: u32, addr: Ipv4Addr) -> bool {
        addr.is_broadcast() || self.locals(scope_id).any(|a| a.prefix < 31 && a.get_broadcast() == addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        AddressEffect,
        AddressState,
        AddressTable,
        Inet4Address,
        Resolution,
        ANNOUNCE_WAIT,
        DESTINATION_IDLE,
    };
    use crate::{
        inetstack::conduit::messenger::Messenger,
        runtime::network::{
            config::InetConfig,
            types::MacAddress,
        },
    };
    use ::anyhow::Result;
    use ::std::{
        net::Ipv4Addr,
        time::Duration,
    };

    const NEIGHBOR: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);
    const NEIGHBOR_MAC: MacAddress = MacAddress::new([0xab, 0x89, 0x67, 0x45, 0x23, 0x12]);
    const LOCAL_MAC: MacAddress = MacAddress::new([0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);

    fn datagram(tag: u8) -> Messenger {
        Messenger::new_output(&[tag], 0)
    }

    #[test]
    fn resolution_holds_newest_datagram_until_reply() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_neighbor(NEIGHBOR, 2);

        match a.resolve(datagram(1), &config) {
            Resolution::Pending(effects) => {
                crate::ensure_eq!(effects.len(), 2);
                crate::ensure_eq!(matches!(effects[0], AddressEffect::Solicit(mac) if mac.is_nil()), true);
                crate::ensure_eq!(
                    matches!(effects[1], AddressEffect::Arm(d) if d == config.get_resolution_interval(1)),
                    true
                );
            },
            other => anyhow::bail!("expected pending resolution (got {:?})", other),
        }
        crate::ensure_eq!(a.get_state(), AddressState::Incomplete);
        crate::ensure_eq!(matches!(a.resolve(datagram(2), &config), Resolution::Pending(ref e) if e.is_empty()), true);

        let effects: Vec<AddressEffect> = a.confirm(NEIGHBOR_MAC, &config);
        crate::ensure_eq!(a.get_state(), AddressState::Reachable);
        let released: Vec<u8> = effects
            .into_iter()
            .filter_map(|e| match e {
                AddressEffect::Release(m) => Some(m.data()[0]),
                _ => None,
            })
            .collect();
        crate::ensure_eq!(released, vec![2]);

        match a.resolve(datagram(3), &config) {
            Resolution::Ready(mac, _) => crate::ensure_eq!(mac, NEIGHBOR_MAC),
            other => anyhow::bail!("expected ready resolution (got {:?})", other),
        }
        Ok(())
    }

    #[test]
    fn resolution_gives_up_after_retries() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_neighbor(NEIGHBOR, 2);
        a.resolve(datagram(1), &config);
        for _ in 1..config.get_resolution_retries() {
            let effects: Vec<AddressEffect> = a.expired(&config, Duration::ZERO);
            crate::ensure_eq!(matches!(effects[0], AddressEffect::Solicit(_)), true);
        }
        let effects: Vec<AddressEffect> = a.expired(&config, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), AddressState::Init);
        crate::ensure_eq!(effects.len(), 1);
        crate::ensure_eq!(matches!(effects[0], AddressEffect::Unreachable(_)), true);
        Ok(())
    }

    #[test]
    fn stale_entry_is_verified_by_unicast() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_neighbor(NEIGHBOR, 2);
        a.confirm(NEIGHBOR_MAC, &config);
        let effects: Vec<AddressEffect> = a.expired(&config, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), AddressState::Verify);
        crate::ensure_eq!(matches!(effects[0], AddressEffect::Solicit(mac) if mac == NEIGHBOR_MAC), true);

        // Datagrams keep flowing to the cached address while probing.
        crate::ensure_eq!(matches!(a.resolve(datagram(1), &config), Resolution::Ready(..)), true);
        Ok(())
    }

    #[test]
    fn tentative_address_becomes_preferred() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_local(Ipv4Addr::new(192, 168, 1, 1), 2, 24, LOCAL_MAC);
        let effects: Vec<AddressEffect> = a.start(&config, Duration::from_millis(300));
        crate::ensure_eq!(matches!(effects[..], [AddressEffect::Arm(_)]), true);

        for i in 1..=config.get_conflict_checks() {
            let effects: Vec<AddressEffect> = a.expired(&config, Duration::from_millis(100));
            crate::ensure_eq!(a.get_state(), AddressState::Tentative);
            crate::ensure_eq!(matches!(effects[0], AddressEffect::CheckConflict), true);
            if i == config.get_conflict_checks() {
                crate::ensure_eq!(matches!(effects[1], AddressEffect::Arm(d) if d == ANNOUNCE_WAIT), true);
            }
        }
        let effects: Vec<AddressEffect> = a.expired(&config, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), AddressState::Preferred);
        crate::ensure_eq!(matches!(effects[0], AddressEffect::Announce), true);
        Ok(())
    }

    #[test]
    fn conflict_deprecates_tentative_address() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_local(Ipv4Addr::new(192, 168, 1, 1), 2, 24, LOCAL_MAC);
        a.start(&config, Duration::ZERO);
        a.conflict(NEIGHBOR_MAC);
        crate::ensure_eq!(a.get_state(), AddressState::Deprecated);
        crate::ensure_eq!(a.is_preferred(), false);
        Ok(())
    }

    #[test]
    fn no_checks_means_preferred_at_once() -> Result<()> {
        let config: InetConfig = InetConfig::default().set_conflict_checks(0);
        let mut a: Inet4Address = Inet4Address::new_local(Ipv4Addr::new(192, 168, 1, 1), 2, 24, LOCAL_MAC);
        a.start(&config, Duration::ZERO);
        crate::ensure_eq!(a.get_state(), AddressState::Preferred);
        Ok(())
    }

    #[test]
    fn table_interns_one_entry_per_scope() -> Result<()> {
        let mut table: AddressTable = AddressTable::new();
        table.intern(2, NEIGHBOR);
        table.intern(2, NEIGHBOR);
        table.intern(3, NEIGHBOR);
        crate::ensure_eq!(table.len(), 2);

        let group: Ipv4Addr = Ipv4Addr::new(224, 1, 2, 3);
        let entry: &mut Inet4Address = table.intern(2, group);
        crate::ensure_eq!(entry.get_state(), AddressState::Reachable);
        crate::ensure_eq!(entry.get_link_addr(), MacAddress::new([0x01, 0x00, 0x5e, 0x01, 0x02, 0x03]));
        Ok(())
    }

    #[test]
    fn subnet_helpers() -> Result<()> {
        let config: InetConfig = InetConfig::default().set_conflict_checks(0);
        let mut table: AddressTable = AddressTable::new();
        table
            .add_local(2, Ipv4Addr::new(192, 168, 1, 1), 24, LOCAL_MAC)
            .start(&config, Duration::ZERO);
        crate::ensure_eq!(table.select_source(2), Some(Ipv4Addr::new(192, 168, 1, 1)));
        crate::ensure_eq!(table.is_broadcast(2, Ipv4Addr::new(192, 168, 1, 255)), true);
        crate::ensure_eq!(table.is_broadcast(2, NEIGHBOR), false);
        let local: Option<&Inet4Address> = table.get(2, Ipv4Addr::new(192, 168, 1, 1));
        crate::ensure_eq!(local.map(|a| a.is_on_link(NEIGHBOR)), Some(true));
        crate::ensure_eq!(local.map(|a| a.is_on_link(Ipv4Addr::new(10, 0, 0, 1))), Some(false));
        Ok(())
    }

    #[test]
    fn idle_destination_is_forgotten() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut table: AddressTable = AddressTable::new();
        let effects: Vec<AddressEffect> = table.intern_source(2, NEIGHBOR);
        crate::ensure_eq!(matches!(effects[..], [AddressEffect::Arm(d)] if d == DESTINATION_IDLE), true);
        crate::ensure_eq!(table.intern_source(2, NEIGHBOR).is_empty(), true);
        crate::ensure_eq!(table.len(), 1);

        let entry: &mut Inet4Address = match table.get_mut(2, NEIGHBOR) {
            Some(entry) => entry,
            None => anyhow::bail!("source was not interned"),
        };
        crate::ensure_eq!(entry.get_state(), AddressState::Destination);
        // Traffic since the timer was armed keeps the entry alive for another period.
        let effects: Vec<AddressEffect> = entry.expired(&config, Duration::ZERO);
        crate::ensure_eq!(matches!(effects[..], [AddressEffect::Arm(_)]), true);
        let effects: Vec<AddressEffect> = entry.expired(&config, Duration::ZERO);
        crate::ensure_eq!(matches!(effects[..], [AddressEffect::Forget]), true);
        Ok(())
    }

    #[test]
    fn destination_resolves_like_a_new_neighbor() -> Result<()> {
        let config: InetConfig = InetConfig::default();
        let mut a: Inet4Address = Inet4Address::new_destination(NEIGHBOR, 2);
        crate::ensure_eq!(matches!(a.resolve(datagram(1), &config), Resolution::Pending(_)), true);
        crate::ensure_eq!(a.get_state(), AddressState::Incomplete);
        a.confirm(NEIGHBOR_MAC, &config);
        crate::ensure_eq!(a.get_state(), AddressState::Reachable);
        Ok(())
    }
}
