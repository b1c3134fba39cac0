// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! IGMP version 2 (RFC 2236): the message codec and the host side of the group membership state machine.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::conduit::messenger::{
        fold_checksum,
        sum_words,
    },
    runtime::{
        fail::Fail,
        timer::TimerId,
    },
};
use ::libc::{
    EBADMSG,
    EINVAL,
};
use ::std::{
    net::Ipv4Addr,
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const IGMP_HEADER_SIZE: usize = 8;

pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
pub const IGMP_V1_MEMBERSHIP_REPORT: u8 = 0x12;
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;
pub const IGMP_LEAVE_GROUP: u8 = 0x17;

/// Destination of general queries.
pub const ALL_SYSTEMS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// Destination of leave messages.
pub const ALL_ROUTERS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

/// IPv4 Router Alert option (RFC 2113) carried by every IGMP message we send.
pub const ROUTER_ALERT: [u8; 4] = [148, 4, 0, 0];

/// Max response time units.
const DECISECOND: Duration = Duration::from_millis(100);

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IgmpHeader {
    igmp_type: u8,
    max_resp_time: u8,
    group: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipState {
    NonMember,
    DelayingMember,
    IdleMember,
}

/// Side effects requested by a membership transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipEffect {
    /// Send a version 2 report to the group.
    Report,
    /// Send a leave to all routers.
    Leave,
    /// (Re)arm the membership timer.
    Arm(Duration),
    Disarm,
}

/// Membership of this host in one group on one interface.
#[derive(Debug)]
pub struct Membership {
    state: MembershipState,
    /// Sockets that joined the group.
    members: usize,
    /// Did we send the last report heard for this group?
    last_reporter: bool,
    /// Unsolicited reports still to repeat.
    unsolicited: usize,
    timer: Option<TimerId>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl IgmpHeader {
    pub fn new(igmp_type: u8, max_resp_time: u8, group: Ipv4Addr) -> Self {
        Self {
            igmp_type,
            max_resp_time,
            group,
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < IGMP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "IGMP message too small"));
        }
        if fold_checksum(sum_words(buf, 0)) != 0 {
            return Err(Fail::new(EBADMSG, "IGMP checksum mismatch"));
        }
        let group: Ipv4Addr = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
        if !group.is_multicast() && !group.is_unspecified() {
            return Err(Fail::new(EINVAL, "IGMP group is not a multicast address"));
        }
        Ok(Self {
            igmp_type: buf[0],
            max_resp_time: buf[1],
            group,
        })
    }

    pub fn serialize(&self) -> [u8; IGMP_HEADER_SIZE] {
        let mut buf: [u8; IGMP_HEADER_SIZE] = [0; IGMP_HEADER_SIZE];
        buf[0] = self.igmp_type;
        buf[1] = self.max_resp_time;
        buf[4..8].copy_from_slice(&self.group.octets());
        let checksum: u16 = fold_checksum(sum_words(&buf, 0));
        buf[2..4].copy_from_slice(&checksum.to_be_bytes());
        buf
    }

    pub fn get_type(&self) -> u8 {
        self.igmp_type
    }

    pub fn get_group(&self) -> Ipv4Addr {
        self.group
    }

    /// Maximum response time of a query. Version 1 queries carry none and get `default`.
    pub fn get_max_resp_time(&self, default: Duration) -> Duration {
        match self.max_resp_time {
            0 => default,
            n => DECISECOND * n as u32,
        }
    }

    pub fn is_report(&self) -> bool {
        self.igmp_type == IGMP_V1_MEMBERSHIP_REPORT || self.igmp_type == IGMP_V2_MEMBERSHIP_REPORT
    }
}

impl Membership {
    pub fn new() -> Self {
        Self {
            state: MembershipState::NonMember,
            members: 0,
            last_reporter: false,
            unsolicited: 0,
            timer: None,
        }
    }

    pub fn get_state(&self) -> MembershipState {
        self.state
    }

    pub fn is_member(&self) -> bool {
        self.state != MembershipState::NonMember
    }

    pub fn take_timer(&mut self) -> Option<TimerId> {
        self.timer.take()
    }

    pub fn set_timer(&mut self, timer: Option<TimerId>) {
        self.timer = timer;
    }

    /// A socket joins the group. The first join sends an unsolicited report, repeated once after `interval`.
    pub fn join(&mut self, interval: Duration) -> Vec<MembershipEffect> {
        self.members += 1;
        if self.members > 1 {
            return Vec::new();
        }
        debug!("join(): NonMember -> DelayingMember");
        self.state = MembershipState::DelayingMember;
        self.last_reporter = true;
        self.unsolicited = 1;
        vec![MembershipEffect::Report, MembershipEffect::Arm(interval)]
    }

    /// A socket leaves the group. The last one out sends a leave if this host reported last.
    pub fn leave(&mut self) -> Vec<MembershipEffect> {
        if self.members == 0 {
            return Vec::new();
        }
        self.members -= 1;
        if self.members > 0 {
            return Vec::new();
        }
        debug!("leave(): {:?} -> NonMember", self.state);
        let mut effects: Vec<MembershipEffect> = vec![MembershipEffect::Disarm];
        if self.last_reporter {
            effects.push(MembershipEffect::Leave);
        }
        self.state = MembershipState::NonMember;
        self.last_reporter = false;
        self.unsolicited = 0;
        effects
    }

    /// The membership timer fired.
    pub fn expired(&mut self) -> Vec<MembershipEffect> {
        match self.state {
            MembershipState::DelayingMember => {
                self.last_reporter = true;
                if self.unsolicited > 0 {
                    self.unsolicited -= 1;
                }
                self.state = MembershipState::IdleMember;
                vec![MembershipEffect::Report]
            },
            _ => Vec::new(),
        }
    }

    /// A query or another host's report for this group arrived. `delay` is a random duration no longer than the
    /// query's max response time.
    pub fn input(&mut self, header: &IgmpHeader, delay: Duration, max_resp_time: Duration) -> Vec<MembershipEffect> {
        match (self.state, header.get_type()) {
            (MembershipState::IdleMember, IGMP_MEMBERSHIP_QUERY) => {
                debug!("input(): IdleMember -> DelayingMember");
                self.state = MembershipState::DelayingMember;
                vec![MembershipEffect::Arm(delay.min(max_resp_time))]
            },
            (MembershipState::DelayingMember, IGMP_MEMBERSHIP_QUERY) if self.unsolicited > 0 => {
                // Answer the query instead of repeating the unsolicited report.
                self.unsolicited = 0;
                vec![MembershipEffect::Arm(delay.min(max_resp_time))]
            },
            (MembershipState::DelayingMember, t) if t == IGMP_V1_MEMBERSHIP_REPORT || t == IGMP_V2_MEMBERSHIP_REPORT => {
                debug!("input(): DelayingMember -> IdleMember");
                self.state = MembershipState::IdleMember;
                self.last_reporter = false;
                self.unsolicited = 0;
                vec![MembershipEffect::Disarm]
            },
            _ => Vec::new(),
        }
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        IgmpHeader,
        Membership,
        MembershipEffect,
        MembershipState,
        IGMP_LEAVE_GROUP,
        IGMP_MEMBERSHIP_QUERY,
        IGMP_V2_MEMBERSHIP_REPORT,
    };
    use ::anyhow::Result;
    use ::std::{
        net::Ipv4Addr,
        time::Duration,
    };

    const GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 2, 3);

    #[test]
    fn codec() -> Result<()> {
        let bytes = IgmpHeader::new(IGMP_LEAVE_GROUP, 0, GROUP).serialize();
        let header: IgmpHeader = IgmpHeader::parse(&bytes)?;
        crate::ensure_eq!(header.get_type(), IGMP_LEAVE_GROUP);
        crate::ensure_eq!(header.get_group(), GROUP);

        let unicast = IgmpHeader::new(IGMP_V2_MEMBERSHIP_REPORT, 0, Ipv4Addr::new(10, 0, 0, 1)).serialize();
        crate::ensure_eq!(IgmpHeader::parse(&unicast).is_err(), true);

        let query: IgmpHeader = IgmpHeader::new(IGMP_MEMBERSHIP_QUERY, 25, Ipv4Addr::UNSPECIFIED);
        crate::ensure_eq!(query.get_max_resp_time(Duration::from_secs(10)), Duration::from_millis(2500));
        Ok(())
    }

    #[test]
    fn join_report_and_leave() -> Result<()> {
        let interval: Duration = Duration::from_secs(10);
        let mut membership: Membership = Membership::new();
        crate::ensure_eq!(
            membership.join(interval),
            vec![MembershipEffect::Report, MembershipEffect::Arm(interval)]
        );
        crate::ensure_eq!(membership.get_state(), MembershipState::DelayingMember);
        // A second socket joining changes nothing.
        crate::ensure_eq!(membership.join(interval), vec![]);

        crate::ensure_eq!(membership.expired(), vec![MembershipEffect::Report]);
        crate::ensure_eq!(membership.get_state(), MembershipState::IdleMember);

        crate::ensure_eq!(membership.leave(), vec![]);
        crate::ensure_eq!(
            membership.leave(),
            vec![MembershipEffect::Disarm, MembershipEffect::Leave]
        );
        crate::ensure_eq!(membership.get_state(), MembershipState::NonMember);
        Ok(())
    }

    #[test]
    fn query_and_suppression() -> Result<()> {
        let mut membership: Membership = Membership::new();
        membership.join(Duration::from_secs(10));
        membership.expired();

        let query: IgmpHeader = IgmpHeader::new(IGMP_MEMBERSHIP_QUERY, 100, Ipv4Addr::UNSPECIFIED);
        let max: Duration = query.get_max_resp_time(Duration::from_secs(10));
        crate::ensure_eq!(
            membership.input(&query, Duration::from_secs(3), max),
            vec![MembershipEffect::Arm(Duration::from_secs(3))]
        );
        crate::ensure_eq!(membership.get_state(), MembershipState::DelayingMember);

        // Another host answered first: stay quiet and do not send a leave later.
        let report: IgmpHeader = IgmpHeader::new(IGMP_V2_MEMBERSHIP_REPORT, 0, GROUP);
        crate::ensure_eq!(
            membership.input(&report, Duration::ZERO, max),
            vec![MembershipEffect::Disarm]
        );
        crate::ensure_eq!(membership.get_state(), MembershipState::IdleMember);
        crate::ensure_eq!(membership.leave(), vec![MembershipEffect::Disarm]);
        Ok(())
    }
}
