// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Internet Layer Configuration Descriptor
#[derive(Clone, Debug)]
pub struct InetConfig {
    /// Time to Live Stamped on Outgoing Datagrams
    default_ttl: u8,
    /// Lifetime of an Incomplete Reassembly
    reassembly_timeout: Duration,
    /// Number of Neighbor Solicitations Before Giving Up
    resolution_retries: usize,
    /// Interval Between the First Two Solicitations (Doubled on Every Retry)
    resolution_interval: Duration,
    /// Lifetime of a Reachable Neighbor Entry
    reachable_time: Duration,
    /// Number of Conflict Checks Sent While an Address Is Tentative
    conflict_checks: usize,
    /// IGMP Unsolicited Report Interval
    unsolicited_report_interval: Duration,
    /// IGMP Query Response Interval Used When a Query Carries None
    query_response_interval: Duration,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Associate Functions for Internet Layer Configuration Descriptor
impl InetConfig {
    /// Creates an Internet Layer Configuration Descriptor.
    pub fn new(
        default_ttl: Option<u8>,
        reassembly_timeout: Option<Duration>,
        resolution_retries: Option<usize>,
        resolution_interval: Option<Duration>,
        reachable_time: Option<Duration>,
    ) -> Self {
        let mut config: InetConfig = Self::default();

        if let Some(value) = default_ttl {
            config.default_ttl = value.max(1);
        }
        if let Some(value) = reassembly_timeout {
            config.reassembly_timeout = value;
        }
        if let Some(value) = resolution_retries {
            config.resolution_retries = value;
        }
        if let Some(value) = resolution_interval {
            config.resolution_interval = value;
        }
        if let Some(value) = reachable_time {
            config.reachable_time = value;
        }

        config
    }

    pub fn get_default_ttl(&self) -> u8 {
        self.default_ttl
    }

    pub fn get_reassembly_timeout(&self) -> Duration {
        self.reassembly_timeout
    }

    pub fn get_resolution_retries(&self) -> usize {
        self.resolution_retries
    }

    /// Gets the solicitation interval for the `count`-th retry.
    pub fn get_resolution_interval(&self, count: usize) -> Duration {
        self.resolution_interval * (1u32 << count.min(16))
    }

    pub fn get_reachable_time(&self) -> Duration {
        self.reachable_time
    }

    pub fn get_conflict_checks(&self) -> usize {
        self.conflict_checks
    }

    /// Sets the number of conflict checks for a tentative address. Zero makes new addresses preferred at once.
    pub fn set_conflict_checks(mut self, count: usize) -> Self {
        self.conflict_checks = count;
        self
    }

    pub fn get_unsolicited_report_interval(&self) -> Duration {
        self.unsolicited_report_interval
    }

    pub fn get_query_response_interval(&self) -> Duration {
        self.query_response_interval
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for InetConfig {
    fn default() -> Self {
        Self {
            default_ttl: 64,
            reassembly_timeout: Duration::from_secs(60),
            resolution_retries: 6,
            resolution_interval: Duration::from_millis(500),
            reachable_time: Duration::from_secs(20 * 60),
            conflict_checks: 3,
            unsolicited_report_interval: Duration::from_secs(10),
            query_response_interval: Duration::from_secs(10),
        }
    }
}
