// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ::std::time::Duration;

/// Default slow start threshold.
pub const DEF_SSTHRESH: i32 = 65535;

/// Largest window we advertise or track; window scaling is not negotiated.
pub const MAX_WINDOW: i32 = 65535;

/// Retransmissions before the connection is allowed to time out (RFC 1122).
pub const R1: u32 = 3;

/// Retransmissions after which the MSS falls back to the default (RFC 2923).
pub const PMTUD_BACKOFF: u32 = 4;

/// Cap on consecutive retransmissions. More than `R1`, less than 31.
pub const MAX_BACKOFF: u32 = 16;

/// Duplicate ACKs that trigger fast retransmit.
pub const RXMIT_THRESH: i32 = 3;

/// Duplicate ACKs that enable limited transmit (RFC 3042).
pub const LIMITED_THRESH: i32 = 2;

/// Total retransmission time before an established connection gives up (RFC 1122 4.2.3.5).
pub const R2: Duration = Duration::from_secs(100);

/// Same for a connection that is still opening.
pub const R2_SYN: Duration = Duration::from_secs(180);

/// Maximum segment lifetime.
pub const MSL: Duration = Duration::from_secs(120);

/// Lower bound of the retransmission timeout (RFC 2988).
pub const RTT_MIN: Duration = Duration::from_secs(1);

pub const RTT_MAX: Duration = Duration::from_secs(2 * 120);

/// Retransmission timeout before the first round trip sample.
pub const RTT_DEFAULT: Duration = Duration::from_secs(3);

/// Longest time a peer may keep its window closed.
pub const PERSIST_MAX: Duration = Duration::from_secs(MAX_BACKOFF as u64 * 2 * 120);
