// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Smallest datagram every IPv4 host must accept (RFC 791).
pub const IP_MIN_MTU: usize = 576;

/// Smallest path MTU we ever settle on (RFC 1191).
pub const MIN_PATH_MTU: usize = 68;

/// Default MTU of an Ethernet link.
pub const DEFAULT_MTU: usize = 1500;

/// Default MSS: the minimum datagram size less IPv4 and TCP headers.
pub const DEFAULT_MSS: usize = IP_MIN_MTU - 20 - 20;

/// Largest MSS we will advertise.
pub const MAX_MSS: usize = u16::MAX as usize;

/// Smallest MSS we accept from a peer.
pub const MIN_MSS: usize = MIN_PATH_MTU - 20 - 20;

/// Scope identifier of the loopback interface.
pub const LOOPBACK_SCOPE: u32 = 1;

/// Scope identifier given to the first registered interface.
pub const FIRST_INTERFACE_SCOPE: u32 = 2;

/// First port of the ephemeral range (RFC 6335).
pub const FIRST_EPHEMERAL_PORT: u16 = 49152;
