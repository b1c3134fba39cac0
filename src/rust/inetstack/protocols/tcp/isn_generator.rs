// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::inetstack::protocols::tcp::SeqNumber;
use ::std::{
    net::SocketAddrV4,
    time::Instant,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Frequency of the clock component of an initial sequence number (Hz).
const ISS_CLOCK_HZ: u128 = 250_000;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Initial sequence numbers after RFC 1948: a keyed hash of the connection identifiers plus a 250 kHz clock.
pub struct IsnGenerator {
    nonce: u32,
    epoch: Instant,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl IsnGenerator {
    pub fn new(nonce: u32, epoch: Instant) -> Self {
        Self { nonce, epoch }
    }

    pub fn generate(&self, local: &SocketAddrV4, remote: &SocketAddrV4, now: Instant) -> SeqNumber {
        let crc: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);
        let mut digest = crc.digest();
        digest.update(&remote.ip().octets());
        digest.update(&local.port().to_be_bytes());
        digest.update(&local.ip().octets());
        digest.update(&remote.port().to_be_bytes());
        digest.update(&self.nonce.to_be_bytes());
        let hash: u32 = digest.finalize();
        let ticks: u128 = now.saturating_duration_since(self.epoch).as_micros() * ISS_CLOCK_HZ / 1_000_000;
        SeqNumber::from(hash) + (ticks as u32)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
