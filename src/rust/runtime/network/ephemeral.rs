// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::consts::FIRST_EPHEMERAL_PORT,
};
use ::rand::{
    rngs::SmallRng,
    seq::SliceRandom,
    SeedableRng,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Last private port. See https://datatracker.ietf.org/doc/html/rfc6335 for details.
const LAST_EPHEMERAL_PORT: u16 = 65535;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Pool of anonymous ports for one transport protocol.
pub struct EphemeralPorts {
    ports: Vec<u16>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EphemeralPorts {
    /// Creates a pool whose allocation order is a permutation of the ephemeral range picked by `seed`.
    pub fn new(seed: u64) -> Self {
        let mut ports: Vec<u16> = (FIRST_EPHEMERAL_PORT..=LAST_EPHEMERAL_PORT).rev().collect();
        let mut rng: SmallRng = SmallRng::seed_from_u64(seed);
        ports.shuffle(&mut rng);
        Self { ports }
    }

    /// Asserts wether a port is in the ephemeral port range.
    pub fn is_private(port: u16) -> bool {
        port >= FIRST_EPHEMERAL_PORT
    }

    /// Allocates any ephemeral port from the pool.
    pub fn alloc(&mut self) -> Result<u16, Fail> {
        self.ports.pop().ok_or(Fail::new(
            libc::EADDRINUSE,
            "all port numbers in the ephemeral port range are currently in use",
        ))
    }

    /// Takes a specific port out of the pool so that it is never handed out. Ports outside the range are ignored.
    pub fn reserve(&mut self, port: u16) {
        self.ports.retain(|&p| p != port);
    }

    /// Returns a port to the pool.
    pub fn free(&mut self, port: u16) {
        if Self::is_private(port) && !self.ports.contains(&port) {
            self.ports.push(port);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
