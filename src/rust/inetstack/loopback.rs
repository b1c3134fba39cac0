// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::{
        types::MacAddress,
        NetworkInterface,
    },
};
use ::std::collections::VecDeque;

//======================================================================================================================
// Constants
//======================================================================================================================

/// MTU of the loopback interface.
pub const LOOPBACK_MTU: usize = 16384;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Interface that hands every transmitted frame back on the next receive.
#[derive(Default)]
pub struct LoopbackInterface {
    frames: VecDeque<Vec<u8>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl LoopbackInterface {
    pub fn new() -> Self {
        Self::default()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl NetworkInterface for LoopbackInterface {
    fn get_link_addr(&self) -> MacAddress {
        MacAddress::nil()
    }

    fn get_mtu(&self) -> usize {
        LOOPBACK_MTU
    }

    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), Fail> {
        self.frames.push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<Vec<u8>>, Fail> {
        Ok(self.frames.drain(..).collect())
    }
}
