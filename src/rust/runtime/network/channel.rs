// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::{
        consts::DEFAULT_MTU,
        types::MacAddress,
        NetworkInterface,
    },
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::libc::ENETDOWN;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Interface whose wire is a pair of channels, for stacks living on different threads of the same process.
pub struct ChannelInterface {
    link_addr: MacAddress,
    mtu: usize,
    incoming: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ChannelInterface {
    pub fn new(link_addr: MacAddress, incoming: Receiver<Vec<u8>>, outgoing: Sender<Vec<u8>>) -> Self {
        Self {
            link_addr,
            mtu: DEFAULT_MTU,
            incoming,
            outgoing,
        }
    }

    /// Creates two interfaces wired back to back.
    pub fn pair(a: MacAddress, b: MacAddress) -> (Self, Self) {
        let (a_tx, b_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = crossbeam_channel::unbounded();
        let (b_tx, a_rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = crossbeam_channel::unbounded();
        (Self::new(a, a_rx, a_tx), Self::new(b, b_rx, b_tx))
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl NetworkInterface for ChannelInterface {
    fn get_link_addr(&self) -> MacAddress {
        self.link_addr
    }

    fn get_mtu(&self) -> usize {
        self.mtu
    }

    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), Fail> {
        match self.outgoing.try_send(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                let cause: String = format!("cannot transmit frame ({:?})", e);
                warn!("transmit(): {}", cause);
                Err(Fail::new(ENETDOWN, &cause))
            },
        }
    }

    fn receive(&mut self) -> Result<Vec<Vec<u8>>, Fail> {
        Ok(self.incoming.try_iter().collect())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
