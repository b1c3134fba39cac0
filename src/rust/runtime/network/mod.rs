// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod channel;
pub mod config;
pub mod consts;
pub mod ephemeral;
pub mod types;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    network::types::MacAddress,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// API for the network interface underneath the stack: anything that can move raw Ethernet II frames (a NIC, a raw
/// socket, a test queue).
pub trait NetworkInterface: Send {
    /// Link-layer address of the interface.
    fn get_link_addr(&self) -> MacAddress;

    /// Largest IP datagram the link carries, excluding the link header.
    fn get_mtu(&self) -> usize;

    /// Transmits a single frame.
    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), Fail>;

    /// Receives a batch of frames. An empty batch means nothing is pending.
    fn receive(&mut self) -> Result<Vec<Vec<u8>>, Fail>;
}
