// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![allow(dead_code)]

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::esnet::{
    runtime::logging,
    ChannelInterface,
    InetStack,
    MacAddress,
    SharedInetStack,
    StackConfig,
};
use ::std::{
    net::Ipv4Addr,
    thread::{
        self,
        JoinHandle,
    },
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

pub const ALICE_MAC: MacAddress = MacAddress::new([0x12, 0x23, 0x45, 0x67, 0x89, 0xab]);
pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BOB_MAC: MacAddress = MacAddress::new([0xab, 0x89, 0x67, 0x45, 0x23, 0x12]);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

pub const PORT_BASE: u16 = 1234;

/// Bound on every blocking call, so a broken exchange fails the test instead of hanging it.
pub const TIMEOUT: Duration = Duration::from_secs(10);

const POLL_PERIOD: Duration = Duration::from_millis(1);

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Builds a stack that owns `nic` and answers on `addr` right away.
pub fn new_stack(nic: ChannelInterface, addr: Ipv4Addr) -> Result<SharedInetStack> {
    logging::initialize();
    let mut config: StackConfig = StackConfig::default();
    config.inet = config.inet.set_conflict_checks(0);
    let mut stack: InetStack = InetStack::new(config, Instant::now());
    stack.add_interface(Box::new(nic), addr, 24)?;
    Ok(SharedInetStack::new(stack))
}

/// Builds Alice's and Bob's stacks on the two ends of the same wire.
pub fn new_pair() -> Result<(SharedInetStack, SharedInetStack)> {
    let (alice_nic, bob_nic): (ChannelInterface, ChannelInterface) = ChannelInterface::pair(ALICE_MAC, BOB_MAC);
    Ok((new_stack(alice_nic, ALICE_IPV4)?, new_stack(bob_nic, BOB_IPV4)?))
}

/// Joins a test thread, turning a panic into an error.
pub fn join<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => anyhow::bail!("test thread panicked"),
    }
}

/// Fills a buffer with a recognizable pattern.
pub fn cook_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Keeps `stack` answering its peer until `done` fires or its sender goes away.
pub fn linger(stack: &SharedInetStack, done: &Receiver<()>) {
    loop {
        crossbeam_channel::select! {
            recv(done) -> _ => return,
            default(POLL_PERIOD) => stack.poll(),
        }
    }
}

/// Keeps polling `stack` on its own thread until the returned sender is dropped or signalled.
pub fn spawn_poller(stack: SharedInetStack) -> (Sender<()>, JoinHandle<Result<SharedInetStack>>) {
    let (stop_tx, stop_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let handle: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let ticker: Receiver<Instant> = crossbeam_channel::tick(POLL_PERIOD);
        loop {
            crossbeam_channel::select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => stack.poll(),
            }
        }
        Ok(stack)
    });
    (stop_tx, handle)
}
