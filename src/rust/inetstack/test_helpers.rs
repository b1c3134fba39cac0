// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::InetStack,
    runtime::{
        fail::Fail,
        logging,
        network::{
            config::StackConfig,
            consts::DEFAULT_MTU,
            types::MacAddress,
            NetworkInterface,
        },
    },
};
use ::std::{
    collections::VecDeque,
    net::Ipv4Addr,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
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
pub const CARRIE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 3);

/// Upper bound on frame exchange rounds before a test gives up on the network settling.
const MAX_EXCHANGE_ROUNDS: usize = 256;

//======================================================================================================================
// Structures
//======================================================================================================================

pub struct TestPhysicalLayer {
    link_addr: MacAddress,
    mtu: usize,
    incoming: VecDeque<Vec<u8>>,
    outgoing: VecDeque<Vec<u8>>,
}

/// Test NIC whose queues stay reachable from the test after the stack takes ownership of a clone.
#[derive(Clone)]
pub struct SharedTestPhysicalLayer(Arc<Mutex<TestPhysicalLayer>>);

/// A stack with one test interface, plus the clock the test drives it with.
pub struct TestHost {
    pub stack: InetStack,
    pub nic: SharedTestPhysicalLayer,
    pub now: Instant,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedTestPhysicalLayer {
    pub fn new_test(link_addr: MacAddress) -> Self {
        logging::initialize();
        Self(Arc::new(Mutex::new(TestPhysicalLayer {
            link_addr,
            mtu: DEFAULT_MTU,
            incoming: VecDeque::new(),
            outgoing: VecDeque::new(),
        })))
    }

    fn inner(&self) -> MutexGuard<'_, TestPhysicalLayer> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_mtu(&self, mtu: usize) {
        self.inner().mtu = mtu;
    }

    /// Removes a single frame from the outgoing queue.
    pub fn pop_frame(&self) -> Option<Vec<u8>> {
        self.inner().outgoing.pop_front()
    }

    pub fn pop_all_frames(&self) -> Vec<Vec<u8>> {
        self.inner().outgoing.drain(..).collect()
    }

    pub fn push_frame(&self, frame: Vec<u8>) {
        self.inner().incoming.push_back(frame);
    }
}

impl TestHost {
    /// Builds a host whose address skips conflict detection.
    pub fn new(now: Instant, link_addr: MacAddress, addr: Ipv4Addr, seed: u64) -> Result<Self, Fail> {
        let mut config: StackConfig = StackConfig::default();
        config.inet = config.inet.set_conflict_checks(0);
        Self::with_config(now, link_addr, addr, seed, config)
    }

    pub fn with_config(
        now: Instant,
        link_addr: MacAddress,
        addr: Ipv4Addr,
        seed: u64,
        config: StackConfig,
    ) -> Result<Self, Fail> {
        let nic: SharedTestPhysicalLayer = SharedTestPhysicalLayer::new_test(link_addr);
        let mut stack: InetStack = InetStack::with_seed(config, now, seed);
        stack.add_interface(Box::new(nic.clone()), addr, 24)?;
        stack.poll(now);
        Ok(Self { stack, nic, now })
    }

    /// Moves this host's clock forward and runs its timers.
    pub fn advance_clock(&mut self, delay: Duration) {
        self.now += delay;
        self.stack.poll(self.now);
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl NetworkInterface for SharedTestPhysicalLayer {
    fn get_link_addr(&self) -> MacAddress {
        self.inner().link_addr
    }

    fn get_mtu(&self) -> usize {
        self.inner().mtu
    }

    fn transmit(&mut self, frame: Vec<u8>) -> Result<(), Fail> {
        let mut inner: MutexGuard<'_, TestPhysicalLayer> = self.inner();
        debug!("transmit(): frame {:?}, {:?} bytes", inner.outgoing.len(), frame.len());
        inner.outgoing.push_back(frame);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<Vec<u8>>, Fail> {
        Ok(self.inner().incoming.drain(..).collect())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

pub fn new_alice(now: Instant) -> Result<TestHost, Fail> {
    TestHost::new(now, ALICE_MAC, ALICE_IPV4, 1)
}

pub fn new_bob(now: Instant) -> Result<TestHost, Fail> {
    TestHost::new(now, BOB_MAC, BOB_IPV4, 2)
}

/// Carries frames between two hosts on the same segment until neither has anything left to send.
pub fn exchange(alice: &mut TestHost, bob: &mut TestHost) {
    for _ in 0..MAX_EXCHANGE_ROUNDS {
        let to_bob: Vec<Vec<u8>> = alice.nic.pop_all_frames();
        let to_alice: Vec<Vec<u8>> = bob.nic.pop_all_frames();
        if to_bob.is_empty() && to_alice.is_empty() {
            return;
        }
        for frame in to_bob {
            bob.nic.push_frame(frame);
        }
        for frame in to_alice {
            alice.nic.push_frame(frame);
        }
        alice.stack.poll(alice.now);
        bob.stack.poll(bob.now);
    }
    warn!("exchange(): network did not settle");
}

/// Advances both clocks by `delay` and exchanges whatever the timers sent.
pub fn advance_both(alice: &mut TestHost, bob: &mut TestHost, delay: Duration) {
    alice.advance_clock(delay);
    bob.advance_clock(delay);
    exchange(alice, bob);
}
