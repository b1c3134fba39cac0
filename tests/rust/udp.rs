// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::common::{
    cook_data,
    join,
    linger,
    new_pair,
    spawn_poller,
    ALICE_IPV4,
    BOB_IPV4,
    PORT_BASE,
    TIMEOUT,
};
use ::anyhow::Result;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::esnet::{
    ensure_eq,
    ensure_neq,
    Fail,
    SharedInetStack,
    SocketDesc,
    SocketType,
};
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    thread::{
        self,
        JoinHandle,
    },
    time::Duration,
};

//======================================================================================================================
// Constants
//======================================================================================================================

const FIRST_EPHEMERAL_PORT: u16 = 49152;
const BUFFER_SIZE: usize = 2048;

//======================================================================================================================
// Helper Functions
//======================================================================================================================

fn bound_socket(stack: &SharedInetStack, local: SocketAddrV4) -> Result<SocketDesc> {
    let sd: SocketDesc = stack.socket(SocketType::Datagram)?;
    stack.set_timeout(sd, Some(TIMEOUT))?;
    stack.bind(sd, local)?;
    Ok(sd)
}

fn errno<T>(result: Result<T, Fail>) -> Option<i32> {
    result.err().map(|e| e.errno)
}

//======================================================================================================================
// Setup
//======================================================================================================================

/// Tests if sockets can be bound to fixed, ephemeral-range and wildcard ports.
#[test]
fn udp_setup() -> Result<()> {
    let (alice, _bob): (SharedInetStack, SharedInetStack) = new_pair()?;

    let sd: SocketDesc = bound_socket(&alice, SocketAddrV4::new(ALICE_IPV4, PORT_BASE))?;
    let other: SocketDesc = alice.socket(SocketType::Datagram)?;
    ensure_eq!(
        errno(alice.bind(other, SocketAddrV4::new(ALICE_IPV4, PORT_BASE))),
        Some(libc::EADDRINUSE)
    );
    alice.close(sd)?;

    let sd: SocketDesc = bound_socket(&alice, SocketAddrV4::new(ALICE_IPV4, FIRST_EPHEMERAL_PORT))?;
    alice.close(sd)?;

    alice.bind(other, SocketAddrV4::new(ALICE_IPV4, 0))?;
    let local: SocketAddrV4 = match alice.lock().get_local(other)? {
        Some(local) => local,
        None => anyhow::bail!("socket was not bound"),
    };
    ensure_neq!(local.port(), 0);
    ensure_eq!(local.port() >= FIRST_EPHEMERAL_PORT, true);
    alice.close(other)?;
    Ok(())
}

//======================================================================================================================
// Push and Pop
//======================================================================================================================

/// Tests if a datagram sent to a remote host is echoed back.
#[test]
fn udp_echo_remote() -> Result<()> {
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (ready_tx, ready_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let alice_addr: SocketAddrV4 = SocketAddrV4::new(ALICE_IPV4, PORT_BASE);
    let bob_addr: SocketAddrV4 = SocketAddrV4::new(BOB_IPV4, PORT_BASE);

    let bob: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let sd: SocketDesc = bound_socket(&bob, bob_addr)?;
        ready_tx.send(())?;
        let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
        let (len, remote): (usize, SocketAddrV4) = bob.recv_from(sd, &mut buf)?;
        ensure_eq!(remote, alice_addr);
        ensure_eq!(bob.send_to(sd, &buf[..len], remote)?, len);
        linger(&bob, &done_rx);
        bob.close(sd)?;
        Ok(bob)
    });

    let alice: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let sd: SocketDesc = bound_socket(&alice, alice_addr)?;
        ready_rx.recv()?;
        let data: Vec<u8> = cook_data(32);
        ensure_eq!(alice.send_to(sd, &data, bob_addr)?, data.len());
        let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
        let (len, remote): (usize, SocketAddrV4) = alice.recv_from(sd, &mut buf)?;
        ensure_eq!(remote, bob_addr);
        ensure_eq!(&buf[..len], &data[..]);
        alice.close(sd)?;
        done_tx.send(())?;
        Ok(alice)
    });

    join(alice)?;
    join(bob)?;
    Ok(())
}

/// Tests if a datagram larger than the link MTU crosses the wire in fragments.
#[test]
fn udp_fragmented_datagram() -> Result<()> {
    const LENGTH: usize = 8000;
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (ready_tx, ready_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let bob_addr: SocketAddrV4 = SocketAddrV4::new(BOB_IPV4, PORT_BASE);

    let bob: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let sd: SocketDesc = bound_socket(&bob, bob_addr)?;
        ready_tx.send(())?;
        let mut buf: Vec<u8> = vec![0; LENGTH * 2];
        let (len, _): (usize, SocketAddrV4) = bob.recv_from(sd, &mut buf)?;
        ensure_eq!(buf[..len] == cook_data(LENGTH)[..], true);
        bob.close(sd)?;
        Ok(bob)
    });

    let (stop, poller): (Sender<()>, JoinHandle<Result<SharedInetStack>>) = spawn_poller(alice.clone());
    ready_rx.recv()?;
    let sd: SocketDesc = alice.socket(SocketType::Datagram)?;
    // Resolves the neighbor first: fragments queued behind an unresolved address are dropped.
    ensure_eq!(alice.is_reachable(BOB_IPV4, TIMEOUT)?, true);
    alice.send_to(sd, &cook_data(LENGTH), bob_addr)?;
    join(bob)?;
    alice.close(sd)?;

    stop.send(())?;
    join(poller)?;
    Ok(())
}

/// Tests if datagrams can be carried over the loopback interface.
#[test]
fn udp_loopback() -> Result<()> {
    let (alice, _bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let server_addr: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE);
    let server: SocketDesc = bound_socket(&alice, server_addr)?;
    let client: SocketDesc = bound_socket(&alice, SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE + 1))?;

    let data: Vec<u8> = cook_data(64);
    alice.send_to(client, &data, server_addr)?;
    let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
    let (len, remote): (usize, SocketAddrV4) = alice.recv_from(server, &mut buf)?;
    ensure_eq!(&buf[..len], &data[..]);
    ensure_eq!(remote.port(), PORT_BASE + 1);

    alice.close(client)?;
    alice.close(server)?;
    Ok(())
}

//======================================================================================================================
// Errors
//======================================================================================================================

/// Tests if a connected socket learns that nobody listens on the remote port.
#[test]
fn udp_connected_socket_is_refused() -> Result<()> {
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (stop, poller): (Sender<()>, JoinHandle<Result<SharedInetStack>>) = spawn_poller(bob);

    let sd: SocketDesc = alice.socket(SocketType::Datagram)?;
    alice.set_timeout(sd, Some(TIMEOUT))?;
    alice.connect(sd, SocketAddrV4::new(BOB_IPV4, PORT_BASE))?;
    alice.lock().write(sd, &cook_data(16))?;
    let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
    ensure_eq!(errno(alice.read(sd, &mut buf)), Some(libc::ECONNREFUSED));
    alice.close(sd)?;

    stop.send(())?;
    join(poller)?;
    Ok(())
}

/// Tests if recv_from() gives up once the socket timeout elapses.
#[test]
fn udp_recv_times_out() -> Result<()> {
    let (alice, _bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let sd: SocketDesc = bound_socket(&alice, SocketAddrV4::new(ALICE_IPV4, PORT_BASE))?;
    alice.set_timeout(sd, Some(Duration::from_millis(50)))?;
    let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
    ensure_eq!(errno(alice.recv_from(sd, &mut buf)), Some(libc::ETIMEDOUT));
    alice.close(sd)?;
    Ok(())
}

//======================================================================================================================
// Reachability
//======================================================================================================================

/// Tests if echo requests tell a live neighbor from a missing one.
#[test]
fn icmp_reachability() -> Result<()> {
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (stop, poller): (Sender<()>, JoinHandle<Result<SharedInetStack>>) = spawn_poller(bob);

    ensure_eq!(alice.is_reachable(BOB_IPV4, TIMEOUT)?, true);
    let missing: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 9);
    ensure_eq!(alice.is_reachable(missing, Duration::from_millis(100))?, false);

    stop.send(())?;
    join(poller)?;
    Ok(())
}
