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

const BACKLOG: usize = 8;
const BUFFER_SIZE: usize = 2048;

//======================================================================================================================
// Helper Functions
//======================================================================================================================

/// Opens a listening socket with a bounded timeout.
fn listen(stack: &SharedInetStack, local: SocketAddrV4) -> Result<SocketDesc> {
    let sd: SocketDesc = stack.socket(SocketType::Stream)?;
    stack.set_timeout(sd, Some(TIMEOUT))?;
    stack.bind(sd, local)?;
    stack.listen(sd, BACKLOG)?;
    Ok(sd)
}

/// Reads until the peer closes its side of the stream.
fn read_to_end(stack: &SharedInetStack, sd: SocketDesc) -> Result<Vec<u8>> {
    let mut received: Vec<u8> = Vec::new();
    let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
    loop {
        let len: usize = stack.read(sd, &mut buf)?;
        if len == 0 {
            return Ok(received);
        }
        received.extend_from_slice(&buf[..len]);
    }
}

fn errno<T>(result: Result<T, Fail>) -> Option<i32> {
    result.err().map(|e| e.errno)
}

//======================================================================================================================
// Connection Setup
//======================================================================================================================

/// Tests if a connection can be established and torn down between two hosts.
#[test]
fn tcp_connection_setup() -> Result<()> {
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (ready_tx, ready_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let bob_addr: SocketAddrV4 = SocketAddrV4::new(BOB_IPV4, PORT_BASE);

    let bob: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let sd: SocketDesc = listen(&bob, bob_addr)?;
        ready_tx.send(())?;
        let (qd, remote): (SocketDesc, SocketAddrV4) = bob.accept(sd)?;
        ensure_eq!(*remote.ip(), ALICE_IPV4);
        ensure_eq!(bob.lock().get_local(qd)?, Some(bob_addr));
        ensure_eq!(read_to_end(&bob, qd)?.len(), 0);
        bob.close(qd)?;
        bob.close(sd)?;
        linger(&bob, &done_rx);
        Ok(bob)
    });

    let alice: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        ready_rx.recv()?;
        let sd: SocketDesc = alice.socket(SocketType::Stream)?;
        alice.set_timeout(sd, Some(TIMEOUT))?;
        alice.connect(sd, bob_addr)?;
        ensure_eq!(alice.lock().get_remote(sd)?, Some(bob_addr));
        alice.shutdown_output(sd)?;
        ensure_eq!(read_to_end(&alice, sd)?.len(), 0);
        alice.close(sd)?;
        done_tx.send(())?;
        Ok(alice)
    });

    join(alice)?;
    join(bob)?;
    Ok(())
}

/// Tests if connecting to a port nobody listens on fails.
#[test]
fn tcp_connect_refused() -> Result<()> {
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (stop, poller): (Sender<()>, JoinHandle<Result<SharedInetStack>>) = spawn_poller(bob);

    let sd: SocketDesc = alice.socket(SocketType::Stream)?;
    alice.set_timeout(sd, Some(TIMEOUT))?;
    ensure_eq!(
        errno(alice.connect(sd, SocketAddrV4::new(BOB_IPV4, PORT_BASE))),
        Some(libc::ECONNREFUSED)
    );
    alice.close(sd)?;

    stop.send(())?;
    join(poller)?;
    Ok(())
}

/// Tests if accept() gives up once the socket timeout elapses.
#[test]
fn tcp_accept_times_out() -> Result<()> {
    let (alice, _bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let sd: SocketDesc = listen(&alice, SocketAddrV4::new(ALICE_IPV4, PORT_BASE))?;
    alice.set_timeout(sd, Some(Duration::from_millis(50)))?;
    ensure_eq!(errno(alice.accept(sd)), Some(libc::ETIMEDOUT));
    alice.close(sd)?;
    Ok(())
}

//======================================================================================================================
// Push and Pop
//======================================================================================================================

/// Tests if a stream larger than the windows is echoed back intact.
#[test]
fn tcp_echo_remote() -> Result<()> {
    const LENGTH: usize = 64 * 1024;
    let (alice, bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let (ready_tx, ready_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let (done_tx, done_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::bounded(1);
    let bob_addr: SocketAddrV4 = SocketAddrV4::new(BOB_IPV4, PORT_BASE);

    let bob: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        let sd: SocketDesc = listen(&bob, bob_addr)?;
        ready_tx.send(())?;
        let (qd, _): (SocketDesc, SocketAddrV4) = bob.accept(sd)?;
        let data: Vec<u8> = read_to_end(&bob, qd)?;
        ensure_eq!(data.len(), LENGTH);
        ensure_eq!(bob.write(qd, &data)?, LENGTH);
        bob.close(qd)?;
        bob.close(sd)?;
        linger(&bob, &done_rx);
        Ok(bob)
    });

    let alice: JoinHandle<Result<SharedInetStack>> = thread::spawn(move || {
        ready_rx.recv()?;
        let sd: SocketDesc = alice.socket(SocketType::Stream)?;
        alice.set_timeout(sd, Some(TIMEOUT))?;
        alice.connect(sd, bob_addr)?;
        let data: Vec<u8> = cook_data(LENGTH);
        ensure_eq!(alice.write(sd, &data)?, LENGTH);
        alice.shutdown_output(sd)?;
        let echoed: Vec<u8> = read_to_end(&alice, sd)?;
        ensure_eq!(echoed == data, true);
        alice.close(sd)?;
        done_tx.send(())?;
        Ok(alice)
    });

    join(alice)?;
    join(bob)?;
    Ok(())
}

/// Tests if a stream can be carried over the loopback interface by a single thread.
#[test]
fn tcp_loopback() -> Result<()> {
    let (alice, _bob): (SharedInetStack, SharedInetStack) = new_pair()?;
    let local: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, PORT_BASE);
    let listener: SocketDesc = listen(&alice, local)?;

    let client: SocketDesc = alice.socket(SocketType::Stream)?;
    alice.set_timeout(client, Some(TIMEOUT))?;
    alice.connect(client, local)?;
    let (server, remote): (SocketDesc, SocketAddrV4) = alice.accept(listener)?;
    ensure_eq!(*remote.ip(), Ipv4Addr::LOCALHOST);

    let data: Vec<u8> = cook_data(100);
    ensure_eq!(alice.write(client, &data)?, data.len());
    let mut buf: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
    let len: usize = alice.read(server, &mut buf)?;
    ensure_eq!(&buf[..len], &data[..]);

    alice.close(client)?;
    ensure_eq!(alice.read(server, &mut buf)?, 0);
    alice.close(server)?;
    alice.close(listener)?;
    Ok(())
}
