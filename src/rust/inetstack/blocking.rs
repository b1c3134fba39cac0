// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Blocking facade over [InetStack] for callers that own a thread.
//!
//! Every call takes the stack lock. A call that would return `EAGAIN` polls the stack itself and then waits on the
//! condition variable, so a thread blocked in one socket still drives the traffic of the others. Waiters are woken
//! after every poll.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::{
        InetStack,
        SocketDesc,
        SocketType,
    },
    runtime::{
        fail::Fail,
        monitor::Monitor,
    },
};
use ::libc::{
    EAGAIN,
    ETIMEDOUT,
};
use ::std::{
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    sync::MutexGuard,
    time::{
        Duration,
        Instant,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Longest a blocked caller sleeps before polling the interfaces again.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

//======================================================================================================================
// Structures
//======================================================================================================================

/// A thread-safe handle on a stack. Clones share the same stack.
#[derive(Clone)]
pub struct SharedInetStack(Monitor<InetStack>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SharedInetStack {
    pub fn new(stack: InetStack) -> Self {
        Self(Monitor::new(stack))
    }

    /// Locks the stack for direct use of the non-blocking API.
    pub fn lock(&self) -> MutexGuard<'_, InetStack> {
        self.0.lock()
    }

    /// Processes pending frames and expired timers, then wakes every waiter.
    pub fn poll(&self) {
        self.0.lock().poll(Instant::now());
        self.0.notify_all();
    }

    pub fn socket(&self, socket_type: SocketType) -> Result<SocketDesc, Fail> {
        self.0.lock().socket(socket_type)
    }

    pub fn bind(&self, sd: SocketDesc, local: SocketAddrV4) -> Result<(), Fail> {
        self.0.lock().bind(sd, local)
    }

    pub fn listen(&self, sd: SocketDesc, backlog: usize) -> Result<(), Fail> {
        self.0.lock().listen(sd, backlog)
    }

    /// Bounds how long blocking calls on `sd` wait before failing with `ETIMEDOUT`.
    pub fn set_timeout(&self, sd: SocketDesc, timeout: Option<Duration>) -> Result<(), Fail> {
        self.0.lock().set_timeout(sd, timeout)
    }

    pub fn close(&self, sd: SocketDesc) -> Result<(), Fail> {
        let result: Result<(), Fail> = self.0.lock().close(sd);
        self.0.notify_all();
        result
    }

    pub fn shutdown_output(&self, sd: SocketDesc) -> Result<(), Fail> {
        self.0.lock().shutdown_output(sd)
    }

    ///
    /// **Brief**
    ///
    /// Connects `sd` to `remote`. For a stream socket this waits until the handshake completes or fails.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, `Ok(())` is returned. Upon failure, `Fail` is returned instead: `ECONNREFUSED`
    /// if the peer reset the attempt, `ETIMEDOUT` if the socket timeout elapsed.
    ///
    pub fn connect(&self, sd: SocketDesc, remote: SocketAddrV4) -> Result<(), Fail> {
        trace!("connect(): sd={:?} remote={:?}", sd, remote);
        self.0.lock().connect(sd, remote)?;
        self.block_on(sd, |stack| {
            if stack.is_connected(sd)? {
                return Ok(());
            }
            match stack.get_error(sd)? {
                Some(e) => Err(e),
                None => Err(Fail::new(EAGAIN, "connection in progress")),
            }
        })
    }

    /// Waits for a connection on the listening socket `sd`.
    pub fn accept(&self, sd: SocketDesc) -> Result<(SocketDesc, SocketAddrV4), Fail> {
        trace!("accept(): sd={:?}", sd);
        self.block_on(sd, |stack| stack.accept(sd))
    }

    /// Waits until `sd` has data, then reads it into `buf`.
    pub fn read(&self, sd: SocketDesc, buf: &mut [u8]) -> Result<usize, Fail> {
        trace!("read(): sd={:?}", sd);
        self.block_on(sd, |stack| stack.read(sd, buf))
    }

    /// Writes all of `data`, waiting for send buffer space as needed.
    pub fn write(&self, sd: SocketDesc, data: &[u8]) -> Result<usize, Fail> {
        trace!("write(): sd={:?} len={:?}", sd, data.len());
        let mut written: usize = 0;
        while written < data.len() {
            written += self.block_on(sd, |stack| stack.write(sd, &data[written..]))?;
        }
        Ok(written)
    }

    pub fn send_to(&self, sd: SocketDesc, data: &[u8], remote: SocketAddrV4) -> Result<usize, Fail> {
        self.0.lock().send_to(sd, data, remote)
    }

    /// Waits for a datagram on `sd`.
    pub fn recv_from(&self, sd: SocketDesc, buf: &mut [u8]) -> Result<(usize, SocketAddrV4), Fail> {
        trace!("recv_from(): sd={:?}", sd);
        self.block_on(sd, |stack| stack.recv_from(sd, buf))
    }

    ///
    /// **Brief**
    ///
    /// Sends an ICMP echo request to `remote` and waits up to `timeout` for the reply.
    ///
    /// **Return Value**
    ///
    /// Upon successful completion, whether a reply arrived in time is returned. Upon failure, `Fail` is returned
    /// instead.
    ///
    pub fn is_reachable(&self, remote: Ipv4Addr, timeout: Duration) -> Result<bool, Fail> {
        trace!("is_reachable(): remote={:?} timeout={:?}", remote, timeout);
        let id: u16 = self.0.lock().ping(remote, &[0; 32])?;
        let result: Result<bool, Fail> = self.wait(Some(Instant::now() + timeout), |stack| {
            match stack.is_reachable(id)? {
                true => Ok(true),
                false => Err(Fail::new(EAGAIN, "no reply yet")),
            }
        });
        self.0.lock().cancel_echo(id);
        match result {
            Err(e) if e.errno == ETIMEDOUT => Ok(false),
            result => result,
        }
    }

    /// Retries `op` until it stops failing with `EAGAIN` or the timeout of `sd` elapses.
    fn block_on<T>(&self, sd: SocketDesc, op: impl FnMut(&mut InetStack) -> Result<T, Fail>) -> Result<T, Fail> {
        let timeout: Option<Duration> = self.0.lock().get_timeout(sd)?;
        self.wait(timeout.map(|timeout| Instant::now() + timeout), op)
    }

    fn wait<T>(
        &self,
        deadline: Option<Instant>,
        mut op: impl FnMut(&mut InetStack) -> Result<T, Fail>,
    ) -> Result<T, Fail> {
        let mut guard: MutexGuard<'_, InetStack> = self.0.lock();
        loop {
            match op(&mut guard) {
                Err(e) if e.is_would_block() => (),
                result => return result,
            }
            guard.poll(Instant::now());
            self.0.notify_all();
            match op(&mut guard) {
                Err(e) if e.is_would_block() => (),
                result => return result,
            }
            let now: Instant = Instant::now();
            if deadline.map_or(false, |deadline| now >= deadline) {
                return Err(Fail::new(ETIMEDOUT, "operation timed out"));
            }
            let wake: Instant = match deadline {
                Some(deadline) => deadline.min(now + POLL_INTERVAL),
                None => now + POLL_INTERVAL,
            };
            guard = self.0.wait_until(guard, Some(wake)).0;
        }
    }
}
