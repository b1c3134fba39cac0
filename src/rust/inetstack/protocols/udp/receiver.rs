// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::collections::ring::Ring;
use ::std::net::{
    Ipv4Addr,
    SocketAddrV4,
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Bytes of the record header stored in front of every datagram in the ring: length, address and port.
const RECORD_HEADER_SIZE: usize = 4 + 4 + 2;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Sender of a received datagram and its size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramRecord {
    pub len: usize,
    pub remote: SocketAddrV4,
}

/// Receive queue of a UDP socket. Datagrams are kept whole in a byte ring, each behind a record header, so the queue
/// is bounded by the socket's receive buffer size rather than by a datagram count.
pub struct DatagramReceiver {
    ring: Ring,
    count: usize,
    errno: i32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl DatagramReceiver {
    pub fn new(size: usize) -> Self {
        Self {
            ring: Ring::new(size.max(RECORD_HEADER_SIZE + 1)),
            count: 0,
            errno: 0,
        }
    }

    /// Queues a datagram. Returns false, dropping it, if it does not fit.
    pub fn push(&mut self, remote: SocketAddrV4, data: &[u8]) -> bool {
        if self.ring.get_unused() < RECORD_HEADER_SIZE + data.len() {
            debug!("push(): receive buffer full, dropping datagram (len={:?})", data.len());
            return false;
        }
        let mut header: [u8; RECORD_HEADER_SIZE] = [0; RECORD_HEADER_SIZE];
        header[0..4].copy_from_slice(&(data.len() as u32).to_be_bytes());
        header[4..8].copy_from_slice(&remote.ip().octets());
        header[8..10].copy_from_slice(&remote.port().to_be_bytes());
        self.ring.write(&header);
        self.ring.write(data);
        self.count += 1;
        true
    }

    /// Dequeues the oldest datagram into `buf`. A datagram longer than `buf` is truncated and the excess discarded.
    pub fn pop(&mut self, buf: &mut [u8]) -> Option<DatagramRecord> {
        let record: DatagramRecord = self.peek_record()?;
        self.ring.discard(RECORD_HEADER_SIZE);
        let count: usize = record.len.min(buf.len());
        self.ring.read(&mut buf[..count]);
        self.ring.discard(record.len - count);
        self.count -= 1;
        Some(record)
    }

    /// Describes the oldest datagram without dequeuing it.
    pub fn peek_record(&self) -> Option<DatagramRecord> {
        if self.count == 0 {
            return None;
        }
        let mut header: [u8; RECORD_HEADER_SIZE] = [0; RECORD_HEADER_SIZE];
        self.ring.peek(&mut header, 0);
        let len: usize = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let addr: Ipv4Addr = Ipv4Addr::new(header[4], header[5], header[6], header[7]);
        let port: u16 = u16::from_be_bytes([header[8], header[9]]);
        Some(DatagramRecord {
            len,
            remote: SocketAddrV4::new(addr, port),
        })
    }

    /// Records an asynchronous error (e.g. an ICMP port unreachable). It is reported once by [Self::take_error].
    pub fn set_error(&mut self, errno: i32) {
        self.errno = errno;
    }

    pub fn take_error(&mut self) -> Option<i32> {
        match self.errno {
            0 => None,
            errno => {
                self.errno = 0;
                Some(errno)
            },
        }
    }

    pub fn is_readable(&self) -> bool {
        self.count > 0 || self.errno != 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Changes the capacity. Fails if the queued datagrams would not fit.
    pub fn resize(&mut self, size: usize) -> bool {
        self.ring.resize(size.max(RECORD_HEADER_SIZE + 1))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        DatagramReceiver,
        DatagramRecord,
    };
    use ::anyhow::Result;
    use ::libc::ECONNREFUSED;
    use ::std::net::{
        Ipv4Addr,
        SocketAddrV4,
    };

    #[test]
    fn datagrams_keep_their_boundaries() -> Result<()> {
        let alice: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 7000);
        let bob: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 8000);
        let mut receiver: DatagramReceiver = DatagramReceiver::new(64);
        crate::ensure_eq!(receiver.push(alice, b"first"), true);
        crate::ensure_eq!(receiver.push(bob, b"second datagram"), true);
        crate::ensure_eq!(receiver.len(), 2);

        let mut buf: [u8; 32] = [0; 32];
        let record: Option<DatagramRecord> = receiver.pop(&mut buf);
        crate::ensure_eq!(record, Some(DatagramRecord { len: 5, remote: alice }));
        crate::ensure_eq!(&buf[..5], b"first");

        // Truncated read discards the tail of the datagram.
        let mut small: [u8; 6] = [0; 6];
        let record: Option<DatagramRecord> = receiver.pop(&mut small);
        crate::ensure_eq!(record.map(|r| r.remote), Some(bob));
        crate::ensure_eq!(&small, b"second");
        crate::ensure_eq!(receiver.is_readable(), false);
        Ok(())
    }

    #[test]
    fn full_queue_drops_whole_datagrams() -> Result<()> {
        let peer: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 7000);
        let mut receiver: DatagramReceiver = DatagramReceiver::new(32);
        crate::ensure_eq!(receiver.push(peer, &[1; 20]), true);
        crate::ensure_eq!(receiver.push(peer, &[2; 5]), false);
        crate::ensure_eq!(receiver.len(), 1);
        Ok(())
    }

    #[test]
    fn error_is_reported_once() -> Result<()> {
        let mut receiver: DatagramReceiver = DatagramReceiver::new(32);
        receiver.set_error(ECONNREFUSED);
        crate::ensure_eq!(receiver.is_readable(), true);
        crate::ensure_eq!(receiver.take_error(), Some(ECONNREFUSED));
        crate::ensure_eq!(receiver.take_error(), None);
        Ok(())
    }
}
