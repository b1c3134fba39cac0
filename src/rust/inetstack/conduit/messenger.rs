// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::libc::{
    EINVAL,
    ENOBUFS,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Callback of a receiver that a messenger selects when it is applied at a conduit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Input,
    Output,
    Error,
}

/// One packet in flight through the conduit graph.
///
/// The messenger owns its chunk exclusively. Input messengers start with the position at the first byte of the frame
/// payload and advance it as each layer consumes its header. Output messengers are allocated with headroom in front of
/// the payload so that each layer can move the position back and write its header in place.
#[derive(Clone, Debug)]
pub struct Messenger {
    chunk: Vec<u8>,
    position: usize,
    mark: usize,
    kind: u32,
    op: Operation,
    scope_id: u32,
    local: Option<Ipv4Addr>,
    remote: Option<Ipv4Addr>,
    local_port: u16,
    remote_port: u16,
    errno: i32,
    flag: u32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Messenger {
    /// Wraps a received datagram.
    pub fn new_input(chunk: Vec<u8>, scope_id: u32) -> Self {
        Self::new(Operation::Input, chunk, 0, scope_id)
    }

    /// Allocates an output messenger holding `payload` behind `headroom` free bytes.
    pub fn new_output(payload: &[u8], headroom: usize) -> Self {
        let mut chunk: Vec<u8> = vec![0; headroom + payload.len()];
        chunk[headroom..].copy_from_slice(payload);
        Self::new(Operation::Output, chunk, headroom, 0)
    }

    /// Allocates an error messenger. Errors carry no payload of their own.
    pub fn new_error(errno: i32) -> Self {
        let mut m: Self = Self::new(Operation::Error, Vec::new(), 0, 0);
        m.errno = errno;
        m
    }

    fn new(op: Operation, chunk: Vec<u8>, position: usize, scope_id: u32) -> Self {
        Self {
            chunk,
            position,
            mark: position,
            kind: 0,
            op,
            scope_id,
            local: None,
            remote: None,
            local_port: 0,
            remote_port: 0,
            errno: 0,
            flag: 0,
        }
    }

    pub fn get_op(&self) -> Operation {
        self.op
    }

    pub fn set_op(&mut self, op: Operation) {
        self.op = op;
    }

    /// Total number of bytes in the chunk.
    pub fn get_size(&self) -> usize {
        self.chunk.len()
    }

    pub fn get_position(&self) -> usize {
        self.position
    }

    /// Moves the position. Out-of-range positions are ignored.
    pub fn set_position(&mut self, position: usize) {
        if position <= self.chunk.len() {
            self.position = position;
        }
    }

    /// Moves the position by `delta` bytes. A move that would leave the chunk is ignored.
    pub fn move_position(&mut self, delta: isize) -> usize {
        let target: isize = self.position as isize + delta;
        if target >= 0 && target as usize <= self.chunk.len() {
            self.position = target as usize;
        }
        self.position
    }

    /// Remembers the current position so that a later stage can backtrack to it.
    pub fn save_position(&mut self) {
        self.mark = self.position;
    }

    pub fn get_saved_position(&self) -> usize {
        self.mark
    }

    pub fn restore_position(&mut self) {
        self.position = self.mark;
    }

    /// Number of bytes from the position to the end of the chunk.
    pub fn get_length(&self) -> usize {
        self.chunk.len() - self.position
    }

    /// Bytes from the position to the end of the chunk.
    pub fn data(&self) -> &[u8] {
        &self.chunk[self.position..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.chunk[self.position..]
    }

    /// The whole chunk, regardless of the position.
    pub fn chunk(&self) -> &[u8] {
        &self.chunk
    }

    /// Returns `count` bytes at the position, or none if the chunk is too short.
    pub fn fix(&self, count: usize) -> Option<&[u8]> {
        self.chunk.get(self.position..self.position.checked_add(count)?)
    }

    /// Reads up to `dst.len()` bytes at `offset` into the chunk. Returns the number of bytes copied.
    pub fn read(&self, dst: &mut [u8], offset: usize) -> usize {
        if offset >= self.chunk.len() {
            return 0;
        }
        let count: usize = dst.len().min(self.chunk.len() - offset);
        dst[..count].copy_from_slice(&self.chunk[offset..offset + count]);
        count
    }

    /// Writes up to `src.len()` bytes at `offset` into the chunk. Returns the number of bytes copied.
    pub fn write(&mut self, src: &[u8], offset: usize) -> usize {
        if offset >= self.chunk.len() {
            return 0;
        }
        let count: usize = src.len().min(self.chunk.len() - offset);
        self.chunk[offset..offset + count].copy_from_slice(&src[..count]);
        count
    }

    /// Claims `count` bytes of headroom in front of the position and returns them for the caller to fill in.
    pub fn prepend(&mut self, count: usize) -> Result<&mut [u8], Fail> {
        if self.position < count {
            return Err(Fail::new(ENOBUFS, "not enough headroom in messenger"));
        }
        self.position -= count;
        Ok(&mut self.chunk[self.position..self.position + count])
    }

    /// Drops every byte past `length` bytes from the position (e.g. link-layer padding).
    pub fn truncate(&mut self, length: usize) -> Result<(), Fail> {
        if self.get_length() < length {
            return Err(Fail::new(EINVAL, "cannot truncate past the end of the messenger"));
        }
        self.chunk.truncate(self.position + length);
        Ok(())
    }

    /// Sums `count` bytes at the position as big-endian 16-bit words, padding an odd byte with zero.
    pub fn sum_up(&self, count: usize) -> u32 {
        let end: usize = (self.position + count).min(self.chunk.len());
        sum_words(&self.chunk[self.position..end], 0)
    }

    pub fn get_type(&self) -> u32 {
        self.kind
    }

    pub fn set_type(&mut self, kind: u32) {
        self.kind = kind;
    }

    pub fn get_scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn set_scope_id(&mut self, scope_id: u32) {
        self.scope_id = scope_id;
    }

    pub fn get_local(&self) -> Option<Ipv4Addr> {
        self.local
    }

    pub fn set_local(&mut self, addr: Option<Ipv4Addr>) {
        self.local = addr;
    }

    pub fn get_remote(&self) -> Option<Ipv4Addr> {
        self.remote
    }

    pub fn set_remote(&mut self, addr: Option<Ipv4Addr>) {
        self.remote = addr;
    }

    pub fn get_local_port(&self) -> u16 {
        self.local_port
    }

    pub fn set_local_port(&mut self, port: u16) {
        self.local_port = port;
    }

    pub fn get_remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn set_remote_port(&mut self, port: u16) {
        self.remote_port = port;
    }

    pub fn get_errno(&self) -> i32 {
        self.errno
    }

    pub fn set_errno(&mut self, errno: i32) {
        self.errno = errno;
    }

    pub fn get_flag(&self) -> u32 {
        self.flag
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flag = flag;
    }

    /// Consumes the messenger and returns the bytes from the position onwards.
    pub fn into_payload(mut self) -> Vec<u8> {
        self.chunk.split_off(self.position)
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Adds `bytes` as big-endian 16-bit words to `sum`. An odd trailing byte is padded with zero.
pub fn sum_words(bytes: &[u8], mut sum: u32) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let Some(&b) = chunks.remainder().first() {
        sum += u16::from_be_bytes([b, 0]) as u32;
    }
    sum
}

/// Folds a 32-bit sum into the 16-bit ones' complement checksum.
pub fn fold_checksum(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        fold_checksum,
        Messenger,
    };
    use ::anyhow::Result;

    #[test]
    fn prepend_uses_headroom() -> Result<()> {
        let mut m: Messenger = Messenger::new_output(b"payload", 8);
        crate::ensure_eq!(m.get_length(), 7);
        m.prepend(4).map_err(|e| anyhow::anyhow!("{:?}", e))?.copy_from_slice(b"HDR:");
        crate::ensure_eq!(m.data(), b"HDR:payload");
        crate::ensure_eq!(m.prepend(5).is_err(), true);
        Ok(())
    }

    #[test]
    fn position_moves_stay_in_bounds() -> Result<()> {
        let mut m: Messenger = Messenger::new_input(vec![0; 10], 2);
        crate::ensure_eq!(m.move_position(4), 4);
        m.save_position();
        crate::ensure_eq!(m.move_position(-5), 4);
        crate::ensure_eq!(m.move_position(7), 4);
        crate::ensure_eq!(m.move_position(6), 10);
        m.restore_position();
        crate::ensure_eq!(m.get_position(), 4);
        crate::ensure_eq!(m.fix(6).is_some(), true);
        crate::ensure_eq!(m.fix(7).is_none(), true);
        Ok(())
    }

    #[test]
    fn checksum_of_checksummed_bytes_is_zero() -> Result<()> {
        let mut bytes: Vec<u8> = vec![0x45, 0, 0, 0x1c, 0x12, 0x34, 0, 0, 64, 17, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2];
        let m: Messenger = Messenger::new_input(bytes.clone(), 0);
        let checksum: u16 = fold_checksum(m.sum_up(20));
        bytes[10..12].copy_from_slice(&checksum.to_be_bytes());
        let m: Messenger = Messenger::new_input(bytes, 0);
        crate::ensure_eq!(fold_checksum(m.sum_up(20)), 0);
        Ok(())
    }
}
