// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod reassembly;

#[cfg(test)]
mod tests;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::reassembly::{
    Reassembly,
    ReassemblyKey,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::conduit::messenger::{
        fold_checksum,
        sum_words,
    },
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use ::libc::{
    EBADMSG,
    EMSGSIZE,
    ENOTSUP,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Minimum size of IPv4 header (in bytes).
pub const IPV4_HEADER_MIN_SIZE: usize = 20;

/// Maximum size of IPv4 header (in bytes).
pub const IPV4_HEADER_MAX_SIZE: usize = 60;

/// Largest IPv4 datagram.
pub const IPV4_DATAGRAM_MAX_SIZE: usize = 65535;

/// Version number for IPv4.
const IPV4_VERSION: u8 = 4;

/// IPv4 Control Flag: Don't Fragment.
pub const IPV4_CTRL_FLAG_DF: u8 = 0x2;

/// IPv4 Control Flag: More Fragments.
pub const IPV4_CTRL_FLAG_MF: u8 = 0x1;

/// Options with this bit set in their kind are copied into every fragment.
const IPOPT_COPIED: u8 = 0x80;

pub const IPOPT_EOOL: u8 = 0;
pub const IPOPT_NOP: u8 = 1;
pub const IPOPT_RR: u8 = 7;
pub const IPOPT_TS: u8 = 68;
pub const IPOPT_SEC: u8 = 130;
pub const IPOPT_LSRR: u8 = 131;
pub const IPOPT_SSRR: u8 = 137;

//======================================================================================================================
// Structures
//======================================================================================================================

/// IPv4 Datagram Header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    /// Type of service (8 bits).
    tos: u8,
    /// Total length of the packet including header and data (16 bits).
    total_length: u16,
    /// Used to identify the datagram to which a fragment belongs (16 bits).
    identification: u16,
    /// Control flags (3 bits).
    flags: u8,
    /// Fragment offset in units of eight bytes (13 bits).
    fragment_offset: u16,
    /// Time to Live (8 bits).
    ttl: u8,
    /// Protocol used in the data portion of the datagram (8 bits).
    protocol: u8,
    /// Source IP address (32 bits).
    src_addr: Ipv4Addr,
    /// Destination IP address (32 bits).
    dst_addr: Ipv4Addr,
    /// Raw option bytes, padded to a multiple of four.
    options: ArrayVec<u8, 40>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

/// Associated Functions for IPv4 Headers
impl Ipv4Header {
    /// Instantiates an IPv4 header without options.
    pub fn new(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, protocol: u8, ttl: u8) -> Self {
        Self {
            tos: 0,
            total_length: IPV4_HEADER_MIN_SIZE as u16,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl,
            protocol,
            src_addr,
            dst_addr,
            options: ArrayVec::new(),
        }
    }

    /// Size of the header including options.
    pub fn compute_size(&self) -> usize {
        IPV4_HEADER_MIN_SIZE + self.options.len()
    }

    /// Parses the header at the front of `buf`. The checksum must verify and the declared total length must fit in
    /// `buf`; any trailing bytes are link-layer padding.
    pub fn parse(buf: &[u8]) -> Result<Self, Fail> {
        if buf.len() < IPV4_HEADER_MIN_SIZE {
            return Err(Fail::new(EBADMSG, "ipv4 datagram too small"));
        }

        let version: u8 = buf[0] >> 4;
        if version != IPV4_VERSION {
            return Err(Fail::new(ENOTSUP, "unsupported IP version"));
        }

        let hdr_size: usize = ((buf[0] & 0xf) as usize) << 2;
        if hdr_size < IPV4_HEADER_MIN_SIZE {
            return Err(Fail::new(EBADMSG, "ipv4 IHL is too small"));
        }
        if buf.len() < hdr_size {
            return Err(Fail::new(EBADMSG, "ipv4 datagram too small to fit in header"));
        }
        let hdr_buf: &[u8] = &buf[..hdr_size];

        if fold_checksum(sum_words(hdr_buf, 0)) != 0 {
            return Err(Fail::new(EBADMSG, "ipv4 checksum mismatch"));
        }

        let total_length: u16 = u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]);
        if (total_length as usize) < hdr_size {
            return Err(Fail::new(EBADMSG, "ipv4 datagram smaller than header"));
        }
        if (total_length as usize) > buf.len() {
            return Err(Fail::new(EBADMSG, "ipv4 datagram size mismatch"));
        }

        let flags: u8 = hdr_buf[6] >> 5;
        let fragment_offset: u16 = u16::from_be_bytes([hdr_buf[6], hdr_buf[7]]) & 0x1fff;

        let mut options: ArrayVec<u8, 40> = ArrayVec::new();
        if hdr_size > IPV4_HEADER_MIN_SIZE {
            validate_options(&hdr_buf[IPV4_HEADER_MIN_SIZE..])?;
            if options.try_extend_from_slice(&hdr_buf[IPV4_HEADER_MIN_SIZE..]).is_err() {
                return Err(Fail::new(EBADMSG, "ipv4 options do not fit in the header"));
            }
        }

        Ok(Self {
            tos: hdr_buf[1],
            total_length,
            identification: u16::from_be_bytes([hdr_buf[4], hdr_buf[5]]),
            flags,
            fragment_offset,
            ttl: hdr_buf[8],
            protocol: hdr_buf[9],
            src_addr: Ipv4Addr::new(hdr_buf[12], hdr_buf[13], hdr_buf[14], hdr_buf[15]),
            dst_addr: Ipv4Addr::new(hdr_buf[16], hdr_buf[17], hdr_buf[18], hdr_buf[19]),
            options,
        })
    }

    /// Serializes the header into the first [Self::compute_size] bytes of `buf`, checksum included.
    pub fn serialize(&self, buf: &mut [u8]) {
        let size: usize = self.compute_size();
        let buf: &mut [u8] = &mut buf[..size];
        buf[0] = (IPV4_VERSION << 4) | (size >> 2) as u8;
        buf[1] = self.tos;
        buf[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.identification.to_be_bytes());
        buf[6..8].copy_from_slice(&((self.flags as u16) << 13 | self.fragment_offset & 0x1fff).to_be_bytes());
        buf[8] = self.ttl;
        buf[9] = self.protocol;
        buf[10] = 0;
        buf[11] = 0;
        buf[12..16].copy_from_slice(&self.src_addr.octets());
        buf[16..20].copy_from_slice(&self.dst_addr.octets());
        buf[IPV4_HEADER_MIN_SIZE..].copy_from_slice(&self.options);
        let checksum: u16 = fold_checksum(sum_words(buf, 0));
        buf[10..12].copy_from_slice(&checksum.to_be_bytes());
    }

    /// Appends an option, padding the option area to a 32-bit boundary with EOOL.
    pub fn push_option(&mut self, option: &[u8]) -> Result<(), Fail> {
        let end: usize = options_end(&self.options);
        if end + option.len() > self.options.capacity() {
            return Err(Fail::new(EMSGSIZE, "ipv4 options do not fit in the header"));
        }
        self.options.truncate(end);
        self.options.extend(option.iter().copied());
        while self.options.len() % 4 != 0 {
            self.options.push(IPOPT_EOOL);
        }
        Ok(())
    }

    /// Iterates over the options as (kind, bytes) pairs. NOP and EOOL are skipped.
    pub fn iter_options(&self) -> impl Iterator<Item = (u8, &[u8])> {
        OptionIter {
            bytes: &self.options[..],
        }
    }

    /// Options that are replicated into fragments other than the first one.
    pub fn copied_options(&self) -> ArrayVec<u8, 40> {
        let mut copied: ArrayVec<u8, 40> = ArrayVec::new();
        for (kind, bytes) in self.iter_options() {
            if kind & IPOPT_COPIED != 0 {
                let fits: bool = copied.try_extend_from_slice(bytes).is_ok();
                debug_assert!(fits, "copied options are a subset of the options");
            }
        }
        while copied.len() % 4 != 0 {
            copied.push(IPOPT_EOOL);
        }
        copied
    }

    pub fn get_src_addr(&self) -> Ipv4Addr {
        self.src_addr
    }

    pub fn set_src_addr(&mut self, addr: Ipv4Addr) {
        self.src_addr = addr;
    }

    pub fn get_dest_addr(&self) -> Ipv4Addr {
        self.dst_addr
    }

    pub fn get_protocol(&self) -> u8 {
        self.protocol
    }

    pub fn get_ttl(&self) -> u8 {
        self.ttl
    }

    pub fn get_total_length(&self) -> usize {
        self.total_length as usize
    }

    pub fn set_total_length(&mut self, len: usize) {
        self.total_length = len as u16;
    }

    pub fn get_identification(&self) -> u16 {
        self.identification
    }

    pub fn set_identification(&mut self, id: u16) {
        self.identification = id;
    }

    pub fn get_dont_fragment(&self) -> bool {
        self.flags & IPV4_CTRL_FLAG_DF != 0
    }

    pub fn set_dont_fragment(&mut self, df: bool) {
        if df {
            self.flags |= IPV4_CTRL_FLAG_DF;
        } else {
            self.flags &= !IPV4_CTRL_FLAG_DF;
        }
    }

    pub fn get_more_fragments(&self) -> bool {
        self.flags & IPV4_CTRL_FLAG_MF != 0
    }

    /// Byte offset of this fragment within the original datagram.
    pub fn get_fragment_offset(&self) -> usize {
        (self.fragment_offset as usize) << 3
    }

    /// True if this datagram is only a piece of a larger one.
    pub fn is_fragment(&self) -> bool {
        self.get_more_fragments() || self.fragment_offset != 0
    }

    fn set_fragment(&mut self, offset: usize, more: bool) {
        self.fragment_offset = (offset >> 3) as u16;
        if more {
            self.flags |= IPV4_CTRL_FLAG_MF;
        } else {
            self.flags &= !IPV4_CTRL_FLAG_MF;
        }
    }
}

struct OptionIter<'a> {
    bytes: &'a [u8],
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kind: u8 = *self.bytes.first()?;
            match kind {
                IPOPT_EOOL => return None,
                IPOPT_NOP => self.bytes = &self.bytes[1..],
                _ => {
                    let len: usize = *self.bytes.get(1)? as usize;
                    if len < 2 || len > self.bytes.len() {
                        return None;
                    }
                    let (option, rest) = self.bytes.split_at(len);
                    self.bytes = rest;
                    return Some((kind, option));
                },
            }
        }
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Checks the type-length-value structure of an option area.
fn validate_options(mut bytes: &[u8]) -> Result<(), Fail> {
    while let Some(&kind) = bytes.first() {
        match kind {
            IPOPT_EOOL => return Ok(()),
            IPOPT_NOP => bytes = &bytes[1..],
            _ => {
                let len: usize = match bytes.get(1) {
                    Some(&len) => len as usize,
                    None => return Err(Fail::new(EBADMSG, "truncated ipv4 option")),
                };
                if len < 2 || len > bytes.len() {
                    return Err(Fail::new(EBADMSG, "bad ipv4 option length"));
                }
                match kind {
                    IPOPT_SEC if len != 11 => return Err(Fail::new(EBADMSG, "bad security option")),
                    IPOPT_RR | IPOPT_LSRR | IPOPT_SSRR if len < 3 || bytes[2] < 4 => {
                        return Err(Fail::new(EBADMSG, "bad route option"))
                    },
                    IPOPT_TS if len < 4 || bytes[2] < 5 => return Err(Fail::new(EBADMSG, "bad timestamp option")),
                    _ => (),
                }
                bytes = &bytes[len..];
            },
        }
    }
    Ok(())
}

/// Length of an option area without its trailing padding.
fn options_end(bytes: &[u8]) -> usize {
    let mut offset: usize = 0;
    while let Some(&kind) = bytes.get(offset) {
        match kind {
            IPOPT_EOOL => break,
            IPOPT_NOP => offset += 1,
            _ => match bytes.get(offset + 1) {
                Some(&len) if len >= 2 && offset + len as usize <= bytes.len() => offset += len as usize,
                _ => break,
            },
        }
    }
    offset
}

/// Ones' complement sum of the TCP/UDP pseudo header.
pub fn pseudo_header_sum(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, length: usize) -> u32 {
    let mut sum: u32 = sum_words(&src.octets(), 0);
    sum = sum_words(&dst.octets(), sum);
    sum += protocol as u32;
    sum + length as u32
}

/// Splits the datagram made of `header` and `payload` into fragments that fit in `mtu` (RFC 791). The first
/// fragment keeps every option; later fragments carry only the options with the copy flag. Each fragment but the
/// last has the more-fragments flag set, and every fragment is checksummed independently.
pub fn fragment(header: &Ipv4Header, payload: &[u8], mtu: usize) -> Result<Vec<Vec<u8>>, Fail> {
    if header.get_dont_fragment() && header.compute_size() + payload.len() > mtu {
        return Err(Fail::new(EMSGSIZE, "datagram exceeds path MTU and may not be fragmented"));
    }
    let mut fragments: Vec<Vec<u8>> = Vec::new();
    let mut offset: usize = 0;
    let mut current: Ipv4Header = header.clone();
    let base: usize = header.get_fragment_offset();
    let last_more: bool = header.get_more_fragments();
    loop {
        let hdr_size: usize = current.compute_size();
        if mtu < hdr_size + 8 {
            return Err(Fail::new(EMSGSIZE, "MTU too small to fragment"));
        }
        let remaining: usize = payload.len() - offset;
        let chunk: usize = if hdr_size + remaining <= mtu {
            remaining
        } else {
            (mtu - hdr_size) & !7
        };
        let more: bool = offset + chunk < payload.len() || last_more;
        current.set_fragment(base + offset, more);
        current.set_total_length(hdr_size + chunk);
        let mut bytes: Vec<u8> = vec![0; hdr_size + chunk];
        current.serialize(&mut bytes);
        bytes[hdr_size..].copy_from_slice(&payload[offset..offset + chunk]);
        fragments.push(bytes);
        offset += chunk;
        if offset >= payload.len() {
            break;
        }
        if offset == chunk {
            current.options = header.copied_options();
        }
    }
    Ok(fragments)
}
