// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Fragment reassembly after RFC 815: the datagram is tracked as a list of holes that shrinks as fragments arrive.

//======================================================================================================================
// Imports
//======================================================================================================================

use super::{
    Ipv4Header,
    IPV4_DATAGRAM_MAX_SIZE,
};
use crate::runtime::timer::TimerId;
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Right edge of the initial hole.
const INFINITY: usize = usize::MAX;

/// Bytes of the original payload quoted back in an ICMP error.
const QUOTED_PAYLOAD: usize = 8;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies the datagram a fragment belongs to (RFC 791).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReassemblyKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
}

#[derive(Clone, Copy, Debug)]
struct Hole {
    first: usize,
    last: usize,
}

/// A datagram under reconstruction.
pub struct Reassembly {
    scope_id: u32,
    holes: Vec<Hole>,
    payload: Vec<u8>,
    // Payload length declared by the final fragment, once seen.
    end: Option<usize>,
    // Header of the fragment at offset zero, once seen.
    header: Option<Ipv4Header>,
    // That fragment's header and the leading payload bytes, quoted in a time exceeded message.
    quote: Option<Vec<u8>>,
    timer: Option<TimerId>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ReassemblyKey {
    pub fn of(header: &Ipv4Header) -> Self {
        Self {
            src: header.get_src_addr(),
            dst: header.get_dest_addr(),
            protocol: header.get_protocol(),
            identification: header.get_identification(),
        }
    }
}

impl Reassembly {
    pub fn new(scope_id: u32) -> Self {
        Self {
            scope_id,
            holes: vec![Hole {
                first: 0,
                last: INFINITY,
            }],
            payload: Vec::new(),
            end: None,
            header: None,
            quote: None,
            timer: None,
        }
    }

    pub fn get_scope_id(&self) -> u32 {
        self.scope_id
    }

    pub fn get_timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn set_timer(&mut self, timer: Option<TimerId>) {
        self.timer = timer;
    }

    /// IP header plus the first payload bytes of the first fragment, if it has arrived.
    pub fn get_quote(&self) -> Option<&[u8]> {
        self.quote.as_deref()
    }

    /// Adds the fragment described by `header` and carrying `payload`. `datagram` is the whole fragment as received.
    /// Returns the reassembled datagram, header included, once every hole is filled. Fragments that would grow the
    /// datagram past the maximum IPv4 size, or past the end set by the final fragment, are ignored.
    pub fn insert(&mut self, header: &Ipv4Header, payload: &[u8], datagram: &[u8]) -> Option<Vec<u8>> {
        if payload.is_empty() {
            return None;
        }
        let first: usize = header.get_fragment_offset();
        let last: usize = first + payload.len() - 1;
        if last + header.compute_size() >= IPV4_DATAGRAM_MAX_SIZE {
            warn!("insert(): fragment exceeds maximum datagram size (offset={:?})", first);
            return None;
        }
        let more: bool = header.get_more_fragments();
        if let Some(end) = self.end {
            if last >= end || (!more && last + 1 != end) {
                warn!("insert(): fragment past the end of the datagram (offset={:?})", first);
                return None;
            }
        }

        let mut holes: Vec<Hole> = Vec::with_capacity(self.holes.len() + 1);
        for hole in self.holes.drain(..) {
            if first > hole.last || last < hole.first {
                holes.push(hole);
                continue;
            }
            if first > hole.first {
                holes.push(Hole {
                    first: hole.first,
                    last: first - 1,
                });
            }
            if last < hole.last && more {
                holes.push(Hole {
                    first: last + 1,
                    last: hole.last,
                });
            }
        }
        // A final fragment bounds the datagram.
        if !more {
            holes.retain(|hole| hole.first <= last);
            for hole in holes.iter_mut() {
                hole.last = hole.last.min(last);
            }
            self.end = Some(last + 1);
            self.payload.truncate(last + 1);
        }
        self.holes = holes;

        if self.payload.len() < last + 1 {
            self.payload.resize(last + 1, 0);
        }
        self.payload[first..=last].copy_from_slice(payload);

        if first == 0 {
            self.header = Some(header.clone());
            let quote_len: usize = (header.compute_size() + QUOTED_PAYLOAD).min(datagram.len());
            self.quote = Some(datagram[..quote_len].to_vec());
        }

        if !self.holes.is_empty() {
            return None;
        }
        let mut header: Ipv4Header = self.header.clone()?;
        let hdr_size: usize = header.compute_size();
        header.set_fragment(0, false);
        header.set_total_length(hdr_size + self.payload.len());
        let mut bytes: Vec<u8> = vec![0; hdr_size + self.payload.len()];
        header.serialize(&mut bytes);
        bytes[hdr_size..].copy_from_slice(&self.payload);
        Some(bytes)
    }
}
