// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Sender side SACK scoreboard (RFC 2018, RFC 3517): the holes between blocks the peer reported, each with its own
//! duplicate ACK count and retransmission pointer.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::inetstack::protocols::tcp::{
    constants::RXMIT_THRESH,
    header::{
        SackBlock,
        MAX_SACK_BLOCKS,
    },
    SeqNumber,
};
use ::arrayvec::ArrayVec;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SackHole {
    /// First sequence number of the hole.
    pub start: SeqNumber,
    /// One past the last sequence number of the hole.
    pub end: SeqNumber,
    /// Duplicate ACKs counted against this hole.
    pub dup_acks: i32,
    /// Next sequence number in the hole to retransmit.
    pub rxmit: SeqNumber,
}

/// Holes ordered by sequence number.
#[derive(Debug)]
pub struct Scoreboard {
    holes: ArrayVec<SackHole, MAX_SACK_BLOCKS>,
    /// Right edge of the highest SACK block seen.
    last_sack: SeqNumber,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scoreboard {
    pub fn new(start: SeqNumber) -> Self {
        Self {
            holes: ArrayVec::new(),
            last_sack: start,
        }
    }

    pub fn reset(&mut self, start: SeqNumber) {
        self.holes.clear();
        self.last_sack = start;
    }

    /// Forgets every hole, e.g. after a retransmission timeout (RFC 2018).
    pub fn clear(&mut self) {
        self.holes.clear();
    }

    pub fn len(&self) -> usize {
        self.holes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SackHole> {
        self.holes.get(index)
    }

    /// Index of the oldest hole that is due for retransmission.
    pub fn get_sack_hole(&self, fast_rxmit: bool, send_una: SeqNumber) -> Option<usize> {
        self.holes.iter().position(|hole| {
            hole.rxmit < hole.end && (fast_rxmit || RXMIT_THRESH <= hole.dup_acks) && !(hole.rxmit < send_una)
        })
    }

    /// Moves the retransmission pointer of a hole past `len` retransmitted bytes.
    pub fn advance(&mut self, index: usize, len: u32) {
        if let Some(hole) = self.holes.get_mut(index) {
            hole.rxmit = hole.rxmit + len;
        }
    }

    /// Drops the holes a cumulative ACK covers and trims the one it reaches into.
    pub fn delete_sack_holes(&mut self, ack: SeqNumber, send_una: SeqNumber) {
        let last_ack: SeqNumber = send_una.max(ack);
        let covered: usize = self
            .holes
            .iter()
            .position(|hole| last_ack < hole.end)
            .unwrap_or(self.holes.len());
        self.holes.drain(..covered);
        if let Some(hole) = self.holes.first_mut() {
            if hole.start < last_ack {
                hole.start = last_ack;
                if hole.rxmit < hole.start {
                    hole.rxmit = hole.start;
                }
            }
        }
    }

    /// Folds the blocks of a received SACK option into the scoreboard. `send_fack` is pulled up to the highest block.
    /// Returns the number of bytes retransmitted into the remaining holes.
    pub fn update(
        &mut self,
        ack: SeqNumber,
        blocks: &[SackBlock],
        send_una: SeqNumber,
        send_max: SeqNumber,
        mss: i32,
        send_fack: &mut SeqNumber,
    ) -> i32 {
        let mss: i32 = mss.max(1);
        for block in blocks {
            let (start, end): (SeqNumber, SeqNumber) = (block.begin, block.end);
            if end <= start || send_max < end {
                // Bad SACK fields.
                continue;
            }
            if end <= send_una {
                // Old block.
                continue;
            }
            if start <= ack {
                // D-SACK (RFC 2883).
                continue;
            }
            if *send_fack < end {
                *send_fack = end;
            }

            if self.holes.is_empty() {
                self.holes.push(SackHole {
                    start: ack,
                    end: start,
                    dup_acks: ((end - start) / mss).clamp(1, RXMIT_THRESH),
                    rxmit: ack,
                });
                self.last_sack = end;
                continue;
            }

            let mut i: usize = 0;
            while i < self.holes.len() {
                let hole: SackHole = self.holes[i];
                if end <= hole.start {
                    // Block lies left of this hole and of every hole after it.
                    break;
                }
                if hole.end <= start {
                    // Block lies right of this hole.
                    let hole: &mut SackHole = &mut self.holes[i];
                    hole.dup_acks += 1;
                    if RXMIT_THRESH <= (end - hole.end) / mss {
                        hole.dup_acks = RXMIT_THRESH;
                    }
                    i += 1;
                } else if start <= hole.start {
                    // Block covers the left edge.
                    if hole.end <= end {
                        self.holes.remove(i);
                        continue;
                    }
                    let hole: &mut SackHole = &mut self.holes[i];
                    hole.start = end;
                    hole.rxmit = hole.rxmit.max(hole.start);
                    i += 1;
                } else if hole.end <= end {
                    // Block covers the right edge.
                    let hole: &mut SackHole = &mut self.holes[i];
                    hole.end = start;
                    hole.rxmit = hole.rxmit.min(hole.end);
                    hole.dup_acks += 1;
                    if RXMIT_THRESH <= (end - hole.end) / mss {
                        hole.dup_acks = RXMIT_THRESH;
                    }
                    i += 1;
                } else {
                    // Block splits the hole in two.
                    if !self.holes.is_full() {
                        self.holes.insert(i + 1, hole);
                    } else if i + 1 < self.holes.len() {
                        if let Some(last) = self.holes.pop() {
                            self.last_sack = last.start;
                        }
                        self.holes.insert(i + 1, hole);
                    } else {
                        self.last_sack = end;
                    }
                    let left: &mut SackHole = &mut self.holes[i];
                    left.end = start;
                    left.rxmit = left.rxmit.min(left.end);
                    left.dup_acks += 1;
                    if RXMIT_THRESH <= (end - left.end) / mss {
                        left.dup_acks = RXMIT_THRESH;
                    }
                    if let Some(right) = self.holes.get_mut(i + 1) {
                        right.start = end;
                        right.rxmit = right.rxmit.max(right.start);
                    }
                    i += 2;
                }
            }

            if self.last_sack < start && !self.holes.is_full() {
                // Append a new hole at the end.
                self.holes.push(SackHole {
                    start: self.last_sack,
                    end: start,
                    dup_acks: ((end - start) / mss).clamp(1, RXMIT_THRESH),
                    rxmit: self.last_sack,
                });
                self.last_sack = end;
            }
        }

        self.get_rxmit_data()
    }

    /// Bytes retransmitted into the holes so far.
    pub fn get_rxmit_data(&self) -> i32 {
        self.holes.iter().map(|hole| hole.rxmit - hole.start).sum()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::Scoreboard;
    use crate::inetstack::protocols::tcp::{
        header::SackBlock,
        SeqNumber,
    };
    use ::anyhow::Result;

    const MSS: i32 = 100;

    fn block(begin: u32, end: u32) -> SackBlock {
        SackBlock {
            begin: SeqNumber::from(begin),
            end: SeqNumber::from(end),
        }
    }

    #[test]
    fn first_block_opens_a_hole_at_the_ack() -> Result<()> {
        let una: SeqNumber = SeqNumber::from(1000);
        let max: SeqNumber = SeqNumber::from(2000);
        let mut fack: SeqNumber = una;
        let mut board: Scoreboard = Scoreboard::new(una);

        let rxmit: i32 = board.update(una, &[block(1100, 1400)], una, max, MSS, &mut fack);
        crate::ensure_eq!(rxmit, 0);
        crate::ensure_eq!(fack, SeqNumber::from(1400));
        crate::ensure_eq!(board.len(), 1);
        let hole = board.get(0).map(|h| (u32::from(h.start), u32::from(h.end), h.dup_acks));
        crate::ensure_eq!(hole, Some((1000, 1100, 3)));

        // Eligible for retransmission right away: three segments were SACKed above it.
        crate::ensure_eq!(board.get_sack_hole(false, una), Some(0));
        Ok(())
    }

    #[test]
    fn later_blocks_append_and_split_holes() -> Result<()> {
        let una: SeqNumber = SeqNumber::from(0);
        let max: SeqNumber = SeqNumber::from(5000);
        let mut fack: SeqNumber = una;
        let mut board: Scoreboard = Scoreboard::new(una);

        board.update(una, &[block(100, 200)], una, max, MSS, &mut fack);
        board.update(una, &[block(500, 600)], una, max, MSS, &mut fack);
        crate::ensure_eq!(board.len(), 2);
        crate::ensure_eq!(board.get(1).map(|h| (u32::from(h.start), u32::from(h.end))), Some((200, 500)));

        // A block in the middle of the second hole splits it.
        board.update(una, &[block(300, 400)], una, max, MSS, &mut fack);
        crate::ensure_eq!(board.len(), 3);
        crate::ensure_eq!(board.get(1).map(|h| (u32::from(h.start), u32::from(h.end))), Some((200, 300)));
        crate::ensure_eq!(board.get(2).map(|h| (u32::from(h.start), u32::from(h.end))), Some((400, 500)));

        // Covering a whole hole removes it.
        board.update(una, &[block(200, 300)], una, max, MSS, &mut fack);
        crate::ensure_eq!(board.len(), 2);
        crate::ensure_eq!(fack, SeqNumber::from(600));
        Ok(())
    }

    #[test]
    fn bogus_blocks_are_ignored() -> Result<()> {
        let una: SeqNumber = SeqNumber::from(1000);
        let max: SeqNumber = SeqNumber::from(2000);
        let mut fack: SeqNumber = una;
        let mut board: Scoreboard = Scoreboard::new(una);
        board.update(
            una,
            &[block(1500, 1400), block(900, 1000), block(1000, 1100), block(1900, 2100)],
            una,
            max,
            MSS,
            &mut fack,
        );
        crate::ensure_eq!(board.is_empty(), true);
        crate::ensure_eq!(fack, una);
        Ok(())
    }

    #[test]
    fn cumulative_ack_trims_holes() -> Result<()> {
        let una: SeqNumber = SeqNumber::from(0);
        let max: SeqNumber = SeqNumber::from(5000);
        let mut fack: SeqNumber = una;
        let mut board: Scoreboard = Scoreboard::new(una);
        board.update(una, &[block(100, 200)], una, max, MSS, &mut fack);
        board.update(una, &[block(500, 600)], una, max, MSS, &mut fack);

        board.delete_sack_holes(SeqNumber::from(300), una);
        crate::ensure_eq!(board.len(), 1);
        let hole = board.get(0).map(|h| (u32::from(h.start), u32::from(h.rxmit)));
        crate::ensure_eq!(hole, Some((300, 300)));
        Ok(())
    }
}
