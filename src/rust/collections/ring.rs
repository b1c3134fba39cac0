// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::arrayvec::ArrayVec;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A run of bytes stored beyond the tail of a [Ring] that is not yet part of the readable data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingBlock {
    // Absolute index of the first byte in the backing array.
    start: usize,
    // Length of the run in bytes.
    count: usize,
}

/// A fixed-capacity circular byte buffer.
///
/// ```text
///  0        head         tail      size
///  |        |            |         |
///  +--------XXXXXXXXXXXXX----------+
///           |<-- used -->|
/// ```
///
/// Besides the usual FIFO operations the ring accepts writes at an offset past its tail. Such writes are tracked as
/// [RingBlock]s and merged into the readable data once the gap in front of them is filled.
pub struct Ring {
    buf: Box<[u8]>,
    // Index of the first readable byte.
    head: usize,
    // Number of readable bytes.
    used: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RingBlock {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Ring {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "ring cannot be empty");
        Self {
            buf: vec![0; size].into_boxed_slice(),
            head: 0,
            used: 0,
        }
    }

    /// Gets the number of filled bytes in this ring buffer.
    pub fn get_used(&self) -> usize {
        self.used
    }

    /// Gets the number of non-filled bytes in this ring buffer.
    pub fn get_unused(&self) -> usize {
        self.buf.len() - self.used
    }

    /// Gets the size of this ring buffer.
    pub fn get_size(&self) -> usize {
        self.buf.len()
    }

    /// Copies up to `dst.len()` bytes starting `offset` bytes past the head, without consuming them.
    pub fn peek(&self, dst: &mut [u8], offset: usize) -> usize {
        if self.used <= offset {
            return 0;
        }
        let count: usize = dst.len().min(self.used - offset);
        let (first, second) = self.slices(offset, count);
        dst[..first.len()].copy_from_slice(first);
        dst[first.len()..count].copy_from_slice(second);
        count
    }

    /// Copies up to `dst.len()` bytes out of the ring and consumes them.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let count: usize = self.peek(dst, 0);
        self.discard(count)
    }

    /// Drops up to `count` bytes from the head of the ring.
    pub fn discard(&mut self, count: usize) -> usize {
        let count: usize = count.min(self.used);
        self.head = (self.head + count) % self.buf.len();
        self.used -= count;
        count
    }

    /// Appends as much of `src` as fits. Returns the number of bytes written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let count: usize = src.len().min(self.get_unused());
        let tail: usize = self.tail();
        self.copy_in(tail, &src[..count]);
        self.used += count;
        count
    }

    /// Writes `src` at `offset` bytes past the tail.
    ///
    /// A write at offset zero extends the readable data, swallowing every block it reaches, and returns the number of
    /// bytes that became readable. A write past the tail is recorded in `blocks` (merged with any block it touches,
    /// evicting the oldest block when the list is full) and returns zero.
    pub fn write_at<const N: usize>(
        &mut self,
        src: &[u8],
        offset: usize,
        blocks: &mut ArrayVec<RingBlock, N>,
    ) -> usize {
        if self.get_unused() <= offset {
            return 0;
        }
        let count: usize = src.len().min(self.get_unused() - offset);
        if count == 0 {
            return 0;
        }
        let tail: usize = self.tail();
        let adv: usize = (tail + offset) % self.buf.len();
        self.copy_in(adv, &src[..count]);
        self.merge(adv, count, blocks, tail)
    }

    /// Offset of a block relative to the current tail.
    pub fn offset_of(&self, block: &RingBlock) -> usize {
        self.distance(self.tail(), block.start)
    }

    /// Describes `count` bytes starting `offset` bytes past the head as at most two contiguous slices.
    pub fn slices(&self, offset: usize, count: usize) -> (&[u8], &[u8]) {
        debug_assert!(offset + count <= self.used);
        let size: usize = self.buf.len();
        let start: usize = (self.head + offset) % size;
        if start + count <= size {
            (&self.buf[start..start + count], &[])
        } else {
            let snip: usize = size - start;
            (&self.buf[start..], &self.buf[..count - snip])
        }
    }

    /// Replaces the backing array, keeping the readable data if it fits. Pending blocks are invalidated.
    pub fn resize(&mut self, size: usize) -> bool {
        if size == 0 || size < self.used {
            return false;
        }
        let mut buf: Box<[u8]> = vec![0; size].into_boxed_slice();
        let used: usize = self.peek(&mut buf[..self.used], 0);
        self.buf = buf;
        self.head = 0;
        self.used = used;
        true
    }

    fn tail(&self) -> usize {
        (self.head + self.used) % self.buf.len()
    }

    fn distance(&self, from: usize, to: usize) -> usize {
        if from <= to {
            to - from
        } else {
            to + self.buf.len() - from
        }
    }

    fn copy_in(&mut self, at: usize, src: &[u8]) {
        let size: usize = self.buf.len();
        let free: usize = size - at;
        if src.len() <= free {
            self.buf[at..at + src.len()].copy_from_slice(src);
        } else {
            self.buf[at..].copy_from_slice(&src[..free]);
            self.buf[..src.len() - free].copy_from_slice(&src[free..]);
        }
    }

    fn merge<const N: usize>(
        &mut self,
        mut adv: usize,
        mut count: usize,
        blocks: &mut ArrayVec<RingBlock, N>,
        tail: usize,
    ) -> usize {
        let mut left: usize = self.distance(tail, adv);
        let mut right: usize = left + count;

        if adv == tail {
            let mut i: usize = 0;
            while i < blocks.len() {
                let at: usize = self.distance(tail, blocks[i].start);
                if at <= right {
                    right = right.max(at + blocks[i].count);
                    count = right - left;
                    blocks.remove(i);
                    continue;
                }
                i += 1;
            }
            self.used += count;
            return count;
        }

        let mut i: usize = 0;
        while i < blocks.len() {
            let at: usize = self.distance(tail, blocks[i].start);
            if left <= at + blocks[i].count && at <= right {
                right = right.max(at + blocks[i].count);
                if at < left {
                    left = at;
                    adv = blocks[i].start;
                }
                count = right - left;
                blocks.remove(i);
                continue;
            }
            i += 1;
        }
        if blocks.is_full() {
            blocks.remove(0);
        }
        blocks.push(RingBlock { start: adv, count });
        0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Ring,
        RingBlock,
    };
    use ::anyhow::Result;
    use ::arrayvec::ArrayVec;
    use ::rand::{
        rngs::SmallRng,
        Rng,
        SeedableRng,
    };
    use ::std::collections::VecDeque;

    #[test]
    fn wraps_around() -> Result<()> {
        let mut ring: Ring = Ring::new(8);
        crate::ensure_eq!(ring.write(b"abcdef"), 6);
        let mut out: [u8; 4] = [0; 4];
        crate::ensure_eq!(ring.read(&mut out), 4);
        crate::ensure_eq!(&out, b"abcd");
        crate::ensure_eq!(ring.write(b"ghijklmn"), 6);
        crate::ensure_eq!(ring.get_unused(), 0);

        let mut out: [u8; 8] = [0; 8];
        crate::ensure_eq!(ring.peek(&mut out[..3], 5), 3);
        crate::ensure_eq!(&out[..3], b"jkl");
        crate::ensure_eq!(ring.read(&mut out), 8);
        crate::ensure_eq!(&out, b"efghijkl");
        crate::ensure_eq!(ring.get_used(), 0);
        Ok(())
    }

    #[test]
    fn interleaved_operations_preserve_order() -> Result<()> {
        let mut rng: SmallRng = SmallRng::seed_from_u64(42);
        let mut ring: Ring = Ring::new(61);
        let mut model: VecDeque<u8> = VecDeque::new();
        let mut next: u8 = 0;

        for _ in 0..10_000 {
            match rng.gen_range(0..3) {
                0 => {
                    let len: usize = rng.gen_range(0..40);
                    let data: Vec<u8> = (0..len).map(|i| next.wrapping_add(i as u8)).collect();
                    let written: usize = ring.write(&data);
                    crate::ensure_eq!(written, len.min(61 - model.len()));
                    model.extend(&data[..written]);
                    next = next.wrapping_add(written as u8);
                },
                1 => {
                    let mut out: Vec<u8> = vec![0; rng.gen_range(0..40)];
                    let used: usize = ring.get_used();
                    let n: usize = ring.peek(&mut out, 0);
                    crate::ensure_eq!(ring.get_used(), used);
                    crate::ensure_eq!(out[..n].iter().copied().eq(model.iter().copied().take(n)), true);
                },
                _ => {
                    let mut out: Vec<u8> = vec![0; rng.gen_range(0..40)];
                    let n: usize = ring.read(&mut out);
                    let expected: Vec<u8> = model.drain(..n).collect();
                    crate::ensure_eq!(&out[..n], &expected[..]);
                },
            }
            crate::ensure_eq!(ring.get_used() + ring.get_unused(), ring.get_size());
            crate::ensure_eq!(ring.get_used(), model.len());
        }
        Ok(())
    }

    #[test]
    fn out_of_order_blocks_merge_when_gap_fills() -> Result<()> {
        let mut ring: Ring = Ring::new(32);
        let mut blocks: ArrayVec<RingBlock, 4> = ArrayVec::new();

        crate::ensure_eq!(ring.write_at(b"ghi", 6, &mut blocks), 0);
        crate::ensure_eq!(ring.write_at(b"mno", 12, &mut blocks), 0);
        crate::ensure_eq!(blocks.len(), 2);
        crate::ensure_eq!(ring.offset_of(&blocks[0]), 6);
        crate::ensure_eq!(ring.offset_of(&blocks[1]), 12);

        // Bridges the first block with a write that touches its left edge.
        crate::ensure_eq!(ring.write_at(b"def", 3, &mut blocks), 0);
        crate::ensure_eq!(blocks.len(), 2);
        crate::ensure_eq!(ring.offset_of(&blocks[1]), 3);
        crate::ensure_eq!(blocks[1].len(), 6);

        // Filling the head swallows the contiguous block but not the one beyond the gap.
        crate::ensure_eq!(ring.write_at(b"abc", 0, &mut blocks), 9);
        crate::ensure_eq!(ring.get_used(), 9);
        crate::ensure_eq!(blocks.len(), 1);
        crate::ensure_eq!(ring.offset_of(&blocks[0]), 3);

        let mut out: [u8; 9] = [0; 9];
        crate::ensure_eq!(ring.read(&mut out), 9);
        crate::ensure_eq!(&out, b"abcdefghi");
        Ok(())
    }

    #[test]
    fn oldest_block_is_evicted() -> Result<()> {
        let mut ring: Ring = Ring::new(64);
        let mut blocks: ArrayVec<RingBlock, 2> = ArrayVec::new();
        ring.write_at(b"x", 10, &mut blocks);
        ring.write_at(b"y", 20, &mut blocks);
        ring.write_at(b"z", 30, &mut blocks);
        crate::ensure_eq!(blocks.len(), 2);
        crate::ensure_eq!(ring.offset_of(&blocks[0]), 20);
        crate::ensure_eq!(ring.offset_of(&blocks[1]), 30);
        Ok(())
    }

    #[test]
    fn write_beyond_capacity_is_truncated() -> Result<()> {
        let mut ring: Ring = Ring::new(10);
        let mut blocks: ArrayVec<RingBlock, 4> = ArrayVec::new();
        crate::ensure_eq!(ring.write(b"0123"), 4);
        crate::ensure_eq!(ring.write_at(b"abcdefgh", 2, &mut blocks), 0);
        crate::ensure_eq!(blocks[0].len(), 4);
        crate::ensure_eq!(ring.write_at(b"abc", 6, &mut blocks), 0);
        crate::ensure_eq!(ring.resize(3), false);
        crate::ensure_eq!(ring.resize(20), true);
        crate::ensure_eq!(ring.get_used(), 4);
        Ok(())
    }
}
