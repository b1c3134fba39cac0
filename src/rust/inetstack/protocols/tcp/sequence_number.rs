// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// RFC 793, Section 3.3 defines TCP sequence numbers. The space ranges from 0 to 2^32 - 1 and wraps around, so every
// comparison is taken modulo 2^32: `a < b` holds iff `b - a`, read as a signed 32-bit value, is positive. Such an
// order is not transitive (a < b < c < a is possible), which is why sequence numbers are their own type rather than a
// bare u32.

use ::std::{
    cmp::Ordering,
    convert::From,
    fmt,
    ops::{
        Add,
        AddAssign,
        Sub,
        SubAssign,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct SeqNumber {
    value: u32,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SeqNumber {
    /// The later of two sequence numbers in modular order.
    pub fn max(self, other: SeqNumber) -> SeqNumber {
        if self < other {
            other
        } else {
            self
        }
    }

    /// The earlier of two sequence numbers in modular order.
    pub fn min(self, other: SeqNumber) -> SeqNumber {
        if other < self {
            other
        } else {
            self
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.value
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber { value: item }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// Advances a sequence number by a byte count.
impl Add<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: u32) -> SeqNumber {
        self.value.wrapping_add(other).into()
    }
}

impl AddAssign<u32> for SeqNumber {
    #[inline]
    fn add_assign(&mut self, other: u32) {
        self.value = self.value.wrapping_add(other);
    }
}

impl Sub<u32> for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: u32) -> SeqNumber {
        self.value.wrapping_sub(other).into()
    }
}

impl SubAssign<u32> for SeqNumber {
    #[inline]
    fn sub_assign(&mut self, other: u32) {
        self.value = self.value.wrapping_sub(other);
    }
}

/// Signed distance from `other` to `self`.
impl Sub for SeqNumber {
    type Output = i32;

    #[inline]
    fn sub(self, other: SeqNumber) -> i32 {
        self.value.wrapping_sub(other.value) as i32
    }
}

// Any two sequence numbers compare through their signed distance. Two numbers exactly 2^31 apart are unordered, and
// there is no Ord implementation since a set of them cannot be sorted uniquely.
impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.lt(other) {
            Some(Ordering::Less)
        } else if self.gt(other) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    #[inline]
    fn lt(&self, other: &Self) -> bool {
        (*other - *self) > 0
    }

    #[inline]
    fn le(&self, other: &Self) -> bool {
        (*other - *self) >= 0
    }

    #[inline]
    fn gt(&self, other: &Self) -> bool {
        (*self - *other) > 0
    }

    #[inline]
    fn ge(&self, other: &Self) -> bool {
        (*self - *other) >= 0
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::SeqNumber;
    use ::anyhow::Result;

    #[test]
    fn comparison() -> Result<()> {
        let s0: SeqNumber = SeqNumber::from(0);
        let s1: SeqNumber = SeqNumber::from(1);
        let s2: SeqNumber = SeqNumber::from(0x20000000);
        let s4: SeqNumber = SeqNumber::from(0x7fffffff);
        let s5: SeqNumber = SeqNumber::from(0x80000000);
        let s6: SeqNumber = SeqNumber::from(0x80000001);
        let s7: SeqNumber = SeqNumber::from(0xffffffff);

        crate::ensure_eq!(s0, s0);
        crate::ensure_neq!(s0, s7);
        crate::ensure_eq!(s0 < s0, false);
        crate::ensure_eq!(s0 <= s0, true);

        crate::ensure_eq!(s0 < s1, true);
        crate::ensure_eq!(s0 < s2, true);
        crate::ensure_eq!(s0 < s4, true);
        // Exactly half the space away is unordered.
        crate::ensure_eq!(s0 < s5, false);
        crate::ensure_eq!(s0 > s5, false);
        crate::ensure_eq!(s0 > s6, true);
        crate::ensure_eq!(s0 > s7, true);
        Ok(())
    }

    /// `a < b` iff `b - a` read as a signed 32-bit integer is positive, across the 0 and 2^31 boundaries.
    #[test]
    fn order_agrees_with_signed_distance() -> Result<()> {
        let samples: [u32; 9] = [
            0,
            1,
            0x7fff_fffe,
            0x7fff_ffff,
            0x8000_0000,
            0x8000_0001,
            0xffff_fffe,
            0xffff_ffff,
            0x1234_5678,
        ];
        for &a in samples.iter() {
            for &b in samples.iter() {
                let (x, y) = (SeqNumber::from(a), SeqNumber::from(b));
                crate::ensure_eq!(x < y, (b.wrapping_sub(a) as i32) > 0);
                crate::ensure_eq!(y - x, b.wrapping_sub(a) as i32);
            }
        }
        Ok(())
    }

    #[test]
    fn wrap_around() -> Result<()> {
        let big: SeqNumber = SeqNumber::from(0xffffffff);
        crate::ensure_eq!(big + 1, SeqNumber::from(0));
        crate::ensure_eq!(SeqNumber::from(0) - 1, big);
        crate::ensure_eq!(big < big + 1, true);
        crate::ensure_eq!((big + 10).max(big), big + 10);
        crate::ensure_eq!((big + 10).min(big), big);

        let half: u32 = 0x7fffffff;
        for number in (0..u32::MAX).step_by(0x0100_0001) {
            let current: SeqNumber = SeqNumber::from(number);
            crate::ensure_eq!(current < current + 1, true);
            crate::ensure_eq!(current < current + half, true);
            crate::ensure_eq!(current > current + 2 + half, true);
        }
        Ok(())
    }
}
