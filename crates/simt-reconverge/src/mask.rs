//! Lane masks
//!
//! A `LaneMask` is a fixed-width set of CTA lanes, one bit per thread. All
//! masks handled by one mechanism share the CTA width; combining masks of
//! different widths is a caller bug and panics in debug builds.

use bitvec::prelude::*;
use std::fmt;

/// Fixed-width set of lanes
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LaneMask {
    bits: BitVec<usize, Lsb0>,
}

impl LaneMask {
    /// Mask of `width` lanes with none set
    pub fn empty(width: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, width),
        }
    }

    /// Mask of `width` lanes with all set
    pub fn full(width: usize) -> Self {
        Self {
            bits: BitVec::repeat(true, width),
        }
    }

    /// Mask containing exactly `lanes`; lanes outside the width are ignored
    pub fn from_lanes(width: usize, lanes: impl IntoIterator<Item = usize>) -> Self {
        let mut mask = Self::empty(width);
        for lane in lanes {
            if lane < width {
                mask.insert(lane);
            }
        }
        mask
    }

    /// Number of lanes the mask can describe
    pub fn width(&self) -> usize {
        self.bits.len()
    }

    /// Number of set lanes
    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.not_any()
    }

    pub fn contains(&self, lane: usize) -> bool {
        lane < self.bits.len() && self.bits[lane]
    }

    pub fn insert(&mut self, lane: usize) {
        self.bits.set(lane, true);
    }

    pub fn remove(&mut self, lane: usize) {
        self.bits.set(lane, false);
    }

    /// Set lanes in ascending order
    pub fn lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    /// Lowest set lane
    pub fn first(&self) -> Option<usize> {
        self.bits.first_one()
    }

    /// In-place union
    pub fn union_with(&mut self, other: &LaneMask) {
        debug_assert_eq!(self.width(), other.width());
        self.bits |= &other.bits;
    }

    /// In-place difference
    pub fn subtract(&mut self, other: &LaneMask) {
        debug_assert_eq!(self.width(), other.width());
        self.bits &= !other.bits.clone();
    }

    pub fn union(&self, other: &LaneMask) -> LaneMask {
        let mut out = self.clone();
        out.union_with(other);
        out
    }

    pub fn difference(&self, other: &LaneMask) -> LaneMask {
        let mut out = self.clone();
        out.subtract(other);
        out
    }

    pub fn intersection(&self, other: &LaneMask) -> LaneMask {
        debug_assert_eq!(self.width(), other.width());
        let mut out = self.clone();
        out.bits &= &other.bits;
        out
    }

    pub fn is_disjoint(&self, other: &LaneMask) -> bool {
        self.intersection(other).is_empty()
    }

    pub fn is_subset(&self, other: &LaneMask) -> bool {
        self.difference(other).is_empty()
    }
}

impl fmt::Display for LaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, lane) in self.lanes().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{lane}")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for LaneMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LaneMask({}/{} {})", self.count(), self.width(), self)
    }
}
