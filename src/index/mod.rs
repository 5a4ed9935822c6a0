//! Orbital indices, their range tags, and spin-coupling labels.

use std::fmt;
use std::str::FromStr;

use anyhow::{self, format_err};
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "index_tests.rs"]
mod index_tests;

// ==================
// Struct definitions
// ==================

// ----------
// IndexRange
// ----------

/// An enumerated type for the orbital subspace an index runs over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndexRange {
    /// Variant for doubly-occupied (closed) orbitals.
    #[serde(rename = "c")]
    Closed,

    /// Variant for partially-occupied (active) orbitals.
    #[serde(rename = "x")]
    Active,

    /// Variant for unoccupied (virtual) orbitals.
    #[serde(rename = "a")]
    Virtual,

    /// Variant for indices running over all orbitals. A general index is resolved into one of
    /// the other three ranges during contraction.
    #[serde(rename = "g")]
    General,
}

impl IndexRange {
    /// Returns the one-letter tag of the range.
    pub fn tag(&self) -> char {
        match self {
            IndexRange::Closed => 'c',
            IndexRange::Active => 'x',
            IndexRange::Virtual => 'a',
            IndexRange::General => 'g',
        }
    }

    /// Returns the name of the block list the host package provides for this range.
    pub fn block_list(&self) -> &'static str {
        match self {
            IndexRange::Closed => "closed_",
            IndexRange::Active => "active_",
            IndexRange::Virtual => "virt_",
            IndexRange::General => "all_",
        }
    }

    /// Returns `true` if this range is [`IndexRange::General`].
    pub fn is_general(&self) -> bool {
        matches!(self, IndexRange::General)
    }
}

impl FromStr for IndexRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" | "closed" => Ok(IndexRange::Closed),
            "x" | "active" => Ok(IndexRange::Active),
            "a" | "virtual" => Ok(IndexRange::Virtual),
            "g" | "general" => Ok(IndexRange::General),
            _ => Err(format_err!("Unknown index range tag `{s}`.")),
        }
    }
}

impl fmt::Display for IndexRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Returns `true` if indices of ranges `a` and `b` can be contracted with each other, *i.e.* if
/// the ranges are equal or either is general. Creation/annihilation roles are not checked here.
pub fn contractable(a: IndexRange, b: IndexRange) -> bool {
    a == b || a.is_general() || b.is_general()
}

// -----
// Index
// -----

/// A structure for an orbital index. The identity of an index is its number; resolving a general
/// index keeps the number and replaces the range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Index {
    /// The identity number of the index.
    num: usize,

    /// The range the index runs over.
    range: IndexRange,
}

impl Index {
    /// Creates a new index.
    pub fn new(num: usize, range: IndexRange) -> Self {
        Self { num, range }
    }

    /// Returns the identity number of the index.
    pub fn num(&self) -> usize {
        self.num
    }

    /// Returns the range of the index.
    pub fn range(&self) -> IndexRange {
        self.range
    }

    /// Returns a copy of this index running over a different range.
    #[must_use]
    pub fn with_range(&self, range: IndexRange) -> Self {
        Self {
            num: self.num,
            range,
        }
    }

    /// Returns a copy of this index carrying a different identity number.
    #[must_use]
    pub fn with_num(&self, num: usize) -> Self {
        Self {
            num,
            range: self.range,
        }
    }

    /// Returns `true` if `other` is the same index over the same range.
    pub fn identical(&self, other: &Index) -> bool {
        self.num == other.num && self.range == other.range
    }

    /// Returns `true` if this index can be contracted with `other`.
    pub fn contractable(&self, other: &Index) -> bool {
        contractable(self.range, other.range)
    }

    /// Returns the display string of the index, with a trailing `+` if `dagger` is set.
    pub fn str(&self, dagger: bool) -> String {
        if dagger {
            format!("{}{}+", self.range.tag(), self.num)
        } else {
            format!("{}{}", self.range.tag(), self.num)
        }
    }

    /// Returns the name of the block-range variable used for this index in generated code.
    pub fn str_gen(&self) -> String {
        self.str(false)
    }

    /// Returns the name of the element counter used for this index in generated code.
    pub fn str_elem(&self) -> String {
        format!("i{}", self.str(false))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.str(false))
    }
}

/// Hands out indices with fresh identity numbers.
#[derive(Clone, Debug, Default)]
pub struct IndexFactory {
    next: usize,
}

impl IndexFactory {
    /// Returns a new index over `range` whose number has not been handed out before.
    pub fn next_index(&mut self, range: IndexRange) -> Index {
        let index = Index::new(self.next, range);
        self.next += 1;
        index
    }
}

// ----
// Spin
// ----

/// A spin-coupling label shared by the creation and annihilation operators of one spin-summed
/// pair. Contracting two pairs with different labels reassigns one label to the other; closing a
/// loop on a single label yields the spin-summation factor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Spin {
    /// The label number.
    num: usize,

    /// Boolean indicating if the pair carrying this label is restricted to alpha spin.
    alpha: bool,
}

impl Spin {
    /// Creates a new spin label.
    pub fn new(num: usize, alpha: bool) -> Self {
        Self { num, alpha }
    }

    /// Returns the label number.
    pub fn num(&self) -> usize {
        self.num
    }

    /// Returns `true` if the label is alpha-restricted.
    pub fn is_alpha(&self) -> bool {
        self.alpha
    }

    /// Returns `true` if `other` carries the same label number.
    pub fn same_label(&self, other: &Spin) -> bool {
        self.num == other.num
    }

    /// The factor obtained when a loop carrying this label is closed: the number of spin states
    /// summed over.
    pub fn loop_factor(&self) -> f64 {
        if self.alpha {
            1.0
        } else {
            2.0
        }
    }

    /// Returns the label resulting from coupling `self` onto `onto`. The number of `onto` is kept
    /// and the alpha restriction of either side propagates.
    #[must_use]
    pub fn coupled_onto(&self, onto: &Spin) -> Spin {
        Spin {
            num: onto.num,
            alpha: self.alpha || onto.alpha,
        }
    }
}

impl fmt::Display for Spin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.alpha {
            write!(f, "s{}(alpha)", self.num)
        } else {
            write!(f, "s{}", self.num)
        }
    }
}

/// Hands out spin labels with fresh numbers.
#[derive(Clone, Debug, Default)]
pub struct SpinFactory {
    next: usize,
}

impl SpinFactory {
    /// Returns a new spin label.
    pub fn next_spin(&mut self, alpha: bool) -> Spin {
        let spin = Spin::new(self.next, alpha);
        self.next += 1;
        spin
    }
}
