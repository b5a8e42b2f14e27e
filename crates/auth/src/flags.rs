//! Two-word permission bit set.
//!
//! Ordinal `v` lives in word `v / 64`, bit `v % 64`. Ordinals at or above
//! [`PermissionFlags::CAPACITY`] have no storage: setting or clearing them is a
//! no-op and testing them returns `false`. Growing past 128 permissions means
//! adding a third word, which existing serialized values can absorb.
//!
//! `set` / `clear` (and their `_ordinal` forms) mutate in place. Every other
//! operation (`with`, `without`, `union`, `intersect`, `difference`) returns a
//! new value.

use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::PermissionType;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionFlags {
    word0: u64,
    word1: u64,
}

const WORD_BITS: u16 = 64;

/// `(word index, mask)` for an ordinal, or `None` when it has no storage.
fn locate(ordinal: u16) -> Option<(usize, u64)> {
    if ordinal >= PermissionFlags::CAPACITY {
        return None;
    }
    Some(((ordinal / WORD_BITS) as usize, 1u64 << (ordinal % WORD_BITS)))
}

impl PermissionFlags {
    /// Number of addressable bit positions.
    pub const CAPACITY: u16 = 128;

    pub const fn empty() -> Self {
        Self { word0: 0, word1: 0 }
    }

    pub const fn from_words(word0: u64, word1: u64) -> Self {
        Self { word0, word1 }
    }

    pub const fn words(&self) -> (u64, u64) {
        (self.word0, self.word1)
    }

    fn word(&self, index: usize) -> u64 {
        match index {
            0 => self.word0,
            _ => self.word1,
        }
    }

    fn word_mut(&mut self, index: usize) -> &mut u64 {
        match index {
            0 => &mut self.word0,
            _ => &mut self.word1,
        }
    }

    pub fn set(&mut self, permission: PermissionType) {
        self.set_ordinal(permission.ordinal());
    }

    pub fn clear(&mut self, permission: PermissionType) {
        self.clear_ordinal(permission.ordinal());
    }

    pub fn test(&self, permission: PermissionType) -> bool {
        self.test_ordinal(permission.ordinal())
    }

    /// Set a raw bit position. No-op at or above `CAPACITY`.
    pub fn set_ordinal(&mut self, ordinal: u16) {
        if let Some((index, mask)) = locate(ordinal) {
            *self.word_mut(index) |= mask;
        }
    }

    /// Clear a raw bit position. No-op at or above `CAPACITY`.
    pub fn clear_ordinal(&mut self, ordinal: u16) {
        if let Some((index, mask)) = locate(ordinal) {
            *self.word_mut(index) &= !mask;
        }
    }

    /// Test a raw bit position. Always `false` at or above `CAPACITY`.
    pub fn test_ordinal(&self, ordinal: u16) -> bool {
        locate(ordinal).is_some_and(|(index, mask)| self.word(index) & mask != 0)
    }

    #[must_use]
    pub fn with(mut self, permission: PermissionType) -> Self {
        self.set(permission);
        self
    }

    #[must_use]
    pub fn without(mut self, permission: PermissionType) -> Self {
        self.clear(permission);
        self
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            word0: self.word0 | other.word0,
            word1: self.word1 | other.word1,
        }
    }

    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self {
            word0: self.word0 & other.word0,
            word1: self.word1 & other.word1,
        }
    }

    /// Bits in `self` that are not in `other`.
    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self {
            word0: self.word0 & !other.word0,
            word1: self.word1 & !other.word1,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.word0 == 0 && self.word1 == 0
    }

    /// `true` when every bit of `other` is also set in `self`.
    pub const fn contains_all(&self, other: &Self) -> bool {
        self.word0 & other.word0 == other.word0 && self.word1 & other.word1 == other.word1
    }

    pub const fn len(&self) -> u32 {
        self.word0.count_ones() + self.word1.count_ones()
    }

    /// Catalogued permissions that are set, in ordinal order.
    ///
    /// Set positions without a catalogue entry are skipped.
    pub fn iter(&self) -> impl Iterator<Item = PermissionType> + '_ {
        PermissionType::ALL.iter().copied().filter(|p| self.test(*p))
    }
}

impl FromIterator<PermissionType> for PermissionFlags {
    fn from_iter<I: IntoIterator<Item = PermissionType>>(iter: I) -> Self {
        let mut flags = Self::empty();
        for p in iter {
            flags.set(p);
        }
        flags
    }
}

impl<'a> FromIterator<&'a PermissionType> for PermissionFlags {
    fn from_iter<I: IntoIterator<Item = &'a PermissionType>>(iter: I) -> Self {
        iter.into_iter().copied().collect()
    }
}

impl From<PermissionType> for PermissionFlags {
    fn from(permission: PermissionType) -> Self {
        Self::empty().with(permission)
    }
}

impl BitOr for PermissionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for PermissionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl BitAnd for PermissionFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersect(rhs)
    }
}

impl BitAndAssign for PermissionFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        *self = self.intersect(rhs);
    }
}

impl core::fmt::Display for PermissionFlags {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("[")?;
        for (i, p) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(p.as_str())?;
        }
        f.write_str("]")
    }
}
