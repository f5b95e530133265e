// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Assembly-time addresses.
//!
//! An [`Address`] is either relative to a control/dummy section or bound to
//! an absolute storage location. Relative addresses are created during
//! allocation and converted to absolute exactly once, when the owning
//! region is bound. Dummy-section addresses are never converted.

use crate::core::image::SectionId;

/// The two addressing domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrKind {
    /// Offset from the start of a not-yet-positioned section.
    Relative { section: SectionId, offset: u32 },
    /// Bound location in target storage.
    Absolute { value: u64 },
}

/// An assembly-time address with an optional length attribute.
///
/// The length attribute is the implied operand length carried by the
/// address (a symbol's `L'` value); consumers that size storage-to-storage
/// operands read it, everything else ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    kind: AddrKind,
    length: Option<u32>,
}

/// Error from address arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// One operand was absolute and the other section-relative.
    MixedDomain,
    /// Both operands were relative but to different sections.
    CrossSection,
    /// The result left the representable range for its domain.
    Range,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::MixedDomain => {
                write!(f, "absolute and relocatable values cannot be combined")
            }
            AddressError::CrossSection => {
                write!(f, "relocatable values belong to different sections")
            }
            AddressError::Range => write!(f, "address arithmetic out of range"),
        }
    }
}

impl std::error::Error for AddressError {}

impl Address {
    /// Create a section-relative address.
    pub fn relative(section: SectionId, offset: u32) -> Self {
        Self {
            kind: AddrKind::Relative { section, offset },
            length: None,
        }
    }

    /// Create an absolute address.
    pub fn absolute(value: u64) -> Self {
        Self {
            kind: AddrKind::Absolute { value },
            length: None,
        }
    }

    /// Attach a length attribute.
    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn kind(&self) -> AddrKind {
        self.kind
    }

    /// Length attribute, defaulting to 1 when none was attached.
    pub fn length(&self) -> u32 {
        self.length.unwrap_or(1)
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self.kind, AddrKind::Absolute { .. })
    }

    pub fn is_relative(&self) -> bool {
        matches!(self.kind, AddrKind::Relative { .. })
    }

    /// Owning section for a relative address.
    pub fn section(&self) -> Option<SectionId> {
        match self.kind {
            AddrKind::Relative { section, .. } => Some(section),
            AddrKind::Absolute { .. } => None,
        }
    }

    /// Section offset for a relative address.
    pub fn offset(&self) -> Option<u32> {
        match self.kind {
            AddrKind::Relative { offset, .. } => Some(offset),
            AddrKind::Absolute { .. } => None,
        }
    }

    /// Storage location for an absolute address.
    pub fn value(&self) -> Option<u64> {
        match self.kind {
            AddrKind::Absolute { value } => Some(value),
            AddrKind::Relative { .. } => None,
        }
    }

    /// Convert relative to absolute by adding the owning container's bound
    /// anchor. One-way: an address is bound at most once.
    ///
    /// Panics if the address is already absolute; that is a phase-ordering
    /// bug, not a user error.
    pub fn make_absolute(&mut self, anchor: u64) {
        match self.kind {
            AddrKind::Relative { offset, .. } => {
                self.kind = AddrKind::Absolute {
                    value: anchor + offset as u64,
                };
            }
            AddrKind::Absolute { .. } => {
                panic!("internal error: address bound twice");
            }
        }
    }

    /// Move the address by a signed byte count, staying in its domain.
    pub fn offset_by(self, n: i64) -> Result<Address, AddressError> {
        let kind = match self.kind {
            AddrKind::Relative { section, offset } => {
                let moved = offset as i64 + n;
                if !(0..=u32::MAX as i64).contains(&moved) {
                    return Err(AddressError::Range);
                }
                AddrKind::Relative {
                    section,
                    offset: moved as u32,
                }
            }
            AddrKind::Absolute { value } => {
                let moved = value as i64 + n;
                if moved < 0 {
                    return Err(AddressError::Range);
                }
                AddrKind::Absolute {
                    value: moved as u64,
                }
            }
        };
        Ok(Address {
            kind,
            length: self.length,
        })
    }

    /// Byte distance `self - other`. Defined for two absolute addresses or
    /// two relative addresses in the same section.
    pub fn diff(&self, other: &Address) -> Result<i64, AddressError> {
        match (self.kind, other.kind) {
            (AddrKind::Absolute { value: a }, AddrKind::Absolute { value: b }) => {
                Ok(a as i64 - b as i64)
            }
            (
                AddrKind::Relative {
                    section: sa,
                    offset: a,
                },
                AddrKind::Relative {
                    section: sb,
                    offset: b,
                },
            ) => {
                if sa != sb {
                    return Err(AddressError::CrossSection);
                }
                Ok(a as i64 - b as i64)
            }
            _ => Err(AddressError::MixedDomain),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            AddrKind::Relative { section, offset } => {
                write!(f, "S{}+{:06X}", section.index(), offset)
            }
            AddrKind::Absolute { value } => write!(f, "{:06X}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(n: u32) -> SectionId {
        SectionId::for_tests(n)
    }

    #[test]
    fn relative_arithmetic_same_section() {
        let a = Address::relative(sid(0), 0x10);
        let b = a.offset_by(4).unwrap();
        assert_eq!(b.offset(), Some(0x14));
        assert_eq!(b.diff(&a).unwrap(), 4);
        assert_eq!(a.diff(&b).unwrap(), -4);
    }

    #[test]
    fn relative_arithmetic_cross_section_fails() {
        let a = Address::relative(sid(0), 0x10);
        let b = Address::relative(sid(1), 0x10);
        assert_eq!(a.diff(&b), Err(AddressError::CrossSection));
    }

    #[test]
    fn mixed_domain_fails() {
        let a = Address::relative(sid(0), 0x10);
        let b = Address::absolute(0x10);
        assert_eq!(a.diff(&b), Err(AddressError::MixedDomain));
        assert_eq!(b.diff(&a), Err(AddressError::MixedDomain));
    }

    #[test]
    fn absolute_arithmetic() {
        let a = Address::absolute(0x1000);
        let b = a.offset_by(-0x10).unwrap();
        assert_eq!(b.value(), Some(0xFF0));
        assert_eq!(a.diff(&b).unwrap(), 0x10);
        assert!(Address::absolute(0).offset_by(-1).is_err());
    }

    #[test]
    fn negative_relative_offset_fails() {
        let a = Address::relative(sid(0), 2);
        assert_eq!(a.offset_by(-3), Err(AddressError::Range));
    }

    #[test]
    fn make_absolute_adds_anchor_and_keeps_length() {
        let mut a = Address::relative(sid(0), 0x20).with_length(4);
        a.make_absolute(0x1000);
        assert!(a.is_absolute());
        assert_eq!(a.value(), Some(0x1020));
        assert_eq!(a.length(), 4);
    }

    #[test]
    #[should_panic(expected = "bound twice")]
    fn make_absolute_is_one_way() {
        let mut a = Address::relative(sid(0), 0);
        a.make_absolute(0x100);
        a.make_absolute(0x100);
    }

    #[test]
    fn default_length_is_one() {
        assert_eq!(Address::absolute(0).length(), 1);
        assert_eq!(Address::absolute(0).with_length(8).length(), 8);
    }

    #[cfg(test)]
    mod binding {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Once bound, an address stays absolute through any further
            // offset arithmetic.
            #[test]
            fn bound_addresses_never_revert(
                offset in 0u32..0x0010_0000,
                anchor in 0u64..0x0100_0000,
                moves in proptest::collection::vec(-64i64..64, 0..8),
            ) {
                let mut a = Address::relative(SectionId::for_tests(0), offset);
                prop_assert!(a.is_relative());
                a.make_absolute(anchor);
                prop_assert!(a.is_absolute());
                let mut cur = a;
                for m in moves {
                    if let Ok(next) = cur.offset_by(m) {
                        prop_assert!(next.is_absolute());
                        cur = next;
                    }
                }
            }
        }
    }
}
