// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Base-register assignment and base/displacement resolution.
//!
//! USING establishes an assignment, DROP removes it, and instruction
//! encoding asks for the best `(base, displacement)` pair covering a
//! target address. Direct-mode registers have hardware-fixed anchors;
//! an assignment on such a register shadows the fixed anchor and a later
//! DROP uncovers it again.

use crate::core::addr::Address;

/// One active base-register assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseAssignment {
    pub reg: u8,
    pub anchor: Address,
    pub direct: bool,
}

/// No active assignment covers the target within the displacement field.
/// A statement-level addressing error, never fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoBaseAvailable {
    pub target: Address,
}

impl std::fmt::Display for NoBaseAvailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "no usable base register for address {}", self.target)
    }
}

impl std::error::Error for NoBaseAvailable {}

/// The register-assignment set across the 16 architectural registers.
#[derive(Debug, Clone)]
pub struct BaseManager {
    direct: Vec<BaseAssignment>,
    program: [Option<BaseAssignment>; 16],
}

impl BaseManager {
    /// Build with an explicit direct-mode register set.
    pub fn with_direct(direct: &[(u8, u64)]) -> Self {
        Self {
            direct: direct
                .iter()
                .map(|&(reg, anchor)| BaseAssignment {
                    reg,
                    anchor: Address::absolute(anchor),
                    direct: true,
                })
                .collect(),
            program: [None; 16],
        }
    }

    /// Standard machine model: register 0 fixed at storage location 0.
    pub fn standard() -> Self {
        Self::with_direct(&[(0, 0)])
    }

    /// Legacy model: registers 0-7 fixed at `r * 4096`, covering the
    /// first 32K of storage directly.
    pub fn legacy_eight() -> Self {
        let direct: Vec<(u8, u64)> = (0u8..8).map(|r| (r, r as u64 * 4096)).collect();
        Self::with_direct(&direct)
    }

    /// Establish an assignment, superseding any prior one for `reg`.
    pub fn assign(&mut self, reg: u8, anchor: Address) {
        debug_assert!(reg < 16);
        self.program[reg as usize] = Some(BaseAssignment {
            reg,
            anchor,
            direct: false,
        });
    }

    /// Remove `reg`'s assignment. Idempotent; a shadowed direct-mode
    /// anchor becomes visible again.
    pub fn drop_reg(&mut self, reg: u8) {
        debug_assert!(reg < 16);
        self.program[reg as usize] = None;
    }

    /// Remove every program-established assignment.
    pub fn drop_all(&mut self) {
        self.program = [None; 16];
    }

    /// The assignment visible on `reg`: program-established if present,
    /// else the direct-mode anchor.
    fn visible(&self, reg: u8) -> Option<BaseAssignment> {
        self.program[reg as usize]
            .or_else(|| self.direct.iter().copied().find(|d| d.reg == reg))
    }

    /// Every currently visible assignment, register order.
    pub fn active(&self) -> Vec<BaseAssignment> {
        (0u8..16).filter_map(|r| self.visible(r)).collect()
    }

    /// Pick a base register and displacement for `target`.
    ///
    /// Candidates are visible assignments whose anchor lies at or before
    /// the target in the same addressing domain and whose displacement
    /// fits `disp_bits` unsigned. Smallest displacement wins; on a tie
    /// the highest-numbered register wins, unless every tied candidate is
    /// direct-mode, where the lowest wins. Selection is sorted, so the
    /// result never depends on assignment order.
    pub fn resolve(
        &self,
        target: Address,
        disp_bits: u32,
    ) -> Result<(u8, u32), NoBaseAvailable> {
        let limit: i64 = 1 << disp_bits;
        let mut candidates: Vec<(u32, bool, u8)> = Vec::new();
        for assignment in self.active() {
            let disp = match target.diff(&assignment.anchor) {
                Ok(d) => d,
                Err(_) => continue,
            };
            if (0..limit).contains(&disp) {
                candidates.push((disp as u32, assignment.direct, assignment.reg));
            }
        }
        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.cmp(&b.1))
                .then_with(|| if a.1 { a.2.cmp(&b.2) } else { b.2.cmp(&a.2) })
        });
        match candidates.first() {
            Some(&(disp, _, reg)) => Ok((reg, disp)),
            None => Err(NoBaseAvailable { target }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::SectionId;

    fn none() -> BaseManager {
        BaseManager::with_direct(&[])
    }

    #[test]
    fn resolve_basic_coverage() {
        let mut b = none();
        b.assign(12, Address::absolute(0x1000));
        assert_eq!(b.resolve(Address::absolute(0x1100), 12), Ok((12, 0x100)));
    }

    #[test]
    fn resolve_rejects_out_of_field() {
        let mut b = none();
        b.assign(12, Address::absolute(0x1000));
        assert!(b.resolve(Address::absolute(0x2000), 12).is_err());
        assert!(b.resolve(Address::absolute(0x0FFF), 12).is_err());
        assert_eq!(b.resolve(Address::absolute(0x1FFF), 12), Ok((12, 0xFFF)));
    }

    #[test]
    fn resolve_prefers_smallest_displacement() {
        let mut b = none();
        b.assign(12, Address::absolute(0x1000));
        b.assign(11, Address::absolute(0x1800));
        assert_eq!(b.resolve(Address::absolute(0x1900), 12), Ok((11, 0x100)));
    }

    #[test]
    fn tie_goes_to_highest_register() {
        let mut b = none();
        b.assign(5, Address::absolute(0x1000));
        b.assign(9, Address::absolute(0x1000));
        assert_eq!(b.resolve(Address::absolute(0x1004), 12), Ok((9, 4)));
    }

    #[test]
    fn all_direct_tie_goes_to_lowest_register() {
        let b = BaseManager::with_direct(&[(2, 0x1000), (7, 0x1000)]);
        assert_eq!(b.resolve(Address::absolute(0x1004), 12), Ok((2, 4)));
    }

    #[test]
    fn mixed_tie_prefers_program_base() {
        let mut b = BaseManager::with_direct(&[(3, 0x1000)]);
        b.assign(9, Address::absolute(0x1000));
        assert_eq!(b.resolve(Address::absolute(0x1004), 12), Ok((9, 4)));
    }

    #[test]
    fn assign_supersedes_same_register() {
        let mut b = none();
        b.assign(12, Address::absolute(0x1000));
        b.assign(12, Address::absolute(0x4000));
        assert!(b.resolve(Address::absolute(0x1100), 12).is_err());
        assert_eq!(b.resolve(Address::absolute(0x4100), 12), Ok((12, 0x100)));
    }

    #[test]
    fn drop_is_idempotent() {
        let mut b = none();
        b.assign(12, Address::absolute(0x1000));
        b.drop_reg(12);
        let after_one = b.active();
        b.drop_reg(12);
        assert_eq!(b.active(), after_one);
        b.drop_reg(4);
        assert_eq!(b.active(), after_one);
    }

    #[test]
    fn shadowed_direct_anchor_returns_on_drop() {
        let mut b = BaseManager::standard();
        assert_eq!(b.resolve(Address::absolute(0x10), 12), Ok((0, 0x10)));
        b.assign(0, Address::absolute(0x5000));
        assert!(b.resolve(Address::absolute(0x10), 12).is_err());
        b.drop_reg(0);
        assert_eq!(b.resolve(Address::absolute(0x10), 12), Ok((0, 0x10)));
    }

    #[test]
    fn legacy_direct_set_covers_low_storage() {
        let b = BaseManager::legacy_eight();
        assert_eq!(b.resolve(Address::absolute(0x0123), 12), Ok((0, 0x123)));
        assert_eq!(b.resolve(Address::absolute(0x7FFF), 12), Ok((7, 0xFFF)));
        assert!(b.resolve(Address::absolute(0x8000), 12).is_err());
    }

    #[test]
    fn relative_targets_need_same_section_anchor() {
        let map = SectionId::for_tests(1);
        let other = SectionId::for_tests(2);
        let mut b = BaseManager::standard();
        b.assign(5, Address::relative(map, 0));
        assert_eq!(b.resolve(Address::relative(map, 8), 12), Ok((5, 8)));
        assert!(b.resolve(Address::relative(other, 8), 12).is_err());
        // Absolute targets never see the relative anchor.
        assert_eq!(b.resolve(Address::absolute(8), 12), Ok((0, 8)));
    }

    mod selection {
        use super::*;
        use proptest::prelude::*;

        // Spelled-out selection rule to compare the sorted implementation
        // against: scan every candidate, keep the best by (displacement,
        // then register preference).
        fn brute_force(
            assignments: &[BaseAssignment],
            target: u64,
            disp_bits: u32,
        ) -> Option<(u8, u32)> {
            let limit = 1u64 << disp_bits;
            let mut fitting: Vec<(u32, bool, u8)> = Vec::new();
            for a in assignments {
                let anchor = a.anchor.value().unwrap();
                if target >= anchor && target - anchor < limit {
                    fitting.push(((target - anchor) as u32, a.direct, a.reg));
                }
            }
            let min = fitting.iter().map(|c| c.0).min()?;
            let tied: Vec<_> = fitting.into_iter().filter(|c| c.0 == min).collect();
            let pick = if tied.iter().all(|c| c.1) {
                *tied.iter().min_by_key(|c| c.2).unwrap()
            } else {
                *tied
                    .iter()
                    .filter(|c| !c.1)
                    .max_by_key(|c| c.2)
                    .unwrap()
            };
            Some((pick.2, pick.0))
        }

        proptest! {
            #[test]
            fn matches_brute_force(
                direct in proptest::collection::vec((0u8..16, 0u64..0x4000), 0..4),
                program in proptest::collection::vec((0u8..16, 0u64..0x4000), 0..6),
                target in 0u64..0x5000,
            ) {
                let mut mgr = BaseManager::with_direct(&direct);
                for &(reg, anchor) in &program {
                    mgr.assign(reg, Address::absolute(anchor));
                }
                let visible = mgr.active();
                let expect = brute_force(&visible, target, 12);
                let got = mgr.resolve(Address::absolute(target), 12).ok();
                prop_assert_eq!(got, expect);
            }
        }
    }
}
