// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The content hierarchy: `Binary` leaves inside `Section`s, sections
//! inside `Region`s, regions inside the final `Image`.
//!
//! Containers own their children by value; cross-references are index
//! handles ([`SectionId`], [`RegionId`]), never pointers. Lifecycle per
//! container: children are placed (relative addresses, allocate phase),
//! sections are assigned region displacements, regions are bound to their
//! absolute anchors, everything is located in the final image, and bytes
//! are inserted bottom-up.

use std::collections::HashMap;

use crate::core::addr::Address;

/// Handle to a [`Section`] in the image arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(u32);

impl SectionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub fn for_tests(n: u32) -> Self {
        SectionId(n)
    }
}

/// Handle to a [`Region`] in the image arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u32);

impl RegionId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Fatal allocation failure for one container.
///
/// Raised when a length or cursor computation fails in a way that makes
/// every later address in the same container wrong. The engine poisons
/// the container and reports the responsible statement.
#[derive(Debug, Clone)]
pub struct ContainerError {
    pub container: String,
    pub message: String,
}

impl ContainerError {
    fn new(container: &str, message: impl Into<String>) -> Self {
        Self {
            container: display_name(container).to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.container, self.message)
    }
}

impl std::error::Error for ContainerError {}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        "(unnamed)"
    } else {
        name
    }
}

/// Allocation cursor for one container.
///
/// `cur` is where the next child lands; `hwm` is the high-water mark that
/// defines the container's length. ORG moves `cur` only.
#[derive(Debug, Clone, Copy, Default)]
struct AllocCursor {
    cur: u32,
    hwm: u32,
}

impl AllocCursor {
    /// Round the cursor up to `alignment`. 0 and 1 are no-ops.
    fn align(&mut self, alignment: u32) -> Option<u32> {
        if alignment > 1 {
            let rem = self.cur % alignment;
            if rem != 0 {
                self.cur = self.cur.checked_add(alignment - rem)?;
                self.hwm = self.hwm.max(self.cur);
            }
        }
        Some(self.cur)
    }

    /// Advance the cursor by `len`, raising the high-water mark. Returns
    /// the offset at which the child was placed.
    fn alloc(&mut self, len: u32) -> Option<u32> {
        let at = self.cur;
        self.cur = self.cur.checked_add(len)?;
        self.hwm = self.hwm.max(self.cur);
        Some(at)
    }

    fn org(&mut self, to: u32) {
        self.cur = to;
        self.hwm = self.hwm.max(self.cur);
    }

    fn pos(&self) -> u32 {
        self.cur
    }

    fn len(&self) -> u32 {
        self.hwm
    }
}

/// Content leaf: the bytes of one statement.
#[derive(Debug, Clone)]
pub struct Binary {
    alignment: u32,
    length: u32,
    emits: bool,
    bytes: Vec<u8>,
    offset: Option<u32>,
    loc: Option<Address>,
    stmt: u32,
}

impl Binary {
    /// `emits` is false for reserved storage, which occupies space but
    /// never contributes bytes.
    pub fn new(alignment: u32, length: u32, emits: bool, stmt: u32) -> Self {
        Self {
            alignment,
            length,
            emits,
            bytes: Vec::new(),
            offset: None,
            loc: None,
            stmt,
        }
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn emits(&self) -> bool {
        self.emits
    }

    pub fn stmt(&self) -> u32 {
        self.stmt
    }

    pub fn loc(&self) -> Option<Address> {
        self.loc
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Fill the byte buffer. The buffer must match the allocated length
    /// and the leaf must already have an address; both are phase-ordering
    /// invariants.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        if self.loc.is_none() {
            panic!("internal error: content built before its address was assigned");
        }
        if bytes.len() != self.length as usize {
            panic!(
                "internal error: built {} bytes into a {}-byte allocation",
                bytes.len(),
                self.length
            );
        }
        self.bytes = bytes;
    }
}

/// Control section or dummy section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Csect,
    Dsect,
}

/// A control/dummy section: an ordered run of binaries with one
/// allocation cursor.
#[derive(Debug)]
pub struct Section {
    id: SectionId,
    name: String,
    kind: SectionKind,
    region: Option<RegionId>,
    alignment: u32,
    cursor: AllocCursor,
    binaries: Vec<Binary>,
    region_disp: Option<u32>,
    image_disp: Option<u32>,
    loc: Option<Address>,
    placed: bool,
    poisoned: bool,
}

impl Section {
    pub fn id(&self) -> SectionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name as shown in listings and diagnostics.
    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }

    pub fn kind(&self) -> SectionKind {
        self.kind
    }

    pub fn region(&self) -> Option<RegionId> {
        self.region
    }

    pub fn length(&self) -> u32 {
        self.cursor.len()
    }

    pub fn pos(&self) -> u32 {
        self.cursor.pos()
    }

    /// Section start address: relative at creation, absolute once the
    /// owning region is bound. Dummy sections stay relative.
    pub fn loc(&self) -> Option<Address> {
        self.loc
    }

    pub fn region_disp(&self) -> Option<u32> {
        self.region_disp
    }

    pub fn image_disp(&self) -> Option<u32> {
        self.image_disp
    }

    pub fn binaries(&self) -> &[Binary] {
        &self.binaries
    }

    pub fn binary_mut(&mut self, index: usize) -> &mut Binary {
        &mut self.binaries[index]
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the section unsafe after an allocation failure. Every
    /// address after the failing statement would be wrong, so the whole
    /// container is withdrawn from the image.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Align and allocate one leaf, giving it its relative address.
    /// Returns the leaf's index and address.
    pub fn place(&mut self, mut binary: Binary) -> Result<(usize, Address), ContainerError> {
        if self.placed {
            panic!("internal error: content placed after section assignment");
        }
        let aligned = self
            .cursor
            .align(binary.alignment)
            .ok_or_else(|| ContainerError::new(&self.name, "section exceeds addressable size"))?;
        let at = self
            .cursor
            .alloc(binary.length)
            .ok_or_else(|| ContainerError::new(&self.name, "section exceeds addressable size"))?;
        debug_assert_eq!(aligned, at);
        let addr = Address::relative(self.id, at);
        binary.offset = Some(at);
        binary.loc = Some(addr);
        self.binaries.push(binary);
        Ok((self.binaries.len() - 1, addr))
    }

    /// Move the allocation cursor; `None` seats it back at the high-water
    /// mark. Never shrinks the section.
    pub fn org(&mut self, to: Option<u32>) {
        match to {
            Some(offset) => self.cursor.org(offset),
            None => self.cursor.org(self.cursor.len()),
        }
    }

    fn bind(&mut self, anchor: u64) {
        if let Some(loc) = self.loc.as_mut() {
            loc.make_absolute(anchor);
        }
        for binary in &mut self.binaries {
            if let Some(loc) = binary.loc.as_mut() {
                loc.make_absolute(anchor);
            }
        }
    }

    fn image_bytes_into(&self, out: &mut [u8]) {
        for binary in &self.binaries {
            if !binary.emits || binary.bytes.is_empty() {
                continue;
            }
            let offset = match binary.offset {
                Some(o) => o as usize,
                None => panic!("internal error: inserting content that was never placed"),
            };
            out[offset..offset + binary.bytes.len()].copy_from_slice(&binary.bytes);
        }
    }

    /// Emitted byte runs as `(address, bytes)` pairs, one per built leaf,
    /// in allocation order. Addresses are absolute once bound.
    pub fn emitted(&self) -> Vec<(Address, &[u8])> {
        let mut runs = Vec::new();
        for binary in &self.binaries {
            if !binary.emits || binary.bytes.is_empty() {
                continue;
            }
            if let Some(loc) = binary.loc {
                runs.push((loc, binary.bytes.as_slice()));
            }
        }
        runs
    }
}

/// A region: sections bound to one absolute address range.
#[derive(Debug)]
pub struct Region {
    id: RegionId,
    name: String,
    origin: u64,
    cursor: AllocCursor,
    sections: Vec<SectionId>,
    image_disp: Option<u32>,
    bytes: Vec<u8>,
}

impl Region {
    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        display_name(&self.name)
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn length(&self) -> u32 {
        self.cursor.len()
    }

    pub fn sections(&self) -> &[SectionId] {
        &self.sections
    }

    pub fn image_disp(&self) -> Option<u32> {
        self.image_disp
    }

    /// Region bytes after insertion.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Storage range `[origin, origin+length)`.
    pub fn end(&self) -> u64 {
        self.origin + self.cursor.len() as u64
    }
}

/// The whole load image: every region and section, the final byte array,
/// and the load/entry addresses.
#[derive(Debug, Default)]
pub struct Image {
    sections: Vec<Section>,
    regions: Vec<Region>,
    section_names: HashMap<String, SectionId>,
    region_names: HashMap<String, RegionId>,
    load: Option<u64>,
    entry: Option<u64>,
    bytes: Vec<u8>,
}

impl Image {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a region anchored at `origin`. Region names are unique;
    /// callers look up before creating.
    pub fn add_region(&mut self, name: &str, origin: u64) -> RegionId {
        let id = RegionId(self.regions.len() as u32);
        self.regions.push(Region {
            id,
            name: name.to_string(),
            origin,
            cursor: AllocCursor::default(),
            sections: Vec::new(),
            image_disp: None,
            bytes: Vec::new(),
        });
        self.region_names.insert(name.to_string(), id);
        id
    }

    /// Create a section. Control sections join `region`; dummy sections
    /// pass `None` and are never bound.
    pub fn add_section(
        &mut self,
        name: &str,
        kind: SectionKind,
        alignment: u32,
        region: Option<RegionId>,
    ) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            id,
            name: name.to_string(),
            kind,
            region,
            alignment,
            cursor: AllocCursor::default(),
            binaries: Vec::new(),
            region_disp: None,
            image_disp: None,
            loc: Some(Address::relative(id, 0)),
            placed: false,
            poisoned: false,
        });
        if let Some(rid) = region {
            self.regions[rid.index()].sections.push(id);
        }
        self.section_names.insert(name.to_string(), id);
        id
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.index()]
    }

    pub fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.index()]
    }

    pub fn region(&self, id: RegionId) -> &Region {
        &self.regions[id.index()]
    }

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.section_names.get(name).copied()
    }

    pub fn find_region(&self, name: &str) -> Option<RegionId> {
        self.region_names.get(name).copied()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn load(&self) -> Option<u64> {
        self.load
    }

    pub fn set_load(&mut self, load: u64) {
        self.load = Some(load);
    }

    pub fn entry(&self) -> Option<u64> {
        self.entry
    }

    pub fn set_entry(&mut self, entry: u64) {
        self.entry = Some(entry);
    }

    /// Final image bytes: regions concatenated in declaration order.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Give every live control section its displacement inside its
    /// region. Section lengths are final after this; no further content
    /// may be placed.
    pub fn assign_regions(&mut self) -> Result<(), ContainerError> {
        for region in &mut self.regions {
            for sid in region.sections.clone() {
                let section = &mut self.sections[sid.index()];
                if section.poisoned {
                    continue;
                }
                region
                    .cursor
                    .align(section.alignment)
                    .ok_or_else(|| ContainerError::new(&region.name, "region exceeds addressable size"))?;
                let disp = region
                    .cursor
                    .alloc(section.length())
                    .ok_or_else(|| ContainerError::new(&region.name, "region exceeds addressable size"))?;
                section.region_disp = Some(disp);
            }
        }
        for section in &mut self.sections {
            section.placed = true;
        }
        Ok(())
    }

    /// Bind every region's sections to absolute storage. Dummy sections
    /// have no region and are left relative.
    pub fn bind_all(&mut self) {
        for region in &self.regions {
            for &sid in &region.sections {
                let section = &mut self.sections[sid.index()];
                if section.poisoned {
                    continue;
                }
                let disp = match section.region_disp {
                    Some(d) => d,
                    None => panic!("internal error: binding a section that was never assigned"),
                };
                section.bind(region.origin + disp as u64);
            }
        }
    }

    /// Compute every region's and section's displacement into the final
    /// image (cumulative across regions in declaration order).
    pub fn locate_all(&mut self) {
        let mut disp: u32 = 0;
        for region in &mut self.regions {
            region.image_disp = Some(disp);
            for &sid in &region.sections {
                let section = &mut self.sections[sid.index()];
                if section.poisoned {
                    continue;
                }
                if let Some(rd) = section.region_disp {
                    section.image_disp = Some(disp + rd);
                }
            }
            disp += region.length();
        }
    }

    /// Insert bytes bottom-up: binaries into sections, sections into
    /// regions, regions into the image. Reserved storage and unbuilt
    /// leaves stay zero.
    pub fn insert_all(&mut self) {
        self.bytes.clear();
        for region in &mut self.regions {
            let mut buf = vec![0u8; region.length() as usize];
            for &sid in &region.sections {
                let section = &self.sections[sid.index()];
                if section.poisoned {
                    continue;
                }
                let disp = match section.region_disp {
                    Some(d) => d as usize,
                    None => panic!("internal error: inserting a section that was never assigned"),
                };
                section.image_bytes_into(&mut buf[disp..disp + section.length() as usize]);
            }
            self.bytes.extend_from_slice(&buf);
            region.bytes = buf;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(alignment: u32, length: u32, stmt: u32) -> Binary {
        Binary::new(alignment, length, true, stmt)
    }

    #[test]
    fn place_aligns_and_grows() {
        let mut img = Image::new();
        let rid = img.add_region("", 0);
        let sid = img.add_section("", SectionKind::Csect, 8, Some(rid));
        let (_, a) = img.section_mut(sid).place(leaf(1, 3, 1)).unwrap();
        let (_, b) = img.section_mut(sid).place(leaf(4, 4, 2)).unwrap();
        assert_eq!(a.offset(), Some(0));
        assert_eq!(b.offset(), Some(4));
        assert_eq!(img.section(sid).length(), 8);
    }

    #[test]
    fn org_moves_cursor_not_high_water() {
        let mut img = Image::new();
        let rid = img.add_region("", 0);
        let sid = img.add_section("", SectionKind::Csect, 8, Some(rid));
        img.section_mut(sid).place(leaf(1, 16, 1)).unwrap();
        img.section_mut(sid).org(Some(4));
        assert_eq!(img.section(sid).pos(), 4);
        assert_eq!(img.section(sid).length(), 16);
        let (_, a) = img.section_mut(sid).place(leaf(1, 2, 2)).unwrap();
        assert_eq!(a.offset(), Some(4));
        assert_eq!(img.section(sid).length(), 16);
        img.section_mut(sid).org(None);
        assert_eq!(img.section(sid).pos(), 16);
    }

    #[test]
    fn assign_bind_locate_two_regions() {
        let mut img = Image::new();
        let r0 = img.add_region("LOW", 0x200);
        let r1 = img.add_region("HIGH", 0x1000);
        let s0 = img.add_section("A", SectionKind::Csect, 8, Some(r0));
        let s1 = img.add_section("B", SectionKind::Csect, 8, Some(r1));
        img.section_mut(s0).place(leaf(1, 6, 1)).unwrap();
        img.section_mut(s1).place(leaf(1, 4, 2)).unwrap();
        img.assign_regions().unwrap();
        img.bind_all();
        img.locate_all();

        assert_eq!(img.section(s0).loc().unwrap().value(), Some(0x200));
        assert_eq!(img.section(s1).loc().unwrap().value(), Some(0x1000));
        assert_eq!(img.region(r0).image_disp(), Some(0));
        // Region lengths are not rounded, so the second region starts at
        // the first one's high-water mark.
        assert_eq!(img.region(r1).image_disp(), Some(6));
        assert_eq!(img.section(s1).image_disp(), Some(6));
    }

    #[test]
    fn dsects_stay_relative() {
        let mut img = Image::new();
        let rid = img.add_region("", 0x400);
        let cs = img.add_section("", SectionKind::Csect, 8, Some(rid));
        let ds = img.add_section("MAP", SectionKind::Dsect, 8, None);
        img.section_mut(cs).place(leaf(1, 4, 1)).unwrap();
        img.section_mut(ds).place(leaf(1, 8, 2)).unwrap();
        img.assign_regions().unwrap();
        img.bind_all();
        assert!(img.section(cs).loc().unwrap().is_absolute());
        assert!(img.section(ds).loc().unwrap().is_relative());
        assert!(img.section(ds).binaries()[0].loc().unwrap().is_relative());
    }

    #[test]
    fn insert_round_trips_section_bytes() {
        let mut img = Image::new();
        let rid = img.add_region("", 0);
        let s0 = img.add_section("A", SectionKind::Csect, 8, Some(rid));
        let s1 = img.add_section("B", SectionKind::Csect, 8, Some(rid));
        let (i0, _) = img.section_mut(s0).place(leaf(1, 4, 1)).unwrap();
        let (i1, _) = img.section_mut(s1).place(leaf(1, 2, 2)).unwrap();
        img.assign_regions().unwrap();
        img.bind_all();
        img.locate_all();
        img.section_mut(s0).binary_mut(i0).set_bytes(vec![1, 2, 3, 4]);
        img.section_mut(s1).binary_mut(i1).set_bytes(vec![9, 8]);
        img.insert_all();

        for sid in [s0, s1] {
            let section = img.section(sid);
            let at = section.image_disp().unwrap() as usize;
            let len = section.length() as usize;
            let mut own = vec![0u8; len];
            section.image_bytes_into(&mut own);
            assert_eq!(&img.bytes()[at..at + len], own.as_slice());
        }
        assert_eq!(img.bytes(), &[1, 2, 3, 4, 0, 0, 0, 0, 9, 8]);
    }

    #[test]
    fn reserved_storage_stays_zero() {
        let mut img = Image::new();
        let rid = img.add_region("", 0);
        let sid = img.add_section("", SectionKind::Csect, 8, Some(rid));
        img.section_mut(sid).place(Binary::new(1, 4, false, 1)).unwrap();
        let (ix, _) = img.section_mut(sid).place(leaf(1, 2, 2)).unwrap();
        img.assign_regions().unwrap();
        img.bind_all();
        img.locate_all();
        img.section_mut(sid).binary_mut(ix).set_bytes(vec![0xAA, 0xBB]);
        img.insert_all();
        assert_eq!(img.bytes(), &[0, 0, 0, 0, 0xAA, 0xBB]);
        // Reserved storage never shows up as an emitted run.
        assert_eq!(img.section(sid).emitted().len(), 1);
    }

    #[test]
    fn poisoned_sections_are_withdrawn() {
        let mut img = Image::new();
        let rid = img.add_region("", 0x100);
        let bad = img.add_section("BAD", SectionKind::Csect, 8, Some(rid));
        let good = img.add_section("GOOD", SectionKind::Csect, 8, Some(rid));
        img.section_mut(bad).place(leaf(1, 4, 1)).unwrap();
        let (ix, _) = img.section_mut(good).place(leaf(1, 2, 2)).unwrap();
        img.section_mut(bad).poison();
        img.assign_regions().unwrap();
        img.bind_all();
        img.locate_all();
        img.section_mut(good).binary_mut(ix).set_bytes(vec![7, 7]);
        img.insert_all();
        assert_eq!(img.section(bad).region_disp(), None);
        assert_eq!(img.section(good).region_disp(), Some(0));
        assert_eq!(img.bytes(), &[7, 7]);
    }

    #[test]
    #[should_panic(expected = "before its address")]
    fn build_before_place_is_a_bug() {
        let mut b = Binary::new(1, 2, true, 1);
        b.set_bytes(vec![0, 0]);
    }

    #[test]
    #[should_panic(expected = "after section assignment")]
    fn place_after_assignment_is_a_bug() {
        let mut img = Image::new();
        let rid = img.add_region("", 0);
        let sid = img.add_section("", SectionKind::Csect, 8, Some(rid));
        img.assign_regions().unwrap();
        let _ = img.section_mut(sid).place(leaf(1, 2, 1));
    }

    #[test]
    fn allocation_is_deterministic() {
        let build = || {
            let mut img = Image::new();
            let rid = img.add_region("", 0);
            let sid = img.add_section("", SectionKind::Csect, 8, Some(rid));
            let mut offsets = Vec::new();
            for (align, len) in [(1, 3), (8, 8), (2, 1), (4, 4), (1, 5)] {
                let (_, a) = img.section_mut(sid).place(leaf(align, len, 0)).unwrap();
                offsets.push(a.offset().unwrap());
            }
            (offsets, img.section(sid).length())
        };
        assert_eq!(build(), build());
        assert_eq!(build().0, vec![0, 8, 16, 20, 24]);
    }
}
