// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output builders: object deck, RC console script, and the
//! list-directed IPL file set.
//!
//! Every builder is a pure function of the finished [`Image`]; file
//! emission happens in the pass driver. The raw image output is just
//! [`Image::bytes`] and needs no builder.

use crate::core::ebcdic;
use crate::core::image::{Image, Section, SectionKind};

/// Object deck record length.
const RECORD_LEN: usize = 80;
/// Data bytes per TXT record.
const TXT_DATA_LEN: usize = 56;
/// Store commands cover this many bytes each.
const RC_CHUNK: usize = 16;

/// One emitted byte run with its absolute address.
struct Run<'a> {
    addr: u64,
    bytes: &'a [u8],
}

/// Control sections that made it into the image, in declaration order.
fn live_sections(image: &Image) -> Vec<&Section> {
    image
        .sections()
        .iter()
        .filter(|s| {
            s.kind() == SectionKind::Csect && !s.is_poisoned() && s.image_disp().is_some()
        })
        .collect()
}

fn section_runs(section: &Section) -> Vec<Run<'_>> {
    section
        .emitted()
        .into_iter()
        .filter_map(|(addr, bytes)| addr.value().map(|addr| Run { addr, bytes }))
        .collect()
}

fn new_record(kind: &str) -> [u8; RECORD_LEN] {
    let mut rec = [0x40u8; RECORD_LEN];
    rec[0] = 0x02;
    rec[1..4].copy_from_slice(&ebcdic::encode(kind));
    rec
}

fn put2(rec: &mut [u8; RECORD_LEN], at: usize, value: u16) {
    rec[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

fn put3(rec: &mut [u8; RECORD_LEN], at: usize, value: u64) {
    let v = (value & 0xFF_FFFF) as u32;
    rec[at] = (v >> 16) as u8;
    rec[at + 1] = (v >> 8) as u8;
    rec[at + 2] = v as u8;
}

fn put_seq(rec: &mut [u8; RECORD_LEN], seq: u32) {
    let text = format!("{:08}", seq);
    rec[72..80].copy_from_slice(&ebcdic::encode(&text));
}

/// Build the object deck: one ESD record per bound control section, TXT
/// records covering the emitted bytes, one END record with the entry
/// address.
pub fn build_deck(image: &Image) -> Vec<u8> {
    let sections = live_sections(image);
    let mut deck = Vec::new();
    let mut seq = 0u32;

    for (i, section) in sections.iter().enumerate() {
        let esdid = (i + 1) as u16;
        let addr = section.loc().and_then(|a| a.value()).unwrap_or(0);
        let mut rec = new_record("ESD");
        // One 16-byte item per record.
        put2(&mut rec, 10, 16);
        put2(&mut rec, 14, esdid);
        let name = ebcdic::encode_padded(section.display_name(), 8);
        rec[16..24].copy_from_slice(&name);
        rec[24] = 0x00; // SD
        put3(&mut rec, 25, addr);
        rec[28] = 0x00;
        put3(&mut rec, 29, section.length() as u64);
        seq += 1;
        put_seq(&mut rec, seq);
        deck.extend_from_slice(rec.as_slice());
    }

    for (i, section) in sections.iter().enumerate() {
        let esdid = (i + 1) as u16;
        let mut pending: Vec<u8> = Vec::new();
        let mut pending_at = 0u64;
        let mut flush = |pending: &mut Vec<u8>, at: u64, seq: &mut u32, deck: &mut Vec<u8>| {
            if pending.is_empty() {
                return;
            }
            let mut rec = new_record("TXT");
            put3(&mut rec, 5, at);
            put2(&mut rec, 10, pending.len() as u16);
            put2(&mut rec, 14, esdid);
            rec[16..16 + pending.len()].copy_from_slice(pending);
            *seq += 1;
            put_seq(&mut rec, *seq);
            deck.extend_from_slice(rec.as_slice());
            pending.clear();
        };
        for run in section_runs(section) {
            let mut addr = run.addr;
            let mut bytes = run.bytes;
            // A gap in the emitted stream ends the open record.
            if !pending.is_empty() && pending_at + pending.len() as u64 != addr {
                flush(&mut pending, pending_at, &mut seq, &mut deck);
            }
            while !bytes.is_empty() {
                if pending.is_empty() {
                    pending_at = addr;
                }
                let room = TXT_DATA_LEN - pending.len();
                let take = room.min(bytes.len());
                pending.extend_from_slice(&bytes[..take]);
                bytes = &bytes[take..];
                addr += take as u64;
                if pending.len() == TXT_DATA_LEN {
                    flush(&mut pending, pending_at, &mut seq, &mut deck);
                }
            }
        }
        flush(&mut pending, pending_at, &mut seq, &mut deck);
    }

    let entry = image.entry().unwrap_or(0);
    let esdid = sections
        .iter()
        .position(|s| {
            let start = s.loc().and_then(|a| a.value()).unwrap_or(0);
            (start..start + s.length() as u64).contains(&entry)
        })
        .map(|i| (i + 1) as u16)
        .unwrap_or(1);
    let mut rec = new_record("END");
    put3(&mut rec, 5, entry);
    put2(&mut rec, 14, esdid);
    seq += 1;
    put_seq(&mut rec, seq);
    deck.extend_from_slice(rec.as_slice());

    deck
}

/// Build the Hercules console script: a comment header, one `r ADDR=HEX`
/// store command per 16 emitted bytes, and a trailing comment naming the
/// load and entry points.
pub fn build_rc(image: &Image, name: &str) -> String {
    let load = image.load().unwrap_or(0);
    let entry = image.entry().unwrap_or(load);
    let mut out = String::new();
    out.push_str(&format!("# {} storage load script\n", name));

    // Coalesce adjacent runs so consecutive statements share commands.
    let mut all: Vec<Run<'_>> = live_sections(image)
        .into_iter()
        .flat_map(section_runs)
        .collect();
    all.sort_by_key(|r| r.addr);
    let mut merged: Vec<(u64, Vec<u8>)> = Vec::new();
    for run in all {
        match merged.last_mut() {
            Some((at, buf)) if *at + buf.len() as u64 == run.addr => {
                buf.extend_from_slice(run.bytes);
            }
            _ => merged.push((run.addr, run.bytes.to_vec())),
        }
    }

    for (mut addr, buf) in merged {
        for chunk in buf.chunks(RC_CHUNK) {
            let hex: String = chunk.iter().map(|b| format!("{:02X}", b)).collect();
            out.push_str(&format!("r {:06X}={}\n", addr, hex));
            addr += chunk.len() as u64;
        }
    }
    out.push_str(&format!(
        "# load point {:06X}, entry point {:06X}\n",
        load, entry
    ));
    out
}

/// File name for one region's boot image.
fn region_file_name(name: &str) -> String {
    if name.is_empty() {
        "REGION.bin".to_string()
    } else {
        format!("{}.bin", name)
    }
}

/// Build the list-directed IPL file set: one `.bin` per non-empty region
/// plus `IPLPOINTS.txt` with `filename address` lines. The region holding
/// the entry point lists first.
pub fn build_ldipl(image: &Image) -> Vec<(String, Vec<u8>)> {
    let entry = image.entry().unwrap_or(0);
    let mut regions: Vec<_> = image.regions().iter().filter(|r| r.length() > 0).collect();
    regions.sort_by_key(|r| {
        let holds_entry = (r.origin()..r.end()).contains(&entry);
        (!holds_entry, r.origin())
    });

    let mut files = Vec::new();
    let mut control = String::new();
    for region in &regions {
        let file = region_file_name(region.name());
        control.push_str(&format!("{} {:06X}\n", file, region.origin()));
        files.push((file, region.bytes().to_vec()));
    }
    files.insert(0, ("IPLPOINTS.txt".to_string(), control.into_bytes()));
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::insn::ArchLevel;

    use super::super::engine::Assembler;

    fn assemble(lines: &[&str]) -> Assembler {
        let mut asm = Assembler::new(ArchLevel::S370, false);
        let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        let counts = asm.assemble(&lines);
        assert_eq!(counts.errors, 0, "{:?}", asm.diagnostics());
        asm
    }

    fn records(deck: &[u8]) -> Vec<&[u8]> {
        assert_eq!(deck.len() % RECORD_LEN, 0);
        deck.chunks(RECORD_LEN).collect()
    }

    #[test]
    fn deck_carries_esd_txt_and_end() {
        let asm = assemble(&[
            "BOOT     START X'1000'",
            "         DC    XL4'11223344'",
            "         END",
        ]);
        let deck = build_deck(asm.image());
        let recs = records(&deck);
        assert_eq!(recs.len(), 3);

        let esd = recs[0];
        assert_eq!(esd[0], 0x02);
        assert_eq!(&esd[1..4], ebcdic::encode("ESD").as_slice());
        assert_eq!(&esd[16..24], ebcdic::encode_padded("BOOT", 8).as_slice());
        assert_eq!(&esd[25..28], &[0x00, 0x10, 0x00]);
        assert_eq!(&esd[29..32], &[0x00, 0x00, 0x04]);

        let txt = recs[1];
        assert_eq!(&txt[1..4], ebcdic::encode("TXT").as_slice());
        assert_eq!(&txt[5..8], &[0x00, 0x10, 0x00]);
        assert_eq!(&txt[10..12], &[0x00, 0x04]);
        assert_eq!(&txt[14..16], &[0x00, 0x01]);
        assert_eq!(&txt[16..20], &[0x11, 0x22, 0x33, 0x44]);

        let end = recs[2];
        assert_eq!(&end[1..4], ebcdic::encode("END").as_slice());
        assert_eq!(&end[5..8], &[0x00, 0x10, 0x00]);
        assert_eq!(&end[14..16], &[0x00, 0x01]);
    }

    #[test]
    fn txt_records_flush_on_gaps() {
        let asm = assemble(&[
            "         START 0",
            "         DC    X'AA'",
            "         DS    XL3",
            "         DC    X'BB'",
            "         END",
        ]);
        let deck = build_deck(asm.image());
        let recs = records(&deck);
        // ESD, two TXT runs split by the reserve, END.
        assert_eq!(recs.len(), 4);
        assert_eq!(&recs[1][5..8], &[0x00, 0x00, 0x00]);
        assert_eq!(recs[1][16], 0xAA);
        assert_eq!(&recs[2][5..8], &[0x00, 0x00, 0x04]);
        assert_eq!(recs[2][16], 0xBB);
    }

    #[test]
    fn long_constants_split_at_fifty_six_bytes() {
        let asm = assemble(&["         DC    XL60'FF'", "         END"]);
        let deck = build_deck(asm.image());
        let recs = records(&deck);
        assert_eq!(recs.len(), 4);
        assert_eq!(&recs[1][10..12], &[0x00, 56]);
        assert_eq!(&recs[2][10..12], &[0x00, 4]);
        assert_eq!(&recs[2][5..8], &[0x00, 0x00, 56]);
    }

    #[test]
    fn rc_script_stores_sixteen_bytes_per_command() {
        let asm = assemble(&[
            "BOOT     START X'1000'",
            "         DC    XL20'EE'",
            "         END",
        ]);
        let rc = build_rc(asm.image(), "boot");
        let lines: Vec<&str> = rc.lines().collect();
        assert!(lines[0].starts_with("# boot"));
        assert_eq!(lines[1], format!("r 001000={}", "EE".repeat(16)));
        assert_eq!(lines[2], format!("r 001010={}", "EE".repeat(4)));
        assert_eq!(lines[3], "# load point 001000, entry point 001000");
    }

    #[test]
    fn ldipl_lists_the_entry_region_first() {
        let asm = assemble(&[
            "LOW      REGION X'200'",
            "A        CSECT",
            "         DC    X'AA'",
            "HIGH     REGION X'1000'",
            "B        CSECT",
            "GO       DC    X'BB'",
            "         END   GO",
        ]);
        let files = build_ldipl(asm.image());
        assert_eq!(files[0].0, "IPLPOINTS.txt");
        let control = String::from_utf8(files[0].1.clone()).expect("utf8");
        assert_eq!(control, "HIGH.bin 001000\nLOW.bin 000200\n");
        assert_eq!(files[1], ("HIGH.bin".to_string(), vec![0xBB]));
        assert_eq!(files[2], ("LOW.bin".to_string(), vec![0xAA]));
    }

    #[test]
    fn empty_image_still_produces_an_end_record() {
        let mut asm = Assembler::new(ArchLevel::S370, false);
        asm.assemble(&["         END".to_string()]);
        let deck = build_deck(asm.image());
        let recs = records(&deck);
        assert_eq!(recs.len(), 1);
        assert_eq!(&recs[0][1..4], ebcdic::encode("END").as_slice());
    }
}
