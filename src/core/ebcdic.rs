// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! ASCII to EBCDIC translation.
//!
//! Character constants, deck text fields and zoned-decimal digits are
//! EBCDIC on the target. Untranslatable input maps to the EBCDIC space.

/// Translate one ASCII byte.
pub fn to_ebcdic(b: u8) -> u8 {
    match b {
        b' ' => 0x40,
        b'0'..=b'9' => 0xF0 + (b - b'0'),
        b'A'..=b'I' => 0xC1 + (b - b'A'),
        b'J'..=b'R' => 0xD1 + (b - b'J'),
        b'S'..=b'Z' => 0xE2 + (b - b'S'),
        b'a'..=b'i' => 0x81 + (b - b'a'),
        b'j'..=b'r' => 0x91 + (b - b'j'),
        b's'..=b'z' => 0xA2 + (b - b's'),
        b'.' => 0x4B,
        b'<' => 0x4C,
        b'(' => 0x4D,
        b'+' => 0x4E,
        b'|' => 0x4F,
        b'&' => 0x50,
        b'!' => 0x5A,
        b'$' => 0x5B,
        b'*' => 0x5C,
        b')' => 0x5D,
        b';' => 0x5E,
        b'-' => 0x60,
        b'/' => 0x61,
        b',' => 0x6B,
        b'%' => 0x6C,
        b'_' => 0x6D,
        b'>' => 0x6E,
        b'?' => 0x6F,
        b'`' => 0x79,
        b':' => 0x7A,
        b'#' => 0x7B,
        b'@' => 0x7C,
        b'\'' => 0x7D,
        b'=' => 0x7E,
        b'"' => 0x7F,
        _ => 0x40,
    }
}

/// Translate a string.
pub fn encode(s: &str) -> Vec<u8> {
    s.bytes().map(to_ebcdic).collect()
}

/// Translate into a fixed-width field padded with EBCDIC spaces.
/// Overlong input is truncated.
pub fn encode_padded(s: &str, width: usize) -> Vec<u8> {
    let mut out = vec![0x40u8; width];
    for (i, b) in s.bytes().take(width).enumerate() {
        out[i] = to_ebcdic(b);
    }
    out
}
