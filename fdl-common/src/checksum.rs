// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Frame and data checksums.

/// One's-complement checksum over the `size`, `bytecode` and payload bytes.
///
/// Bytes are summed as little-endian 16-bit words; an odd trailing byte is
/// added as-is. Carries are folded back in before the result is inverted.
pub fn frame_checksum(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let mut sum: u64 = words
        .by_ref()
        .map(|w| u16::from_le_bytes([w[0], w[1]]) as u64)
        .sum();
    if let [last] = words.remainder() {
        sum += *last as u64;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Wrapping byte sum, continued from `seed`.
pub fn additive_checksum32(seed: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(seed, |acc, &b| acc.wrapping_add(b as u32))
}

/// Checksum for raw-data blocks: little-endian 32-bit words, then the
/// trailing bytes one by one, all wrapping.
pub fn raw_data_checksum(data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(4);
    let sum = words
        .by_ref()
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0u32, u32::wrapping_add);
    additive_checksum32(sum, words.remainder())
}
