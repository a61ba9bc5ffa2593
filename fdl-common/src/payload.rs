// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command payload layouts.
//!
//! Each payload is decoded field by field from a little-endian byte slice.
//! Partition names are fixed 72-byte UTF-16LE fields; only ASCII is accepted.

use alloc::vec::Vec;

use thiserror::Error;

use crate::protocol::{ProtocolStage, SizeUnit, PART_NAME_WIRE_CHARS, PART_NAME_WIRE_LEN};

/// Partition name as carried on the wire.
pub type PartName = heapless::String<PART_NAME_WIRE_CHARS>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{what} payload needs {expected} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("partition name is not ASCII")]
    BadName,
    #[error("partition name longer than 36 characters")]
    NameTooLong,
    #[error("unknown size unit {0}")]
    UnknownUnit(u8),
    #[error("{0} transfer cannot be expressed in this stage")]
    StageMismatch(&'static str),
    #[error("value {0:#x} does not fit the field")]
    FieldOverflow(u64),
}

struct Reader<'a> {
    what: &'static str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(what: &'static str, bytes: &'a [u8]) -> Self {
        Self { what, bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PayloadError> {
        let end = self.pos + n;
        let slice = self.bytes.get(self.pos..end).ok_or(PayloadError::Truncated {
            what: self.what,
            expected: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, PayloadError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, PayloadError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, PayloadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, PayloadError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn name(&mut self) -> Result<PartName, PayloadError> {
        decode_wide_name(self.take(PART_NAME_WIRE_LEN)?)
    }
}

/// Decode a NUL-terminated UTF-16LE partition name.
pub fn decode_wide_name(raw: &[u8]) -> Result<PartName, PayloadError> {
    let mut name = PartName::new();
    for unit in raw.chunks_exact(2).take(PART_NAME_WIRE_CHARS) {
        let code = u16::from_le_bytes([unit[0], unit[1]]);
        if code == 0 {
            break;
        }
        let ch = u8::try_from(code)
            .ok()
            .filter(u8::is_ascii)
            .ok_or(PayloadError::BadName)?;
        name.push(ch as char).map_err(|_| PayloadError::NameTooLong)?;
    }
    Ok(name)
}

/// Encode `name` into a 72-byte UTF-16LE field.
pub fn encode_wide_name(name: &str, out: &mut Vec<u8>) -> Result<(), PayloadError> {
    if !name.is_ascii() {
        return Err(PayloadError::BadName);
    }
    if name.len() > PART_NAME_WIRE_CHARS {
        return Err(PayloadError::NameTooLong);
    }
    let start = out.len();
    for b in name.bytes() {
        out.extend_from_slice(&(b as u16).to_le_bytes());
    }
    out.resize(start + PART_NAME_WIRE_LEN, 0);
    Ok(())
}

/// Build a [`PartName`], rejecting non-ASCII or overlong input.
pub fn part_name(name: &str) -> Result<PartName, PayloadError> {
    if !name.is_ascii() {
        return Err(PayloadError::BadName);
    }
    PartName::try_from(name).map_err(|_| PayloadError::NameTooLong)
}

// --- START_DATA ---

/// Where a download lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferTarget {
    /// Staged in RAM for execution (romcode and fdl1).
    Address(u64),
    /// Written to a named partition (fdl2).
    Partition(PartName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub target: TransferTarget,
    pub size: u64,
    /// Additive checksum of the whole image, as announced by the host.
    pub checksum: u32,
}

impl TransferRequest {
    pub const ROMCODE_LEN: usize = 8;
    pub const FDL1_LEN: usize = 16;
    pub const FDL2_LEN: usize = PART_NAME_WIRE_LEN + 8 + 8 + 4;

    pub fn decode(stage: ProtocolStage, bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new("start-data", bytes);
        match stage {
            ProtocolStage::Romcode => {
                let addr = r.u32()? as u64;
                let size = r.u32()? as u64;
                Ok(Self {
                    target: TransferTarget::Address(addr),
                    size,
                    checksum: 0,
                })
            }
            ProtocolStage::Fdl1 => {
                let addr = r.u64()?;
                let size = r.u64()?;
                Ok(Self {
                    target: TransferTarget::Address(addr),
                    size,
                    checksum: 0,
                })
            }
            ProtocolStage::Fdl2 => {
                let name = r.name()?;
                let size = r.u64()?;
                let _reserved = r.u64()?;
                let checksum = r.u32()?;
                Ok(Self {
                    target: TransferTarget::Partition(name),
                    size,
                    checksum,
                })
            }
        }
    }

    pub fn encode(&self, stage: ProtocolStage) -> Result<Vec<u8>, PayloadError> {
        let mut out = Vec::with_capacity(Self::FDL2_LEN);
        match (&self.target, stage) {
            (TransferTarget::Address(addr), ProtocolStage::Romcode) => {
                out.extend_from_slice(&narrow(*addr)?.to_le_bytes());
                out.extend_from_slice(&narrow(self.size)?.to_le_bytes());
            }
            (TransferTarget::Address(addr), ProtocolStage::Fdl1) => {
                out.extend_from_slice(&addr.to_le_bytes());
                out.extend_from_slice(&self.size.to_le_bytes());
            }
            (TransferTarget::Partition(name), ProtocolStage::Fdl2) => {
                encode_wide_name(name, &mut out)?;
                out.extend_from_slice(&self.size.to_le_bytes());
                out.extend_from_slice(&0u64.to_le_bytes());
                out.extend_from_slice(&self.checksum.to_le_bytes());
            }
            (TransferTarget::Address(_), _) => return Err(PayloadError::StageMismatch("address")),
            (TransferTarget::Partition(_), _) => {
                return Err(PayloadError::StageMismatch("partition"))
            }
        }
        Ok(out)
    }
}

fn narrow(value: u64) -> Result<u32, PayloadError> {
    u32::try_from(value).map_err(|_| PayloadError::FieldOverflow(value))
}

// --- MID_DATA (raw mode) ---

/// Header announcing a block of raw bytes that follows outside any frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawTransfer {
    pub len: u32,
    pub checksum_enabled: bool,
    pub checksum: u32,
}

impl RawTransfer {
    pub const LEN: usize = 12;

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new("raw-data", bytes);
        Ok(Self {
            len: r.u32()?,
            checksum_enabled: r.u32()? != 0,
            checksum: r.u32()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&self.len.to_le_bytes());
        out.extend_from_slice(&(self.checksum_enabled as u32).to_le_bytes());
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out
    }
}

// --- ERASE ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseScope {
    /// Every device of the boot configuration.
    All,
    /// One partition; `size` of 0 or `u64::MAX` means all of it.
    Partition { name: PartName, size: u64 },
}

impl EraseScope {
    pub const LEN: usize = 8 + PART_NAME_WIRE_LEN + 8;

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new("erase", bytes);
        let flag = r.u64()?;
        let name = r.name()?;
        let size = r.u64()?;
        if flag != 0 {
            Ok(EraseScope::All)
        } else {
            Ok(EraseScope::Partition { name, size })
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let mut out = Vec::with_capacity(Self::LEN);
        match self {
            EraseScope::All => {
                out.extend_from_slice(&1u64.to_le_bytes());
                encode_wide_name("", &mut out)?;
                out.extend_from_slice(&0u64.to_le_bytes());
            }
            EraseScope::Partition { name, size } => {
                out.extend_from_slice(&0u64.to_le_bytes());
                encode_wide_name(name, &mut out)?;
                out.extend_from_slice(&size.to_le_bytes());
            }
        }
        Ok(out)
    }
}

// --- REPARTITION ---

/// One `{name, size, gap}` entry, sizes in the header's unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub name: PartName,
    pub size: u64,
    pub gap: u64,
}

impl PartitionDescriptor {
    pub const LEN: usize = PART_NAME_WIRE_LEN + 8 + 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionHeader {
    pub magic: u32,
    pub version: u8,
    pub unit: SizeUnit,
    pub count: u16,
}

impl PartitionHeader {
    pub const LEN: usize = 8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepartitionRequest {
    pub header: PartitionHeader,
    pub descriptors: Vec<PartitionDescriptor>,
}

impl RepartitionRequest {
    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new("repartition", bytes);
        let magic = r.u32()?;
        let version = r.u8()?;
        let raw_unit = r.u8()?;
        let unit = SizeUnit::from_wire(raw_unit).ok_or(PayloadError::UnknownUnit(raw_unit))?;
        let count = r.u16()?;

        let expected = PartitionHeader::LEN + count as usize * PartitionDescriptor::LEN;
        if bytes.len() < expected {
            return Err(PayloadError::Truncated {
                what: "repartition",
                expected,
                actual: bytes.len(),
            });
        }

        let mut descriptors = Vec::with_capacity(count as usize);
        for _ in 0..count {
            descriptors.push(PartitionDescriptor {
                name: r.name()?,
                size: r.u64()?,
                gap: r.u64()?,
            });
        }

        Ok(Self {
            header: PartitionHeader {
                magic,
                version,
                unit,
                count,
            },
            descriptors,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let count = u16::try_from(self.descriptors.len())
            .map_err(|_| PayloadError::FieldOverflow(self.descriptors.len() as u64))?;
        let mut out =
            Vec::with_capacity(PartitionHeader::LEN + self.descriptors.len() * PartitionDescriptor::LEN);
        out.extend_from_slice(&self.header.magic.to_le_bytes());
        out.push(self.header.version);
        out.push(self.header.unit.to_wire());
        out.extend_from_slice(&count.to_le_bytes());
        for d in &self.descriptors {
            encode_wide_name(&d.name, &mut out)?;
            out.extend_from_slice(&d.size.to_le_bytes());
            out.extend_from_slice(&d.gap.to_le_bytes());
        }
        Ok(out)
    }
}

// --- Read-back and misc ---

/// START_READ: read `size` bytes of `name` starting at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub name: PartName,
    pub size: u64,
    pub offset: u64,
}

impl ReadRequest {
    pub const LEN: usize = PART_NAME_WIRE_LEN + 8 + 8;

    pub fn decode(bytes: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new("start-read", bytes);
        Ok(Self {
            name: r.name()?,
            size: r.u64()?,
            offset: r.u64()?,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        let mut out = Vec::with_capacity(Self::LEN);
        encode_wide_name(&self.name, &mut out)?;
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        Ok(out)
    }
}

/// Decode a single little-endian u32 payload (MID_READ length, SET_BAUD rate).
pub fn decode_u32(what: &'static str, bytes: &[u8]) -> Result<u32, PayloadError> {
    Reader::new(what, bytes).u32()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_name_stops_at_nul() {
        let mut raw = Vec::new();
        encode_wide_name("boot_a", &mut raw).unwrap();
        assert_eq!(raw.len(), PART_NAME_WIRE_LEN);
        assert_eq!(decode_wide_name(&raw).unwrap().as_str(), "boot_a");
    }

    #[test]
    fn test_wide_name_rejects_non_ascii() {
        let mut raw = alloc::vec![0u8; PART_NAME_WIRE_LEN];
        raw[0..2].copy_from_slice(&0x00E9u16.to_le_bytes());
        assert_eq!(decode_wide_name(&raw), Err(PayloadError::BadName));
    }

    #[test]
    fn test_wide_name_full_length_without_nul() {
        let raw: Vec<u8> = core::iter::repeat([b'x', 0])
            .take(PART_NAME_WIRE_CHARS)
            .flatten()
            .collect();
        assert_eq!(decode_wide_name(&raw).unwrap().len(), PART_NAME_WIRE_CHARS);
    }
}
