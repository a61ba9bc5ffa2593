// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Android bootloader control block (`bootloader_message`) editing.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Write;
use core::ops::Range;

use log::info;
use thiserror::Error;

use crate::storage::{read_bytes, write_bytes, BlockDevice, PartitionInfo, StorageError};

pub const MESSAGE_LEN: usize = 2048;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BcbError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no BCB loaded")]
    NotLoaded,
    #[error("unknown BCB field '{0}'")]
    UnknownField(String),
    #[error("value of {len} bytes does not fit bcb.{field} ({size} bytes)")]
    ValueTooLong {
        field: &'static str,
        len: usize,
        size: usize,
    },
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("BCB needs {needed} bytes, message is {actual}")]
    BadLength { needed: usize, actual: usize },
    #[error("partition of {size} bytes cannot hold {needed}")]
    PartitionTooSmall { size: u64, needed: u64 },
}

/// Fields of the bootloader message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcbField {
    Command,
    Status,
    Recovery,
    Stage,
    Reserved,
}

impl BcbField {
    pub const ALL: [BcbField; 5] = [
        BcbField::Command,
        BcbField::Status,
        BcbField::Recovery,
        BcbField::Stage,
        BcbField::Reserved,
    ];

    pub fn range(self) -> Range<usize> {
        match self {
            BcbField::Command => 0..32,
            BcbField::Status => 32..64,
            BcbField::Recovery => 64..832,
            BcbField::Stage => 832..864,
            BcbField::Reserved => 864..MESSAGE_LEN,
        }
    }

    pub fn size(self) -> usize {
        self.range().len()
    }

    pub fn name(self) -> &'static str {
        match self {
            BcbField::Command => "command",
            BcbField::Status => "status",
            BcbField::Recovery => "recovery",
            BcbField::Stage => "stage",
            BcbField::Reserved => "reserved",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, BcbError> {
        Self::ALL
            .into_iter()
            .find(|f| f.name() == name)
            .ok_or_else(|| BcbError::UnknownField(String::from(name)))
    }
}

/// `bcb test` operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOp {
    /// `=`: the field equals the value.
    Equal,
    /// `~`: the field contains the value.
    Contains,
}

impl TestOp {
    pub fn parse(op: &str) -> Result<Self, BcbError> {
        match op {
            "=" => Ok(TestOp::Equal),
            "~" => Ok(TestOp::Contains),
            other => Err(BcbError::UnknownOperator(String::from(other))),
        }
    }
}

/// A 2048-byte bootloader message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderMessage {
    bytes: Vec<u8>,
}

impl Default for BootloaderMessage {
    fn default() -> Self {
        Self {
            bytes: vec![0; MESSAGE_LEN],
        }
    }
}

impl BootloaderMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BcbError> {
        let bytes = bytes.get(..MESSAGE_LEN).ok_or(BcbError::BadLength {
            needed: MESSAGE_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn field(&self, field: BcbField) -> &[u8] {
        &self.bytes[field.range()]
    }

    /// Field content up to the first NUL.
    pub fn field_str(&self, field: BcbField) -> &str {
        let raw = self.field(field);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        core::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    /// Replace a field. `:` separates lines; the value must leave room for
    /// the terminating NUL.
    pub fn set(&mut self, field: BcbField, value: &str) -> Result<(), BcbError> {
        if value.len() >= field.size() {
            return Err(BcbError::ValueTooLong {
                field: field.name(),
                len: value.len(),
                size: field.size(),
            });
        }
        let slot = &mut self.bytes[field.range()];
        slot.fill(0);
        for (dst, src) in slot.iter_mut().zip(value.bytes()) {
            *dst = if src == b':' { b'\n' } else { src };
        }
        Ok(())
    }

    /// Zero one field, or the whole message.
    pub fn clear(&mut self, field: Option<BcbField>) {
        match field {
            Some(field) => self.bytes[field.range()].fill(0),
            None => self.bytes.fill(0),
        }
    }

    pub fn test(&self, field: BcbField, op: TestOp, value: &str) -> bool {
        let content = self.field_str(field);
        match op {
            TestOp::Equal => content == value,
            TestOp::Contains => content.contains(value),
        }
    }

    /// Hex dump of one field or the whole message, 16 bytes per line,
    /// offsets relative to the message start.
    pub fn dump(&self, field: Option<BcbField>) -> String {
        let range = field.map(BcbField::range).unwrap_or(0..MESSAGE_LEN);
        let mut out = String::new();
        for (i, line) in self.bytes[range.clone()].chunks(16).enumerate() {
            let _ = write!(out, "{:08x}:", range.start + i * 16);
            for b in line {
                let _ = write!(out, " {:02x}", b);
            }
            for _ in line.len()..16 {
                out.push_str("   ");
            }
            out.push_str("    ");
            out.extend(line.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }
}

/// The loaded message plus its partition.
#[derive(Debug, Default, Clone)]
pub struct BcbContext {
    message: Option<BootloaderMessage>,
    location: Option<PartitionInfo>,
    dirty: bool,
}

impl BcbContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.message.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn location(&self) -> Option<&PartitionInfo> {
        self.location.as_ref()
    }

    pub fn message(&self) -> Result<&BootloaderMessage, BcbError> {
        self.message.as_ref().ok_or(BcbError::NotLoaded)
    }

    fn message_mut(&mut self) -> Result<&mut BootloaderMessage, BcbError> {
        self.message.as_mut().ok_or(BcbError::NotLoaded)
    }

    fn check_room(part: &PartitionInfo) -> Result<(), BcbError> {
        if part.size_bytes() < MESSAGE_LEN as u64 {
            return Err(BcbError::PartitionTooSmall {
                size: part.size_bytes(),
                needed: MESSAGE_LEN as u64,
            });
        }
        Ok(())
    }

    pub fn load(&mut self, dev: &mut dyn BlockDevice, part: &PartitionInfo) -> Result<(), BcbError> {
        Self::check_room(part)?;
        let bytes = read_bytes(dev, part, 0, MESSAGE_LEN)?;
        self.message = Some(BootloaderMessage::from_bytes(&bytes)?);
        self.location = Some(part.clone());
        self.dirty = false;
        info!("bcb: loaded from '{}'", part.name);
        Ok(())
    }

    pub fn load_from_message(&mut self, message: BootloaderMessage) {
        self.message = Some(message);
        self.location = None;
        self.dirty = false;
    }

    /// Write the message back, keeping the rest of the covering blocks.
    pub fn store(&mut self, dev: &mut dyn BlockDevice, part: &PartitionInfo) -> Result<(), BcbError> {
        Self::check_room(part)?;
        write_bytes(dev, part, 0, self.message()?.as_bytes())?;
        self.dirty = false;
        info!("bcb: stored into '{}'", part.name);
        Ok(())
    }

    pub fn set(&mut self, field: &str, value: &str) -> Result<(), BcbError> {
        let field = BcbField::from_name(field)?;
        self.message_mut()?.set(field, value)?;
        self.dirty = true;
        Ok(())
    }

    pub fn clear(&mut self, field: Option<&str>) -> Result<(), BcbError> {
        let field = field.map(BcbField::from_name).transpose()?;
        self.message_mut()?.clear(field);
        self.dirty = true;
        Ok(())
    }

    pub fn test(&self, field: &str, op: &str, value: &str) -> Result<bool, BcbError> {
        let field = BcbField::from_name(field)?;
        let op = TestOp::parse(op)?;
        Ok(self.message()?.test(field, op, value))
    }

    pub fn dump(&self, field: Option<&str>) -> Result<String, BcbError> {
        let field = field.map(BcbField::from_name).transpose()?;
        Ok(self.message()?.dump(field))
    }
}

/// One-line summary used by the CLI.
pub fn describe(message: &BootloaderMessage) -> String {
    format!(
        "command='{}' status='{}' stage='{}'",
        message.field_str(BcbField::Command),
        message.field_str(BcbField::Status),
        message.field_str(BcbField::Stage)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_layout_covers_message() {
        let total: usize = BcbField::ALL.iter().map(|f| f.size()).sum();
        assert_eq!(total, MESSAGE_LEN);
    }

    #[test]
    fn test_dump_line_format() {
        let mut msg = BootloaderMessage::default();
        msg.set(BcbField::Command, "boot-recovery").unwrap();
        let dump = msg.dump(Some(BcbField::Command));
        let first = dump.lines().next().unwrap();
        assert!(first.starts_with("00000000: 62 6f 6f 74"));
        assert!(first.ends_with("boot-rec"));
        assert_eq!(dump.lines().count(), 2);
    }
}
