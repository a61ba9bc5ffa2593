// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! A/B boot control metadata (`bootloader_control`).
//!
//! The 32-byte record lives 2048 bytes into the `misc` partition, right
//! after the bootloader message. [`AbcContext`] holds the loaded copy and
//! its location, and applies the slot mutations. Mutations only touch the
//! in-memory record; the caller decides when to [`AbcContext::store`].

use alloc::string::String;

use crc::{Crc, CRC_32_ISO_HDLC};
use log::{debug, info, warn};
use thiserror::Error;

use crate::storage::{read_bytes, write_bytes, BlockDevice, PartitionInfo, StorageError};

pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// `"BACB"` little-endian.
pub const BOOT_CTRL_MAGIC: u32 = 0x4241_4342;
pub const BOOT_CTRL_VERSION: u8 = 1;
pub const MAX_SLOTS: usize = 4;
/// Slots the mutation commands support.
pub const NUM_SLOTS: u8 = 2;

pub const CONTROL_LEN: usize = 32;
/// Byte offset of the record inside `misc`.
pub const CONTROL_OFFSET: u64 = 2048;

pub const MAX_PRIORITY: u8 = 15;
pub const MAX_TRIES: u8 = 7;

const CRC_OFFSET: usize = CONTROL_LEN - 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AbcError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid A/B metadata: {0}")]
    InvalidMetadata(&'static str),
    #[error("no A/B metadata loaded")]
    NoData,
    #[error("invalid slot {0}")]
    InvalidSlot(u8),
    #[error("invalid slot '{0}'")]
    BadSlotToken(String),
    #[error("no active slot recorded")]
    NoActiveSlot,
    #[error("no bootable slot")]
    NoBootableSlot,
    #[error("partition of {size} bytes cannot hold {needed}")]
    PartitionTooSmall { size: u64, needed: u64 },
}

/// Per-slot state, two bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotMetadata {
    pub priority: u8,
    pub tries_remaining: u8,
    pub successful_boot: bool,
    pub verity_corrupted: bool,
    reserved: u8,
}

impl SlotMetadata {
    fn from_bytes(b: [u8; 2]) -> Self {
        Self {
            priority: b[0] & 0x0F,
            tries_remaining: (b[0] >> 4) & 0x07,
            successful_boot: b[0] & 0x80 != 0,
            verity_corrupted: b[1] & 0x01 != 0,
            reserved: b[1] >> 1,
        }
    }

    fn to_bytes(self) -> [u8; 2] {
        [
            (self.priority & 0x0F)
                | ((self.tries_remaining & 0x07) << 4)
                | ((self.successful_boot as u8) << 7),
            (self.verity_corrupted as u8) | (self.reserved << 1),
        ]
    }

    /// Has priority and either a successful boot or tries left.
    pub fn is_bootable(&self) -> bool {
        self.priority > 0 && (self.successful_boot || self.tries_remaining > 0)
    }
}

/// The `bootloader_control` record. Unused bits survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderControl {
    pub slot_suffix: [u8; 4],
    pub magic: u32,
    pub version: u8,
    pub nb_slot: u8,
    pub recovery_tries_remaining: u8,
    pub merge_status: u8,
    /// Bits of byte 10 above `merge_status`, and `reserved0`.
    spare: [u8; 2],
    pub slot_info: [SlotMetadata; MAX_SLOTS],
    reserved1: [u8; 8],
    pub crc32_le: u32,
}

impl BootloaderControl {
    /// Fresh record: two slots at top priority with full tries, slot A current.
    pub fn default_new() -> Self {
        let slot = SlotMetadata {
            priority: MAX_PRIORITY,
            tries_remaining: MAX_TRIES,
            ..SlotMetadata::default()
        };
        let mut abc = Self {
            slot_suffix: *b"_a\0\0",
            magic: BOOT_CTRL_MAGIC,
            version: BOOT_CTRL_VERSION,
            nb_slot: NUM_SLOTS,
            recovery_tries_remaining: 0,
            merge_status: 0,
            spare: [0; 2],
            slot_info: [slot, slot, SlotMetadata::default(), SlotMetadata::default()],
            reserved1: [0; 8],
            crc32_le: 0,
        };
        abc.update_crc();
        abc
    }

    pub fn from_bytes(b: &[u8; CONTROL_LEN]) -> Self {
        let packed = u16::from_le_bytes([b[9], b[10]]);
        let mut slot_info = [SlotMetadata::default(); MAX_SLOTS];
        for (i, slot) in slot_info.iter_mut().enumerate() {
            *slot = SlotMetadata::from_bytes([b[12 + 2 * i], b[13 + 2 * i]]);
        }
        let mut reserved1 = [0u8; 8];
        reserved1.copy_from_slice(&b[20..28]);

        Self {
            slot_suffix: [b[0], b[1], b[2], b[3]],
            magic: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
            version: b[8],
            nb_slot: (packed & 0x7) as u8,
            recovery_tries_remaining: ((packed >> 3) & 0x7) as u8,
            merge_status: ((packed >> 6) & 0x7) as u8,
            spare: [b[10] >> 1, b[11]],
            slot_info,
            reserved1,
            crc32_le: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; CONTROL_LEN] {
        let mut b = [0u8; CONTROL_LEN];
        b[..4].copy_from_slice(&self.slot_suffix);
        b[4..8].copy_from_slice(&self.magic.to_le_bytes());
        b[8] = self.version;
        let packed = (self.nb_slot as u16 & 0x7)
            | ((self.recovery_tries_remaining as u16 & 0x7) << 3)
            | ((self.merge_status as u16 & 0x7) << 6);
        b[9] = packed as u8;
        b[10] = (packed >> 8) as u8 | (self.spare[0] << 1);
        b[11] = self.spare[1];
        for (i, slot) in self.slot_info.iter().enumerate() {
            b[12 + 2 * i..14 + 2 * i].copy_from_slice(&slot.to_bytes());
        }
        b[20..28].copy_from_slice(&self.reserved1);
        b[28..].copy_from_slice(&self.crc32_le.to_le_bytes());
        b
    }

    /// CRC-32 over every byte before `crc32_le`.
    pub fn compute_crc(&self) -> u32 {
        CRC32.checksum(&self.to_bytes()[..CRC_OFFSET])
    }

    pub fn update_crc(&mut self) {
        self.crc32_le = self.compute_crc();
    }

    /// Check CRC, magic, version and slot count, in that order.
    pub fn validate(&self) -> Result<(), AbcError> {
        let computed = self.compute_crc();
        if computed != self.crc32_le {
            warn!(
                "abc: invalid CRC32 (expected {:08x}, found {:08x})",
                computed, self.crc32_le
            );
            return Err(AbcError::InvalidMetadata("crc mismatch"));
        }
        if self.magic != BOOT_CTRL_MAGIC {
            return Err(AbcError::InvalidMetadata("bad magic"));
        }
        if self.version > BOOT_CTRL_VERSION {
            return Err(AbcError::InvalidMetadata("unsupported version"));
        }
        if self.nb_slot as usize > MAX_SLOTS {
            return Err(AbcError::InvalidMetadata("too many slots"));
        }
        Ok(())
    }

    /// Decode and validate.
    pub fn parse(bytes: &[u8]) -> Result<Self, AbcError> {
        let raw: &[u8; CONTROL_LEN] = bytes
            .get(..CONTROL_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(AbcError::InvalidMetadata("short record"))?;
        let abc = Self::from_bytes(raw);
        abc.validate()?;
        Ok(abc)
    }

    /// Slot named by the first suffix letter, skipping the `_` separator.
    pub fn active_slot(&self) -> Result<u8, AbcError> {
        let letter = self
            .slot_suffix
            .iter()
            .copied()
            .find(|&c| c != 0 && c != b'_')
            .ok_or(AbcError::NoActiveSlot)?;
        let slot = letter.to_ascii_uppercase().wrapping_sub(b'A');
        if slot as usize >= MAX_SLOTS || slot >= self.nb_slot {
            return Err(AbcError::InvalidSlot(slot));
        }
        Ok(slot)
    }

    pub fn set_current_slot(&mut self, slot: u8) {
        self.slot_suffix = [b'_', b'a' + slot, 0, 0];
    }
}

/// Parse a slot token: `0`, `1`, `a`, `b`, `A` or `B`.
pub fn parse_slot(token: &str) -> Result<u8, AbcError> {
    match token.as_bytes().first().map(u8::to_ascii_uppercase) {
        Some(b'0') | Some(b'A') => Ok(0),
        Some(b'1') | Some(b'B') => Ok(1),
        _ => Err(AbcError::BadSlotToken(String::from(token))),
    }
}

/// Printable slot name, `A` for slot 0.
pub fn slot_name(slot: u8) -> char {
    (b'A' + slot) as char
}

/// Boot suffix for a slot.
pub fn slot_suffix(slot: u8) -> Result<&'static str, AbcError> {
    match slot {
        0 => Ok("_a"),
        1 => Ok("_b"),
        other => Err(AbcError::InvalidSlot(other)),
    }
}

/// The loaded record plus where it came from.
#[derive(Debug, Default, Clone)]
pub struct AbcContext {
    control: Option<BootloaderControl>,
    location: Option<PartitionInfo>,
    dirty: bool,
}

impl AbcContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.control.is_some()
    }

    /// Modified since the last load or store.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Partition the record was loaded from, `None` for a message buffer.
    pub fn location(&self) -> Option<&PartitionInfo> {
        self.location.as_ref()
    }

    pub fn control(&self) -> Result<&BootloaderControl, AbcError> {
        self.control.as_ref().ok_or(AbcError::NoData)
    }

    fn control_mut(&mut self) -> Result<&mut BootloaderControl, AbcError> {
        self.control.as_mut().ok_or(AbcError::NoData)
    }

    fn check_room(part: &PartitionInfo) -> Result<(), AbcError> {
        let needed = CONTROL_OFFSET + CONTROL_LEN as u64;
        if part.size_bytes() < needed {
            return Err(AbcError::PartitionTooSmall {
                size: part.size_bytes(),
                needed,
            });
        }
        Ok(())
    }

    /// Read and validate the record in `part`. A failed load keeps the
    /// previous state.
    pub fn load(&mut self, dev: &mut dyn BlockDevice, part: &PartitionInfo) -> Result<(), AbcError> {
        Self::check_room(part)?;
        let bytes = read_bytes(dev, part, CONTROL_OFFSET, CONTROL_LEN)?;
        let control = BootloaderControl::parse(&bytes)?;

        self.control = Some(control);
        self.location = Some(part.clone());
        self.dirty = false;
        info!("abc: loaded from '{}'", part.name);
        Ok(())
    }

    /// Take the record embedded in a bootloader message.
    pub fn load_from_message(&mut self, control_bytes: &[u8]) -> Result<(), AbcError> {
        let control = BootloaderControl::parse(control_bytes)?;
        self.control = Some(control);
        self.location = None;
        self.dirty = false;
        info!("abc: loaded from message buffer");
        Ok(())
    }

    /// Refresh the CRC and write the record back into `part`.
    pub fn store(&mut self, dev: &mut dyn BlockDevice, part: &PartitionInfo) -> Result<(), AbcError> {
        Self::check_room(part)?;
        let control = self.control_mut()?;
        control.update_crc();
        let bytes = control.to_bytes();
        write_bytes(dev, part, CONTROL_OFFSET, &bytes)?;
        self.dirty = false;
        info!("abc: stored into '{}'", part.name);
        Ok(())
    }

    /// Refresh the CRC and return the bytes for a message buffer.
    pub fn store_to_message(&mut self) -> Result<[u8; CONTROL_LEN], AbcError> {
        let control = self.control_mut()?;
        control.update_crc();
        let bytes = control.to_bytes();
        self.dirty = false;
        Ok(bytes)
    }

    pub fn slot_count(&self) -> Result<u8, AbcError> {
        Ok(self.control()?.nb_slot)
    }

    pub fn active_slot(&self) -> Result<u8, AbcError> {
        self.control()?.active_slot()
    }

    /// The slot a token names, or the active slot without a token.
    pub fn resolve_slot(&self, token: Option<&str>) -> Result<u8, AbcError> {
        self.control()?;
        match token {
            Some(token) => parse_slot(token),
            None => self.active_slot(),
        }
    }

    fn slot_mut(&mut self, slot: u8) -> Result<&mut SlotMetadata, AbcError> {
        if slot >= NUM_SLOTS {
            return Err(AbcError::InvalidSlot(slot));
        }
        Ok(&mut self.control_mut()?.slot_info[slot as usize])
    }

    fn slot(&self, slot: u8) -> Result<&SlotMetadata, AbcError> {
        if slot >= NUM_SLOTS {
            return Err(AbcError::InvalidSlot(slot));
        }
        Ok(&self.control()?.slot_info[slot as usize])
    }

    pub fn mark_successful(&mut self, slot: u8) -> Result<(), AbcError> {
        let meta = self.slot_mut(slot)?;
        meta.successful_boot = true;
        meta.tries_remaining = MAX_TRIES;
        self.dirty = true;
        info!("abc: slot {} marked as successful", slot_name(slot));
        Ok(())
    }

    /// Make `slot` the next boot target; the other slot drops below it if
    /// both sat at top priority.
    pub fn set_active(&mut self, slot: u8) -> Result<(), AbcError> {
        let meta = self.slot_mut(slot)?;
        meta.priority = MAX_PRIORITY;
        meta.tries_remaining = MAX_TRIES;
        meta.successful_boot = false;

        let other = self.slot_mut(1 - slot)?;
        if other.priority == MAX_PRIORITY {
            other.priority = MAX_PRIORITY - 1;
        }
        self.dirty = true;
        info!("abc: slot {} marked as next active", slot_name(slot));
        Ok(())
    }

    pub fn set_unbootable(&mut self, slot: u8) -> Result<(), AbcError> {
        let meta = self.slot_mut(slot)?;
        meta.successful_boot = false;
        meta.priority = 0;
        meta.tries_remaining = 0;
        self.dirty = true;
        info!("abc: slot {} marked as unbootable", slot_name(slot));
        Ok(())
    }

    pub fn is_bootable(&self, slot: u8) -> Result<bool, AbcError> {
        Ok(self.slot(slot)?.priority != 0)
    }

    pub fn is_successful(&self, slot: u8) -> Result<bool, AbcError> {
        Ok(self.slot(slot)?.successful_boot)
    }

    /// Replace the record, e.g. after slot selection.
    pub fn replace(&mut self, control: BootloaderControl) -> Result<(), AbcError> {
        let current = self.control_mut()?;
        if *current != control {
            debug!("abc: record updated");
            *current = control;
            self.dirty = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_record_is_valid() {
        let abc = BootloaderControl::default_new();
        assert!(abc.validate().is_ok());
        assert_eq!(abc.active_slot(), Ok(0));
    }

    #[test]
    fn test_packed_fields_survive_bytes() {
        let mut abc = BootloaderControl::default_new();
        abc.recovery_tries_remaining = 5;
        abc.merge_status = 0b101;
        abc.slot_info[1].verity_corrupted = true;
        let bytes = abc.to_bytes();
        // merge_status straddles bytes 9 and 10
        assert_eq!(bytes[9] >> 6, 0b01);
        assert_eq!(bytes[10] & 1, 1);
        assert_eq!(BootloaderControl::from_bytes(&bytes), abc);
    }

    #[test]
    fn test_reserved_bits_preserved() {
        let mut raw = BootloaderControl::default_new().to_bytes();
        raw[10] |= 0xF0;
        raw[11] = 0x5A;
        raw[13] |= 0x80;
        raw[20] = 0x11;
        let abc = BootloaderControl::from_bytes(&raw);
        assert_eq!(abc.to_bytes(), raw);
    }

    #[test]
    fn test_slot_tokens() {
        assert_eq!(parse_slot("a"), Ok(0));
        assert_eq!(parse_slot("B"), Ok(1));
        assert_eq!(parse_slot("1"), Ok(1));
        assert!(parse_slot("c").is_err());
        assert!(parse_slot("").is_err());
    }
}
