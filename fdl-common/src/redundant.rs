// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Redundant AB bootloader message (`bootloader_message_ab`).
//!
//! Two 4096-byte copies live at the start of `misc` and `misc_bak`. Each
//! copy carries an 8-bit serial (`flags`) and a CRC over everything before
//! it. Loading keeps the newer valid copy; storing always overwrites the
//! other one, so an interrupted write leaves the previous state readable.

use alloc::vec;
use alloc::vec::Vec;

use log::{debug, info, warn};
use thiserror::Error;

use crate::abc::{BootloaderControl, CONTROL_LEN, CRC32};
use crate::bcb::{BootloaderMessage, MESSAGE_LEN};
use crate::partition::DiskName;
use crate::storage::{read_exact_blocks, write_exact_blocks, BlockDevice, PartitionInfo, StorageError};

pub const MESSAGE_AB_LEN: usize = 4096;
pub const PRIMARY_PART: &str = "misc";
pub const REDUNDANT_PART: &str = "misc_bak";

const SLOT_SUFFIX_OFFSET: usize = MESSAGE_LEN;
const SLOT_SUFFIX_LEN: usize = 32;
const UPDATE_CHANNEL_OFFSET: usize = SLOT_SUFFIX_OFFSET + SLOT_SUFFIX_LEN;
const UPDATE_CHANNEL_LEN: usize = 128;
const FLAGS_OFFSET: usize = 4091;
const CRC_OFFSET: usize = 4092;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no valid AB bootloader message copy found")]
    NoValidCopy,
    #[error("both AB bootloader message copies are corrupted")]
    Corrupted,
    #[error("partition '{name}' holds {size} bytes, message needs {needed}")]
    PartitionTooSmall {
        name: DiskName,
        size: u64,
        needed: u64,
    },
    #[error("message size is not a multiple of the {0}-byte block")]
    Unaligned(u32),
}

/// One 4096-byte copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderMessageAb {
    bytes: Vec<u8>,
}

impl Default for BootloaderMessageAb {
    fn default() -> Self {
        Self {
            bytes: vec![0; MESSAGE_AB_LEN],
        }
    }
}

impl BootloaderMessageAb {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..MESSAGE_AB_LEN)?;
        Some(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn message(&self) -> BootloaderMessage {
        // The first MESSAGE_LEN bytes always exist.
        BootloaderMessage::from_bytes(&self.bytes[..MESSAGE_LEN]).unwrap_or_default()
    }

    pub fn set_message(&mut self, message: &BootloaderMessage) {
        self.bytes[..MESSAGE_LEN].copy_from_slice(message.as_bytes());
    }

    /// The control record held in the `slot_suffix` area.
    pub fn control_bytes(&self) -> &[u8] {
        &self.bytes[SLOT_SUFFIX_OFFSET..SLOT_SUFFIX_OFFSET + CONTROL_LEN]
    }

    pub fn set_control(&mut self, control: &BootloaderControl) {
        self.bytes[SLOT_SUFFIX_OFFSET..SLOT_SUFFIX_OFFSET + CONTROL_LEN]
            .copy_from_slice(&control.to_bytes());
    }

    pub fn update_channel(&self) -> &[u8] {
        &self.bytes[UPDATE_CHANNEL_OFFSET..UPDATE_CHANNEL_OFFSET + UPDATE_CHANNEL_LEN]
    }

    pub fn flags(&self) -> u8 {
        self.bytes[FLAGS_OFFSET]
    }

    pub fn crc32_le(&self) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[CRC_OFFSET..]);
        u32::from_le_bytes(raw)
    }

    pub fn compute_crc(&self) -> u32 {
        CRC32.checksum(&self.bytes[..CRC_OFFSET])
    }

    pub fn is_valid(&self) -> bool {
        self.compute_crc() == self.crc32_le()
    }

    /// Stamp the serial and the CRC.
    pub fn seal(&mut self, flags: u8) {
        self.bytes[FLAGS_OFFSET] = flags;
        let crc = self.compute_crc();
        self.bytes[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    }
}

/// Which copy holds the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyId {
    Primary,
    Redundant,
}

impl CopyId {
    pub fn other(self) -> Self {
        match self {
            CopyId::Primary => CopyId::Redundant,
            CopyId::Redundant => CopyId::Primary,
        }
    }
}

/// Pick the copy to trust. `None` stands for a copy that could not be read.
pub fn select_copy(
    primary: Option<&BootloaderMessageAb>,
    redundant: Option<&BootloaderMessageAb>,
) -> Result<CopyId, MessageError> {
    let (p, r) = match (primary, redundant) {
        (None, None) => return Err(MessageError::NoValidCopy),
        (Some(p), None) => {
            warn!("abmsg: redundant copy unreadable, using primary");
            return if p.is_valid() {
                Ok(CopyId::Primary)
            } else {
                Err(MessageError::Corrupted)
            };
        }
        (None, Some(r)) => {
            warn!("abmsg: primary copy unreadable, using redundant");
            return if r.is_valid() {
                Ok(CopyId::Redundant)
            } else {
                Err(MessageError::Corrupted)
            };
        }
        (Some(p), Some(r)) => (p, r),
    };

    match (p.is_valid(), r.is_valid()) {
        (true, false) => Ok(CopyId::Primary),
        (false, true) => Ok(CopyId::Redundant),
        (false, false) => Err(MessageError::Corrupted),
        (true, true) => Ok(newer(p.flags(), r.flags())),
    }
}

// Serial comparison; 255 -> 0 is a wrap, not a regression.
fn newer(primary: u8, redundant: u8) -> CopyId {
    match (primary, redundant) {
        (255, 0) => CopyId::Redundant,
        (0, 255) => CopyId::Primary,
        (p, r) if r > p => CopyId::Redundant,
        _ => CopyId::Primary,
    }
}

/// The two copy locations plus the currently trusted copy.
#[derive(Debug, Clone)]
pub struct RedundantStore {
    primary: PartitionInfo,
    redundant: PartitionInfo,
    valid: Option<CopyId>,
    flags: u8,
}

impl RedundantStore {
    pub fn new(primary: PartitionInfo, redundant: PartitionInfo) -> Result<Self, MessageError> {
        for part in [&primary, &redundant] {
            check_part(part)?;
        }
        Ok(Self {
            primary,
            redundant,
            valid: None,
            flags: 0,
        })
    }

    /// Resolve `misc` and `misc_bak` on `dev`.
    pub fn locate(dev: &mut dyn BlockDevice) -> Result<Self, MessageError> {
        let primary = dev.find_partition(PRIMARY_PART)?;
        let redundant = dev.find_partition(REDUNDANT_PART)?;
        Self::new(primary, redundant)
    }

    pub fn valid(&self) -> Option<CopyId> {
        self.valid
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    fn part(&self, copy: CopyId) -> &PartitionInfo {
        match copy {
            CopyId::Primary => &self.primary,
            CopyId::Redundant => &self.redundant,
        }
    }

    fn read_copy(&self, dev: &mut dyn BlockDevice, copy: CopyId) -> Option<BootloaderMessageAb> {
        let part = self.part(copy);
        let mut buf = vec![0u8; MESSAGE_AB_LEN];
        match read_exact_blocks(dev, part.start, &mut buf) {
            Ok(()) => BootloaderMessageAb::from_bytes(&buf),
            Err(e) => {
                warn!("abmsg: reading '{}' failed: {}", part.name, e);
                None
            }
        }
    }

    /// Read both copies and return the trusted one.
    pub fn load(&mut self, dev: &mut dyn BlockDevice) -> Result<BootloaderMessageAb, MessageError> {
        let primary = self.read_copy(dev, CopyId::Primary);
        let redundant = self.read_copy(dev, CopyId::Redundant);
        let copy = select_copy(primary.as_ref(), redundant.as_ref())?;
        let message = match copy {
            CopyId::Primary => primary,
            CopyId::Redundant => redundant,
        }
        .ok_or(MessageError::NoValidCopy)?;

        debug!("abmsg: using {:?} copy, serial {}", copy, message.flags());
        self.valid = Some(copy);
        self.flags = message.flags();
        Ok(message)
    }

    /// Write `message` over the copy that is not current, then make it current.
    pub fn store(
        &mut self,
        dev: &mut dyn BlockDevice,
        message: &mut BootloaderMessageAb,
    ) -> Result<(), MessageError> {
        let target = match self.valid {
            Some(copy) => copy.other(),
            None => CopyId::Primary,
        };
        let flags = self.flags.wrapping_add(1);
        message.seal(flags);

        let part = self.part(target);
        write_exact_blocks(dev, part.start, message.as_bytes())?;
        info!("abmsg: stored serial {} into '{}'", flags, part.name);

        self.valid = Some(target);
        self.flags = flags;
        Ok(())
    }
}

fn check_part(part: &PartitionInfo) -> Result<(), MessageError> {
    if part.size_bytes() < MESSAGE_AB_LEN as u64 {
        return Err(MessageError::PartitionTooSmall {
            name: part.name.clone(),
            size: part.size_bytes(),
            needed: MESSAGE_AB_LEN as u64,
        });
    }
    if MESSAGE_AB_LEN % part.blksz as usize != 0 {
        return Err(MessageError::Unaligned(part.blksz));
    }
    Ok(())
}
