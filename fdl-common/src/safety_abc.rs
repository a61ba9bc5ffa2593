// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SafetyABC register: the board-level A/B state shared with the safety MCU.
//!
//! Layout of the 32-bit value:
//! - bit 0: slot
//! - bit 1: abort status (set = the slot in bit 0 failed)
//! - bits 2-3: boot times (0/1 normal boot, 2/3 download)

use log::{debug, error};
use thiserror::Error;

const SLOT_BIT: u32 = 1 << 0;
const STATUS_BIT: u32 = 1 << 1;
const TIMES_SHIFT: u32 = 2;
const TIMES_MASK: u32 = 0b11 << TIMES_SHIFT;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("invalid slot {0}")]
    InvalidSlot(u8),
    #[error("register access failed: {0}")]
    Register(&'static str),
}

/// What happened to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMark {
    Successful,
    Unbootable,
    Active,
}

/// Access to the misc syscon register holding the value.
pub trait SafetyRegister {
    fn read(&mut self) -> Result<u32, SafetyError>;
    fn write(&mut self, value: u32) -> Result<(), SafetyError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SafetyAbc(pub u32);

impl SafetyAbc {
    pub fn slot(self) -> u8 {
        (self.0 & SLOT_BIT) as u8
    }

    pub fn status(self) -> bool {
        self.0 & STATUS_BIT != 0
    }

    pub fn boot_times(self) -> u8 {
        ((self.0 & TIMES_MASK) >> TIMES_SHIFT) as u8
    }

    pub fn set_boot_times(&mut self, times: u8) {
        self.0 = (self.0 & !TIMES_MASK) | (((times as u32) << TIMES_SHIFT) & TIMES_MASK);
    }

    /// Slot the next boot uses: the other one after an abort.
    pub fn current_slot(self) -> u8 {
        if self.status() {
            self.slot() ^ 1
        } else {
            self.slot()
        }
    }

    /// Apply `mark` for `slot`. Other bits are kept.
    pub fn setup(&mut self, mark: SlotMark, slot: u8) -> Result<(), SafetyError> {
        if slot > 1 {
            return Err(SafetyError::InvalidSlot(slot));
        }
        match mark {
            SlotMark::Successful => self.0 &= !STATUS_BIT,
            SlotMark::Unbootable => {
                self.0 = (self.0 & !SLOT_BIT) | slot as u32 | STATUS_BIT;
            }
            SlotMark::Active => {
                self.0 = (self.0 & !SLOT_BIT & !STATUS_BIT) | slot as u32;
                self.set_boot_times(0);
            }
        }
        Ok(())
    }
}

/// Read-modify-write the register for `mark` on `slot`.
pub fn setup(reg: &mut dyn SafetyRegister, mark: SlotMark, slot: u8) -> Result<(), SafetyError> {
    if slot > 1 {
        error!("safety: invalid slot {}", slot);
        return Err(SafetyError::InvalidSlot(slot));
    }
    let mut value = SafetyAbc(reg.read()?);
    value.setup(mark, slot)?;
    debug!("safety: {:?} slot {} -> {:#x}", mark, slot, value.0);
    reg.write(value.0)
}

pub fn current_slot(reg: &mut dyn SafetyRegister) -> Result<u8, SafetyError> {
    Ok(SafetyAbc(reg.read()?).current_slot())
}

/// A register held in memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRegister(pub u32);

impl SafetyRegister for MemoryRegister {
    fn read(&mut self) -> Result<u32, SafetyError> {
        Ok(self.0)
    }

    fn write(&mut self, value: u32) -> Result<(), SafetyError> {
        self.0 = value;
        Ok(())
    }
}
