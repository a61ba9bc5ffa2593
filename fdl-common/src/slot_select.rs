// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Boot slot selection - pure logic over a loaded control record.
//!
//! Picks the highest-priority bootable slot and registers a boot attempt
//! when that slot has not yet been confirmed. The caller persists the
//! updated record.

use crate::abc::{AbcError, BootloaderControl, MAX_SLOTS};

/// Result of slot selection (immutable).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDecision {
    pub slot: u8,
    /// Tries left after this boot.
    pub tries_remaining: u8,
    /// A try was consumed because the slot is unconfirmed.
    pub attempt_registered: bool,
}

impl SlotDecision {
    /// Apply this decision to create an updated record.
    pub fn apply_to(&self, abc: &BootloaderControl) -> BootloaderControl {
        let mut next = *abc;
        next.slot_info[self.slot as usize].tries_remaining = self.tries_remaining;
        next.set_current_slot(self.slot);
        next.update_crc();
        next
    }
}

/// Choose the slot to boot. Earlier slots win ties.
pub fn select_slot(abc: &BootloaderControl) -> Result<SlotDecision, AbcError> {
    let count = (abc.nb_slot as usize).min(MAX_SLOTS);
    let mut best: Option<usize> = None;

    for (i, slot) in abc.slot_info[..count].iter().enumerate() {
        if !slot.is_bootable() {
            continue;
        }
        match best {
            Some(b) if abc.slot_info[b].priority >= slot.priority => {}
            _ => best = Some(i),
        }
    }

    let index = best.ok_or(AbcError::NoBootableSlot)?;
    let meta = &abc.slot_info[index];

    // Unconfirmed slots spend one try per boot
    let attempt_registered = !meta.successful_boot;
    let tries_remaining = if attempt_registered {
        meta.tries_remaining - 1
    } else {
        meta.tries_remaining
    };

    Ok(SlotDecision {
        slot: index as u8,
        tries_remaining,
        attempt_registered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmed_slot_keeps_tries() {
        let mut abc = BootloaderControl::default_new();
        abc.slot_info[0].successful_boot = true;
        let d = select_slot(&abc).unwrap();
        assert_eq!(d.slot, 0);
        assert!(!d.attempt_registered);
        assert_eq!(d.tries_remaining, 7);
    }

    #[test]
    fn test_higher_priority_wins() {
        let mut abc = BootloaderControl::default_new();
        abc.slot_info[0].priority = 14;
        let d = select_slot(&abc).unwrap();
        assert_eq!(d.slot, 1);
        assert_eq!(d.tries_remaining, 6);
    }
}
