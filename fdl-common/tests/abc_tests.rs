// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! A/B metadata tests: control record, BCB, redundant message, SafetyABC.

use fdl_common::abc::{
    AbcContext, AbcError, BootloaderControl, CONTROL_LEN, CONTROL_OFFSET, MAX_PRIORITY, MAX_TRIES,
};
use fdl_common::bcb::{BcbContext, BcbError, BcbField};
use fdl_common::partition::{self, Geometry};
use fdl_common::payload::{part_name, PartitionDescriptor};
use fdl_common::protocol::SizeUnit;
use fdl_common::redundant::{BootloaderMessageAb, CopyId, MessageError, RedundantStore};
use fdl_common::safety_abc::{self, MemoryRegister, SafetyAbc, SafetyError, SlotMark};
use fdl_common::slot_select::select_slot;
use fdl_common::storage::{
    write_bytes, write_exact_blocks, BlockDevice, BootDevice, Media, PartitionInfo, RamDisk,
};

fn misc_disk() -> RamDisk {
    let entries: Vec<_> = [("misc", 64), ("misc_bak", 64)]
        .iter()
        .map(|&(name, size)| PartitionDescriptor {
            name: part_name(name).unwrap(),
            size,
            gap: 0,
        })
        .collect();
    let geometry = Geometry {
        boot_device: BootDevice::OnlyEmmc,
        nand_erase_size: 0,
        main_capacity: Some(4096),
        safety_capacity: None,
    };
    let layout = partition::build(&entries, SizeUnit::Kib, &geometry).unwrap();
    RamDisk::new(Media::Emmc, 512, 4096).with_table(layout.main.unwrap())
}

fn misc_with_record() -> (RamDisk, PartitionInfo) {
    let mut disk = misc_disk();
    let misc = disk.find_partition("misc").unwrap();
    let record = BootloaderControl::default_new().to_bytes();
    write_bytes(&mut disk, &misc, CONTROL_OFFSET, &record).unwrap();
    (disk, misc)
}

fn record_bytes(disk: &RamDisk, part: &PartitionInfo) -> Vec<u8> {
    let start = (part.start * 512 + CONTROL_OFFSET) as usize;
    disk.bytes()[start..start + CONTROL_LEN].to_vec()
}

fn loaded() -> (RamDisk, PartitionInfo, AbcContext) {
    let (mut disk, misc) = misc_with_record();
    let mut ctx = AbcContext::new();
    ctx.load(&mut disk, &misc).unwrap();
    (disk, misc, ctx)
}

// =============================================================================
// Control record
// =============================================================================

#[test]
fn test_load_rejects_blank_misc() {
    let mut disk = misc_disk();
    let misc = disk.find_partition("misc").unwrap();
    let mut ctx = AbcContext::new();
    assert_eq!(
        ctx.load(&mut disk, &misc),
        Err(AbcError::InvalidMetadata("crc mismatch"))
    );
    assert!(!ctx.is_loaded());
}

#[test]
fn test_load_rejects_bad_magic() {
    let mut disk = misc_disk();
    let misc = disk.find_partition("misc").unwrap();
    let mut record = BootloaderControl::default_new();
    record.magic = 0x1234_5678;
    record.update_crc();
    write_bytes(&mut disk, &misc, CONTROL_OFFSET, &record.to_bytes()).unwrap();
    assert_eq!(
        AbcContext::new().load(&mut disk, &misc),
        Err(AbcError::InvalidMetadata("bad magic"))
    );
}

#[test]
fn test_commands_need_loaded_record() {
    let mut ctx = AbcContext::new();
    assert_eq!(ctx.mark_successful(0), Err(AbcError::NoData));
    assert_eq!(ctx.active_slot(), Err(AbcError::NoData));
    assert_eq!(ctx.resolve_slot(Some("a")), Err(AbcError::NoData));
}

#[test]
fn test_mark_successful_persists() {
    let (mut disk, misc, mut ctx) = loaded();
    let before = record_bytes(&disk, &misc);

    ctx.mark_successful(0).unwrap();
    assert!(ctx.is_dirty());
    ctx.store(&mut disk, &misc).unwrap();
    assert!(!ctx.is_dirty());

    let after = record_bytes(&disk, &misc);
    assert_ne!(after[28..], before[28..]);
    // Slot B metadata is untouched
    assert_eq!(after[14..16], before[14..16]);

    let mut reread = AbcContext::new();
    reread.load(&mut disk, &misc).unwrap();
    assert_eq!(reread.is_successful(0), Ok(true));
    assert_eq!(reread.is_successful(1), Ok(false));
    assert_eq!(reread.control().unwrap().slot_info[0].tries_remaining, MAX_TRIES);
}

#[test]
fn test_mark_successful_is_idempotent() {
    let (mut disk, misc, mut ctx) = loaded();
    ctx.mark_successful(1).unwrap();
    ctx.store(&mut disk, &misc).unwrap();
    let once = record_bytes(&disk, &misc);

    ctx.mark_successful(1).unwrap();
    ctx.store(&mut disk, &misc).unwrap();
    assert_eq!(record_bytes(&disk, &misc), once);
}

#[test]
fn test_set_active_demotes_other_slot() {
    let (_, _, mut ctx) = loaded();
    ctx.mark_successful(1).unwrap();
    ctx.set_active(1).unwrap();

    let control = *ctx.control().unwrap();
    assert_eq!(control.slot_info[1].priority, MAX_PRIORITY);
    assert!(!control.slot_info[1].successful_boot);
    assert_eq!(control.slot_info[0].priority, MAX_PRIORITY - 1);

    let decision = select_slot(&control).unwrap();
    assert_eq!(decision.slot, 1);
    assert!(decision.attempt_registered);
    assert_eq!(decision.tries_remaining, MAX_TRIES - 1);

    let next = decision.apply_to(&control);
    assert_eq!(&next.slot_suffix[..2], b"_b");
    assert!(next.validate().is_ok());
    ctx.replace(next).unwrap();
    assert_eq!(ctx.active_slot(), Ok(1));
}

#[test]
fn test_unbootable_slots_are_skipped() {
    let (_, _, mut ctx) = loaded();
    ctx.set_unbootable(0).unwrap();
    assert_eq!(ctx.is_bootable(0), Ok(false));
    assert_eq!(select_slot(ctx.control().unwrap()).unwrap().slot, 1);

    ctx.set_unbootable(1).unwrap();
    assert_eq!(
        select_slot(ctx.control().unwrap()),
        Err(AbcError::NoBootableSlot)
    );
}

#[test]
fn test_slot_out_of_range() {
    let (_, _, mut ctx) = loaded();
    assert_eq!(ctx.set_active(2), Err(AbcError::InvalidSlot(2)));
    assert_eq!(ctx.is_bootable(3), Err(AbcError::InvalidSlot(3)));
    assert_eq!(ctx.resolve_slot(None), Ok(0));
    assert_eq!(ctx.resolve_slot(Some("b")), Ok(1));
}

#[test]
fn test_store_needs_room_for_record() {
    let (mut disk, _, mut ctx) = loaded();
    let small = PartitionInfo {
        name: "misc".try_into().unwrap(),
        start: 2048,
        size: 4,
        blksz: 512,
    };
    assert_eq!(
        ctx.store(&mut disk, &small),
        Err(AbcError::PartitionTooSmall {
            size: 2048,
            needed: 2080
        })
    );
}

// =============================================================================
// Bootloader message (BCB)
// =============================================================================

#[test]
fn test_bcb_set_test_and_store() {
    let (mut disk, misc) = misc_with_record();
    let mut bcb = BcbContext::new();
    bcb.load(&mut disk, &misc).unwrap();

    bcb.set("command", "boot-recovery").unwrap();
    bcb.set("recovery", "recovery:--wipe_data").unwrap();
    assert_eq!(bcb.test("command", "=", "boot-recovery"), Ok(true));
    assert_eq!(bcb.test("command", "=", "boot"), Ok(false));
    assert_eq!(bcb.test("recovery", "~", "wipe"), Ok(true));

    let recovery = bcb.message().unwrap().field_str(BcbField::Recovery);
    assert_eq!(recovery, "recovery\n--wipe_data");

    bcb.store(&mut disk, &misc).unwrap();
    let mut reread = BcbContext::new();
    reread.load(&mut disk, &misc).unwrap();
    assert_eq!(
        reread.message().unwrap().field_str(BcbField::Command),
        "boot-recovery"
    );

    // The control record after the message survives
    assert!(AbcContext::new().load(&mut disk, &misc).is_ok());
}

#[test]
fn test_bcb_rejects_bad_input() {
    let (mut disk, misc) = misc_with_record();
    let mut bcb = BcbContext::new();
    assert_eq!(bcb.set("command", "x"), Err(BcbError::NotLoaded));
    bcb.load(&mut disk, &misc).unwrap();

    assert_eq!(
        bcb.set("bogus", "x"),
        Err(BcbError::UnknownField("bogus".into()))
    );
    assert_eq!(
        bcb.test("command", "!", "x"),
        Err(BcbError::UnknownOperator("!".into()))
    );
    assert!(matches!(
        bcb.set("command", &"c".repeat(32)),
        Err(BcbError::ValueTooLong { size: 32, .. })
    ));
}

#[test]
fn test_bcb_clear() {
    let (mut disk, misc) = misc_with_record();
    let mut bcb = BcbContext::new();
    bcb.load(&mut disk, &misc).unwrap();
    bcb.set("command", "boot-recovery").unwrap();
    bcb.set("status", "ok").unwrap();

    bcb.clear(Some("command")).unwrap();
    let msg = bcb.message().unwrap();
    assert_eq!(msg.field_str(BcbField::Command), "");
    assert_eq!(msg.field_str(BcbField::Status), "ok");

    bcb.clear(None).unwrap();
    assert!(bcb.message().unwrap().as_bytes().iter().all(|&b| b == 0));
}

// =============================================================================
// Redundant AB message
// =============================================================================

fn write_copy(disk: &mut RamDisk, name: &str, message: &BootloaderMessageAb) {
    let part = disk.find_partition(name).unwrap();
    write_exact_blocks(disk, part.start, message.as_bytes()).unwrap();
}

fn sealed(flags: u8) -> BootloaderMessageAb {
    let mut message = BootloaderMessageAb::default();
    message.set_control(&BootloaderControl::default_new());
    message.seal(flags);
    message
}

#[test]
fn test_blank_copies_are_corrupted() {
    let mut disk = misc_disk();
    let mut store = RedundantStore::locate(&mut disk).unwrap();
    assert_eq!(store.load(&mut disk), Err(MessageError::Corrupted));
    assert_eq!(store.valid(), None);
}

#[test]
fn test_store_alternates_copies() {
    let mut disk = misc_disk();
    let mut store = RedundantStore::locate(&mut disk).unwrap();
    let mut message = sealed(0);

    store.store(&mut disk, &mut message).unwrap();
    assert_eq!(store.valid(), Some(CopyId::Primary));
    assert_eq!(store.flags(), 1);

    let mut reloaded = RedundantStore::locate(&mut disk).unwrap();
    let current = reloaded.load(&mut disk).unwrap();
    assert_eq!(reloaded.valid(), Some(CopyId::Primary));
    assert_eq!(current.flags(), 1);

    let mut next = current.clone();
    reloaded.store(&mut disk, &mut next).unwrap();
    assert_eq!(reloaded.valid(), Some(CopyId::Redundant));

    let mut third = RedundantStore::locate(&mut disk).unwrap();
    let latest = third.load(&mut disk).unwrap();
    assert_eq!(third.valid(), Some(CopyId::Redundant));
    assert_eq!(latest.flags(), 2);
    assert!(latest.is_valid());
}

#[test]
fn test_serial_wraps_from_255() {
    let mut disk = misc_disk();
    write_copy(&mut disk, "misc", &sealed(255));
    write_copy(&mut disk, "misc_bak", &sealed(0));

    let mut store = RedundantStore::locate(&mut disk).unwrap();
    let current = store.load(&mut disk).unwrap();
    assert_eq!(store.valid(), Some(CopyId::Redundant));
    assert_eq!(current.flags(), 0);

    let mut next = current;
    store.store(&mut disk, &mut next).unwrap();
    assert_eq!(store.valid(), Some(CopyId::Primary));
    assert_eq!(next.flags(), 1);
}

#[test]
fn test_corrupted_primary_falls_back() {
    let mut disk = misc_disk();
    write_copy(&mut disk, "misc", &sealed(9));
    write_copy(&mut disk, "misc_bak", &sealed(8));
    let misc = disk.find_partition("misc").unwrap();
    disk.bytes_mut()[misc.start as usize * 512 + 100] ^= 0xFF;

    let mut store = RedundantStore::locate(&mut disk).unwrap();
    let current = store.load(&mut disk).unwrap();
    assert_eq!(store.valid(), Some(CopyId::Redundant));
    assert_eq!(current.flags(), 8);
}

#[test]
fn test_control_record_through_message() {
    let message = sealed(1);
    let mut ctx = AbcContext::new();
    ctx.load_from_message(message.control_bytes()).unwrap();
    assert!(ctx.location().is_none());
    ctx.set_active(1).unwrap();

    let bytes = ctx.store_to_message().unwrap();
    let mut updated = message.clone();
    updated.set_control(&BootloaderControl::from_bytes(&bytes));
    assert_eq!(updated.message(), message.message());
    assert!(!updated.is_valid());
    updated.seal(2);
    assert!(updated.is_valid());
}

// =============================================================================
// SafetyABC register
// =============================================================================

#[test]
fn test_safety_unbootable_switches_slot() {
    let mut reg = MemoryRegister(0);
    safety_abc::setup(&mut reg, SlotMark::Unbootable, 0).unwrap();
    let value = SafetyAbc(reg.0);
    assert_eq!(value.slot(), 0);
    assert!(value.status());
    assert_eq!(safety_abc::current_slot(&mut reg), Ok(1));

    safety_abc::setup(&mut reg, SlotMark::Successful, 0).unwrap();
    assert_eq!(safety_abc::current_slot(&mut reg), Ok(0));
}

#[test]
fn test_safety_active_resets_boot_times() {
    let mut value = SafetyAbc(0b1110);
    assert_eq!(value.boot_times(), 3);
    value.setup(SlotMark::Active, 1).unwrap();
    assert_eq!(value, SafetyAbc(0b0001));
    assert_eq!(value.current_slot(), 1);
}

#[test]
fn test_safety_keeps_upper_bits() {
    let mut reg = MemoryRegister(0xA5A5_0000);
    safety_abc::setup(&mut reg, SlotMark::Active, 1).unwrap();
    assert_eq!(reg.0, 0xA5A5_0001);
}

#[test]
fn test_safety_rejects_slot_two() {
    let mut reg = MemoryRegister(0x3);
    assert_eq!(
        safety_abc::setup(&mut reg, SlotMark::Unbootable, 2),
        Err(SafetyError::InvalidSlot(2))
    );
    assert_eq!(reg.0, 0x3);
}
