// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Partition table builder tests.

use fdl_common::partition::{self, BuildError, DeviceTable, Geometry, Side, GPT_RESERVED_BYTES};
use fdl_common::payload::{part_name, PartitionDescriptor};
use fdl_common::protocol::SizeUnit;
use fdl_common::storage::{BootDevice, BootMode};

fn desc(name: &str, size: u64) -> PartitionDescriptor {
    PartitionDescriptor {
        name: part_name(name).unwrap(),
        size,
        gap: 0,
    }
}

fn descriptors(entries: &[(&str, u64)]) -> Vec<PartitionDescriptor> {
    entries.iter().map(|&(n, s)| desc(n, s)).collect()
}

fn geometry(boot_device: BootDevice) -> Geometry {
    Geometry {
        boot_device,
        nand_erase_size: 0,
        main_capacity: None,
        safety_capacity: None,
    }
}

fn mtdparts(table: &DeviceTable) -> String {
    match table {
        DeviceTable::Mtd(mtd) => mtd.mtdparts(),
        DeviceTable::Gpt(_) => panic!("expected an MTD table"),
    }
}

// =============================================================================
// Placement and validation
// =============================================================================

#[test]
fn test_back_to_back_with_gap() {
    let entries = [
        PartitionDescriptor {
            gap: 64,
            ..desc("misc", 64)
        },
        desc("kernel", 256),
    ];
    let placed = partition::place(&entries, SizeUnit::Kib).unwrap();
    let parts = placed.table.partitions();
    assert_eq!((parts[0].start, parts[0].size), (0, 128));
    assert_eq!((parts[1].start, parts[1].size), (256, 512));
}

#[test]
fn test_units_round_up_to_sectors() {
    let placed = partition::place(&descriptors(&[("misc", 1000)]), SizeUnit::Byte).unwrap();
    assert_eq!(placed.table.partitions()[0].size, 2);
    let placed = partition::place(&descriptors(&[("misc", 3)]), SizeUnit::Sector).unwrap();
    assert_eq!(placed.table.partitions()[0].size, 3);
}

#[test]
fn test_duplicate_name_rejected() {
    let entries = descriptors(&[("kernel", 256), ("rootfs", 512), ("kernel", 128)]);
    assert_eq!(
        partition::place(&entries, SizeUnit::Kib),
        Err(BuildError::DuplicatePartitionName("kernel".into()))
    );
}

#[test]
fn test_unknown_name_rejected() {
    let entries = descriptors(&[("misc", 64), ("bogus", 64)]);
    assert_eq!(
        partition::place(&entries, SizeUnit::Kib),
        Err(BuildError::InvalidPartitionName("bogus".into()))
    );
}

#[test]
fn test_size_overflow() {
    let entries = descriptors(&[("rootfs", u64::MAX)]);
    assert_eq!(
        partition::place(&entries, SizeUnit::Mib),
        Err(BuildError::SizeOverflow("rootfs".into()))
    );
}

#[test]
fn test_markers_only_is_empty() {
    let entries = descriptors(&[("emmc", 0), ("", 0)]);
    assert_eq!(
        partition::place(&entries, SizeUnit::Kib),
        Err(BuildError::EmptyTable)
    );
}

#[test]
fn test_boot_mode_marker() {
    let entries = descriptors(&[("misc", 64), ("NAND", 0), ("kernel", 256)]);
    let placed = partition::place(&entries, SizeUnit::Kib).unwrap();
    assert_eq!(placed.boot_mode, Some(BootMode::Nand));
    assert_eq!(placed.table.number(), 2);
    // The marker takes no space
    assert_eq!(placed.table.partitions()[1].start, 128);
}

#[test]
fn test_unknown_boot_mode_marker() {
    let entries = descriptors(&[("floppy", 0), ("misc", 64)]);
    assert_eq!(
        partition::place(&entries, SizeUnit::Kib),
        Err(BuildError::UnknownBootMode("floppy".into()))
    );
}

// =============================================================================
// Routing
// =============================================================================

#[test]
fn test_emmc_gpt_offset_and_bootable_kernel() {
    let entries = descriptors(&[("misc", 64), ("kernel_a", 256), ("rootfs_a", 1024)]);
    let layout = partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::OnlyEmmc)).unwrap();
    assert!(layout.safety.is_none());

    let main = layout.main.unwrap();
    assert_eq!(main.kind(), "gpt");
    let reserved = GPT_RESERVED_BYTES / 512;
    let misc = main.table().get("misc").unwrap();
    assert_eq!(misc.start, reserved);
    assert!(!misc.bootable);
    let kernel = main.table().get("kernel_a").unwrap();
    assert_eq!(kernel.start, reserved + 128);
    assert!(kernel.bootable);
    assert!(kernel.uuid.is_some());
}

#[test]
fn test_emmc_capacity_exceeded() {
    let reserved = GPT_RESERVED_BYTES / 512;
    let geometry = Geometry {
        main_capacity: Some(reserved + 100),
        ..geometry(BootDevice::OnlyEmmc)
    };
    let entries = descriptors(&[("misc", 64)]);
    assert_eq!(
        partition::build(&entries, SizeUnit::Kib, &geometry),
        Err(BuildError::CapacityExceeded {
            name: "misc".into(),
            end: reserved + 128,
            capacity: reserved + 100,
        })
    );
}

#[test]
fn test_nand_sizes_align_to_erase_block() {
    let geometry = Geometry {
        nand_erase_size: 128 * 1024,
        ..geometry(BootDevice::OnlyNand)
    };
    let entries = descriptors(&[("ubootenv", 128), ("misc", 100)]);
    let layout = partition::build(&entries, SizeUnit::Kib, &geometry).unwrap();
    let main = layout.main.unwrap();
    assert_eq!(main.table().get("misc").unwrap().size_bytes(), 128 * 1024);
    assert_eq!(
        mtdparts(&main),
        "0x20000@0x0(ubootenv),0x20000@0x20000(misc)"
    );
}

#[test]
fn test_split_nor_nand() {
    let geometry = Geometry {
        nand_erase_size: 128 * 1024,
        ..geometry(BootDevice::BothNorNand)
    };
    let entries = descriptors(&[("spl", 256), ("sbl", 256), ("kernel", 1024), ("rootfs", 2048)]);
    let layout = partition::build(&entries, SizeUnit::Kib, &geometry).unwrap();

    let safety = layout.safety.unwrap();
    assert_eq!(
        mtdparts(&safety),
        "nand*1#0x40000@0x0(spl),0x40000@0x40000(sbl)"
    );
    let main = layout.main.unwrap();
    assert_eq!(
        mtdparts(&main),
        "0x100000@0x0(kernel),0x200000@0x100000(rootfs)"
    );
    assert!(main.table().get("kernel").unwrap().bootable);
}

#[test]
fn test_split_nor_emmc() {
    let entries = descriptors(&[("spl", 256), ("misc", 64), ("kernel", 256)]);
    let layout =
        partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::BothNorEmmc)).unwrap();

    assert_eq!(mtdparts(&layout.safety.unwrap()), "emmc*3#0x40000@0x0(spl)");
    let main = layout.main.unwrap();
    assert_eq!(main.kind(), "gpt");
    let reserved = GPT_RESERVED_BYTES / 512;
    assert_eq!(main.table().get("misc").unwrap().start, reserved);
    assert_eq!(main.table().get("kernel").unwrap().start, reserved + 128);
    assert!(main.table().get("spl").is_none());
}

#[test]
fn test_split_nor_emmc_shift_ignores_safety_gaps() {
    let mut entries = descriptors(&[("spl", 256), ("sbl", 256), ("misc", 64)]);
    entries[0].gap = 64;
    let layout =
        partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::BothNorEmmc)).unwrap();

    let safety = layout.safety.unwrap();
    assert_eq!(safety.table().get("sbl").unwrap().start, 640);
    let reserved = GPT_RESERVED_BYTES / 512;
    let main = layout.main.unwrap();
    assert_eq!(main.table().get("misc").unwrap().start, reserved + 128);
}

#[test]
fn test_split_main_before_safety_overlaps() {
    let entries = descriptors(&[("misc", 64), ("spl", 256)]);
    assert_eq!(
        partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::BothNorEmmc)),
        Err(BuildError::Overlap("misc".into()))
    );
}

#[test]
fn test_split_needs_both_sides() {
    let entries = descriptors(&[("misc", 64), ("kernel", 256)]);
    assert_eq!(
        partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::BothNorNand)),
        Err(BuildError::EmptySubTable(Side::Safety))
    );
}

#[test]
fn test_usb_boot_has_no_layout() {
    let entries = descriptors(&[("misc", 64)]);
    assert_eq!(
        partition::build(&entries, SizeUnit::Kib, &geometry(BootDevice::Usb)),
        Err(BuildError::UnsupportedBootDevice(BootDevice::Usb))
    );
}
