// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Partition table construction for the REPARTITION command.
//!
//! The host sends `{name, size, gap}` descriptors in one unit. They are laid
//! out back to back in 512-byte sectors, checked against the safety-side and
//! main-side name lists, then routed to the storage media of the strapped
//! boot device:
//!
//! | boot device     | safety (NOR)         | main                     |
//! |-----------------|----------------------|--------------------------|
//! | `OnlyEmmc`      | -                    | GPT, whole table         |
//! | `OnlyNand`      | -                    | MTD, whole table         |
//! | `BothNorNand`   | MTD, safety entries  | MTD, main entries        |
//! | `BothNorEmmc`   | MTD, safety entries  | GPT, main entries        |
//!
//! The builder performs no I/O.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use log::debug;
use thiserror::Error;

use crate::payload::PartitionDescriptor;
use crate::protocol::{SizeUnit, DISK_PART_NAME_LEN, SECTOR_SIZE};
use crate::storage::{BootDevice, BootMode, PartitionInfo};

/// Partition name as stored in a device table.
pub type DiskName = heapless::String<DISK_PART_NAME_LEN>;

/// Names that belong on the safety (NOR) medium.
pub const SAFE_PART_IDS: [&str; 9] = [
    "sbl", "spl", "rtos", "sbl_a", "sbl_b", "spl_a", "spl_b", "rtos_a", "rtos_b",
];

/// Names that belong on the main medium.
pub const MAIN_PART_IDS: [&str; 22] = [
    "misc",
    "ubootenv",
    "atf",
    "optee",
    "uboot",
    "boot",
    "kernel",
    "rootfs",
    "misc_bak",
    "uboot_bak",
    "atf_a",
    "atf_b",
    "optee_a",
    "optee_b",
    "uboot_a",
    "uboot_b",
    "boot_a",
    "boot_b",
    "kernel_a",
    "kernel_b",
    "rootfs_a",
    "rootfs_b",
];

/// Space kept free in front of the first GPT partition.
pub const GPT_RESERVED_BYTES: u64 = 1024 * 1024;

pub const PART_GUID: Guid = Guid([
    0x02, 0x4E, 0x69, 0x76, 0xC2, 0x71, 0x11, 0xEF, 0xB3, 0x4C, 0x9F, 0x1E, 0x7A, 0xAB, 0xB0, 0xAF,
]);
pub const TYPE_GUID: Guid = Guid([
    0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B,
]);
pub const DISK_GUID: Guid = Guid([
    0x75, 0xFF, 0x1A, 0x66, 0xC2, 0x83, 0x11, 0xEF, 0xB9, 0xF0, 0x5F, 0xFA, 0x4B, 0x8C, 0x8E, 0xFD,
]);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("duplicate partition name '{0}'")]
    DuplicatePartitionName(String),
    #[error("invalid partition name '{0}'")]
    InvalidPartitionName(String),
    #[error("size of '{0}' overflows")]
    SizeOverflow(String),
    #[error("'{name}' ends at sector {end}, past the device end at {capacity}")]
    CapacityExceeded {
        name: String,
        end: u64,
        capacity: u64,
    },
    #[error("'{0}' starts inside the safety region")]
    Overlap(String),
    #[error("no {0} partitions in the table")]
    EmptySubTable(Side),
    #[error("partition table is empty")]
    EmptyTable,
    #[error("boot device {0:?} cannot be repartitioned")]
    UnsupportedBootDevice(BootDevice),
    #[error("unknown boot mode '{0}'")]
    UnknownBootMode(String),
    #[error("out of memory")]
    ResourceExhausted,
}

/// Which allow-list a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Safety,
    Main,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Safety => f.write_str("safety"),
            Side::Main => f.write_str("main"),
        }
    }
}

pub fn side_of(name: &str) -> Option<Side> {
    if SAFE_PART_IDS.contains(&name) {
        Some(Side::Safety)
    } else if MAIN_PART_IDS.contains(&name) {
        Some(Side::Main)
    } else {
        None
    }
}

/// 16 raw GUID bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    /// Derive a distinct GUID per partition slot from a fixed base.
    pub fn with_index(self, index: usize) -> Self {
        let mut bytes = self.0;
        bytes[15] = bytes[15].wrapping_add(index as u8);
        Guid(bytes)
    }

    /// Text form with the first three fields little-endian (GPT convention).
    pub fn to_guid_string(&self) -> String {
        let b = &self.0;
        let reordered = [
            b[3], b[2], b[1], b[0], b[5], b[4], b[7], b[6], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15],
        ];
        Guid(reordered).to_string_std()
    }

    /// Text form in byte order.
    pub fn to_string_std(&self) -> String {
        let mut out = String::with_capacity(36);
        for (i, byte) in self.0.iter().enumerate() {
            if matches!(i, 4 | 6 | 8 | 10) {
                out.push('-');
            }
            let _ = write!(out, "{:02X}", byte);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPartition {
    pub name: DiskName,
    /// First sector.
    pub start: u64,
    /// Length in sectors.
    pub size: u64,
    pub blksz: u32,
    pub bootable: bool,
    pub uuid: Option<Guid>,
    pub type_guid: Option<Guid>,
}

impl DiskPartition {
    pub fn end(&self) -> u64 {
        self.start + self.size
    }

    pub fn start_bytes(&self) -> u64 {
        self.start * self.blksz as u64
    }

    pub fn size_bytes(&self) -> u64 {
        self.size * self.blksz as u64
    }

    fn is_kernel(&self) -> bool {
        self.name
            .as_bytes()
            .get(..6)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(b"kernel"))
    }
}

/// Ordered partitions of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionTable {
    partitions: Vec<DiskPartition>,
}

impl PartitionTable {
    pub fn number(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[DiskPartition] {
        &self.partitions
    }

    pub fn get(&self, name: &str) -> Option<&DiskPartition> {
        self.partitions.iter().find(|p| p.name.as_str() == name)
    }

    /// Sectors taken by the partitions themselves, gaps excluded.
    pub fn used_sectors(&self) -> u64 {
        self.partitions.iter().map(|p| p.size).sum()
    }

    fn subset(&self, side: Side) -> Result<PartitionTable, BuildError> {
        let mut partitions = Vec::new();
        partitions
            .try_reserve(self.partitions.len())
            .map_err(|_| BuildError::ResourceExhausted)?;
        partitions.extend(
            self.partitions
                .iter()
                .filter(|p| side_of(&p.name) == Some(side))
                .cloned(),
        );
        if partitions.is_empty() {
            return Err(BuildError::EmptySubTable(side));
        }
        Ok(PartitionTable { partitions })
    }
}

/// A GPT for a block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptTable {
    pub disk_guid: Guid,
    pub table: PartitionTable,
}

/// An MTD layout, optionally prefixed with the main boot mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtdTable {
    pub boot_mode: Option<BootMode>,
    pub table: PartitionTable,
}

impl MtdTable {
    /// `mtdparts` form, e.g. `emmc*3#0x100000@0x0(spl),0x80000@0x100000(sbl)`.
    pub fn mtdparts(&self) -> String {
        let mut out = String::new();
        if let Some(mode) = self.boot_mode {
            let _ = write!(out, "{}*{}#", mode.name(), mode.number());
        }
        for (i, p) in self.table.partitions().iter().enumerate() {
            if i != 0 {
                out.push(',');
            }
            let _ = write!(out, "{:#x}@{:#x}({})", p.size_bytes(), p.start_bytes(), p.name);
        }
        out
    }
}

/// A table ready for the block-write-partition collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTable {
    Gpt(GptTable),
    Mtd(MtdTable),
}

impl DeviceTable {
    pub fn table(&self) -> &PartitionTable {
        match self {
            DeviceTable::Gpt(gpt) => &gpt.table,
            DeviceTable::Mtd(mtd) => &mtd.table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeviceTable::Gpt(_) => "gpt",
            DeviceTable::Mtd(_) => "mtd",
        }
    }

    /// Look `name` up and express it in blocks of `blksz` bytes.
    pub fn resolve(&self, name: &str, blksz: u32) -> Option<PartitionInfo> {
        let p = self.table().get(name)?;
        Some(PartitionInfo {
            name: p.name.clone(),
            start: p.start_bytes() / blksz as u64,
            size: p.size_bytes().div_ceil(blksz as u64),
            blksz,
        })
    }
}

/// Device facts the router needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub boot_device: BootDevice,
    /// Erase block of the main NAND in bytes, 0 when not NAND.
    pub nand_erase_size: u32,
    /// Main medium capacity in sectors, when known.
    pub main_capacity: Option<u64>,
    /// Safety medium capacity in sectors, when known.
    pub safety_capacity: Option<u64>,
}

/// Descriptors laid out and validated, before routing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlacedTable {
    pub table: PartitionTable,
    /// Set by a zero-size marker entry.
    pub boot_mode: Option<BootMode>,
}

/// Builder output: one or two tables plus the boot-mode marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionLayout {
    pub safety: Option<DeviceTable>,
    pub main: Option<DeviceTable>,
    pub boot_mode: Option<BootMode>,
}

/// Lay descriptors out back to back and validate names.
pub fn place(descriptors: &[PartitionDescriptor], unit: SizeUnit) -> Result<PlacedTable, BuildError> {
    let sector = SECTOR_SIZE as u64;
    let unit_bytes = unit.bytes();
    let mut partitions: Vec<DiskPartition> = Vec::new();
    partitions
        .try_reserve(descriptors.len())
        .map_err(|_| BuildError::ResourceExhausted)?;
    let mut boot_mode = None;
    let mut start_bytes: u64 = 0;

    for d in descriptors {
        if d.size == 0 {
            if !d.name.is_empty() {
                let mode = BootMode::from_name(&d.name)
                    .ok_or_else(|| BuildError::UnknownBootMode(String::from(d.name.as_str())))?;
                debug!("partition: boot mode marker {:?}", mode);
                boot_mode = Some(mode);
            }
            continue;
        }

        let name = DiskName::try_from(d.name.as_str())
            .ok()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| BuildError::InvalidPartitionName(String::from(d.name.as_str())))?;
        let overflow = || BuildError::SizeOverflow(String::from(d.name.as_str()));
        let size_bytes = d.size.checked_mul(unit_bytes).ok_or_else(overflow)?;
        let gap_bytes = d.gap.checked_mul(unit_bytes).ok_or_else(overflow)?;

        partitions.push(DiskPartition {
            name,
            start: start_bytes.div_ceil(sector),
            size: size_bytes.div_ceil(sector),
            blksz: SECTOR_SIZE,
            bootable: false,
            uuid: None,
            type_guid: None,
        });

        start_bytes = start_bytes
            .checked_add(size_bytes)
            .and_then(|s| s.checked_add(gap_bytes))
            .ok_or_else(overflow)?;
    }

    if partitions.is_empty() {
        return Err(BuildError::EmptyTable);
    }

    for (i, a) in partitions.iter().enumerate() {
        if partitions[i + 1..].iter().any(|b| b.name == a.name) {
            return Err(BuildError::DuplicatePartitionName(String::from(a.name.as_str())));
        }
    }

    if let Some(bad) = partitions.iter().find(|p| side_of(&p.name).is_none()) {
        return Err(BuildError::InvalidPartitionName(String::from(bad.name.as_str())));
    }

    Ok(PlacedTable {
        table: PartitionTable { partitions },
        boot_mode,
    })
}

/// Split and fix up a placed table for the boot device.
pub fn route(placed: &PlacedTable, geometry: &Geometry) -> Result<PartitionLayout, BuildError> {
    let mut layout = PartitionLayout {
        safety: None,
        main: None,
        boot_mode: placed.boot_mode,
    };

    match geometry.boot_device {
        BootDevice::OnlyEmmc => {
            let main = gpt_fixup(placed.table.clone());
            check_capacity(&main, geometry.main_capacity)?;
            layout.main = Some(DeviceTable::Gpt(GptTable {
                disk_guid: DISK_GUID,
                table: main,
            }));
        }
        BootDevice::OnlyNand => {
            let main = mtd_fixup(placed.table.clone(), geometry.nand_erase_size);
            check_capacity(&main, geometry.main_capacity)?;
            layout.main = Some(DeviceTable::Mtd(MtdTable {
                boot_mode: None,
                table: main,
            }));
        }
        BootDevice::BothNorNand | BootDevice::BothNorEmmc => {
            let safety = mtd_fixup(placed.table.subset(Side::Safety)?, 0);
            check_capacity(&safety, geometry.safety_capacity)?;
            let main = shift_down(placed.table.subset(Side::Main)?, safety.used_sectors())?;

            let (main, mode) = if geometry.boot_device == BootDevice::BothNorNand {
                let main = mtd_fixup(main, geometry.nand_erase_size);
                check_capacity(&main, geometry.main_capacity)?;
                (
                    DeviceTable::Mtd(MtdTable {
                        boot_mode: None,
                        table: main,
                    }),
                    BootMode::Nand,
                )
            } else {
                let main = gpt_fixup(main);
                check_capacity(&main, geometry.main_capacity)?;
                (
                    DeviceTable::Gpt(GptTable {
                        disk_guid: DISK_GUID,
                        table: main,
                    }),
                    BootMode::Emmc,
                )
            };

            layout.safety = Some(DeviceTable::Mtd(MtdTable {
                boot_mode: Some(mode),
                table: safety,
            }));
            layout.main = Some(main);
        }
        other => return Err(BuildError::UnsupportedBootDevice(other)),
    }

    Ok(layout)
}

/// Place, validate and route in one step.
pub fn build(
    descriptors: &[PartitionDescriptor],
    unit: SizeUnit,
    geometry: &Geometry,
) -> Result<PartitionLayout, BuildError> {
    let placed = place(descriptors, unit)?;
    route(&placed, geometry)
}

fn gpt_fixup(mut table: PartitionTable) -> PartitionTable {
    for (i, p) in table.partitions.iter_mut().enumerate() {
        p.start += GPT_RESERVED_BYTES.div_ceil(p.blksz as u64);
        p.bootable = p.is_kernel();
        p.uuid = Some(PART_GUID.with_index(i));
        p.type_guid = Some(TYPE_GUID);
    }
    table
}

fn mtd_fixup(mut table: PartitionTable, erase_size: u32) -> PartitionTable {
    for p in table.partitions.iter_mut() {
        if erase_size != 0 {
            let blksz = p.blksz as u64;
            let aligned = p.size_bytes().next_multiple_of(erase_size as u64);
            p.size = aligned.div_ceil(blksz);
        }
        p.bootable = p.is_kernel();
    }
    table
}

fn shift_down(mut table: PartitionTable, by: u64) -> Result<PartitionTable, BuildError> {
    for p in table.partitions.iter_mut() {
        p.start = p
            .start
            .checked_sub(by)
            .ok_or_else(|| BuildError::Overlap(String::from(p.name.as_str())))?;
    }
    Ok(table)
}

fn check_capacity(table: &PartitionTable, capacity: Option<u64>) -> Result<(), BuildError> {
    let Some(capacity) = capacity else {
        return Ok(());
    };
    match table.partitions().iter().find(|p| p.end() > capacity) {
        Some(p) => Err(BuildError::CapacityExceeded {
            name: format!("{}", p.name),
            end: p.end(),
            capacity,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_string_forms() {
        assert_eq!(TYPE_GUID.to_guid_string(), "C12A7328-F81F-11D2-BA4B-00A0C93EC93B");
        assert_eq!(PART_GUID.to_string_std(), "024E6976-C271-11EF-B34C-9F1E7AABB0AF");
    }

    #[test]
    fn test_kernel_prefix_is_case_insensitive() {
        let p = DiskPartition {
            name: DiskName::try_from("KERNEL_a").unwrap(),
            start: 0,
            size: 1,
            blksz: 512,
            bootable: false,
            uuid: None,
            type_guid: None,
        };
        assert!(p.is_kernel());
    }
}
