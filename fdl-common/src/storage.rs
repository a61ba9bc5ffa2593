// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Block storage seen through the collaborator traits.
//!
//! [`Storage`] hands out block devices by interface type and number and
//! reports the strapped boot device. [`BlockDevice`] is the block-granular
//! primitive set. The byte-level helpers at the bottom do the block rounding
//! and short-transfer checks every caller would otherwise repeat.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::{DeviceTable, DiskName};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("no {kind} device {index}")]
    NoDevice { kind: DeviceKind, index: u32 },
    #[error("partition '{0}' not found")]
    NoPartition(String),
    #[error("access past the end: block {start} + {count}")]
    OutOfRange { start: u64, count: u64 },
    #[error("short {op}: {done} of {requested} blocks")]
    ShortTransfer {
        op: &'static str,
        done: u64,
        requested: u64,
    },
    #[error("buffer of {0} bytes is not a whole number of blocks")]
    Unaligned(usize),
    #[error("device cannot hold a {0} table")]
    UnsupportedTable(&'static str),
    #[error("boot device cannot be detected")]
    UnknownBootDevice,
    #[error("device I/O failed: {0}")]
    Io(String),
}

/// Interface type a device is registered under.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Mmc,
    Mtd,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Mmc => f.write_str("mmc"),
            DeviceKind::Mtd => f.write_str("mtd"),
        }
    }
}

/// Physical medium behind a device.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Media {
    Emmc,
    Nor { erase_size: u32 },
    Nand { erase_size: u32 },
}

impl Media {
    pub fn erase_size(&self) -> Option<u32> {
        match self {
            Media::Emmc => None,
            Media::Nor { erase_size } | Media::Nand { erase_size } => Some(*erase_size),
        }
    }
}

/// Strapped boot-device configuration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BootDevice {
    OnlyEmmc,
    OnlyNor,
    OnlyNand,
    BothNorNand,
    BothNorEmmc,
    Usb,
    Uart,
    Sd,
}

impl BootDevice {
    /// Whether safety (NOR) and main media are separate devices.
    pub fn is_split(self) -> bool {
        matches!(self, BootDevice::BothNorNand | BootDevice::BothNorEmmc)
    }
}

/// Medium the main side boots from, as recorded in `main_bootmode`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    Nor,
    Nand,
    Hyper,
    Emmc,
}

impl BootMode {
    pub const fn number(self) -> u32 {
        match self {
            BootMode::Nor => 0,
            BootMode::Nand => 1,
            BootMode::Hyper => 2,
            BootMode::Emmc => 3,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [BootMode::Nor, BootMode::Nand, BootMode::Hyper, BootMode::Emmc]
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(name))
    }

    pub const fn name(self) -> &'static str {
        match self {
            BootMode::Nor => "nor",
            BootMode::Nand => "nand",
            BootMode::Hyper => "hyper",
            BootMode::Emmc => "emmc",
        }
    }
}

/// A partition resolved on a device, in that device's blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub name: DiskName,
    pub start: u64,
    pub size: u64,
    pub blksz: u32,
}

impl PartitionInfo {
    pub fn size_bytes(&self) -> u64 {
        self.size * self.blksz as u64
    }
}

/// Block-granular device primitives.
///
/// Buffers passed to `read_blocks` / `write_blocks` are whole blocks; the
/// return value is the number of blocks actually transferred.
pub trait BlockDevice {
    fn block_size(&self) -> u32;
    fn block_count(&self) -> u64;
    fn media(&self) -> Media;
    fn read_blocks(&mut self, start: u64, buf: &mut [u8]) -> Result<u64, StorageError>;
    fn write_blocks(&mut self, start: u64, buf: &[u8]) -> Result<u64, StorageError>;
    fn erase_blocks(&mut self, start: u64, count: u64) -> Result<(), StorageError>;
    fn find_partition(&mut self, name: &str) -> Result<PartitionInfo, StorageError>;
    /// Replace the device's partition table.
    fn write_table(&mut self, table: &DeviceTable) -> Result<(), StorageError>;
}

/// Device lookup and boot strap detection.
pub trait Storage {
    fn boot_device(&self) -> Result<BootDevice, StorageError>;
    fn device(&mut self, kind: DeviceKind, index: u32) -> Result<&mut dyn BlockDevice, StorageError>;
}

// --- Byte-level helpers ---

fn span(blksz: u32, offset: u64, len: usize) -> (u64, usize, u64) {
    let blksz = blksz as u64;
    let first = offset / blksz;
    let skip = (offset % blksz) as usize;
    let count = (skip as u64 + len as u64).div_ceil(blksz);
    (first, skip, count)
}

fn check_bounds(part: &PartitionInfo, first: u64, count: u64) -> Result<(), StorageError> {
    match first.checked_add(count) {
        Some(end) if end <= part.size => Ok(()),
        _ => Err(StorageError::OutOfRange {
            start: part.start + first,
            count,
        }),
    }
}

/// Read exactly `buf.len() / blksz` blocks.
pub fn read_exact_blocks(
    dev: &mut dyn BlockDevice,
    start: u64,
    buf: &mut [u8],
) -> Result<(), StorageError> {
    let blksz = dev.block_size() as usize;
    if buf.len() % blksz != 0 {
        return Err(StorageError::Unaligned(buf.len()));
    }
    let requested = (buf.len() / blksz) as u64;
    let done = dev.read_blocks(start, buf)?;
    if done != requested {
        return Err(StorageError::ShortTransfer {
            op: "read",
            done,
            requested,
        });
    }
    Ok(())
}

/// Write exactly `buf.len() / blksz` blocks.
pub fn write_exact_blocks(
    dev: &mut dyn BlockDevice,
    start: u64,
    buf: &[u8],
) -> Result<(), StorageError> {
    let blksz = dev.block_size() as usize;
    if buf.len() % blksz != 0 {
        return Err(StorageError::Unaligned(buf.len()));
    }
    let requested = (buf.len() / blksz) as u64;
    let done = dev.write_blocks(start, buf)?;
    if done != requested {
        return Err(StorageError::ShortTransfer {
            op: "write",
            done,
            requested,
        });
    }
    Ok(())
}

/// Read `len` bytes at byte `offset` inside `part`.
pub fn read_bytes(
    dev: &mut dyn BlockDevice,
    part: &PartitionInfo,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, StorageError> {
    let (first, skip, count) = span(part.blksz, offset, len);
    check_bounds(part, first, count)?;
    let mut buf = vec![0u8; count as usize * part.blksz as usize];
    read_exact_blocks(dev, part.start + first, &mut buf)?;
    Ok(buf[skip..skip + len].to_vec())
}

/// Write `data` at byte `offset` inside `part`, preserving the rest of the
/// covering blocks.
pub fn write_bytes(
    dev: &mut dyn BlockDevice,
    part: &PartitionInfo,
    offset: u64,
    data: &[u8],
) -> Result<(), StorageError> {
    let (first, skip, count) = span(part.blksz, offset, data.len());
    check_bounds(part, first, count)?;
    let mut buf = vec![0u8; count as usize * part.blksz as usize];
    if skip != 0 || data.len() % part.blksz as usize != 0 {
        read_exact_blocks(dev, part.start + first, &mut buf)?;
    }
    buf[skip..skip + data.len()].copy_from_slice(data);
    write_exact_blocks(dev, part.start + first, &buf)
}

// --- RAM-backed device ---

/// A block device held in memory, with an optional partition table.
#[derive(Debug, Clone)]
pub struct RamDisk {
    block_size: u32,
    media: Media,
    data: Vec<u8>,
    table: Option<DeviceTable>,
    write_protected: bool,
}

impl RamDisk {
    pub fn new(media: Media, block_size: u32, block_count: u64) -> Self {
        let fill = match media {
            Media::Emmc => 0x00,
            Media::Nor { .. } | Media::Nand { .. } => 0xFF,
        };
        Self {
            block_size,
            media,
            data: vec![fill; block_size as usize * block_count as usize],
            table: None,
            write_protected: false,
        }
    }

    pub fn with_table(mut self, table: DeviceTable) -> Self {
        self.table = Some(table);
        self
    }

    pub fn table(&self) -> Option<&DeviceTable> {
        self.table.as_ref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Writes report zero blocks transferred while set.
    pub fn set_write_protected(&mut self, on: bool) {
        self.write_protected = on;
    }

    fn range(&self, start: u64, len: usize) -> Result<core::ops::Range<usize>, StorageError> {
        let begin = start as usize * self.block_size as usize;
        let end = begin + len;
        if end > self.data.len() {
            return Err(StorageError::OutOfRange {
                start,
                count: (len / self.block_size as usize) as u64,
            });
        }
        Ok(begin..end)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.len() / self.block_size as usize) as u64
    }

    fn media(&self) -> Media {
        self.media
    }

    fn read_blocks(&mut self, start: u64, buf: &mut [u8]) -> Result<u64, StorageError> {
        let range = self.range(start, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok((buf.len() / self.block_size as usize) as u64)
    }

    fn write_blocks(&mut self, start: u64, buf: &[u8]) -> Result<u64, StorageError> {
        let range = self.range(start, buf.len())?;
        if self.write_protected {
            return Ok(0);
        }
        self.data[range].copy_from_slice(buf);
        Ok((buf.len() / self.block_size as usize) as u64)
    }

    fn erase_blocks(&mut self, start: u64, count: u64) -> Result<(), StorageError> {
        let fill = match self.media {
            Media::Emmc => 0x00,
            Media::Nor { .. } | Media::Nand { .. } => 0xFF,
        };
        let range = self.range(start, count as usize * self.block_size as usize)?;
        self.data[range].fill(fill);
        Ok(())
    }

    fn find_partition(&mut self, name: &str) -> Result<PartitionInfo, StorageError> {
        self.table
            .as_ref()
            .and_then(|t| t.resolve(name, self.block_size))
            .ok_or_else(|| StorageError::NoPartition(String::from(name)))
    }

    fn write_table(&mut self, table: &DeviceTable) -> Result<(), StorageError> {
        self.table = Some(table.clone());
        Ok(())
    }
}

/// A fixed set of RAM disks behind a strapped boot device.
#[derive(Debug, Clone)]
pub struct RamStorage {
    boot_device: BootDevice,
    devices: Vec<(DeviceKind, u32, RamDisk)>,
}

impl RamStorage {
    pub fn new(boot_device: BootDevice) -> Self {
        Self {
            boot_device,
            devices: Vec::new(),
        }
    }

    pub fn with_device(mut self, kind: DeviceKind, index: u32, disk: RamDisk) -> Self {
        self.devices.push((kind, index, disk));
        self
    }

    pub fn disk(&self, kind: DeviceKind, index: u32) -> Option<&RamDisk> {
        self.devices
            .iter()
            .find(|(k, i, _)| *k == kind && *i == index)
            .map(|(_, _, d)| d)
    }

    pub fn disk_mut(&mut self, kind: DeviceKind, index: u32) -> Option<&mut RamDisk> {
        self.devices
            .iter_mut()
            .find(|(k, i, _)| *k == kind && *i == index)
            .map(|(_, _, d)| d)
    }
}

impl Storage for RamStorage {
    fn boot_device(&self) -> Result<BootDevice, StorageError> {
        Ok(self.boot_device)
    }

    fn device(&mut self, kind: DeviceKind, index: u32) -> Result<&mut dyn BlockDevice, StorageError> {
        match self.disk_mut(kind, index) {
            Some(disk) => Ok(disk),
            None => Err(StorageError::NoDevice { kind, index }),
        }
    }
}
