// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Block devices backed by image files.
//!
//! The partition table of an image lives next to it in
//! `<image>.parts.toml`, written whenever the host repartitions.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use fdl_common::partition::{DeviceTable, DiskName};
use fdl_common::storage::{
    BlockDevice, BootDevice, DeviceKind, Media, PartitionInfo, Storage, StorageError,
};

/// Erase in chunks of this many bytes.
const FILL_CHUNK: usize = 64 * 1024;

fn io_error(e: io::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

/// One partition of a sidecar table, in bytes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub name: String,
    pub offset: u64,
    pub size: u64,
    #[serde(default)]
    pub bootable: bool,
}

/// Sidecar partition table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TableFile {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtdparts: Option<String>,
    #[serde(default)]
    pub partitions: Vec<TableEntry>,
}

impl TableFile {
    pub fn from_device_table(table: &DeviceTable) -> Self {
        let (disk_guid, mtdparts) = match table {
            DeviceTable::Gpt(gpt) => (Some(gpt.disk_guid.to_guid_string()), None),
            DeviceTable::Mtd(mtd) => (None, Some(mtd.mtdparts())),
        };
        Self {
            kind: table.kind().to_string(),
            disk_guid,
            mtdparts,
            partitions: table
                .table()
                .partitions()
                .iter()
                .map(|p| TableEntry {
                    name: p.name.to_string(),
                    offset: p.start_bytes(),
                    size: p.size_bytes(),
                    bootable: p.bootable,
                })
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TableEntry> {
        self.partitions.iter().find(|p| p.name == name)
    }
}

/// Path of the sidecar table for `image`.
pub fn table_path(image: &Path) -> PathBuf {
    let mut path = image.as_os_str().to_owned();
    path.push(".parts.toml");
    PathBuf::from(path)
}

pub struct FileDisk {
    file: File,
    path: PathBuf,
    block_size: u32,
    block_count: u64,
    media: Media,
    table: Option<TableFile>,
}

impl FileDisk {
    /// Open `path`, creating or growing it to the device size. New space
    /// reads as erased.
    pub fn open(
        path: &Path,
        media: Media,
        block_size: u32,
        block_count: u64,
    ) -> Result<Self, StorageError> {
        if block_size == 0 {
            return Err(StorageError::Unaligned(0));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_error)?;

        let mut disk = Self {
            file,
            path: path.to_path_buf(),
            block_size,
            block_count,
            media,
            table: None,
        };

        let current = disk.file.metadata().map_err(io_error)?.len();
        let wanted = disk.capacity();
        if current < wanted {
            debug!(
                "disk: growing {} from {} to {} bytes",
                path.display(),
                current,
                wanted
            );
            disk.fill(current, wanted - current)?;
        }

        let sidecar = table_path(path);
        if sidecar.exists() {
            let text = fs::read_to_string(&sidecar).map_err(io_error)?;
            let table: TableFile =
                toml::from_str(&text).map_err(|e| StorageError::Io(e.to_string()))?;
            debug!(
                "disk: {} table with {} partitions from {}",
                table.kind,
                table.partitions.len(),
                sidecar.display()
            );
            disk.table = Some(table);
        }
        Ok(disk)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> Option<&TableFile> {
        self.table.as_ref()
    }

    fn capacity(&self) -> u64 {
        self.block_count * self.block_size as u64
    }

    fn erased(&self) -> u8 {
        match self.media {
            Media::Emmc => 0x00,
            Media::Nor { .. } | Media::Nand { .. } => 0xFF,
        }
    }

    fn fill(&mut self, offset: u64, len: u64) -> Result<(), StorageError> {
        let chunk = vec![self.erased(); FILL_CHUNK];
        self.file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        let mut left = len;
        while left > 0 {
            let n = left.min(FILL_CHUNK as u64) as usize;
            self.file.write_all(&chunk[..n]).map_err(io_error)?;
            left -= n as u64;
        }
        Ok(())
    }

    /// Byte offset of block `start` after checking `count` blocks fit.
    fn locate(&self, start: u64, count: u64) -> Result<u64, StorageError> {
        match start.checked_add(count) {
            Some(end) if end <= self.block_count => Ok(start * self.block_size as u64),
            _ => Err(StorageError::OutOfRange { start, count }),
        }
    }

    fn blocks_in(&self, len: usize) -> Result<u64, StorageError> {
        if len % self.block_size as usize != 0 {
            return Err(StorageError::Unaligned(len));
        }
        Ok((len / self.block_size as usize) as u64)
    }
}

impl BlockDevice for FileDisk {
    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn media(&self) -> Media {
        self.media
    }

    fn read_blocks(&mut self, start: u64, buf: &mut [u8]) -> Result<u64, StorageError> {
        let count = self.blocks_in(buf.len())?;
        let offset = self.locate(start, count)?;
        self.file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        self.file.read_exact(buf).map_err(io_error)?;
        Ok(count)
    }

    fn write_blocks(&mut self, start: u64, buf: &[u8]) -> Result<u64, StorageError> {
        let count = self.blocks_in(buf.len())?;
        let offset = self.locate(start, count)?;
        self.file.seek(SeekFrom::Start(offset)).map_err(io_error)?;
        self.file.write_all(buf).map_err(io_error)?;
        Ok(count)
    }

    fn erase_blocks(&mut self, start: u64, count: u64) -> Result<(), StorageError> {
        let offset = self.locate(start, count)?;
        self.fill(offset, count * self.block_size as u64)
    }

    fn find_partition(&mut self, name: &str) -> Result<PartitionInfo, StorageError> {
        let missing = || StorageError::NoPartition(String::from(name));
        let entry = self.table.as_ref().and_then(|t| t.get(name)).ok_or_else(missing)?;
        let blksz = self.block_size as u64;
        Ok(PartitionInfo {
            name: DiskName::try_from(name).map_err(|_| missing())?,
            start: entry.offset / blksz,
            size: entry.size.div_ceil(blksz),
            blksz: self.block_size,
        })
    }

    fn write_table(&mut self, table: &DeviceTable) -> Result<(), StorageError> {
        let fits = matches!(
            (table, self.media),
            (DeviceTable::Gpt(_), Media::Emmc)
                | (DeviceTable::Mtd(_), Media::Nor { .. } | Media::Nand { .. })
        );
        if !fits {
            return Err(StorageError::UnsupportedTable(table.kind()));
        }

        let sidecar = TableFile::from_device_table(table);
        let text = toml::to_string(&sidecar).map_err(|e| StorageError::Io(e.to_string()))?;
        let path = table_path(&self.path);
        fs::write(&path, text).map_err(io_error)?;
        info!(
            "disk: wrote {} table ({} partitions) to {}",
            sidecar.kind,
            sidecar.partitions.len(),
            path.display()
        );
        self.table = Some(sidecar);
        Ok(())
    }
}

/// File-backed devices behind a configured boot device.
pub struct FileStorage {
    boot_device: BootDevice,
    devices: Vec<(DeviceKind, u32, FileDisk)>,
}

impl FileStorage {
    pub fn new(boot_device: BootDevice) -> Self {
        Self {
            boot_device,
            devices: Vec::new(),
        }
    }

    pub fn add(&mut self, kind: DeviceKind, index: u32, disk: FileDisk) {
        self.devices.push((kind, index, disk));
    }

    /// First device holding `name`, in configuration order.
    pub fn find_partition(
        &mut self,
        name: &str,
    ) -> Result<(&mut FileDisk, PartitionInfo), StorageError> {
        for (_, _, disk) in self.devices.iter_mut() {
            if let Ok(info) = disk.find_partition(name) {
                return Ok((disk, info));
            }
        }
        Err(StorageError::NoPartition(String::from(name)))
    }
}

impl Storage for FileStorage {
    fn boot_device(&self) -> Result<BootDevice, StorageError> {
        Ok(self.boot_device)
    }

    fn device(
        &mut self,
        kind: DeviceKind,
        index: u32,
    ) -> Result<&mut dyn BlockDevice, StorageError> {
        self.devices
            .iter_mut()
            .find(|(k, i, _)| *k == kind && *i == index)
            .map(|(_, _, disk)| disk as &mut dyn BlockDevice)
            .ok_or(StorageError::NoDevice { kind, index })
    }
}
