// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! [`FlashBackend`] over block storage, routed by the strapped boot device.
//!
//! Device numbers come from the environment (`mmc_dev`, `main_mtd`,
//! `safe_mtd`) and fall back to the board defaults when unset.

use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use crate::backend::{FlashBackend, FlashError};
use crate::env::{
    Environment, ENV_FILESIZE, ENV_MAIN_BOOTMODE, ENV_MAIN_MTD, ENV_MMC_DEV, ENV_SAFE_MTD,
};
use crate::partition::{Geometry, PartitionLayout};
use crate::payload::EraseScope;
use crate::protocol::SECTOR_SIZE;
use crate::storage::{
    read_bytes, write_exact_blocks, BlockDevice, BootDevice, DeviceKind, Media, PartitionInfo,
    Storage, StorageError,
};

/// Device numbers used when the environment does not name one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BoardDefaults {
    pub mmc_dev: u32,
    pub main_mtd: u32,
    pub safe_mtd: u32,
}

impl Default for BoardDefaults {
    fn default() -> Self {
        Self {
            mmc_dev: 0,
            main_mtd: 1,
            safe_mtd: 0,
        }
    }
}

pub struct BoardFlash<S, E> {
    storage: S,
    env: E,
    defaults: BoardDefaults,
}

impl<S: Storage, E: Environment> BoardFlash<S, E> {
    pub fn new(storage: S, env: E, defaults: BoardDefaults) -> Self {
        Self {
            storage,
            env,
            defaults,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn into_parts(self) -> (S, E) {
        (self.storage, self.env)
    }

    fn devnum(&self, key: &str, default: u32) -> u32 {
        self.env
            .get_ulong(key)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(default)
    }

    fn main_device(&self, boot: BootDevice) -> Option<(DeviceKind, u32)> {
        match boot {
            BootDevice::OnlyEmmc | BootDevice::BothNorEmmc => {
                Some((DeviceKind::Mmc, self.devnum(ENV_MMC_DEV, self.defaults.mmc_dev)))
            }
            BootDevice::OnlyNand | BootDevice::BothNorNand => {
                Some((DeviceKind::Mtd, self.devnum(ENV_MAIN_MTD, self.defaults.main_mtd)))
            }
            _ => None,
        }
    }

    fn safety_device(&self, boot: BootDevice) -> Option<(DeviceKind, u32)> {
        match boot {
            BootDevice::BothNorNand | BootDevice::BothNorEmmc => {
                Some((DeviceKind::Mtd, self.devnum(ENV_SAFE_MTD, self.defaults.safe_mtd)))
            }
            _ => None,
        }
    }

    fn media_devices(&self) -> Result<Vec<(DeviceKind, u32)>, FlashError> {
        let boot = self.storage.boot_device()?;
        let devices: Vec<_> = [self.main_device(boot), self.safety_device(boot)]
            .into_iter()
            .flatten()
            .collect();
        if devices.is_empty() {
            return Err(FlashError::UnsupportedBootDevice(boot));
        }
        Ok(devices)
    }

    /// Find `name` on the main medium first, then on the safety medium.
    fn locate(&mut self, name: &str) -> Result<(DeviceKind, u32, PartitionInfo), FlashError> {
        for (kind, index) in self.media_devices()? {
            let dev = match self.storage.device(kind, index) {
                Ok(dev) => dev,
                Err(e) => {
                    debug!("flash: {}{} unavailable: {}", kind, index, e);
                    continue;
                }
            };
            if let Ok(info) = dev.find_partition(name) {
                return Ok((kind, index, info));
            }
        }
        Err(StorageError::NoPartition(String::from(name)).into())
    }
}

fn capacity_sectors(dev: &dyn BlockDevice) -> u64 {
    dev.block_count() * dev.block_size() as u64 / SECTOR_SIZE as u64
}

impl<S: Storage, E: Environment> FlashBackend for BoardFlash<S, E> {
    fn geometry(&mut self) -> Result<Geometry, FlashError> {
        let boot = self.storage.boot_device()?;
        let mut geometry = Geometry {
            boot_device: boot,
            nand_erase_size: 0,
            main_capacity: None,
            safety_capacity: None,
        };

        if let Some((kind, index)) = self.main_device(boot) {
            if let Ok(dev) = self.storage.device(kind, index) {
                geometry.main_capacity = Some(capacity_sectors(dev));
                if let Media::Nand { erase_size } = dev.media() {
                    geometry.nand_erase_size = erase_size;
                }
            }
        }
        if let Some((kind, index)) = self.safety_device(boot) {
            if let Ok(dev) = self.storage.device(kind, index) {
                geometry.safety_capacity = Some(capacity_sectors(dev));
            }
        }
        Ok(geometry)
    }

    fn write_image(&mut self, partition: &str, image: &[u8]) -> Result<(), FlashError> {
        let (kind, index, info) = self.locate(partition)?;
        let blksz = info.blksz as usize;
        let blocks = image.len().div_ceil(blksz);
        if blocks as u64 > info.size {
            return Err(FlashError::ImageTooLarge {
                name: String::from(partition),
                image: image.len() as u64,
                capacity: info.size_bytes(),
            });
        }

        let mut padded = Vec::with_capacity(blocks * blksz);
        padded.extend_from_slice(image);
        padded.resize(blocks * blksz, 0xFF);

        let dev = self.storage.device(kind, index)?;
        if let Err(e) = write_exact_blocks(dev, info.start, &padded) {
            error!("flash: writing '{}' failed: {}", partition, e);
            return Err(e.into());
        }
        self.env.set_hex(ENV_FILESIZE, image.len() as u64);
        info!(
            "flash: wrote {} bytes to '{}' on {}{} ({} blocks at {})",
            image.len(),
            partition,
            kind,
            index,
            blocks,
            info.start
        );
        Ok(())
    }

    fn read_image(
        &mut self,
        partition: &str,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<(), FlashError> {
        let (kind, index, info) = self.locate(partition)?;
        let dev = self.storage.device(kind, index)?;
        let data = read_bytes(dev, &info, offset, buf.len())?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    fn erase(&mut self, scope: &EraseScope) -> Result<(), FlashError> {
        match scope {
            EraseScope::All => {
                for (kind, index) in self.media_devices()? {
                    let dev = self.storage.device(kind, index)?;
                    let count = dev.block_count();
                    dev.erase_blocks(0, count)?;
                    info!("flash: erased {}{} ({} blocks)", kind, index, count);
                }
            }
            EraseScope::Partition { name, size } => {
                let (kind, index, info) = self.locate(name)?;
                let blocks = if *size == 0 || *size == u64::MAX {
                    info.size
                } else {
                    size.div_ceil(info.blksz as u64).min(info.size)
                };
                self.storage
                    .device(kind, index)?
                    .erase_blocks(info.start, blocks)?;
                info!("flash: erased '{}' ({} blocks)", name, blocks);
            }
        }
        Ok(())
    }

    fn write_layout(&mut self, layout: &PartitionLayout) -> Result<(), FlashError> {
        let boot = self.storage.boot_device()?;

        // Resolve every target before the first write so a missing device
        // leaves all tables untouched.
        let mut writes = Vec::new();
        for (table, device) in [
            (&layout.safety, self.safety_device(boot)),
            (&layout.main, self.main_device(boot)),
        ] {
            if let Some(table) = table {
                let (kind, index) = device.ok_or(FlashError::UnsupportedBootDevice(boot))?;
                self.storage.device(kind, index)?;
                writes.push((table, kind, index));
            }
        }

        for (table, kind, index) in writes {
            self.storage.device(kind, index)?.write_table(table)?;
            info!(
                "flash: {} table with {} partitions on {}{}",
                table.kind(),
                table.table().number(),
                kind,
                index
            );
        }
        if let Some(mode) = layout.boot_mode {
            self.env.set_ulong(ENV_MAIN_BOOTMODE, mode.number() as u64);
        }
        Ok(())
    }
}
