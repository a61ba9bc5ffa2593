// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Board description file.
//!
//! ```toml
//! boot_device = "both-nor-emmc"
//! env_file = "env.toml"
//! safety_register = "safety_abc.reg"
//!
//! [fdl]
//! stage = "fdl2"
//! chip_id = 0x6d415800
//!
//! [[device]]
//! kind = "mmc"
//! index = 0
//! image = "emmc.img"
//! block_count = 262144
//! media = { type = "emmc" }
//!
//! [[device]]
//! kind = "mtd"
//! index = 0
//! image = "nor.img"
//! block_count = 65536
//! media = { type = "nor", erase_size = 65536 }
//! ```
//!
//! Relative paths are taken from the directory of the board file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

use fdl_common::board::BoardDefaults;
use fdl_common::config::FdlConfig;
use fdl_common::storage::{BootDevice, DeviceKind, Media};

use crate::disk::{FileDisk, FileStorage};

fn default_block_size() -> u32 {
    512
}

/// One block device of the board.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DeviceSpec {
    pub kind: DeviceKind,
    pub index: u32,
    pub image: PathBuf,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    pub block_count: u64,
    pub media: Media,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BoardFile {
    pub boot_device: BootDevice,
    #[serde(default)]
    pub defaults: BoardDefaults,
    /// Seed values for the environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Where the environment persists between runs.
    #[serde(default)]
    pub env_file: Option<PathBuf>,
    /// File standing in for the SafetyABC syscon register.
    #[serde(default)]
    pub safety_register: Option<PathBuf>,
    #[serde(default)]
    pub fdl: FdlConfig,
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceSpec>,
}

impl BoardFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read board file {}", path.display()))?;
        let mut board = Self::parse(&text)
            .with_context(|| format!("Invalid board file {}", path.display()))?;
        if let Some(dir) = path.parent() {
            board.resolve_paths(dir);
        }
        Ok(board)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn resolve_paths(&mut self, dir: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        for dev in &mut self.devices {
            resolve(&mut dev.image);
        }
        if let Some(p) = self.env_file.as_mut() {
            resolve(p);
        }
        if let Some(p) = self.safety_register.as_mut() {
            resolve(p);
        }
    }

    pub fn open_storage(&self) -> Result<FileStorage> {
        let mut storage = FileStorage::new(self.boot_device);
        for dev in &self.devices {
            let disk = FileDisk::open(&dev.image, dev.media, dev.block_size, dev.block_count)
                .with_context(|| format!("Failed to open {}", dev.image.display()))?;
            debug!(
                "board: {}{} -> {} ({} x {} bytes)",
                dev.kind,
                dev.index,
                dev.image.display(),
                dev.block_count,
                dev.block_size
            );
            storage.add(dev.kind, dev.index, disk);
        }
        Ok(storage)
    }

    /// Seed values overlaid with the persisted environment.
    pub fn load_env(&self) -> Result<BTreeMap<String, String>> {
        let mut env = self.env.clone();
        if let Some(path) = self.env_file.as_deref().filter(|p| p.exists()) {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let saved: BTreeMap<String, String> = toml::from_str(&text)
                .with_context(|| format!("Invalid environment file {}", path.display()))?;
            env.extend(saved);
        }
        Ok(env)
    }

    pub fn save_env(&self, env: &BTreeMap<String, String>) -> Result<()> {
        let Some(path) = self.env_file.as_deref() else {
            return Ok(());
        };
        fs::write(path, toml::to_string(env)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("board: environment saved to {}", path.display());
        Ok(())
    }
}
