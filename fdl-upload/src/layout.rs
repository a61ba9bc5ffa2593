// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Partition layout files for `repartition`.
//!
//! ```toml
//! unit = "kib"
//!
//! [[partition]]
//! name = "emmc"      # boot medium marker, size 0
//! size = 0
//!
//! [[partition]]
//! name = "misc"
//! size = 64
//!
//! [[partition]]
//! name = "kernel_a"
//! size = 16384
//! gap = 1024
//! ```

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use fdl_common::payload::{part_name, PartitionDescriptor, PartitionHeader, RepartitionRequest};
use fdl_common::protocol::{SizeUnit, PARTITION_TABLE_MAGIC};

fn default_version() -> u8 {
    1
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LayoutEntry {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub gap: u64,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LayoutFile {
    #[serde(default)]
    pub unit: SizeUnit,
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(rename = "partition")]
    pub partitions: Vec<LayoutEntry>,
}

impl LayoutFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid layout file {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_request(&self) -> Result<RepartitionRequest> {
        let count = match u16::try_from(self.partitions.len()) {
            Ok(n) if n > 0 => n,
            _ => bail!("Layout must list 1 to {} partitions", u16::MAX),
        };
        let descriptors = self
            .partitions
            .iter()
            .map(|entry| {
                Ok(PartitionDescriptor {
                    name: part_name(&entry.name)
                        .with_context(|| format!("Bad partition name '{}'", entry.name))?,
                    size: entry.size,
                    gap: entry.gap,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(RepartitionRequest {
            header: PartitionHeader {
                magic: PARTITION_TABLE_MAGIC,
                version: self.version,
                unit: self.unit,
                count,
            },
            descriptors,
        })
    }
}
