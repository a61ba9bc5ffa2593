// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Key/value environment accessor.

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};

pub const ENV_MMC_DEV: &str = "mmc_dev";
pub const ENV_MAIN_MTD: &str = "main_mtd";
pub const ENV_SAFE_MTD: &str = "safe_mtd";
pub const ENV_MAIN_BOOTMODE: &str = "main_bootmode";
pub const ENV_FILESIZE: &str = "filesize";

pub trait Environment {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);

    /// Decimal value of `key`, `None` when missing or unparsable.
    fn get_ulong(&self, key: &str) -> Option<u64> {
        self.get(key)?.trim().parse().ok()
    }

    fn set_ulong(&mut self, key: &str, value: u64) {
        self.set(key, &value.to_string());
    }

    fn set_hex(&mut self, key: &str, value: u64) {
        self.set(key, &format!("{:x}", value));
    }
}

impl Environment for BTreeMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        BTreeMap::get(self, key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.insert(key.to_string(), value.to_string());
    }
}
