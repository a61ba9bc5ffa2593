// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! SafetyABC register kept in a file as `0x%08x` text.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::error;

use fdl_common::safety_abc::{SafetyError, SafetyRegister};

pub struct FileRegister {
    path: PathBuf,
}

impl FileRegister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SafetyRegister for FileRegister {
    /// A missing file reads as a cleared register.
    fn read(&mut self) -> Result<u32, SafetyError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                error!("safety: reading {} failed: {}", self.path.display(), e);
                return Err(SafetyError::Register("read failed"));
            }
        };
        let text = text.trim();
        let digits = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .unwrap_or(text);
        u32::from_str_radix(digits, 16).map_err(|e| {
            error!("safety: bad register value '{}': {}", text, e);
            SafetyError::Register("bad value")
        })
    }

    fn write(&mut self, value: u32) -> Result<(), SafetyError> {
        fs::write(&self.path, format!("{:#010x}\n", value)).map_err(|e| {
            error!("safety: writing {} failed: {}", self.path.display(), e);
            SafetyError::Register("write failed")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdl_common::safety_abc::{self, SlotMark};
    use temp_dir::TempDir;

    #[test]
    fn test_missing_file_reads_zero() {
        let tmp = TempDir::new().unwrap();
        let mut reg = FileRegister::new(tmp.path().join("reg"));
        assert_eq!(reg.read(), Ok(0));
    }

    #[test]
    fn test_text_format() {
        let tmp = TempDir::new().unwrap();
        let mut reg = FileRegister::new(tmp.path().join("reg"));
        reg.write(0xC).unwrap();
        assert_eq!(fs::read_to_string(reg.path()).unwrap(), "0x0000000c\n");
        assert_eq!(reg.read(), Ok(0xC));
    }

    #[test]
    fn test_unbootable_moves_current_slot() {
        let tmp = TempDir::new().unwrap();
        let mut reg = FileRegister::new(tmp.path().join("reg"));
        safety_abc::setup(&mut reg, SlotMark::Unbootable, 0).unwrap();
        assert_eq!(safety_abc::current_slot(&mut reg), Ok(1));
        safety_abc::setup(&mut reg, SlotMark::Active, 0).unwrap();
        assert_eq!(safety_abc::current_slot(&mut reg), Ok(0));
    }

    #[test]
    fn test_garbage_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("reg");
        fs::write(&path, "slot a").unwrap();
        let mut reg = FileRegister::new(path);
        assert_eq!(reg.read(), Err(SafetyError::Register("bad value")));
    }
}
