// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! The flash operations the dispatcher delegates to.

use alloc::string::String;

use thiserror::Error;

use crate::partition::{BuildError, Geometry, PartitionLayout};
use crate::payload::EraseScope;
use crate::storage::{BootDevice, StorageError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("image of {image} bytes does not fit '{name}' ({capacity} bytes)")]
    ImageTooLarge {
        name: String,
        image: u64,
        capacity: u64,
    },
    #[error("boot device {0:?} has no such medium")]
    UnsupportedBootDevice(BootDevice),
}

/// Block-write, block-erase and block-write-partition collaborators.
pub trait FlashBackend {
    /// Boot device and media facts for the partition router.
    fn geometry(&mut self) -> Result<Geometry, FlashError>;

    /// Persist a completed download into `partition`.
    fn write_image(&mut self, partition: &str, image: &[u8]) -> Result<(), FlashError>;

    /// Fill `buf` from `partition` starting at byte `offset`.
    fn read_image(&mut self, partition: &str, offset: u64, buf: &mut [u8])
        -> Result<(), FlashError>;

    fn erase(&mut self, scope: &EraseScope) -> Result<(), FlashError>;

    /// Write routed partition tables to their devices.
    fn write_layout(&mut self, layout: &PartitionLayout) -> Result<(), FlashError>;
}
