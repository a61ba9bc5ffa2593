// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Per-connection download state.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

use crate::payload::{PartName, TransferTarget};

/// Link progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Idle,
    Handshaking,
    Connected,
}

/// Download progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    NoTransfer,
    Receiving,
    Complete,
}

/// Open START_READ window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadCursor {
    pub partition: PartName,
    pub offset: u64,
    pub remaining: u64,
}

/// Session counters. `bytes_received <= bytes_expected` holds at all times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    link: LinkState,
    transfer: TransferState,
    bytes_expected: u32,
    bytes_received: u32,
    target: Option<TransferTarget>,
    execute_count: u32,
    image_size: u32,
    pending_commit: bool,
    read: Option<ReadCursor>,
}

impl Session {
    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn transfer(&self) -> TransferState {
        self.transfer
    }

    pub fn bytes_expected(&self) -> u32 {
        self.bytes_expected
    }

    pub fn bytes_received(&self) -> u32 {
        self.bytes_received
    }

    pub fn target(&self) -> Option<&TransferTarget> {
        self.target.as_ref()
    }

    /// Partition of the current or last transfer.
    pub fn target_partition(&self) -> Option<&str> {
        match &self.target {
            Some(TransferTarget::Partition(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn execute_count(&self) -> u32 {
        self.execute_count
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    /// A completed image waits for an EXECUTE before it is written.
    pub fn has_pending_commit(&self) -> bool {
        self.pending_commit
    }

    pub fn read_cursor(&self) -> Option<&ReadCursor> {
        self.read.as_ref()
    }

    pub(crate) fn set_link(&mut self, link: LinkState) {
        self.link = link;
    }

    pub(crate) fn begin(&mut self, target: TransferTarget, size: u32) {
        self.transfer = TransferState::Receiving;
        self.target = Some(target);
        self.bytes_expected = size;
        self.bytes_received = 0;
        self.pending_commit = false;
    }

    /// Record `len` more bytes. The caller has checked the bound.
    pub(crate) fn accept(&mut self, len: u32) {
        debug_assert!(self.bytes_received + len <= self.bytes_expected);
        self.bytes_received += len;
    }

    /// Close the transfer and return the image size.
    pub(crate) fn complete(&mut self) -> u32 {
        self.image_size = self.bytes_received;
        self.bytes_expected = 0;
        self.bytes_received = 0;
        self.transfer = TransferState::Complete;
        self.image_size
    }

    pub(crate) fn set_pending_commit(&mut self, pending: bool) {
        self.pending_commit = pending;
    }

    pub(crate) fn count_execute(&mut self) {
        self.execute_count += 1;
    }

    pub(crate) fn open_read(&mut self, cursor: ReadCursor) {
        self.read = Some(cursor);
    }

    pub(crate) fn read_mut(&mut self) -> Option<&mut ReadCursor> {
        self.read.as_mut()
    }

    pub(crate) fn close_read(&mut self) {
        self.read = None;
    }
}

/// Scratch region holding the image of the current transfer.
#[derive(Debug, Default)]
pub struct DownloadBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl DownloadBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop previous content and reserve room for `size` bytes.
    pub fn start(&mut self, size: usize) -> Result<(), TryReserveError> {
        self.data.clear();
        self.data.try_reserve_exact(size)
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
