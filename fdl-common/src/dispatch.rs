// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command dispatcher and download state machine.
//!
//! Every decoded frame goes through [`Fdl::dispatch`], which runs the
//! handler for its bytecode and returns the reply plus an optional
//! follow-up for the transport loop:
//! - HANDSHAKE / CONNECT: link negotiation
//! - START_DATA / MID_DATA / END_DATA: image download into the buffer
//! - EXECUTE: run the staged image, commit a deferred download
//! - ERASE / REPARTITION: flash management
//! - START_READ / MID_READ / END_READ: partition read-back
//!
//! A handler either succeeds and updates the session, or fails and leaves
//! it untouched. Failures become a reply carrying the error's tag.

use alloc::vec;

use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::backend::{FlashBackend, FlashError};
use crate::checksum::raw_data_checksum;
use crate::config::{DataMode, FdlConfig};
use crate::packet::{Codec, CodecError, FdlPacket, Response};
use crate::partition::{self, BuildError};
use crate::payload::{
    decode_u32, EraseScope, PayloadError, RawTransfer, ReadRequest, RepartitionRequest,
    TransferRequest, TransferTarget,
};
use crate::protocol::{Command, ResponseTag, PARTITION_TABLE_MAGIC};
use crate::session::{DownloadBuffer, LinkState, ReadCursor, Session, TransferState};
use crate::storage::StorageError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FdlError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("transfer of {size} bytes outside 1..={capacity}")]
    InvalidSize { size: u64, capacity: usize },
    #[error("{incoming} more bytes overrun the {expected} byte transfer at {received}")]
    Overrun {
        expected: u32,
        received: u32,
        incoming: usize,
    },
    #[error("transfer incomplete: {received} of {expected} bytes")]
    Incomplete { expected: u32, received: u32 },
    #[error("no transfer in progress")]
    NoTransfer,
    #[error("no read in progress")]
    NoRead,
    #[error("read window exhausted")]
    ReadExhausted,
    #[error("raw data checksum 0x{actual:08x}, host sent 0x{expected:08x}")]
    RawChecksum { expected: u32, actual: u32 },
    #[error("out of memory")]
    ResourceExhausted,
}

impl FdlError {
    /// The reply tag reported to the host.
    pub fn response_tag(&self) -> ResponseTag {
        match self {
            FdlError::Payload(PayloadError::BadName | PayloadError::NameTooLong) => {
                ResponseTag::InvalidPartition
            }
            FdlError::Payload(_) => ResponseTag::InvalidCommand,
            FdlError::Flash(FlashError::Build(e)) | FdlError::Build(e) => build_tag(e),
            FdlError::Flash(FlashError::Storage(StorageError::NoPartition(_))) => {
                ResponseTag::InvalidPartition
            }
            FdlError::Flash(FlashError::ImageTooLarge { .. }) => ResponseTag::InvalidSize,
            FdlError::Flash(_) => ResponseTag::OperationFailure,
            FdlError::InvalidSize { .. }
            | FdlError::Overrun { .. }
            | FdlError::Incomplete { .. }
            | FdlError::ReadExhausted => ResponseTag::InvalidSize,
            FdlError::NoTransfer | FdlError::NoRead => ResponseTag::InvalidCommand,
            FdlError::RawChecksum { .. } => ResponseTag::ChecksumVerifyFailure,
            FdlError::ResourceExhausted => ResponseTag::OperationFailure,
        }
    }
}

fn build_tag(e: &BuildError) -> ResponseTag {
    match e {
        BuildError::DuplicatePartitionName(_)
        | BuildError::InvalidPartitionName(_)
        | BuildError::EmptySubTable(_)
        | BuildError::EmptyTable
        | BuildError::Overlap(_)
        | BuildError::UnknownBootMode(_) => ResponseTag::InvalidPartition,
        BuildError::SizeOverflow(_) | BuildError::CapacityExceeded { .. } => {
            ResponseTag::InvalidSize
        }
        BuildError::UnsupportedBootDevice(_) | BuildError::ResourceExhausted => {
            ResponseTag::OperationFailure
        }
    }
}

/// Work the transport loop performs after sending the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    /// Pull `len` raw bytes and feed them to [`Fdl::receive_raw`].
    ReceiveRaw(RawTransfer),
    /// Hand control to the staged image. `addr` is set for RAM targets.
    Execute { addr: Option<u64> },
    ChangeBaud(u32),
    Reboot,
    PowerOff,
}

/// Reply to one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub response: Response,
    pub followup: Option<Followup>,
}

impl Outcome {
    pub fn reply(response: Response) -> Self {
        Self {
            response,
            followup: None,
        }
    }

    pub fn with(response: Response, followup: Followup) -> Self {
        Self {
            response,
            followup: Some(followup),
        }
    }
}

/// The FDL engine: configuration, session, download buffer and the flash
/// backend it commits to.
pub struct Fdl<B> {
    config: FdlConfig,
    session: Session,
    buffer: DownloadBuffer,
    backend: B,
}

impl<B: FlashBackend> Fdl<B> {
    pub fn new(config: FdlConfig, backend: B) -> Self {
        let buffer = DownloadBuffer::new(config.buffer_capacity);
        Self {
            config,
            session: Session::default(),
            buffer,
            backend,
        }
    }

    pub fn config(&self) -> &FdlConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn buffer(&self) -> &DownloadBuffer {
        &self.buffer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    pub fn codec(&self) -> Codec {
        self.config.codec()
    }

    /// Forget everything about the previous connection.
    pub fn reset_session(&mut self) {
        self.session = Session::default();
        self.buffer = DownloadBuffer::new(self.config.buffer_capacity);
    }

    /// Reply for a frame that failed to decode.
    pub fn reject(&self, err: &CodecError) -> Response {
        warn!("fdl: dropping frame: {}", err);
        Response::empty(err.response_tag())
    }

    /// Run the handler for one decoded frame.
    pub fn dispatch(&mut self, packet: &FdlPacket) -> Outcome {
        let Some(command) = packet.command() else {
            warn!("fdl: unknown bytecode {:#06x}", packet.bytecode);
            return Outcome::reply(Response::text(
                ResponseTag::UnknownCommand,
                "unrecognized command",
            ));
        };
        trace!("fdl: {} ({} byte payload)", command.name(), packet.size());

        match self.handle_command(command, &packet.payload) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("fdl: {} failed: {}", command.name(), e);
                Outcome::reply(Response::empty(e.response_tag()))
            }
        }
    }

    fn handle_command(&mut self, command: Command, payload: &[u8]) -> Result<Outcome, FdlError> {
        match command {
            Command::Handshake => Ok(self.handle_handshake()),
            Command::Connect => Ok(self.handle_connect()),
            Command::StartData => self.handle_start_data(payload),
            Command::MidData => self.handle_mid_data(payload),
            Command::EndData => self.handle_end_data(),
            Command::Execute => self.handle_execute(),
            Command::Reboot => Ok(Outcome::with(Response::okay(), Followup::Reboot)),
            Command::PowerOff => Ok(Outcome::with(Response::okay(), Followup::PowerOff)),
            Command::ReadChipId => Ok(Outcome::reply(Response::data(
                ResponseTag::ChipId,
                &self.config.chip_id.to_le_bytes(),
            ))),
            Command::ReadChipUid => Ok(Outcome::reply(Response::data(
                ResponseTag::ChipUid,
                &self.config.chip_uid,
            ))),
            Command::SetBaud => {
                let baud = decode_u32("set-baud", payload)?;
                Ok(Outcome::with(Response::okay(), Followup::ChangeBaud(baud)))
            }
            Command::Erase => self.handle_erase(payload),
            Command::Repartition => self.handle_repartition(payload),
            Command::StartRead => self.handle_start_read(payload),
            Command::MidRead => self.handle_mid_read(payload),
            Command::EndRead => {
                self.session.close_read();
                Ok(Outcome::reply(Response::okay()))
            }
        }
    }

    fn handle_handshake(&mut self) -> Outcome {
        self.session.set_link(LinkState::Handshaking);
        Outcome::reply(Response::text(
            ResponseTag::Version,
            &self.config.handshake_text(),
        ))
    }

    fn handle_connect(&mut self) -> Outcome {
        if self.session.link() == LinkState::Idle {
            debug!("fdl: CONNECT without handshake");
        }
        self.session.set_link(LinkState::Connected);
        info!("fdl: host connected ({})", self.config.stage.name());
        Outcome::reply(Response::okay())
    }

    /// START_DATA: validate the size, reserve the buffer, begin receiving.
    fn handle_start_data(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        let request = TransferRequest::decode(self.config.stage, payload)?;

        let capacity = self.buffer.capacity();
        let size = match u32::try_from(request.size) {
            Ok(size) if size != 0 && request.size <= capacity as u64 => size,
            _ => {
                return Err(FdlError::InvalidSize {
                    size: request.size,
                    capacity,
                })
            }
        };

        if self.session.has_pending_commit() {
            warn!("fdl: new download discards an uncommitted image");
        }
        self.buffer
            .start(size as usize)
            .map_err(|_| FdlError::ResourceExhausted)?;

        match &request.target {
            TransferTarget::Partition(name) => {
                info!("fdl: receiving {} bytes for '{}'", size, name)
            }
            TransferTarget::Address(addr) => {
                info!("fdl: receiving {} bytes for {:#x}", size, addr)
            }
        }
        self.session.begin(request.target, size);
        Ok(Outcome::reply(Response::okay()))
    }

    /// MID_DATA: the chunk is the payload, or announces a raw block.
    fn handle_mid_data(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        match self.config.data_mode {
            DataMode::Packet => {
                self.data_download(payload)?;
                Ok(Outcome::reply(Response::ack()))
            }
            DataMode::Raw => {
                let raw = RawTransfer::decode(payload)?;
                self.check_chunk(raw.len as usize)?;
                Ok(Outcome::with(Response::ack(), Followup::ReceiveRaw(raw)))
            }
        }
    }

    fn check_chunk(&self, len: usize) -> Result<(), FdlError> {
        if self.session.transfer() != TransferState::Receiving {
            return Err(FdlError::NoTransfer);
        }
        let expected = self.session.bytes_expected();
        let received = self.session.bytes_received();
        if len == 0 || received as u64 + len as u64 > expected as u64 {
            return Err(FdlError::Overrun {
                expected,
                received,
                incoming: len,
            });
        }
        Ok(())
    }

    /// Append a chunk to the current transfer.
    pub fn data_download(&mut self, data: &[u8]) -> Result<(), FdlError> {
        self.check_chunk(data.len())?;
        self.buffer.append(data);
        self.session.accept(data.len() as u32);
        trace!(
            "fdl: {}/{} bytes",
            self.session.bytes_received(),
            self.session.bytes_expected()
        );
        Ok(())
    }

    /// Verify and store a raw block announced by MID_DATA.
    pub fn receive_raw(&mut self, raw: &RawTransfer, data: &[u8]) -> Response {
        let result = self.verify_raw(raw, data).and_then(|_| self.data_download(data));
        match result {
            Ok(()) => Response::ack(),
            Err(e) => {
                warn!("fdl: raw block rejected: {}", e);
                Response::empty(e.response_tag())
            }
        }
    }

    fn verify_raw(&self, raw: &RawTransfer, data: &[u8]) -> Result<(), FdlError> {
        if data.len() != raw.len as usize {
            return Err(FdlError::Overrun {
                expected: raw.len,
                received: 0,
                incoming: data.len(),
            });
        }
        if raw.checksum_enabled {
            let actual = raw_data_checksum(data);
            if actual != raw.checksum {
                return Err(FdlError::RawChecksum {
                    expected: raw.checksum,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// END_DATA: close the transfer and write it, or hold it for EXECUTE.
    fn handle_end_data(&mut self) -> Result<Outcome, FdlError> {
        self.data_complete()?;
        Ok(Outcome::reply(Response::ack()))
    }

    pub fn data_complete(&mut self) -> Result<(), FdlError> {
        // Must be receiving
        if self.session.transfer() != TransferState::Receiving {
            return Err(FdlError::NoTransfer);
        }

        // Every announced byte must have arrived
        let expected = self.session.bytes_expected();
        let received = self.session.bytes_received();
        if received < expected {
            return Err(FdlError::Incomplete { expected, received });
        }

        let policy = self.config.commit_policy();
        let mut pending = false;
        match self.session.target() {
            Some(TransferTarget::Partition(name)) => {
                if policy.allows(self.session.execute_count()) {
                    self.backend.write_image(name, self.buffer.as_slice())?;
                } else {
                    info!("fdl: '{}' held until EXECUTE", name);
                    pending = true;
                }
            }
            Some(TransferTarget::Address(addr)) => {
                info!("fdl: {} bytes staged at {:#x}", received, addr);
            }
            None => return Err(FdlError::NoTransfer),
        }

        self.session.complete();
        self.session.set_pending_commit(pending);
        Ok(())
    }

    /// EXECUTE: count it, commit a held image once the policy allows.
    fn handle_execute(&mut self) -> Result<Outcome, FdlError> {
        let count = self.session.execute_count() + 1;

        if self.session.has_pending_commit() && self.config.commit_policy().allows(count) {
            if let Some(name) = self.session.target_partition() {
                self.backend.write_image(name, self.buffer.as_slice())?;
                info!("fdl: committed '{}' on EXECUTE {}", name, count);
            }
            self.session.set_pending_commit(false);
        }

        self.session.count_execute();
        let addr = match self.session.target() {
            Some(TransferTarget::Address(addr)) => Some(*addr),
            _ => None,
        };
        Ok(Outcome::with(Response::okay(), Followup::Execute { addr }))
    }

    fn handle_erase(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        let scope = EraseScope::decode(payload)?;
        self.backend.erase(&scope)?;
        Ok(Outcome::reply(Response::okay()))
    }

    /// REPARTITION: build the layout first, write nothing unless it is valid.
    fn handle_repartition(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        let request = RepartitionRequest::decode(payload)?;
        let h = &request.header;
        debug!(
            "fdl: table magic {:#x}, version {}, unit {:?}, count {}",
            h.magic, h.version, h.unit, h.count
        );
        if h.magic != PARTITION_TABLE_MAGIC {
            warn!("fdl: unexpected table magic {:#x}", h.magic);
        }
        let geometry = self.backend.geometry()?;
        let layout = partition::build(&request.descriptors, request.header.unit, &geometry)?;
        self.backend.write_layout(&layout)?;
        info!(
            "fdl: repartitioned {} entries for {:?}",
            request.descriptors.len(),
            geometry.boot_device
        );
        Ok(Outcome::reply(Response::okay()))
    }

    fn handle_start_read(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        let request = ReadRequest::decode(payload)?;
        if request.size == 0 {
            return Err(FdlError::InvalidSize {
                size: 0,
                capacity: self.buffer.capacity(),
            });
        }
        debug!(
            "fdl: reading {} bytes of '{}' from {}",
            request.size, request.name, request.offset
        );
        self.session.open_read(ReadCursor {
            partition: request.name,
            offset: request.offset,
            remaining: request.size,
        });
        Ok(Outcome::reply(Response::okay()))
    }

    /// MID_READ: reply with the next chunk of the read window.
    fn handle_mid_read(&mut self, payload: &[u8]) -> Result<Outcome, FdlError> {
        let wanted = decode_u32("mid-read", payload)? as u64;
        let limit = self.codec().max_payload() as u64;

        let cursor = self.session.read_cursor().ok_or(FdlError::NoRead)?;
        let len = wanted.min(cursor.remaining).min(limit) as usize;
        if len == 0 {
            return Err(FdlError::ReadExhausted);
        }

        let mut chunk = vec![0u8; len];
        self.backend
            .read_image(&cursor.partition, cursor.offset, &mut chunk)?;

        if let Some(cursor) = self.session.read_mut() {
            cursor.offset += len as u64;
            cursor.remaining -= len as u64;
        }
        Ok(Outcome::reply(Response::data(ResponseTag::FlashData, &chunk)))
    }
}
