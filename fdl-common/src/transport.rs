// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte transport abstraction and the receive/dispatch/reply loop.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, info, warn};
use thiserror::Error;

use crate::backend::FlashBackend;
use crate::config::LoopMode;
use crate::dispatch::{Fdl, Followup};
use crate::packet::{Codec, CodecError, FdlPacket, FrameDecoder, Response};
use crate::protocol::ResponseTag;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out")]
    Timeout,
    #[error("link closed")]
    Closed,
    #[error("transport I/O failed: {0}")]
    Io(String),
}

/// A byte pipe to the host (USB CDC, UART, pty).
pub trait Transport {
    fn open(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Read at most `buf.len()` bytes. `Ok(0)` counts as a timeout.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError>;

    fn write(&mut self, buf: &[u8], timeout_ms: u32) -> Result<usize, TransportError>;

    /// Largest read the transport performs at once.
    fn max_packet_size(&self) -> usize;

    fn set_baud_rate(&mut self, _baud: u32) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot encode reply: {0}")]
    Codec(#[from] CodecError),
}

/// Why [`Server::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Reboot,
    PowerOff,
    Closed,
}

/// Drives an [`Fdl`] engine over a [`Transport`].
pub struct Server<T, B> {
    transport: T,
    fdl: Fdl<B>,
    codec: Codec,
    decoder: FrameDecoder,
    pending: VecDeque<u8>,
    rx: Vec<u8>,
}

impl<T: Transport, B: FlashBackend> Server<T, B> {
    pub fn new(transport: T, fdl: Fdl<B>) -> Self {
        let codec = fdl.codec();
        Self {
            transport,
            fdl,
            codec,
            decoder: codec.decoder(),
            pending: VecDeque::new(),
            rx: Vec::new(),
        }
    }

    pub fn fdl(&self) -> &Fdl<B> {
        &self.fdl
    }

    pub fn fdl_mut(&mut self) -> &mut Fdl<B> {
        &mut self.fdl
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_parts(self) -> (T, Fdl<B>) {
        (self.transport, self.fdl)
    }

    /// Serve frames until the host reboots or powers off the device, or the
    /// link closes.
    pub fn run(&mut self) -> Result<Exit, ServerError> {
        self.transport.open()?;
        self.fdl.reset_session();
        info!("fdl: serving as {}", self.fdl.config().stage.name());
        if self.fdl.config().ack_on_start {
            self.send(&Response::okay())?;
        }
        loop {
            if let Some(exit) = self.serve_one()? {
                info!("fdl: leaving loop ({:?})", exit);
                return Ok(exit);
            }
        }
    }

    /// Receive, dispatch and answer one frame.
    pub fn serve_one(&mut self) -> Result<Option<Exit>, ServerError> {
        let decoded = match self.next_frame() {
            Ok(decoded) => decoded,
            Err(e) => return self.on_read_error(e),
        };

        let packet = match decoded {
            Ok(packet) => packet,
            Err(e) => {
                let reply = self.fdl.reject(&e);
                self.send(&reply)?;
                return Ok(None);
            }
        };

        let outcome = self.fdl.dispatch(&packet);
        self.send(&outcome.response)?;

        match outcome.followup {
            Some(Followup::ReceiveRaw(raw)) => {
                let data = match self.read_raw(raw.len as usize) {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("fdl: raw block of {} bytes not received: {}", raw.len, e);
                        if e == TransportError::Timeout {
                            self.send(&Response::empty(ResponseTag::OperationFailure))?;
                        }
                        return self.on_read_error(e);
                    }
                };
                let reply = self.fdl.receive_raw(&raw, &data);
                self.send(&reply)?;
            }
            Some(Followup::ChangeBaud(baud)) => {
                debug!("fdl: switching to {} baud", baud);
                self.transport.set_baud_rate(baud)?;
            }
            Some(Followup::Execute { addr }) => match addr {
                Some(addr) => info!("fdl: execute image at {:#x}", addr),
                None => info!("fdl: execute"),
            },
            Some(Followup::Reboot) => return Ok(Some(Exit::Reboot)),
            Some(Followup::PowerOff) => return Ok(Some(Exit::PowerOff)),
            None => {}
        }
        Ok(None)
    }

    fn on_read_error(&mut self, e: TransportError) -> Result<Option<Exit>, ServerError> {
        match e {
            TransportError::Timeout if self.fdl.config().loop_mode == LoopMode::Persistent => {
                if self.decoder.in_progress() {
                    debug!("fdl: timeout, dropping partial frame");
                }
                self.decoder.reset();
                Ok(None)
            }
            TransportError::Closed => Ok(Some(Exit::Closed)),
            e => Err(e.into()),
        }
    }

    fn next_frame(&mut self) -> Result<Result<FdlPacket, CodecError>, TransportError> {
        loop {
            while let Some(byte) = self.pending.pop_front() {
                if let Some(result) = self.decoder.push(byte) {
                    return Ok(result);
                }
            }
            self.fill()?;
        }
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let chunk = self.transport.max_packet_size().max(1);
        self.rx.resize(chunk, 0);
        let n = self
            .transport
            .read(&mut self.rx, self.fdl.config().timeout_ms)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        self.pending.extend(&self.rx[..n]);
        Ok(())
    }

    /// Pull exactly `len` bytes that follow a raw MID_DATA frame.
    fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            if self.pending.is_empty() {
                self.fill()?;
            }
            let take = (len - data.len()).min(self.pending.len());
            data.extend(self.pending.drain(..take));
        }
        Ok(data)
    }

    fn send(&mut self, response: &Response) -> Result<(), ServerError> {
        let frame = self.codec.encode_response(response)?;
        let timeout = self.fdl.config().timeout_ms;
        let mut offset = 0;
        while offset < frame.len() {
            let n = self.transport.write(&frame[offset..], timeout)?;
            if n == 0 {
                return Err(TransportError::Timeout.into());
            }
            offset += n;
        }
        Ok(())
    }
}

/// In-memory transport: reads drain a scripted input, writes collect.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
    input: VecDeque<u8>,
    output: Vec<u8>,
    chunk: usize,
    when_empty: Option<TransportError>,
    baud: Option<u32>,
}

impl MemoryTransport {
    pub fn new(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            output: Vec::new(),
            chunk: 64,
            when_empty: None,
            baud: None,
        }
    }

    /// Limit reads to `chunk` bytes.
    pub fn with_chunk(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// Error reported once input runs out. Defaults to [`TransportError::Closed`].
    pub fn when_empty(mut self, e: TransportError) -> Self {
        self.when_empty = Some(e);
        self
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }

    pub fn baud(&self) -> Option<u32> {
        self.baud
    }
}

impl Transport for MemoryTransport {
    fn read(&mut self, buf: &mut [u8], _timeout_ms: u32) -> Result<usize, TransportError> {
        if self.input.is_empty() {
            return Err(self.when_empty.clone().unwrap_or(TransportError::Closed));
        }
        let n = buf.len().min(self.chunk).min(self.input.len());
        for (slot, byte) in buf.iter_mut().zip(self.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8], _timeout_ms: u32) -> Result<usize, TransportError> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn max_packet_size(&self) -> usize {
        self.chunk
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<(), TransportError> {
        self.baud = Some(baud);
        Ok(())
    }
}
