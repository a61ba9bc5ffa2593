// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! FDL frame codec.
//!
//! A command frame is `magic | size | bytecode | payload | checksum`, with
//! `size` and `bytecode` sized by [`FieldWidth`]. A handshake is a bare run of
//! three `0x3C` bytes and carries no header at all.
//!
//! [`FrameDecoder`] is the streaming side: it is fed one byte at a time from a
//! transport, drops noise in front of a frame and resynchronises on a bad
//! magic. [`Codec::decode`] is a convenience wrapper for complete buffers.

use alloc::vec::Vec;

use log::{debug, trace, warn};
use thiserror::Error;

use crate::checksum::frame_checksum;
use crate::protocol::{
    Command, FieldWidth, ResponseTag, COMMAND_BUFFER_LEN, FDL_MAGIC, FRAME_LEAD_BYTE,
    HANDSHAKE_BYTE, HANDSHAKE_RUN, RESPONSE_FRAME_LEN,
};

/// Longest text a response carries. Anything longer is cut.
pub const MAX_RESPONSE_TEXT: usize = RESPONSE_FRAME_LEN - FieldWidth::Wide.frame_overhead() - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("handshake run broken by 0x{0:02x}")]
    HandshakeMismatch(u8),
    #[error("bad frame magic 0x{0:08x}")]
    BadMagic(u32),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
    #[error("checksum mismatch on bytecode 0x{bytecode:02x}: frame 0x{found:04x}, computed 0x{computed:04x}")]
    ChecksumMismatch {
        bytecode: u32,
        found: u16,
        computed: u16,
    },
    #[error("frame truncated")]
    Truncated,
    #[error("value {0} does not fit the header field")]
    FieldOverflow(u64),
}

impl CodecError {
    /// Response sent back when a frame fails to decode.
    pub fn response_tag(&self) -> ResponseTag {
        match self {
            CodecError::HandshakeMismatch(_) | CodecError::BadMagic(_) | CodecError::Truncated => {
                ResponseTag::InvalidCommand
            }
            CodecError::Oversized { .. } => ResponseTag::InvalidSize,
            CodecError::ChecksumMismatch { .. } => ResponseTag::ChecksumVerifyFailure,
            CodecError::FieldOverflow(_) => ResponseTag::OperationFailure,
        }
    }
}

/// A frame that passed magic and checksum validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdlPacket {
    pub bytecode: u32,
    pub payload: Vec<u8>,
    pub checksum: u16,
}

impl FdlPacket {
    /// The packet a handshake run decodes to.
    pub fn handshake() -> Self {
        Self {
            bytecode: Command::Handshake.bytecode(),
            payload: Vec::new(),
            checksum: 0,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    pub fn command(&self) -> Option<Command> {
        Command::from_bytecode(self.bytecode)
    }

    pub fn response_tag(&self) -> Option<ResponseTag> {
        ResponseTag::from_bytecode(self.bytecode)
    }
}

/// An outbound response before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub tag: ResponseTag,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn empty(tag: ResponseTag) -> Self {
        Self {
            tag,
            payload: Vec::new(),
        }
    }

    pub fn text(tag: ResponseTag, text: &str) -> Self {
        let bytes = text.as_bytes();
        let len = bytes.len().min(MAX_RESPONSE_TEXT);
        Self {
            tag,
            payload: bytes[..len].to_vec(),
        }
    }

    pub fn data(tag: ResponseTag, bytes: &[u8]) -> Self {
        Self {
            tag,
            payload: bytes.to_vec(),
        }
    }

    /// `ACK` carrying `"okay"`.
    pub fn okay() -> Self {
        Self::text(ResponseTag::Ack, ResponseTag::Ack.description())
    }

    /// `ACK` with no payload.
    pub fn ack() -> Self {
        Self::empty(ResponseTag::Ack)
    }

    pub fn from_packet(packet: FdlPacket) -> Option<Self> {
        let tag = packet.response_tag()?;
        Some(Self {
            tag,
            payload: packet.payload,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }

    pub fn is_ack(&self) -> bool {
        self.tag == ResponseTag::Ack
    }
}

/// Frame encoder and decoder factory for one header width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    width: FieldWidth,
    max_payload: usize,
}

impl Codec {
    pub const fn new(width: FieldWidth, max_payload: usize) -> Self {
        Self { width, max_payload }
    }

    pub fn width(&self) -> FieldWidth {
        self.width
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Build a complete frame around `payload`.
    pub fn encode(&self, bytecode: u32, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let limit = self.width.max_value() as u64;
        if bytecode as u64 > limit {
            return Err(CodecError::FieldOverflow(bytecode as u64));
        }
        if payload.len() as u64 > limit {
            return Err(CodecError::FieldOverflow(payload.len() as u64));
        }

        let mut frame = Vec::with_capacity(self.width.frame_overhead() + payload.len());
        frame.extend_from_slice(&FDL_MAGIC.to_le_bytes());
        put_field(&mut frame, self.width, payload.len() as u32);
        put_field(&mut frame, self.width, bytecode);
        frame.extend_from_slice(payload);
        let checksum = frame_checksum(&frame[4..]);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    pub fn encode_response(&self, response: &Response) -> Result<Vec<u8>, CodecError> {
        self.encode(response.tag.bytecode(), &response.payload)
    }

    pub fn encode_command(&self, command: Command, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        self.encode(command.bytecode(), payload)
    }

    /// The handshake run a host sends before anything else.
    pub fn encode_handshake(&self) -> Vec<u8> {
        alloc::vec![HANDSHAKE_BYTE; HANDSHAKE_RUN]
    }

    /// Decode the first packet found in `raw`.
    ///
    /// Noise and broken handshakes in front of a valid frame are skipped; the
    /// last such error is returned only when no frame follows.
    pub fn decode(&self, raw: &[u8]) -> Result<FdlPacket, CodecError> {
        let mut decoder = self.decoder();
        let mut skipped = None;
        for &byte in raw {
            match decoder.push(byte) {
                Some(Ok(packet)) => return Ok(packet),
                Some(Err(
                    err @ (CodecError::HandshakeMismatch(_) | CodecError::BadMagic(_)),
                )) => skipped = Some(err),
                Some(Err(err)) => return Err(err),
                None => {}
            }
        }
        Err(skipped.unwrap_or(CodecError::Truncated))
    }

    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder::new(self.width, self.max_payload)
    }
}

fn put_field(frame: &mut Vec<u8>, width: FieldWidth, value: u32) {
    match width {
        FieldWidth::Narrow => frame.extend_from_slice(&(value as u16).to_le_bytes()),
        FieldWidth::Wide => frame.extend_from_slice(&value.to_le_bytes()),
    }
}

fn get_field(bytes: &[u8], width: FieldWidth) -> u32 {
    match width {
        FieldWidth::Narrow => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
        FieldWidth::Wide => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Hunt,
    Handshake(usize),
    Frame,
}

/// Byte-at-a-time frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    width: FieldWidth,
    max_payload: usize,
    state: DecodeState,
    buf: Vec<u8>,
    frame_len: usize,
}

impl FrameDecoder {
    pub fn new(width: FieldWidth, max_payload: usize) -> Self {
        Self {
            width,
            max_payload,
            state: DecodeState::Hunt,
            buf: Vec::with_capacity(COMMAND_BUFFER_LEN),
            frame_len: 0,
        }
    }

    /// Drop any partial frame or handshake.
    pub fn reset(&mut self) {
        self.state = DecodeState::Hunt;
        self.buf.clear();
        self.buf.shrink_to(COMMAND_BUFFER_LEN);
        self.frame_len = 0;
    }

    /// True while a frame or handshake is partially received.
    pub fn in_progress(&self) -> bool {
        self.state != DecodeState::Hunt
    }

    /// Feed one byte. Returns a result once a frame or handshake completes
    /// or is rejected.
    pub fn push(&mut self, byte: u8) -> Option<Result<FdlPacket, CodecError>> {
        match self.state {
            DecodeState::Hunt => {
                self.hunt(byte);
                None
            }
            DecodeState::Handshake(seen) if byte == HANDSHAKE_BYTE => {
                if seen + 1 == HANDSHAKE_RUN {
                    self.reset();
                    Some(Ok(FdlPacket::handshake()))
                } else {
                    self.state = DecodeState::Handshake(seen + 1);
                    None
                }
            }
            DecodeState::Handshake(_) => {
                self.reset();
                self.hunt(byte);
                Some(Err(CodecError::HandshakeMismatch(byte)))
            }
            DecodeState::Frame => {
                self.buf.push(byte);
                self.advance()
            }
        }
    }

    fn hunt(&mut self, byte: u8) {
        match byte {
            HANDSHAKE_BYTE => self.state = DecodeState::Handshake(1),
            FRAME_LEAD_BYTE => {
                self.buf.clear();
                self.buf.push(byte);
                self.state = DecodeState::Frame;
            }
            _ => trace!("fdl: dropping 0x{:02x}", byte),
        }
    }

    fn advance(&mut self) -> Option<Result<FdlPacket, CodecError>> {
        let len = self.buf.len();
        let size_end = 4 + self.width.bytes();

        if len == 4 {
            let magic = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
            if magic != FDL_MAGIC {
                return self.resync(magic);
            }
        } else if len == size_end {
            let size = get_field(&self.buf[4..], self.width) as usize;
            if size > self.max_payload {
                warn!("fdl: frame of {} bytes over limit {}", size, self.max_payload);
                self.reset();
                return Some(Err(CodecError::Oversized {
                    size,
                    limit: self.max_payload,
                }));
            }
            self.frame_len = self.width.frame_overhead() + size;
            if self.frame_len > self.buf.capacity() {
                self.buf.reserve(self.frame_len - len);
            }
        } else if self.frame_len != 0 && len == self.frame_len {
            return Some(self.finish());
        }
        None
    }

    /// Bad magic: restart from the next plausible lead byte already buffered.
    ///
    /// At most three bytes are replayed. That is too short to finish a frame
    /// and leaves no room for a second result after a handshake mismatch, so
    /// the replay yields at most one result and it is returned as is.
    fn resync(&mut self, magic: u32) -> Option<Result<FdlPacket, CodecError>> {
        let rest: Vec<u8> = self.buf[1..].to_vec();
        self.reset();

        match rest
            .iter()
            .position(|&b| b == FRAME_LEAD_BYTE || b == HANDSHAKE_BYTE)
        {
            Some(start) => {
                debug!("fdl: bad magic 0x{:08x}, resyncing", magic);
                let mut outcome = None;
                for &byte in &rest[start..] {
                    if let Some(result) = self.push(byte) {
                        debug_assert!(outcome.is_none(), "replay produced two results");
                        outcome = Some(result);
                    }
                }
                outcome
            }
            None => {
                warn!("fdl: bad magic 0x{:08x}", magic);
                Some(Err(CodecError::BadMagic(magic)))
            }
        }
    }

    fn finish(&mut self) -> Result<FdlPacket, CodecError> {
        let header = self.width.header_len();
        let body_end = self.frame_len - 2;
        let bytecode = get_field(&self.buf[4 + self.width.bytes()..], self.width);
        let found = u16::from_le_bytes([self.buf[body_end], self.buf[body_end + 1]]);
        let computed = frame_checksum(&self.buf[4..body_end]);

        let result = if found == computed {
            Ok(FdlPacket {
                bytecode,
                payload: self.buf[header..body_end].to_vec(),
                checksum: found,
            })
        } else {
            warn!(
                "fdl: checksum mismatch on 0x{:02x} (0x{:04x} != 0x{:04x})",
                bytecode, found, computed
            );
            Err(CodecError::ChecksumMismatch {
                bytecode,
                found,
                computed,
            })
        };
        self.reset();
        result
    }
}
