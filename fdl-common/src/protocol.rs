// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Wire-level constants shared by the device engine and host tools.
//!
//! Every multi-byte field on the wire is little-endian. The width of the
//! `size` and `bytecode` header fields depends on the protocol stage and on
//! the data mode, see [`FieldWidth`].

use serde::{Deserialize, Serialize};

// --- Framing constants ---

/// Frame magic, transmitted as `9F 8E 6D 5C`.
pub const FDL_MAGIC: u32 = 0x5C6D_8E9F;

/// First byte of a command frame on the wire.
pub const FRAME_LEAD_BYTE: u8 = 0x9F;

/// Handshake marker. Three in a row form a handshake.
pub const HANDSHAKE_BYTE: u8 = 0x3C;
pub const HANDSHAKE_RUN: usize = 3;

/// Protocol revision reported in the handshake reply.
pub const FDL_VERSION: &str = "v1.8";

/// Default receive buffer for a command frame. Larger frames grow it.
pub const COMMAND_BUFFER_LEN: usize = 64;

/// Size of a response frame, header and checksum included.
pub const RESPONSE_FRAME_LEN: usize = 64;

/// Default per-read timeout for transport I/O.
pub const DEFAULT_TIMEOUT_MS: u32 = 10_000;

/// Default download buffer capacity (32 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 32 * 1024 * 1024;

/// Default cap on a single frame payload.
pub const DEFAULT_MAX_FRAME_PAYLOAD: usize = 64 * 1024;

// --- Partition naming ---

/// Partition names travel as UTF-16LE: 36 code units, 72 bytes.
pub const PART_NAME_WIRE_CHARS: usize = 36;
pub const PART_NAME_WIRE_LEN: usize = PART_NAME_WIRE_CHARS * 2;

/// Longest partition name a device table can hold.
pub const DISK_PART_NAME_LEN: usize = 32;

/// Magic of a REPARTITION header (`PART`). Logged, not enforced.
pub const PARTITION_TABLE_MAGIC: u32 = 0x5452_4150;

/// Canonical block size of a built partition table.
pub const SECTOR_SIZE: u32 = 512;

/// Width of the `size` and `bytecode` header fields.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldWidth {
    /// 16-bit fields (romcode stage, raw-data mode).
    Narrow,
    /// 32-bit fields.
    Wide,
}

impl FieldWidth {
    pub const fn bytes(self) -> usize {
        match self {
            FieldWidth::Narrow => 2,
            FieldWidth::Wide => 4,
        }
    }

    pub const fn max_value(self) -> u32 {
        match self {
            FieldWidth::Narrow => u16::MAX as u32,
            FieldWidth::Wide => u32::MAX,
        }
    }

    /// Magic, size and bytecode.
    pub const fn header_len(self) -> usize {
        4 + 2 * self.bytes()
    }

    /// Header plus trailing checksum.
    pub const fn frame_overhead(self) -> usize {
        self.header_len() + 2
    }
}

/// Boot stage the engine answers as.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolStage {
    Romcode,
    Fdl1,
    #[default]
    Fdl2,
}

impl ProtocolStage {
    pub const fn name(self) -> &'static str {
        match self {
            ProtocolStage::Romcode => "romcode",
            ProtocolStage::Fdl1 => "fdl1",
            ProtocolStage::Fdl2 => "fdl2",
        }
    }
}

/// Host to device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Handshake,
    Connect,
    StartData,
    MidData,
    EndData,
    Execute,
    Reboot,
    PowerOff,
    ReadChipId,
    SetBaud,
    Erase,
    Repartition,
    ReadChipUid,
    StartRead,
    MidRead,
    EndRead,
}

impl Command {
    pub const ALL: [Command; 16] = [
        Command::Handshake,
        Command::Connect,
        Command::StartData,
        Command::MidData,
        Command::EndData,
        Command::Execute,
        Command::Reboot,
        Command::PowerOff,
        Command::ReadChipId,
        Command::SetBaud,
        Command::Erase,
        Command::Repartition,
        Command::ReadChipUid,
        Command::StartRead,
        Command::MidRead,
        Command::EndRead,
    ];

    pub const fn bytecode(self) -> u32 {
        match self {
            Command::Handshake => 0x3C,
            Command::Connect => 0x00,
            Command::StartData => 0x01,
            Command::MidData => 0x02,
            Command::EndData => 0x03,
            Command::Execute => 0x04,
            Command::Reboot => 0x05,
            Command::PowerOff => 0x06,
            Command::ReadChipId => 0x07,
            Command::SetBaud => 0x09,
            Command::Erase => 0x0A,
            Command::Repartition => 0x0B,
            Command::ReadChipUid => 0x0C,
            Command::StartRead => 0x10,
            Command::MidRead => 0x11,
            Command::EndRead => 0x12,
        }
    }

    pub fn from_bytecode(bytecode: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.bytecode() == bytecode)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Command::Handshake => "HANDSHAKE",
            Command::Connect => "CONNECT",
            Command::StartData => "TX-ENABLE",
            Command::MidData => "TX-LOOP",
            Command::EndData => "TX-DISABLE",
            Command::Execute => "EXECUTE",
            Command::Reboot => "REBOOT",
            Command::PowerOff => "POWEROFF",
            Command::ReadChipId => "READ-ID",
            Command::SetBaud => "SETBRG",
            Command::Erase => "ERASE",
            Command::Repartition => "REPARTITION",
            Command::ReadChipUid => "READ-UID",
            Command::StartRead => "RX-ENABLE",
            Command::MidRead => "RX-LOOP",
            Command::EndRead => "RX-DISABLE",
        }
    }
}

/// Device to host response tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseTag {
    Ack,
    Version,
    InvalidCommand,
    UnknownCommand,
    OperationFailure,
    SignatureVerifyFailure,
    InvalidDestAddr,
    InvalidSize,
    ChecksumVerifyFailure,
    InvalidPartition,
    FlashData,
    ChipId,
    ChipUid,
    CompatibilityData,
}

impl ResponseTag {
    pub const ALL: [ResponseTag; 14] = [
        ResponseTag::Ack,
        ResponseTag::Version,
        ResponseTag::InvalidCommand,
        ResponseTag::UnknownCommand,
        ResponseTag::OperationFailure,
        ResponseTag::SignatureVerifyFailure,
        ResponseTag::InvalidDestAddr,
        ResponseTag::InvalidSize,
        ResponseTag::ChecksumVerifyFailure,
        ResponseTag::InvalidPartition,
        ResponseTag::FlashData,
        ResponseTag::ChipId,
        ResponseTag::ChipUid,
        ResponseTag::CompatibilityData,
    ];

    pub const fn bytecode(self) -> u32 {
        match self {
            ResponseTag::Ack => 0x80,
            ResponseTag::Version => 0x81,
            ResponseTag::InvalidCommand => 0x82,
            ResponseTag::UnknownCommand => 0x83,
            ResponseTag::OperationFailure => 0x84,
            ResponseTag::SignatureVerifyFailure => 0x88,
            ResponseTag::InvalidDestAddr => 0x89,
            ResponseTag::InvalidSize => 0x8A,
            ResponseTag::ChecksumVerifyFailure => 0x8B,
            ResponseTag::InvalidPartition => 0x8C,
            ResponseTag::FlashData => 0x93,
            ResponseTag::ChipId => 0x94,
            ResponseTag::ChipUid => 0x95,
            ResponseTag::CompatibilityData => 0x96,
        }
    }

    pub fn from_bytecode(bytecode: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.bytecode() == bytecode)
    }

    pub const fn description(self) -> &'static str {
        match self {
            ResponseTag::Ack => "okay",
            ResponseTag::Version => "version",
            ResponseTag::InvalidCommand => "invalid command",
            ResponseTag::UnknownCommand => "unknown command",
            ResponseTag::OperationFailure => "operation failure",
            ResponseTag::SignatureVerifyFailure => "signature verification failure",
            ResponseTag::InvalidDestAddr => "invalid destination address",
            ResponseTag::InvalidSize => "invalid download or read size",
            ResponseTag::ChecksumVerifyFailure => "checksum verification failure",
            ResponseTag::InvalidPartition => "invalid partition ID",
            ResponseTag::FlashData => "returned flash data",
            ResponseTag::ChipId => "returned chip ID",
            ResponseTag::ChipUid => "returned UID",
            ResponseTag::CompatibilityData => "returned compatibility data",
        }
    }

    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            ResponseTag::InvalidCommand
                | ResponseTag::UnknownCommand
                | ResponseTag::OperationFailure
                | ResponseTag::SignatureVerifyFailure
                | ResponseTag::InvalidDestAddr
                | ResponseTag::InvalidSize
                | ResponseTag::ChecksumVerifyFailure
                | ResponseTag::InvalidPartition
        )
    }
}

/// Unit of the size and gap fields in a repartition request.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    #[default]
    Mib,
    #[serde(rename = "512kib")]
    HalfMib,
    Kib,
    Byte,
    Sector,
}

impl SizeUnit {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SizeUnit::Mib),
            1 => Some(SizeUnit::HalfMib),
            2 => Some(SizeUnit::Kib),
            3 => Some(SizeUnit::Byte),
            4 => Some(SizeUnit::Sector),
            _ => None,
        }
    }

    pub const fn to_wire(self) -> u8 {
        match self {
            SizeUnit::Mib => 0,
            SizeUnit::HalfMib => 1,
            SizeUnit::Kib => 2,
            SizeUnit::Byte => 3,
            SizeUnit::Sector => 4,
        }
    }

    pub const fn bytes(self) -> u64 {
        match self {
            SizeUnit::Mib => 1024 * 1024,
            SizeUnit::HalfMib => 512 * 1024,
            SizeUnit::Kib => 1024,
            SizeUnit::Byte => 1,
            SizeUnit::Sector => 512,
        }
    }
}
