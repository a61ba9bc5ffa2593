// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! FDL flash download engine and A/B boot metadata.
//!
//! This crate supports both `no_std` (device) and `std` (host) environments:
//! - Default: `no_std + alloc`
//! - `std` feature: enables `std` support for host tools
//!
//! The engine side is [`dispatch::Fdl`] driven by [`transport::Server`];
//! flash access goes through [`backend::FlashBackend`], implemented over
//! block storage by [`board::BoardFlash`]. The A/B side is [`abc`],
//! [`bcb`], [`redundant`] and [`safety_abc`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

extern crate alloc;

pub mod abc;
pub mod backend;
pub mod bcb;
pub mod board;
pub mod checksum;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod packet;
pub mod partition;
pub mod payload;
pub mod protocol;
pub mod redundant;
pub mod safety_abc;
pub mod session;
pub mod slot_select;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use abc::{AbcContext, AbcError, BootloaderControl, SlotMetadata};
pub use backend::{FlashBackend, FlashError};
pub use bcb::{BcbContext, BcbError, BootloaderMessage};
pub use board::{BoardDefaults, BoardFlash};
pub use config::{CommitPolicy, DataMode, FdlConfig, LoopMode};
pub use dispatch::{Fdl, FdlError, Followup, Outcome};
pub use packet::{Codec, CodecError, FdlPacket, FrameDecoder, Response};
pub use protocol::{Command, FieldWidth, ProtocolStage, ResponseTag};
pub use redundant::{BootloaderMessageAb, RedundantStore};
pub use safety_abc::{SafetyAbc, SafetyRegister, SlotMark};
pub use slot_select::{select_slot, SlotDecision};
pub use storage::{BlockDevice, BootDevice, DeviceKind, Media, PartitionInfo, Storage};
pub use transport::{Exit, MemoryTransport, Server, Transport, TransportError};
