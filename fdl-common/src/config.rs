// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Engine configuration.

use alloc::format;
use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::packet::Codec;
use crate::protocol::{
    FieldWidth, ProtocolStage, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_FRAME_PAYLOAD,
    DEFAULT_TIMEOUT_MS, FDL_VERSION,
};

/// How MID_DATA carries image bytes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    /// The image chunk is the frame payload.
    #[default]
    Packet,
    /// The frame announces a block of raw bytes that follows it.
    Raw,
}

/// What the transport loop does when a read times out.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Keep waiting for a host.
    #[default]
    Persistent,
    /// Give up and end the session.
    Terminating,
}

/// When a completed partition download is written to flash.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CommitPolicy {
    /// On END_DATA.
    Immediate,
    /// On END_DATA once this many EXECUTEs were seen, otherwise on the
    /// EXECUTE that reaches the count.
    AfterExecute(u32),
}

impl CommitPolicy {
    pub fn for_stage(stage: ProtocolStage) -> Self {
        match stage {
            ProtocolStage::Fdl2 => CommitPolicy::Immediate,
            ProtocolStage::Romcode | ProtocolStage::Fdl1 => CommitPolicy::AfterExecute(2),
        }
    }

    pub fn allows(self, execute_count: u32) -> bool {
        match self {
            CommitPolicy::Immediate => true,
            CommitPolicy::AfterExecute(required) => execute_count >= required,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FdlConfig {
    pub stage: ProtocolStage,
    pub data_mode: DataMode,
    /// Largest image a single START_DATA may announce.
    pub buffer_capacity: usize,
    /// Largest frame payload accepted by the decoder.
    pub max_frame_payload: usize,
    pub timeout_ms: u32,
    pub loop_mode: LoopMode,
    /// Overrides the stage default.
    pub commit_policy: Option<CommitPolicy>,
    pub chip_id: u32,
    pub chip_uid: [u8; 16],
    /// Send an ACK before the first frame (entered right after an EXECUTE).
    pub ack_on_start: bool,
}

impl Default for FdlConfig {
    fn default() -> Self {
        Self {
            stage: ProtocolStage::default(),
            data_mode: DataMode::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            loop_mode: LoopMode::default(),
            commit_policy: None,
            chip_id: 0,
            chip_uid: [0; 16],
            ack_on_start: false,
        }
    }
}

impl FdlConfig {
    pub fn for_stage(stage: ProtocolStage) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    pub fn field_width(&self) -> FieldWidth {
        if self.stage == ProtocolStage::Romcode || self.data_mode == DataMode::Raw {
            FieldWidth::Narrow
        } else {
            FieldWidth::Wide
        }
    }

    pub fn codec(&self) -> Codec {
        let limit = self.max_frame_payload.min(self.field_width().max_value() as usize);
        Codec::new(self.field_width(), limit)
    }

    pub fn commit_policy(&self) -> CommitPolicy {
        self.commit_policy
            .unwrap_or_else(|| CommitPolicy::for_stage(self.stage))
    }

    /// Text of the VERSION reply, e.g. `fdl2 v1.8;raw`.
    pub fn handshake_text(&self) -> String {
        let raw = if self.data_mode == DataMode::Raw { ";raw" } else { "" };
        format!("{} {}{}", self.stage.name(), FDL_VERSION, raw)
    }
}
