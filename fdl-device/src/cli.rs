// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::board::BoardFile;
use crate::commands;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "fdl-device")]
#[command(about = "FDL download target and A/B metadata tool over disk images")]
pub struct Cli {
    /// Board description file
    #[arg(short, long, default_value = "board.toml")]
    pub board: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Serve the FDL protocol on a serial port
    Serve {
        /// Serial port (e.g., /dev/ttyUSB0 or a pty)
        #[arg(short, long)]
        port: String,

        /// Initial baud rate
        #[arg(long, default_value = "115200")]
        baud: u32,
    },

    /// A/B boot control metadata
    Abc {
        /// Partition holding the control record
        #[arg(long, default_value = "misc")]
        partition: String,

        #[command(subcommand)]
        action: AbcAction,
    },

    /// Bootloader control block (bootloader_message)
    Bcb {
        /// Partition holding the message
        #[arg(long, default_value = "misc")]
        partition: String,

        #[command(subcommand)]
        action: BcbAction,
    },

    /// Redundant A/B bootloader message in misc / misc_bak
    Msg {
        #[command(subcommand)]
        action: MsgAction,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AbcAction {
    /// Load and dump the slot metadata
    Load,
    /// Write the record back
    Save,
    /// Write a fresh record (both slots bootable, A active)
    Init,
    /// Print the number of slots
    GetNumberSlots,
    /// Print the active slot
    GetCurrentSlot,
    /// Confirm a slot booted (default: active slot)
    MarkBootSuccessful { slot: Option<String> },
    /// Make a slot the next boot target
    SetActiveBootSlot { slot: String },
    /// Take a slot out of rotation
    SetSlotAsUnbootable { slot: String },
    IsSlotBootable { slot: Option<String> },
    IsSlotMarkedSuccessful { slot: Option<String> },
    /// Print the partition suffix of a slot (default: active slot)
    GetSuffix {
        slot: Option<String>,

        /// Also store the suffix in this environment variable
        #[arg(long)]
        env: Option<String>,
    },
    /// Pick the slot to boot and register the attempt
    Select,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum BcbAction {
    /// Print command, status and stage
    Show,
    /// Hex dump of one field or the whole message
    Dump { field: Option<String> },
    /// Set a field; ':' separates lines
    Set { field: String, value: String },
    /// Zero one field or the whole message
    Clear { field: Option<String> },
    /// Fail unless `field op value` holds (op is '=' or '~')
    Test {
        field: String,
        op: String,
        value: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum MsgAction {
    /// Show the trusted copy and its slot metadata
    Show,
    /// Write a fresh message holding a new control record
    Init,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let board = BoardFile::load(&cli.board)?;
    let mut out = io::stdout().lock();

    match cli.command {
        Commands::Serve { port, baud } => commands::serve(&board, &port, baud),
        Commands::Abc { partition, action } => commands::abc(&board, &partition, &action, &mut out),
        Commands::Bcb { partition, action } => commands::bcb(&board, &partition, &action, &mut out),
        Commands::Msg { action } => commands::message(&board, &action, &mut out),
    }
}
