// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use fdl_common::config::DataMode;
use fdl_common::protocol::{Command, ProtocolStage};

use crate::commands;
use crate::transport::{open_serial, Link};

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "fdl-upload")]
#[command(about = "Flash download tool for FDL targets")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyUSB0)
    #[arg(short, long)]
    pub port: String,

    /// Baud rate to open the port with
    #[arg(short, long, default_value = "115200")]
    pub baud: u32,

    /// Protocol stage the target runs (romcode, fdl1, fdl2)
    #[arg(short, long, default_value = "fdl2", value_parser = parse_stage)]
    pub stage: ProtocolStage,

    /// Target uses the raw data download mode
    #[arg(long)]
    pub raw: bool,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_stage(s: &str) -> Result<ProtocolStage, String> {
    match s {
        "romcode" => Ok(ProtocolStage::Romcode),
        "fdl1" => Ok(ProtocolStage::Fdl1),
        "fdl2" => Ok(ProtocolStage::Fdl2),
        other => Err(format!("unknown stage '{}'", other)),
    }
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Send the handshake and print the target version
    Handshake,

    /// Open the session after the handshake
    Connect,

    /// Download an image to a partition (fdl2) or a RAM address (0x...)
    Download {
        /// Partition name or load address
        #[arg(value_name = "TARGET")]
        target: String,

        /// Image file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Bytes per MID_DATA
        #[arg(long, default_value = "4096")]
        chunk: usize,
    },

    /// Erase one partition or every device
    Erase {
        /// Partition to erase
        #[arg(value_name = "PARTITION", required_unless_present = "all")]
        partition: Option<String>,

        /// Erase every device of the boot configuration
        #[arg(long, conflicts_with = "partition")]
        all: bool,

        /// Bytes to erase (0 = whole partition)
        #[arg(long, default_value = "0")]
        size: u64,
    },

    /// Write a new partition layout
    Repartition {
        /// Layout file (TOML)
        #[arg(value_name = "LAYOUT")]
        layout: PathBuf,
    },

    /// Print the chip ID
    ChipId,

    /// Print the chip unique ID
    ChipUid,

    /// Read a partition back into a file
    Read {
        #[arg(value_name = "PARTITION")]
        partition: String,

        /// Output file
        #[arg(value_name = "OUT")]
        out: PathBuf,

        /// Bytes to read
        #[arg(long)]
        size: u64,

        /// Offset into the partition
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Switch the link to another baud rate
    SetBaud {
        #[arg(value_name = "BAUD")]
        baud: u32,
    },

    /// Run the last downloaded image
    Execute,

    /// Reboot the target
    Reboot,

    /// Power the target off
    Poweroff,
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    let data_mode = if cli.raw { DataMode::Raw } else { DataMode::Packet };
    let port = open_serial(&cli.port, cli.baud)?;
    let mut link = Link::new(port, cli.stage, data_mode);

    match cli.command {
        Commands::Handshake => commands::handshake(&mut link),
        Commands::Connect => commands::connect(&mut link),
        Commands::Download {
            target,
            file,
            chunk,
        } => commands::download_file(&mut link, &target, &file, chunk),
        Commands::Erase {
            partition,
            all,
            size,
        } => match (partition, all) {
            (_, true) => commands::erase(&mut link, None, 0),
            (Some(name), false) => commands::erase(&mut link, Some(&name), size),
            (None, false) => bail!("Name a partition or pass --all"),
        },
        Commands::Repartition { layout } => commands::repartition(&mut link, &layout),
        Commands::ChipId => {
            println!("Chip ID: 0x{:08x}", commands::chip_id(&mut link)?);
            Ok(())
        }
        Commands::ChipUid => {
            let uid = commands::chip_uid(&mut link)?;
            let hex: String = uid.iter().map(|b| format!("{:02x}", b)).collect();
            println!("Chip UID: {}", hex);
            Ok(())
        }
        Commands::Read {
            partition,
            out,
            size,
            offset,
        } => commands::read_to_file(&mut link, &partition, &out, size, offset),
        Commands::SetBaud { baud } => commands::set_baud(&mut link, baud),
        Commands::Execute => commands::simple(&mut link, Command::Execute),
        Commands::Reboot => commands::simple(&mut link, Command::Reboot),
        Commands::Poweroff => commands::simple(&mut link, Command::PowerOff),
    }
}
