// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! FDL download target running on a host against disk images.
//!
//! Usage:
//!   fdl-device --board board.toml serve --port /dev/ttyUSB0
//!   fdl-device --board board.toml abc load
//!   fdl-device --board board.toml abc set-active-boot-slot b
//!   fdl-device --board board.toml bcb set command boot-recovery

mod board;
mod cli;
mod commands;
mod disk;
mod safety;
mod serial;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cli::Cli::parse();
    cli::run(args)
}
