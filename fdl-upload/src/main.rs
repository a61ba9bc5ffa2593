// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Flash download tool for FDL targets over a serial port.
//!
//! Usage:
//!   fdl-upload --port /dev/ttyUSB0 handshake
//!   fdl-upload --port /dev/ttyUSB0 connect
//!   fdl-upload --port /dev/ttyUSB0 repartition layout.toml
//!   fdl-upload --port /dev/ttyUSB0 download kernel_a Image
//!   fdl-upload --port /dev/ttyUSB0 reboot

mod cli;
mod commands;
mod layout;
mod transport;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cli::Cli::parse();
    cli::run(args)
}
