// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations for FDL target operations.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use fdl_common::checksum::{additive_checksum32, raw_data_checksum};
use fdl_common::config::DataMode;
use fdl_common::payload::{
    part_name, EraseScope, RawTransfer, ReadRequest, TransferRequest, TransferTarget,
};
use fdl_common::protocol::{Command, ResponseTag};

use crate::layout::LayoutFile;
use crate::transport::{check, Link, Port};

/// Timeout for erase and repartition, which touch whole devices.
const SLOW_TIMEOUT_MS: u64 = 60_000;

fn progress_bar(total: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            )?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// `0x...` addresses stage an image in RAM, anything else names a partition.
pub fn parse_target(target: &str) -> Result<TransferTarget> {
    match target
        .strip_prefix("0x")
        .or_else(|| target.strip_prefix("0X"))
    {
        Some(hex) => {
            let addr = u64::from_str_radix(hex, 16)
                .with_context(|| format!("Bad address '{}'", target))?;
            Ok(TransferTarget::Address(addr))
        }
        None => Ok(TransferTarget::Partition(
            part_name(target).with_context(|| format!("Bad partition name '{}'", target))?,
        )),
    }
}

/// Send the handshake run and print the target's version text.
pub fn handshake<P: Port>(link: &mut Link<P>) -> Result<()> {
    link.send_handshake()?;
    let response = link.receive()?;
    check("HANDSHAKE", &response, ResponseTag::Version)?;
    let version = response.as_text().unwrap_or("?");
    println!("Target: {}", version);

    let raw = version.ends_with(";raw");
    if raw != (link.data_mode() == DataMode::Raw) {
        println!(
            "Warning: target {} raw data mode, pass --raw accordingly",
            if raw { "uses" } else { "does not use" }
        );
    }
    Ok(())
}

pub fn connect<P: Port>(link: &mut Link<P>) -> Result<()> {
    link.expect(Command::Connect, &[], ResponseTag::Ack)?;
    println!("Connected.");
    Ok(())
}

/// Download `image` to a partition or a RAM address.
pub fn download<P: Port>(
    link: &mut Link<P>,
    target: &TransferTarget,
    image: &[u8],
    chunk_size: usize,
) -> Result<()> {
    if image.is_empty() {
        bail!("Image is empty");
    }
    let request = TransferRequest {
        target: target.clone(),
        size: image.len() as u64,
        checksum: additive_checksum32(0, image),
    };
    let payload = request.encode(link.stage())?;
    link.expect(Command::StartData, &payload, ResponseTag::Ack)?;

    let chunk_size = chunk_size.clamp(1, link.codec().max_payload());
    let pb = progress_bar(image.len() as u64)?;
    let mut sent = 0u64;

    for chunk in image.chunks(chunk_size) {
        let result = match link.data_mode() {
            DataMode::Packet => link
                .expect(Command::MidData, chunk, ResponseTag::Ack)
                .map(|_| ()),
            DataMode::Raw => send_raw_block(link, chunk),
        };
        if let Err(e) = result {
            pb.abandon();
            return Err(e.context(format!("Download failed at offset {}", sent)));
        }
        sent += chunk.len() as u64;
        pb.set_position(sent);
    }
    pb.finish_with_message("Download complete");

    link.expect(Command::EndData, &[], ResponseTag::Ack)?;
    Ok(())
}

/// Announce a raw block, then stream it; both steps are acknowledged.
fn send_raw_block<P: Port>(link: &mut Link<P>, chunk: &[u8]) -> Result<()> {
    let raw = RawTransfer {
        len: chunk.len() as u32,
        checksum_enabled: true,
        checksum: raw_data_checksum(chunk),
    };
    link.expect(Command::MidData, &raw.encode(), ResponseTag::Ack)?;
    link.send_raw(chunk)?;
    let response = link.receive()?;
    check("raw data", &response, ResponseTag::Ack)
}

pub fn download_file<P: Port>(
    link: &mut Link<P>,
    target: &str,
    file: &Path,
    chunk_size: usize,
) -> Result<()> {
    let image = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let target = parse_target(target)?;
    println!(
        "Image:  {} ({} bytes, checksum 0x{:08x})",
        file.display(),
        image.len(),
        additive_checksum32(0, &image)
    );
    match &target {
        TransferTarget::Partition(name) => println!("Target: partition '{}'", name),
        TransferTarget::Address(addr) => println!("Target: RAM at {:#x}", addr),
    }
    println!();

    download(link, &target, &image, chunk_size)?;
    println!();
    println!("Image downloaded successfully!");
    Ok(())
}

pub fn erase<P: Port>(link: &mut Link<P>, partition: Option<&str>, size: u64) -> Result<()> {
    let scope = match partition {
        Some(name) => EraseScope::Partition {
            name: part_name(name).with_context(|| format!("Bad partition name '{}'", name))?,
            size,
        },
        None => EraseScope::All,
    };
    print!("Erasing {}... ", partition.unwrap_or("all devices"));
    std::io::stdout().flush()?;
    link.expect_slow(Command::Erase, &scope.encode()?, ResponseTag::Ack, SLOW_TIMEOUT_MS)?;
    println!("OK");
    Ok(())
}

pub fn repartition<P: Port>(link: &mut Link<P>, layout: &Path) -> Result<()> {
    let request = LayoutFile::load(layout)?.to_request()?;
    for d in &request.descriptors {
        println!("  {:<12} size {:>8} gap {:>6}", d.name, d.size, d.gap);
    }
    print!(
        "Writing {} entries ({:?} units)... ",
        request.descriptors.len(),
        request.header.unit
    );
    std::io::stdout().flush()?;
    link.expect_slow(
        Command::Repartition,
        &request.encode()?,
        ResponseTag::Ack,
        SLOW_TIMEOUT_MS,
    )?;
    println!("OK");
    Ok(())
}

pub fn chip_id<P: Port>(link: &mut Link<P>) -> Result<u32> {
    let response = link.expect(Command::ReadChipId, &[], ResponseTag::ChipId)?;
    let bytes: [u8; 4] = response
        .payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .context("Chip ID reply is too short")?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn chip_uid<P: Port>(link: &mut Link<P>) -> Result<Vec<u8>> {
    let response = link.expect(Command::ReadChipUid, &[], ResponseTag::ChipUid)?;
    Ok(response.payload)
}

/// Read `size` bytes of `partition` starting at `offset`.
pub fn read<P: Port>(
    link: &mut Link<P>,
    partition: &str,
    size: u64,
    offset: u64,
    chunk_size: u32,
) -> Result<Vec<u8>> {
    let request = ReadRequest {
        name: part_name(partition).with_context(|| format!("Bad partition name '{}'", partition))?,
        size,
        offset,
    };
    link.expect(Command::StartRead, &request.encode()?, ResponseTag::Ack)?;

    let pb = progress_bar(size)?;
    let mut data = Vec::with_capacity(size as usize);
    while (data.len() as u64) < size {
        let want = (size - data.len() as u64).min(chunk_size as u64) as u32;
        let response = match link.expect(Command::MidRead, &want.to_le_bytes(), ResponseTag::FlashData) {
            Ok(r) => r,
            Err(e) => {
                pb.abandon();
                return Err(e.context(format!("Read failed at offset {}", offset + data.len() as u64)));
            }
        };
        if response.payload.is_empty() {
            pb.abandon();
            bail!("Target returned no data at offset {}", offset + data.len() as u64);
        }
        data.extend_from_slice(&response.payload);
        pb.set_position(data.len() as u64);
    }
    pb.finish_with_message("Read complete");

    link.expect(Command::EndRead, &[], ResponseTag::Ack)?;
    Ok(data)
}

pub fn read_to_file<P: Port>(
    link: &mut Link<P>,
    partition: &str,
    out: &Path,
    size: u64,
    offset: u64,
) -> Result<()> {
    let chunk = link.codec().max_payload().min(u32::MAX as usize) as u32;
    let data = read(link, partition, size, offset, chunk)?;
    fs::write(out, &data).with_context(|| format!("Failed to write {}", out.display()))?;
    println!("Wrote {} bytes to {}", data.len(), out.display());
    Ok(())
}

/// Ask the target to switch baud rate, then follow it.
pub fn set_baud<P: Port>(link: &mut Link<P>, baud: u32) -> Result<()> {
    link.expect(Command::SetBaud, &baud.to_le_bytes(), ResponseTag::Ack)?;
    link.set_baud_rate(baud)?;
    println!("Link now at {} baud.", baud);
    Ok(())
}

/// Commands with no payload that answer a plain ACK.
pub fn simple<P: Port>(link: &mut Link<P>, command: Command) -> Result<()> {
    print!("{}... ", command.name());
    std::io::stdout().flush()?;
    link.expect(command, &[], ResponseTag::Ack)?;
    println!("OK");
    Ok(())
}
