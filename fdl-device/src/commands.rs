// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command implementations.

use std::io::Write;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use fdl_common::abc::{self, AbcContext, BootloaderControl};
use fdl_common::bcb::{self, BcbContext};
use fdl_common::board::BoardFlash;
use fdl_common::dispatch::Fdl;
use fdl_common::env::Environment;
use fdl_common::redundant::{BootloaderMessageAb, RedundantStore, PRIMARY_PART};
use fdl_common::safety_abc::{self, SlotMark};
use fdl_common::slot_select::select_slot;
use fdl_common::transport::Server;

use crate::board::BoardFile;
use crate::cli::{AbcAction, BcbAction, MsgAction};
use crate::safety::FileRegister;
use crate::serial::SerialTransport;

/// Serve FDL on `port` until the host reboots or powers off the target.
pub fn serve(board: &BoardFile, port: &str, baud: u32) -> Result<()> {
    let storage = board.open_storage()?;
    let env = board.load_env()?;
    let flash = BoardFlash::new(storage, env, board.defaults);
    let fdl = Fdl::new(board.fdl.clone(), flash);
    let transport = SerialTransport::open(port, baud)?;

    info!(
        "Serving {} on {} ({:?} mode)",
        board.fdl.handshake_text(),
        transport.port_name(),
        board.fdl.data_mode
    );
    let mut server = Server::new(transport, fdl);
    let result = server.run();

    // The session may have set filesize or main_bootmode
    let (_, fdl) = server.into_parts();
    let (_, env) = fdl.into_backend().into_parts();
    board.save_env(&env)?;

    let exit = result.context("FDL session failed")?;
    println!("Session ended: {:?}", exit);
    Ok(())
}

fn dump_slots(control: &BootloaderControl, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "Slot Info:")?;
    let count = (control.nb_slot as usize).min(abc::MAX_SLOTS);
    for (i, slot) in control.slot_info[..count].iter().enumerate() {
        writeln!(out, "  Slot {}:", abc::slot_name(i as u8))?;
        writeln!(out, "    Priority: {}", slot.priority)?;
        writeln!(out, "    Tries Remaining: {}", slot.tries_remaining)?;
        writeln!(out, "    Successful Boot: {}", u8::from(slot.successful_boot))?;
    }
    Ok(())
}

fn mark_register(board: &BoardFile, mark: SlotMark, slot: u8) -> Result<()> {
    if let Some(path) = board.safety_register.as_deref() {
        let mut reg = FileRegister::new(path);
        safety_abc::setup(&mut reg, mark, slot)
            .with_context(|| format!("Failed to update {}", path.display()))?;
    }
    Ok(())
}

/// Run one `abc` action against the record in `partition`. Changes are
/// written back before returning.
pub fn abc(board: &BoardFile, partition: &str, action: &AbcAction, out: &mut dyn Write) -> Result<()> {
    let mut storage = board.open_storage()?;
    let (disk, part) = storage.find_partition(partition)?;
    let mut ctx = AbcContext::new();

    if *action == AbcAction::Init {
        ctx.load_from_message(&BootloaderControl::default_new().to_bytes())?;
    } else {
        ctx.load(disk, &part)
            .with_context(|| format!("Failed to load A/B metadata from '{}'", partition))?;
    }

    // The register follows the record, so it is only touched once misc holds
    // the change.
    let mut mark = None;
    match action {
        AbcAction::Init => {
            ctx.store(disk, &part)?;
            writeln!(out, "A/B metadata initialized in '{}'.", partition)?;
        }
        AbcAction::Load => {
            writeln!(out, "A/B metadata loaded from '{}' successfully.", partition)?;
            dump_slots(ctx.control()?, out)?;
        }
        AbcAction::Save => {
            ctx.store(disk, &part)?;
            writeln!(out, "A/B metadata stored into partition '{}' successfully.", partition)?;
        }
        AbcAction::GetNumberSlots => writeln!(out, "{}", ctx.slot_count()?)?,
        AbcAction::GetCurrentSlot => {
            let slot = ctx.active_slot()?;
            writeln!(out, "Current active slot: {}", abc::slot_name(slot))?;
        }
        AbcAction::MarkBootSuccessful { slot } => {
            let slot = ctx.resolve_slot(slot.as_deref())?;
            ctx.mark_successful(slot)?;
            mark = Some((SlotMark::Successful, slot));
            writeln!(out, "Slot {} marked as successful", abc::slot_name(slot))?;
        }
        AbcAction::SetActiveBootSlot { slot } => {
            let slot = abc::parse_slot(slot)?;
            ctx.set_active(slot)?;
            mark = Some((SlotMark::Active, slot));
            writeln!(out, "Slot {} marked as next active", abc::slot_name(slot))?;
        }
        AbcAction::SetSlotAsUnbootable { slot } => {
            let slot = abc::parse_slot(slot)?;
            ctx.set_unbootable(slot)?;
            mark = Some((SlotMark::Unbootable, slot));
            writeln!(out, "Slot {} marked as unbootable", abc::slot_name(slot))?;
        }
        AbcAction::IsSlotBootable { slot } => {
            let slot = ctx.resolve_slot(slot.as_deref())?;
            let state = if ctx.is_bootable(slot)? { "bootable" } else { "unbootable" };
            writeln!(out, "Slot {} marked as {}", abc::slot_name(slot), state)?;
        }
        AbcAction::IsSlotMarkedSuccessful { slot } => {
            let slot = ctx.resolve_slot(slot.as_deref())?;
            let state = if ctx.is_successful(slot)? {
                "successful"
            } else {
                "unsuccessful"
            };
            writeln!(out, "Slot {} marked as {}", abc::slot_name(slot), state)?;
        }
        AbcAction::GetSuffix { slot, env } => {
            let slot = ctx.resolve_slot(slot.as_deref())?;
            let suffix = abc::slot_suffix(slot)?;
            if let Some(var) = env {
                let mut vars = board.load_env()?;
                vars.set(var, suffix);
                board.save_env(&vars)?;
            }
            writeln!(out, "{}", suffix)?;
        }
        AbcAction::Select => {
            let decision = select_slot(ctx.control()?)?;
            let next = decision.apply_to(ctx.control()?);
            ctx.replace(next)?;
            writeln!(
                out,
                "Booting slot {} ({} tries remaining)",
                abc::slot_name(decision.slot),
                decision.tries_remaining
            )?;
        }
    }

    if ctx.is_dirty() {
        ctx.store(disk, &part)?;
        info!("A/B metadata stored into '{}'", partition);
    }
    if let Some((mark, slot)) = mark {
        mark_register(board, mark, slot)?;
    }
    Ok(())
}

/// Run one `bcb` action against the message at the start of `partition`.
pub fn bcb(board: &BoardFile, partition: &str, action: &BcbAction, out: &mut dyn Write) -> Result<()> {
    let mut storage = board.open_storage()?;
    let (disk, part) = storage.find_partition(partition)?;
    let mut ctx = BcbContext::new();
    ctx.load(disk, &part)
        .with_context(|| format!("Failed to load BCB from '{}'", partition))?;

    match action {
        BcbAction::Show => writeln!(out, "{}", bcb::describe(ctx.message()?))?,
        BcbAction::Dump { field } => write!(out, "{}", ctx.dump(field.as_deref())?)?,
        BcbAction::Set { field, value } => ctx.set(field, value)?,
        BcbAction::Clear { field } => ctx.clear(field.as_deref())?,
        BcbAction::Test { field, op, value } => {
            if !ctx.test(field, op, value)? {
                bail!("bcb.{} {} '{}' does not hold", field, op, value);
            }
        }
    }

    if ctx.is_dirty() {
        ctx.store(disk, &part)?;
    }
    Ok(())
}

/// Inspect or initialize the redundant A/B message.
pub fn message(board: &BoardFile, action: &MsgAction, out: &mut dyn Write) -> Result<()> {
    let mut storage = board.open_storage()?;
    let (disk, _) = storage.find_partition(PRIMARY_PART)?;
    let mut store = RedundantStore::locate(disk)?;

    match action {
        MsgAction::Show => {
            let message = store.load(disk)?;
            writeln!(out, "Valid copy: {:?} (flags {})", store.valid(), store.flags())?;
            writeln!(out, "{}", bcb::describe(&message.message()))?;
            let mut ctx = AbcContext::new();
            match ctx.load_from_message(message.control_bytes()) {
                Ok(()) => dump_slots(ctx.control()?, out)?,
                Err(e) => writeln!(out, "No A/B metadata: {}", e)?,
            }
        }
        MsgAction::Init => {
            // Continue the serial of whatever copy is current
            if let Err(e) = store.load(disk) {
                warn!("No valid message yet: {}", e);
            }
            let mut message = BootloaderMessageAb::default();
            message.set_control(&BootloaderControl::default_new());
            store.store(disk, &mut message)?;
            writeln!(
                out,
                "A/B message written to {:?} copy (flags {})",
                store.valid(),
                store.flags()
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use fdl_common::partition::{self, Geometry};
    use fdl_common::payload::{part_name, PartitionDescriptor};
    use fdl_common::protocol::SizeUnit;
    use fdl_common::storage::{BlockDevice, BootDevice, DeviceKind, Storage};
    use temp_dir::TempDir;

    fn write_board(dir: &Path, register: bool) -> BoardFile {
        let mut text = String::from(
            r#"
boot_device = "only-emmc"
env_file = "env.toml"

[[device]]
kind = "mmc"
index = 0
image = "emmc.img"
block_count = 4096
media = { type = "emmc" }
"#,
        );
        if register {
            text.insert_str(0, "safety_register = \"safety.reg\"\n");
        }
        let path = dir.join("board.toml");
        fs::write(&path, text).unwrap();
        let board = BoardFile::load(&path).unwrap();

        let entries: Vec<_> = ["misc", "misc_bak", "kernel_a", "kernel_b"]
            .iter()
            .map(|n| PartitionDescriptor {
                name: part_name(n).unwrap(),
                size: 64,
                gap: 0,
            })
            .collect();
        let geometry = Geometry {
            boot_device: BootDevice::OnlyEmmc,
            nand_erase_size: 0,
            main_capacity: Some(4096),
            safety_capacity: None,
        };
        let layout = partition::build(&entries, SizeUnit::Kib, &geometry).unwrap();
        let mut storage = board.open_storage().unwrap();
        assert!(storage.find_partition("misc").is_err());
        let dev = storage.device(DeviceKind::Mmc, 0).unwrap();
        dev.write_table(&layout.main.unwrap()).unwrap();
        board
    }

    fn run_abc(board: &BoardFile, action: AbcAction) -> String {
        let mut out = Vec::new();
        abc(board, "misc", &action, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_abc_needs_init() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        let mut out = Vec::new();
        assert!(abc(&board, "misc", &AbcAction::Load, &mut out).is_err());
    }

    #[test]
    fn test_abc_init_then_dump() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        run_abc(&board, AbcAction::Init);

        let dump = run_abc(&board, AbcAction::Load);
        assert!(dump.contains("Slot Info:\n  Slot A:\n    Priority: 15\n    Tries Remaining: 7\n    Successful Boot: 0\n"));
        assert!(dump.contains("  Slot B:"));
        assert_eq!(run_abc(&board, AbcAction::GetNumberSlots), "2\n");
        assert_eq!(run_abc(&board, AbcAction::GetCurrentSlot), "Current active slot: A\n");
    }

    #[test]
    fn test_abc_mutations_persist() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), true);
        run_abc(&board, AbcAction::Init);

        assert_eq!(
            run_abc(&board, AbcAction::SetSlotAsUnbootable { slot: "a".into() }),
            "Slot A marked as unbootable\n"
        );
        assert_eq!(
            run_abc(&board, AbcAction::IsSlotBootable { slot: Some("0".into()) }),
            "Slot A marked as unbootable\n"
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("safety.reg")).unwrap(),
            "0x00000002\n"
        );

        run_abc(&board, AbcAction::SetActiveBootSlot { slot: "B".into() });
        run_abc(&board, AbcAction::MarkBootSuccessful { slot: Some("b".into()) });
        assert_eq!(
            run_abc(&board, AbcAction::IsSlotMarkedSuccessful { slot: Some("b".into()) }),
            "Slot B marked as successful\n"
        );
        assert_eq!(
            fs::read_to_string(tmp.path().join("safety.reg")).unwrap(),
            "0x00000001\n"
        );
    }

    #[test]
    fn test_abc_record_stored_before_register() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), true);
        run_abc(&board, AbcAction::Init);
        fs::create_dir(tmp.path().join("safety.reg")).unwrap();

        let mut out = Vec::new();
        let action = AbcAction::SetSlotAsUnbootable { slot: "a".into() };
        assert!(abc(&board, "misc", &action, &mut out).is_err());
        assert_eq!(
            run_abc(&board, AbcAction::IsSlotBootable { slot: Some("a".into()) }),
            "Slot A marked as unbootable\n"
        );
    }

    #[test]
    fn test_abc_select_spends_a_try() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        run_abc(&board, AbcAction::Init);
        assert_eq!(
            run_abc(&board, AbcAction::Select),
            "Booting slot A (6 tries remaining)\n"
        );
        assert!(run_abc(&board, AbcAction::Load).contains("Tries Remaining: 6"));
    }

    #[test]
    fn test_abc_suffix_to_env() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        run_abc(&board, AbcAction::Init);
        let out = run_abc(
            &board,
            AbcAction::GetSuffix {
                slot: Some("b".into()),
                env: Some("slot_suffix".into()),
            },
        );
        assert_eq!(out, "_b\n");
        let env = board.load_env().unwrap();
        assert_eq!(env.get("slot_suffix").map(String::as_str), Some("_b"));
    }

    #[test]
    fn test_bcb_set_test_clear() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        let mut out = Vec::new();

        let set = BcbAction::Set {
            field: "command".into(),
            value: "boot-recovery".into(),
        };
        bcb(&board, "misc", &set, &mut out).unwrap();
        let test = BcbAction::Test {
            field: "command".into(),
            op: "~".into(),
            value: "recovery".into(),
        };
        bcb(&board, "misc", &test, &mut out).unwrap();

        bcb(&board, "misc", &BcbAction::Clear { field: None }, &mut out).unwrap();
        assert!(bcb(&board, "misc", &test, &mut out).is_err());

        bcb(&board, "misc", &BcbAction::Show, &mut out).unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .ends_with("command='' status='' stage=''\n"));
    }

    #[test]
    fn test_message_init_and_show() {
        let tmp = TempDir::new().unwrap();
        let board = write_board(tmp.path(), false);
        let mut out = Vec::new();
        assert!(message(&board, &MsgAction::Show, &mut out).is_err());

        message(&board, &MsgAction::Init, &mut out).unwrap();
        message(&board, &MsgAction::Init, &mut out).unwrap();
        let mut shown = Vec::new();
        message(&board, &MsgAction::Show, &mut shown).unwrap();
        let shown = String::from_utf8(shown).unwrap();
        assert!(shown.starts_with("Valid copy: Some(Redundant) (flags 2)\n"));
        assert!(shown.contains("Priority: 15"));
    }
}
