//! Scratch disk: turn a block device into the persistent data volume with
//! `setup-disk -m data`.
//!
//! A running container runtime holds mounts on the volume being replaced,
//! so it is stopped first and restarted afterwards. Everything around the
//! `setup-disk` call is best-effort; only `setup-disk` itself can fail the
//! step.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::thread;

use super::{StepContext, StepOutcome};
use crate::process::Cmd;
use crate::service::ServiceAction;

pub(super) fn run(disk: &str, ctx: &StepContext<'_>) -> Result<StepOutcome> {
    let mut outcome = StepOutcome::applied();
    let disk_settings = &ctx.settings.disk;

    let runtime_running = match ctx.probe.process_names() {
        Ok(names) => names
            .iter()
            .any(|name| name.contains(disk_settings.container_process.as_str())),
        Err(err) => {
            outcome.warn(err.context("listing processes"));
            false
        }
    };

    if runtime_running {
        tracing::info!(service = %disk_settings.container_service, "stopping container runtime");
        outcome.best_effort(
            ctx.services
                .control(&disk_settings.container_service, ServiceAction::Stop)
                .context("stopping container runtime"),
        );
        thread::sleep(ctx.settings.settle_delay());
    }

    match ctx.probe.mount_points() {
        Ok(mounts) => {
            for mount in mounts_below(mounts, &disk_settings.protected_mount_root) {
                outcome.best_effort(
                    Cmd::new("umount")
                        .arg_path(&mount)
                        .run_with(ctx.runner)
                        .map(drop)
                        .with_context(|| format!("unmounting '{}'", mount.display())),
                );
            }
        }
        Err(err) => outcome.warn(err.context("listing mounts")),
    }

    tracing::info!(disk, filesystem = %disk_settings.filesystem, "setting up scratch disk");
    let setup = Cmd::new("setup-disk")
        .args(["-m", "data"])
        .arg(disk)
        .env("VARFS", disk_settings.filesystem.as_str())
        .env("ERASE_DISKS", disk)
        .env("DEFAULT_DISK", "none")
        .stream(!ctx.settings.silent)
        .run_with(ctx.runner)
        .with_context(|| format!("setting up scratch disk '{}'", disk));

    if runtime_running {
        outcome.best_effort(
            ctx.services
                .control(&disk_settings.container_service, ServiceAction::Restart)
                .context("restarting container runtime"),
        );
    }
    setup?;

    match ctx.probe.swap_devices() {
        Ok(swaps) if swaps.iter().any(|swap| is_on_disk(swap, disk)) => {
            tracing::debug!(disk, "swap already active");
        }
        Ok(_) => outcome.best_effort(
            Cmd::new("swapon")
                .arg("-a")
                .run_with(ctx.runner)
                .map(drop)
                .context("enabling swap"),
        ),
        Err(err) => outcome.warn(err.context("listing swap devices")),
    }

    Ok(outcome)
}

/// Whether `device` is `disk` itself or one of its partitions.
///
/// Disks whose name ends in a digit (`nvme0n1`, `mmcblk0`) number their
/// partitions after a `p`.
fn is_on_disk(device: &str, disk: &str) -> bool {
    let Some(rest) = device.strip_prefix(disk) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    let number = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(number) => number,
            None => return false,
        }
    } else {
        rest
    };
    !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())
}

/// Mounts at or below `root`, deepest first so nested mounts are released
/// before their parents.
fn mounts_below(mounts: Vec<PathBuf>, root: &Path) -> Vec<PathBuf> {
    let mut selected: Vec<PathBuf> = mounts
        .into_iter()
        .filter(|mount| mount.starts_with(root))
        .collect();
    selected.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    selected.dedup();
    selected
}
