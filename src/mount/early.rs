// CLASSIFICATION: COMMUNITY
// Filename: early.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-04-15

//! Early mounting of the system, vendor and odm partitions.
//!
//! Runs in the first stage, before policy load, so the partitions holding
//! policy files are visible when the loader needs them. Block nodes are
//! materialized by a coldboot replay; verified rows get their dm device set
//! up and coldbooted individually before mounting.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use nix::mount::mount;

use crate::devices::{ColdbootAction, DeviceManager};
use crate::mount::fstab::{
    get_early_partitions, select_early_rows, FstabRec, FstabSource,
};
use crate::util::basename;
use crate::world::SysPaths;

/// Verity setup is delegated to the attested-boot library; it rewrites the
/// record's block device to the published `dm-N` node.
pub trait VeritySetup {
    fn setup_verity(&mut self, rec: &mut FstabRec) -> Result<()>;
}

/// Stand-in for builds without the attested-boot library linked: any row that
/// actually requires verity fails early mount instead of being mounted
/// unverified.
pub struct VerityUnavailable;

impl VeritySetup for VerityUnavailable {
    fn setup_verity(&mut self, rec: &mut FstabRec) -> Result<()> {
        bail!(
            "verity required for '{}' but no verity backend is linked",
            rec.mount_point.display()
        )
    }
}

/// Resolve the partition-name set into device nodes via coldboot. Names are
/// removed as their devices are created; anything left is missing hardware.
fn early_device_init(
    dm: &mut dyn DeviceManager,
    partitions: &mut BTreeSet<String>,
) -> Result<()> {
    if partitions.is_empty() {
        return Ok(());
    }
    dm.coldboot(None, &mut |event| {
        if event.subsystem == "firmware" {
            return ColdbootAction::Continue;
        }
        // Platform devices are needed for symlink creation.
        if event.subsystem == "platform" {
            return ColdbootAction::Create;
        }
        if event.subsystem != "block" {
            return ColdbootAction::Continue;
        }
        if let Some(name) = event.partition_name.as_deref() {
            if partitions.remove(name) {
                return if partitions.is_empty() {
                    ColdbootAction::Stop
                } else {
                    ColdbootAction::Create
                };
            }
        }
        ColdbootAction::Continue
    })
}

fn mount_one(rec: &FstabRec) -> Result<()> {
    fs::create_dir_all(&rec.mount_point).with_context(|| {
        format!("cannot create mount point {}", rec.mount_point.display())
    })?;
    let opts = if rec.fs_options.is_empty() {
        None
    } else {
        Some(rec.fs_options.as_str())
    };
    mount(
        Some(rec.blk_device.as_path()),
        rec.mount_point.as_path(),
        Some(rec.fs_type.as_str()),
        rec.flags,
        opts,
    )
    .with_context(|| {
        format!(
            "failed to mount {} on {}",
            rec.blk_device.display(),
            rec.mount_point.display()
        )
    })?;
    Ok(())
}

/// Set up verity if the row wants it (waiting for its dm node to appear),
/// then mount the row.
fn early_mount_one(
    paths: &SysPaths,
    dm: &mut dyn DeviceManager,
    verity: &mut dyn VeritySetup,
    rec: &mut FstabRec,
) -> Result<()> {
    if rec.verified {
        verity
            .setup_verity(rec)
            .with_context(|| format!("verity setup for {}", rec.mount_point.display()))?;

        // Verity setup republished the mount source as /dev/block/dm-N;
        // coldboot that single device until its node exists.
        let dm_name = basename(&rec.blk_device);
        let syspath = paths.sys_dir.join("block").join(&dm_name);
        dm.coldboot(Some(&syspath), &mut |event| {
            if event.device_name.as_deref() == Some(dm_name.as_str()) {
                log::debug!("created dm-verity device {}", dm_name);
                ColdbootAction::Stop
            } else {
                ColdbootAction::Continue
            }
        })?;
    }
    mount_one(rec)
}

/// Early-mount engine. Skips quietly in recovery or when the device tree
/// carries no compatible fstab; anything else that goes wrong is an error the
/// first stage treats as fatal. Already-mounted rows stay mounted on partial
/// failure.
pub fn early_mount(
    paths: &SysPaths,
    fstab: &dyn FstabSource,
    dt_fstab_compatible: bool,
    dm: &mut dyn DeviceManager,
    verity: &mut dyn VeritySetup,
) -> Result<()> {
    if paths.recovery_marker.exists() {
        log::info!("early mount skipped (recovery mode)");
        return Ok(());
    }
    if !dt_fstab_compatible {
        log::info!("early mount skipped (missing/incompatible fstab in device tree)");
        return Ok(());
    }

    let recs = fstab
        .read_fstab()
        .context("early mount failed to read fstab from device tree")?;
    let mut early = select_early_rows(recs);
    if early.is_empty() {
        return Ok(());
    }

    let (mut partitions, need_verity) = get_early_partitions(&early)?;

    let result = (|| {
        early_device_init(dm, &mut partitions)?;
        if !partitions.is_empty() {
            let missing: Vec<String> = partitions.iter().cloned().collect();
            return Err(anyhow!("partition(s) not found: {}", missing.join(", ")));
        }

        if need_verity {
            // Materialize the device-mapper control node.
            dm.coldboot(Some(&paths.dm_control_syspath), &mut |_| {
                ColdbootAction::Stop
            })?;
        }

        for rec in &mut early {
            early_mount_one(paths, dm, verity, rec)?;
        }
        Ok(())
    })();

    dm.release();
    result
}
