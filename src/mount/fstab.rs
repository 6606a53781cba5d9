// CLASSIFICATION: COMMUNITY
// Filename: fstab.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-03-29

//! Fstab records and the device-tree fstab reader.
//!
//! Early-mountable partitions are described in the device tree under
//! `firmware/android/fstab/<name>/{dev,type,mnt_flags,fsmgr_flags}`. The
//! reader is deliberately thin; full fstab parsing belongs to the filesystem
//! manager, the boot core only needs the early rows.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::mount::MsFlags;
use thiserror::Error;

use crate::util::basename;

/// Mount points eligible for early mount, in processing order.
pub const EARLY_MOUNT_POINTS: &[&str] = &["/odm", "/system", "/vendor"];

#[derive(Debug, Error)]
pub enum FstabError {
    #[error("partitions can't be verified at boot (mount point '{0}')")]
    VerifyAtBoot(String),
    #[error("more than one verity meta partition: '{0}', '{1}'")]
    MultipleMetaPartitions(String, String),
}

#[derive(Debug, Clone)]
pub struct FstabRec {
    pub mount_point: PathBuf,
    pub blk_device: PathBuf,
    pub fs_type: String,
    pub flags: MsFlags,
    pub fs_options: String,
    pub verified: bool,
    pub verify_at_boot: bool,
    pub verity_loc: Option<PathBuf>,
}

impl FstabRec {
    pub fn new(mount_point: &str, blk_device: &str, fs_type: &str) -> Self {
        Self {
            mount_point: PathBuf::from(mount_point),
            blk_device: PathBuf::from(blk_device),
            fs_type: fs_type.to_string(),
            flags: MsFlags::empty(),
            fs_options: String::new(),
            verified: false,
            verify_at_boot: false,
            verity_loc: None,
        }
    }
}

/// External fstab provider; the live one reads the device tree.
pub trait FstabSource {
    fn read_fstab(&self) -> Result<Vec<FstabRec>>;
}

/// Keep the rows whose mount point is early-mountable, preserving the order
/// the source returned them in.
pub fn select_early_rows(recs: Vec<FstabRec>) -> Vec<FstabRec> {
    recs.into_iter()
        .filter(|r| {
            EARLY_MOUNT_POINTS
                .iter()
                .any(|mp| Path::new(mp) == r.mount_point)
        })
        .collect()
}

/// Derive the partition-name set a coldboot pass has to resolve: the basename
/// of every row's block device plus the single verity meta partition, if any.
/// Also reports whether any row needs verity at all.
pub fn get_early_partitions(
    recs: &[FstabRec],
) -> Result<(BTreeSet<String>, bool), FstabError> {
    let mut meta_partition: Option<String> = None;
    let mut need_verity = false;

    for rec in recs {
        if rec.verify_at_boot {
            return Err(FstabError::VerifyAtBoot(
                rec.mount_point.display().to_string(),
            ));
        }
        if rec.verified {
            need_verity = true;
        }
        if let Some(loc) = &rec.verity_loc {
            let name = basename(loc);
            match &meta_partition {
                Some(existing) if *existing != name => {
                    return Err(FstabError::MultipleMetaPartitions(
                        existing.clone(),
                        name,
                    ));
                }
                _ => meta_partition = Some(name),
            }
        }
    }

    let mut partitions: BTreeSet<String> =
        recs.iter().map(|r| basename(&r.blk_device)).collect();
    if let Some(meta) = meta_partition {
        partitions.insert(meta);
    }
    Ok((partitions, need_verity))
}

/// Read a device-tree file: raw bytes with trailing NULs stripped.
fn read_dt_value(path: &Path) -> Option<String> {
    let mut bytes = fs::read(path).ok()?;
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    Some(String::from_utf8_lossy(&bytes).trim().to_string())
}

/// Fstab read from `firmware/android/fstab` in the device tree.
pub struct DtFstab {
    dt_dir: PathBuf,
}

impl DtFstab {
    pub fn new(android_dt_dir: &Path) -> Self {
        Self {
            dt_dir: android_dt_dir.to_path_buf(),
        }
    }

    /// True when the fstab node declares itself `android,fstab`.
    pub fn is_compatible(&self) -> bool {
        read_dt_value(&self.dt_dir.join("fstab/compatible")).as_deref() == Some("android,fstab")
    }

    fn parse_mnt_flags(raw: &str) -> (MsFlags, String) {
        let mut flags = MsFlags::empty();
        let mut leftover = Vec::new();
        for tok in raw.split(',').filter(|t| !t.is_empty()) {
            match tok {
                "ro" => flags |= MsFlags::MS_RDONLY,
                "rw" => {}
                "nosuid" => flags |= MsFlags::MS_NOSUID,
                "nodev" => flags |= MsFlags::MS_NODEV,
                "noexec" => flags |= MsFlags::MS_NOEXEC,
                "noatime" => flags |= MsFlags::MS_NOATIME,
                "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
                other => leftover.push(other),
            }
        }
        (flags, leftover.join(","))
    }

    fn parse_fsmgr_flags(rec: &mut FstabRec, raw: &str) {
        for tok in raw.split(',').filter(|t| !t.is_empty()) {
            if tok == "verify" {
                rec.verified = true;
            } else if let Some(loc) = tok.strip_prefix("verify=") {
                rec.verified = true;
                rec.verity_loc = Some(PathBuf::from(loc));
            } else if tok == "verifyatboot" {
                rec.verify_at_boot = true;
            }
        }
    }
}

impl FstabSource for DtFstab {
    fn read_fstab(&self) -> Result<Vec<FstabRec>> {
        let fstab_dir = self.dt_dir.join("fstab");
        let mut names: Vec<String> = fs::read_dir(&fstab_dir)
            .with_context(|| format!("cannot read {}", fstab_dir.display()))?
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();

        let mut recs = Vec::new();
        for name in names {
            let node = fstab_dir.join(&name);
            let Some(dev) = read_dt_value(&node.join("dev")) else {
                log::warn!("fstab node '{}' has no dev entry, skipped", name);
                continue;
            };
            let fs_type = read_dt_value(&node.join("type")).unwrap_or_else(|| "ext4".to_string());
            let mut rec = FstabRec::new(&format!("/{}", name), &dev, &fs_type);
            if let Some(raw) = read_dt_value(&node.join("mnt_flags")) {
                let (flags, opts) = Self::parse_mnt_flags(&raw);
                rec.flags = flags;
                rec.fs_options = opts;
            }
            if let Some(raw) = read_dt_value(&node.join("fsmgr_flags")) {
                Self::parse_fsmgr_flags(&mut rec, &raw);
            }
            recs.push(rec);
        }
        Ok(recs)
    }
}
