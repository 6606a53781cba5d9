// CLASSIFICATION: COMMUNITY
// Filename: devices.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-04-08

//! Coldboot interface to the hot-plug device manager.
//!
//! Coldboot replays the kernel's device inventory as synthetic add events so
//! block nodes exist before any real hot-plug traffic. The supervisor core
//! only drives the replay through [`DeviceManager`]; the full device manager
//! daemon (`devd`) owns netlink and the long-running half.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::stat::{makedev, mknod, Mode, SFlag};

/// A synthetic or replayed kernel device event.
#[derive(Debug, Clone, Default)]
pub struct Uevent {
    pub subsystem: String,
    pub device_name: Option<String>,
    pub partition_name: Option<String>,
    pub major: u64,
    pub minor: u64,
    pub syspath: PathBuf,
}

/// Visitor verdict for one replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdbootAction {
    /// Skip this event, keep replaying.
    Continue,
    /// Create the device node, keep replaying.
    Create,
    /// Create nothing further; the replay is done.
    Stop,
}

/// The slice of the device-manager contract the boot core depends on.
pub trait DeviceManager {
    /// Replay device events under `syspath` (or the whole inventory when
    /// `None`), asking `visitor` what to do with each.
    fn coldboot(
        &mut self,
        syspath: Option<&Path>,
        visitor: &mut dyn FnMut(&Uevent) -> ColdbootAction,
    ) -> Result<()>;

    /// Drop any sockets or scratch state once early boot is done with us.
    fn release(&mut self);
}

/// Device manager backed by a sysfs walk; good enough for early boot, where
/// only block and platform devices matter.
pub struct SysfsDeviceManager {
    sys_dir: PathBuf,
    block_dev_dir: PathBuf,
}

impl SysfsDeviceManager {
    pub fn new(sys_dir: &Path, block_dev_dir: &Path) -> Self {
        Self {
            sys_dir: sys_dir.to_path_buf(),
            block_dev_dir: block_dev_dir.to_path_buf(),
        }
    }

    fn read_devnum(dir: &Path) -> Option<(u64, u64)> {
        let dev = fs::read_to_string(dir.join("dev")).ok()?;
        let (major, minor) = dev.trim().split_once(':')?;
        Some((major.parse().ok()?, minor.parse().ok()?))
    }

    fn uevent_for(dir: &Path) -> Option<Uevent> {
        let name = dir.file_name()?.to_string_lossy().into_owned();
        let (major, minor) = Self::read_devnum(dir)?;
        Some(Uevent {
            subsystem: "block".to_string(),
            device_name: Some(name.clone()),
            partition_name: Some(name),
            major,
            minor,
            syspath: dir.to_path_buf(),
        })
    }

    fn create_node(&self, event: &Uevent) {
        let Some(name) = event.device_name.as_deref() else {
            return;
        };
        if let Err(e) = fs::create_dir_all(&self.block_dev_dir) {
            log::warn!("cannot create {}: {}", self.block_dev_dir.display(), e);
            return;
        }
        let node = self.block_dev_dir.join(name);
        if node.exists() {
            return;
        }
        if let Err(e) = mknod(
            &node,
            SFlag::S_IFBLK,
            Mode::from_bits_truncate(0o600),
            makedev(event.major, event.minor),
        ) {
            log::warn!("mknod {} failed: {}", node.display(), e);
        }
    }

    /// Visit one block directory and its partition subdirectories. Returns
    /// false once the visitor said Stop.
    fn visit_block_dir(
        &self,
        dir: &Path,
        visitor: &mut dyn FnMut(&Uevent) -> ColdbootAction,
    ) -> bool {
        let mut dirs = vec![dir.to_path_buf()];
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if p.is_dir() && p.join("partition").exists() {
                    dirs.push(p);
                }
            }
        }
        for d in dirs {
            let Some(event) = Self::uevent_for(&d) else {
                continue;
            };
            match visitor(&event) {
                ColdbootAction::Continue => {}
                ColdbootAction::Create => self.create_node(&event),
                ColdbootAction::Stop => {
                    self.create_node(&event);
                    return false;
                }
            }
        }
        true
    }
}

impl DeviceManager for SysfsDeviceManager {
    fn coldboot(
        &mut self,
        syspath: Option<&Path>,
        visitor: &mut dyn FnMut(&Uevent) -> ColdbootAction,
    ) -> Result<()> {
        match syspath {
            Some(path) => {
                // A targeted replay of one device subtree, e.g. a dm-N node
                // that was just published by verity setup.
                self.visit_block_dir(path, visitor);
                Ok(())
            }
            None => {
                let block_root = self.sys_dir.join("block");
                let entries = fs::read_dir(&block_root)
                    .with_context(|| format!("cannot read {}", block_root.display()))?;
                for entry in entries.flatten() {
                    if !self.visit_block_dir(&entry.path(), visitor) {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        log::debug!("device manager released");
    }
}
