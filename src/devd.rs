// CLASSIFICATION: COMMUNITY
// Filename: devd.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-05-25

//! Standalone device-manager entry point.
//!
//! Invoked when the init binary runs under the `devd` name. Replays the
//! whole device inventory so every block node exists, then drops the
//! coldboot-done sentinel the second stage waits on. Live hot-plug handling
//! is the long-running half of the device manager and stays out of the boot
//! core; this entry parks once the replay is done.

use std::fs;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::devices::{ColdbootAction, DeviceManager, SysfsDeviceManager};
use crate::world::SysPaths;

pub fn main() -> Result<()> {
    let paths = SysPaths::default();
    crate::logging::init_kernel_logging(&paths.dev_dir.join("kmsg"));
    log::info!("devd starting coldboot");

    let mut dm = SysfsDeviceManager::new(&paths.sys_dir, &paths.block_dev_dir);
    let mut created = 0usize;
    dm.coldboot(None, &mut |_| {
        created += 1;
        ColdbootAction::Create
    })
    .context("coldboot replay failed")?;
    dm.release();

    fs::write(&paths.coldboot_done, "").with_context(|| {
        format!("cannot create {}", paths.coldboot_done.display())
    })?;
    log::info!("coldboot done, {} devices visited", created);

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
