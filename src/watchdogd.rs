// CLASSIFICATION: COMMUNITY
// Filename: watchdogd.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-05-25

//! Hardware watchdog keeper.
//!
//! Invoked when the init binary runs under the `watchdogd` name. Kicks the
//! watchdog device on a fixed interval; if this process ever stalls, the
//! hardware resets the machine.

use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::world::SysPaths;

const DEFAULT_INTERVAL_SECS: u64 = 10;

pub fn main(args: &[String]) -> Result<()> {
    let paths = SysPaths::default();
    crate::logging::init_kernel_logging(&paths.dev_dir.join("kmsg"));

    let interval = args
        .first()
        .and_then(|a| a.parse().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    log::info!("watchdogd started (interval {}s)", interval);

    let mut dev = OpenOptions::new()
        .write(true)
        .open(&paths.watchdog_dev)
        .with_context(|| format!("cannot open {}", paths.watchdog_dev.display()))?;

    loop {
        if let Err(e) = dev.write_all(b"\0") {
            log::error!("watchdog kick failed: {}", e);
        }
        std::thread::sleep(Duration::from_secs(interval));
    }
}
