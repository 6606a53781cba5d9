// CLASSIFICATION: COMMUNITY
// Filename: main.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-05-27

//! Entry point for the init binary.
//!
//! The same binary serves as init, the device manager and the watchdog
//! keeper, multiplexed on the name it was invoked under. As init it decides
//! between the two boot stages by the presence of the stage sentinel in the
//! environment; neither stage ever returns successfully.

use std::path::Path;

use emberinit::panic::reboot_panic;
use emberinit::signals;
use emberinit::stage;
use emberinit::world::{SysPaths, World};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let invoked_as = args
        .first()
        .map(|a| {
            Path::new(a)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .unwrap_or_default();

    match invoked_as.as_str() {
        "devd" => {
            if let Err(e) = emberinit::devd::main() {
                reboot_panic(&format!("devd failed: {:#}", e));
            }
            return;
        }
        "watchdogd" => {
            if let Err(e) = emberinit::watchdogd::main(&args[1..]) {
                reboot_panic(&format!("watchdogd failed: {:#}", e));
            }
            return;
        }
        _ => {}
    }

    if cfg!(feature = "reboot-on-panic") {
        signals::install_reboot_signal_handlers();
    }

    let mut world = World::new(SysPaths::default());
    let is_first_stage = std::env::var_os(stage::ENV_SECOND_STAGE).is_none();

    let result = if is_first_stage {
        stage::first_stage(&mut world)
    } else {
        stage::second_stage(&mut world)
    };
    // Both stages only return on a fatal condition.
    if let Err(e) = result {
        reboot_panic(&format!("{:#}", e));
    }
}
