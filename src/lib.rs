// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-05-27

//! Library half of the emberinit boot system.
//!
//! The binary in `main.rs` multiplexes into the first or second boot stage
//! (or the devd/watchdogd entry points); everything it drives lives here so
//! the engines stay testable against scratch directories.

/// One-shot actions and their trigger queues
pub mod action;
/// Standalone device-manager entry point
pub mod devd;
/// Coldboot interface to the device manager
pub mod devices;
/// Bounded child environment vector
pub mod env;
/// Kernel-tunable hardening and RNG seeding
pub mod harden;
/// Kernel command-line and device-tree import
pub mod kargs;
/// Kernel logger behind the log facade
pub mod logging;
/// Early-mount engine and fstab handling
pub mod mount;
/// The fatal exit path
pub mod panic;
/// MAC policy loading and context restoration
pub mod policy;
/// The process-wide property store
pub mod property;
/// Boot-script loading and the command vocabulary
pub mod rcscript;
/// Supervised child processes
pub mod service;
/// SIGCHLD plumbing and crash handlers
pub mod signals;
/// The two-stage boot controller
pub mod stage;
/// The epoll supervisor loop
pub mod supervisor;
/// Monotonic boot timers
pub mod timer;
/// Small file and path helpers
pub mod util;
/// Hardware watchdog keeper entry point
pub mod watchdogd;
/// Process-wide boot state
pub mod world;
