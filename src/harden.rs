// CLASSIFICATION: COMMUNITY
// Filename: harden.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-05-18

//! Kernel-tunable hardening: mmap entropy, kptr restriction, and seeding the
//! kernel RNG from the hardware RNG.
//!
//! The tunables accept different ranges per kernel build, so each is walked
//! downward from the architecture's maximum until a write round-trips; a
//! value below the architecture minimum is a security failure the caller
//! must treat as fatal.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::util::read_retry;
use crate::world::SysPaths;

/// kptr_restrict bounds, identical on every architecture.
const KPTR_RESTRICT_MIN: i32 = 2;
const KPTR_RESTRICT_MAX: i32 = 4;

/// Bytes pumped from the hardware RNG into the kernel RNG.
const HWRNG_BYTES: usize = 512;

/// Per-architecture mmap randomization ranges: `(compat, start, min)`.
/// Selected by target at build time; the table itself is data so the walk
/// logic stays identical everywhere.
#[cfg(target_arch = "aarch64")]
const MMAP_RND_RULES: &[(bool, i32, i32)] = &[(false, 33, 24), (true, 16, 16)];
#[cfg(target_arch = "x86_64")]
const MMAP_RND_RULES: &[(bool, i32, i32)] = &[(false, 32, 32), (true, 16, 16)];
#[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
const MMAP_RND_RULES: &[(bool, i32, i32)] = &[(false, 16, 16)];

/// Write the greatest value in `[min, max]` that the file reads back.
/// Returns false when nothing in the range sticks, or the file is unusable.
pub fn set_highest_available_option_value(path: &Path, min: i32, max: i32) -> bool {
    if fs::read_to_string(path).is_err() {
        log::error!("cannot open for reading: {}", path.display());
        return false;
    }
    let mut current = max;
    while current >= min {
        let value = current.to_string();
        if fs::write(path, format!("{}\n", value)).is_err() {
            log::error!("cannot open for writing: {}", path.display());
            return false;
        }
        let recorded = fs::read_to_string(path).unwrap_or_default();
        if recorded.split_whitespace().next() == Some(value.as_str()) {
            return true;
        }
        current -= 1;
    }
    log::error!(
        "unable to set minimum option value {} in {}",
        min,
        path.display()
    );
    false
}

/// Raise mmap address randomization to the architecture maximum. On 32-bit
/// hosts the compat file only exists under a 64-bit kernel, which decides
/// which tunable applies.
pub fn set_mmap_rnd_bits(paths: &SysPaths) -> bool {
    for &(compat, start, min) in MMAP_RND_RULES {
        #[allow(unused_mut)]
        let mut use_compat = compat;
        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            use_compat = paths.mmap_rnd_compat_bits.exists();
        }
        let path = if use_compat {
            &paths.mmap_rnd_compat_bits
        } else {
            &paths.mmap_rnd_bits
        };
        if !set_highest_available_option_value(path, min, start) {
            log::error!("unable to set adequate mmap entropy value");
            return false;
        }
    }
    true
}

/// Restrict kernel pointer exposure as far as the kernel allows.
pub fn set_kptr_restrict(paths: &SysPaths) -> bool {
    if !set_highest_available_option_value(
        &paths.kptr_restrict,
        KPTR_RESTRICT_MIN,
        KPTR_RESTRICT_MAX,
    ) {
        log::error!("unable to set adequate kptr_restrict value");
        return false;
    }
    true
}

/// Feed exactly [`HWRNG_BYTES`] bytes from the hardware RNG into the kernel
/// RNG. A missing hardware RNG is fine; everything else that fails aborts
/// the pump without rebooting, since this is best effort.
pub fn mix_hwrng_into_linux_rng(paths: &SysPaths) -> bool {
    let mut hwrng = match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(&paths.hw_random)
    {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("{} not found", paths.hw_random.display());
            return true;
        }
        Err(e) => {
            log::error!("cannot open {}: {}", paths.hw_random.display(), e);
            return false;
        }
    };
    let mut urandom = match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(&paths.urandom)
    {
        Ok(f) => f,
        Err(e) => {
            log::error!("cannot open {}: {}", paths.urandom.display(), e);
            return false;
        }
    };

    let mut buf = [0u8; HWRNG_BYTES];
    let mut total_written = 0usize;
    while total_written < HWRNG_BYTES {
        let want = HWRNG_BYTES - total_written;
        let n = match read_retry(&mut hwrng, &mut buf[..want]) {
            Ok(0) => {
                log::error!("unexpected EOF from {}", paths.hw_random.display());
                return false;
            }
            Ok(n) => n,
            Err(e) => {
                log::error!("read from {} failed: {}", paths.hw_random.display(), e);
                return false;
            }
        };
        if let Err(e) = urandom.write_all(&buf[..n]) {
            log::error!("write to {} failed: {}", paths.urandom.display(), e);
            return false;
        }
        total_written += n;
    }
    log::info!(
        "mixed {} bytes from {} into {}",
        total_written,
        paths.hw_random.display(),
        paths.urandom.display()
    );
    true
}
