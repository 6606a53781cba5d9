// CLASSIFICATION: COMMUNITY
// Filename: kargs.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-04-27

//! Kernel command-line and device-tree import.
//!
//! Both inputs surface as `ro.boot.*` properties. The device tree is
//! imported first in the second stage, the command line after it; since
//! `ro.*` properties are write-once, device-tree values win for keys present
//! in both. Emulator runs additionally export every command-line key under
//! `ro.kernel.*`.

use std::fs;
use std::path::Path;

use crate::world::World;

const DT_COMPATIBLE: &str = "android,firmware";
const DT_FSTAB_COMPATIBLE: &str = "android,fstab";

/// Canonical aliases promoted from `ro.boot.*` after import.
const BOOT_PROP_MAP: &[(&str, &str, &str)] = &[
    ("ro.boot.serialno", "ro.serialno", ""),
    ("ro.boot.mode", "ro.bootmode", "unknown"),
    ("ro.boot.baseband", "ro.baseband", "unknown"),
    ("ro.boot.bootloader", "ro.bootloader", "unknown"),
    ("ro.boot.hardware", "ro.hardware", "unknown"),
    ("ro.boot.revision", "ro.revision", "0"),
];

/// Parse `key=value` tokens from a kernel command line, skipping malformed
/// tokens. Never fatal: a bad command line boots with fewer properties.
pub fn parse_cmdline(raw: &str, mut f: impl FnMut(&str, &str)) {
    for token in raw.split_ascii_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        f(key, value);
    }
}

fn import_one(world: &mut World, for_emulator: bool, key: &str, value: &str) {
    if for_emulator {
        // In the emulator, export any kernel option under ro.kernel.
        let prop = format!("ro.kernel.{}", key);
        if let Err(e) = world.set_property(&prop, value) {
            log::warn!("cannot set {}: {}", prop, e);
        }
        return;
    }
    if key == "qemu" {
        world.emulator = true;
    } else if let Some(suffix) = key.strip_prefix("androidboot.") {
        let prop = format!("ro.boot.{}", suffix);
        if let Err(e) = world.set_property(&prop, value) {
            log::warn!("cannot set {}: {}", prop, e);
        }
    }
}

/// Import the kernel command line. The first pass finds the common keys and
/// detects the emulator; only the emulator gets the exporting second pass.
pub fn process_kernel_cmdline(world: &mut World) {
    let path = world.paths.proc_cmdline.clone();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("cannot read {}: {}", path.display(), e);
            return;
        }
    };
    let mut pairs = Vec::new();
    parse_cmdline(&raw, |k, v| pairs.push((k.to_string(), v.to_string())));
    for (k, v) in &pairs {
        import_one(world, false, k, v);
    }
    if world.emulator {
        for (k, v) in &pairs {
            import_one(world, true, k, v);
        }
    }
}

/// Read a device-tree entry with its trailing NUL stripped.
fn read_dt_entry(path: &Path) -> Option<String> {
    let mut bytes = fs::read(path).ok()?;
    if bytes.last() == Some(&0) {
        bytes.pop();
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// The android firmware node is only trusted when it declares itself.
pub fn is_dt_compatible(android_dt_dir: &Path) -> bool {
    read_dt_entry(&android_dt_dir.join("compatible")).as_deref() == Some(DT_COMPATIBLE)
}

/// Whether the device tree carries an early-mount fstab.
pub fn is_dt_fstab_compatible(android_dt_dir: &Path) -> bool {
    read_dt_entry(&android_dt_dir.join("fstab/compatible")).as_deref()
        == Some(DT_FSTAB_COMPATIBLE)
}

/// Import `ro.boot.*` properties from the device tree firmware node. Commas
/// in values are rewritten to dots so the values stay property-safe.
pub fn process_kernel_dt(world: &mut World) {
    let dt_dir = world.paths.android_dt_dir.clone();
    if !is_dt_compatible(&dt_dir) {
        return;
    }
    let entries = match fs::read_dir(&dt_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "compatible" || name == "name" {
            continue;
        }
        let Some(value) = read_dt_entry(&path) else {
            continue;
        };
        let value = value.replace(',', ".");
        let prop = format!("ro.boot.{}", name);
        if let Err(e) = world.set_property(&prop, &value) {
            log::warn!("cannot set {}: {}", prop, e);
        }
    }
}

/// Promote the kernel-supplied boot properties to their canonical aliases,
/// with per-property defaults for missing sources.
pub fn export_kernel_boot_props(world: &mut World) {
    for (src, dst, default) in BOOT_PROP_MAP {
        let value = world.props.get_or_empty(src).to_string();
        let value = if value.is_empty() { default.to_string() } else { value };
        if let Err(e) = world.set_property(dst, &value) {
            log::warn!("cannot set {}: {}", dst, e);
        }
    }
}

/// Publish whether the bootloader is flash-locked, derived from the verified
/// boot state, for devices that support OEM unlock.
pub fn export_oem_lock_status(world: &mut World) {
    if world.props.get_or_empty("ro.oem_unlock_supported") != "1" {
        return;
    }
    let state = world.props.get_or_empty("ro.boot.verifiedbootstate").to_string();
    if !state.is_empty() {
        let locked = if state == "orange" { "0" } else { "1" };
        if let Err(e) = world.set_property("ro.boot.flash.locked", locked) {
            log::warn!("cannot set ro.boot.flash.locked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SysPaths;

    fn world_with_cmdline(dir: &Path, cmdline: &str) -> World {
        let paths = SysPaths::rooted(dir);
        fs::create_dir_all(paths.proc_cmdline.parent().unwrap()).unwrap();
        fs::write(&paths.proc_cmdline, cmdline).unwrap();
        let mut w = World::new(paths);
        w.props.init();
        w
    }

    #[test]
    fn imports_androidboot_keys_and_emulator_exports() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = world_with_cmdline(
            dir.path(),
            "androidboot.hardware=foo bar=baz qemu=1 androidboot.selinux=permissive",
        );
        process_kernel_cmdline(&mut w);
        assert_eq!(w.props.get("ro.boot.hardware"), Some("foo"));
        assert_eq!(w.props.get("ro.boot.selinux"), Some("permissive"));
        assert!(w.emulator);
        // Second pass exported everything under ro.kernel.
        assert_eq!(w.props.get("ro.kernel.bar"), Some("baz"));
        assert_eq!(w.props.get("ro.kernel.androidboot.hardware"), Some("foo"));
    }

    #[test]
    fn non_emulator_gets_no_kernel_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = world_with_cmdline(dir.path(), "androidboot.mode=charger bar=baz");
        process_kernel_cmdline(&mut w);
        assert!(!w.emulator);
        assert!(w.props.get("ro.kernel.bar").is_none());
        assert_eq!(w.props.get("ro.boot.mode"), Some("charger"));
    }

    #[test]
    fn malformed_tokens_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = world_with_cmdline(dir.path(), "noequals =value androidboot.x=1");
        process_kernel_cmdline(&mut w);
        assert_eq!(w.props.get("ro.boot.x"), Some("1"));
    }

    #[test]
    fn dt_requires_compatible_marker() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        fs::create_dir_all(&paths.android_dt_dir).unwrap();
        fs::write(paths.android_dt_dir.join("compatible"), b"android,other\0").unwrap();
        fs::write(paths.android_dt_dir.join("serialno"), b"XYZ\0").unwrap();
        let mut w = World::new(paths);
        w.props.init();
        process_kernel_dt(&mut w);
        assert!(w.props.get("ro.boot.serialno").is_none());
    }

    #[test]
    fn dt_values_rewrite_commas_and_win_over_cmdline() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        fs::create_dir_all(&paths.android_dt_dir).unwrap();
        fs::create_dir_all(paths.proc_cmdline.parent().unwrap()).unwrap();
        fs::write(&paths.proc_cmdline, "androidboot.hardware=cmdline-hw").unwrap();
        fs::write(
            paths.android_dt_dir.join("compatible"),
            b"android,firmware\0",
        )
        .unwrap();
        fs::write(paths.android_dt_dir.join("hardware"), b"dt,hw\0").unwrap();
        let mut w = World::new(paths);
        w.props.init();
        // Stage-two order: device tree first, command line second.
        process_kernel_dt(&mut w);
        process_kernel_cmdline(&mut w);
        assert_eq!(w.props.get("ro.boot.hardware"), Some("dt.hw"));
    }

    #[test]
    fn boot_props_promote_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = world_with_cmdline(dir.path(), "androidboot.hardware=foo");
        process_kernel_cmdline(&mut w);
        export_kernel_boot_props(&mut w);
        assert_eq!(w.props.get("ro.hardware"), Some("foo"));
        assert_eq!(w.props.get("ro.bootmode"), Some("unknown"));
        assert_eq!(w.props.get("ro.revision"), Some("0"));
        assert_eq!(w.props.get("ro.serialno"), Some(""));
    }

    #[test]
    fn oem_lock_status_follows_verified_boot_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = world_with_cmdline(dir.path(), "");
        w.set_property("ro.oem_unlock_supported", "1").unwrap();
        w.set_property("ro.boot.verifiedbootstate", "orange").unwrap();
        export_oem_lock_status(&mut w);
        assert_eq!(w.props.get("ro.boot.flash.locked"), Some("0"));

        let mut w = world_with_cmdline(dir.path(), "");
        w.set_property("ro.oem_unlock_supported", "1").unwrap();
        w.set_property("ro.boot.verifiedbootstate", "green").unwrap();
        export_oem_lock_status(&mut w);
        assert_eq!(w.props.get("ro.boot.flash.locked"), Some("1"));
    }
}
