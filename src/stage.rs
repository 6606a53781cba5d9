// CLASSIFICATION: COMMUNITY
// Filename: stage.rs v0.9
// Author: Lukas Bower
// Date Modified: 2026-05-27

//! The two-stage boot controller.
//!
//! Stage one runs in the kernel MAC domain: it assembles the minimal
//! filesystem tree, early-mounts the system partitions, loads policy, then
//! re-executes itself so the kernel can transition the process into the init
//! domain. Stage two, recognized by the `INIT_SECOND_STAGE` sentinel in the
//! environment, brings up properties and scripts and becomes the supervisor.

use std::ffi::CString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use nix::mount::{mount, MsFlags};
use nix::sys::stat::{makedev, mknod, umask, Mode, SFlag};
use nix::unistd::{execv, setgroups, Gid};

use crate::devices::SysfsDeviceManager;
use crate::harden;
use crate::kargs;
use crate::mount::early::{early_mount, VerityUnavailable};
use crate::mount::fstab::DtFstab;
use crate::panic::{reboot_panic, security_failure};
use crate::policy::restorecon::Restorecon;
use crate::policy::{initialize_kernel_policy, SelinuxFs};
use crate::rcscript::RcParser;
use crate::signals;
use crate::supervisor::{self, Poller};
use crate::timer::BootTimer;
use crate::util::wait_for_file;
use crate::world::World;

/// Environment sentinels passed from stage one to stage two.
pub const ENV_SECOND_STAGE: &str = "INIT_SECOND_STAGE";
pub const ENV_STARTED_AT: &str = "INIT_STARTED_AT";
pub const ENV_SELINUX_TOOK: &str = "INIT_SELINUX_TOOK";

/// Supplementary group allowed to read /proc with hidepid=2.
const READPROC_GID: u32 = 3009;

/// Attested-boot library major version, published for update matching.
const AVB_MAJOR_VERSION: u32 = 1;

const COLDBOOT_TIMEOUT: Duration = Duration::from_secs(60);

fn mount_or_warn(
    source: &str,
    target: &std::path::Path,
    fstype: &str,
    flags: MsFlags,
    data: Option<&str>,
) {
    if let Err(e) = mount(Some(source), target, Some(fstype), flags, data) {
        log::warn!("mount {} on {} failed: {}", fstype, target.display(), e);
    }
}

fn mknod_chr(path: &std::path::Path, mode: u32, major: u64, minor: u64) {
    if let Err(e) = mknod(
        path,
        SFlag::S_IFCHR,
        Mode::from_bits_truncate(mode),
        makedev(major, minor),
    ) {
        log::warn!("mknod {} failed: {}", path.display(), e);
    }
}

/// Assemble /dev, /proc and /sys from nothing. These mounts predate logging,
/// so errors are collected once the kernel logger is up.
fn mount_basic_filesystems(world: &World) {
    let paths = &world.paths;
    mount_or_warn(
        "tmpfs",
        &paths.dev_dir,
        "tmpfs",
        MsFlags::MS_NOSUID,
        Some("mode=0755"),
    );
    let _ = fs::create_dir_all(paths.dev_dir.join("pts"));
    let _ = fs::create_dir_all(paths.dev_dir.join("socket"));
    mount_or_warn(
        "devpts",
        &paths.dev_dir.join("pts"),
        "devpts",
        MsFlags::empty(),
        None,
    );
    mount_or_warn(
        "proc",
        &paths.proc_dir,
        "proc",
        MsFlags::empty(),
        Some(&format!("hidepid=2,gid={}", READPROC_GID)),
    );
    // Don't expose the raw command line to unprivileged processes.
    if let Ok(meta) = fs::metadata(&paths.proc_cmdline) {
        let mut perm = meta.permissions();
        perm.set_mode(0o440);
        let _ = fs::set_permissions(&paths.proc_cmdline, perm);
    }
    if let Err(e) = setgroups(&[Gid::from_raw(READPROC_GID)]) {
        log::warn!("setgroups failed: {}", e);
    }
    mount_or_warn("sysfs", &paths.sys_dir, "sysfs", MsFlags::empty(), None);
    let _ = fs::create_dir_all(&paths.selinux_mnt);
    mount_or_warn(
        "selinuxfs",
        &paths.selinux_mnt,
        "selinuxfs",
        MsFlags::empty(),
        None,
    );
    mknod_chr(&paths.dev_dir.join("kmsg"), 0o600, 1, 11);
    mknod_chr(&paths.dev_dir.join("random"), 0o666, 1, 8);
    mknod_chr(&paths.dev_dir.join("urandom"), 0o666, 1, 9);
}

/// First stage: early mount, policy load, re-exec. Returning at all means
/// something fatal happened; the caller reboots.
pub fn first_stage(world: &mut World) -> Result<()> {
    let start_time = SystemTime::now();
    umask(Mode::empty());

    mount_basic_filesystems(world);

    crate::logging::init_kernel_logging(&world.paths.dev_dir.join("kmsg"));
    log::info!("init first stage started");

    {
        let fstab = DtFstab::new(&world.paths.android_dt_dir);
        let compatible = kargs::is_dt_fstab_compatible(&world.paths.android_dt_dir);
        let mut dm =
            SysfsDeviceManager::new(&world.paths.sys_dir, &world.paths.block_dev_dir);
        let mut verity = VerityUnavailable;
        early_mount(&world.paths, &fstab, compatible, &mut dm, &mut verity)
            .context("failed to mount required partitions early")?;
    }

    let mut kernel = SelinuxFs::new(&world.paths.selinux_mnt);
    initialize_kernel_policy(&world.paths, &world.env, &mut kernel)
        .context("policy initialization failed")?;

    // The init binary itself was labeled before policy existed; the re-exec
    // below must happen with the correct context.
    Restorecon::load(&world.paths.file_contexts)
        .restore(&world.paths.own_binary)
        .context("restorecon of init failed")?;

    std::env::set_var(ENV_SECOND_STAGE, "true");
    let started_ms = start_time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    std::env::set_var(ENV_STARTED_AT, started_ms.to_string());

    let path = CString::new(world.paths.own_binary.as_os_str().as_bytes())?;
    let argv = [path.clone()];
    let err = execv(&path, &argv).unwrap_err();
    Err(anyhow!("execv of {} failed: {}", world.paths.own_binary.display(), err))
}

fn set_prop_or_warn(world: &mut World, name: &str, value: &str) {
    if let Err(e) = world.set_property(name, value) {
        log::warn!("cannot set {}: {}", name, e);
    }
}

/// Restore contexts on everything created before initial policy load. Must
/// run before the device manager repopulates /dev.
fn restorecon_boot_paths(world: &World) {
    let rc = Restorecon::load(&world.paths.file_contexts);
    let dev = &world.paths.dev_dir;
    let root = world
        .paths
        .file_contexts
        .parent()
        .unwrap_or(std::path::Path::new("/"))
        .to_path_buf();
    let flat = [
        dev.clone(),
        dev.join("kmsg"),
        dev.join("socket"),
        dev.join("random"),
        dev.join("urandom"),
        dev.join("__properties__"),
        dev.join("device-mapper"),
        root.join("plat_property_contexts"),
        root.join("nonplat_property_contexts"),
    ];
    for path in &flat {
        if let Err(e) = rc.restore(path) {
            log::warn!("{:#}", e);
        }
    }
    for path in [&world.paths.sys_dir, &world.paths.block_dev_dir] {
        if let Err(e) = rc.restore_recursive(path) {
            log::warn!("{:#}", e);
        }
    }
}

/// Pick the first controller under the UDC class directory so the USB stack
/// can configure gadgets.
fn set_usb_controller(world: &mut World) {
    let Ok(entries) = fs::read_dir(&world.paths.udc_class_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        set_prop_or_warn(world, "sys.usb.controller", &name);
        break;
    }
}

// ---- queued builtins -------------------------------------------------------

fn wait_for_coldboot_done_action(world: &mut World) -> i32 {
    let timer = BootTimer::start();
    log::debug!("waiting for {}", world.paths.coldboot_done.display());
    if wait_for_file(&world.paths.coldboot_done, COLDBOOT_TIMEOUT).is_none() {
        reboot_panic(&format!(
            "timed out waiting for {}",
            world.paths.coldboot_done.display()
        ));
    }
    let elapsed = timer.elapsed_ms().to_string();
    set_prop_or_warn(world, "ro.boottime.init.cold_boot_wait", &elapsed);
    0
}

fn mix_hwrng_into_linux_rng_action(world: &mut World) -> i32 {
    if harden::mix_hwrng_into_linux_rng(&world.paths) {
        0
    } else {
        -1
    }
}

fn set_mmap_rnd_bits_action(world: &mut World) -> i32 {
    if !harden::set_mmap_rnd_bits(&world.paths) {
        security_failure();
    }
    0
}

fn set_kptr_restrict_action(world: &mut World) -> i32 {
    if !harden::set_kptr_restrict(&world.paths) {
        security_failure();
    }
    0
}

fn keychord_init_action(world: &mut World) -> i32 {
    // Debug keychords belong to the input collaborator; all we do is note
    // whether the device is even present.
    let keychord = world.paths.dev_dir.join("keychord");
    if keychord.exists() {
        log::info!("keychord device present at {}", keychord.display());
    } else {
        log::debug!("no keychord device");
    }
    0
}

fn console_init_action(world: &mut World) -> i32 {
    let console = world.props.get_or_empty("ro.boot.console").to_string();
    if !console.is_empty() {
        world.default_console = format!("/dev/{}", console);
    }
    0
}

fn enable_property_triggers_action(world: &mut World) -> i32 {
    world.actions.enable_property_triggers();
    0
}

fn replay_property_triggers_action(world: &mut World) -> i32 {
    let snapshot = world.props.snapshot();
    world.actions.queue_all_property_triggers(&snapshot);
    0
}

fn queue_property_triggers_action(world: &mut World) -> i32 {
    world
        .actions
        .queue_builtin_action(enable_property_triggers_action, "enable_property_trigger");
    // Replayed as its own queued builtin so it runs after the latch is set.
    world
        .actions
        .queue_builtin_action(replay_property_triggers_action, "replay_property_triggers");
    0
}

// ---------------------------------------------------------------------------

/// Load boot scripts: an explicit `ro.boot.init_rc` is used exclusively,
/// otherwise the rooted script plus the system, vendor and odm directories.
pub fn load_boot_scripts(world: &mut World) {
    let mut parser = RcParser::new();
    let bootscript = world.props.get_or_empty("ro.boot.init_rc").to_string();
    if !bootscript.is_empty() {
        parser.parse_config(world, std::path::Path::new(&bootscript));
        return;
    }
    let init_rc = world.paths.init_rc.clone();
    parser.parse_config(world, &init_rc);
    for dir in world.paths.init_script_dirs.clone() {
        parser.parse_config(world, &dir);
    }
}

/// Queue the fixed boot sequence that takes the system from an empty /dev to
/// property triggers enabled.
pub fn queue_boot_sequence(world: &mut World) {
    let am = &mut world.actions;
    am.queue_event_trigger("early-init");

    // Wait for coldboot so everything after can rely on a populated /dev.
    am.queue_builtin_action(wait_for_coldboot_done_action, "wait_for_coldboot_done");
    am.queue_builtin_action(mix_hwrng_into_linux_rng_action, "mix_hwrng_into_linux_rng");
    am.queue_builtin_action(set_mmap_rnd_bits_action, "set_mmap_rnd_bits");
    am.queue_builtin_action(set_kptr_restrict_action, "set_kptr_restrict");
    am.queue_builtin_action(keychord_init_action, "keychord_init");
    am.queue_builtin_action(console_init_action, "console_init");

    am.queue_event_trigger("init");

    // Repeated in case the RNG devices were not ready right after coldboot.
    am.queue_builtin_action(mix_hwrng_into_linux_rng_action, "mix_hwrng_into_linux_rng");

    // Charger mode skips the full boot.
    let bootmode = world.props.get_or_empty("ro.bootmode").to_string();
    if bootmode == "charger" {
        world.actions.queue_event_trigger("charger");
    } else {
        world.actions.queue_event_trigger("late-init");
    }

    world
        .actions
        .queue_builtin_action(queue_property_triggers_action, "queue_property_triggers");
}

/// Second stage: import kernel inputs, publish boot properties, parse the
/// boot scripts, seed the event queue and hand over to the supervisor.
pub fn second_stage(world: &mut World) -> Result<()> {
    crate::logging::init_kernel_logging(&world.paths.dev_dir.join("kmsg"));
    log::info!("init second stage started");

    // Boot marker for background firmware loaders.
    let _ = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o000)
        .open(&world.paths.booting_marker);

    world.props.init();

    // Device-tree values win over command-line duplicates: ro.* properties
    // are write-once and the device tree is imported first.
    kargs::process_kernel_dt(world);
    kargs::process_kernel_cmdline(world);
    kargs::export_kernel_boot_props(world);

    if let Ok(started_at) = std::env::var(ENV_STARTED_AT) {
        set_prop_or_warn(world, "ro.boottime.init", &started_at);
    }
    if let Ok(selinux_took) = std::env::var(ENV_SELINUX_TOOK) {
        set_prop_or_warn(world, "ro.boottime.init.selinux", &selinux_took);
    }
    set_prop_or_warn(
        world,
        "ro.boot.init.avb_version",
        &AVB_MAJOR_VERSION.to_string(),
    );

    std::env::remove_var(ENV_SECOND_STAGE);
    std::env::remove_var(ENV_STARTED_AT);
    std::env::remove_var(ENV_SELINUX_TOOK);

    restorecon_boot_paths(world);

    let mut poller = Poller::new().context("epoll setup failed")?;
    signals::start(&mut poller).context("signal handling setup failed")?;

    let default_prop = world.paths.default_prop.clone();
    world.props.load_defaults(&default_prop);
    kargs::export_oem_lock_status(world);
    log::info!("property store serving");
    set_usb_controller(world);

    load_boot_scripts(world);
    queue_boot_sequence(world);

    supervisor::run(world, &mut poller)
}
