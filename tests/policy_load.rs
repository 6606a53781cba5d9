// CLASSIFICATION: COMMUNITY
// Filename: policy_load.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-05-29

//! End-to-end policy loading against a scratch system tree, with a shell
//! script standing in for the external policy compiler.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use serial_test::serial;
use tempfile::tempdir;

use emberinit::env::EnvVec;
use emberinit::policy::{
    initialize_kernel_policy, select_policy_strategy, PolicyKernel, PolicyStrategy, SelinuxFs,
};
use emberinit::world::SysPaths;

fn provision_selinuxfs(paths: &SysPaths) {
    fs::create_dir_all(&paths.selinux_mnt).unwrap();
    fs::write(paths.selinux_mnt.join("policyvers"), "30\n").unwrap();
    fs::write(paths.selinux_mnt.join("enforce"), "1").unwrap();
}

fn install_fake_compiler(paths: &SysPaths) {
    fs::create_dir_all(paths.policy_compiler.parent().unwrap()).unwrap();
    // Mirrors the real invocation: ... -o <out> -f <null>; writes the
    // compiled policy to <out> and complains on stderr.
    fs::write(
        &paths.policy_compiler,
        "#!/bin/sh\nprintf 'compiled-policy' > \"$9\"\necho 'one warning' >&2\n",
    )
    .unwrap();
    let mut perm = fs::metadata(&paths.policy_compiler).unwrap().permissions();
    perm.set_mode(0o755);
    fs::set_permissions(&paths.policy_compiler, perm).unwrap();
}

#[test]
#[serial]
fn compiles_and_loads_split_policy() {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    provision_selinuxfs(&paths);
    install_fake_compiler(&paths);
    fs::create_dir_all(&paths.dev_dir).unwrap();
    fs::create_dir_all(paths.plat_sepolicy_cil.parent().unwrap()).unwrap();
    fs::write(&paths.plat_sepolicy_cil, "(cil)").unwrap();

    let env = EnvVec::new();
    let mut kernel = SelinuxFs::new(&paths.selinux_mnt);
    initialize_kernel_policy(&paths, &env, &mut kernel).unwrap();

    // The compiled output reached the kernel load node.
    let loaded = fs::read(paths.selinux_mnt.join("load")).unwrap();
    assert_eq!(loaded, b"compiled-policy");
    // checkreqprot was turned off.
    let crp = fs::read_to_string(paths.selinux_mnt.join("checkreqprot")).unwrap();
    assert_eq!(crp, "0");
    // The scratch policy file was cleaned out of /dev.
    let leftovers: Vec<_> = fs::read_dir(&paths.dev_dir)
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("sepolicy."))
        .collect();
    assert!(leftovers.is_empty());
    // Timing was exported for the second stage.
    assert!(std::env::var("INIT_SELINUX_TOOK").is_ok());
    std::env::remove_var("INIT_SELINUX_TOOK");
}

#[test]
#[serial]
fn precompiled_policy_skips_the_compiler() {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    provision_selinuxfs(&paths);
    fs::create_dir_all(&paths.dev_dir).unwrap();
    fs::create_dir_all(paths.precompiled_sepolicy.parent().unwrap()).unwrap();
    fs::create_dir_all(paths.plat_sha256.parent().unwrap()).unwrap();
    fs::write(&paths.precompiled_sepolicy, "vendor-policy").unwrap();
    fs::write(&paths.plat_sha256, "fp1\n").unwrap();
    fs::write(&paths.precompiled_plat_sha256, "fp1\n").unwrap();
    // No compiler installed: the precompiled branch must not need it.

    assert_eq!(
        select_policy_strategy(&paths),
        PolicyStrategy::Precompiled(paths.precompiled_sepolicy.clone())
    );
    let env = EnvVec::new();
    let mut kernel = SelinuxFs::new(&paths.selinux_mnt);
    initialize_kernel_policy(&paths, &env, &mut kernel).unwrap();
    let loaded = fs::read(paths.selinux_mnt.join("load")).unwrap();
    assert_eq!(loaded, b"vendor-policy");
    std::env::remove_var("INIT_SELINUX_TOOK");
}

#[test]
#[serial]
fn monolithic_policy_is_the_last_resort() {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    provision_selinuxfs(&paths);
    fs::create_dir_all(&paths.dev_dir).unwrap();
    fs::write(&paths.monolithic_sepolicy, "mono-policy").unwrap();

    assert_eq!(select_policy_strategy(&paths), PolicyStrategy::Monolithic);
    let env = EnvVec::new();
    let mut kernel = SelinuxFs::new(&paths.selinux_mnt);
    initialize_kernel_policy(&paths, &env, &mut kernel).unwrap();
    let loaded = fs::read(paths.selinux_mnt.join("load")).unwrap();
    assert_eq!(loaded, b"mono-policy");
    std::env::remove_var("INIT_SELINUX_TOOK");
}

#[test]
#[serial]
fn failed_compiler_fails_the_load() {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    provision_selinuxfs(&paths);
    fs::create_dir_all(&paths.dev_dir).unwrap();
    fs::create_dir_all(paths.plat_sepolicy_cil.parent().unwrap()).unwrap();
    fs::write(&paths.plat_sepolicy_cil, "(cil)").unwrap();
    fs::create_dir_all(paths.policy_compiler.parent().unwrap()).unwrap();
    fs::write(&paths.policy_compiler, "#!/bin/sh\necho 'syntax error' >&2\nexit 1\n").unwrap();
    let mut perm = fs::metadata(&paths.policy_compiler).unwrap().permissions();
    perm.set_mode(0o755);
    fs::set_permissions(&paths.policy_compiler, perm).unwrap();

    let env = EnvVec::new();
    let mut kernel = SelinuxFs::new(&paths.selinux_mnt);
    assert!(initialize_kernel_policy(&paths, &env, &mut kernel).is_err());
    assert!(!paths.selinux_mnt.join("load").exists());
}

#[test]
fn enforce_state_is_reconciled() {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    provision_selinuxfs(&paths);
    // Kernel booted permissive, nothing requested permissive: the loader
    // must flip it to enforcing.
    fs::write(paths.selinux_mnt.join("enforce"), "0").unwrap();
    let mut kernel = SelinuxFs::new(&paths.selinux_mnt);
    assert!(!kernel.get_enforce().unwrap());
    kernel.set_enforce(true).unwrap();
    assert!(kernel.get_enforce().unwrap());
}
