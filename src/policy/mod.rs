// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.7
// Author: Lukas Bower
// Date Modified: 2026-05-02

//! Mandatory-access-control policy loading.
//!
//! Three sources, tried in order: a precompiled policy shipped on the vendor
//! partition (taken only when its platform fingerprint matches the system
//! image), a split policy compiled on the fly from CIL sources, and the
//! monolithic binary policy. After loading, the requested enforce mode is
//! applied; failure to apply it is fatal to the caller.

pub mod restorecon;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};

use crate::env::EnvVec;
use crate::timer::BootTimer;
use crate::util::{read_first_line, write_file};
use crate::world::SysPaths;

/// Cap on captured compiler stderr; anything beyond it is dropped with a
/// truncation notice.
const CHILD_STDERR_CAP: usize = 1024 * 1024;

/// Kernel-side policy operations, backed by the selinuxfs mount in the live
/// implementation.
pub trait PolicyKernel {
    /// Highest policy language version the kernel accepts.
    fn policy_version(&self) -> Result<u32>;
    /// Load a compiled binary policy into the kernel.
    fn load_policy_file(&mut self, file: &Path) -> Result<()>;
    fn get_enforce(&self) -> Result<bool>;
    fn set_enforce(&mut self, enforce: bool) -> Result<()>;
}

/// The real kernel interface under `/sys/fs/selinux`.
pub struct SelinuxFs {
    mnt: PathBuf,
}

impl SelinuxFs {
    pub fn new(mnt: &Path) -> Self {
        Self {
            mnt: mnt.to_path_buf(),
        }
    }
}

impl PolicyKernel for SelinuxFs {
    fn policy_version(&self) -> Result<u32> {
        let p = self.mnt.join("policyvers");
        let raw = fs::read_to_string(&p)
            .with_context(|| format!("cannot read {}", p.display()))?;
        raw.trim()
            .parse()
            .with_context(|| format!("bad policy version '{}'", raw.trim()))
    }

    fn load_policy_file(&mut self, file: &Path) -> Result<()> {
        let policy = fs::read(file)
            .with_context(|| format!("cannot read policy {}", file.display()))?;
        let load = self.mnt.join("load");
        fs::write(&load, policy)
            .with_context(|| format!("cannot load policy via {}", load.display()))?;
        Ok(())
    }

    fn get_enforce(&self) -> Result<bool> {
        let p = self.mnt.join("enforce");
        let raw = fs::read_to_string(&p)
            .with_context(|| format!("cannot read {}", p.display()))?;
        Ok(raw.trim() == "1")
    }

    fn set_enforce(&mut self, enforce: bool) -> Result<()> {
        let p = self.mnt.join("enforce");
        fs::write(&p, if enforce { "1" } else { "0" })
            .with_context(|| format!("cannot write {}", p.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyStrategy {
    /// Load the vendor-shipped precompiled policy.
    Precompiled(PathBuf),
    /// Compile the split CIL sources with the external compiler.
    CompileSplit,
    /// Load the monolithic binary policy.
    Monolithic,
}

/// The precompiled policy is only usable when its recorded platform
/// fingerprint matches the one on the system image, both non-empty.
fn find_precompiled_split_policy(paths: &SysPaths) -> Option<PathBuf> {
    if !paths.precompiled_sepolicy.exists() {
        return None;
    }
    let actual = read_first_line(&paths.plat_sha256)?;
    let precompiled = read_first_line(&paths.precompiled_plat_sha256)?;
    if actual.is_empty() || actual != precompiled {
        return None;
    }
    Some(paths.precompiled_sepolicy.clone())
}

/// Pick the policy source in priority order.
pub fn select_policy_strategy(paths: &SysPaths) -> PolicyStrategy {
    if let Some(file) = find_precompiled_split_policy(paths) {
        return PolicyStrategy::Precompiled(file);
    }
    if paths.plat_sepolicy_cil.exists() {
        return PolicyStrategy::CompileSplit;
    }
    PolicyStrategy::Monolithic
}

/// Run the policy compiler, surfacing its stderr line by line.
fn run_compiler(paths: &SysPaths, env: &EnvVec, version: u32, out: &Path) -> Result<()> {
    let mut cmd = Command::new(&paths.policy_compiler);
    cmd.arg(&paths.plat_sepolicy_cil)
        .arg("-M")
        .arg("true")
        .arg("-c")
        .arg(version.to_string())
        .arg(&paths.mapping_sepolicy_cil)
        .arg(&paths.nonplat_sepolicy_cil)
        .arg("-o")
        .arg(out)
        // File-contexts output is not wanted; /dev/null is not available yet.
        .arg("-f")
        .arg(paths.selinux_mnt.join("null"))
        .env_clear()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    for entry in env.as_environ() {
        if let Some((k, v)) = entry.split_once('=') {
            cmd.env(k, v);
        }
    }

    let compiler = paths.policy_compiler.display().to_string();
    let mut child = cmd
        .spawn()
        .with_context(|| format!("cannot execute {}", compiler))?;

    let mut stderr = String::new();
    if let Some(pipe) = child.stderr.as_mut() {
        let mut limited = pipe.by_ref().take(CHILD_STDERR_CAP as u64);
        let _ = limited.read_to_string(&mut stderr);
        let mut rest = [0u8; 1];
        if pipe.read(&mut rest).unwrap_or(0) > 0 {
            stderr.push_str("\n[output truncated]");
        }
    }
    for line in stderr.lines() {
        log::error!("{}: {}", compiler, line);
    }

    let status = child
        .wait()
        .with_context(|| format!("cannot wait for {}", compiler))?;
    if !status.success() {
        match status.code() {
            Some(code) => bail!("{} exited with status {}", compiler, code),
            None => bail!("{} killed by signal", compiler),
        }
    }
    Ok(())
}

fn load_split_policy(
    paths: &SysPaths,
    env: &EnvVec,
    kernel: &mut dyn PolicyKernel,
) -> Result<()> {
    if let PolicyStrategy::Precompiled(file) = select_policy_strategy(paths) {
        return kernel
            .load_policy_file(&file)
            .with_context(|| format!("failed to load policy from {}", file.display()));
    }

    log::info!("compiling split policy");
    let version = kernel
        .policy_version()
        .context("cannot determine highest policy version supported by kernel")?;

    // /dev is the only tmpfs mounted this early; compile into it and unlink
    // whatever happens.
    let compiled = tempfile::Builder::new()
        .prefix("sepolicy.")
        .tempfile_in(&paths.dev_dir)
        .context("cannot create policy scratch file")?;
    run_compiler(paths, env, version, compiled.path())?;

    log::info!("loading compiled policy");
    kernel
        .load_policy_file(compiled.path())
        .context("failed to load compiled policy")
}

fn load_monolithic_policy(paths: &SysPaths, kernel: &mut dyn PolicyKernel) -> Result<()> {
    log::debug!("loading monolithic policy");
    kernel
        .load_policy_file(&paths.monolithic_sepolicy)
        .context("failed to load monolithic policy")
}

fn load_policy(paths: &SysPaths, env: &EnvVec, kernel: &mut dyn PolicyKernel) -> Result<()> {
    if paths.plat_sepolicy_cil.exists() || find_precompiled_split_policy(paths).is_some() {
        load_split_policy(paths, env, kernel)
    } else {
        load_monolithic_policy(paths, kernel)
    }
}

/// The command line can request permissive mode; enforcing is forced unless
/// the build allows permissive boots.
fn requested_enforcing(paths: &SysPaths) -> bool {
    if !cfg!(feature = "permissive-policy") {
        return true;
    }
    let Ok(cmdline) = fs::read_to_string(&paths.proc_cmdline) else {
        return true;
    };
    !cmdline
        .split_ascii_whitespace()
        .any(|tok| tok == "androidboot.selinux=permissive")
}

/// Kernel-domain policy initialization: load, apply enforce mode, disable
/// checkreqprot. The elapsed time is handed to the second stage through the
/// environment since properties cannot be set yet.
pub fn initialize_kernel_policy(
    paths: &SysPaths,
    env: &EnvVec,
    kernel: &mut dyn PolicyKernel,
) -> Result<()> {
    let timer = BootTimer::start();

    load_policy(paths, env, kernel)?;

    let kernel_enforcing = kernel.get_enforce()?;
    let want_enforcing = requested_enforcing(paths);
    if kernel_enforcing != want_enforcing {
        kernel
            .set_enforce(want_enforcing)
            .with_context(|| format!("set_enforce({}) failed", want_enforcing))?;
    }

    let checkreqprot = paths.selinux_mnt.join("checkreqprot");
    if !write_file(&checkreqprot, "0") {
        return Err(anyhow!(
            "cannot write {}",
            checkreqprot.display()
        ));
    }

    std::env::set_var("INIT_SELINUX_TOOK", timer.elapsed_ms().to_string());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provision(paths: &SysPaths) {
        for p in [
            &paths.precompiled_sepolicy,
            &paths.plat_sepolicy_cil,
            &paths.plat_sha256,
            &paths.precompiled_plat_sha256,
        ] {
            fs::create_dir_all(p.parent().unwrap()).unwrap();
        }
    }

    #[test]
    fn precompiled_wins_when_fingerprints_match() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        provision(&paths);
        fs::write(&paths.precompiled_sepolicy, b"policy").unwrap();
        fs::write(&paths.plat_sepolicy_cil, b"(cil)").unwrap();
        fs::write(&paths.plat_sha256, "abc123\n").unwrap();
        fs::write(&paths.precompiled_plat_sha256, "abc123\n").unwrap();
        assert_eq!(
            select_policy_strategy(&paths),
            PolicyStrategy::Precompiled(paths.precompiled_sepolicy.clone())
        );
    }

    #[test]
    fn fingerprint_mismatch_falls_back_to_compile() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        provision(&paths);
        fs::write(&paths.precompiled_sepolicy, b"policy").unwrap();
        fs::write(&paths.plat_sepolicy_cil, b"(cil)").unwrap();
        fs::write(&paths.plat_sha256, "abc123\n").unwrap();
        fs::write(&paths.precompiled_plat_sha256, "zzz999\n").unwrap();
        assert_eq!(select_policy_strategy(&paths), PolicyStrategy::CompileSplit);
    }

    #[test]
    fn empty_fingerprints_fall_back_to_compile() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        provision(&paths);
        fs::write(&paths.precompiled_sepolicy, b"policy").unwrap();
        fs::write(&paths.plat_sepolicy_cil, b"(cil)").unwrap();
        fs::write(&paths.plat_sha256, "\n").unwrap();
        fs::write(&paths.precompiled_plat_sha256, "\n").unwrap();
        assert_eq!(select_policy_strategy(&paths), PolicyStrategy::CompileSplit);
    }

    #[test]
    fn no_cil_means_monolithic() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SysPaths::rooted(dir.path());
        assert_eq!(select_policy_strategy(&paths), PolicyStrategy::Monolithic);
    }

    #[test]
    fn selinuxfs_reads_version_and_enforce() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = dir.path().join("selinux");
        fs::create_dir_all(&mnt).unwrap();
        fs::write(mnt.join("policyvers"), "30\n").unwrap();
        fs::write(mnt.join("enforce"), "1").unwrap();
        let mut k = SelinuxFs::new(&mnt);
        assert_eq!(k.policy_version().unwrap(), 30);
        assert!(k.get_enforce().unwrap());
        k.set_enforce(false).unwrap();
        assert!(!k.get_enforce().unwrap());
    }
}
