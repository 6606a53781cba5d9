// CLASSIFICATION: COMMUNITY
// Filename: world.rs v0.8
// Author: Lukas Bower
// Date Modified: 2026-04-20

//! Process-wide boot state, passed explicitly into every entry point.
//!
//! The source of truth for properties, the child environment, the action
//! queues, the service table and the supervisor wait guards. There is exactly
//! one `World` per process, owned by `main`; singleness comes from the
//! construction site, not from hidden globals. All kernel-facing paths are
//! collected in [`SysPaths`] so tests can run the engines against a scratch
//! directory.

use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::action::ActionManager;
use crate::env::{EnvVec, PATH_DEFAULT};
use crate::property::{PropertyAudit, PropertyError, PropertyStore};
use crate::service::ServiceManager;
use crate::timer::BootTimer;

/// Every path the boot stages touch, defaulting to the live locations.
#[derive(Debug, Clone)]
pub struct SysPaths {
    pub proc_cmdline: PathBuf,
    pub android_dt_dir: PathBuf,
    pub recovery_marker: PathBuf,
    pub coldboot_done: PathBuf,
    pub booting_marker: PathBuf,
    pub dev_dir: PathBuf,
    pub sys_dir: PathBuf,
    pub proc_dir: PathBuf,
    pub block_dev_dir: PathBuf,
    pub dm_control_syspath: PathBuf,
    pub selinux_mnt: PathBuf,
    pub file_contexts: PathBuf,
    pub precompiled_sepolicy: PathBuf,
    pub plat_sepolicy_cil: PathBuf,
    pub plat_sha256: PathBuf,
    pub precompiled_plat_sha256: PathBuf,
    pub mapping_sepolicy_cil: PathBuf,
    pub nonplat_sepolicy_cil: PathBuf,
    pub monolithic_sepolicy: PathBuf,
    pub policy_compiler: PathBuf,
    pub mmap_rnd_bits: PathBuf,
    pub mmap_rnd_compat_bits: PathBuf,
    pub kptr_restrict: PathBuf,
    pub hw_random: PathBuf,
    pub urandom: PathBuf,
    pub udc_class_dir: PathBuf,
    pub default_prop: PathBuf,
    pub init_rc: PathBuf,
    pub init_script_dirs: Vec<PathBuf>,
    pub watchdog_dev: PathBuf,
    pub own_binary: PathBuf,
}

impl Default for SysPaths {
    fn default() -> Self {
        Self::rooted(Path::new("/"))
    }
}

impl SysPaths {
    /// Paths relative to `root`; `rooted("/")` is the live system layout.
    pub fn rooted(root: &Path) -> Self {
        let p = |s: &str| root.join(s);
        Self {
            proc_cmdline: p("proc/cmdline"),
            android_dt_dir: p("proc/device-tree/firmware/android"),
            recovery_marker: p("sbin/recovery"),
            coldboot_done: p("dev/.coldboot_done"),
            booting_marker: p("dev/.booting"),
            dev_dir: p("dev"),
            sys_dir: p("sys"),
            proc_dir: p("proc"),
            block_dev_dir: p("dev/block"),
            dm_control_syspath: p("sys/devices/virtual/misc/device-mapper"),
            selinux_mnt: p("sys/fs/selinux"),
            file_contexts: p("plat_file_contexts"),
            precompiled_sepolicy: p("vendor/etc/selinux/precompiled_sepolicy"),
            plat_sepolicy_cil: p("system/etc/selinux/plat_sepolicy.cil"),
            plat_sha256: p("system/etc/selinux/plat_sepolicy.cil.sha256"),
            precompiled_plat_sha256: p("vendor/etc/selinux/precompiled_sepolicy.plat.sha256"),
            mapping_sepolicy_cil: p("vendor/etc/selinux/mapping_sepolicy.cil"),
            nonplat_sepolicy_cil: p("vendor/etc/selinux/nonplat_sepolicy.cil"),
            monolithic_sepolicy: p("sepolicy"),
            policy_compiler: p("system/bin/secilc"),
            mmap_rnd_bits: p("proc/sys/vm/mmap_rnd_bits"),
            mmap_rnd_compat_bits: p("proc/sys/vm/mmap_rnd_compat_bits"),
            kptr_restrict: p("proc/sys/kernel/kptr_restrict"),
            hw_random: p("dev/hw_random"),
            urandom: p("dev/urandom"),
            udc_class_dir: p("sys/class/udc"),
            default_prop: p("default.prop"),
            init_rc: p("init.rc"),
            init_script_dirs: vec![
                p("system/etc/init"),
                p("vendor/etc/init"),
                p("odm/etc/init"),
            ],
            watchdog_dev: p("dev/watchdog"),
            own_binary: p("init"),
        }
    }
}

/// A pending wait for a property to reach a value.
pub struct PropWait {
    pub timer: BootTimer,
    pub name: String,
    pub value: String,
}

pub struct World {
    pub paths: SysPaths,
    pub props: PropertyStore,
    pub env: EnvVec,
    pub actions: ActionManager,
    pub services: ServiceManager,
    pub waiting_for_exec: Option<BootTimer>,
    pub waiting_for_prop: Option<PropWait>,
    /// Earliest deadline among services backing off a restart.
    pub restart_deadline: Option<Instant>,
    pub emulator: bool,
    pub default_console: String,
    /// Sequence number for transient exec services.
    pub exec_seq: u32,
}

impl World {
    pub fn new(paths: SysPaths) -> Self {
        let mut env = EnvVec::new();
        let _ = env.add("PATH", PATH_DEFAULT);
        Self {
            paths,
            props: PropertyStore::new(),
            env,
            actions: ActionManager::new(),
            services: ServiceManager::new(),
            waiting_for_exec: None,
            waiting_for_prop: None,
            restart_deadline: None,
            emulator: false,
            default_console: "/dev/console".to_string(),
            exec_seq: 0,
        }
    }

    /// Add `key=value` to the child environment; overflow is logged only.
    pub fn add_environment(&mut self, key: &str, value: &str) {
        if let Err(e) = self.env.add(key, value) {
            log::error!("{}", e);
        }
    }

    /// Store a property on init's own behalf, broadcasting the change.
    /// `ctl.*` keys are control messages and are routed, not stored.
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<(), PropertyError> {
        self.set_property_for(name, value, &PropertyAudit::own())
    }

    pub fn set_property_for(
        &mut self,
        name: &str,
        value: &str,
        who: &PropertyAudit,
    ) -> Result<(), PropertyError> {
        if let Some(verb) = name.strip_prefix("ctl.") {
            let verb = verb.to_string();
            crate::supervisor::handle_control_message(self, &verb, value);
            return Ok(());
        }
        self.props.set_with_audit(name, value, who)?;
        let name = name.to_string();
        let value = value.to_string();
        self.property_changed(&name, &value);
        Ok(())
    }

    /// Synchronous broadcast of a property mutation: queue matching property
    /// triggers (once the latch is set) and clear a satisfied wait.
    pub fn property_changed(&mut self, name: &str, value: &str) {
        if self.actions.property_triggers_enabled() {
            self.actions.queue_property_trigger(name, value);
        }
        if let Some(wait) = &self.waiting_for_prop {
            if wait.name == name && wait.value == value {
                log::info!("wait for property '{}={}' took {}", name, value, wait.timer);
                self.waiting_for_prop = None;
            }
        }
    }

    /// Install a wait for `name` to become `value`. No wait is installed when
    /// the live value already matches. Returns false if a wait is active.
    pub fn start_waiting_for_property(&mut self, name: &str, value: &str) -> bool {
        if self.waiting_for_prop.is_some() {
            return false;
        }
        if self.props.get_or_empty(name) == value {
            log::info!("wait for property '{}={}': already set", name, value);
            return true;
        }
        self.waiting_for_prop = Some(PropWait {
            timer: BootTimer::start(),
            name: name.to_string(),
            value: value.to_string(),
        });
        true
    }

    pub fn start_waiting_for_exec(&mut self) -> bool {
        if self.waiting_for_exec.is_some() {
            return false;
        }
        self.waiting_for_exec = Some(BootTimer::start());
        true
    }

    pub fn stop_waiting_for_exec(&mut self) {
        if let Some(timer) = self.waiting_for_exec.take() {
            log::info!("wait for exec took {}", timer);
        }
    }

    /// True while either wait guard blocks command execution.
    pub fn is_waiting(&self) -> bool {
        self.waiting_for_exec.is_some() || self.waiting_for_prop.is_some()
    }

    /// Drain at most one command of the head action.
    pub fn execute_one_command(&mut self) {
        let Some((action_name, cmd)) = self.actions.next_command() else {
            return;
        };
        let status = match cmd {
            crate::action::Command::Builtin(func) => func(self),
            crate::action::Command::Exec(args) => crate::rcscript::dispatch_command(self, &args),
        };
        if status != 0 {
            log::error!("command in action '{}' returned {}", action_name, status);
        }
    }

    /// Restart pass: relight every service whose back-off has elapsed and
    /// recompute the earliest-restart deadline.
    pub fn restart_processes(&mut self) {
        self.restart_deadline = None;
        self.services
            .restart_pass(&self.env, &mut self.restart_deadline);
        for name in self.services.restarting_names() {
            self.publish_service_state(&name, "restarting");
        }
    }

    /// Publish `init.svc.<name>` so observers can follow service lifecycles.
    pub fn publish_service_state(&mut self, name: &str, state: &str) {
        let key = format!("init.svc.{}", name);
        if let Err(e) = self
            .props
            .set_with_audit(&key, state, &PropertyAudit::own())
        {
            log::debug!("cannot publish {}: {}", key, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> World {
        let mut w = World::new(SysPaths::rooted(Path::new("/nonexistent-root")));
        w.props.init();
        w
    }

    #[test]
    fn wait_not_installed_when_value_matches() {
        let mut w = world();
        w.set_property("sys.state", "ready").unwrap();
        assert!(w.start_waiting_for_property("sys.state", "ready"));
        assert!(w.waiting_for_prop.is_none());
    }

    #[test]
    fn wait_cleared_exactly_by_matching_set() {
        let mut w = world();
        assert!(w.start_waiting_for_property("sys.state", "ready"));
        assert!(w.waiting_for_prop.is_some());
        w.set_property("sys.state", "almost").unwrap();
        assert!(w.waiting_for_prop.is_some());
        w.set_property("sys.state", "ready").unwrap();
        assert!(w.waiting_for_prop.is_none());
    }

    #[test]
    fn second_wait_is_refused() {
        let mut w = world();
        assert!(w.start_waiting_for_property("a.b", "1"));
        assert!(!w.start_waiting_for_property("c.d", "2"));
    }

    #[test]
    fn path_env_is_seeded() {
        let w = world();
        assert_eq!(w.env.get("PATH"), Some(PATH_DEFAULT));
    }
}
