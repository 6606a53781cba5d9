// CLASSIFICATION: COMMUNITY
// Filename: service.rs v0.7
// Author: Lukas Bower
// Date Modified: 2026-04-11

//! Supervised child processes.
//!
//! A service is a named argv launched with the init environment and watched
//! for exit. Exited services that are neither oneshot nor stopped on purpose
//! enter the Restarting state and are relit by the supervisor once their
//! back-off has elapsed. Critical services that crash-loop force a reboot.

use std::ffi::CString;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{execve, fork, ForkResult, Pid};

use crate::env::EnvVec;

/// Minimum gap between a service start and its automatic restart.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Window and count after which a critical service is declared crash-looping.
const CRITICAL_CRASH_WINDOW: Duration = Duration::from_secs(4 * 60);
const CRITICAL_CRASH_MAX: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Disabled,
    Stopped,
    Running,
    Restarting,
    Stopping,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Disabled => "disabled",
            ServiceState::Stopped => "stopped",
            ServiceState::Running => "running",
            ServiceState::Restarting => "restarting",
            ServiceState::Stopping => "stopping",
        }
    }
}

/// What the reaper should do after a service exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Deliberate stop or finished oneshot; nothing to do.
    None,
    /// Schedule a back-off restart.
    Restart,
    /// Critical service crash-looped; the caller must panic.
    FatalCrashLoop,
}

pub struct Service {
    pub name: String,
    pub args: Vec<String>,
    pub state: ServiceState,
    pub pid: Option<Pid>,
    pub oneshot: bool,
    pub critical: bool,
    /// Blocks command execution until the child is reaped.
    pub exec: bool,
    disabled: bool,
    restart_on_exit: bool,
    time_started: Option<Instant>,
    time_crashed: Option<Instant>,
    crash_count: u32,
}

impl Service {
    pub fn new(name: &str, args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            args,
            state: ServiceState::Stopped,
            pid: None,
            oneshot: false,
            critical: false,
            exec: false,
            disabled: false,
            restart_on_exit: false,
            time_started: None,
            time_crashed: None,
            crash_count: 0,
        }
    }

    /// Fork and exec the service with the init environment.
    pub fn start(&mut self, env: &EnvVec) -> Result<()> {
        self.disabled = false;
        self.restart_on_exit = false;
        if self.state == ServiceState::Running {
            return Ok(());
        }
        let exe = self
            .args
            .first()
            .context("service has an empty argv")?
            .clone();
        if !Path::new(&exe).exists() {
            self.disabled = true;
            self.state = ServiceState::Disabled;
            bail!("cannot find '{}', disabling '{}'", exe, self.name);
        }

        let cargs: Vec<CString> = self
            .args
            .iter()
            .filter_map(|a| CString::new(a.as_str()).ok())
            .collect();
        let cenv = env.as_cstrings();
        match unsafe { fork() }.with_context(|| format!("fork failed for '{}'", self.name))? {
            ForkResult::Child => {
                let _ = execve(&cargs[0], &cargs, &cenv);
                // Only reached when exec failed; nothing useful left to do.
                std::process::exit(127);
            }
            ForkResult::Parent { child } => {
                log::info!("starting service '{}' pid {}", self.name, child);
                self.pid = Some(child);
                self.time_started = Some(Instant::now());
                self.state = ServiceState::Running;
                Ok(())
            }
        }
    }

    fn kill_with(&mut self, sig: Signal) {
        if let Some(pid) = self.pid {
            if let Err(e) = kill(pid, sig) {
                log::warn!("kill({}, {:?}) failed: {}", pid, sig, e);
            }
            self.state = ServiceState::Stopping;
        }
    }

    /// Stop and disable; the process, if any, is killed.
    pub fn stop(&mut self) {
        self.disabled = true;
        self.restart_on_exit = false;
        if self.pid.is_some() {
            self.kill_with(Signal::SIGKILL);
        } else {
            self.state = ServiceState::Stopped;
        }
    }

    /// Graceful variant of [`stop`](Self::stop).
    pub fn terminate(&mut self) {
        self.disabled = true;
        self.restart_on_exit = false;
        if self.pid.is_some() {
            self.kill_with(Signal::SIGTERM);
        } else {
            self.state = ServiceState::Stopped;
        }
    }

    /// Stop then start once the exit is reaped; a stopped service starts now.
    pub fn restart(&mut self, env: &EnvVec) {
        if self.state == ServiceState::Running {
            self.restart_on_exit = true;
            self.kill_with(Signal::SIGKILL);
        } else if self.state != ServiceState::Restarting {
            if let Err(e) = self.start(env) {
                log::error!("{}", e);
            }
        }
        // Already restarting: nothing to do.
    }

    /// Record a reaped exit and decide what happens next.
    pub fn handle_exit(&mut self) -> ExitDisposition {
        self.pid = None;
        let restart_requested = self.restart_on_exit;
        self.restart_on_exit = false;

        if self.oneshot && !restart_requested {
            self.state = if self.disabled {
                ServiceState::Disabled
            } else {
                ServiceState::Stopped
            };
            return ExitDisposition::None;
        }
        if self.disabled {
            self.state = ServiceState::Stopped;
            return ExitDisposition::None;
        }
        if self.critical && !restart_requested {
            let now = Instant::now();
            match self.time_crashed {
                Some(first) if now.duration_since(first) < CRITICAL_CRASH_WINDOW => {
                    self.crash_count += 1;
                    if self.crash_count > CRITICAL_CRASH_MAX {
                        log::error!(
                            "critical service '{}' crashed {} times in {:?}",
                            self.name,
                            self.crash_count,
                            CRITICAL_CRASH_WINDOW
                        );
                        return ExitDisposition::FatalCrashLoop;
                    }
                }
                _ => {
                    self.time_crashed = Some(now);
                    self.crash_count = 1;
                }
            }
        }
        self.state = ServiceState::Restarting;
        ExitDisposition::Restart
    }

    /// Relight if the back-off has elapsed, otherwise fold the next start
    /// time into the supervisor's running minimum deadline.
    pub fn restart_if_needed(&mut self, env: &EnvVec, deadline: &mut Option<Instant>) {
        let next_start = match self.time_started {
            Some(started) => started + RESTART_BACKOFF,
            None => Instant::now(),
        };
        if Instant::now() >= next_start {
            if let Err(e) = self.start(env) {
                log::error!("{}", e);
            }
            return;
        }
        match deadline {
            Some(d) if *d <= next_start => {}
            _ => *deadline = Some(next_start),
        }
    }
}

/// Name-indexed collection of services, populated by the boot-script layer.
#[derive(Default)]
pub struct ServiceManager {
    services: Vec<Service>,
}

impl ServiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service: Service) {
        if self.find_by_name(&service.name).is_some() {
            log::warn!("duplicate service '{}' ignored", service.name);
            return;
        }
        self.services.push(service);
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name == name)
    }

    pub fn find_by_pid_mut(&mut self, pid: Pid) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.pid == Some(pid))
    }

    pub fn restarting_names(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|s| s.state == ServiceState::Restarting)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Run the restart pass over every service in the Restarting state.
    pub fn restart_pass(&mut self, env: &EnvVec, deadline: &mut Option<Instant>) {
        for svc in &mut self.services {
            if svc.state == ServiceState::Restarting {
                svc.restart_if_needed(env, deadline);
            }
        }
    }
}
