// CLASSIFICATION: COMMUNITY
// Filename: signals.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-05-14

//! Signal plumbing: SIGCHLD funneled through a self-pipe, and the uniform
//! crash handlers that turn fatal signals into a bootloader reboot.
//!
//! The SIGCHLD handler only writes one byte; the poller callback drains the
//! pipe and then reaps every exited child in a loop, so children that exit
//! while we are reaping are never missed.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::service::ExitDisposition;
use crate::supervisor::Poller;
use crate::world::World;

static SIGCHLD_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

extern "C" fn sigchld_handler(_: libc::c_int) {
    let fd = SIGCHLD_PIPE_WR.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, b"1".as_ptr() as *const libc::c_void, 1);
        }
    }
}

extern "C" fn fatal_signal_handler(_: libc::c_int) {
    // Not much is safe to do from here; go straight to the bootloader.
    crate::panic::reboot_to_bootloader();
}

fn drain_pipe(fd: RawFd) {
    let mut buf = [0u8; 32];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            if n < 0 && Errno::last() == Errno::EINTR {
                continue;
            }
            break;
        }
        if (n as usize) < buf.len() {
            break;
        }
    }
}

/// Reap every exited child and update its service, if it belongs to one.
pub fn reap_children(world: &mut World) {
    loop {
        let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => return,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                log::error!("waitpid failed: {}", e);
                return;
            }
            Ok(status) => status,
        };
        let pid = match status {
            WaitStatus::Exited(pid, code) => {
                log::info!("pid {} exited with status {}", pid, code);
                pid
            }
            WaitStatus::Signaled(pid, sig, _) => {
                log::info!("pid {} killed by signal {:?}", pid, sig);
                pid
            }
            _ => continue,
        };
        reap_one(world, pid);
    }
}

fn reap_one(world: &mut World, pid: Pid) {
    let Some(svc) = world.services.find_by_pid_mut(pid) else {
        log::debug!("untracked pid {} reaped", pid);
        return;
    };
    let name = svc.name.clone();
    let was_exec = svc.exec;
    let disposition = svc.handle_exit();
    let state = svc.state.as_str();

    if was_exec {
        world.stop_waiting_for_exec();
    }
    world.publish_service_state(&name, state);
    if disposition == ExitDisposition::FatalCrashLoop {
        crate::panic::reboot_panic(&format!("critical service '{}' is crash-looping", name));
    }
}

/// Install the SIGCHLD handler and register the read half of its self-pipe
/// with the poller.
pub fn start(poller: &mut Poller) -> Result<()> {
    let mut fds = [0i32; 2];
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("signal pipe creation failed");
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);
    SIGCHLD_PIPE_WR.store(write_fd, Ordering::Relaxed);

    let action = SigAction::new(
        SigHandler::Handler(sigchld_handler),
        SaFlags::SA_NOCLDSTOP | SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGCHLD, &action) }.context("sigaction(SIGCHLD) failed")?;

    poller.register(
        read_fd,
        Box::new(move |world: &mut World| {
            drain_pipe(read_fd);
            reap_children(world);
        }),
    )?;
    Ok(())
}

/// Fatal signals reboot to the bootloader instead of panicking the kernel,
/// so a bad build cannot boot-loop a device that a developer wants back.
pub fn install_reboot_signal_handlers() {
    let action = SigAction::new(
        SigHandler::Handler(fatal_signal_handler),
        SaFlags::SA_RESTART,
        SigSet::all(),
    );
    for sig in [
        Signal::SIGABRT,
        Signal::SIGBUS,
        Signal::SIGFPE,
        Signal::SIGILL,
        Signal::SIGSEGV,
        Signal::SIGSTKFLT,
        Signal::SIGSYS,
        Signal::SIGTRAP,
    ] {
        if let Err(e) = unsafe { sigaction(sig, &action) } {
            log::warn!("cannot install handler for {:?}: {}", sig, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Service, ServiceState};
    use crate::world::SysPaths;
    use std::path::Path;

    #[test]
    fn reaps_spawned_service_into_restarting() {
        let mut world = World::new(SysPaths::rooted(Path::new("/nonexistent-root")));
        world.props.init();
        let mut svc = Service::new("truth", vec!["/bin/true".into()]);
        svc.start(&world.env).unwrap();
        let pid = svc.pid.unwrap();
        world.services.add(svc);

        // Synchronously collect the child the way the pipe callback would.
        nix::sys::wait::waitpid(pid, None).unwrap();
        reap_one(&mut world, pid);

        let svc = world.services.find_by_name("truth").unwrap();
        assert_eq!(svc.state, ServiceState::Restarting);
        assert_eq!(world.props.get("init.svc.truth"), Some("restarting"));
    }
}
