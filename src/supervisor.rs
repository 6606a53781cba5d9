// CLASSIFICATION: COMMUNITY
// Filename: supervisor.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-05-10

//! The single-threaded supervisor loop.
//!
//! One epoll instance owns every descriptor collaborators register: the
//! SIGCHLD self-pipe, the property-service socket, the keychord device.
//! Each registration binds an owned closure to its descriptor; the loop
//! alternates between draining one scheduled command (when no wait guard is
//! active) and dispatching one ready callback. The epoll wait is the only
//! suspension point in the process.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::world::World;

pub type FdCallback = Box<dyn FnMut(&mut World)>;

/// Epoll wrapper owning the callbacks keyed by descriptor.
pub struct Poller {
    epoll_fd: RawFd,
    handlers: HashMap<RawFd, FdCallback>,
}

impl Poller {
    pub fn new() -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(std::io::Error::last_os_error()).context("epoll_create1 failed");
        }
        Ok(Self {
            epoll_fd,
            handlers: HashMap::new(),
        })
    }

    /// Watch `fd` for readability, invoking `callback` when it fires. The
    /// closure is owned by the poller for the life of the registration.
    pub fn register(&mut self, fd: RawFd, callback: FdCallback) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("epoll_ctl add fd {} failed", fd));
        }
        self.handlers.insert(fd, callback);
        Ok(())
    }

    /// Wait for at most one event and dispatch its callback. A negative
    /// timeout sleeps until something happens.
    pub fn wait_and_dispatch(&mut self, timeout_ms: i32, world: &mut World) {
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        let nr = loop {
            let nr = unsafe { libc::epoll_wait(self.epoll_fd, &mut ev, 1, timeout_ms) };
            if nr < 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                log::error!("epoll_wait failed: {}", err);
                return;
            }
            break nr;
        };
        if nr == 1 {
            let fd = ev.u64 as RawFd;
            if let Some(callback) = self.handlers.get_mut(&fd) {
                callback(world);
            } else {
                log::warn!("event on unregistered fd {}", fd);
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

/// Compute how long the next epoll wait may sleep: forever by default, until
/// the earliest restart deadline if one is pending, not at all while
/// commands are queued.
pub fn epoll_timeout_ms(world: &World) -> i32 {
    let mut timeout: i64 = -1;
    if let Some(deadline) = world.restart_deadline {
        timeout = deadline
            .saturating_duration_since(Instant::now())
            .as_millis() as i64;
    }
    if world.actions.has_more_commands() {
        timeout = 0;
    }
    timeout.clamp(-1, i32::MAX as i64) as i32
}

/// One supervisor iteration: drain a command unless a wait guard is active,
/// run the restart pass, then poll once.
pub fn run_once(world: &mut World, poller: &mut Poller) {
    if !world.is_waiting() {
        world.execute_one_command();
        world.restart_processes();
    }
    let timeout = epoll_timeout_ms(world);
    poller.wait_and_dispatch(timeout, world);
}

/// The supervisor proper. Never returns.
pub fn run(world: &mut World, poller: &mut Poller) -> ! {
    loop {
        run_once(world, poller);
    }
}

/// Act on a `ctl.*` control message: the value names the target service.
/// Unknown services and verbs are logged and dropped.
pub fn handle_control_message(world: &mut World, msg: &str, name: &str) {
    if world.services.find_by_name(name).is_none() {
        log::error!("no such service '{}'", name);
        return;
    }
    match msg {
        "start" => {
            let started = {
                let svc = world.services.find_by_name_mut(name).unwrap();
                svc.start(&world.env)
            };
            match started {
                Ok(()) => world.publish_service_state(name, "running"),
                Err(e) => log::error!("{}", e),
            }
        }
        "stop" => {
            if let Some(svc) = world.services.find_by_name_mut(name) {
                svc.stop();
                let state = svc.state.as_str();
                world.publish_service_state(name, state);
            }
        }
        "restart" => {
            let svc = world.services.find_by_name_mut(name).unwrap();
            svc.restart(&world.env);
            let state = svc.state.as_str();
            world.publish_service_state(name, state);
        }
        other => log::error!("unknown control msg '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SysPaths;
    use std::path::Path;

    fn world() -> World {
        let mut w = World::new(SysPaths::rooted(Path::new("/nonexistent-root")));
        w.props.init();
        w
    }

    #[test]
    fn timeout_is_zero_while_commands_pend() {
        let mut w = world();
        w.actions.queue_builtin_action(|_| 0, "noop");
        assert_eq!(epoll_timeout_ms(&w), 0);
    }

    #[test]
    fn timeout_sleeps_forever_when_idle() {
        let w = world();
        assert_eq!(epoll_timeout_ms(&w), -1);
    }

    #[test]
    fn timeout_tracks_restart_deadline() {
        let mut w = world();
        w.restart_deadline = Some(Instant::now() + std::time::Duration::from_secs(3));
        let t = epoll_timeout_ms(&w);
        assert!(t > 0 && t <= 3000);
        // An already-passed deadline clamps to an immediate wake-up.
        w.restart_deadline = Some(Instant::now() - std::time::Duration::from_secs(1));
        assert_eq!(epoll_timeout_ms(&w), 0);
    }

    #[test]
    fn control_message_for_unknown_service_is_dropped() {
        let mut w = world();
        handle_control_message(&mut w, "start", "ghost");
        assert!(w.props.get("init.svc.ghost").is_none());
    }

    #[test]
    fn poller_dispatches_ready_pipe() {
        let mut w = world();
        let mut poller = Poller::new().unwrap();
        let mut fds = [0i32; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        let (r, wfd) = (fds[0], fds[1]);
        poller
            .register(
                r,
                Box::new(move |world: &mut World| {
                    let mut buf = [0u8; 16];
                    unsafe { libc::read(r, buf.as_mut_ptr() as *mut _, buf.len()) };
                    let _ = world.set_property("test.poller", "fired");
                }),
            )
            .unwrap();
        assert_eq!(
            unsafe { libc::write(wfd, b"x".as_ptr() as *const _, 1) },
            1
        );
        poller.wait_and_dispatch(1000, &mut w);
        assert_eq!(w.props.get("test.poller"), Some("fired"));
        unsafe {
            libc::close(r);
            libc::close(wfd);
        }
    }
}
