// CLASSIFICATION: COMMUNITY
// Filename: boot_sequence.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-05-30

//! Second-stage behavior over a scratch system tree: script loading, the
//! queued boot sequence, and service control messages.

use std::fs;

use serial_test::serial;
use tempfile::tempdir;

use emberinit::rcscript::RcParser;
use emberinit::service::ServiceState;
use emberinit::stage::queue_boot_sequence;
use emberinit::world::{SysPaths, World};

fn scratch_world() -> (tempfile::TempDir, World) {
    let dir = tempdir().unwrap();
    let paths = SysPaths::rooted(dir.path());
    fs::create_dir_all(&paths.dev_dir).unwrap();
    fs::write(&paths.coldboot_done, "").unwrap();
    for p in [
        &paths.mmap_rnd_bits,
        &paths.mmap_rnd_compat_bits,
        &paths.kptr_restrict,
    ] {
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, "0\n").unwrap();
    }
    let mut w = World::new(paths);
    w.props.init();
    (dir, w)
}

fn drain(w: &mut World) {
    let mut guard = 0;
    while w.actions.has_more_commands() {
        w.execute_one_command();
        guard += 1;
        assert!(guard < 10_000);
    }
}

#[test]
#[serial]
fn boot_scripts_feed_the_event_sequence() {
    let (_dir, mut w) = scratch_world();
    let rc = w.paths.init_rc.clone();
    fs::write(
        &rc,
        "on early-init\n\
         \x20   setprop sys.boot_stage early\n\
         on init\n\
         \x20   setprop sys.boot_stage init\n\
         on late-init\n\
         \x20   setprop sys.boot_stage late\n\
         service idler /bin/sleep 60\n",
    )
    .unwrap();
    let mut parser = RcParser::new();
    parser.parse_config(&mut w, &rc);

    queue_boot_sequence(&mut w);
    drain(&mut w);

    // late-init ran last because the bootmode was not charger.
    assert_eq!(w.props.get("sys.boot_stage"), Some("late"));
    assert!(w.props.get("ro.boottime.init.cold_boot_wait").is_some());
    assert!(w.actions.property_triggers_enabled());
    assert!(w.services.find_by_name("idler").is_some());
}

#[test]
#[serial]
fn control_properties_drive_services() {
    let (_dir, mut w) = scratch_world();
    let rc = w.paths.init_rc.clone();
    fs::write(&rc, "service truthd /bin/true\n").unwrap();
    RcParser::new().parse_config(&mut w, &rc);

    // ctl.start on a known service launches it and publishes its state.
    w.set_property("ctl.start", "truthd").unwrap();
    assert_eq!(w.props.get("init.svc.truthd"), Some("running"));
    let pid = w
        .services
        .find_by_name("truthd")
        .unwrap()
        .pid
        .expect("service should have a pid");
    // Collect the child so the test binary does not leak zombies.
    let _ = nix::sys::wait::waitpid(pid, None);

    // ctl.* keys are routed, never stored.
    assert!(w.props.get("ctl.start").is_none());

    // Unknown names are logged and dropped.
    w.set_property("ctl.start", "no-such-service").unwrap();
    assert!(w.props.get("init.svc.no-such-service").is_none());

    // ctl.stop disables the service.
    w.set_property("ctl.stop", "truthd").unwrap();
    let svc = w.services.find_by_name("truthd").unwrap();
    assert!(matches!(
        svc.state,
        ServiceState::Stopping | ServiceState::Stopped
    ));
}

#[test]
#[serial]
fn exec_blocks_commands_until_the_child_is_reaped() {
    let (_dir, mut w) = scratch_world();
    let rc = emberinit::rcscript::dispatch_command(
        &mut w,
        &["exec".to_string(), "/bin/true".to_string()],
    );
    assert_eq!(rc, 0);
    assert!(w.is_waiting());

    // The supervisor would stay in this state until SIGCHLD; reap inline.
    let mut tries = 0;
    while w.is_waiting() {
        emberinit::signals::reap_children(&mut w);
        std::thread::sleep(std::time::Duration::from_millis(10));
        tries += 1;
        assert!(tries < 500, "exec child never reaped");
    }
    let svc = w.services.find_by_name("exec1-true").unwrap();
    assert_eq!(svc.state, ServiceState::Stopped);
}

#[test]
#[serial]
fn explicit_init_rc_property_is_exclusive() {
    let (_dir, mut w) = scratch_world();
    // Both the default script and an override exist; only the override may
    // be loaded.
    fs::write(&w.paths.init_rc, "service default_svc /bin/true\n").unwrap();
    let alt = w.paths.dev_dir.join("alt.rc");
    fs::write(&alt, "service alt_svc /bin/true\n").unwrap();
    w.set_property("ro.boot.init_rc", alt.to_str().unwrap())
        .unwrap();

    emberinit::stage::load_boot_scripts(&mut w);

    assert!(w.services.find_by_name("alt_svc").is_some());
    assert!(w.services.find_by_name("default_svc").is_none());
}
