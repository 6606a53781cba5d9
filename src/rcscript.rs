// CLASSIFICATION: COMMUNITY
// Filename: rcscript.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-05-21

//! Boot-script loading: the `service`/`on`/`import` sections and the command
//! vocabulary the scheduler dispatches into.
//!
//! The grammar is line-based and deliberately small: a section keyword opens
//! a block, every following line belongs to it until the next section.
//! Unknown commands and sections are logged and skipped so a bad vendor
//! script cannot stop the boot.

use std::fs;
use std::path::{Path, PathBuf};

use crate::action::{Action, Command, Trigger};
use crate::service::Service;
use crate::world::World;

/// Section keywords this parser understands.
const SECTIONS: &[&str] = &["on", "service", "import"];

/// Execute one script command. Returns a status like a builtin: non-zero is
/// logged by the scheduler but never stops the loop.
pub fn dispatch_command(world: &mut World, args: &[String]) -> i32 {
    let Some(keyword) = args.first().map(|s| s.as_str()) else {
        return -1;
    };
    match (keyword, args.len()) {
        ("setprop", 3) => match world.set_property(&args[1], &args[2]) {
            Ok(()) => 0,
            Err(e) => {
                log::error!("setprop {}: {}", args[1], e);
                -1
            }
        },
        ("wait_for_property", 3) => {
            if world.start_waiting_for_property(&args[1], &args[2]) {
                0
            } else {
                -1
            }
        }
        ("start", 2) | ("stop", 2) | ("restart", 2) => {
            crate::supervisor::handle_control_message(world, keyword, &args[1]);
            0
        }
        ("trigger", 2) => {
            world.actions.queue_event_trigger(&args[1]);
            0
        }
        ("exec", _) if args.len() >= 2 => {
            // Transient oneshot child; command execution stalls until it is
            // reaped.
            if !world.start_waiting_for_exec() {
                log::error!("exec already in flight, dropping '{}'", args[1]);
                return -1;
            }
            world.exec_seq += 1;
            let name = format!(
                "exec{}-{}",
                world.exec_seq,
                crate::util::basename(Path::new(&args[1]))
            );
            let mut svc = Service::new(&name, args[1..].to_vec());
            svc.oneshot = true;
            svc.exec = true;
            match svc.start(&world.env) {
                Ok(()) => {
                    world.services.add(svc);
                    world.publish_service_state(&name, "running");
                    0
                }
                Err(e) => {
                    log::error!("{}", e);
                    world.stop_waiting_for_exec();
                    -1
                }
            }
        }
        ("export", 3) => {
            world.add_environment(&args[1], &args[2]);
            0
        }
        ("mkdir", 2) | ("mkdir", 3) => {
            if let Err(e) = fs::create_dir_all(&args[1]) {
                log::error!("mkdir {}: {}", args[1], e);
                return -1;
            }
            0
        }
        ("write", 3) => {
            if crate::util::write_file(Path::new(&args[1]), &args[2]) {
                0
            } else {
                -1
            }
        }
        _ => {
            log::error!("unknown or malformed command '{}'", args.join(" "));
            -1
        }
    }
}

enum Block {
    None,
    Action(Action),
    Service(Service),
}

/// Line-based boot-script parser feeding actions and services into the
/// world as it reads.
#[derive(Default)]
pub struct RcParser;

impl RcParser {
    pub fn new() -> Self {
        Self
    }

    fn parse_trigger(args: &[&str]) -> Trigger {
        if let Some(rest) = args.first().and_then(|a| a.strip_prefix("property:")) {
            if let Some((name, value)) = rest.split_once('=') {
                return Trigger::Property {
                    name: name.to_string(),
                    value: value.to_string(),
                };
            }
        }
        Trigger::Event(args.join("-"))
    }

    fn finish_block(world: &mut World, block: Block) {
        match block {
            Block::None => {}
            Block::Action(action) => {
                world.actions.add_action(action);
            }
            Block::Service(service) => {
                world.services.add(service);
            }
        }
    }

    fn parse_lines(&mut self, world: &mut World, path: &Path, data: &str) {
        let mut block = Block::None;
        for raw in data.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let keyword = tokens[0];

            if SECTIONS.contains(&keyword) {
                let prev = std::mem::replace(&mut block, Block::None);
                Self::finish_block(world, prev);
                match keyword {
                    "on" if tokens.len() >= 2 => {
                        block = Block::Action(Action {
                            name: tokens[1..].join(" "),
                            trigger: Self::parse_trigger(&tokens[1..]),
                            commands: Vec::new(),
                        });
                    }
                    "service" if tokens.len() >= 3 => {
                        block = Block::Service(Service::new(
                            tokens[1],
                            tokens[2..].iter().map(|s| s.to_string()).collect(),
                        ));
                    }
                    "import" if tokens.len() == 2 => {
                        self.parse_config(world, &PathBuf::from(tokens[1]));
                    }
                    _ => log::warn!(
                        "{}: malformed section '{}'",
                        path.display(),
                        line
                    ),
                }
                continue;
            }

            match &mut block {
                Block::Action(action) => action.commands.push(Command::Exec(
                    tokens.iter().map(|s| s.to_string()).collect(),
                )),
                Block::Service(service) => match keyword {
                    "oneshot" => service.oneshot = true,
                    "critical" => service.critical = true,
                    "class" | "user" | "group" => {}
                    other => log::warn!(
                        "{}: unknown service option '{}'",
                        path.display(),
                        other
                    ),
                },
                Block::None => {
                    log::warn!("{}: command outside any section: '{}'", path.display(), line)
                }
            }
        }
        Self::finish_block(world, block);
    }

    fn parse_file(&mut self, world: &mut World, path: &Path) -> bool {
        match fs::read_to_string(path) {
            Ok(data) => {
                log::info!("parsing {}", path.display());
                self.parse_lines(world, path, &data);
                true
            }
            Err(e) => {
                log::info!("unable to read {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Parse a script file, or every `*.rc` file of a directory in sorted
    /// order. Returns whether anything was loaded.
    pub fn parse_config(&mut self, world: &mut World, path: &Path) -> bool {
        if !path.is_dir() {
            return self.parse_file(world, path);
        }
        let Ok(entries) = fs::read_dir(path) else {
            return false;
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "rc").unwrap_or(false))
            .collect();
        files.sort();
        let mut any = false;
        for file in files {
            any |= self.parse_file(world, &file);
        }
        any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SysPaths;

    fn world() -> World {
        let mut w = World::new(SysPaths::rooted(Path::new("/nonexistent-root")));
        w.props.init();
        w
    }

    #[test]
    fn parses_actions_services_and_options() {
        let dir = tempfile::tempdir().unwrap();
        let rc = dir.path().join("init.rc");
        fs::write(
            &rc,
            "# boot script\n\
             on early-init\n\
             \x20   setprop sys.stage early\n\
             \n\
             service logd /system/bin/logd --verbose\n\
             \x20   critical\n\
             \n\
             on property:sys.usb.config=adb\n\
             \x20   setprop sys.usb.state adb\n",
        )
        .unwrap();
        let mut w = world();
        assert!(RcParser::new().parse_config(&mut w, &rc));

        w.actions.queue_event_trigger("early-init");
        w.execute_one_command();
        assert_eq!(w.props.get("sys.stage"), Some("early"));

        let svc = w.services.find_by_name("logd").unwrap();
        assert!(svc.critical);
        assert_eq!(svc.args, vec!["/system/bin/logd", "--verbose"]);

        w.actions.enable_property_triggers();
        w.set_property("sys.usb.config", "adb").unwrap();
        w.execute_one_command();
        assert_eq!(w.props.get("sys.usb.state"), Some("adb"));
    }

    #[test]
    fn directory_parse_reads_rc_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.rc"), "on boot\n  setprop from b\n").unwrap();
        fs::write(dir.path().join("a.rc"), "on boot\n  setprop from a\n").unwrap();
        fs::write(dir.path().join("ignored.conf"), "junk\n").unwrap();
        let mut w = world();
        assert!(RcParser::new().parse_config(&mut w, dir.path()));
        w.actions.queue_event_trigger("boot");
        w.execute_one_command();
        assert_eq!(w.props.get("from"), Some("a"));
        w.execute_one_command();
        assert_eq!(w.props.get("from"), Some("b"));
    }

    #[test]
    fn control_commands_route_through_the_service_table() {
        let mut w = world();
        w.services.add(Service::new("ghostless", vec!["/bin/true".into()]));
        let rc = dispatch_command(
            &mut w,
            &["stop".to_string(), "ghostless".to_string()],
        );
        assert_eq!(rc, 0);
        assert_eq!(w.props.get("init.svc.ghostless"), Some("stopped"));
    }
}
