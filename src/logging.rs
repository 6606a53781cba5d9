// CLASSIFICATION: COMMUNITY
// Filename: logging.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-02-21

//! Kernel logger for the boot stages.
//!
//! Lines are written to `/dev/kmsg` with a syslog-style `<level>` prefix so
//! they interleave with kernel output; before `/dev/kmsg` exists (or on a
//! developer host) they fall back to stderr. Installed once per process via
//! the `log` facade; the second stage re-runs the install, which is a no-op.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

const TAG: &str = "emberinit";

struct KmsgLogger {
    kmsg: Mutex<Option<File>>,
}

fn syslog_level(level: Level) -> u8 {
    match level {
        Level::Error => 3,
        Level::Warn => 4,
        Level::Info => 6,
        Level::Debug | Level::Trace => 7,
    }
}

impl Log for KmsgLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "<{}>{}: {}\n",
            syslog_level(record.level()),
            TAG,
            record.args()
        );
        let mut guard = match self.kmsg.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        if let Some(f) = guard.as_mut() {
            if f.write_all(line.as_bytes()).is_ok() {
                return;
            }
        }
        let _ = std::io::stderr().write_all(line.as_bytes());
    }

    fn flush(&self) {}
}

/// Install the kernel logger, opening `kmsg_path` if it is writable yet.
/// Safe to call from both stages; the second call quietly keeps the first
/// logger.
pub fn init_kernel_logging(kmsg_path: &Path) {
    let kmsg = OpenOptions::new().write(true).open(kmsg_path).ok();
    let logger = KmsgLogger {
        kmsg: Mutex::new(kmsg),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(LevelFilter::Debug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_maps_to_syslog_err() {
        assert_eq!(syslog_level(Level::Error), 3);
        assert_eq!(syslog_level(Level::Info), 6);
    }
}
