// CLASSIFICATION: COMMUNITY
// Filename: util.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-01-19

//! Small file and path helpers shared across boot stages.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::time::{Duration, Instant};

/// Write `content` to `path`, truncating. Returns false (and logs) on failure.
pub fn write_file(path: &Path, content: &str) -> bool {
    match fs::write(path, content) {
        Ok(()) => true,
        Err(e) => {
            log::error!("cannot write {}: {}", path.display(), e);
            false
        }
    }
}

/// Read the first line of `path`, without the trailing newline.
pub fn read_first_line(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    Some(contents.lines().next().unwrap_or("").to_string())
}

/// Last path component as a string, `""` for empty paths.
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Poll for `path` to exist, sleeping 10ms between probes, up to `timeout`.
/// Returns the time spent waiting, or None if the deadline passed.
pub fn wait_for_file(path: &Path, timeout: Duration) -> Option<Duration> {
    let start = Instant::now();
    loop {
        if path.exists() {
            return Some(start.elapsed());
        }
        if start.elapsed() >= timeout {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// Read from `r`, retrying on EINTR.
pub fn read_retry(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        match r.read(buf) {
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn basename_of_block_device() {
        assert_eq!(basename(Path::new("/dev/block/sda1")), "sda1");
        assert_eq!(basename(&PathBuf::new()), "");
    }

    #[test]
    fn first_line_strips_newline() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f");
        std::fs::write(&p, "abc123\nsecond\n").unwrap();
        assert_eq!(read_first_line(&p).as_deref(), Some("abc123"));
    }

    #[test]
    fn wait_for_missing_file_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("never");
        assert!(wait_for_file(&p, Duration::from_millis(30)).is_none());
    }
}
