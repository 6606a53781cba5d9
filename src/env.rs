// CLASSIFICATION: COMMUNITY
// Filename: env.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-02-07

//! Bounded environment vector inherited by every spawned child.
//!
//! Holds at most [`ENV_SLOTS`] `KEY=VALUE` entries; the final slot of the
//! exec-time array is reserved for the terminating sentinel. Replacing an
//! existing key reuses its slot so insertion order of distinct keys is kept.

use std::ffi::CString;

use thiserror::Error;

/// Usable entry slots; one more is reserved to terminate the list.
pub const ENV_SLOTS: usize = 31;

/// Default search path seeded into slot zero at process start.
pub const PATH_DEFAULT: &str = "/sbin:/system/sbin:/system/bin:/system/xbin";

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("no env room to store '{key}'='{value}'")]
    Full { key: String, value: String },
}

/// Ordered `KEY=VALUE` vector with in-place replacement.
#[derive(Debug, Default, Clone)]
pub struct EnvVec {
    entries: Vec<(String, String)>,
}

impl EnvVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace `key`. Overflow is reported but callers treat it as
    /// non-fatal.
    pub fn add(&mut self, key: &str, value: &str) -> Result<(), EnvError> {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
            return Ok(());
        }
        if self.entries.len() >= ENV_SLOTS {
            return Err(EnvError::Full {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        self.entries.push((key.to_string(), value.to_string()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render `KEY=VALUE` strings in slot order.
    pub fn as_environ(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }

    /// Render for `execve`. Entries containing NUL are skipped.
    pub fn as_cstrings(&self) -> Vec<CString> {
        self.as_environ()
            .into_iter()
            .filter_map(|s| CString::new(s).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_in_place() {
        let mut env = EnvVec::new();
        env.add("PATH", "/a").unwrap();
        env.add("TERM", "vt100").unwrap();
        env.add("PATH", "/b").unwrap();
        assert_eq!(env.as_environ(), vec!["PATH=/b", "TERM=vt100"]);
    }

    #[test]
    fn overflow_is_reported() {
        let mut env = EnvVec::new();
        for i in 0..ENV_SLOTS {
            env.add(&format!("K{i}"), "v").unwrap();
        }
        assert!(env.add("ONE_TOO_MANY", "v").is_err());
        // A replacement still works at capacity.
        env.add("K0", "w").unwrap();
        assert_eq!(env.get("K0"), Some("w"));
        assert_eq!(env.len(), ENV_SLOTS);
    }
}
