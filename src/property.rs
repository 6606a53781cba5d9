// CLASSIFICATION: COMMUNITY
// Filename: property.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-03-18

//! The process-wide property store.
//!
//! Properties are dot-separated string keys mapped to bounded string values.
//! Writes are mediated by an audit hook that sees the writer's identity;
//! every successful mutation is broadcast by the owning `World` so observers
//! (property triggers, pending waits) run synchronously on the single thread.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Maximum property value length, matching the platform property ABI.
pub const PROP_VALUE_MAX: usize = 92;

/// Identity attached to a property write for the audit hook.
#[derive(Debug, Clone, Copy)]
pub struct PropertyAudit {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

impl PropertyAudit {
    /// Identity of the init process itself.
    pub fn own() -> Self {
        Self {
            pid: std::process::id() as i32,
            uid: 0,
            gid: 0,
        }
    }
}

/// Audit hook: may veto a write. The default hook allows everything and
/// records the attempt at debug level.
pub type AuditHook = Box<dyn FnMut(&str, &PropertyAudit) -> bool>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertyError {
    #[error("property store not initialized")]
    NotInitialized,
    #[error("invalid property name '{0}'")]
    BadName(String),
    #[error("value for '{0}' exceeds {PROP_VALUE_MAX} bytes")]
    ValueTooLong(String),
    #[error("read-only property '{0}' already set")]
    ReadOnly(String),
    #[error("write to '{0}' denied by audit policy")]
    Denied(String),
}

pub struct PropertyStore {
    map: HashMap<String, String>,
    initialized: bool,
    audit: AuditHook,
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            initialized: false,
            audit: Box::new(|name, who| {
                log::debug!(
                    "property={} pid={} uid={} gid={}",
                    name,
                    who.pid,
                    who.uid,
                    who.gid
                );
                true
            }),
        }
    }

    /// Open the store for writes. Called once in the second stage.
    pub fn init(&mut self) {
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Replace the audit hook.
    pub fn set_audit_hook(&mut self, hook: AuditHook) {
        self.audit = hook;
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(name).map(|v| v.as_str())
    }

    /// Value or `""` when unset, the common lookup shape during boot.
    pub fn get_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    fn valid_name(name: &str) -> bool {
        !name.is_empty()
            && !name.starts_with('.')
            && !name.ends_with('.')
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_' | b':' | b'@'))
    }

    /// Store `name=value` on behalf of `who`. `ro.*` keys are write-once.
    pub fn set_with_audit(
        &mut self,
        name: &str,
        value: &str,
        who: &PropertyAudit,
    ) -> Result<(), PropertyError> {
        if !self.initialized {
            return Err(PropertyError::NotInitialized);
        }
        if !Self::valid_name(name) {
            return Err(PropertyError::BadName(name.to_string()));
        }
        if value.len() > PROP_VALUE_MAX {
            return Err(PropertyError::ValueTooLong(name.to_string()));
        }
        if name.starts_with("ro.") && self.map.contains_key(name) {
            return Err(PropertyError::ReadOnly(name.to_string()));
        }
        if !(self.audit)(name, who) {
            return Err(PropertyError::Denied(name.to_string()));
        }
        self.map.insert(name.to_string(), value.to_string());
        Ok(())
    }

    /// Load `key=value` defaults from a prop file. Missing file and malformed
    /// lines are skipped.
    pub fn load_defaults(&mut self, path: &Path) -> usize {
        let Ok(data) = std::fs::read_to_string(path) else {
            log::info!("no default prop file at {}", path.display());
            return 0;
        };
        let who = PropertyAudit::own();
        let mut loaded = 0;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match self.set_with_audit(key.trim(), value.trim(), &who) {
                Ok(()) => loaded += 1,
                Err(e) => log::warn!("default prop rejected: {}", e),
            }
        }
        loaded
    }

    /// Snapshot of `(name, value)` pairs, for replaying property triggers.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
