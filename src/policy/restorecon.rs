// CLASSIFICATION: COMMUNITY
// Filename: restorecon.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-05-02

//! Security-context restoration for paths created before policy load.
//!
//! Uses the platform file-contexts table to look up the context a path
//! should carry and applies it via the `security.selinux` xattr. Lookup is
//! longest-prefix: the table's regular expressions are reduced to their
//! literal prefixes, which covers every entry the boot stages touch.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub struct Restorecon {
    /// `(path prefix, context)`, as loaded; lookup scans for longest prefix.
    entries: Vec<(String, String)>,
}

impl Restorecon {
    /// Load the file-contexts table. A missing table yields an empty handle
    /// whose restores are no-ops (policy not provisioned on this image).
    pub fn load(file_contexts: &Path) -> Self {
        let mut entries = Vec::new();
        if let Ok(data) = fs::read_to_string(file_contexts) {
            for line in data.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut fields = line.split_whitespace();
                let (Some(pattern), Some(context)) = (fields.next(), fields.last()) else {
                    continue;
                };
                entries.push((Self::literal_prefix(pattern), context.to_string()));
            }
        } else {
            log::info!("no file contexts at {}", file_contexts.display());
        }
        Self { entries }
    }

    /// Reduce a file-contexts pattern to its literal prefix: everything up to
    /// the first regex metacharacter.
    fn literal_prefix(pattern: &str) -> String {
        let cut = pattern
            .find(|c| "([.*?+^$\\".contains(c))
            .unwrap_or(pattern.len());
        pattern[..cut].trim_end_matches('/').to_string()
    }

    /// Longest matching prefix, on component boundaries.
    fn lookup(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .filter(|(prefix, _)| {
                path == prefix || path.starts_with(&format!("{}/", prefix))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ctx)| ctx.as_str())
    }

    /// Restore the context of one path. With an empty table this is a no-op.
    pub fn restore(&self, path: &Path) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        let display = path.display().to_string();
        let Some(context) = self.lookup(&display) else {
            log::debug!("no context entry for {}", display);
            return Ok(());
        };
        set_file_context(path, context)
            .with_context(|| format!("restorecon of {} to {}", display, context))
    }

    /// Restore a path and everything under it.
    pub fn restore_recursive(&self, path: &Path) -> Result<()> {
        self.restore(path)?;
        if path.is_dir() && !path.is_symlink() {
            for entry in fs::read_dir(path)
                .with_context(|| format!("cannot read {}", path.display()))?
                .flatten()
            {
                self.restore_recursive(&entry.path())?;
            }
        }
        Ok(())
    }
}

fn set_file_context(path: &Path, context: &str) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())?;
    let cval = std::ffi::CString::new(context)?;
    // The context is stored NUL-terminated, matching what the kernel reports.
    let rc = unsafe {
        libc::lsetxattr(
            cpath.as_ptr(),
            b"security.selinux\0".as_ptr() as *const libc::c_char,
            cval.as_ptr() as *const libc::c_void,
            context.len() + 1,
            0,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}
