//! Scoped override of the flattening tool's ignore file
//!
//! [`IgnoreOverride::acquire`] records the original file in a sidecar backup,
//! writes the restrictive pattern list, and restores the original when the
//! guard is released or dropped. A backup left behind by a killed process is
//! restored before the next override is applied.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

const BACKUP_SUFFIX: &str = ".codewatch-backup.json";

#[derive(Debug, Serialize, Deserialize)]
struct Backup {
    existed: bool,
    content: String,
}

/// Restores the original ignore file on [`restore`](Self::restore) or drop
#[derive(Debug)]
pub struct IgnoreOverride {
    target: PathBuf,
    backup: PathBuf,
    original: Option<String>,
    restored: bool,
}

impl IgnoreOverride {
    /// Swap in `patterns` as the content of `target`
    ///
    /// The backup lives in `backup_dir`, which should be a directory the
    /// watcher ignores.
    pub fn acquire(target: &Path, backup_dir: &Path, patterns: &[String]) -> Result<Self> {
        let backup = backup_path(target, backup_dir);

        if backup.exists() {
            tracing::warn!(
                "[EXTRACT] Found stale ignore backup {}, restoring first",
                backup.display()
            );
            restore_from_backup(target, &backup)?;
        }

        let original = match fs::read_to_string(target) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        fs::create_dir_all(backup_dir)?;
        let record = Backup {
            existed: original.is_some(),
            content: original.clone().unwrap_or_default(),
        };
        write_atomic(&backup, &serde_json::to_vec(&record)?)?;

        let mut content = String::from("# Temporary ignore list written by codewatch\n");
        for pattern in patterns {
            content.push_str(pattern);
            content.push('\n');
        }
        if let Err(e) = fs::write(target, content) {
            // Nothing was overridden; drop the backup so it is not replayed later
            let _ = fs::remove_file(&backup);
            return Err(e.into());
        }

        tracing::debug!("[EXTRACT] Ignore override applied to {}", target.display());
        Ok(Self {
            target: target.to_path_buf(),
            backup,
            original,
            restored: false,
        })
    }

    /// Restore the original file now, reporting any failure
    pub fn restore(mut self) -> Result<()> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.restored {
            return Ok(());
        }
        match &self.original {
            Some(content) => fs::write(&self.target, content)?,
            None => remove_if_exists(&self.target)?,
        }
        remove_if_exists(&self.backup)?;
        self.restored = true;
        tracing::debug!("[EXTRACT] Ignore override restored for {}", self.target.display());
        Ok(())
    }
}

impl Drop for IgnoreOverride {
    fn drop(&mut self) {
        if let Err(e) = self.restore_inner() {
            tracing::error!(
                "[EXTRACT] Failed to restore {} (backup kept at {}): {}",
                self.target.display(),
                self.backup.display(),
                e
            );
        }
    }
}

fn backup_path(target: &Path, backup_dir: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "ignore".to_string());
    backup_dir.join(format!("{}{}", name, BACKUP_SUFFIX))
}

fn restore_from_backup(target: &Path, backup: &Path) -> Result<()> {
    let record: Backup = serde_json::from_slice(&fs::read(backup)?)?;
    if record.existed {
        fs::write(target, record.content)?;
    } else {
        remove_if_exists(target)?;
    }
    remove_if_exists(backup)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
