//! Transcript persistence as JSON lines

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::TranscriptEntry;
use crate::{Error, Result};

/// Where committed transcript lines are kept between runs
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    path: Option<PathBuf>,
}

impl TranscriptStore {
    /// Store backed by a JSONL file at `path`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// Store that keeps nothing between runs
    #[must_use]
    pub const fn in_memory() -> Self {
        Self { path: None }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Load saved entries
    ///
    /// A missing file is an empty history. A corrupt file is also treated as
    /// empty; it is renamed to `<name>.corrupt` so later appends start a
    /// clean log.
    #[must_use]
    pub fn load(&self) -> Vec<TranscriptEntry> {
        let Some(path) = &self.path else {
            return Vec::new();
        };
        if !path.exists() {
            return Vec::new();
        }

        match read_entries(path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable transcript");
                set_aside(path);
                Vec::new()
            }
        }
    }

    /// Where a corrupt log is moved on load
    #[must_use]
    pub fn corrupt_path(&self) -> Option<PathBuf> {
        self.path.as_deref().map(corrupt_path)
    }

    /// Append committed entries
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written
    pub fn append(&self, entries: &[TranscriptEntry]) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes())?;
        Ok(())
    }

    /// Remove all saved entries
    ///
    /// # Errors
    ///
    /// Returns error if an existing file cannot be removed
    pub fn clear(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Transcript(format!(
                "failed to clear {}: {e}",
                path.display()
            ))),
        }
    }
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

fn set_aside(path: &Path) {
    let target = corrupt_path(path);
    match fs::rename(path, &target) {
        Ok(()) => tracing::warn!(to = %target.display(), "moved corrupt transcript aside"),
        Err(e) => tracing::warn!(error = %e, "failed to move corrupt transcript aside"),
    }
}

fn read_entries(path: &Path) -> Result<Vec<TranscriptEntry>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut entries = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line)
            .map_err(|e| Error::Transcript(format!("line {}: {e}", index + 1)))?;
        entries.push(entry);
    }
    Ok(entries)
}
