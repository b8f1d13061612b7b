//! Browsing, renaming and deleting saved records

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::AUDIO_EXTENSIONS;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Invalid record name: {0:?}")]
    InvalidName(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("A record named {0} already exists")]
    AlreadyExists(String),
    #[error("Record I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// The records directory
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// A bare file name: no separators, no traversal.
fn check_name(name: &str) -> Result<(), RecordError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
    {
        return Err(RecordError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Audio file names in the directory, sorted alphabetically.
    pub fn list(&self) -> Result<Vec<String>, RecordError> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() || !is_audio_file(&entry.path()) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => records.push(name),
                Err(name) => tracing::warn!(?name, "Skipping record with a non UTF-8 name"),
            }
        }
        records.sort();
        Ok(records)
    }

    /// Renames `old` to `new`, keeping the old extension when `new` has none.
    /// Returns the final name.
    pub fn rename(&self, old: &str, new: &str) -> Result<String, RecordError> {
        check_name(old)?;
        check_name(new)?;

        let source = self.path_of(old);
        if !source.is_file() {
            return Err(RecordError::NotFound(old.to_string()));
        }

        let new_name = match (Path::new(new).extension(), source.extension()) {
            (None, Some(ext)) => format!("{}.{}", new, ext.to_string_lossy()),
            _ => new.to_string(),
        };
        if new_name == old {
            return Ok(new_name);
        }

        let target = self.path_of(&new_name);
        match fs::hard_link(&source, &target) {
            // The link fails instead of replacing an existing target.
            Ok(()) => fs::remove_file(&source)?,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // On a case-insensitive filesystem a case-only rename collides
                // with the source itself.
                if !new_name.eq_ignore_ascii_case(old) || self.has_entry(&new_name)? {
                    return Err(RecordError::AlreadyExists(new_name));
                }
                fs::rename(&source, &target)?;
            }
            Err(e) => {
                tracing::debug!("Hard links unavailable ({}), renaming in place", e);
                if target.exists() {
                    return Err(RecordError::AlreadyExists(new_name));
                }
                fs::rename(&source, &target)?;
            }
        }
        tracing::info!(from = old, to = %new_name, "Record renamed");
        Ok(new_name)
    }

    /// Exact, case-sensitive match against the directory listing.
    fn has_entry(&self, name: &str) -> Result<bool, RecordError> {
        for entry in fs::read_dir(&self.dir)? {
            if entry?.file_name() == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn delete(&self, name: &str) -> Result<(), RecordError> {
        check_name(name)?;

        let path = self.path_of(name);
        if !path.is_file() {
            return Err(RecordError::NotFound(name.to_string()));
        }

        fs::remove_file(&path)?;
        tracing::info!(record = name, "Record deleted");
        Ok(())
    }
}
