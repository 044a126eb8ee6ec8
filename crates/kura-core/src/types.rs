//! Core store types.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::constants::{DIR_PERM, DIR_SIZE};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// Metadata for one entry, as returned by `stat` and `readdir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Final path segment (`/` for the root).
    pub name: String,
    pub kind: FileType,
    /// Byte length for files, [`DIR_SIZE`] for directories.
    pub size: u64,
    /// Unix permission bits, without the file-type bits.
    pub perm: u32,
    pub mtime: SystemTime,
}

impl EntryMeta {
    pub fn file(name: impl Into<String>, size: u64, perm: u32, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            kind: FileType::File,
            size,
            perm,
            mtime,
        }
    }

    pub fn directory(name: impl Into<String>, perm: u32, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            kind: FileType::Directory,
            size: DIR_SIZE,
            perm,
            mtime,
        }
    }

    /// Directory entry for backends with no directory metadata of their own.
    pub fn synthetic_directory(name: impl Into<String>) -> Self {
        Self::directory(name, DIR_PERM, SystemTime::UNIX_EPOCH)
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }
}

/// Result of a single read call.
///
/// `eof` is the end-of-data signal. It is not an error: a read can deliver
/// bytes and signal end-of-data at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    pub bytes: usize,
    pub eof: bool,
}

impl ReadOutcome {
    pub fn data(bytes: usize) -> Self {
        Self { bytes, eof: false }
    }

    pub fn end_of_data(bytes: usize) -> Self {
        Self { bytes, eof: true }
    }
}
