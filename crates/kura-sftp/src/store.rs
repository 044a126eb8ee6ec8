//! [`Store`] over an SFTP session.
//!
//! SFTP v3 status codes are too coarse for the shared error taxonomy (most
//! failures come back as a generic `Failure`), so each mutating operation
//! checks the relevant preconditions with `stat` calls first.

use async_trait::async_trait;
use bytes::Bytes;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::File;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use std::io::SeekFrom;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use kura_core::constants::{FILE_PERM, STAGING_PREFIX};
use kura_core::reader::{RangeFetch, RangeReader};
use kura_core::writer::{BufferedWriter, Commit};
use kura_core::{
    EntryMeta, ReadHandle, Store, StoreError, StorePath, StoreResult, WriteHandle,
};

use crate::ssh::SshClient;

/// Scheme the SFTP backend registers under.
pub const SCHEME: &str = "sftp";

/// A remote directory tree served over SFTP.
pub struct SftpStore {
    sftp: Arc<SftpSession>,
    client: Mutex<SshClient>,
    root: StorePath,
}

impl SftpStore {
    /// Wrap an established session. `root` is the remote directory that
    /// becomes `/` of the store.
    pub fn new(sftp: SftpSession, client: SshClient, root: &str) -> Self {
        Self {
            sftp: Arc::new(sftp),
            client: Mutex::new(client),
            root: StorePath::new(root),
        }
    }

    fn remote(&self, path: &StorePath) -> String {
        self.root.join(path.relative()).to_string()
    }

    async fn attrs(&self, path: &StorePath) -> StoreResult<FileAttributes> {
        self.sftp
            .metadata(self.remote(path))
            .await
            .map_err(|e| map_err(e, path))
    }

    /// Like [`attrs`](Self::attrs) but `None` when nothing is there.
    async fn try_attrs(&self, path: &StorePath) -> StoreResult<Option<FileAttributes>> {
        match self.attrs(path).await {
            Ok(attrs) => Ok(Some(attrs)),
            Err(StoreError::NotExist(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fail unless the parent of `path` is an existing directory.
    async fn check_parent(&self, path: &StorePath) -> StoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.try_attrs(&parent).await? {
            Some(attrs) if attrs.is_dir() => Ok(()),
            Some(_) => Err(StoreError::not_a_directory(path.as_str())),
            None => Err(StoreError::not_exist(path.as_str())),
        }
    }
}

fn to_meta(name: &str, attrs: &FileAttributes) -> EntryMeta {
    let perm = attrs.permissions.unwrap_or(0) & 0o777;
    let mtime = attrs
        .mtime
        .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from(secs)))
        .unwrap_or(SystemTime::UNIX_EPOCH);
    if attrs.is_dir() {
        EntryMeta::directory(name, perm, mtime)
    } else {
        EntryMeta::file(name, attrs.size.unwrap_or(0), perm, mtime)
    }
}

/// Map SFTP status codes into the shared taxonomy.
fn map_err(err: SftpError, path: &StorePath) -> StoreError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => StoreError::not_exist(path.as_str()),
            StatusCode::PermissionDenied => StoreError::permission_denied(path.as_str()),
            StatusCode::NoConnection | StatusCode::ConnectionLost => {
                StoreError::connection_failed(format!("{path}: {}", status.error_message))
            }
            _ => StoreError::backend(format!("{path}: {}", status.error_message)),
        },
        other => StoreError::backend(other),
    }
}

fn io_err(err: std::io::Error, path: &str) -> StoreError {
    StoreError::from_io(err, path)
}

#[async_trait]
impl Store for SftpStore {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        let path = StorePath::new(path);
        let attrs = self.attrs(&path).await?;
        Ok(to_meta(path.name(), &attrs))
    }

    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        let path = StorePath::new(path);
        if !self.attrs(&path).await?.is_dir() {
            return Err(StoreError::not_a_directory(path.as_str()));
        }
        let listing = self
            .sftp
            .read_dir(self.remote(&path))
            .await
            .map_err(|e| map_err(e, &path))?;

        let mut entries: Vec<EntryMeta> = listing
            .filter(|entry| !matches!(entry.file_name().as_str(), "." | ".."))
            .filter(|entry| !entry.file_name().starts_with(STAGING_PREFIX))
            .map(|entry| to_meta(&entry.file_name(), &entry.metadata()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()> {
        let path = StorePath::new(path);
        self.check_parent(&path).await?;
        if self.try_attrs(&path).await?.is_some() {
            return Err(StoreError::already_exists(path.as_str()));
        }
        let remote = self.remote(&path);
        self.sftp
            .create_dir(remote.clone())
            .await
            .map_err(|e| map_err(e, &path))?;

        let mut attrs = FileAttributes::empty();
        attrs.permissions = Some(perm);
        self.sftp
            .set_metadata(remote, attrs)
            .await
            .map_err(|e| map_err(e, &path))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::permission_denied("cannot remove root"));
        }
        let remote = self.remote(&path);
        let result = if self.attrs(&path).await?.is_dir() {
            let mut listing = self
                .sftp
                .read_dir(remote.clone())
                .await
                .map_err(|e| map_err(e, &path))?;
            if listing.any(|entry| !matches!(entry.file_name().as_str(), "." | "..")) {
                return Err(StoreError::directory_not_empty(path.as_str()));
            }
            self.sftp.remove_dir(remote).await
        } else {
            self.sftp.remove_file(remote).await
        };
        result.map_err(|e| map_err(e, &path))
    }

    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        self.check_parent(&path).await?;
        if let Some(attrs) = self.try_attrs(&path).await? {
            if attrs.is_dir() {
                return Err(StoreError::is_a_directory(path.as_str()));
            }
        }
        let staging = path
            .parent()
            .unwrap_or_else(StorePath::root)
            .join(&format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));
        let committer = SftpCommit {
            sftp: Arc::clone(&self.sftp),
            remote: self.remote(&path),
            staging: self.remote(&staging),
            path: path.clone(),
        };
        Ok(Box::new(BufferedWriter::new(committer, path.as_str())))
    }

    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        let path = StorePath::new(path);
        let attrs = self.attrs(&path).await?;
        if attrs.is_dir() {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        let file = self
            .sftp
            .open(self.remote(&path))
            .await
            .map_err(|e| map_err(e, &path))?;
        let size = attrs.size.unwrap_or(0);
        let fetcher = SftpRange {
            file: Mutex::new(file),
            path: path.to_string(),
        };
        Ok(Box::new(RangeReader::new(fetcher, size, path.as_str())))
    }

    async fn close(&self) -> StoreResult<()> {
        self.sftp
            .close()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        self.client.lock().await.disconnect().await?;
        tracing::info!(root = %self.root, "sftp store closed");
        Ok(())
    }
}

/// Seek-then-read on one remote file handle.
///
/// Positional reads share the handle, so the lock keeps each seek paired with
/// its read.
struct SftpRange {
    file: Mutex<File>,
    path: String,
}

#[async_trait]
impl RangeFetch for SftpRange {
    async fn fetch(&self, range: Range<u64>) -> StoreResult<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(range.start))
            .await
            .map_err(|e| io_err(e, &self.path))?;

        let mut buf = vec![0u8; (range.end - range.start) as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| io_err(e, &self.path))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }

    async fn release(&self) -> StoreResult<()> {
        self.file
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| io_err(e, &self.path))
    }
}

/// Uploads the finished buffer to a staging file beside the target, then
/// renames it into place.
struct SftpCommit {
    sftp: Arc<SftpSession>,
    remote: String,
    staging: String,
    path: StorePath,
}

impl SftpCommit {
    async fn upload(&self, data: &[u8]) -> StoreResult<()> {
        let mut file = self
            .sftp
            .create(self.staging.clone())
            .await
            .map_err(|e| map_err(e, &self.path))?;
        file.write_all(data)
            .await
            .map_err(|e| io_err(e, self.path.as_str()))?;
        file.shutdown()
            .await
            .map_err(|e| io_err(e, self.path.as_str()))?;

        let mut attrs = FileAttributes::empty();
        attrs.permissions = Some(FILE_PERM);
        self.sftp
            .set_metadata(self.staging.clone(), attrs)
            .await
            .map_err(|e| map_err(e, &self.path))
    }

    /// SFTP v3 rename refuses an existing target, so an existing file is
    /// removed before the second attempt.
    async fn replace(&self) -> StoreResult<()> {
        if self
            .sftp
            .rename(self.staging.clone(), self.remote.clone())
            .await
            .is_ok()
        {
            return Ok(());
        }
        match self.sftp.metadata(self.remote.clone()).await {
            Ok(attrs) if attrs.is_dir() => {
                return Err(StoreError::is_a_directory(self.path.as_str()));
            }
            Ok(_) => self
                .sftp
                .remove_file(self.remote.clone())
                .await
                .map_err(|e| map_err(e, &self.path))?,
            Err(_) => {}
        }
        self.sftp
            .rename(self.staging.clone(), self.remote.clone())
            .await
            .map_err(|e| map_err(e, &self.path))
    }
}

#[async_trait]
impl Commit for SftpCommit {
    async fn commit(&self, data: Bytes) -> StoreResult<()> {
        let mut result = self.upload(&data).await;
        if result.is_ok() {
            result = self.replace().await;
        }
        if result.is_err() {
            let _ = self.sftp.remove_file(self.staging.clone()).await;
        } else {
            tracing::debug!(path = %self.path, "committed sftp write");
        }
        result
    }
}
