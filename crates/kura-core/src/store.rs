//! The hierarchical store contract.
//!
//! Every backend, native or emulated, implements [`Store`]. Paths are
//! normalized with [`StorePath`](crate::StorePath) by the backend, so callers
//! may pass `"a/b/"`, `"/a/b"` or `"/a/./b"` interchangeably.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::path::StorePath;
use crate::types::{EntryMeta, ReadOutcome};

/// A live backend connection.
///
/// All methods take `&self` and are safe to call concurrently from any number
/// of tasks sharing one handle.
#[async_trait]
pub trait Store: Send + Sync {
    /// Scheme this store was registered under (e.g. `"mem"`).
    fn scheme(&self) -> &'static str;

    /// Metadata for a file or directory. The root is always a directory.
    async fn stat(&self, path: &str) -> StoreResult<EntryMeta>;

    /// Immediate children of a directory.
    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>>;

    /// Create one directory. The parent must already exist.
    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()>;

    /// Remove a file or an empty directory.
    async fn remove(&self, path: &str) -> StoreResult<()>;

    /// Start writing a file. Content becomes visible when the handle is closed,
    /// replacing any previous content at `path`.
    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>>;

    /// Open a file for reading.
    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>>;

    /// Release the backend's resources.
    async fn close(&self) -> StoreResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Check if a path exists.
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_exist() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Read an entire file.
    async fn read_all(&self, path: &str) -> StoreResult<Vec<u8>> {
        let mut reader = self.open(path).await?;
        let data = reader.read_to_end().await?;
        reader.close().await?;
        Ok(data)
    }

    /// Replace an entire file.
    async fn write_all(&self, path: &str, data: &[u8]) -> StoreResult<()> {
        let mut writer = self.create(path).await?;
        writer.write(data).await?;
        writer.close().await
    }
}

/// Shared handles are stores too, so wrappers can sit over `Arc<dyn Store>`.
#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    fn scheme(&self) -> &'static str {
        (**self).scheme()
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        (**self).stat(path).await
    }

    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        (**self).readdir(path).await
    }

    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()> {
        (**self).mkdir(path, perm).await
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        (**self).remove(path).await
    }

    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        (**self).create(path).await
    }

    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        (**self).open(path).await
    }

    async fn close(&self) -> StoreResult<()> {
        (**self).close().await
    }
}

/// An open read session with its own cursor.
///
/// Sequential reads and seeks move the cursor and need `&mut self`; positional
/// reads carry their own offset and only need `&self`, so they may run
/// concurrently with each other.
#[async_trait]
pub trait ReadHandle: Send + Sync {
    /// Read from the cursor and advance it by the bytes read.
    ///
    /// Signals end-of-data with zero bytes once the cursor is at or beyond the
    /// size captured at open, and keeps signalling it on every later call
    /// until the cursor is moved back.
    async fn read(&mut self, buf: &mut [u8]) -> StoreResult<ReadOutcome>;

    /// Read at `offset` without touching the cursor.
    ///
    /// Returns whatever bytes lie between `offset` and the end, with
    /// end-of-data set when fewer than `buf.len()` bytes were available.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> StoreResult<ReadOutcome>;

    /// Move the cursor. Never fetches; seeking past the end is allowed.
    fn seek(&mut self, pos: SeekFrom) -> StoreResult<u64>;

    /// Size captured when the handle was opened.
    fn size(&self) -> u64;

    /// End the session.
    async fn close(&mut self) -> StoreResult<()>;

    /// Read from the cursor until end-of-data.
    async fn read_to_end(&mut self) -> StoreResult<Vec<u8>> {
        let remaining = self.size().saturating_sub(self.seek(SeekFrom::Current(0))?);
        let mut out = Vec::with_capacity(remaining as usize);
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let outcome = self.read(&mut buf).await?;
            out.extend_from_slice(&buf[..outcome.bytes]);
            if outcome.eof {
                return Ok(out);
            }
        }
    }
}

/// An open write session. Nothing written is visible until [`close`] succeeds.
///
/// [`close`]: WriteHandle::close
#[async_trait]
pub trait WriteHandle: Send {
    /// Append bytes to the pending content. Fails once the handle is closed.
    async fn write(&mut self, buf: &[u8]) -> StoreResult<usize>;

    /// Commit the pending content as the file's entire new content.
    async fn close(&mut self) -> StoreResult<()>;

    /// Append pending content from an owned buffer.
    async fn write_bytes(&mut self, data: Bytes) -> StoreResult<()> {
        self.write(&data).await.map(|_| ())
    }
}

/// Create `path` and every missing ancestor, outermost first.
///
/// `AlreadyExists` at any level counts as success, so the whole operation is
/// idempotent and can be retried after a partial failure.
pub async fn mkdir_all(store: &dyn Store, path: &str, perm: u32) -> StoreResult<()> {
    for dir in StorePath::new(path).lineage() {
        match store.mkdir(dir.as_str(), perm).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
