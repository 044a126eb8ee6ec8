//! Local filesystem backend.
//!
//! Every store path is resolved under a fixed root directory. Path
//! normalization clamps `..` at the store root, so callers cannot address
//! anything above it.
//!
//! Writes stream into a hidden staging file next to the target and are
//! renamed over it on close, so readers only ever see complete files.

use async_trait::async_trait;
use bytes::Bytes;
use std::fs::Metadata;
use std::ops::Range;
use std::os::unix::fs::{FileExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::constants::{FILE_PERM, STAGING_PREFIX};
use crate::error::{StoreError, StoreResult};
use crate::path::StorePath;
use crate::reader::{RangeFetch, RangeReader};
use crate::registry::{BackendFactory, ConnectionTarget, Registry};
use crate::store::{ReadHandle, Store, WriteHandle};
use crate::types::EntryMeta;

/// Scheme the local backend registers under.
pub const SCHEME: &str = "file";

/// Local filesystem store.
///
/// All operations are relative to `root`: with a root of
/// `/srv/data`, the store path `/logs/a.txt` is `/srv/data/logs/a.txt`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store rooted at an existing directory.
    ///
    /// The root is canonicalized once so symlinked roots (e.g. macOS `/tmp`)
    /// resolve consistently.
    pub async fn open_root(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref();
        let display = root.display().to_string();
        let root = fs::canonicalize(root)
            .await
            .map_err(|e| StoreError::from_io(e, display.clone()))?;
        let meta = fs::metadata(&root)
            .await
            .map_err(|e| StoreError::from_io(e, display.clone()))?;
        if !meta.is_dir() {
            return Err(StoreError::not_a_directory(display));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &StorePath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.relative())
        }
    }

    fn to_meta(name: &str, meta: &Metadata) -> EntryMeta {
        let perm = meta.permissions().mode() & 0o777;
        let mtime = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if meta.is_dir() {
            EntryMeta::directory(name, perm, mtime)
        } else {
            EntryMeta::file(name, meta.len(), perm, mtime)
        }
    }

    async fn metadata(&self, path: &StorePath) -> StoreResult<Metadata> {
        fs::metadata(self.resolve(path))
            .await
            .map_err(|e| match StoreError::from_io(e, path.as_str()) {
                // A file in the middle of the path means nothing is there.
                StoreError::NotADirectory(p) => StoreError::NotExist(p),
                other => other,
            })
    }

    /// Fail unless the parent of `path` is an existing directory.
    async fn check_parent(&self, path: &StorePath) -> StoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match self.metadata(&parent).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::not_a_directory(path.as_str())),
            Err(StoreError::NotExist(_)) => Err(StoreError::not_exist(path.as_str())),
            Err(e) => Err(e),
        }
    }
}

fn is_staging(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

#[async_trait]
impl Store for LocalStore {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        let path = StorePath::new(path);
        let meta = self.metadata(&path).await?;
        Ok(Self::to_meta(path.name(), &meta))
    }

    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        let path = StorePath::new(path);
        if !self.metadata(&path).await?.is_dir() {
            return Err(StoreError::not_a_directory(path.as_str()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(self.resolve(&path))
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_staging(&name) {
                continue;
            }
            match fs::metadata(entry.path()).await {
                Ok(meta) => entries.push(Self::to_meta(&name, &meta)),
                // Removed between listing and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::from_io(e, path.join(&name).as_str())),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()> {
        let path = StorePath::new(path);
        self.check_parent(&path).await?;
        let full = self.resolve(&path);

        fs::DirBuilder::new()
            .mode(perm)
            .create(&full)
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))?;

        // The umask may have masked bits off; record exactly what was asked.
        fs::set_permissions(&full, std::fs::Permissions::from_mode(perm))
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::permission_denied("cannot remove root"));
        }
        let full = self.resolve(&path);
        let result = if self.metadata(&path).await?.is_dir() {
            fs::remove_dir(&full).await
        } else {
            fs::remove_file(&full).await
        };
        result.map_err(|e| StoreError::from_io(e, path.as_str()))
    }

    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        let path = StorePath::new(path);
        self.check_parent(&path).await?;
        match self.metadata(&path).await {
            Ok(meta) if meta.is_dir() => return Err(StoreError::is_a_directory(path.as_str())),
            Ok(_) | Err(StoreError::NotExist(_)) => {}
            Err(e) => return Err(e),
        }

        let target = self.resolve(&path);
        let staging = target
            .parent()
            .unwrap_or(&self.root)
            .join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()));

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(FILE_PERM)
            .open(&staging)
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))?;
        // Same as mkdir: the umask must not change the recorded bits.
        if let Err(e) = file
            .set_permissions(std::fs::Permissions::from_mode(FILE_PERM))
            .await
        {
            let _ = fs::remove_file(&staging).await;
            return Err(StoreError::from_io(e, path.as_str()));
        }

        tracing::debug!(path = %path, staging = %staging.display(), "staging local write");
        Ok(Box::new(LocalWriter {
            file: Some(file),
            staging,
            target,
            path: path.to_string(),
        }))
    }

    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        let path = StorePath::new(path);
        let meta = self.metadata(&path).await?;
        if meta.is_dir() {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        let file = fs::File::open(self.resolve(&path))
            .await
            .map_err(|e| StoreError::from_io(e, path.as_str()))?
            .into_std()
            .await;

        // Size is taken from the open descriptor so it matches what we read.
        let size = file
            .metadata()
            .map_err(|e| StoreError::from_io(e, path.as_str()))?
            .len();
        let fetcher = LocalRange {
            file: Arc::new(file),
            path: path.to_string(),
        };
        Ok(Box::new(RangeReader::new(fetcher, size, path.as_str())))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Positional reads on a blocking thread.
struct LocalRange {
    file: Arc<std::fs::File>,
    path: String,
}

#[async_trait]
impl RangeFetch for LocalRange {
    async fn fetch(&self, range: Range<u64>) -> StoreResult<Bytes> {
        let file = Arc::clone(&self.file);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; (range.end - range.start) as usize];
            let mut filled = 0;
            while filled < buf.len() {
                match file.read_at(&mut buf[filled..], range.start + filled as u64) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) => return Err(StoreError::from_io(e, path)),
                }
            }
            buf.truncate(filled);
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(StoreError::backend)?
    }
}

/// Streams into a staging file and renames it into place on close.
struct LocalWriter {
    file: Option<fs::File>,
    staging: PathBuf,
    target: PathBuf,
    path: String,
}

impl LocalWriter {
    fn file(&mut self) -> StoreResult<&mut fs::File> {
        self.file
            .as_mut()
            .ok_or_else(|| StoreError::Closed(self.path.clone()))
    }

    async fn finish(&self, mut file: fs::File) -> StoreResult<()> {
        let io = |e: std::io::Error| StoreError::from_io(e, self.path.clone());
        file.flush().await.map_err(io)?;
        file.sync_all().await.map_err(io)?;
        drop(file);
        fs::rename(&self.staging, &self.target).await.map_err(io)
    }
}

#[async_trait]
impl WriteHandle for LocalWriter {
    async fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        let path = self.path.clone();
        self.file()?
            .write_all(buf)
            .await
            .map_err(|e| StoreError::from_io(e, path))?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> StoreResult<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| StoreError::Closed(self.path.clone()))?;
        let result = self.finish(file).await;
        if result.is_err() {
            let _ = fs::remove_file(&self.staging).await;
        } else {
            tracing::debug!(path = %self.path, "committed local write");
        }
        result
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!(path = %self.path, "discarding uncommitted write");
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}

struct LocalFactory;

#[async_trait]
impl BackendFactory for LocalFactory {
    fn options(&self) -> &'static [&'static str] {
        &[]
    }

    async fn connect(&self, target: &ConnectionTarget) -> StoreResult<Arc<dyn Store>> {
        if let Some(host) = target.host.as_deref().filter(|h| *h != "localhost") {
            return Err(StoreError::invalid_input(format!(
                "file:// cannot address remote host {host:?}"
            )));
        }
        Ok(Arc::new(LocalStore::open_root(&target.root).await?))
    }
}

/// Register `file://` with `registry`.
pub fn register(registry: &mut Registry) -> StoreResult<()> {
    registry.register(SCHEME, LocalFactory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, LocalStore) {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::open_root(temp.path()).await.unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_permissions_ignore_umask() {
        let (_temp, store) = setup().await;
        // SAFETY: umask only swaps the process mask; restored below.
        let previous = unsafe { libc::umask(0o077) };
        let written = store.write_all("/f", b"x").await;
        let made = store.mkdir("/d", 0o755).await;
        unsafe { libc::umask(previous) };
        written.unwrap();
        made.unwrap();

        assert_eq!(store.stat("/f").await.unwrap().perm, 0o644);
        assert_eq!(store.stat("/d").await.unwrap().perm, 0o755);
    }

    #[tokio::test]
    async fn test_read_write() {
        let (temp, store) = setup().await;
        store.write_all("/test.txt", b"hello world").await.unwrap();

        let data = store.read_all("/test.txt").await.unwrap();
        assert_eq!(data, b"hello world");
        assert_eq!(
            std::fs::read(temp.path().join("test.txt")).unwrap(),
            b"hello world"
        );
    }

    #[tokio::test]
    async fn test_stat_shapes() {
        let (_temp, store) = setup().await;
        store.mkdir("/dir1", 0o755).await.unwrap();
        store.write_all("/file1", b"12345").await.unwrap();

        let dir = store.stat("/dir1/").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.size, 4096);
        assert_eq!(dir.perm, 0o755);

        let file = store.stat("/file1").await.unwrap();
        assert!(file.is_file());
        assert_eq!(file.size, 5);
        assert_eq!(file.perm, 0o644);

        assert!(store.stat("/").await.unwrap().is_dir());
        assert!(store.stat("/file1/below").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_mkdir_exact_perm_and_errors() {
        let (_temp, store) = setup().await;
        store.mkdir("/private", 0o700).await.unwrap();
        assert_eq!(store.stat("/private").await.unwrap().perm, 0o700);

        assert_eq!(
            store.mkdir("/private", 0o700).await.unwrap_err().kind(),
            ErrorKind::AlreadyExists
        );
        assert_eq!(
            store.mkdir("/missing/child", 0o755).await.unwrap_err().kind(),
            ErrorKind::NotExist
        );
        store.write_all("/plain", b"x").await.unwrap();
        assert_eq!(
            store.mkdir("/plain/child", 0o755).await.unwrap_err().kind(),
            ErrorKind::NotADirectory
        );
    }

    #[tokio::test]
    async fn test_write_invisible_until_close() {
        let (temp, store) = setup().await;
        let mut w = store.create("/f").await.unwrap();
        w.write(b"pending").await.unwrap();

        assert!(store.stat("/f").await.unwrap_err().is_not_exist());
        assert!(store.readdir("/").await.unwrap().is_empty());

        w.close().await.unwrap();
        assert_eq!(store.read_all("/f").await.unwrap(), b"pending");
        assert!(matches!(w.write(b"x").await, Err(StoreError::Closed(_))));

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["f"]);
    }

    #[tokio::test]
    async fn test_dropped_writer_leaves_nothing() {
        let (temp, store) = setup().await;
        store.write_all("/f", b"old").await.unwrap();
        {
            let mut w = store.create("/f").await.unwrap();
            w.write(b"new").await.unwrap();
        }
        assert_eq!(store.read_all("/f").await.unwrap(), b"old");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_create_over_directory_fails() {
        let (_temp, store) = setup().await;
        store.mkdir("/d", 0o755).await.unwrap();
        assert_eq!(
            store.create("/d").await.err().unwrap().kind(),
            ErrorKind::IsADirectory
        );
        assert_eq!(
            store.open("/d").await.err().unwrap().kind(),
            ErrorKind::IsADirectory
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let (_temp, store) = setup().await;
        store.mkdir("/d", 0o755).await.unwrap();
        store.write_all("/d/f", b"1").await.unwrap();

        assert_eq!(
            store.remove("/d").await.unwrap_err().kind(),
            ErrorKind::DirectoryNotEmpty
        );
        store.remove("/d/f").await.unwrap();
        store.remove("/d").await.unwrap();
        assert!(store.remove("/d").await.unwrap_err().is_not_exist());
        assert_eq!(
            store.remove("/").await.unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_parent_dir_cannot_escape_root() {
        let (temp, store) = setup().await;
        store.write_all("/../../escape.txt", b"x").await.unwrap();
        assert!(temp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_positional_reads() {
        let (_temp, store) = setup().await;
        store.write_all("/f", b"0123456789").await.unwrap();
        let r = store.open("/f").await.unwrap();

        let mut buf = [0u8; 4];
        let out = r.read_at(&mut buf, 6).await.unwrap();
        assert_eq!((out.bytes, out.eof), (4, false));
        assert_eq!(&buf, b"6789");

        let out = r.read_at(&mut buf, 8).await.unwrap();
        assert_eq!((out.bytes, out.eof), (2, true));
        assert_eq!(&buf[..2], b"89");
    }

    #[tokio::test]
    async fn test_open_root_requires_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(
            LocalStore::open_root(&file).await.unwrap_err().kind(),
            ErrorKind::NotADirectory
        );
        assert!(
            LocalStore::open_root(temp.path().join("absent"))
                .await
                .unwrap_err()
                .is_not_exist()
        );
    }

    #[tokio::test]
    async fn test_resolve_file_scheme() {
        let temp = TempDir::new().unwrap();
        let mut registry = Registry::new();
        register(&mut registry).unwrap();

        let conn = format!("file://{}", temp.path().display());
        let store = registry.resolve(&conn).await.unwrap();
        assert_eq!(store.scheme(), "file");
        store.write_all("/x", b"1").await.unwrap();
        assert!(temp.path().join("x").exists());
    }
}
