//! In-memory reference backend.
//!
//! Implements the hierarchical contract directly on a sorted map of paths.
//! Used as the conformance oracle and for fast tests. All data is ephemeral.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use crate::constants::{DIR_PERM, FILE_PERM};
use crate::error::{StoreError, StoreResult};
use crate::path::StorePath;
use crate::reader::RangeReader;
use crate::registry::{BackendFactory, ConnectionTarget, Registry};
use crate::store::{ReadHandle, Store, WriteHandle};
use crate::types::EntryMeta;
use crate::writer::{BufferedWriter, Commit};

/// Scheme the memory backend registers under.
pub const SCHEME: &str = "mem";

/// Entry in the memory store.
#[derive(Debug, Clone)]
enum Entry {
    File {
        data: Bytes,
        perm: u32,
        mtime: SystemTime,
    },
    Directory {
        perm: u32,
        mtime: SystemTime,
    },
}

impl Entry {
    fn meta(&self, path: &StorePath) -> EntryMeta {
        match self {
            Entry::File { data, perm, mtime } => {
                EntryMeta::file(path.name(), data.len() as u64, *perm, *mtime)
            }
            Entry::Directory { perm, mtime } => EntryMeta::directory(path.name(), *perm, *mtime),
        }
    }
}

type Entries = BTreeMap<StorePath, Entry>;

/// In-memory store.
///
/// Thread-safe via an internal `RwLock`; clones share the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<RwLock<Entries>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new store holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            StorePath::root(),
            Entry::Directory {
                perm: DIR_PERM,
                mtime: SystemTime::now(),
            },
        );
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// Fail unless the parent of `path` is an existing directory.
    fn check_parent(entries: &Entries, path: &StorePath) -> StoreResult<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        match entries.get(&parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(StoreError::not_a_directory(path.as_str())),
            None => Err(StoreError::not_exist(path.as_str())),
        }
    }

    /// Immediate children of `dir`, in path order.
    fn children<'a>(
        entries: &'a Entries,
        dir: &'a StorePath,
    ) -> impl Iterator<Item = (&'a StorePath, &'a Entry)> + 'a {
        entries
            .iter()
            .filter(move |(p, _)| *p != dir && p.parent().as_ref() == Some(dir))
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        let path = StorePath::new(path);
        let entries = self.entries.read();
        entries
            .get(&path)
            .map(|e| e.meta(&path))
            .ok_or_else(|| StoreError::not_exist(path.as_str()))
    }

    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        let path = StorePath::new(path);
        let entries = self.entries.read();
        match entries.get(&path) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(StoreError::not_a_directory(path.as_str())),
            None => return Err(StoreError::not_exist(path.as_str())),
        }
        Ok(Self::children(&entries, &path)
            .map(|(p, e)| e.meta(p))
            .collect())
    }

    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()> {
        let path = StorePath::new(path);
        let mut entries = self.entries.write();
        Self::check_parent(&entries, &path)?;
        if entries.contains_key(&path) {
            return Err(StoreError::already_exists(path.as_str()));
        }
        entries.insert(
            path,
            Entry::Directory {
                perm,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::permission_denied("cannot remove root"));
        }
        let mut entries = self.entries.write();
        match entries.get(&path) {
            None => return Err(StoreError::not_exist(path.as_str())),
            Some(Entry::Directory { .. }) => {
                if Self::children(&entries, &path).next().is_some() {
                    return Err(StoreError::directory_not_empty(path.as_str()));
                }
            }
            Some(Entry::File { .. }) => {}
        }
        entries.remove(&path);
        Ok(())
    }

    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        let path = StorePath::new(path);
        {
            let entries = self.entries.read();
            Self::check_parent(&entries, &path)?;
            if let Some(Entry::Directory { .. }) = entries.get(&path) {
                return Err(StoreError::is_a_directory(path.as_str()));
            }
        }
        let committer = MemoryCommit {
            entries: Arc::clone(&self.entries),
            path: path.clone(),
        };
        Ok(Box::new(BufferedWriter::new(committer, path.as_str())))
    }

    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        let path = StorePath::new(path);
        let entries = self.entries.read();
        match entries.get(&path) {
            Some(Entry::File { data, .. }) => {
                let snapshot = data.clone();
                let size = snapshot.len() as u64;
                Ok(Box::new(RangeReader::new(snapshot, size, path.as_str())))
            }
            Some(Entry::Directory { .. }) => Err(StoreError::is_a_directory(path.as_str())),
            None => Err(StoreError::not_exist(path.as_str())),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Publishes a finished file into the shared tree.
struct MemoryCommit {
    entries: Arc<RwLock<Entries>>,
    path: StorePath,
}

#[async_trait]
impl Commit for MemoryCommit {
    async fn commit(&self, data: Bytes) -> StoreResult<()> {
        let mut entries = self.entries.write();
        // The tree may have changed since create.
        Self::recheck(&entries, &self.path)?;
        let perm = match entries.get(&self.path) {
            Some(Entry::File { perm, .. }) => *perm,
            _ => FILE_PERM,
        };
        entries.insert(
            self.path.clone(),
            Entry::File {
                data,
                perm,
                mtime: SystemTime::now(),
            },
        );
        Ok(())
    }
}

impl MemoryCommit {
    fn recheck(entries: &Entries, path: &StorePath) -> StoreResult<()> {
        MemoryStore::check_parent(entries, path)?;
        if let Some(Entry::Directory { .. }) = entries.get(path) {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        Ok(())
    }
}

struct MemoryFactory;

#[async_trait]
impl BackendFactory for MemoryFactory {
    fn options(&self) -> &'static [&'static str] {
        &[]
    }

    async fn connect(&self, _target: &ConnectionTarget) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// Register `mem://` with `registry`.
pub fn register(registry: &mut Registry) -> StoreResult<()> {
    registry.register(SCHEME, MemoryFactory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::mkdir_all;

    #[tokio::test]
    async fn test_create_and_read() {
        let fs = MemoryStore::new();
        fs.write_all("/test.txt", b"hello world").await.unwrap();

        let data = fs.read_all("/test.txt").await.unwrap();
        assert_eq!(data, b"hello world");

        let meta = fs.stat("/test.txt").await.unwrap();
        assert_eq!(meta.size, 11);
        assert_eq!(meta.perm, 0o644);
        assert!(meta.is_file());
    }

    #[tokio::test]
    async fn test_mkdir_and_readdir() {
        let fs = MemoryStore::new();
        fs.mkdir("/subdir", 0o755).await.unwrap();
        fs.write_all("/subdir/file.txt", b"x").await.unwrap();
        fs.write_all("/root.txt", b"y").await.unwrap();

        let names: Vec<_> = fs
            .readdir("/")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["root.txt", "subdir"]);

        let sub = fs.readdir("/subdir").await.unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].name, "file.txt");
    }

    #[tokio::test]
    async fn test_mkdir_records_perm() {
        let fs = MemoryStore::new();
        fs.mkdir("/d", 0o700).await.unwrap();
        let meta = fs.stat("/d").await.unwrap();
        assert_eq!(meta.perm, 0o700);
        assert_eq!(meta.size, 4096);
    }

    #[tokio::test]
    async fn test_parent_rules() {
        let fs = MemoryStore::new();
        assert_eq!(
            fs.mkdir("/a/b", 0o755).await.unwrap_err().kind(),
            ErrorKind::NotExist
        );
        assert_eq!(
            fs.create("/a/b").await.err().unwrap().kind(),
            ErrorKind::NotExist
        );
        fs.write_all("/file", b"1").await.unwrap();
        assert_eq!(
            fs.create("/file/child").await.err().unwrap().kind(),
            ErrorKind::NotADirectory
        );
    }

    #[tokio::test]
    async fn test_remove() {
        let fs = MemoryStore::new();
        fs.mkdir("/nonempty", 0o755).await.unwrap();
        fs.write_all("/nonempty/file.txt", b"1").await.unwrap();

        let err = fs.remove("/nonempty").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryNotEmpty);

        fs.remove("/nonempty/file.txt").await.unwrap();
        fs.remove("/nonempty").await.unwrap();
        assert!(fs.stat("/nonempty").await.unwrap_err().is_not_exist());
        assert_eq!(
            fs.remove("/").await.unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[tokio::test]
    async fn test_directory_removed_during_write() {
        let fs = MemoryStore::new();
        fs.mkdir("/tmp", 0o755).await.unwrap();
        let mut w = fs.create("/tmp/f").await.unwrap();
        w.write(b"data").await.unwrap();
        fs.remove("/tmp").await.unwrap();

        assert!(w.close().await.unwrap_err().is_not_exist());
        assert!(fs.stat("/tmp/f").await.unwrap_err().is_not_exist());
    }

    #[tokio::test]
    async fn test_reader_keeps_snapshot() {
        let fs = MemoryStore::new();
        fs.write_all("/f", b"first").await.unwrap();
        let mut r = fs.open("/f").await.unwrap();
        fs.write_all("/f", b"second, longer").await.unwrap();

        assert_eq!(r.size(), 5);
        assert_eq!(r.read_to_end().await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_mkdir_all() {
        let fs = MemoryStore::new();
        mkdir_all(&fs, "/foo/bar/baz/qux/quux/", 0o755).await.unwrap();
        mkdir_all(&fs, "/foo/bar/baz/qux/quux/", 0o755).await.unwrap();

        let entries = fs.readdir("/foo/bar/baz/qux/").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "quux");
    }
}
