//! Hierarchical semantics over flat key/blob stores.
//!
//! A flat backend only needs to provide the [`FlatStore`] primitives; wrapping
//! it in [`FlatFs`] yields a full [`Store`].
//!
//! ## Key layout
//!
//! A store path `/a/b` maps to the key `a/b` (relative to whatever prefix the
//! adapter mounts at). A directory exists when its marker key `a/b/` exists,
//! or when any key starts with `a/b/`. Both forms behave identically under
//! stat, readdir and remove.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::SystemTime;

use crate::constants::{DEFAULT_PAGE_SIZE, DIR_PERM, FILE_PERM};
use crate::error::{StoreError, StoreResult};
use crate::path::StorePath;
use crate::reader::{RangeFetch, RangeReader};
use crate::store::{ReadHandle, Store, WriteHandle};
use crate::types::EntryMeta;
use crate::writer::{BufferedWriter, Commit};

/// Size and modification time of one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectHead {
    pub key: String,
    pub size: u64,
    pub modified: SystemTime,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in the backend's native key order.
    pub objects: Vec<ObjectHead>,
    /// Continuation for the next page; `None` on the last page.
    pub next: Option<String>,
}

/// Primitive operations of a flat backend.
///
/// Each call is a single round trip. Keys never start with `/`; directory
/// markers end with `/`.
#[async_trait]
pub trait FlatStore: Send + Sync + 'static {
    fn scheme(&self) -> &'static str;

    /// Store `data` at `key`, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Fetch a byte range of the object at `key`.
    async fn get_range(&self, key: &str, range: Range<u64>) -> StoreResult<Bytes>;

    /// Metadata for `key`, or `None` if there is no such object.
    async fn head(&self, key: &str) -> StoreResult<Option<ObjectHead>>;

    /// Up to `limit` keys starting with `prefix`, resuming after `continuation`.
    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage>;

    /// Delete the object at `key`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Release connections held by the backend client.
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// What a path resolves to on a flat backend.
#[derive(Debug)]
enum Resolved {
    File(ObjectHead),
    Directory,
    Missing,
}

fn file_key(path: &StorePath) -> String {
    path.relative().to_string()
}

fn dir_prefix(path: &StorePath) -> String {
    if path.is_root() {
        String::new()
    } else {
        format!("{}/", path.relative())
    }
}

/// Directory emulation over a [`FlatStore`].
pub struct FlatFs<F> {
    flat: Arc<F>,
    page_size: usize,
}

impl<F: FlatStore> FlatFs<F> {
    pub fn new(flat: F) -> Self {
        Self {
            flat: Arc::new(flat),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Override the listing page size (mostly useful in tests).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn flat(&self) -> &F {
        &self.flat
    }

    async fn resolve(&self, path: &StorePath) -> StoreResult<Resolved> {
        resolve(&*self.flat, path).await
    }

    /// Whether any key other than the directory's own marker lives under it.
    async fn has_children(&self, path: &StorePath) -> StoreResult<bool> {
        let prefix = dir_prefix(path);
        let page = self.flat.list_page(&prefix, None, 2).await?;
        Ok(page.objects.iter().any(|o| o.key != prefix))
    }
}

/// Whether any key, marker included, starts with `path`'s directory prefix.
async fn prefix_in_use<F: FlatStore>(flat: &F, path: &StorePath) -> StoreResult<bool> {
    let first = flat.list_page(&dir_prefix(path), None, 1).await?;
    Ok(!first.objects.is_empty())
}

async fn resolve<F: FlatStore>(flat: &F, path: &StorePath) -> StoreResult<Resolved> {
    if path.is_root() {
        return Ok(Resolved::Directory);
    }
    if let Some(head) = flat.head(&file_key(path)).await? {
        // A zero-byte object that also prefixes other keys is a marker
        // written without its trailing slash.
        if head.size > 0 || !prefix_in_use(flat, path).await? {
            return Ok(Resolved::File(head));
        }
        return Ok(Resolved::Directory);
    }
    if prefix_in_use(flat, path).await? {
        Ok(Resolved::Directory)
    } else {
        Ok(Resolved::Missing)
    }
}

/// Fail unless `path`'s parent is an existing directory.
async fn require_parent_dir<F: FlatStore>(flat: &F, path: &StorePath) -> StoreResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    match resolve(flat, &parent).await? {
        Resolved::Directory => Ok(()),
        Resolved::File(_) => Err(StoreError::not_a_directory(path.as_str())),
        Resolved::Missing => Err(StoreError::not_exist(path.as_str())),
    }
}

#[async_trait]
impl<F: FlatStore> Store for FlatFs<F> {
    fn scheme(&self) -> &'static str {
        self.flat.scheme()
    }

    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        let path = StorePath::new(path);
        match self.resolve(&path).await? {
            Resolved::File(head) => Ok(EntryMeta::file(
                path.name(),
                head.size,
                FILE_PERM,
                head.modified,
            )),
            Resolved::Directory => Ok(EntryMeta::synthetic_directory(path.name())),
            Resolved::Missing => Err(StoreError::not_exist(path.as_str())),
        }
    }

    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        let path = StorePath::new(path);
        match self.resolve(&path).await? {
            Resolved::Directory => {}
            Resolved::File(_) => return Err(StoreError::not_a_directory(path.as_str())),
            Resolved::Missing => return Err(StoreError::not_exist(path.as_str())),
        }

        let prefix = dir_prefix(&path);
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<EntryMeta> = Vec::new();
        let mut continuation: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .flat
                .list_page(&prefix, continuation.as_deref(), self.page_size)
                .await?;
            pages += 1;

            for object in page.objects {
                let Some(rest) = object.key.strip_prefix(prefix.as_str()) else {
                    continue;
                };
                let (name, is_dir) = match rest.find('/') {
                    Some(idx) => (&rest[..idx], true),
                    None => (rest, false),
                };
                // Empty name: the directory's own marker.
                if name.is_empty() {
                    continue;
                }
                let entry = if is_dir {
                    EntryMeta::directory(name, DIR_PERM, SystemTime::UNIX_EPOCH)
                } else {
                    EntryMeta::file(name, object.size, FILE_PERM, object.modified)
                };
                match seen.get(name) {
                    None => {
                        seen.insert(name.to_string(), entries.len());
                        entries.push(entry);
                    }
                    // Same rule as stat: an empty object with descendants is
                    // a directory, a non-empty one stays a file.
                    Some(&at) => {
                        let current = &entries[at];
                        let upgrade = current.is_file() && current.size == 0 && entry.is_dir();
                        let downgrade = current.is_dir() && entry.is_file() && entry.size > 0;
                        if upgrade || downgrade {
                            entries[at] = entry;
                        }
                    }
                }
            }

            match page.next {
                Some(next) => continuation = Some(next),
                None => break,
            }
        }

        tracing::debug!(path = %path, pages, entries = entries.len(), "readdir");
        Ok(entries)
    }

    async fn mkdir(&self, path: &str, _perm: u32) -> StoreResult<()> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::already_exists(path.as_str()));
        }
        require_parent_dir(&*self.flat, &path).await?;
        if !matches!(self.resolve(&path).await?, Resolved::Missing) {
            return Err(StoreError::already_exists(path.as_str()));
        }
        self.flat.put(&dir_prefix(&path), Bytes::new()).await
    }

    async fn remove(&self, path: &str) -> StoreResult<()> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::permission_denied("cannot remove root"));
        }
        match self.resolve(&path).await? {
            Resolved::Missing => Err(StoreError::not_exist(path.as_str())),
            Resolved::File(_) => self.flat.delete(&file_key(&path)).await,
            Resolved::Directory => {
                if self.has_children(&path).await? {
                    return Err(StoreError::directory_not_empty(path.as_str()));
                }
                self.flat.delete(&dir_prefix(&path)).await
            }
        }
    }

    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        let path = StorePath::new(path);
        if path.is_root() {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        require_parent_dir(&*self.flat, &path).await?;
        if matches!(self.resolve(&path).await?, Resolved::Directory) {
            return Err(StoreError::is_a_directory(path.as_str()));
        }
        let committer = FlatCommit {
            flat: Arc::clone(&self.flat),
            path: path.clone(),
        };
        Ok(Box::new(BufferedWriter::new(committer, path.as_str())))
    }

    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        let path = StorePath::new(path);
        match self.resolve(&path).await? {
            Resolved::File(head) => {
                let fetcher = FlatRange {
                    flat: Arc::clone(&self.flat),
                    key: head.key.clone(),
                };
                Ok(Box::new(RangeReader::new(fetcher, head.size, path.as_str())))
            }
            Resolved::Directory => Err(StoreError::is_a_directory(path.as_str())),
            Resolved::Missing => Err(StoreError::not_exist(path.as_str())),
        }
    }

    async fn close(&self) -> StoreResult<()> {
        self.flat.close().await
    }
}

/// Ranged gets against one key.
struct FlatRange<F> {
    flat: Arc<F>,
    key: String,
}

#[async_trait]
impl<F: FlatStore> RangeFetch for FlatRange<F> {
    async fn fetch(&self, range: Range<u64>) -> StoreResult<Bytes> {
        self.flat.get_range(&self.key, range).await
    }
}

/// Single put of the finished object.
struct FlatCommit<F> {
    flat: Arc<F>,
    path: StorePath,
}

#[async_trait]
impl<F: FlatStore> Commit for FlatCommit<F> {
    async fn commit(&self, data: Bytes) -> StoreResult<()> {
        // The tree may have changed since create.
        require_parent_dir(&*self.flat, &self.path).await?;
        if let Resolved::Directory = resolve(&*self.flat, &self.path).await? {
            return Err(StoreError::is_a_directory(self.path.as_str()));
        }
        self.flat.put(&file_key(&self.path), data).await
    }
}
