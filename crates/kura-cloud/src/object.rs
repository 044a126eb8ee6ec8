//! [`FlatStore`] over any `object_store` client.
//!
//! The adapter mounts at a key prefix inside a bucket. Keys handed in by the
//! directory emulator are relative to that prefix; directory markers (keys
//! ending in `/`) are stored under a [`DIR_MARKER`] leaf because object store
//! paths cannot end in a delimiter.

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload, WriteMultipart};
use percent_encoding::percent_decode_str;
use std::ops::Range;
use std::sync::Arc;

use kura_core::{FlatStore, ListPage, ObjectHead, StoreError, StoreResult};

use crate::constants::{DIR_MARKER, MULTIPART_THRESHOLD};

/// A bucket (or bucket prefix) seen as flat keys.
#[derive(Debug, Clone)]
pub struct ObjectStoreFlat {
    store: Arc<dyn ObjectStore>,
    scheme: &'static str,
    prefix: Vec<String>,
}

impl ObjectStoreFlat {
    /// Mount `store` at `prefix` (slash-separated, may be empty).
    pub fn new(store: Arc<dyn ObjectStore>, scheme: &'static str, prefix: &str) -> Self {
        Self {
            store,
            scheme,
            prefix: prefix
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Object path for a relative key.
    fn location(&self, key: &str) -> StoreResult<Path> {
        let segments = checked_segments(key)?;
        let marker = key.ends_with('/').then_some(DIR_MARKER);
        Ok(Path::from_iter(
            self.prefix
                .iter()
                .map(String::as_str)
                .chain(segments)
                .chain(marker),
        ))
    }

    /// Listing prefix for a relative key prefix; `None` lists the whole bucket.
    fn list_prefix(&self, prefix: &str) -> StoreResult<Option<Path>> {
        let segments = checked_segments(prefix)?;
        let path = Path::from_iter(self.prefix.iter().map(String::as_str).chain(segments));
        Ok((!path.as_ref().is_empty()).then_some(path))
    }

    /// Relative key for an object path, or `None` if it lies outside the mount.
    fn key_of(&self, location: &Path) -> Option<String> {
        let mut parts = location.parts();
        for expected in &self.prefix {
            let part = parts.next()?;
            if percent_decode_str(part.as_ref()).decode_utf8_lossy() != expected.as_str() {
                return None;
            }
        }
        let segments: Vec<String> = parts
            .map(|p| percent_decode_str(p.as_ref()).decode_utf8_lossy().into_owned())
            .collect();
        match segments.split_last() {
            Some((last, dirs)) if last == DIR_MARKER => Some(
                dirs.iter()
                    .map(|d| format!("{d}/"))
                    .collect::<String>(),
            ),
            Some(_) => Some(segments.join("/")),
            None => None,
        }
    }

    /// Whether a listed empty object is a `dir/` marker written by another
    /// client.
    ///
    /// Listing strips the trailing delimiter, so the marker for `a/b/` shows
    /// up as `a/b`, and a head request for `a/b` then misses.
    async fn is_native_marker(&self, location: &Path) -> StoreResult<bool> {
        match self.store.head(location).await {
            Ok(_) => Ok(false),
            Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(map_err(e, location.as_ref())),
        }
    }

    async fn head_of(&self, meta: &ObjectMeta) -> StoreResult<Option<ObjectHead>> {
        let Some(mut key) = self.key_of(&meta.location) else {
            return Ok(None);
        };
        if meta.size == 0 && !key.ends_with('/') && self.is_native_marker(&meta.location).await? {
            key.push('/');
        }
        Ok(Some(ObjectHead {
            key,
            size: meta.size,
            modified: meta.last_modified.into(),
        }))
    }
}

/// Split a relative key into segments, refusing the reserved marker name.
fn checked_segments(key: &str) -> StoreResult<Vec<&str>> {
    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    if segments.contains(&DIR_MARKER) {
        return Err(StoreError::invalid_input(format!(
            "{key}: {DIR_MARKER} is a reserved name"
        )));
    }
    Ok(segments)
}

/// Map client errors into the shared taxonomy.
fn map_err(err: object_store::Error, key: &str) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::not_exist(key),
        object_store::Error::AlreadyExists { .. } => StoreError::already_exists(key),
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => StoreError::permission_denied(key),
        other => StoreError::backend(other),
    }
}

#[async_trait]
impl FlatStore for ObjectStoreFlat {
    fn scheme(&self) -> &'static str {
        self.scheme
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let location = self.location(key)?;
        if data.len() > MULTIPART_THRESHOLD {
            tracing::debug!(%location, bytes = data.len(), "multipart upload");
            let upload = self
                .store
                .put_multipart(&location)
                .await
                .map_err(|e| map_err(e, key))?;
            let mut writer = WriteMultipart::new(upload);
            writer.put(data);
            writer.finish().await.map_err(|e| map_err(e, key))?;
        } else {
            self.store
                .put(&location, PutPayload::from(data))
                .await
                .map_err(|e| map_err(e, key))?;
        }
        Ok(())
    }

    async fn get_range(&self, key: &str, range: Range<u64>) -> StoreResult<Bytes> {
        self.store
            .get_range(&self.location(key)?, range)
            .await
            .map_err(|e| map_err(e, key))
    }

    async fn head(&self, key: &str) -> StoreResult<Option<ObjectHead>> {
        match self.store.head(&self.location(key)?).await {
            Ok(meta) => Ok(Some(ObjectHead {
                key: key.to_string(),
                size: meta.size,
                modified: meta.last_modified.into(),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(map_err(e, key)),
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
        limit: usize,
    ) -> StoreResult<ListPage> {
        let list_prefix = self.list_prefix(prefix)?;
        let mut stream = match continuation {
            Some(after) => {
                let offset = Path::parse(after).map_err(|e| {
                    StoreError::invalid_input(format!("bad listing continuation: {e}"))
                })?;
                self.store.list_with_offset(list_prefix.as_ref(), &offset)
            }
            None => self.store.list(list_prefix.as_ref()),
        };

        let mut page = ListPage::default();
        let mut fetched = 0;
        let mut last = None;
        while fetched < limit {
            let Some(meta) = stream.try_next().await.map_err(|e| map_err(e, prefix))? else {
                break;
            };
            // Resuming after a native marker `a/b` yields its `a/b/` key again.
            if continuation.is_some_and(|after| meta.location.as_ref() == after) {
                continue;
            }
            fetched += 1;
            last = Some(meta.location.to_string());
            if let Some(head) = self.head_of(&meta).await? {
                page.objects.push(head);
            }
        }
        if fetched == limit {
            page.next = last;
        }

        tracing::debug!(prefix, objects = page.objects.len(), more = page.next.is_some(), "list page");
        Ok(page)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match self.store.delete(&self.location(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(e) => return Err(map_err(e, key)),
        }
        if key.ends_with('/') {
            // A native `dir/` marker has no object_store path, so it cannot be
            // deleted here. Listing the directory shows it as its own path.
            let dir = self.location(key.trim_end_matches('/'))?;
            let first = self
                .store
                .list(Some(&dir))
                .try_next()
                .await
                .map_err(|e| map_err(e, key))?;
            if first.is_some_and(|meta| meta.location == dir) {
                return Err(StoreError::unsupported(format!(
                    "{key}: directory marker written by another client cannot be removed"
                )));
            }
        }
        Ok(())
    }
}
