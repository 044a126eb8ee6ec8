//! Call tracing for any store.
//!
//! [`TracedStore`] forwards every operation unchanged and records it in a
//! `tracing` span with an event before the call and one after it. Useful for
//! diagnosing what a backend was asked to do when a test or transfer fails.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::store::{ReadHandle, Store, WriteHandle};
use crate::types::EntryMeta;

/// A store wrapper that logs each call.
#[derive(Debug, Clone)]
pub struct TracedStore<S> {
    inner: S,
}

impl<S: Store> TracedStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn after<T>(result: StoreResult<T>) -> StoreResult<T> {
    match &result {
        Ok(_) => tracing::debug!("after: ok"),
        Err(e) => tracing::debug!(error = %e, "after: failed"),
    }
    result
}

#[async_trait]
impl<S: Store> Store for TracedStore<S> {
    fn scheme(&self) -> &'static str {
        self.inner.scheme()
    }

    #[tracing::instrument(skip(self), name = "store.stat")]
    async fn stat(&self, path: &str) -> StoreResult<EntryMeta> {
        tracing::debug!("before");
        after(self.inner.stat(path).await)
    }

    #[tracing::instrument(skip(self), name = "store.readdir")]
    async fn readdir(&self, path: &str) -> StoreResult<Vec<EntryMeta>> {
        tracing::debug!("before");
        let result = self.inner.readdir(path).await;
        if let Ok(entries) = &result {
            tracing::debug!(count = entries.len(), "listed");
        }
        after(result)
    }

    #[tracing::instrument(skip(self, perm), name = "store.mkdir", fields(perm = %format!("{perm:o}")))]
    async fn mkdir(&self, path: &str, perm: u32) -> StoreResult<()> {
        tracing::debug!("before");
        after(self.inner.mkdir(path, perm).await)
    }

    #[tracing::instrument(skip(self), name = "store.remove")]
    async fn remove(&self, path: &str) -> StoreResult<()> {
        tracing::debug!("before");
        after(self.inner.remove(path).await)
    }

    #[tracing::instrument(skip(self), name = "store.create")]
    async fn create(&self, path: &str) -> StoreResult<Box<dyn WriteHandle>> {
        tracing::debug!("before");
        after(self.inner.create(path).await)
    }

    #[tracing::instrument(skip(self), name = "store.open")]
    async fn open(&self, path: &str) -> StoreResult<Box<dyn ReadHandle>> {
        tracing::debug!("before");
        after(self.inner.open(path).await)
    }

    #[tracing::instrument(skip(self), name = "store.close")]
    async fn close(&self) -> StoreResult<()> {
        tracing::debug!("before");
        after(self.inner.close().await)
    }
}
