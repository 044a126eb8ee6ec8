//! Buffered writes committed atomically on close.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::{StoreError, StoreResult};
use crate::store::WriteHandle;

/// Publishes a complete object in one step.
#[async_trait]
pub trait Commit: Send + Sync {
    /// Replace the target's content with `data`.
    async fn commit(&self, data: Bytes) -> StoreResult<()>;
}

/// A [`WriteHandle`] that accumulates bytes and hands them to a [`Commit`]
/// when closed.
///
/// Dropping the writer without closing discards the pending bytes; nothing is
/// ever partially visible.
pub struct BufferedWriter<C> {
    committer: C,
    buf: BytesMut,
    path: String,
    closed: bool,
}

impl<C: Commit> BufferedWriter<C> {
    pub fn new(committer: C, path: impl Into<String>) -> Self {
        Self {
            committer,
            buf: BytesMut::new(),
            path: path.into(),
            closed: false,
        }
    }

    /// Bytes written so far and not yet committed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[async_trait]
impl<C: Commit> WriteHandle for BufferedWriter<C> {
    async fn write(&mut self, buf: &[u8]) -> StoreResult<usize> {
        if self.closed {
            return Err(StoreError::Closed(self.path.clone()));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn close(&mut self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed(self.path.clone()));
        }
        self.closed = true;
        let data = std::mem::take(&mut self.buf).freeze();
        tracing::debug!(path = %self.path, bytes = data.len(), "committing buffered write");
        self.committer.commit(data).await
    }
}

impl<C> Drop for BufferedWriter<C> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::debug!(
                path = %self.path,
                bytes = self.buf.len(),
                "discarding uncommitted write"
            );
        }
    }
}
