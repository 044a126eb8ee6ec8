//! Position-independent reads over a byte-range fetch primitive.
//!
//! [`ReadCursor`] holds the whole read state as a small pure state machine;
//! [`RangeReader`] drives it against any [`RangeFetch`] transport.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::SeekFrom;
use std::ops::Range;

use crate::error::{StoreError, StoreResult};
use crate::store::ReadHandle;
use crate::types::ReadOutcome;

/// What a read should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Fetch this byte range (possibly empty).
    Fetch(Range<u64>),
    /// Nothing left at this offset.
    EndOfData,
}

/// Cursor state for one read handle.
///
/// The size is fixed at construction; growth of the underlying object after
/// that is not observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadCursor {
    pos: u64,
    size: u64,
    eof_signaled: bool,
}

impl ReadCursor {
    pub fn new(size: u64) -> Self {
        Self {
            pos: 0,
            size,
            eof_signaled: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the last sequential read reported end-of-data.
    pub fn eof_signaled(&self) -> bool {
        self.eof_signaled
    }

    /// Plan a sequential read of up to `len` bytes from the cursor.
    pub fn plan_read(&self, len: usize) -> ReadPlan {
        Self::plan(self.size, self.pos, len)
    }

    /// Plan a positional read of up to `len` bytes at `offset`.
    pub fn plan_read_at(&self, offset: u64, len: usize) -> ReadPlan {
        Self::plan(self.size, offset, len)
    }

    fn plan(size: u64, offset: u64, len: usize) -> ReadPlan {
        if offset >= size {
            return ReadPlan::EndOfData;
        }
        let end = offset.saturating_add(len as u64).min(size);
        ReadPlan::Fetch(offset..end)
    }

    /// Record a sequential read that delivered `n` bytes.
    pub fn advance(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n as u64);
        self.eof_signaled = false;
    }

    /// Record that a sequential read reported end-of-data.
    pub fn signal_eof(&mut self) {
        self.eof_signaled = true;
    }

    /// Reposition the cursor. Positions before zero are rejected.
    pub fn seek(&mut self, pos: SeekFrom) -> StoreResult<u64> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(self.pos) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };
        let target = u64::try_from(target).map_err(|_| {
            StoreError::invalid_input(format!("seek to negative position {target}"))
        })?;
        self.pos = target;
        self.eof_signaled = false;
        Ok(target)
    }
}

/// Random-access byte-range fetch primitive.
#[async_trait]
pub trait RangeFetch: Send + Sync {
    /// Fetch `range`, which the reader has already clamped to the known size.
    async fn fetch(&self, range: Range<u64>) -> StoreResult<Bytes>;

    /// Release transport resources held for this reader.
    async fn release(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Fetch from an in-memory snapshot.
#[async_trait]
impl RangeFetch for Bytes {
    async fn fetch(&self, range: Range<u64>) -> StoreResult<Bytes> {
        let len = self.len() as u64;
        let start = range.start.min(len) as usize;
        let end = range.end.min(len) as usize;
        Ok(self.slice(start..end))
    }
}

/// A [`ReadHandle`] over any [`RangeFetch`].
pub struct RangeReader<F> {
    fetcher: F,
    cursor: ReadCursor,
    path: String,
    closed: bool,
}

impl<F: RangeFetch> RangeReader<F> {
    pub fn new(fetcher: F, size: u64, path: impl Into<String>) -> Self {
        Self {
            fetcher,
            cursor: ReadCursor::new(size),
            path: path.into(),
            closed: false,
        }
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed(self.path.clone()))
        } else {
            Ok(())
        }
    }

    async fn fetch_into(&self, range: Range<u64>, buf: &mut [u8]) -> StoreResult<usize> {
        if range.is_empty() {
            return Ok(0);
        }
        let data = self.fetcher.fetch(range).await?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

#[async_trait]
impl<F: RangeFetch> ReadHandle for RangeReader<F> {
    async fn read(&mut self, buf: &mut [u8]) -> StoreResult<ReadOutcome> {
        self.check_open()?;
        match self.cursor.plan_read(buf.len()) {
            ReadPlan::EndOfData => {
                self.cursor.signal_eof();
                Ok(ReadOutcome::end_of_data(0))
            }
            ReadPlan::Fetch(range) => {
                let wanted = range.end - range.start;
                let n = self.fetch_into(range, buf).await?;
                if n == 0 && wanted > 0 {
                    // Object shrank underneath us.
                    self.cursor.signal_eof();
                    return Ok(ReadOutcome::end_of_data(0));
                }
                self.cursor.advance(n);
                Ok(ReadOutcome::data(n))
            }
        }
    }

    async fn read_at(&self, buf: &mut [u8], offset: u64) -> StoreResult<ReadOutcome> {
        self.check_open()?;
        match self.cursor.plan_read_at(offset, buf.len()) {
            ReadPlan::EndOfData => Ok(ReadOutcome {
                bytes: 0,
                eof: !buf.is_empty(),
            }),
            ReadPlan::Fetch(range) => {
                let n = self.fetch_into(range, buf).await?;
                Ok(ReadOutcome {
                    bytes: n,
                    eof: n < buf.len(),
                })
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> StoreResult<u64> {
        self.check_open()?;
        self.cursor.seek(pos)
    }

    fn size(&self) -> u64 {
        self.cursor.size()
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.check_open()?;
        self.closed = true;
        self.fetcher.release().await
    }
}
