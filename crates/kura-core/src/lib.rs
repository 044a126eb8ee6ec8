//! # kura-core
//!
//! One hierarchical file contract over very different storage backends.
//!
//! Key components:
//!
//! - [`Store`] - stat, readdir, mkdir, remove, create and open
//! - [`ReadHandle`] / [`WriteHandle`] - cursor reads, positional reads,
//!   buffered writes that become visible atomically on close
//! - [`FlatFs`] - directory semantics over any flat key/blob [`FlatStore`]
//! - [`Registry`] - connection string → live store
//! - [`MemoryStore`] and [`LocalStore`] - reference backends
//!
//! ## Design Decisions
//!
//! - **Paths, not handles, for metadata**: every metadata call takes a
//!   normalized absolute path.
//! - **End-of-data is not an error**: reads return [`ReadOutcome`] so a single
//!   call can deliver bytes and signal the end at once.
//! - **Explicit registry**: backends are registered by the caller, never as a
//!   side effect of linking.

pub mod constants;
mod error;
pub mod flat;
pub mod local;
pub mod memory;
mod path;
pub mod reader;
pub mod registry;
mod store;
mod traced;
mod types;
pub mod writer;

pub use error::{BoxError, ErrorKind, StoreError, StoreResult};
pub use flat::{FlatFs, FlatStore, ListPage, ObjectHead};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use path::StorePath;
pub use reader::{RangeFetch, RangeReader, ReadCursor, ReadPlan};
pub use registry::{BackendFactory, ConnectionTarget, Registry};
pub use store::{ReadHandle, Store, WriteHandle, mkdir_all};
pub use traced::TracedStore;
pub use types::{EntryMeta, FileType, ReadOutcome};
pub use writer::{BufferedWriter, Commit};
