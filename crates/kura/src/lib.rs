//! # kura
//!
//! Open any supported backend from a connection string and use it through
//! one hierarchical [`Store`] contract.
//!
//! ```no_run
//! # async fn demo() -> kura::StoreResult<()> {
//! let store = kura::open("mem://").await?;
//! store.mkdir("/logs", 0o755).await?;
//! store.write_all("/logs/today.txt", b"hello").await?;
//! assert_eq!(store.read_all("/logs/today.txt").await?, b"hello");
//! # Ok(())
//! # }
//! ```
//!
//! | scheme    | backend                                   |
//! |-----------|-------------------------------------------|
//! | `mem`     | in-memory tree                            |
//! | `file`    | local directory                           |
//! | `s3`      | Amazon S3 (`sse`, `region`, `endpoint`)   |
//! | `gs`      | Google Cloud Storage (`credentialsfile`)  |
//! | `sftp`    | SFTP over SSH (`host_key`, required)      |

use std::sync::Arc;

pub use kura_cloud::{GcsOptions, ObjectStoreFlat, S3Options, ServerSideEncryption};
pub use kura_core::*;
pub use kura_sftp::{SftpStore, SshConfig};

/// A registry with every built-in backend.
pub fn registry() -> StoreResult<Registry> {
    let mut registry = Registry::new();
    kura_core::memory::register(&mut registry)?;
    kura_core::local::register(&mut registry)?;
    kura_cloud::register(&mut registry)?;
    kura_sftp::register(&mut registry)?;
    tracing::debug!(schemes = ?registry.schemes(), "built default registry");
    Ok(registry)
}

/// Resolve `conn` against the built-in backends.
pub async fn open(conn: &str) -> StoreResult<Arc<dyn Store>> {
    registry()?.resolve(conn).await
}
