//! # kura-cloud
//!
//! Object storage backends for kura. Both schemes go through the same
//! [`ObjectStoreFlat`] adapter, wrapped in the directory emulator from
//! `kura-core`:
//!
//! - `s3://bucket/prefix` - Amazon S3 and compatible services
//! - `gs://bucket/prefix` - Google Cloud Storage

pub mod constants;
pub mod gcs;
mod object;
pub mod s3;

pub use gcs::GcsOptions;
pub use object::ObjectStoreFlat;
pub use s3::{S3Options, ServerSideEncryption};

use kura_core::{Registry, StoreResult};

/// Register every cloud scheme with `registry`.
pub fn register(registry: &mut Registry) -> StoreResult<()> {
    s3::register(registry)?;
    gcs::register(registry)
}
