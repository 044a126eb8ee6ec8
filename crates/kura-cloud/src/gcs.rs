//! `gs://bucket/prefix` backend.
//!
//! Without `credentialsfile`, credentials come from the environment
//! (`GOOGLE_SERVICE_ACCOUNT`, `GOOGLE_APPLICATION_CREDENTIALS`, ...).

use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use std::sync::Arc;

use kura_core::{
    BackendFactory, ConnectionTarget, FlatFs, Registry, Store, StoreError, StoreResult,
};

use crate::object::ObjectStoreFlat;

/// Scheme the GCS backend registers under.
pub const SCHEME: &str = "gs";

/// Parsed `gs://` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsOptions {
    pub bucket: String,
    pub prefix: String,
    /// Path to a service account JSON key.
    pub credentials_file: Option<String>,
}

impl GcsOptions {
    pub fn from_target(target: &ConnectionTarget) -> StoreResult<Self> {
        Ok(Self {
            bucket: target.require_host()?.to_string(),
            prefix: target.root_prefix().to_string(),
            credentials_file: target.option("credentialsfile").map(str::to_string),
        })
    }
}

/// Build the GCS store described by `options`.
pub fn connect(options: &GcsOptions) -> StoreResult<FlatFs<ObjectStoreFlat>> {
    let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(&options.bucket);
    if let Some(path) = &options.credentials_file {
        builder = builder.with_service_account_path(path);
    }
    let client = builder
        .build()
        .map_err(|e| StoreError::connection_failed(format!("gs://{}: {e}", options.bucket)))?;
    tracing::info!(bucket = %options.bucket, prefix = %options.prefix, "gcs store ready");
    Ok(FlatFs::new(ObjectStoreFlat::new(
        Arc::new(client),
        SCHEME,
        &options.prefix,
    )))
}

struct GcsFactory;

#[async_trait]
impl BackendFactory for GcsFactory {
    fn options(&self) -> &'static [&'static str] {
        &["credentialsfile"]
    }

    async fn connect(&self, target: &ConnectionTarget) -> StoreResult<Arc<dyn Store>> {
        let options = GcsOptions::from_target(target)?;
        Ok(Arc::new(connect(&options)?))
    }
}

/// Register `gs://` with `registry`.
pub fn register(registry: &mut Registry) -> StoreResult<()> {
    registry.register(SCHEME, GcsFactory)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_connection_string() {
        let target =
            ConnectionTarget::parse("gs://media/?credentialsfile=/etc/keys/sa.json").unwrap();
        let options = GcsOptions::from_target(&target).unwrap();
        assert_eq!(options.bucket, "media");
        assert_eq!(options.prefix, "");
        assert_eq!(options.credentials_file.as_deref(), Some("/etc/keys/sa.json"));
    }

    #[tokio::test]
    async fn test_missing_credentials_file_fails_to_connect() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        let err = registry
            .resolve("gs://media/?credentialsfile=/nonexistent/kura-sa.json")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), kura_core::ErrorKind::ConnectionFailed);
    }
}
