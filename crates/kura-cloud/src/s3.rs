//! `s3://bucket/prefix` backend.
//!
//! Credentials and the default region come from the environment
//! (`AWS_ACCESS_KEY_ID`, `AWS_REGION`, ...), as the AWS tooling expects.
//!
//! Options:
//!
//! | key        | values                               |
//! |------------|--------------------------------------|
//! | `sse`      | `AES256`, `aws:kms`, `aws:kms:dsse`  |
//! | `region`   | AWS region, overrides the environment |
//! | `endpoint` | custom endpoint (MinIO, LocalStack)  |

use async_trait::async_trait;
use object_store::aws::{AmazonS3Builder, AmazonS3ConfigKey};
use std::str::FromStr;
use std::sync::Arc;

use kura_core::{
    BackendFactory, ConnectionTarget, FlatFs, Registry, Store, StoreError, StoreResult,
};

use crate::object::ObjectStoreFlat;

/// Scheme the S3 backend registers under.
pub const SCHEME: &str = "s3";

/// `object_store` configuration key selecting the SSE algorithm.
const SSE_CONFIG_KEY: &str = "aws_server_side_encryption";

/// Server-side encryption applied to every object written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSideEncryption {
    /// S3-managed keys.
    Aes256,
    /// KMS-managed keys.
    Kms,
    /// Dual-layer KMS encryption.
    KmsDsse,
}

impl ServerSideEncryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256 => "AES256",
            Self::Kms => "aws:kms",
            Self::KmsDsse => "aws:kms:dsse",
        }
    }
}

impl FromStr for ServerSideEncryption {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AES256" => Ok(Self::Aes256),
            "aws:kms" => Ok(Self::Kms),
            "aws:kms:dsse" => Ok(Self::KmsDsse),
            other => Err(StoreError::invalid_input(format!(
                "unknown server-side encryption {other:?}"
            ))),
        }
    }
}

/// Parsed `s3://` settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Options {
    pub bucket: String,
    pub prefix: String,
    pub sse: Option<ServerSideEncryption>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

impl S3Options {
    pub fn from_target(target: &ConnectionTarget) -> StoreResult<Self> {
        Ok(Self {
            bucket: target.require_host()?.to_string(),
            prefix: target.root_prefix().to_string(),
            sse: target.option("sse").map(str::parse).transpose()?,
            region: target.option("region").map(str::to_string),
            endpoint: target.option("endpoint").map(str::to_string),
        })
    }

    fn builder(&self) -> StoreResult<AmazonS3Builder> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&self.bucket);
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(sse) = self.sse {
            let key = AmazonS3ConfigKey::from_str(SSE_CONFIG_KEY)
                .map_err(|e| StoreError::invalid_input(e.to_string()))?;
            builder = builder.with_config(key, sse.as_str());
        }
        Ok(builder)
    }
}

/// Build the S3 store described by `options`. No network traffic happens here.
pub fn connect(options: &S3Options) -> StoreResult<FlatFs<ObjectStoreFlat>> {
    let client = options
        .builder()?
        .build()
        .map_err(|e| StoreError::connection_failed(format!("s3://{}: {e}", options.bucket)))?;
    tracing::info!(bucket = %options.bucket, prefix = %options.prefix, sse = ?options.sse, "s3 store ready");
    Ok(FlatFs::new(ObjectStoreFlat::new(
        Arc::new(client),
        SCHEME,
        &options.prefix,
    )))
}

struct S3Factory;

#[async_trait]
impl BackendFactory for S3Factory {
    fn options(&self) -> &'static [&'static str] {
        &["sse", "region", "endpoint"]
    }

    async fn connect(&self, target: &ConnectionTarget) -> StoreResult<Arc<dyn Store>> {
        let options = S3Options::from_target(target)?;
        Ok(Arc::new(connect(&options)?))
    }
}

/// Register `s3://` with `registry`.
pub fn register(registry: &mut Registry) -> StoreResult<()> {
    registry.register(SCHEME, S3Factory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kura_core::ErrorKind;

    #[test]
    fn test_options_from_connection_string() {
        let target = ConnectionTarget::parse(
            "s3://logs/archive/2024/?sse=aws:kms&region=eu-west-1&endpoint=http://localhost:9000",
        )
        .unwrap();
        let options = S3Options::from_target(&target).unwrap();
        assert_eq!(options.bucket, "logs");
        assert_eq!(options.prefix, "archive/2024");
        assert_eq!(options.sse, Some(ServerSideEncryption::Kms));
        assert_eq!(options.region.as_deref(), Some("eu-west-1"));
        assert_eq!(options.endpoint.as_deref(), Some("http://localhost:9000"));
    }

    #[test]
    fn test_sse_values() {
        for sse in [
            ServerSideEncryption::Aes256,
            ServerSideEncryption::Kms,
            ServerSideEncryption::KmsDsse,
        ] {
            assert_eq!(sse.as_str().parse::<ServerSideEncryption>().unwrap(), sse);
        }
        assert_eq!(
            "rot13".parse::<ServerSideEncryption>().unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_sse_reaches_builder_config() {
        let target = ConnectionTarget::parse("s3://bucket/?sse=aws:kms:dsse").unwrap();
        let builder = S3Options::from_target(&target).unwrap().builder().unwrap();
        let key = AmazonS3ConfigKey::from_str(SSE_CONFIG_KEY).unwrap();
        assert_eq!(builder.get_config_value(&key).as_deref(), Some("aws:kms:dsse"));

        let target = ConnectionTarget::parse("s3://bucket/?sse=AES256").unwrap();
        let builder = S3Options::from_target(&target).unwrap().builder().unwrap();
        assert_eq!(builder.get_config_value(&key).as_deref(), Some("AES256"));
    }

    #[test]
    fn test_bucket_required() {
        let target = ConnectionTarget::parse("s3:///only/a/path").unwrap();
        assert_eq!(
            S3Options::from_target(&target).unwrap_err().kind(),
            ErrorKind::InvalidInput
        );
    }

    #[tokio::test]
    async fn test_registry_rejects_unknown_option() {
        let mut registry = Registry::new();
        register(&mut registry).unwrap();
        let err = registry.resolve("s3://bucket/?acl=public").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }
}
