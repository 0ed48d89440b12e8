use super::CustomResource;
use crate::error::RuntimeError;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use serde::Deserialize;
use serde_json::{json, Value};

/// `ResourceProperties` of the artifact copy resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyProperties {
    /// Bucket holding the artifact
    pub src_bucket: String,
    /// Key of the artifact
    pub src_key: String,
    /// Bucket to copy to
    pub dst_bucket: String,
    /// Key to copy to
    pub dst_key: String,
}

/// Copy and delete objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy an object, overwriting the destination.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), RuntimeError>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), RuntimeError>;
}

/// S3 client implementation.
pub struct S3Store {
    inner: Client,
}

impl S3Store {
    /// Initialize the S3 client.
    pub fn new(config: &aws_types::SdkConfig) -> S3Store {
        S3Store {
            inner: Client::new(config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    #[tracing::instrument(skip(self))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), RuntimeError> {
        self.inner
            .copy_object()
            .copy_source(format!("{src_bucket}/{src_key}"))
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), RuntimeError> {
        self.inner
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }
}

/// Copies a deployment artifact into the stack's bucket.
pub struct CopyHandler<S> {
    store: S,
}

impl<S: ObjectStore> CopyHandler<S> {
    /// Build the handler.
    pub fn new(store: S) -> Self {
        CopyHandler { store }
    }
}

#[async_trait]
impl<S: ObjectStore> CustomResource for CopyHandler<S> {
    type Properties = CopyProperties;

    async fn apply(&self, properties: CopyProperties) -> Result<Value, RuntimeError> {
        self.store
            .copy(
                &properties.src_bucket,
                &properties.src_key,
                &properties.dst_bucket,
                &properties.dst_key,
            )
            .await?;
        tracing::info!(?properties, "artifact copied");

        Ok(json!({
            "result": "Copy complete",
            "Copy": {
                "S3Bucket": properties.dst_bucket,
                "S3Key": properties.dst_key,
            }
        }))
    }

    async fn remove(&self, properties: CopyProperties) -> Result<(), RuntimeError> {
        self.store
            .delete(&properties.dst_bucket, &properties.dst_key)
            .await?;
        tracing::info!(bucket = %properties.dst_bucket, key = %properties.dst_key, "artifact deleted");
        Ok(())
    }
}
