//! S3-compatible object-storage wrapper used by job handlers to upload
//! rendered output and mint signed download URLs.
//!
//! Mirrors the shape of this codebase's other S3 wrappers (`common/s3`,
//! `capture`'s `s3_client`): a thin client plus a narrow trait so handler
//! tests can swap in a mock without touching AWS.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsClient;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "mock-client")]
use mockall::automock;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store operation cancelled")]
    Cancelled,
    #[error("object store request failed: {0}")]
    RequestFailed(String),
    #[error("failed to build a presigned url: {0}")]
    PresignFailed(String),
}

/// Connection details for the target bucket. Credentials are held only long
/// enough to build the SDK client; never logged, never `Debug`-derived here.
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
}

/// Operations the PDF handler (and any future handler) needs against
/// object storage. Narrow on purpose so it's trivially mockable.
#[async_trait]
#[cfg_attr(feature = "mock-client", automock)]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cancel: CancellationToken,
    ) -> Result<(), ObjectStoreError>;

    async fn signed_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: AwsClient,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn new(config: ObjectStoreConfig) -> Self {
        let region = Region::new(config.region.clone());

        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let mut builder = S3ConfigBuilder::from(&base)
            .region(region)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "object-store-config");
            builder = builder.credentials_provider(credentials);
        }

        tracing::info!(
            bucket = config.bucket,
            endpoint = config.endpoint,
            "object store client initialized"
        );

        Self {
            client: AwsClient::from_conf(builder.build()),
            bucket: config.bucket,
        }
    }

    /// Bound the number of in-flight retries a single call performs; distinct
    /// from the job-level backoff the dispatcher applies.
    const MAX_PUT_ATTEMPTS: u32 = 3;
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cancel: CancellationToken,
    ) -> Result<(), ObjectStoreError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(ObjectStoreError::Cancelled);
            }

            let body = ByteStream::from(bytes.clone());
            let result = tokio::select! {
                result = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_type(content_type)
                    .body(body)
                    .send() => result,
                _ = cancel.cancelled() => return Err(ObjectStoreError::Cancelled),
            };

            match result {
                Ok(_) => return Ok(()),
                Err(error) => {
                    let retryable = is_retryable(&error);
                    if !retryable || attempt >= Self::MAX_PUT_ATTEMPTS {
                        return Err(ObjectStoreError::RequestFailed(error.to_string()));
                    }
                    tracing::warn!(key, attempt, "retrying object store put");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
            }
        }
    }

    async fn signed_get(&self, key: &str, ttl: Duration) -> Result<String, ObjectStoreError> {
        let presign_config = PresigningConfig::expires_in(ttl)
            .map_err(|error| ObjectStoreError::PresignFailed(error.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|error| ObjectStoreError::PresignFailed(error.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|error| ObjectStoreError::RequestFailed(error.to_string()))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(error) => {
                if error
                    .as_service_error()
                    .map(|service_error| service_error.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(ObjectStoreError::RequestFailed(error.to_string()))
                }
            }
        }
    }
}

fn is_retryable<E: std::fmt::Debug>(error: &aws_sdk_s3::error::SdkError<E>) -> bool {
    use aws_sdk_s3::error::SdkError;
    match error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        // A 5xx response (e.g. S3 503) is transient and should be retried in-handler
        // per §4.6; only 4xx service errors are persistent failures.
        SdkError::ServiceError(service_error) => service_error.raw().status().as_u16() >= 500,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_key() {
        let error = ObjectStoreError::NotFound("calendars/x.pdf".to_owned());
        assert!(error.to_string().contains("calendars/x.pdf"));
    }
}
