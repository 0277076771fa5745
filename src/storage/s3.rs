//! S3/Object Storage Support
//!
//! Implements `RemoteStore` on top of the AWS SDK. Works with AWS S3 and
//! S3-compatible services (MinIO, Ceph, Wasabi). The SDK is async; the store
//! owns a small tokio runtime and blocks on each request so the engines can
//! stay on the rayon pool.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// S3 configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// AWS region
    pub region: String,
    /// Custom endpoint URL (for MinIO, Ceph, etc.)
    pub endpoint: Option<String>,
    /// Access key ID (falls back to the AWS credential chain)
    pub access_key_id: Option<String>,
    /// Secret access key (falls back to the AWS credential chain)
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Bucket name
    pub bucket: String,
    /// Use path-style URLs (required for some S3-compatible services)
    pub path_style: bool,
    /// Per-request timeout
    pub timeout: Duration,
    /// Runtime worker threads driving the SDK
    pub runtime_threads: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            bucket: String::new(),
            path_style: false,
            timeout: Duration::from_secs(300),
            runtime_threads: 2,
        }
    }
}

impl S3Config {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            region: std::env::var("AWS_REGION")
                .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
                .unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint: std::env::var("AWS_ENDPOINT_URL")
                .ok()
                .or_else(|| std::env::var("S3_ENDPOINT").ok()),
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            bucket: std::env::var("AWS_BUCKET_NAME").unwrap_or_default(),
            path_style: std::env::var("S3_PATH_STYLE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket.is_empty() {
            return Err("Bucket name is required (set AWS_BUCKET_NAME or --bucket)".to_string());
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
            );
        }
        if self.runtime_threads == 0 {
            return Err("Runtime thread count must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(feature = "native_s3")]
pub use native::S3Store;

#[cfg(feature = "native_s3")]
mod native {
    use super::S3Config;
    use crate::error::{StoreError, StoreResult};
    use crate::storage::{ObjectKey, RemoteStore};
    use aws_sdk_s3::config::http::HttpResponse;
    use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
    use aws_sdk_s3::primitives::ByteStream;

    /// `RemoteStore` backed by an S3 bucket
    pub struct S3Store {
        client: aws_sdk_s3::Client,
        bucket: String,
        endpoint: Option<String>,
        runtime: tokio::runtime::Runtime,
    }

    impl S3Store {
        /// Connect to the bucket described by `config`
        pub fn new(config: S3Config) -> StoreResult<Self> {
            config.validate().map_err(StoreError::Fatal)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.runtime_threads)
                .thread_name("backup-s3")
                .enable_all()
                .build()
                .map_err(|e| StoreError::Fatal(format!("Failed to start S3 runtime: {}", e)))?;

            let client = runtime.block_on(build_client(&config));

            Ok(Self {
                client,
                bucket: config.bucket,
                endpoint: config.endpoint,
                runtime,
            })
        }

        /// Bucket name
        pub fn bucket(&self) -> &str {
            &self.bucket
        }
    }

    async fn build_client(config: &S3Config) -> aws_sdk_s3::Client {
        let timeouts = aws_config::timeout::TimeoutConfig::builder()
            .operation_timeout(config.timeout)
            .build();

        // RetryingStore owns the retry budget
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .retry_config(aws_config::retry::RetryConfig::disabled())
            .timeout_config(timeouts);

        if let Some(ref endpoint) = config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        if let (Some(ref key_id), Some(ref secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let creds = aws_credential_types::Credentials::new(
                key_id,
                secret,
                None,
                None,
                "backup-manager-static",
            );
            loader = loader.credentials_provider(creds);
        }

        let shared = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if config.path_style {
            s3_config = s3_config.force_path_style(true);
        }
        aws_sdk_s3::Client::from_conf(s3_config.build())
    }

    /// Map an SDK failure onto the store error classes
    fn classify<E>(op: &str, key: &str, err: SdkError<E, HttpResponse>) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error + 'static,
    {
        let status = err.raw_response().map(|r| r.status().as_u16());
        let message = format!("S3 {} failed for {}: {}", op, key, DisplayErrorContext(&err));

        match &err {
            SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
                StoreError::Transient(message)
            }
            SdkError::ServiceError(ctx) => {
                let code = ctx.err().code().unwrap_or_default();
                match (status, code) {
                    (Some(404), _) | (_, "NoSuchKey") | (_, "NotFound") => {
                        StoreError::NotFound(key.to_string())
                    }
                    (Some(408 | 429), _) | (_, "SlowDown" | "RequestTimeout" | "Throttling") => {
                        StoreError::Transient(message)
                    }
                    (Some(s), _) if s >= 500 => StoreError::Transient(message),
                    _ => StoreError::Fatal(message),
                }
            }
            _ => StoreError::Fatal(message),
        }
    }

    impl RemoteStore for S3Store {
        fn put(&self, key: &ObjectKey, body: &[u8]) -> StoreResult<()> {
            self.runtime.block_on(async {
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key.as_str())
                    .body(ByteStream::from(body.to_vec()))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify("put_object", key.as_str(), e))
            })
        }

        fn get(&self, key: &ObjectKey) -> StoreResult<Vec<u8>> {
            self.runtime.block_on(async {
                let resp = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(key.as_str())
                    .send()
                    .await
                    .map_err(|e| classify("get_object", key.as_str(), e))?;

                let body = resp.body.collect().await.map_err(|e| {
                    StoreError::Transient(format!("S3 body read failed for {}: {}", key, e))
                })?;
                Ok(body.into_bytes().to_vec())
            })
        }

        fn exists(&self, key: &ObjectKey) -> StoreResult<bool> {
            self.runtime.block_on(async {
                match self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(key.as_str())
                    .send()
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) => match classify("head_object", key.as_str(), e) {
                        StoreError::NotFound(_) => Ok(false),
                        other => Err(other),
                    },
                }
            })
        }

        fn list(&self, prefix: &str) -> StoreResult<Vec<ObjectKey>> {
            self.runtime.block_on(async {
                let mut keys = Vec::new();
                let mut token: Option<String> = None;
                loop {
                    let resp = self
                        .client
                        .list_objects_v2()
                        .bucket(&self.bucket)
                        .prefix(prefix)
                        .set_continuation_token(token.take())
                        .send()
                        .await
                        .map_err(|e| classify("list_objects_v2", prefix, e))?;

                    keys.extend(
                        resp.contents()
                            .iter()
                            .filter_map(|obj| obj.key())
                            .map(ObjectKey::new),
                    );

                    match resp.next_continuation_token() {
                        Some(next) if resp.is_truncated().unwrap_or(false) => {
                            token = Some(next.to_string());
                        }
                        _ => break,
                    }
                }
                tracing::debug!("Listed {} objects under s3://{}/{}", keys.len(), self.bucket, prefix);
                Ok(keys)
            })
        }

        fn delete(&self, key: &ObjectKey) -> StoreResult<()> {
            self.runtime.block_on(async {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key.as_str())
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify("delete_object", key.as_str(), e))
            })
        }

        fn describe(&self) -> String {
            match &self.endpoint {
                Some(endpoint) => format!("s3://{} ({})", self.bucket, endpoint),
                None => format!("s3://{}", self.bucket),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = S3Config::default();
        assert_eq!(config.region, "us-east-1");
        assert!(!config.path_style);
        assert_eq!(config.validate().unwrap_err(), "Bucket name is required (set AWS_BUCKET_NAME or --bucket)");
    }

    fn local_endpoint() -> S3Config {
        S3Config {
            endpoint: Some("http://localhost:9000".to_string()),
            access_key_id: Some("admin".to_string()),
            secret_access_key: Some("secret".to_string()),
            bucket: "backups".to_string(),
            path_style: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_credentials_accepted() {
        assert!(local_endpoint().validate().is_ok());
    }

    #[test]
    fn test_partial_credentials_rejected() {
        let config = S3Config {
            bucket: "backups".to_string(),
            access_key_id: Some("id".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secret_not_serialized() {
        let config = local_endpoint();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("\"secret\""));
    }
}
