//! [`Storage`] over S3-compatible endpoints using `aws-sdk-s3`.

use std::fmt;
use std::io::{Seek, SeekFrom};
use std::time::Duration;

use aws_sdk_s3::Client;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation, ResponseChecksumValidation,
};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{BoxedStorage, PayloadStream, Storage, StorageError, StorageFactory, StorageResult};
use crate::content::ContentReader;

/// The maximum number of parts in one multipart upload.
const MAX_PARTS: u64 = 10_000;

/// Builds [`S3Storage`] clients that share one set of credentials and a region.
#[derive(Clone)]
pub struct S3Factory {
    access_key: String,
    secret_key: String,
    region: String,
    request_timeout: Option<Duration>,
}

impl S3Factory {
    /// Creates a factory with static credentials.
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            region: region.into(),
            request_timeout: None,
        }
    }

    /// Sets the timeout applied to every operation, including streaming the payload.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl fmt::Debug for S3Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Factory")
            .field("region", &self.region)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl StorageFactory for S3Factory {
    fn connect(&self, endpoint: &str) -> StorageResult<BoxedStorage> {
        Ok(Box::new(S3Storage::new(endpoint, self)?))
    }
}

/// An S3 client bound to a single endpoint.
///
/// Requests are never retried, and payloads are sent unsigned without checksums unless the
/// operation requires one, so the measured time is spent on the transfer itself.
pub struct S3Storage {
    client: Client,
    endpoint: String,
}

impl S3Storage {
    /// Creates a client for `endpoint` with the factory's credentials and region.
    ///
    /// Endpoints without a scheme default to `https://`.
    pub fn new(endpoint: &str, factory: &S3Factory) -> StorageResult<Self> {
        let endpoint = endpoint_url(endpoint)?;

        let credentials = Credentials::new(
            &factory.access_key,
            &factory.secret_key,
            None,
            None,
            "benchio",
        );

        let mut timeouts = TimeoutConfig::builder();
        if let Some(timeout) = factory.request_timeout {
            timeouts = timeouts.operation_timeout(timeout);
        }

        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(factory.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .force_path_style(true)
            .retry_config(RetryConfig::disabled())
            .timeout_config(timeouts.build())
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .response_checksum_validation(ResponseChecksumValidation::WhenRequired)
            .build();

        Ok(Self {
            client: Client::from_conf(config),
            endpoint,
        })
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        body: ContentReader,
        part_size: u64,
    ) -> StorageResult<Vec<CompletedPart>> {
        let start = body.position();
        let end = start + body.remaining();
        let step = usize::try_from(part_size.max(1)).unwrap_or(usize::MAX);

        let mut parts = Vec::new();
        for (part_number, offset) in (1..).zip((start..end).step_by(step)) {
            let mut reader = body.clone();
            reader.seek(SeekFrom::Start(offset))?;
            let part = reader.take_body(part_size);

            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_length(content_length(part.content_length()))
                .body(ByteStream::from_body_1_x(part))
                .customize()
                .disable_payload_signing()
                .send()
                .await
                .map_err(|err| StorageError::backend("upload_part", err.into_service_error()))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(output.e_tag().map(str::to_owned))
                    .build(),
            );
        }

        Ok(parts)
    }
}

impl fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Storage")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Storage for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(level = "trace", skip(self, body))]
    async fn put(&self, bucket: &str, key: &str, body: ContentReader) -> StorageResult<()> {
        let body = body.into_body();

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(content_length(body.content_length()))
            .body(ByteStream::from_body_1_x(body))
            .customize()
            .disable_payload_signing()
            .send()
            .await
            .map_err(|err| StorageError::backend("put_object", err.into_service_error()))?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self, body))]
    async fn multipart_put(
        &self,
        bucket: &str,
        key: &str,
        body: ContentReader,
        part_size: u64,
    ) -> StorageResult<()> {
        part_count(key, body.remaining(), part_size)?;

        let upload = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                StorageError::backend("create_multipart_upload", err.into_service_error())
            })?;

        let upload_id = upload
            .upload_id()
            .ok_or_else(|| StorageError::MissingUploadId {
                key: key.to_owned(),
            })?
            .to_owned();

        let parts = match self
            .upload_parts(bucket, key, &upload_id, body, part_size)
            .await
        {
            Ok(parts) => parts,
            Err(err) => {
                let abort = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort) = abort {
                    tracing::warn!(
                        error = &abort as &dyn std::error::Error,
                        key,
                        "failed to abort multipart upload"
                    );
                }
                return Err(err);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| {
                StorageError::backend("complete_multipart_upload", err.into_service_error())
            })?;

        Ok(())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<PayloadStream> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err.into_service_error() {
                err if err.is_no_such_key() => StorageError::NotFound {
                    key: key.to_owned(),
                },
                err => StorageError::backend("get_object", err),
            })?;

        let stream = futures::stream::try_unfold(output.body, |mut body| async move {
            let chunk = body.try_next().await.map_err(std::io::Error::other)?;
            Ok::<_, std::io::Error>(chunk.map(|chunk| (chunk, body)))
        });

        Ok(stream.boxed())
    }

    #[tracing::instrument(level = "trace", skip(self, sink))]
    async fn multipart_get(
        &self,
        bucket: &str,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        part_size: u64,
    ) -> StorageResult<u64> {
        let part_size = part_size.max(1);
        let mut written = 0;

        loop {
            let range = format!("bytes={}-{}", written, written + part_size - 1);
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .range(range)
                .send()
                .await
                .map_err(|err| match err.into_service_error() {
                    err if err.is_no_such_key() => StorageError::NotFound {
                        key: key.to_owned(),
                    },
                    err => StorageError::backend("get_object", err),
                })?;

            let total = output.content_range().and_then(total_length);
            let mut body = output.body;
            let mut received = 0;
            while let Some(chunk) = body.try_next().await.map_err(std::io::Error::other)? {
                sink.write_all(&chunk).await?;
                received += chunk.len() as u64;
            }
            written += received;

            match total {
                Some(total) if received > 0 && written < total => continue,
                _ => return Ok(written),
            }
        }
    }

    #[tracing::instrument(level = "trace", skip_all, fields(?bucket, keys = keys.len()))]
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|err| StorageError::backend("delete_objects", err.into_service_error()))?;

        let failed = output.errors().len();
        if failed > 0 {
            return Err(StorageError::PartialDelete {
                failed,
                total: keys.len(),
            });
        }

        Ok(())
    }
}

fn endpoint_url(endpoint: &str) -> StorageResult<String> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() || endpoint.contains(char::is_whitespace) {
        return Err(StorageError::InvalidEndpoint {
            endpoint: endpoint.to_owned(),
        });
    }

    if endpoint.contains("://") {
        Ok(endpoint.to_owned())
    } else {
        Ok(format!("https://{endpoint}"))
    }
}

/// The number of parts needed to upload `length` bytes, checked against [`MAX_PARTS`].
fn part_count(key: &str, length: u64, part_size: u64) -> StorageResult<u64> {
    let parts = length.div_ceil(part_size.max(1));
    if parts > MAX_PARTS {
        return Err(StorageError::TooManyParts {
            key: key.to_owned(),
            parts,
            limit: MAX_PARTS,
        });
    }

    Ok(parts)
}

fn content_length(length: u64) -> i64 {
    i64::try_from(length).unwrap_or(i64::MAX)
}

/// Parses the complete object length out of a `Content-Range` header such as `bytes 0-9/100`.
fn total_length(content_range: &str) -> Option<u64> {
    content_range.rsplit_once('/')?.1.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_default_to_https() {
        assert_eq!(
            endpoint_url("localhost:9000").unwrap(),
            "https://localhost:9000"
        );
        assert_eq!(
            endpoint_url(" http://minio:9000 ").unwrap(),
            "http://minio:9000"
        );
        assert!(endpoint_url("").is_err());
        assert!(endpoint_url("a b").is_err());
    }

    #[test]
    fn part_count_is_bounded() {
        assert_eq!(part_count("key", 100, 30).unwrap(), 4);
        assert_eq!(part_count("key", 0, 30).unwrap(), 0);
        assert_eq!(part_count("key", 10_000 * 5, 5).unwrap(), 10_000);

        let err = part_count("key", 10_000 * 5 + 1, 5).unwrap_err();
        assert!(matches!(
            err,
            StorageError::TooManyParts {
                parts: 10_001,
                limit: 10_000,
                ..
            }
        ));
        assert!(part_count("key", u64::MAX, 1).is_err());
    }

    #[test]
    fn parses_content_range() {
        assert_eq!(total_length("bytes 0-9/100"), Some(100));
        assert_eq!(total_length("bytes 0-9/*"), None);
        assert_eq!(total_length("garbage"), None);
    }

    #[test]
    fn connect_binds_endpoint() {
        let factory = S3Factory::new("access", "secret", "us-east-1")
            .with_request_timeout(Some(Duration::from_secs(5)));

        let storage = factory.connect("http://127.0.0.1:9000").unwrap();
        assert_eq!(storage.name(), "s3");
        assert!(format!("{storage:?}").contains("127.0.0.1:9000"));
        assert!(!format!("{factory:?}").contains("secret"));

        assert!(matches!(
            factory.connect("  "),
            Err(StorageError::InvalidEndpoint { .. })
        ));
    }
}
