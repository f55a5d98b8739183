//! Executes single storage requests and measures them.

use std::time::{Duration, Instant};

use futures::TryStreamExt;
use thiserror::Error;

use crate::config::Config;
use crate::content::ContentReader;
use crate::storage::{Storage, StorageError};

/// Builds the key of the object at `index`.
pub fn object_key(prefix: &str, index: u64) -> String {
    format!("{prefix}{index}")
}

/// One unit of work handed to a worker.
#[derive(Debug)]
pub enum Request {
    /// Upload `key` with the given contents.
    Write {
        /// The object key.
        key: String,
        /// A fresh cursor over the shared sample.
        content: ContentReader,
    },
    /// Download `key` and discard its contents.
    Read {
        /// The object key.
        key: String,
    },
}

impl Request {
    /// The key this request operates on.
    pub fn key(&self) -> &str {
        match self {
            Request::Write { key, .. } | Request::Read { key } => key,
        }
    }
}

/// The outcome of one executed [`Request`].
#[derive(Debug)]
pub struct Response {
    /// Set if the operation failed or transferred an unexpected number of bytes.
    pub error: Option<OperationError>,
    /// Wall-clock time of the operation.
    pub duration: Duration,
    /// Bytes transferred.
    pub bytes: u64,
}

/// Why a single operation was counted as failed.
#[derive(Debug, Error)]
pub enum OperationError {
    /// The storage client reported an error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The transfer succeeded but moved the wrong number of bytes.
    #[error("expected object length {expected}, actual {actual}")]
    Length {
        /// The configured object size.
        expected: u64,
        /// The number of bytes received.
        actual: u64,
    },
}

/// Performs requests against a bucket with a fixed object size.
#[derive(Debug, Clone)]
pub struct Executor {
    bucket: String,
    object_size: u64,
    multipart_size: u64,
}

impl Executor {
    /// Creates an executor. A `multipart_size` of zero disables multipart transfers.
    pub fn new(bucket: impl Into<String>, object_size: u64, multipart_size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            object_size,
            multipart_size,
        }
    }

    /// Creates an executor for the bucket and sizes in `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.bucket.clone(),
            config.object_size.as_u64(),
            config.multipart_size.as_u64(),
        )
    }

    /// Executes `request` exactly once and reports the outcome. Errors are never retried.
    pub async fn execute(&self, storage: &dyn Storage, request: Request) -> Response {
        let start = Instant::now();

        let (bytes, result) = match request {
            Request::Write { key, content } => {
                let result = self.write(storage, &key, content).await;
                (self.object_size, result)
            }
            Request::Read { key } => match self.read(storage, &key).await {
                Ok(bytes) => (bytes, self.validate(bytes)),
                Err(err) => (0, Err(err)),
            },
        };

        Response {
            error: result.err(),
            duration: start.elapsed(),
            bytes,
        }
    }

    async fn write(
        &self,
        storage: &dyn Storage,
        key: &str,
        content: ContentReader,
    ) -> Result<(), OperationError> {
        if self.multipart_size > 0 {
            storage
                .multipart_put(&self.bucket, key, content, self.multipart_size)
                .await?;
        } else {
            storage.put(&self.bucket, key, content).await?;
        }

        Ok(())
    }

    async fn read(&self, storage: &dyn Storage, key: &str) -> Result<u64, OperationError> {
        if self.multipart_size > 0 {
            let mut sink = tokio::io::sink();
            let bytes = storage
                .multipart_get(&self.bucket, key, &mut sink, self.multipart_size)
                .await?;
            return Ok(bytes);
        }

        let mut stream = storage.get(&self.bucket, key).await?;
        let mut bytes = 0;
        while let Some(chunk) = stream.try_next().await.map_err(StorageError::from)? {
            bytes += chunk.len() as u64;
        }

        Ok(bytes)
    }

    fn validate(&self, actual: u64) -> Result<(), OperationError> {
        if actual == self.object_size {
            Ok(())
        } else {
            Err(OperationError::Length {
                expected: self.object_size,
                actual,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::content::ContentSource;
    use crate::storage::InMemoryStorage;

    fn source() -> ContentSource {
        ContentSource::new(Bytes::from_static(b"abcdefgh"), 20)
    }

    #[tokio::test]
    async fn write_then_read() {
        let storage = InMemoryStorage::new();
        let executor = Executor::new("bucket", 20, 0);

        let write = Request::Write {
            key: object_key("obj-", 7),
            content: source().reader(),
        };
        assert_eq!(write.key(), "obj-7");
        let response = executor.execute(&storage, write).await;
        assert!(response.error.is_none());
        assert_eq!(response.bytes, 20);
        assert_eq!(
            storage.get_stored("bucket", "obj-7").unwrap(),
            &b"abcdefghabcdefghabcd"[..]
        );

        let read = Request::Read {
            key: "obj-7".into(),
        };
        let response = executor.execute(&storage, read).await;
        assert!(response.error.is_none());
        assert_eq!(response.bytes, 20);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let storage = InMemoryStorage::new();
        storage.insert("bucket", "short", vec![0; 19]);
        let executor = Executor::new("bucket", 20, 0);

        let response = executor
            .execute(&storage, Request::Read { key: "short".into() })
            .await;

        assert_eq!(response.bytes, 19);
        assert!(matches!(
            response.error,
            Some(OperationError::Length {
                expected: 20,
                actual: 19
            })
        ));
    }

    #[tokio::test]
    async fn long_read_is_an_error() {
        let storage = InMemoryStorage::new();
        storage.insert("bucket", "long", vec![0; 21]);
        let executor = Executor::new("bucket", 20, 5);

        let response = executor
            .execute(&storage, Request::Read { key: "long".into() })
            .await;

        assert!(matches!(
            response.error,
            Some(OperationError::Length { actual: 21, .. })
        ));
    }

    #[tokio::test]
    async fn missing_object_reports_storage_error() {
        let storage = InMemoryStorage::new();
        let executor = Executor::new("bucket", 20, 0);

        let response = executor
            .execute(&storage, Request::Read { key: "gone".into() })
            .await;

        assert_eq!(response.bytes, 0);
        assert!(matches!(
            response.error,
            Some(OperationError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn multipart_threshold_selects_part_transfers() {
        let storage = InMemoryStorage::new();
        let executor = Executor::new("bucket", 20, 6);

        let write = Request::Write {
            key: "parts".into(),
            content: source().reader(),
        };
        assert!(executor.execute(&storage, write).await.error.is_none());

        let response = executor
            .execute(&storage, Request::Read { key: "parts".into() })
            .await;
        assert!(response.error.is_none());
        assert_eq!(response.bytes, 20);
    }
}
