//! The storage client seam.
//!
//! Workers talk to object storage exclusively through the [`Storage`] trait, and build one client
//! per endpoint through a [`StorageFactory`]. The wire protocol lives in the implementations.

use std::fmt::Debug;
use std::io;

use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncWrite;

use crate::content::ContentReader;

mod in_memory;
mod s3;

pub use in_memory::InMemoryStorage;
pub use s3::{S3Factory, S3Storage};

/// The maximum number of keys a single batched delete may carry.
pub const MAX_DELETE_BATCH: usize = 1000;

/// A stream of object contents returned by [`Storage::get`].
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;

/// A type-erased [`Storage`] instance.
pub type BoxedStorage = Box<dyn Storage>;

/// An object storage client bound to a single endpoint.
#[async_trait::async_trait]
pub trait Storage: Debug + Send + Sync + 'static {
    /// The client name, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Uploads an object in a single request.
    async fn put(&self, bucket: &str, key: &str, body: ContentReader) -> StorageResult<()>;

    /// Uploads an object in parts of `part_size` bytes.
    async fn multipart_put(
        &self,
        bucket: &str,
        key: &str,
        body: ContentReader,
        part_size: u64,
    ) -> StorageResult<()>;

    /// Retrieves an object as a stream of bytes.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<PayloadStream>;

    /// Downloads an object in ranges of `part_size` bytes into `sink`, returning the number of
    /// bytes written.
    async fn multipart_get(
        &self,
        bucket: &str,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        part_size: u64,
    ) -> StorageResult<u64>;

    /// Deletes up to [`MAX_DELETE_BATCH`] objects in one request.
    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<()>;
}

/// Builds storage clients bound to an endpoint.
pub trait StorageFactory: Send + Sync {
    /// Constructs a client for `endpoint`.
    fn connect(&self, endpoint: &str) -> StorageResult<BoxedStorage>;
}

/// Errors returned by storage clients.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O errors while streaming payloads.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The object does not exist.
    #[error("object `{key}` not found")]
    NotFound {
        /// The key that was requested.
        key: String,
    },

    /// The endpoint address cannot be used to build a client.
    #[error("invalid endpoint `{endpoint}`")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
    },

    /// The backend accepted a multipart upload without assigning an upload id.
    #[error("no upload id returned for `{key}`")]
    MissingUploadId {
        /// The key being uploaded.
        key: String,
    },

    /// The client refused to build a request.
    #[error("invalid request: {0}")]
    Build(#[from] aws_sdk_s3::error::BuildError),

    /// An upload would need more parts than the backend accepts.
    #[error("uploading `{key}` needs {parts} parts, more than the limit of {limit}")]
    TooManyParts {
        /// The key being uploaded.
        key: String,
        /// The number of parts the upload would need.
        parts: u64,
        /// The maximum number of parts per upload.
        limit: u64,
    },

    /// Some keys of a batched delete were rejected by the backend.
    #[error("{failed} of {total} keys could not be deleted")]
    PartialDelete {
        /// Keys the backend reported as failed.
        failed: usize,
        /// Keys in the batch.
        total: usize,
    },

    /// Any other error from the storage backend, tagged with the failing operation.
    #[error("{operation} failed: {cause}")]
    Backend {
        /// The backend operation, such as `put_object`.
        operation: &'static str,
        /// The underlying client error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// Wraps a backend error with the name of the operation that produced it.
    pub fn backend<E>(operation: &'static str, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            operation,
            cause: Box::new(cause),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
