//! In-memory storage for tests and offline runs.
//!
//! This provides a [`Storage`] backed by a `HashMap`. The storage is [`Clone`] and every clone
//! shares the same objects, so it doubles as its own [`StorageFactory`]: each connected "client"
//! is a handle onto the same map, and tests keep a handle for direct inspection.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{
    BoxedStorage, MAX_DELETE_BATCH, PayloadStream, Storage, StorageError, StorageFactory,
    StorageResult,
};
use crate::content::ContentReader;

type Store = HashMap<(String, String), Bytes>;

/// A shared in-memory object store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    store: Arc<Mutex<Store>>,
    endpoints: Arc<Mutex<Vec<String>>>,
    delete_batches: Arc<Mutex<Vec<usize>>>,
}

impl InMemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object directly, bypassing the [`Storage`] trait.
    pub fn insert(&self, bucket: &str, key: &str, contents: impl Into<Bytes>) {
        self.store
            .lock()
            .unwrap()
            .insert((bucket.to_owned(), key.to_owned()), contents.into());
    }

    /// Returns a clone of the stored contents, if present.
    pub fn get_stored(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.store
            .lock()
            .unwrap()
            .get(&(bucket.to_owned(), key.to_owned()))
            .cloned()
    }

    /// The number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.store.lock().unwrap().is_empty()
    }

    /// The endpoints that clients were connected to, in connection order.
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints.lock().unwrap().clone()
    }

    /// The number of keys in every batched delete, in call order.
    pub fn delete_batches(&self) -> Vec<usize> {
        self.delete_batches.lock().unwrap().clone()
    }
}

impl StorageFactory for InMemoryStorage {
    fn connect(&self, endpoint: &str) -> StorageResult<BoxedStorage> {
        self.endpoints.lock().unwrap().push(endpoint.to_owned());
        Ok(Box::new(self.clone()))
    }
}

#[async_trait::async_trait]
impl Storage for InMemoryStorage {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn put(&self, bucket: &str, key: &str, mut body: ContentReader) -> StorageResult<()> {
        let mut contents = Vec::new();
        body.read_to_end(&mut contents)?;
        self.insert(bucket, key, contents);
        Ok(())
    }

    async fn multipart_put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ContentReader,
        part_size: u64,
    ) -> StorageResult<()> {
        let mut contents = Vec::new();
        while body.by_ref().take(part_size.max(1)).read_to_end(&mut contents)? > 0 {}
        self.insert(bucket, key, contents);
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<PayloadStream> {
        let contents = self
            .get_stored(bucket, key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_owned(),
            })?;

        Ok(futures::stream::once(async move { Ok(contents) }).boxed())
    }

    async fn multipart_get(
        &self,
        bucket: &str,
        key: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        part_size: u64,
    ) -> StorageResult<u64> {
        let contents = self
            .get_stored(bucket, key)
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_owned(),
            })?;

        let part_size = usize::try_from(part_size.max(1)).unwrap_or(usize::MAX);
        for part in contents.chunks(part_size) {
            sink.write_all(part).await?;
        }

        Ok(contents.len() as u64)
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> StorageResult<()> {
        if keys.len() > MAX_DELETE_BATCH {
            return Err(StorageError::backend(
                "delete_objects",
                std::io::Error::other(format!("{} keys exceed the batch limit", keys.len())),
            ));
        }

        self.delete_batches.lock().unwrap().push(keys.len());
        let mut store = self.store.lock().unwrap();
        for key in keys {
            store.remove(&(bucket.to_owned(), key.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::content::ContentSource;

    #[tokio::test]
    async fn multipart_roundtrip_matches_content() {
        let source = ContentSource::new(Bytes::from_static(b"0123456789"), 35);
        let storage = InMemoryStorage::new();

        storage
            .multipart_put("bucket", "key", source.reader(), 8)
            .await
            .unwrap();

        let mut expected = Vec::new();
        source.reader().read_to_end(&mut expected).unwrap();
        assert_eq!(storage.get_stored("bucket", "key").unwrap(), expected);

        let mut sink = Vec::new();
        let written = storage
            .multipart_get("bucket", "key", &mut sink, 8)
            .await
            .unwrap();
        assert_eq!(written, 35);
        assert_eq!(sink, expected);
    }

    #[tokio::test]
    async fn missing_objects_are_not_found() {
        let storage = InMemoryStorage::new();

        let err = storage.get("bucket", "missing").await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound { .. }));

        let stream = {
            storage.insert("bucket", "present", "oh hai!");
            storage.get("bucket", "present").await.unwrap()
        };
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"oh hai!");
    }

    #[tokio::test]
    async fn clients_share_one_store() {
        let storage = InMemoryStorage::new();
        let a = storage.connect("a").unwrap();
        let b = storage.connect("b").unwrap();

        let source = ContentSource::new(Bytes::from_static(b"xyz"), 3);
        a.put("bucket", "key", source.reader()).await.unwrap();
        assert!(b.get("bucket", "key").await.is_ok());

        b.delete_many("bucket", &["key".to_owned()]).await.unwrap();
        assert!(storage.is_empty());
        assert_eq!(storage.endpoints(), ["a", "b"]);
        assert_eq!(storage.delete_batches(), [1]);
    }
}
