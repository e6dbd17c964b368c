//! Ticket storage on JetStream key-value buckets.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use futures::StreamExt;
use jiff::Timestamp;
use ticketry_core::storage::{DocumentStream, IndexDescriptor, StorageBackend, StorageDocument};
use tokio::sync::RwLock;

use super::ticket_bucket::{
    TicketBucket, checked_key, index_metadata_entry, index_metadata_key, indexes_from_metadata,
};
use crate::{Error, Result, RetryConfig, TRACING_TARGET_KV};

/// Attempts of the read-modify-write cycle in `upsert_payload` before a
/// concurrent writer is reported as a conflict.
const MAX_UPSERT_ATTEMPTS: u32 = 5;

/// Opened bucket of one storage location.
#[derive(Clone)]
struct LocationHandle {
    bucket: TicketBucket,
    store: kv::Store,
    indexes: Vec<IndexDescriptor>,
}

impl LocationHandle {
    fn is_purgeable(&self, document: &StorageDocument, now: Timestamp) -> bool {
        document.is_purgeable_by(&self.indexes, now)
    }
}

/// Document written by `upsert_payload`: the stored one with its payload and
/// type tag replaced, or a new one without expiry.
fn upserted_document(
    existing: Option<StorageDocument>,
    id: &str,
    type_tag: &str,
    payload: &str,
) -> StorageDocument {
    match existing {
        Some(mut document) => {
            document.payload = payload.to_owned();
            document.type_tag = type_tag.to_owned();
            document
        }
        None => StorageDocument {
            id: id.to_owned(),
            payload: payload.to_owned(),
            type_tag: type_tag.to_owned(),
            expire_at: None,
        },
    }
}

/// Whether a revision-checked update landed. A revision mismatch means a
/// concurrent writer won and the upsert should be retried.
fn update_written(kind: kv::UpdateErrorKind, details: String) -> Result<bool> {
    match kind {
        kv::UpdateErrorKind::WrongLastRevision => Ok(false),
        _ => Err(Error::operation("kv_update", details)),
    }
}

/// Whether a create landed. An existing key means a concurrent writer won and
/// the upsert should be retried.
fn create_written(kind: kv::CreateErrorKind, details: String) -> Result<bool> {
    match kind {
        kv::CreateErrorKind::AlreadyExists => Ok(false),
        _ => Err(Error::operation("kv_create", details)),
    }
}

/// Whether a document removed by `delete_all` counts as removed.
///
/// Purgeable documents are already invisible to `count`, so only live
/// documents are counted.
fn counts_as_removed(
    document: &StorageDocument,
    indexes: &[IndexDescriptor],
    now: Timestamp,
) -> bool {
    !document.is_purgeable_by(indexes, now)
}

/// Records the index `metadata_key` in stream metadata, returning whether the
/// metadata changed. A differing index on the same key is a conflict.
fn insert_index_entry(
    bucket: &TicketBucket,
    metadata: &mut HashMap<String, String>,
    metadata_key: String,
    value: String,
) -> Result<bool> {
    match metadata.get(&metadata_key) {
        Some(existing) if *existing == value => Ok(false),
        Some(existing) => Err(Error::index_conflict(
            bucket.name(),
            metadata_key.clone(),
            existing.clone(),
        )),
        None => {
            metadata.insert(metadata_key, value);
            Ok(true)
        }
    }
}

/// [`StorageBackend`] over JetStream KV buckets, one bucket per location.
///
/// Documents are stored as JSON under their encoded ticket id. The expiry
/// index of a location is kept in its bucket stream's metadata and enforced
/// by this backend: purgeable documents are hidden and purged when read, and
/// [`purge_expired`](Self::purge_expired) sweeps a whole location.
///
/// Index descriptors are cached per process and refreshed whenever this
/// process provisions a location or lists its indexes.
#[derive(Clone)]
pub struct NatsTicketStorage {
    inner: Arc<NatsTicketStorageInner>,
}

struct NatsTicketStorageInner {
    jetstream: jetstream::Context,
    replicas: usize,
    retry: RetryConfig,
    locations: RwLock<HashMap<String, LocationHandle>>,
}

impl fmt::Debug for NatsTicketStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsTicketStorage")
            .field("replicas", &self.inner.replicas)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl NatsTicketStorage {
    /// Creates a storage backend on `jetstream`.
    pub fn new(jetstream: jetstream::Context, replicas: usize, retry: RetryConfig) -> Self {
        Self {
            inner: Arc::new(NatsTicketStorageInner {
                jetstream,
                replicas,
                retry,
                locations: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Purges every document of `location` whose expiry has passed,
    /// returning how many were removed.
    ///
    /// Meant to be scheduled periodically; reads already hide such documents.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    pub async fn purge_expired(&self, location: &str) -> Result<u64> {
        let handle = self.open(location).await?;
        let now = Timestamp::now();
        let mut purged = 0;

        for key in self.keys(&handle).await? {
            let Some(document) = self.read(&handle, &key).await? else {
                continue;
            };
            if handle.is_purgeable(&document, now) {
                self.purge(&handle, &key).await?;
                purged += 1;
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_KV,
            bucket = %handle.bucket.name(),
            purged = purged,
            "Purged expired documents"
        );
        Ok(purged)
    }

    /// Returns the cached bucket of `location`, opening it if needed.
    async fn open(&self, location: &str) -> Result<LocationHandle> {
        if let Some(handle) = self.inner.locations.read().await.get(location) {
            return Ok(handle.clone());
        }

        let bucket = TicketBucket::new(location)?;
        let store = self
            .inner
            .jetstream
            .get_key_value(bucket.name())
            .await
            .map_err(|err| {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %bucket.name(),
                    error = %err,
                    "Failed opening KV bucket"
                );
                Error::kv_bucket_not_found(bucket.name())
            })?;

        let indexes = self.read_indexes(&bucket).await?;
        let handle = LocationHandle {
            bucket,
            store,
            indexes,
        };
        self.inner
            .locations
            .write()
            .await
            .insert(location.to_owned(), handle.clone());
        Ok(handle)
    }

    /// Creates the bucket of `location` unless it exists.
    async fn create_bucket(&self, location: &str, drop_existing: bool) -> Result<()> {
        let bucket = TicketBucket::new(location)?;
        let jetstream = &self.inner.jetstream;
        self.inner.locations.write().await.remove(location);

        if drop_existing {
            match jetstream.delete_key_value(bucket.name()).await {
                Ok(_) => tracing::info!(
                    target: TRACING_TARGET_KV,
                    bucket = %bucket.name(),
                    "Dropped existing KV bucket"
                ),
                Err(err) => tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %bucket.name(),
                    error = %err,
                    "No KV bucket to drop"
                ),
            }
        }

        if jetstream.get_key_value(bucket.name()).await.is_ok() {
            tracing::debug!(
                target: TRACING_TARGET_KV,
                bucket = %bucket.name(),
                "Using existing KV bucket"
            );
            return Ok(());
        }

        tracing::debug!(
            target: TRACING_TARGET_KV,
            bucket = %bucket.name(),
            replicas = self.inner.replicas,
            "Creating new KV bucket"
        );
        if let Err(err) = jetstream
            .create_key_value(bucket.kv_config(self.inner.replicas))
            .await
        {
            // Another node may have created it in the meantime.
            if jetstream.get_key_value(bucket.name()).await.is_err() {
                return Err(Error::operation("kv_create", err.to_string()));
            }
        }
        Ok(())
    }

    async fn read_indexes(&self, bucket: &TicketBucket) -> Result<Vec<IndexDescriptor>> {
        let jetstream = &self.inner.jetstream;
        let stream_name = bucket.stream_name();
        let stream_name = stream_name.as_str();

        let stream = self
            .inner
            .retry
            .retry(|| async move {
                jetstream
                    .get_stream(stream_name)
                    .await
                    .map_err(|e| Error::operation("stream_info", e.to_string()))
            })
            .await?;

        indexes_from_metadata(&stream.cached_info().config.metadata)
    }

    /// Applies `modify` to the metadata of the bucket stream, then refreshes
    /// the cached indexes. The stream is updated only if `modify` returns true.
    async fn modify_metadata<F>(&self, location: &str, modify: F) -> Result<()>
    where
        F: FnOnce(&TicketBucket, &mut HashMap<String, String>) -> Result<bool> + Send,
    {
        let handle = self.open(location).await?;
        let jetstream = &self.inner.jetstream;

        let stream = jetstream
            .get_stream(handle.bucket.stream_name())
            .await
            .map_err(|e| Error::operation("stream_info", e.to_string()))?;
        let mut config = stream.cached_info().config.clone();

        if modify(&handle.bucket, &mut config.metadata)? {
            jetstream
                .update_stream(&config)
                .await
                .map_err(|e| Error::operation("stream_update", e.to_string()))?;
        }

        let indexes = indexes_from_metadata(&config.metadata)?;
        self.cache_indexes(location, indexes).await;
        Ok(())
    }

    async fn cache_indexes(&self, location: &str, indexes: Vec<IndexDescriptor>) {
        if let Some(handle) = self.inner.locations.write().await.get_mut(location) {
            handle.indexes = indexes;
        }
    }

    async fn read(&self, handle: &LocationHandle, key: &str) -> Result<Option<StorageDocument>> {
        let store = &handle.store;
        let value = self
            .inner
            .retry
            .retry(|| async move {
                store
                    .get(key)
                    .await
                    .map_err(|e| Error::operation("kv_get", e.to_string()))
            })
            .await?;

        match value {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn purge(&self, handle: &LocationHandle, key: &str) -> Result<()> {
        let store = &handle.store;
        self.inner
            .retry
            .retry(|| async move {
                store
                    .purge(key)
                    .await
                    .map_err(|e| Error::operation("kv_purge", e.to_string()))
            })
            .await
    }

    async fn keys(&self, handle: &LocationHandle) -> Result<Vec<String>> {
        let store = &handle.store;
        self.inner
            .retry
            .retry(|| async move {
                let mut key_stream = store
                    .keys()
                    .await
                    .map_err(|e| Error::operation("kv_keys", e.to_string()))?;

                let mut keys = Vec::new();
                while let Some(key) = key_stream.next().await {
                    keys.push(key.map_err(|e| Error::operation("kv_keys", e.to_string()))?);
                }
                Ok(keys)
            })
            .await
    }

    /// Reads a live document, purging it if its expiry has passed.
    async fn find_live(
        &self,
        handle: &LocationHandle,
        key: &str,
    ) -> Result<Option<StorageDocument>> {
        let Some(document) = self.read(handle, key).await? else {
            return Ok(None);
        };
        if handle.is_purgeable(&document, Timestamp::now()) {
            self.purge(handle, key).await?;
            tracing::debug!(
                target: TRACING_TARGET_KV,
                bucket = %handle.bucket.name(),
                key = %key,
                "Purged expired document on read"
            );
            return Ok(None);
        }
        Ok(Some(document))
    }

    async fn insert_document(&self, location: &str, document: StorageDocument) -> Result<()> {
        let handle = self.open(location).await?;
        let key = checked_key(&document.id)?;
        let value = serde_json::to_vec(&document)?;
        let size = value.len();

        let revision = handle
            .store
            .create(key, value.into())
            .await
            .map_err(|err| match err.kind() {
                kv::CreateErrorKind::AlreadyExists => {
                    Error::kv_key_exists(handle.bucket.name(), key)
                }
                _ => Error::operation("kv_create", err.to_string()),
            })?;

        tracing::debug!(
            target: TRACING_TARGET_KV,
            bucket = %handle.bucket.name(),
            key = %key,
            revision = revision,
            size_bytes = size,
            "Inserted document"
        );
        Ok(())
    }

    async fn upsert_document(
        &self,
        location: &str,
        id: &str,
        type_tag: &str,
        payload: &str,
    ) -> Result<()> {
        let handle = self.open(location).await?;
        let key = checked_key(id)?;

        for attempt in 0..MAX_UPSERT_ATTEMPTS {
            let entry = handle
                .store
                .entry(key)
                .await
                .map_err(|e| Error::operation("kv_entry", e.to_string()))?;

            let written = match entry {
                Some(entry) if matches!(entry.operation, kv::Operation::Put) => {
                    let existing: StorageDocument = serde_json::from_slice(&entry.value)?;
                    let document = upserted_document(Some(existing), id, type_tag, payload);
                    let value = serde_json::to_vec(&document)?;
                    match handle.store.update(key, value.into(), entry.revision).await {
                        Ok(_) => true,
                        Err(err) => update_written(err.kind(), err.to_string())?,
                    }
                }
                _ => {
                    let document = upserted_document(None, id, type_tag, payload);
                    let value = serde_json::to_vec(&document)?;
                    match handle.store.create(key, value.into()).await {
                        Ok(_) => true,
                        Err(err) => create_written(err.kind(), err.to_string())?,
                    }
                }
            };

            if written {
                tracing::debug!(
                    target: TRACING_TARGET_KV,
                    bucket = %handle.bucket.name(),
                    key = %key,
                    "Upserted document payload"
                );
                return Ok(());
            }

            tracing::debug!(
                target: TRACING_TARGET_KV,
                bucket = %handle.bucket.name(),
                key = %key,
                attempt = attempt + 1,
                "Document changed concurrently, retrying upsert"
            );
        }

        Err(Error::kv_key_exists(handle.bucket.name(), key))
    }

    async fn delete_document(&self, location: &str, id: &str) -> Result<bool> {
        let handle = self.open(location).await?;
        let key = checked_key(id)?;
        let existed = self.read(&handle, key).await?.is_some();
        self.purge(&handle, key).await?;
        Ok(existed)
    }

    async fn count_documents(&self, location: &str) -> Result<u64> {
        let handle = self.open(location).await?;
        let mut count = 0;
        for key in self.keys(&handle).await? {
            if self.find_live(&handle, &key).await?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete_documents(&self, location: &str) -> Result<u64> {
        let handle = self.open(location).await?;
        let now = Timestamp::now();
        let mut removed = 0;

        for key in self.keys(&handle).await? {
            let Some(document) = self.read(&handle, &key).await? else {
                continue;
            };
            self.purge(&handle, &key).await?;
            if counts_as_removed(&document, &handle.indexes, now) {
                removed += 1;
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_KV,
            bucket = %handle.bucket.name(),
            removed = removed,
            "Deleted all documents"
        );
        Ok(removed)
    }

    async fn document_stream(&self, location: &str) -> Result<DocumentStream> {
        let handle = self.open(location).await?;
        let keys = self.keys(&handle).await?;
        let storage = self.clone();

        Ok(Box::pin(async_stream::stream! {
            for key in keys {
                let document = storage
                    .find_live(&handle, &key)
                    .await
                    .map_err(ticketry_core::Error::from);
                match document {
                    Ok(Some(document)) => yield Ok(document),
                    Ok(None) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl StorageBackend for NatsTicketStorage {
    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn ensure_location(
        &self,
        location: &str,
        drop_existing: bool,
    ) -> ticketry_core::Result<()> {
        self.create_bucket(location, drop_existing).await?;
        self.open(location).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn list_indexes(&self, location: &str) -> ticketry_core::Result<Vec<IndexDescriptor>> {
        let handle = self.open(location).await?;
        let indexes = self.read_indexes(&handle.bucket).await?;
        self.cache_indexes(location, indexes.clone()).await;
        Ok(indexes)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn drop_index(&self, location: &str, key: &str) -> ticketry_core::Result<()> {
        let metadata_key = index_metadata_key(key);
        self.modify_metadata(location, move |_, metadata| {
            Ok(metadata.remove(&metadata_key).is_some())
        })
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn create_index(
        &self,
        location: &str,
        index: &IndexDescriptor,
    ) -> ticketry_core::Result<()> {
        let (metadata_key, value) = index_metadata_entry(index)?;
        self.modify_metadata(location, move |bucket, metadata| {
            insert_index_entry(bucket, metadata, metadata_key, value)
        })
        .await?;
        Ok(())
    }

    #[tracing::instrument(
        skip(self, document),
        fields(id = %document.id),
        target = TRACING_TARGET_KV
    )]
    async fn insert(&self, location: &str, document: StorageDocument) -> ticketry_core::Result<()> {
        Ok(self.insert_document(location, document).await?)
    }

    #[tracing::instrument(skip(self, payload), target = TRACING_TARGET_KV)]
    async fn upsert_payload(
        &self,
        location: &str,
        id: &str,
        type_tag: &str,
        payload: &str,
    ) -> ticketry_core::Result<()> {
        Ok(self.upsert_document(location, id, type_tag, payload).await?)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn find(
        &self,
        location: &str,
        id: &str,
    ) -> ticketry_core::Result<Option<StorageDocument>> {
        let handle = self.open(location).await?;
        let key = checked_key(id)?;
        Ok(self.find_live(&handle, key).await?)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn delete(&self, location: &str, id: &str) -> ticketry_core::Result<bool> {
        Ok(self.delete_document(location, id).await?)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn count(&self, location: &str) -> ticketry_core::Result<u64> {
        Ok(self.count_documents(location).await?)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn delete_all(&self, location: &str) -> ticketry_core::Result<u64> {
        Ok(self.delete_documents(location).await?)
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_KV)]
    async fn stream(&self, location: &str) -> ticketry_core::Result<DocumentStream> {
        Ok(self.document_stream(location).await?)
    }
}
