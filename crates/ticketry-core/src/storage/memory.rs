//! In-memory storage backend.
//!
//! [`MemoryStorage`] behaves like a document store with TTL indexes: documents
//! whose `expireAt` plus the location's index TTL has passed are purged
//! passively, and creating an index on a key that is already indexed with
//! different options is rejected. It is meant for tests and single-node
//! development.
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - Passive expiry runs on access rather than on a background monitor

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use super::{DocumentStream, IndexDescriptor, StorageBackend, StorageDocument};
use crate::{Error, Result, TRACING_TARGET_STORAGE};

#[derive(Debug, Default)]
struct Location {
    documents: BTreeMap<String, StorageDocument>,
    indexes: Vec<IndexDescriptor>,
}

impl Location {
    /// Removes every document an expiry index would have purged by `now`.
    fn sweep(&mut self, now: Timestamp) -> u64 {
        let before = self.documents.len();
        let indexes = &self.indexes;
        self.documents
            .retain(|_, document| !document.is_purgeable_by(indexes, now));
        (before - self.documents.len()) as u64
    }
}

#[derive(Debug, Default)]
struct MemoryStorageInner {
    locations: RwLock<HashMap<String, Location>>,
    unavailable: AtomicBool,
}

/// Thread-safe in-memory [`StorageBackend`].
///
/// `MemoryStorage` is cheaply cloneable; all clones share the same data, which
/// makes it possible to simulate several cluster nodes talking to one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryStorageInner>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with a transient error, or restores
    /// normal operation.
    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Runs passive expiry as of `now` over every location, returning how
    /// many documents were purged.
    pub async fn purge_expired_at(&self, now: Timestamp) -> u64 {
        let mut locations = self.inner.locations.write().await;
        let purged: u64 = locations
            .values_mut()
            .map(|location| location.sweep(now))
            .sum();

        tracing::debug!(
            target: TRACING_TARGET_STORAGE,
            purged = purged,
            "Purged expired documents"
        );
        purged
    }

    /// Returns the names of existing locations.
    pub async fn locations(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.locations.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(Error::transient().with_message("memory storage is unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn ensure_location(&self, location: &str, drop_existing: bool) -> Result<()> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        if drop_existing && locations.remove(location).is_some() {
            tracing::debug!(
                target: TRACING_TARGET_STORAGE,
                location = %location,
                "Dropped existing location"
            );
        }
        locations.entry(location.to_owned()).or_default();
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn list_indexes(&self, location: &str) -> Result<Vec<IndexDescriptor>> {
        self.check_available()?;
        let locations = self.inner.locations.read().await;
        Ok(locations
            .get(location)
            .map(|location| location.indexes.clone())
            .unwrap_or_default())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn drop_index(&self, location: &str, key: &str) -> Result<()> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        if let Some(location) = locations.get_mut(location) {
            location.indexes.retain(|index| index.key != key);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn create_index(&self, location: &str, index: &IndexDescriptor) -> Result<()> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        let location_name = location;
        let location = locations.entry(location_name.to_owned()).or_default();

        if location.indexes.contains(index) {
            return Ok(());
        }
        if let Some(existing) = location.indexes.iter().find(|e| e.conflicts_with(index)) {
            return Err(Error::conflict().with_message(format!(
                "index on '{}' in '{}' already exists with options {:?}",
                existing.key, location_name, existing.options
            )));
        }
        location.indexes.push(index.clone());
        Ok(())
    }

    #[tracing::instrument(
        skip(self, document),
        fields(id = %document.id),
        target = TRACING_TARGET_STORAGE
    )]
    async fn insert(&self, location: &str, document: StorageDocument) -> Result<()> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        let location_name = location;
        let location = locations.entry(location_name.to_owned()).or_default();
        location.sweep(Timestamp::now());

        if location.documents.contains_key(&document.id) {
            return Err(Error::conflict().with_message(format!(
                "duplicate id '{}' in '{}'",
                document.id, location_name
            )));
        }
        location.documents.insert(document.id.clone(), document);
        Ok(())
    }

    #[tracing::instrument(skip(self, payload), target = TRACING_TARGET_STORAGE)]
    async fn upsert_payload(
        &self,
        location: &str,
        id: &str,
        type_tag: &str,
        payload: &str,
    ) -> Result<()> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        let location = locations.entry(location.to_owned()).or_default();
        location.sweep(Timestamp::now());

        let document = location
            .documents
            .entry(id.to_owned())
            .or_insert_with(|| StorageDocument {
                id: id.to_owned(),
                payload: String::new(),
                type_tag: String::new(),
                expire_at: None,
            });
        document.payload = payload.to_owned();
        document.type_tag = type_tag.to_owned();
        Ok(())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn find(&self, location: &str, id: &str) -> Result<Option<StorageDocument>> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        Ok(locations.get_mut(location).and_then(|location| {
            location.sweep(Timestamp::now());
            location.documents.get(id).cloned()
        }))
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn delete(&self, location: &str, id: &str) -> Result<bool> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        Ok(locations
            .get_mut(location)
            .and_then(|location| location.documents.remove(id))
            .is_some())
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn count(&self, location: &str) -> Result<u64> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        Ok(locations
            .get_mut(location)
            .map(|location| {
                location.sweep(Timestamp::now());
                location.documents.len() as u64
            })
            .unwrap_or(0))
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn delete_all(&self, location: &str) -> Result<u64> {
        self.check_available()?;
        let mut locations = self.inner.locations.write().await;
        Ok(locations
            .get_mut(location)
            .map(|location| {
                location.sweep(Timestamp::now());
                let removed = location.documents.len() as u64;
                location.documents.clear();
                removed
            })
            .unwrap_or(0))
    }

    #[tracing::instrument(skip(self), target = TRACING_TARGET_STORAGE)]
    async fn stream(&self, location: &str) -> Result<DocumentStream> {
        self.check_available()?;
        let ids: Vec<String> = {
            let locations = self.inner.locations.read().await;
            locations
                .get(location)
                .map(|location| location.documents.keys().cloned().collect())
                .unwrap_or_default()
        };

        let storage = self.clone();
        let location = location.to_owned();
        Ok(Box::pin(async_stream::stream! {
            for id in ids {
                if let Err(err) = storage.check_available() {
                    yield Err(err);
                    return;
                }
                let document = {
                    let locations = storage.inner.locations.read().await;
                    locations.get(&location).and_then(|location| {
                        let now = Timestamp::now();
                        location
                            .documents
                            .get(&id)
                            .filter(|document| !document.is_purgeable_by(&location.indexes, now))
                            .cloned()
                    })
                };
                if let Some(document) = document {
                    yield Ok(document);
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use jiff::SignedDuration;

    use super::*;
    use crate::ErrorKind;
    use crate::serializer::SerializedTicket;

    fn document(id: &str, expire_at: Option<Timestamp>) -> StorageDocument {
        StorageDocument::new(
            id,
            SerializedTicket {
                type_tag: "ServiceTicket".into(),
                payload: format!("{{\"id\":\"{id}\"}}"),
            },
            expire_at,
        )
    }

    #[tokio::test]
    async fn test_insert_find_delete() {
        let storage = MemoryStorage::new();
        storage.insert("st", document("ST-1", None)).await.unwrap();

        let found = storage.find("st", "ST-1").await.unwrap().unwrap();
        assert_eq!(found.type_tag, "ServiceTicket");
        assert!(storage.find("other", "ST-1").await.unwrap().is_none());

        assert!(storage.delete("st", "ST-1").await.unwrap());
        assert!(!storage.delete("st", "ST-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_insert_conflicts() {
        let storage = MemoryStorage::new();
        storage.insert("st", document("ST-1", None)).await.unwrap();
        let err = storage.insert("st", document("ST-1", None)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_upsert_keeps_expiry() {
        let storage = MemoryStorage::new();
        let expire_at = Timestamp::now().checked_add(SignedDuration::from_secs(60)).unwrap();
        storage.insert("st", document("ST-1", Some(expire_at))).await.unwrap();

        storage
            .upsert_payload("st", "ST-1", "ServiceTicket", "{\"v\":2}")
            .await
            .unwrap();
        let found = storage.find("st", "ST-1").await.unwrap().unwrap();
        assert_eq!(found.payload, "{\"v\":2}");
        assert_eq!(found.expire_at, Some(expire_at));

        storage
            .upsert_payload("st", "ST-2", "ServiceTicket", "{}")
            .await
            .unwrap();
        let created = storage.find("st", "ST-2").await.unwrap().unwrap();
        assert_eq!(created.expire_at, None);
    }

    #[tokio::test]
    async fn test_conflicting_index_rejected() {
        let storage = MemoryStorage::new();
        storage.create_index("st", &IndexDescriptor::expiry(10)).await.unwrap();
        storage.create_index("st", &IndexDescriptor::expiry(10)).await.unwrap();
        assert_eq!(storage.list_indexes("st").await.unwrap().len(), 1);

        let err = storage
            .create_index("st", &IndexDescriptor::expiry(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        storage.drop_index("st", "expireAt").await.unwrap();
        assert!(storage.list_indexes("st").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_passive_expiry() {
        let storage = MemoryStorage::new();
        storage.create_index("st", &IndexDescriptor::expiry(5)).await.unwrap();

        let now = Timestamp::now();
        let expire_at = now.checked_add(SignedDuration::from_secs(10)).unwrap();
        storage.insert("st", document("ST-1", Some(expire_at))).await.unwrap();
        storage.insert("st", document("ST-2", None)).await.unwrap();

        let later = now.checked_add(SignedDuration::from_secs(14)).unwrap();
        assert_eq!(storage.purge_expired_at(later).await, 0);

        let later = now.checked_add(SignedDuration::from_secs(15)).unwrap();
        assert_eq!(storage.purge_expired_at(later).await, 1);
        assert!(storage.find("st", "ST-1").await.unwrap().is_none());
        assert!(storage.find("st", "ST-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_count_and_delete_all() {
        let storage = MemoryStorage::new();
        for i in 0..3 {
            storage
                .insert("st", document(&format!("ST-{i}"), None))
                .await
                .unwrap();
        }
        assert_eq!(storage.count("st").await.unwrap(), 3);
        assert_eq!(storage.delete_all("st").await.unwrap(), 3);
        assert_eq!(storage.count("st").await.unwrap(), 0);
        assert_eq!(storage.count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stream_skips_vanished_documents() {
        let storage = MemoryStorage::new();
        for i in 0..3 {
            storage
                .insert("st", document(&format!("ST-{i}"), None))
                .await
                .unwrap();
        }

        let mut stream = storage.stream("st").await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.id, "ST-0");

        storage.delete("st", "ST-1").await.unwrap();
        let rest: Vec<_> = stream.map(|doc| doc.unwrap().id).collect().await;
        assert_eq!(rest, vec!["ST-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        let err = storage.count("st").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);

        storage.set_available(true);
        assert_eq!(storage.count("st").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ensure_location_drop_existing() {
        let storage = MemoryStorage::new();
        storage.insert("st", document("ST-1", None)).await.unwrap();

        storage.ensure_location("st", false).await.unwrap();
        assert_eq!(storage.count("st").await.unwrap(), 1);

        storage.ensure_location("st", true).await.unwrap();
        assert_eq!(storage.count("st").await.unwrap(), 0);
        assert_eq!(storage.locations().await, vec!["st".to_string()]);
    }
}
