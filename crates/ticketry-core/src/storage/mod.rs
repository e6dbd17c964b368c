//! Physical storage contract.
//!
//! A [`StorageBackend`] stores [`StorageDocument`]s in named storage locations
//! (tables, collections, buckets) and maintains one expiry index per location.
//! Locations are named by the [`TicketCatalog`](crate::TicketCatalog); backends
//! know nothing about ticket types.

mod document;
mod memory;
pub mod provision;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use document::{
    FIELD_EXPIRE_AT, IndexDescriptor, OPTION_EXPIRE_AFTER_SECONDS, StorageDocument,
};
pub use memory::MemoryStorage;

use crate::Result;

/// Lazy sequence of documents read from one storage location.
pub type DocumentStream = BoxStream<'static, Result<StorageDocument>>;

/// Generic CRUD and index maintenance against a physical store.
///
/// Implementations are shared by every node of a cluster without any
/// coordination: every method must be safe to call concurrently from
/// independent processes. Failures to reach the store are reported as
/// [`ErrorKind::Transient`](crate::ErrorKind::Transient).
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Makes sure `location` exists, dropping and recreating it first when
    /// `drop_existing` is set.
    async fn ensure_location(&self, location: &str, drop_existing: bool) -> Result<()>;

    /// Lists the index descriptors of `location`.
    async fn list_indexes(&self, location: &str) -> Result<Vec<IndexDescriptor>>;

    /// Drops the index on `key`. Dropping a missing index is not an error.
    async fn drop_index(&self, location: &str, key: &str) -> Result<()>;

    /// Creates an index. Creating an identical index again is a no-op.
    async fn create_index(&self, location: &str, index: &IndexDescriptor) -> Result<()>;

    /// Inserts a new document. Duplicate ids are rejected by the store.
    async fn insert(&self, location: &str, document: StorageDocument) -> Result<()>;

    /// Replaces the payload of the document `id`, creating it without an
    /// expiry if absent. The stored `expireAt` is left untouched.
    async fn upsert_payload(
        &self,
        location: &str,
        id: &str,
        type_tag: &str,
        payload: &str,
    ) -> Result<()>;

    /// Finds a document by id.
    async fn find(&self, location: &str, id: &str) -> Result<Option<StorageDocument>>;

    /// Deletes a document by id, returning whether it existed.
    async fn delete(&self, location: &str, id: &str) -> Result<bool>;

    /// Counts the documents of `location`.
    async fn count(&self, location: &str) -> Result<u64>;

    /// Deletes every document of `location`, returning how many were removed.
    async fn delete_all(&self, location: &str) -> Result<u64>;

    /// Opens a lazy cursor over the documents of `location`.
    ///
    /// Documents removed while the cursor is open are skipped.
    async fn stream(&self, location: &str) -> Result<DocumentStream>;

    /// Reads every document of `location`.
    async fn find_all(&self, location: &str) -> Result<Vec<StorageDocument>> {
        use futures::TryStreamExt;

        self.stream(location).await?.try_collect().await
    }
}
