//! NATS Key-Value ticket storage.
//!
//! This module maps the ticket storage contract onto JetStream KV:
//! - `TicketBucket`: naming of the bucket and stream behind a storage location
//! - `NatsTicketStorage`: the [`StorageBackend`](ticketry_core::StorageBackend)
//!   implementation
//!
//! # Example
//!
//! ```ignore
//! let client = NatsClient::connect(config).await?;
//! let registry = TicketRegistry::new(
//!     client.ticket_storage(),
//!     Arc::new(catalog),
//!     TicketSerializer::with_defaults(),
//!     RegistryConfig::default(),
//! )
//! .await;
//! ```

mod ticket_bucket;
mod ticket_storage;

pub use ticket_bucket::{
    INDEX_METADATA_PREFIX, TicketBucket, checked_key, index_metadata_entry, index_metadata_key,
    indexes_from_metadata, is_valid_key,
};
pub use ticket_storage::NatsTicketStorage;
