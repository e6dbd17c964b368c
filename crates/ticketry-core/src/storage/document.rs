//! Persisted record shapes.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::serializer::SerializedTicket;

/// Name of the field carrying the document expiry.
pub const FIELD_EXPIRE_AT: &str = "expireAt";

/// Index option holding the TTL in seconds.
pub const OPTION_EXPIRE_AFTER_SECONDS: &str = "expireAfterSeconds";

/// Physical record of one ticket.
///
/// The serialized field names are part of the storage format and shared by
/// every node of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDocument {
    /// Codec-encoded ticket id, the primary key.
    pub id: String,
    /// Serialized ticket body.
    pub payload: String,
    /// Decoder tag of the ticket variant.
    #[serde(rename = "type")]
    pub type_tag: String,
    /// When the store may start considering the document for expiry.
    /// `None` means never.
    #[serde(rename = "expireAt", default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<Timestamp>,
}

impl StorageDocument {
    /// Creates a document from a serialized ticket.
    pub fn new(
        id: impl Into<String>,
        ticket: SerializedTicket,
        expire_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id: id.into(),
            payload: ticket.payload,
            type_tag: ticket.type_tag,
            expire_at,
        }
    }

    /// Returns whether a store honoring `index` would have purged this
    /// document by `now`.
    ///
    /// Documents without `expireAt`, and indexes with a TTL below one
    /// second, never expire.
    pub fn is_purgeable(&self, index: &IndexDescriptor, now: Timestamp) -> bool {
        let (Some(expire_at), Some(ttl)) = (self.expire_at, index.ttl_seconds()) else {
            return false;
        };
        if ttl < 1 {
            return false;
        }
        match expire_at.checked_add(jiff::SignedDuration::from_secs(ttl)) {
            Ok(deadline) => now >= deadline,
            Err(_) => false,
        }
    }

    /// Returns whether any of a location's `indexes` would have purged this
    /// document by `now`.
    pub fn is_purgeable_by(&self, indexes: &[IndexDescriptor], now: Timestamp) -> bool {
        indexes.iter().any(|index| self.is_purgeable(index, now))
    }
}

/// Backend-level index attached to a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Indexed field.
    pub key: String,
    /// Index options, such as the expiry TTL.
    #[serde(default)]
    pub options: BTreeMap<String, i64>,
}

impl IndexDescriptor {
    /// Creates an index on `key` without options.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            options: BTreeMap::new(),
        }
    }

    /// Creates the expiry index on [`FIELD_EXPIRE_AT`] with `ttl_seconds`.
    pub fn expiry(ttl_seconds: i64) -> Self {
        Self::new(FIELD_EXPIRE_AT).with_option(OPTION_EXPIRE_AFTER_SECONDS, ttl_seconds)
    }

    /// Adds an option.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: i64) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    /// Returns the expiry TTL, if this is an expiry index.
    pub fn ttl_seconds(&self) -> Option<i64> {
        if self.key != FIELD_EXPIRE_AT {
            return None;
        }
        self.options.get(OPTION_EXPIRE_AFTER_SECONDS).copied()
    }

    /// Returns true if `other` indexes the same key with different options,
    /// including extra or missing ones.
    pub fn conflicts_with(&self, other: &IndexDescriptor) -> bool {
        self.key == other.key && self.options != other.options
    }
}
