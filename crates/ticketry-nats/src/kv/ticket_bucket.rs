//! Mapping of storage locations onto KV buckets.
//!
//! Every storage location becomes one JetStream KV bucket whose underlying
//! stream is `KV_<bucket>`. Index descriptors live in that stream's metadata,
//! one entry per indexed key.

use std::collections::{BTreeMap, HashMap};

use async_nats::jetstream::kv;
use ticketry_core::storage::IndexDescriptor;

use crate::{Error, Result};

/// Metadata key prefix of index descriptors on a bucket stream.
pub const INDEX_METADATA_PREFIX: &str = "ticketry.index.";

/// KV bucket holding the documents of one storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketBucket {
    location: String,
    name: String,
}

impl TicketBucket {
    /// Resolves the bucket of `location`.
    ///
    /// Characters outside the bucket name alphabet (`A-Z a-z 0-9 _ -`) are
    /// replaced with `_`.
    pub fn new(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::invalid_config("storage location name cannot be empty"));
        }

        let name = location
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        Ok(Self {
            location: location.to_owned(),
            name,
        })
    }

    /// Storage location name.
    #[inline]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Bucket name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the stream backing the bucket.
    pub fn stream_name(&self) -> String {
        format!("KV_{}", self.name)
    }

    /// Bucket configuration used when the bucket does not exist yet.
    ///
    /// Only the latest revision of a ticket is kept and entries never age
    /// out on their own; expiry follows the location's index descriptors.
    pub fn kv_config(&self, replicas: usize) -> kv::Config {
        kv::Config {
            bucket: self.name.clone(),
            description: format!("Tickets stored in '{}'", self.location),
            history: 1,
            num_replicas: replicas,
            ..Default::default()
        }
    }
}

/// Returns true if `key` can be used as a KV key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && !key.ends_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/' | '=' | '.'))
}

/// Rejects keys outside the KV key alphabet.
pub fn checked_key(key: &str) -> Result<&str> {
    if is_valid_key(key) {
        Ok(key)
    } else {
        Err(Error::invalid_key(key))
    }
}

/// Metadata key of the index on `key`.
pub fn index_metadata_key(key: &str) -> String {
    format!("{INDEX_METADATA_PREFIX}{key}")
}

/// Encodes an index descriptor as a stream metadata entry.
pub fn index_metadata_entry(index: &IndexDescriptor) -> Result<(String, String)> {
    Ok((
        index_metadata_key(&index.key),
        serde_json::to_string(&index.options)?,
    ))
}

/// Decodes the index descriptors stored in stream metadata, sorted by key.
pub fn indexes_from_metadata(metadata: &HashMap<String, String>) -> Result<Vec<IndexDescriptor>> {
    let mut indexes = metadata
        .iter()
        .filter_map(|(name, value)| {
            name.strip_prefix(INDEX_METADATA_PREFIX)
                .map(|key| (key, value))
        })
        .map(|(key, value)| -> Result<IndexDescriptor> {
            let options: BTreeMap<String, i64> = serde_json::from_str(value)?;
            Ok(IndexDescriptor {
                key: key.to_owned(),
                options,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    indexes.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(indexes)
}
