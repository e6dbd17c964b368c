//! Idempotent provisioning of storage locations.
//!
//! Server processes restart independently, so every process reconciles the
//! expiry index of every location at startup. Reconciliation reads the
//! existing indexes first and drops a same-key index only when its options
//! differ from the configured ones, which keeps two processes from ever
//! creating conflicting expiry indexes on the same field.

use super::{FIELD_EXPIRE_AT, IndexDescriptor, StorageBackend};
use crate::{Error, Result, TRACING_TARGET_PROVISION};

/// Result of reconciling the expiry index of one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No expiry index existed; it was created.
    Created,
    /// The configured expiry index already existed.
    Unchanged,
    /// An expiry index with different options was dropped and recreated.
    Replaced {
        /// The dropped index.
        previous: IndexDescriptor,
    },
}

/// Brings the expiry index of `location` to `ttl_seconds`.
///
/// A concurrent run on another node may briefly leave the location without
/// an expiry index; both runs converge on the same descriptor.
#[tracing::instrument(skip(storage), target = TRACING_TARGET_PROVISION)]
pub async fn reconcile_expiry_index<S>(
    storage: &S,
    location: &str,
    ttl_seconds: i64,
) -> Result<ReconcileOutcome>
where
    S: StorageBackend + ?Sized,
{
    let target = IndexDescriptor::expiry(ttl_seconds);
    let existing = storage.list_indexes(location).await?;

    let differing = existing
        .iter()
        .find(|index| index.conflicts_with(&target))
        .cloned();
    let already_present = existing.contains(&target);

    if let Some(previous) = &differing {
        tracing::debug!(
            target: TRACING_TARGET_PROVISION,
            location = %location,
            previous = ?previous.options,
            configured = ?target.options,
            "Removing expiry index because it exists in a different form"
        );
        storage.drop_index(location, FIELD_EXPIRE_AT).await?;
    }

    storage.create_index(location, &target).await?;

    let outcome = match differing {
        Some(previous) => ReconcileOutcome::Replaced { previous },
        None if already_present => ReconcileOutcome::Unchanged,
        None => ReconcileOutcome::Created,
    };

    tracing::debug!(
        target: TRACING_TARGET_PROVISION,
        location = %location,
        ttl_secs = ttl_seconds,
        outcome = ?outcome,
        "Reconciled expiry index"
    );
    Ok(outcome)
}

/// Creates `location` if needed and reconciles its expiry index.
///
/// Any failure is reported as
/// [`ErrorKind::Provisioning`](crate::ErrorKind::Provisioning): the location
/// must not be treated as durably stored.
#[tracing::instrument(skip(storage), target = TRACING_TARGET_PROVISION)]
pub async fn provision_location<S>(
    storage: &S,
    location: &str,
    ttl_seconds: i64,
    drop_existing: bool,
) -> Result<ReconcileOutcome>
where
    S: StorageBackend + ?Sized,
{
    let provision = async {
        storage.ensure_location(location, drop_existing).await?;
        reconcile_expiry_index(storage, location, ttl_seconds).await
    };

    provision.await.map_err(|err| {
        Error::provisioning()
            .with_message(format!("failed to provision storage location '{location}'"))
            .with_source(err)
    })
}
