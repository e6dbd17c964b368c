//! Public ticket registry consumed by the authentication core.
//!
//! [`TicketRegistry`] composes the catalog (where a ticket type lives), the id
//! codec (how ids become storage keys), the serializer (how tickets become
//! payloads) and a [`StorageBackend`]. Every failure is logged here, at the
//! boundary, and returned as a structured [`Error`]; callers that prefer to
//! treat an unreachable store as "ticket absent" use
//! [`Degrade::degrade`](crate::Degrade::degrade).

mod registry_config;

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use jiff::{SignedDuration, Timestamp};
pub use registry_config::RegistryConfig;
use tokio::sync::RwLock;

use crate::catalog::{TicketCatalog, TicketDefinition};
use crate::codec::TicketIdCodec;
use crate::serializer::TicketSerializer;
use crate::storage::provision::{ReconcileOutcome, provision_location};
use crate::storage::{StorageBackend, StorageDocument};
use crate::ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketVariant};
use crate::{Error, Result, TRACING_TARGET_REGISTRY};

/// Stream of tickets read back from storage.
pub type TicketStream = BoxStream<'static, Result<Box<dyn Ticket>>>;

/// Provisioning result of one storage location.
#[derive(Debug)]
pub struct ProvisionReport {
    /// Storage location name.
    pub location: String,
    /// Expiry index TTL the location was provisioned with.
    pub ttl_seconds: i64,
    /// Reconciliation outcome, or why provisioning failed.
    pub outcome: Result<ReconcileOutcome>,
}

/// Storage engine facade for tickets.
///
/// This registry is cheaply cloneable and thread-safe; clones share the same
/// storage backend and provisioning state.
pub struct TicketRegistry<S> {
    inner: Arc<TicketRegistryInner<S>>,
}

struct TicketRegistryInner<S> {
    storage: S,
    catalog: Arc<dyn TicketCatalog>,
    serializer: TicketSerializer,
    codec: Arc<dyn TicketIdCodec>,
    config: RegistryConfig,
    unprovisioned: RwLock<HashSet<String>>,
}

impl<S> Clone for TicketRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StorageBackend> TicketRegistry<S> {
    /// Creates a registry and provisions every storage location the catalog
    /// knows about, using the codec selected by `config`.
    pub async fn new(
        storage: S,
        catalog: Arc<dyn TicketCatalog>,
        serializer: TicketSerializer,
        config: RegistryConfig,
    ) -> Self {
        let codec = config.id_codec.build();
        Self::with_codec(storage, catalog, serializer, codec, config).await
    }

    /// Creates a registry with a custom id codec.
    ///
    /// Locations that fail to provision are logged and marked unprovisioned:
    /// writes of ticket types stored there fail with
    /// [`ErrorKind::Provisioning`](crate::ErrorKind::Provisioning) until
    /// [`provision`](Self::provision) succeeds for them.
    #[tracing::instrument(skip_all, target = TRACING_TARGET_REGISTRY)]
    pub async fn with_codec(
        storage: S,
        catalog: Arc<dyn TicketCatalog>,
        serializer: TicketSerializer,
        codec: Arc<dyn TicketIdCodec>,
        config: RegistryConfig,
    ) -> Self {
        let registry = Self {
            inner: Arc::new(TicketRegistryInner {
                storage,
                catalog,
                serializer,
                codec,
                config,
                unprovisioned: RwLock::new(HashSet::new()),
            }),
        };

        let drop_existing = registry.inner.config.drop_existing;
        let reports = registry.provision_all(drop_existing).await;
        let failed = reports.iter().filter(|r| r.outcome.is_err()).count();

        tracing::info!(
            target: TRACING_TARGET_REGISTRY,
            locations = reports.len(),
            failed = failed,
            codec = ?registry.inner.codec,
            "Configured ticket registry"
        );
        registry
    }

    /// Re-runs expiry index reconciliation on every storage location.
    ///
    /// Never drops data. Locations that provision successfully become
    /// writable again.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn provision(&self) -> Vec<ProvisionReport> {
        self.provision_all(false).await
    }

    async fn provision_all(&self, drop_existing: bool) -> Vec<ProvisionReport> {
        let mut reports = Vec::new();
        for (location, ttl_seconds) in self.locations(self.inner.catalog.definitions()) {
            let outcome = provision_location(
                &self.inner.storage,
                &location,
                ttl_seconds,
                drop_existing,
            )
            .await;

            let mut unprovisioned = self.inner.unprovisioned.write().await;
            match &outcome {
                Ok(_) => {
                    unprovisioned.remove(&location);
                }
                Err(err) => {
                    tracing::error!(
                        target: TRACING_TARGET_REGISTRY,
                        location = %location,
                        error = %err,
                        "Storage location is not provisioned; tickets stored there are not durable"
                    );
                    unprovisioned.insert(location.clone());
                }
            }

            reports.push(ProvisionReport {
                location,
                ttl_seconds,
                outcome,
            });
        }
        reports
    }

    /// Persists a new ticket.
    ///
    /// Returns `Ok(false)` if the catalog has no definition or storage
    /// location for the ticket.
    #[tracing::instrument(
        skip_all,
        fields(ticket_id = %ticket.id()),
        target = TRACING_TARGET_REGISTRY
    )]
    pub async fn add(&self, ticket: &dyn Ticket) -> Result<bool> {
        self.add_ticket(ticket).await.inspect_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket.id(),
                error = %err,
                "Failed adding ticket"
            );
        })
    }

    async fn add_ticket(&self, ticket: &dyn Ticket) -> Result<bool> {
        let Some(location) = self.location_for_ticket(ticket) else {
            return Ok(false);
        };
        self.ensure_provisioned(location).await?;

        let Some(key) = self.inner.codec.encode(ticket.id()) else {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket.id(),
                "Ticket id cannot be encoded into a storage key"
            );
            return Ok(false);
        };

        let serialized = self.inner.serializer.serialize(ticket)?;
        let expire_at = expire_at(ticket, Timestamp::now());
        let document = StorageDocument::new(key, serialized, expire_at);
        self.inner.storage.insert(location, document).await?;

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            ticket_id = %ticket.id(),
            location = %location,
            expire_at = ?expire_at,
            "Added ticket"
        );
        Ok(true)
    }

    /// Replaces the stored payload of a ticket, creating the document if it
    /// is missing.
    ///
    /// The stored expiry is left untouched: renewal is decided by the
    /// ticket's own state when it is read back.
    #[tracing::instrument(
        skip_all,
        fields(ticket_id = %ticket.id()),
        target = TRACING_TARGET_REGISTRY
    )]
    pub async fn update(&self, ticket: &dyn Ticket) -> Result<bool> {
        self.update_ticket(ticket).await.inspect_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket.id(),
                error = %err,
                "Failed updating ticket"
            );
        })
    }

    async fn update_ticket(&self, ticket: &dyn Ticket) -> Result<bool> {
        let Some(location) = self.location_for_ticket(ticket) else {
            return Ok(false);
        };
        self.ensure_provisioned(location).await?;

        let Some(key) = self.inner.codec.encode(ticket.id()) else {
            return Ok(false);
        };

        let serialized = self.inner.serializer.serialize(ticket)?;
        self.inner
            .storage
            .upsert_payload(location, &key, &serialized.type_tag, &serialized.payload)
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            ticket_id = %ticket.id(),
            location = %location,
            "Updated ticket"
        );
        Ok(true)
    }

    /// Retrieves a ticket by id.
    ///
    /// A ticket whose policy reports it expired is deleted and reported as
    /// absent, even if the store has not purged it yet.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn get(&self, ticket_id: &str) -> Result<Option<Box<dyn Ticket>>> {
        self.get_ticket(ticket_id).await.inspect_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                error = %err,
                "Failed fetching ticket"
            );
        })
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Box<dyn Ticket>>> {
        let Some(key) = self.inner.codec.encode(ticket_id) else {
            tracing::debug!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                "Ticket id could not be encoded"
            );
            return Ok(None);
        };
        let Some(definition) = self.inner.catalog.find_by_id(ticket_id) else {
            tracing::debug!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                "Ticket definition could not be found in the catalog"
            );
            return Ok(None);
        };
        let location = definition.storage_name();

        let Some(document) = self.inner.storage.find(location, &key).await? else {
            tracing::debug!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                location = %location,
                "Ticket could not be found"
            );
            return Ok(None);
        };

        let ticket = self
            .inner
            .serializer
            .deserialize(&document.type_tag, &document.payload)?;

        if ticket.is_expired() {
            tracing::debug!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                "Ticket has expired and is now removed from storage"
            );
            // Losing the race to passive expiry is fine, the ticket is gone
            // either way.
            if let Err(err) = self.inner.storage.delete(location, &key).await {
                tracing::warn!(
                    target: TRACING_TARGET_REGISTRY,
                    ticket_id = %ticket_id,
                    error = %err,
                    "Failed removing expired ticket"
                );
            }
            return Ok(None);
        }

        Ok(Some(ticket))
    }

    /// Reads every stored ticket of every known ticket type, deduplicated by
    /// ticket id.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn get_all(&self) -> Result<Vec<Box<dyn Ticket>>> {
        let mut seen = HashSet::new();
        let mut tickets = Vec::new();

        for (location, _) in self.locations(self.inner.catalog.definitions()) {
            let documents = self
                .inner
                .storage
                .find_all(&location)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        target: TRACING_TARGET_REGISTRY,
                        location = %location,
                        error = %err,
                        "Failed reading tickets"
                    );
                })?;

            for document in documents {
                let ticket = self
                    .inner
                    .serializer
                    .deserialize(&document.type_tag, &document.payload)?;
                if seen.insert(ticket.id().to_owned()) {
                    tickets.push(ticket);
                }
            }
        }

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            count = tickets.len(),
            "Retrieved all tickets"
        );
        Ok(tickets)
    }

    /// Lazily reads every stored ticket, one storage location after another.
    ///
    /// Each location is read through its own cursor, so the whole registry is
    /// never held in memory. Tickets removed during traversal are skipped.
    /// The stream ends after the first error.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub fn stream_all(&self) -> TicketStream {
        let registry = self.clone();
        let locations = self.locations(self.inner.catalog.definitions());
        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            locations = locations.len(),
            "Opened ticket stream"
        );

        Box::pin(async_stream::stream! {
            for (location, _) in locations {
                let mut documents = match registry.inner.storage.stream(&location).await {
                    Ok(documents) => documents,
                    Err(err) => {
                        tracing::error!(
                            target: TRACING_TARGET_REGISTRY,
                            location = %location,
                            error = %err,
                            "Failed opening ticket cursor"
                        );
                        yield Err(err);
                        return;
                    }
                };

                while let Some(document) = documents.next().await {
                    let ticket = document.and_then(|document| {
                        registry
                            .inner
                            .serializer
                            .deserialize(&document.type_tag, &document.payload)
                    });
                    match ticket {
                        Ok(ticket) => yield Ok(ticket),
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Deletes a ticket by id.
    ///
    /// Returns `Ok(true)` once the delete was issued, whether or not the
    /// ticket was still stored.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn delete(&self, ticket_id: &str) -> Result<bool> {
        self.delete_ticket(ticket_id).await.inspect_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket_id,
                error = %err,
                "Failed deleting ticket"
            );
        })
    }

    async fn delete_ticket(&self, ticket_id: &str) -> Result<bool> {
        let Some(key) = self.inner.codec.encode(ticket_id) else {
            return Ok(false);
        };
        let Some(definition) = self.inner.catalog.find_by_id(ticket_id) else {
            return Ok(false);
        };

        let existed = self
            .inner
            .storage
            .delete(definition.storage_name(), &key)
            .await?;

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            ticket_id = %ticket_id,
            existed = existed,
            "Deleted ticket"
        );
        Ok(true)
    }

    /// Deletes every ticket of every known ticket type, returning how many
    /// were removed.
    ///
    /// Locations are cleared one after another; a ticket added concurrently
    /// may or may not survive.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn delete_all(&self) -> Result<u64> {
        let mut removed = 0;
        for (location, _) in self.locations(self.inner.catalog.definitions()) {
            removed += self
                .inner
                .storage
                .delete_all(&location)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        target: TRACING_TARGET_REGISTRY,
                        location = %location,
                        error = %err,
                        "Failed deleting tickets"
                    );
                })?;
        }

        tracing::debug!(
            target: TRACING_TARGET_REGISTRY,
            removed = removed,
            "Deleted all tickets"
        );
        Ok(removed)
    }

    /// Counts stored tickets of `ticket_type` and of its subtypes.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_REGISTRY)]
    pub async fn count_by_type(&self, ticket_type: &str) -> Result<u64> {
        let mut count = 0;
        for (location, _) in self.locations(self.inner.catalog.definitions_for_type(ticket_type)) {
            count += self
                .inner
                .storage
                .count(&location)
                .await
                .inspect_err(|err| {
                    tracing::error!(
                        target: TRACING_TARGET_REGISTRY,
                        location = %location,
                        error = %err,
                        "Failed counting tickets"
                    );
                })?;
        }
        Ok(count)
    }

    /// Number of live single-sign-on sessions.
    pub async fn session_count(&self) -> Result<u64> {
        self.count_by_type(TicketGrantingTicket::TYPE_TAG).await
    }

    /// Number of outstanding service tickets.
    pub async fn service_ticket_count(&self) -> Result<u64> {
        self.count_by_type(ServiceTicket::TYPE_TAG).await
    }

    /// Returns the storage backend.
    pub fn storage(&self) -> &S {
        &self.inner.storage
    }

    /// Returns the ticket catalog.
    pub fn catalog(&self) -> &dyn TicketCatalog {
        self.inner.catalog.as_ref()
    }

    /// Returns the ticket serializer.
    pub fn serializer(&self) -> &TicketSerializer {
        &self.inner.serializer
    }

    /// Returns the id codec.
    pub fn codec(&self) -> &dyn TicketIdCodec {
        self.inner.codec.as_ref()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Resolves the storage location of a ticket, logging why when it can't.
    fn location_for_ticket<'a>(&'a self, ticket: &dyn Ticket) -> Option<&'a str> {
        let Some(definition) = self.inner.catalog.find_by_ticket(ticket) else {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket.id(),
                "Could not locate ticket definition in the catalog"
            );
            return None;
        };

        let location = definition.storage_name();
        if location.trim().is_empty() {
            tracing::error!(
                target: TRACING_TARGET_REGISTRY,
                ticket_id = %ticket.id(),
                ticket_type = %definition.ticket_type(),
                "Could not locate storage location linked to ticket definition"
            );
            return None;
        }
        Some(location)
    }

    async fn ensure_provisioned(&self, location: &str) -> Result<()> {
        if self.inner.unprovisioned.read().await.contains(location) {
            return Err(Error::provisioning().with_message(format!(
                "storage location '{location}' is not provisioned"
            )));
        }
        Ok(())
    }

    /// Distinct non-blank storage locations of `definitions`, in order, with
    /// the TTL of the first definition using each.
    fn locations(&self, definitions: Vec<&TicketDefinition>) -> Vec<(String, i64)> {
        let mut locations: Vec<(String, i64)> = Vec::new();
        for definition in definitions {
            let name = definition.storage_name();
            if name.trim().is_empty() {
                continue;
            }
            match locations.iter().find(|(existing, _)| existing == name) {
                Some((_, ttl)) if *ttl != definition.storage_timeout() => {
                    tracing::warn!(
                        target: TRACING_TARGET_REGISTRY,
                        location = %name,
                        ticket_type = %definition.ticket_type(),
                        configured = *ttl,
                        ignored = definition.storage_timeout(),
                        "Storage location shared by ticket types with different timeouts"
                    );
                }
                Some(_) => {}
                None => locations.push((name.to_owned(), definition.storage_timeout())),
            }
        }
        locations
    }
}

/// When the store may start considering the ticket for expiry, `None` if the
/// ticket's TTL is below one second.
fn expire_at(ticket: &dyn Ticket, now: Timestamp) -> Option<Timestamp> {
    let ttl = ticket.time_to_live();
    if ttl < 1 {
        return None;
    }
    now.checked_add(SignedDuration::from_secs(ttl)).ok()
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use tracing_subscriber::EnvFilter;

    use super::*;
    use crate::catalog::{CatalogConfig, DefaultTicketCatalog};
    use crate::codec::{DigestIdCodec, IdCodecKind};
    use crate::serializer::SerializedTicket;
    use crate::storage::{IndexDescriptor, MemoryStorage};
    use crate::ticket::{ExpirationPolicy, ProxyGrantingTicket, TicketState};
    use crate::{Degrade, ErrorKind};

    const SERVICE: &str = "https://app.example.org";
    const TGT_LOCATION: &str = "ticketGrantingTicketsCollection";
    const ST_LOCATION: &str = "serviceTicketsCollection";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn registry_with(
        storage: MemoryStorage,
        catalog: DefaultTicketCatalog,
        config: RegistryConfig,
    ) -> TicketRegistry<MemoryStorage> {
        init_tracing();
        TicketRegistry::new(
            storage,
            Arc::new(catalog),
            TicketSerializer::with_defaults(),
            config,
        )
        .await
    }

    async fn registry() -> TicketRegistry<MemoryStorage> {
        registry_with(
            MemoryStorage::new(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::default(),
        )
        .await
    }

    fn service_ticket(id: &str, ttl: i64) -> ServiceTicket {
        ServiceTicket::new(id, SERVICE, "TGT-1", ExpirationPolicy::hard_timeout(ttl))
    }

    fn session(id: &str) -> TicketGrantingTicket {
        TicketGrantingTicket::new(id, "casuser", ExpirationPolicy::ticket_granting(28_800, 7_200))
    }

    fn seconds_from_now(secs: i64) -> Timestamp {
        Timestamp::now()
            .checked_add(SignedDuration::from_secs(secs))
            .unwrap()
    }

    #[derive(Debug)]
    struct LoginTicket {
        id: String,
        policy: ExpirationPolicy,
    }

    impl Ticket for LoginTicket {
        fn id(&self) -> &str {
            &self.id
        }

        fn prefix(&self) -> &str {
            "LT"
        }

        fn expiration_policy(&self) -> &ExpirationPolicy {
            &self.policy
        }
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let registry = registry().await;
        let ticket = service_ticket("ST-1", 10);

        let before = seconds_from_now(10);
        assert!(registry.add(&ticket).await.unwrap());
        let after = seconds_from_now(10);

        let found = registry.get("ST-1").await.unwrap().unwrap();
        assert_eq!(found.downcast_ref::<ServiceTicket>(), Some(&ticket));

        let document = registry
            .storage()
            .find(ST_LOCATION, "ST-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.type_tag, "ServiceTicket");
        let expire_at = document.expire_at.unwrap();
        assert!(expire_at >= before && expire_at <= after);
    }

    #[tokio::test]
    async fn test_duplicate_add_conflicts() {
        let registry = registry().await;
        let ticket = service_ticket("ST-1", 10);
        registry.add(&ticket).await.unwrap();

        let err = registry.add(&ticket).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_transient());

        let err = registry.add(&ticket).await.degrade().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_never_expiring_ticket_has_no_expiry() {
        let registry = registry().await;
        let ticket = TicketGrantingTicket::new("TGT-1", "casuser", ExpirationPolicy::NeverExpires);
        registry.add(&ticket).await.unwrap();

        let document = registry
            .storage()
            .find(TGT_LOCATION, "TGT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.expire_at, None);

        let purged = registry
            .storage()
            .purge_expired_at(seconds_from_now(10 * 365 * 86_400))
            .await;
        assert_eq!(purged, 0);
        assert!(registry.get("TGT-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_passive_expiry_after_ttl() {
        let registry = registry().await;
        registry.add(&service_ticket("ST-1", 10)).await.unwrap();

        // Document TTL of 10 plus the location's index TTL of 10.
        assert_eq!(registry.storage().purge_expired_at(seconds_from_now(15)).await, 0);
        assert_eq!(registry.storage().purge_expired_at(seconds_from_now(25)).await, 1);
        assert!(registry.get("ST-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_removes_expired_ticket() {
        let registry = registry().await;
        let mut ticket = service_ticket("ST-1", 10);
        ticket.state = TicketState::new(seconds_from_now(-20));
        registry.add(&ticket).await.unwrap();
        assert_eq!(registry.service_ticket_count().await.unwrap(), 1);

        assert!(registry.get("ST-1").await.unwrap().is_none());
        assert!(
            registry
                .storage()
                .find(ST_LOCATION, "ST-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_used_up_ticket_is_absent() {
        let registry = registry().await;
        let ticket =
            ServiceTicket::new("ST-1", SERVICE, "TGT-1", ExpirationPolicy::multi_use(1, 10));
        registry.add(&ticket).await.unwrap();

        let found = registry.get("ST-1").await.unwrap().unwrap();
        let mut validated = found.downcast_ref::<ServiceTicket>().unwrap().clone();
        validated.state.record_use();
        assert!(registry.update(&validated).await.unwrap());

        assert!(registry.get("ST-1").await.unwrap().is_none());
        assert_eq!(registry.service_ticket_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_keeps_expiry() {
        let registry = registry().await;
        let mut ticket = session("TGT-1");
        registry.add(&ticket).await.unwrap();
        let stored = registry
            .storage()
            .find(TGT_LOCATION, "TGT-1")
            .await
            .unwrap()
            .unwrap();

        ticket.grant_service("ST-1", SERVICE);
        assert!(registry.update(&ticket).await.unwrap());

        let updated = registry
            .storage()
            .find(TGT_LOCATION, "TGT-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.expire_at, stored.expire_at);
        assert_ne!(updated.payload, stored.payload);

        let found = registry.get("TGT-1").await.unwrap().unwrap();
        let found = found.downcast_ref::<TicketGrantingTicket>().unwrap();
        assert!(found.services.contains_key("ST-1"));
    }

    #[tokio::test]
    async fn test_update_creates_missing_document() {
        let registry = registry().await;
        assert!(registry.update(&service_ticket("ST-9", 10)).await.unwrap());

        let document = registry
            .storage()
            .find(ST_LOCATION, "ST-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.expire_at, None);
        assert!(registry.get("ST-9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unknown_prefix_fails_silently() {
        let registry = registry().await;
        let ticket = service_ticket("XYZ-1", 10);

        assert!(!registry.add(&ticket).await.unwrap());
        assert!(!registry.update(&ticket).await.unwrap());
        assert!(registry.get("XYZ-1").await.unwrap().is_none());
        assert!(!registry.delete("XYZ-1").await.unwrap());
        assert!(registry.get("no-separator").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = registry().await;
        registry.add(&service_ticket("ST-1", 10)).await.unwrap();

        assert!(registry.delete("ST-1").await.unwrap());
        assert!(registry.get("ST-1").await.unwrap().is_none());
        // Already gone: the delete is still issued.
        assert!(registry.delete("ST-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_counts_and_delete_all() {
        let registry = registry().await;
        registry.add(&session("TGT-1")).await.unwrap();
        registry.add(&session("TGT-2")).await.unwrap();
        registry
            .add(&ProxyGrantingTicket::new(
                "PGT-1",
                "casuser",
                "https://proxy.example.org/callback",
                ExpirationPolicy::hard_timeout(28_800),
            ))
            .await
            .unwrap();
        registry.add(&service_ticket("ST-1", 10)).await.unwrap();

        assert_eq!(registry.session_count().await.unwrap(), 3);
        assert_eq!(registry.count_by_type(ProxyGrantingTicket::TYPE_TAG).await.unwrap(), 1);
        assert_eq!(registry.service_ticket_count().await.unwrap(), 1);
        assert_eq!(registry.count_by_type("Unknown").await.unwrap(), 0);

        assert_eq!(registry.delete_all().await.unwrap(), 4);
        assert_eq!(registry.session_count().await.unwrap(), 0);
        assert_eq!(registry.service_ticket_count().await.unwrap(), 0);
        assert!(registry.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_matches_get_all() {
        let registry = registry().await;
        for i in 0..3 {
            registry.add(&session(&format!("TGT-{i}"))).await.unwrap();
            registry
                .add(&service_ticket(&format!("ST-{i}"), 10))
                .await
                .unwrap();
        }

        let mut listed: Vec<String> = registry
            .get_all()
            .await
            .unwrap()
            .iter()
            .map(|ticket| ticket.id().to_owned())
            .collect();
        let mut streamed: Vec<String> = registry
            .stream_all()
            .map_ok(|ticket| ticket.id().to_owned())
            .try_collect()
            .await
            .unwrap();

        listed.sort();
        streamed.sort();
        assert_eq!(listed.len(), 6);
        assert_eq!(listed, streamed);
    }

    #[tokio::test]
    async fn test_stream_stops_on_error() {
        let registry = registry().await;
        registry.add(&session("TGT-1")).await.unwrap();
        registry.storage().set_available(false);

        let results: Vec<_> = registry.stream_all().collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap_err().kind(),
            ErrorKind::Transient
        );
    }

    #[tokio::test]
    async fn test_shared_location_visited_once() {
        let catalog = DefaultTicketCatalog::new()
            .with_definition(TicketDefinition::new(
                TicketGrantingTicket::TYPE_TAG,
                TicketGrantingTicket::PREFIX,
                "sessions",
                28_800,
            ))
            .with_definition(
                TicketDefinition::new(
                    ProxyGrantingTicket::TYPE_TAG,
                    ProxyGrantingTicket::PREFIX,
                    "sessions",
                    28_800,
                )
                .with_supertype(TicketGrantingTicket::TYPE_TAG)
                .with_order(1),
            );
        let registry =
            registry_with(MemoryStorage::new(), catalog, RegistryConfig::default()).await;

        registry.add(&session("TGT-1")).await.unwrap();
        registry
            .add(&ProxyGrantingTicket::new(
                "PGT-1",
                "casuser",
                "https://proxy.example.org/callback",
                ExpirationPolicy::NeverExpires,
            ))
            .await
            .unwrap();

        assert_eq!(registry.get_all().await.unwrap().len(), 2);
        let streamed: Vec<_> = registry.stream_all().try_collect().await.unwrap();
        assert_eq!(streamed.len(), 2);
        assert_eq!(registry.session_count().await.unwrap(), 2);
        assert_eq!(registry.delete_all().await.unwrap(), 2);
        assert_eq!(registry.storage().locations().await, vec!["sessions".to_string()]);
    }

    #[tokio::test]
    async fn test_unregistered_ticket_type_fails_loudly() {
        let catalog = DefaultTicketCatalog::from_config(&CatalogConfig::default())
            .with_definition(TicketDefinition::new("LoginTicket", "LT", "loginTickets", 60));
        let registry =
            registry_with(MemoryStorage::new(), catalog, RegistryConfig::default()).await;

        let ticket = LoginTicket {
            id: "LT-1".into(),
            policy: ExpirationPolicy::hard_timeout(60),
        };
        let err = registry.add(&ticket).await.degrade().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(registry.count_by_type("LoginTicket").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_stored_type_fails_loudly() {
        let registry = registry().await;
        registry
            .storage()
            .insert(
                ST_LOCATION,
                StorageDocument::new(
                    "ST-1",
                    SerializedTicket {
                        type_tag: "RetiredTicket".into(),
                        payload: "{}".into(),
                    },
                    None,
                ),
            )
            .await
            .unwrap();

        let err = registry.get("ST-1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_unavailable_backend_degrades() {
        let registry = registry().await;
        registry.add(&service_ticket("ST-1", 10)).await.unwrap();
        registry.storage().set_available(false);

        let err = registry.get("ST-1").await.unwrap_err();
        assert!(err.is_transient());

        assert!(registry.get("ST-1").await.degrade().unwrap().is_none());
        assert!(!registry.add(&service_ticket("ST-2", 10)).await.degrade().unwrap());
        assert_eq!(registry.service_ticket_count().await.degrade().unwrap(), 0);
        assert!(registry.get_all().await.degrade().unwrap().is_empty());

        registry.storage().set_available(true);
        assert!(registry.get("ST-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_provisions_expiry_indexes() {
        let registry = registry().await;
        let storage = registry.storage();

        assert_eq!(
            storage.list_indexes(ST_LOCATION).await.unwrap(),
            vec![IndexDescriptor::expiry(10)]
        );
        assert_eq!(
            storage.list_indexes(TGT_LOCATION).await.unwrap(),
            vec![IndexDescriptor::expiry(28_800)]
        );
        assert_eq!(storage.locations().await.len(), 3);
    }

    #[tokio::test]
    async fn test_reconfigured_timeout_converges() {
        let first = registry().await;
        let storage = first.storage().clone();

        let second = registry_with(
            storage.clone(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default().with_st_timeout_secs(30)),
            RegistryConfig::default(),
        )
        .await;
        assert_eq!(
            storage.list_indexes(ST_LOCATION).await.unwrap(),
            vec![IndexDescriptor::expiry(30)]
        );

        let reports = second.provision().await;
        assert!(reports.iter().all(|report| {
            matches!(report.outcome, Ok(ReconcileOutcome::Unchanged))
        }));

        let reports = first.provision().await;
        let st = reports
            .iter()
            .find(|report| report.location == ST_LOCATION)
            .unwrap();
        assert_eq!(st.ttl_seconds, 10);
        assert!(matches!(
            &st.outcome,
            Ok(ReconcileOutcome::Replaced { previous }) if *previous == IndexDescriptor::expiry(30)
        ));
    }

    #[tokio::test]
    async fn test_unprovisioned_location_rejects_writes() {
        let storage = MemoryStorage::new();
        storage.set_available(false);
        let registry = registry_with(
            storage.clone(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::default(),
        )
        .await;
        storage.set_available(true);

        let err = registry.add(&service_ticket("ST-1", 10)).await.degrade().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning);
        assert!(registry.get("ST-1").await.unwrap().is_none());

        let reports = registry.provision().await;
        assert!(reports.iter().all(|report| report.outcome.is_ok()));
        assert!(registry.add(&service_ticket("ST-1", 10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_existing() {
        let storage = MemoryStorage::new();
        let seeded = registry_with(
            storage.clone(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::default(),
        )
        .await;
        seeded.add(&service_ticket("ST-1", 10)).await.unwrap();

        let kept = registry_with(
            storage.clone(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::default(),
        )
        .await;
        assert_eq!(kept.service_ticket_count().await.unwrap(), 1);

        let dropped = registry_with(
            storage.clone(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::new().with_drop_existing(true),
        )
        .await;
        assert_eq!(dropped.service_ticket_count().await.unwrap(), 0);
        assert_eq!(
            storage.list_indexes(ST_LOCATION).await.unwrap(),
            vec![IndexDescriptor::expiry(10)]
        );
    }

    #[tokio::test]
    async fn test_digest_codec_keys() {
        let registry = registry_with(
            MemoryStorage::new(),
            DefaultTicketCatalog::from_config(&CatalogConfig::default()),
            RegistryConfig::new().with_id_codec(IdCodecKind::Digest),
        )
        .await;
        registry.add(&service_ticket("ST-1", 10)).await.unwrap();

        let key = DigestIdCodec.encode("ST-1").unwrap();
        let storage = registry.storage();
        assert!(storage.find(ST_LOCATION, "ST-1").await.unwrap().is_none());
        assert!(storage.find(ST_LOCATION, &key).await.unwrap().is_some());

        let found = registry.get("ST-1").await.unwrap().unwrap();
        assert_eq!(found.id(), "ST-1");
        assert!(registry.delete("ST-1").await.unwrap());
        assert_eq!(registry.service_ticket_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_from_clones() {
        let registry = registry().await;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let ticket = service_ticket(&format!("ST-{i}"), 10);
                    registry.add(&ticket).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        assert_eq!(registry.service_ticket_count().await.unwrap(), 16);
    }
}
