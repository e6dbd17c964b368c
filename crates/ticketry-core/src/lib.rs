#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for ticket registry operations.
///
/// Use this target for logging ticket reads, writes, deletions and failures
/// surfaced to the authentication core.
pub const TRACING_TARGET_REGISTRY: &str = "ticketry_core::registry";

/// Tracing target for storage backend operations.
pub const TRACING_TARGET_STORAGE: &str = "ticketry_core::storage";

/// Tracing target for storage location provisioning.
///
/// Use this target for logging location creation and expiry index
/// reconciliation.
pub const TRACING_TARGET_PROVISION: &str = "ticketry_core::provision";

/// Tracing target for ticket serialization.
pub const TRACING_TARGET_SERIALIZER: &str = "ticketry_core::serializer";

mod error;

pub mod catalog;
pub mod codec;
pub mod registry;
pub mod serializer;
pub mod storage;
pub mod ticket;

pub use catalog::{CatalogConfig, DefaultTicketCatalog, TicketCatalog, TicketDefinition};
pub use codec::{Base64IdCodec, DigestIdCodec, IdCodecKind, PlainIdCodec, TicketIdCodec};
pub use error::{BoxedError, Degrade, Error, ErrorKind, Result};
pub use registry::{ProvisionReport, RegistryConfig, TicketRegistry, TicketStream};
pub use serializer::{SerializedTicket, TicketSerializer};
pub use storage::provision::ReconcileOutcome;
pub use storage::{DocumentStream, IndexDescriptor, MemoryStorage, StorageBackend, StorageDocument};
pub use ticket::{
    ExpirationPolicy, ProxyGrantingTicket, ServiceTicket, Ticket, TicketGrantingTicket, TicketState,
    TicketVariant, generate_ticket_id,
};
