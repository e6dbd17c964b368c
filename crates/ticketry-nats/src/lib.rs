#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

/// Tracing target for NATS client operations.
///
/// Use this target for logging client initialization, configuration, and client-level errors.
pub const TRACING_TARGET_CLIENT: &str = "ticketry_nats::client";

/// Tracing target for NATS key-value store operations.
///
/// Use this target for logging bucket provisioning, ticket document operations,
/// and KV-related errors.
pub const TRACING_TARGET_KV: &str = "ticketry_nats::kv";

/// Tracing target for NATS connection operations.
///
/// Use this target for logging connection establishment, reconnection, and retries.
pub const TRACING_TARGET_CONNECTION: &str = "ticketry_nats::connection";

mod client;
mod error;
pub mod kv;
mod retry;

// Re-export async_nats types needed by consumers
pub use async_nats::jetstream;
pub use client::{NatsClient, NatsConfig};
pub use error::{Error, Result};
pub use kv::NatsTicketStorage;
pub use retry::RetryConfig;
