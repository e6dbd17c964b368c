//! NATS client wrapper and connection management.
//!
//! `NatsClient` wraps one multiplexed `async-nats` connection. Clones are
//! cheap and share the connection, so a server process normally connects once
//! and hands clones (or [`NatsTicketStorage`]s built from it) to every
//! component that needs ticket storage.
//!
//! ```ignore
//! let client = NatsClient::connect(config).await?;
//! let storage = client.ticket_storage();
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, jetstream};
use tokio::time::timeout;

use super::nats_config::NatsConfig;
use crate::kv::NatsTicketStorage;
use crate::{Error, Result, RetryConfig, TRACING_TARGET_CLIENT, TRACING_TARGET_CONNECTION};

/// NATS client wrapper with connection management.
///
/// This wrapper is cheaply cloneable and thread-safe.
/// Multiple clones share the same underlying TCP connection via multiplexing.
#[derive(Debug, Clone)]
pub struct NatsClient {
    inner: Arc<NatsClientInner>,
}

/// Inner data for NATS client
#[derive(Debug)]
struct NatsClientInner {
    client: Client,
    jetstream: jetstream::Context,
    config: NatsConfig,
}

impl NatsClient {
    /// Create a new NATS client and connect
    #[tracing::instrument(skip(config), target = TRACING_TARGET_CONNECTION)]
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_config)?;

        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            servers = %config.nats_url,
            name = %config.name(),
            "Connecting to NATS servers"
        );

        let mut connect_opts = ConnectOptions::new()
            .name(config.name())
            .ping_interval(config.ping_interval())
            .request_timeout(config.request_timeout())
            .token(config.nats_token.clone());

        if let Some(timeout) = config.connect_timeout() {
            connect_opts = connect_opts.connection_timeout(timeout);
        }

        if let Some(max_reconnects) = config.max_reconnects_option() {
            connect_opts = connect_opts.max_reconnects(max_reconnects);
        }
        let reconnect_delay_ms = config.reconnect_delay().as_millis().min(u64::MAX as u128) as u64;
        connect_opts = connect_opts.reconnect_delay_callback(move |attempts| {
            Duration::from_millis(std::cmp::min(
                reconnect_delay_ms.saturating_mul(2_u64.pow(attempts.min(16) as u32)),
                30_000, // Max 30 seconds
            ))
        });

        let servers = config.servers().join(",");
        let connect_timeout = config.connect_timeout().unwrap_or(Duration::from_secs(30));
        let client = timeout(
            connect_timeout,
            async_nats::connect_with_options(&servers, connect_opts),
        )
        .await
        .map_err(|_| Error::timeout(connect_timeout))?
        .map_err(|e| Error::Connection(Box::new(e)))?;

        let jetstream = jetstream::new(client.clone());

        let server_info = client.server_info();
        tracing::info!(
            target: TRACING_TARGET_CONNECTION,
            server_host = %server_info.host,
            server_version = %server_info.version,
            server_id = %server_info.server_id,
            max_payload = server_info.max_payload,
            "Successfully connected to NATS"
        );

        Ok(Self {
            inner: Arc::new(NatsClientInner {
                client,
                jetstream,
                config,
            }),
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &NatsConfig {
        &self.inner.config
    }

    /// Get the JetStream context
    #[must_use]
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.inner.jetstream
    }

    /// Test connectivity with a ping
    #[tracing::instrument(skip(self), target = TRACING_TARGET_CONNECTION)]
    pub async fn ping(&self) -> Result<Duration> {
        let start = std::time::Instant::now();
        let ping_timeout = Duration::from_secs(10);

        timeout(ping_timeout, self.inner.client.flush())
            .await
            .map_err(|_| Error::timeout(ping_timeout))?
            .map_err(|e| Error::Connection(Box::new(e)))?;

        let ping_time = start.elapsed();
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            duration_ms = ping_time.as_millis(),
            "NATS ping successful"
        );
        Ok(ping_time)
    }

    /// Check if the client is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.inner.client.connection_state(),
            async_nats::connection::State::Connected
        )
    }

    /// Ticket storage backend with the default retry policy.
    pub fn ticket_storage(&self) -> NatsTicketStorage {
        self.ticket_storage_with_retry(RetryConfig::default())
    }

    /// Ticket storage backend with a custom retry policy.
    pub fn ticket_storage_with_retry(&self, retry: RetryConfig) -> NatsTicketStorage {
        tracing::debug!(
            target: TRACING_TARGET_CLIENT,
            replicas = self.inner.config.kv_replicas(),
            max_attempts = retry.max_attempts,
            "Creating ticket storage"
        );
        NatsTicketStorage::new(
            self.inner.jetstream.clone(),
            self.inner.config.kv_replicas(),
            retry,
        )
    }
}
