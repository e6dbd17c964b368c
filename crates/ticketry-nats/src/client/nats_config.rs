//! NATS connection configuration.

use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

/// Configuration for NATS connections with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct NatsConfig {
    /// NATS server URL (comma-separated for clustering)
    #[cfg_attr(feature = "config", arg(long = "nats-url", env = "NATS_URL"))]
    pub nats_url: String,

    /// Authentication token
    #[cfg_attr(feature = "config", arg(long = "nats-token", env = "NATS_TOKEN"))]
    pub nats_token: String,

    /// Client connection name for debugging and monitoring
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-client-name", env = "NATS_CLIENT_NAME")
    )]
    pub nats_client_name: Option<String>,

    /// Connection timeout in seconds (optional)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-connect-timeout", env = "NATS_CONNECT_TIMEOUT_SECS")
    )]
    pub nats_connect_timeout: Option<u64>,

    /// Request timeout in seconds (optional)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-request-timeout", env = "NATS_REQUEST_TIMEOUT_SECS")
    )]
    pub nats_request_timeout: Option<u64>,

    /// Maximum number of reconnection attempts (0 = unlimited)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-max-reconnects", env = "NATS_MAX_RECONNECTS")
    )]
    pub nats_max_reconnects: Option<usize>,

    /// Number of replicas of every ticket bucket (1 to 5)
    #[cfg_attr(
        feature = "config",
        arg(long = "nats-kv-replicas", env = "NATS_KV_REPLICAS")
    )]
    pub nats_kv_replicas: Option<usize>,
}

// Default values
const DEFAULT_NAME: &str = "ticketry";
const DEFAULT_MAX_RECONNECTS: usize = 10;
const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;
const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
const DEFAULT_KV_REPLICAS: usize = 1;
const MAX_KV_REPLICAS: usize = 5;

impl NatsConfig {
    /// Create a new configuration with a single server URL and token.
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            nats_url: server_url.into(),
            nats_token: token.into(),
            nats_client_name: None,
            nats_connect_timeout: None,
            nats_request_timeout: None,
            nats_max_reconnects: None,
            nats_kv_replicas: None,
        }
    }

    /// Returns the client name, using the default if not set.
    #[inline]
    pub fn name(&self) -> &str {
        self.nats_client_name.as_deref().unwrap_or(DEFAULT_NAME)
    }

    /// Returns the server URLs as a vector (splits comma-separated URLs).
    pub fn servers(&self) -> Vec<&str> {
        self.nats_url
            .split(',')
            .map(str::trim)
            .filter(|server| !server.is_empty())
            .collect()
    }

    /// Returns the connection timeout as a Duration, if set.
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.nats_connect_timeout.map(Duration::from_secs)
    }

    /// Returns the request timeout as a Duration, if set.
    #[inline]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.nats_request_timeout.map(Duration::from_secs)
    }

    /// Returns the reconnect delay as a Duration.
    #[inline]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS)
    }

    /// Returns the ping interval as a Duration.
    #[inline]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)
    }

    /// Returns the max reconnects as Option (0 means unlimited).
    #[inline]
    pub fn max_reconnects_option(&self) -> Option<usize> {
        let max = self.nats_max_reconnects.unwrap_or(DEFAULT_MAX_RECONNECTS);
        if max == 0 { None } else { Some(max) }
    }

    /// Returns the replica count of ticket buckets.
    #[inline]
    pub fn kv_replicas(&self) -> usize {
        self.nats_kv_replicas.unwrap_or(DEFAULT_KV_REPLICAS)
    }

    /// Set server URL(s).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.nats_url = url.into();
        self
    }

    /// Set the authentication token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.nats_token = token.into();
        self
    }

    /// Set the client connection name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.nats_client_name = Some(name.into());
        self
    }

    /// Set the connection timeout in seconds.
    #[must_use]
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.nats_connect_timeout = Some(secs);
        self
    }

    /// Set the request timeout in seconds.
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.nats_request_timeout = Some(secs);
        self
    }

    /// Set maximum reconnection attempts (0 for unlimited).
    #[must_use]
    pub fn with_max_reconnects(mut self, max_reconnects: usize) -> Self {
        self.nats_max_reconnects = Some(max_reconnects);
        self
    }

    /// Set the replica count of ticket buckets.
    #[must_use]
    pub fn with_kv_replicas(mut self, replicas: usize) -> Self {
        self.nats_kv_replicas = Some(replicas);
        self
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        let servers = self.servers();

        if servers.is_empty() {
            return Err("At least one server URL must be provided".to_string());
        }

        for server in servers {
            if !server.starts_with("nats://") && !server.starts_with("tls://") {
                return Err(format!("Invalid server URL format: {}", server));
            }
        }

        if self.nats_token.is_empty() {
            return Err("Token cannot be empty".to_string());
        }

        let replicas = self.kv_replicas();
        if replicas == 0 || replicas > MAX_KV_REPLICAS {
            return Err(format!(
                "KV replicas must be between 1 and {MAX_KV_REPLICAS}, got {replicas}"
            ));
        }

        Ok(())
    }
}
