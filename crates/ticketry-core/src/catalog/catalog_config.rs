//! Catalog configuration for the standard ticket types.

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use super::TicketDefinition;
use crate::ticket::{ProxyGrantingTicket, ServiceTicket, TicketGrantingTicket, TicketVariant};

/// Storage names and timeouts of the standard ticket types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct CatalogConfig {
    /// Storage location for ticket-granting tickets
    #[cfg_attr(
        feature = "config",
        arg(
            long = "tgt-storage-name",
            env = "TICKETRY_TGT_STORAGE_NAME",
            default_value = DEFAULT_TGT_STORAGE_NAME,
        )
    )]
    pub tgt_storage_name: String,

    /// Expiry index TTL for ticket-granting tickets in seconds
    #[cfg_attr(
        feature = "config",
        arg(
            long = "tgt-timeout",
            env = "TICKETRY_TGT_TIMEOUT_SECS",
            default_value_t = DEFAULT_TGT_TIMEOUT_SECS,
        )
    )]
    pub tgt_timeout_secs: i64,

    /// Storage location for service tickets
    #[cfg_attr(
        feature = "config",
        arg(
            long = "st-storage-name",
            env = "TICKETRY_ST_STORAGE_NAME",
            default_value = DEFAULT_ST_STORAGE_NAME,
        )
    )]
    pub st_storage_name: String,

    /// Expiry index TTL for service tickets in seconds
    #[cfg_attr(
        feature = "config",
        arg(
            long = "st-timeout",
            env = "TICKETRY_ST_TIMEOUT_SECS",
            default_value_t = DEFAULT_ST_TIMEOUT_SECS,
        )
    )]
    pub st_timeout_secs: i64,

    /// Storage location for proxy-granting tickets
    #[cfg_attr(
        feature = "config",
        arg(
            long = "pgt-storage-name",
            env = "TICKETRY_PGT_STORAGE_NAME",
            default_value = DEFAULT_PGT_STORAGE_NAME,
        )
    )]
    pub pgt_storage_name: String,

    /// Expiry index TTL for proxy-granting tickets in seconds
    #[cfg_attr(
        feature = "config",
        arg(
            long = "pgt-timeout",
            env = "TICKETRY_PGT_TIMEOUT_SECS",
            default_value_t = DEFAULT_PGT_TIMEOUT_SECS,
        )
    )]
    pub pgt_timeout_secs: i64,
}

// Default values
const DEFAULT_TGT_STORAGE_NAME: &str = "ticketGrantingTicketsCollection";
const DEFAULT_ST_STORAGE_NAME: &str = "serviceTicketsCollection";
const DEFAULT_PGT_STORAGE_NAME: &str = "proxyGrantingTicketsCollection";
const DEFAULT_TGT_TIMEOUT_SECS: i64 = 8 * 60 * 60;
const DEFAULT_ST_TIMEOUT_SECS: i64 = 10;
const DEFAULT_PGT_TIMEOUT_SECS: i64 = 8 * 60 * 60;

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            tgt_storage_name: DEFAULT_TGT_STORAGE_NAME.to_owned(),
            tgt_timeout_secs: DEFAULT_TGT_TIMEOUT_SECS,
            st_storage_name: DEFAULT_ST_STORAGE_NAME.to_owned(),
            st_timeout_secs: DEFAULT_ST_TIMEOUT_SECS,
            pgt_storage_name: DEFAULT_PGT_STORAGE_NAME.to_owned(),
            pgt_timeout_secs: DEFAULT_PGT_TIMEOUT_SECS,
        }
    }
}

impl CatalogConfig {
    /// Set the ticket-granting ticket timeout in seconds.
    #[must_use]
    pub fn with_tgt_timeout_secs(mut self, secs: i64) -> Self {
        self.tgt_timeout_secs = secs;
        self
    }

    /// Set the service ticket timeout in seconds.
    #[must_use]
    pub fn with_st_timeout_secs(mut self, secs: i64) -> Self {
        self.st_timeout_secs = secs;
        self
    }

    /// Set the proxy-granting ticket timeout in seconds.
    #[must_use]
    pub fn with_pgt_timeout_secs(mut self, secs: i64) -> Self {
        self.pgt_timeout_secs = secs;
        self
    }

    /// Builds the standard ticket definitions.
    pub fn definitions(&self) -> Vec<TicketDefinition> {
        vec![
            TicketDefinition::new(
                TicketGrantingTicket::TYPE_TAG,
                TicketGrantingTicket::PREFIX,
                &self.tgt_storage_name,
                self.tgt_timeout_secs,
            )
            .with_order(0),
            TicketDefinition::new(
                ServiceTicket::TYPE_TAG,
                ServiceTicket::PREFIX,
                &self.st_storage_name,
                self.st_timeout_secs,
            )
            .with_order(1),
            TicketDefinition::new(
                ProxyGrantingTicket::TYPE_TAG,
                ProxyGrantingTicket::PREFIX,
                &self.pgt_storage_name,
                self.pgt_timeout_secs,
            )
            .with_supertype(TicketGrantingTicket::TYPE_TAG)
            .with_order(2),
        ]
    }

    /// Validate the configuration and return any issues.
    pub fn validate(&self) -> Result<(), String> {
        for name in [
            &self.tgt_storage_name,
            &self.st_storage_name,
            &self.pgt_storage_name,
        ] {
            if name.trim().is_empty() {
                return Err("Storage name cannot be empty".to_string());
            }
        }
        Ok(())
    }
}
