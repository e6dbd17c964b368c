//! Per-type storage definition.

use serde::{Deserialize, Serialize};

/// Storage configuration of one ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDefinitionProperties {
    /// Physical table, collection or bucket holding tickets of this type.
    pub storage_name: String,
    /// Expiry index TTL in seconds. `< 1` means never auto-expire via the
    /// store.
    pub storage_timeout: i64,
}

/// Catalog entry describing one ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDefinition {
    ticket_type: String,
    prefix: String,
    #[serde(default)]
    supertypes: Vec<String>,
    #[serde(default)]
    order: i32,
    properties: TicketDefinitionProperties,
}

impl TicketDefinition {
    /// Creates a new definition.
    pub fn new(
        ticket_type: impl Into<String>,
        prefix: impl Into<String>,
        storage_name: impl Into<String>,
        storage_timeout: i64,
    ) -> Self {
        Self {
            ticket_type: ticket_type.into(),
            prefix: prefix.into(),
            supertypes: Vec::new(),
            order: 0,
            properties: TicketDefinitionProperties {
                storage_name: storage_name.into(),
                storage_timeout,
            },
        }
    }

    /// Declares that tickets of this type also count as `supertype`.
    #[must_use]
    pub fn with_supertype(mut self, supertype: impl Into<String>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }

    /// Sets the position of this definition in catalog listings.
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Name of the ticket type.
    pub fn ticket_type(&self) -> &str {
        &self.ticket_type
    }

    /// Identifier prefix of the ticket type.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Types this ticket type also counts as.
    pub fn supertypes(&self) -> &[String] {
        &self.supertypes
    }

    /// Position in catalog listings.
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Storage properties.
    pub fn properties(&self) -> &TicketDefinitionProperties {
        &self.properties
    }

    /// Storage location name.
    pub fn storage_name(&self) -> &str {
        &self.properties.storage_name
    }

    /// Expiry index TTL in seconds.
    pub fn storage_timeout(&self) -> i64 {
        self.properties.storage_timeout
    }

    /// Returns true if this definition is `ticket_type` or declares it as a
    /// supertype.
    pub fn is_a(&self, ticket_type: &str) -> bool {
        self.ticket_type == ticket_type || self.supertypes.iter().any(|s| s == ticket_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_a() {
        let definition = TicketDefinition::new("ProxyGrantingTicket", "PGT", "pgt", 60)
            .with_supertype("TicketGrantingTicket");
        assert!(definition.is_a("ProxyGrantingTicket"));
        assert!(definition.is_a("TicketGrantingTicket"));
        assert!(!definition.is_a("ServiceTicket"));
    }

    #[test]
    fn test_accessors() {
        let definition = TicketDefinition::new("ServiceTicket", "ST", "st", 10).with_order(2);
        assert_eq!(definition.storage_name(), "st");
        assert_eq!(definition.storage_timeout(), 10);
        assert_eq!(definition.order(), 2);
        assert!(definition.supertypes().is_empty());
    }
}
