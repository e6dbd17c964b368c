//! Ticket types shipped with the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ExpirationPolicy, Ticket, TicketState, TicketVariant, ticket_id_prefix};

/// Ticket granting a single-sign-on session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketGrantingTicket {
    /// Ticket identifier, `TGT-...`.
    pub id: String,
    /// Authenticated principal.
    pub principal: String,
    /// Service tickets issued from this session, by ticket id.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    /// Usage history.
    pub state: TicketState,
    /// Expiration policy.
    pub expiration_policy: ExpirationPolicy,
}

impl TicketGrantingTicket {
    /// Catalog prefix.
    pub const PREFIX: &'static str = "TGT";

    /// Creates a new ticket-granting ticket created now.
    pub fn new(
        id: impl Into<String>,
        principal: impl Into<String>,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            principal: principal.into(),
            services: BTreeMap::new(),
            state: TicketState::now(),
            expiration_policy,
        }
    }

    /// Records that a service ticket was granted for `service`.
    pub fn grant_service(
        &mut self,
        service_ticket_id: impl Into<String>,
        service: impl Into<String>,
    ) {
        self.services
            .insert(service_ticket_id.into(), service.into());
        self.state.record_use();
    }
}

impl Ticket for TicketGrantingTicket {
    fn id(&self) -> &str {
        &self.id
    }

    fn prefix(&self) -> &str {
        ticket_id_prefix(&self.id).unwrap_or(Self::PREFIX)
    }

    fn state(&self) -> Option<&TicketState> {
        Some(&self.state)
    }

    fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }
}

impl TicketVariant for TicketGrantingTicket {
    const TYPE_TAG: &'static str = "TicketGrantingTicket";
}

/// Single-use ticket proving a login to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTicket {
    /// Ticket identifier, `ST-...`.
    pub id: String,
    /// Service the ticket was issued for.
    pub service: String,
    /// Identifier of the granting session.
    pub ticket_granting_ticket_id: String,
    /// Whether the ticket was issued right after a fresh login.
    #[serde(default)]
    pub from_new_login: bool,
    /// Usage history.
    pub state: TicketState,
    /// Expiration policy.
    pub expiration_policy: ExpirationPolicy,
}

impl ServiceTicket {
    /// Catalog prefix.
    pub const PREFIX: &'static str = "ST";

    /// Creates a new service ticket created now.
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        ticket_granting_ticket_id: impl Into<String>,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            ticket_granting_ticket_id: ticket_granting_ticket_id.into(),
            from_new_login: false,
            state: TicketState::now(),
            expiration_policy,
        }
    }
}

impl Ticket for ServiceTicket {
    fn id(&self) -> &str {
        &self.id
    }

    fn prefix(&self) -> &str {
        ticket_id_prefix(&self.id).unwrap_or(Self::PREFIX)
    }

    fn state(&self) -> Option<&TicketState> {
        Some(&self.state)
    }

    fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }
}

impl TicketVariant for ServiceTicket {
    const TYPE_TAG: &'static str = "ServiceTicket";
}

/// Session ticket held by a proxying service.
///
/// Counted as a [`TicketGrantingTicket`] by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyGrantingTicket {
    /// Ticket identifier, `PGT-...`.
    pub id: String,
    /// Authenticated principal.
    pub principal: String,
    /// Callback URL of the proxying service.
    pub proxied_by: String,
    /// Usage history.
    pub state: TicketState,
    /// Expiration policy.
    pub expiration_policy: ExpirationPolicy,
}

impl ProxyGrantingTicket {
    /// Catalog prefix.
    pub const PREFIX: &'static str = "PGT";

    /// Creates a new proxy-granting ticket created now.
    pub fn new(
        id: impl Into<String>,
        principal: impl Into<String>,
        proxied_by: impl Into<String>,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            principal: principal.into(),
            proxied_by: proxied_by.into(),
            state: TicketState::now(),
            expiration_policy,
        }
    }
}

impl Ticket for ProxyGrantingTicket {
    fn id(&self) -> &str {
        &self.id
    }

    fn prefix(&self) -> &str {
        ticket_id_prefix(&self.id).unwrap_or(Self::PREFIX)
    }

    fn state(&self) -> Option<&TicketState> {
        Some(&self.state)
    }

    fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }
}

impl TicketVariant for ProxyGrantingTicket {
    const TYPE_TAG: &'static str = "ProxyGrantingTicket";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_from_id() {
        let tgt = TicketGrantingTicket::new("TGT-1", "casuser", ExpirationPolicy::NeverExpires);
        assert_eq!(tgt.prefix(), "TGT");

        let odd = ServiceTicket::new("nodash", "svc", "TGT-1", ExpirationPolicy::NeverExpires);
        assert_eq!(odd.prefix(), ServiceTicket::PREFIX);
    }

    #[test]
    fn test_grant_service_records_use() {
        let policy = ExpirationPolicy::ticket_granting(100, 20);
        let mut tgt = TicketGrantingTicket::new("TGT-1", "casuser", policy);
        tgt.grant_service("ST-1", "https://app.example.org");

        assert_eq!(tgt.state.use_count, 1);
        assert_eq!(tgt.services.get("ST-1").map(String::as_str), Some("https://app.example.org"));
    }

    #[test]
    fn test_expired_service_ticket() {
        let mut st = ServiceTicket::new("ST-1", "svc", "TGT-1", ExpirationPolicy::multi_use(1, 10));
        assert!(!st.is_expired());
        st.state.record_use();
        assert!(st.is_expired());
    }
}
