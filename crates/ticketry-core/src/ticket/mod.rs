//! Ticket model consumed by the storage engine.
//!
//! The authentication core owns tickets: it mints, mutates and validates them.
//! The storage engine only needs the narrow view defined by [`Ticket`]: an
//! identifier, the catalog prefix, the usage state and the expiration policy.
//!
//! Concrete variants are registered with the
//! [`TicketSerializer`](crate::TicketSerializer) through [`TicketVariant`],
//! which gives every variant a durable type tag.

mod expiration;
mod standard;

use std::any::Any;
use std::fmt;

use jiff::Timestamp;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use expiration::ExpirationPolicy;
pub use standard::{ProxyGrantingTicket, ServiceTicket, TicketGrantingTicket};

/// Separator between the ticket prefix and the rest of a ticket identifier.
pub const TICKET_ID_SEPARATOR: char = '-';

/// A short-lived authentication artifact.
pub trait Ticket: Any + fmt::Debug + Send + Sync + 'static {
    /// Globally unique identifier within the ticket's type.
    fn id(&self) -> &str;

    /// Prefix that the catalog uses to resolve this ticket's definition.
    fn prefix(&self) -> &str;

    /// Usage history of the ticket, for stateful expiration policies.
    fn state(&self) -> Option<&TicketState> {
        None
    }

    /// Policy deciding when the ticket stops being valid.
    fn expiration_policy(&self) -> &ExpirationPolicy;

    /// Returns whether the policy considers the ticket expired right now.
    fn is_expired(&self) -> bool {
        match self.state() {
            Some(state) => self.expiration_policy().is_expired(state),
            None => false,
        }
    }

    /// Seconds the ticket should live from now; `< 1` means never
    /// auto-expire through storage.
    fn time_to_live(&self) -> i64 {
        match self.state() {
            Some(state) => self.expiration_policy().time_to_live_for(state),
            None => self.expiration_policy().time_to_live(),
        }
    }
}

impl dyn Ticket {
    /// Returns the concrete ticket if it is of type `T`.
    pub fn downcast_ref<T: Ticket>(&self) -> Option<&T> {
        let any: &dyn Any = self;
        any.downcast_ref::<T>()
    }

    /// Returns true if the concrete ticket is of type `T`.
    pub fn is<T: Ticket>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }
}

/// A ticket type that can be persisted.
///
/// `TYPE_TAG` is written next to every stored payload and must stay stable
/// across releases: renaming it orphans every stored ticket of that type.
pub trait TicketVariant: Ticket + Serialize + DeserializeOwned {
    /// Durable discriminator of the variant.
    const TYPE_TAG: &'static str;
}

/// Usage history of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketState {
    /// When the ticket was created.
    pub created_at: Timestamp,
    /// When the ticket was last used.
    pub last_used_at: Timestamp,
    /// When the ticket was used before the last use.
    pub previous_used_at: Option<Timestamp>,
    /// How many times the ticket has been used.
    pub use_count: u32,
}

impl TicketState {
    /// Creates the state of a ticket created at `created_at`.
    pub fn new(created_at: Timestamp) -> Self {
        Self {
            created_at,
            last_used_at: created_at,
            previous_used_at: None,
            use_count: 0,
        }
    }

    /// Creates the state of a ticket created now.
    pub fn now() -> Self {
        Self::new(Timestamp::now())
    }

    /// Records one use of the ticket at the current time.
    pub fn record_use(&mut self) {
        self.record_use_at(Timestamp::now());
    }

    /// Records one use of the ticket at `at`.
    pub fn record_use_at(&mut self, at: Timestamp) {
        self.previous_used_at = Some(self.last_used_at);
        self.last_used_at = at;
        self.use_count = self.use_count.saturating_add(1);
    }
}

impl Default for TicketState {
    fn default() -> Self {
        Self::now()
    }
}

/// Generates a fresh ticket identifier, `PREFIX-<random>`.
pub fn generate_ticket_id(prefix: &str) -> String {
    format!("{prefix}{TICKET_ID_SEPARATOR}{}", Uuid::new_v4().simple())
}

/// Extracts the catalog prefix of a ticket identifier.
///
/// Returns `None` if the identifier carries no separator or an empty prefix.
pub fn ticket_id_prefix(ticket_id: &str) -> Option<&str> {
    match ticket_id.split_once(TICKET_ID_SEPARATOR) {
        Some((prefix, _)) if !prefix.is_empty() => Some(prefix),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ticket_id() {
        let id = generate_ticket_id("ST");
        assert!(id.starts_with("ST-"));
        assert_eq!(id.len(), "ST-".len() + 32);
        assert_ne!(id, generate_ticket_id("ST"));
    }

    #[test]
    fn test_ticket_id_prefix() {
        assert_eq!(ticket_id_prefix("TGT-1-abc"), Some("TGT"));
        assert_eq!(ticket_id_prefix("ST-1"), Some("ST"));
        assert_eq!(ticket_id_prefix("nodash"), None);
        assert_eq!(ticket_id_prefix("-leading"), None);
    }

    #[test]
    fn test_record_use() {
        let created = Timestamp::from_second(1_000).unwrap();
        let used = Timestamp::from_second(1_005).unwrap();
        let mut state = TicketState::new(created);
        state.record_use_at(used);

        assert_eq!(state.use_count, 1);
        assert_eq!(state.last_used_at, used);
        assert_eq!(state.previous_used_at, Some(created));
    }

    #[test]
    fn test_downcast() {
        let ticket: Box<dyn Ticket> = Box::new(ServiceTicket::new(
            "ST-1",
            "https://app.example.org",
            "TGT-1",
            ExpirationPolicy::hard_timeout(10),
        ));
        assert!(ticket.is::<ServiceTicket>());
        assert!(!ticket.is::<TicketGrantingTicket>());
        assert_eq!(
            ticket.downcast_ref::<ServiceTicket>().map(|st| st.service.as_str()),
            Some("https://app.example.org")
        );
    }
}
