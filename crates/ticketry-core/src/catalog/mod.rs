//! Ticket catalog: maps ticket types to their storage configuration.
//!
//! The storage engine has no compile-time knowledge of ticket types. Every
//! storage location it provisions and every lookup it performs goes through a
//! [`TicketCatalog`].

mod catalog_config;
mod definition;

use std::collections::BTreeMap;

pub use catalog_config::CatalogConfig;
pub use definition::{TicketDefinition, TicketDefinitionProperties};

use crate::ticket::{Ticket, ticket_id_prefix};

/// Registry mapping ticket types to their [`TicketDefinition`].
pub trait TicketCatalog: Send + Sync {
    /// Finds the definition for a ticket identifier.
    fn find_by_id(&self, ticket_id: &str) -> Option<&TicketDefinition>;

    /// Finds the definition for a ticket instance.
    fn find_by_ticket(&self, ticket: &dyn Ticket) -> Option<&TicketDefinition>;

    /// Returns every known definition.
    fn definitions(&self) -> Vec<&TicketDefinition>;

    /// Returns the definitions of `ticket_type` and of every type that
    /// declares it as a supertype.
    fn definitions_for_type(&self, ticket_type: &str) -> Vec<&TicketDefinition> {
        self.definitions()
            .into_iter()
            .filter(|definition| definition.is_a(ticket_type))
            .collect()
    }
}

/// In-memory catalog keyed by ticket prefix.
#[derive(Debug, Clone, Default)]
pub struct DefaultTicketCatalog {
    definitions: BTreeMap<String, TicketDefinition>,
}

impl DefaultTicketCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the standard ticket types configured by `config`.
    pub fn from_config(config: &CatalogConfig) -> Self {
        let mut catalog = Self::new();
        for definition in config.definitions() {
            catalog.register(definition);
        }
        catalog
    }

    /// Registers a definition, replacing any definition with the same prefix.
    pub fn register(&mut self, definition: TicketDefinition) -> &mut Self {
        self.definitions
            .insert(definition.prefix().to_owned(), definition);
        self
    }

    /// Registers a definition, builder style.
    #[must_use]
    pub fn with_definition(mut self, definition: TicketDefinition) -> Self {
        self.register(definition);
        self
    }

    /// Returns the number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no definition is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl TicketCatalog for DefaultTicketCatalog {
    fn find_by_id(&self, ticket_id: &str) -> Option<&TicketDefinition> {
        ticket_id_prefix(ticket_id).and_then(|prefix| self.definitions.get(prefix))
    }

    fn find_by_ticket(&self, ticket: &dyn Ticket) -> Option<&TicketDefinition> {
        self.definitions.get(ticket.prefix())
    }

    fn definitions(&self) -> Vec<&TicketDefinition> {
        let mut definitions: Vec<_> = self.definitions.values().collect();
        definitions.sort_by_key(|definition| definition.order());
        definitions
    }
}
