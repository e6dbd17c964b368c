//! Tagged ticket serialization.
//!
//! Tickets are stored as a `(type tag, JSON payload)` pair. Decoding dispatches
//! on the tag through an explicit registry, so every persistable variant has
//! to be registered once at startup with [`TicketSerializer::register`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ticket::{
    ProxyGrantingTicket, ServiceTicket, Ticket, TicketGrantingTicket, TicketVariant,
};
use crate::{Error, Result, TRACING_TARGET_SERIALIZER};

type EncodeFn = fn(&dyn Any) -> Option<serde_json::Result<String>>;
type DecodeFn = fn(&str) -> serde_json::Result<Box<dyn Ticket>>;

/// A ticket converted to its stored form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTicket {
    /// Durable discriminator of the ticket variant.
    pub type_tag: String,
    /// JSON body of the ticket.
    pub payload: String,
}

#[derive(Clone, Copy)]
struct Registration {
    type_tag: &'static str,
    encode: EncodeFn,
    decode: DecodeFn,
}

fn encode<T: TicketVariant>(ticket: &dyn Any) -> Option<serde_json::Result<String>> {
    ticket.downcast_ref::<T>().map(serde_json::to_string)
}

fn decode<T: TicketVariant>(payload: &str) -> serde_json::Result<Box<dyn Ticket>> {
    let ticket: T = serde_json::from_str(payload)?;
    Ok(Box::new(ticket))
}

/// Registry of persistable ticket variants.
#[derive(Clone, Default)]
pub struct TicketSerializer {
    by_type: HashMap<TypeId, Registration>,
    by_tag: HashMap<&'static str, Registration>,
}

impl TicketSerializer {
    /// Creates a serializer with no registered variants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a serializer with the standard ticket variants registered.
    pub fn with_defaults() -> Self {
        let mut serializer = Self::new();
        serializer
            .register::<TicketGrantingTicket>()
            .register::<ServiceTicket>()
            .register::<ProxyGrantingTicket>();
        serializer
    }

    /// Registers a ticket variant under its [`TicketVariant::TYPE_TAG`].
    ///
    /// Registering the same variant again is a no-op.
    pub fn register<T: TicketVariant>(&mut self) -> &mut Self {
        let registration = Registration {
            type_tag: T::TYPE_TAG,
            encode: encode::<T>,
            decode: decode::<T>,
        };
        self.by_type.insert(TypeId::of::<T>(), registration);
        self.by_tag.insert(T::TYPE_TAG, registration);

        tracing::debug!(
            target: TRACING_TARGET_SERIALIZER,
            type_tag = T::TYPE_TAG,
            "Registered ticket variant"
        );
        self
    }

    /// Returns true if a variant with `type_tag` is registered.
    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.by_tag.contains_key(type_tag)
    }

    /// Returns the registered type tags.
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.by_tag.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Serializes a ticket into its tagged form.
    ///
    /// Fails with [`ErrorKind::Configuration`](crate::ErrorKind::Configuration)
    /// if the ticket's concrete type was never registered.
    pub fn serialize(&self, ticket: &dyn Ticket) -> Result<SerializedTicket> {
        let any: &dyn Any = ticket;
        let registration = self.by_type.get(&any.type_id()).ok_or_else(|| {
            Error::configuration().with_message(format!(
                "ticket '{}' has a type that is not registered with the serializer",
                ticket.id()
            ))
        })?;

        let payload = (registration.encode)(any)
            .ok_or_else(|| {
                Error::configuration().with_message(format!(
                    "serializer registration for '{}' does not match ticket '{}'",
                    registration.type_tag,
                    ticket.id()
                ))
            })?
            .map_err(|err| {
                Error::serialization()
                    .with_message(format!("ticket '{}' cannot be serialized", ticket.id()))
                    .with_source(err)
            })?;

        Ok(SerializedTicket {
            type_tag: registration.type_tag.to_owned(),
            payload,
        })
    }

    /// Deserializes a tagged payload back into a ticket.
    pub fn deserialize(&self, type_tag: &str, payload: &str) -> Result<Box<dyn Ticket>> {
        let registration = self.by_tag.get(type_tag).ok_or_else(|| {
            Error::configuration().with_message(format!(
                "no ticket variant registered for type tag '{type_tag}'"
            ))
        })?;

        (registration.decode)(payload).map_err(|err| {
            Error::serialization()
                .with_message(format!("malformed payload for type tag '{type_tag}'"))
                .with_source(err)
        })
    }
}

impl fmt::Debug for TicketSerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSerializer")
            .field("type_tags", &self.type_tags())
            .finish()
    }
}
