//! Ticket registry configuration.

#[cfg(feature = "config")]
use clap::Args;
use serde::{Deserialize, Serialize};

use crate::codec::IdCodecKind;

/// Configuration of a [`TicketRegistry`](super::TicketRegistry).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct RegistryConfig {
    /// Drop every storage location at startup before provisioning it
    #[cfg_attr(
        feature = "config",
        arg(long = "registry-drop-existing", env = "TICKETRY_DROP_EXISTING")
    )]
    #[serde(default)]
    pub drop_existing: bool,

    /// Transform applied to ticket ids before they are used as storage keys
    #[cfg_attr(
        feature = "config",
        arg(
            long = "registry-id-codec",
            env = "TICKETRY_ID_CODEC",
            value_enum,
            default_value_t = IdCodecKind::Plain,
        )
    )]
    #[serde(default)]
    pub id_codec: IdCodecKind,
}

impl RegistryConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop storage locations at startup.
    #[must_use]
    pub fn with_drop_existing(mut self, drop_existing: bool) -> Self {
        self.drop_existing = drop_existing;
        self
    }

    /// Set the id codec.
    #[must_use]
    pub fn with_id_codec(mut self, id_codec: IdCodecKind) -> Self {
        self.id_codec = id_codec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RegistryConfig::new();
        assert!(!config.drop_existing);
        assert_eq!(config.id_codec, IdCodecKind::Plain);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RegistryConfig = serde_json::from_str(r#"{"id_codec":"digest"}"#).unwrap();
        assert_eq!(config, RegistryConfig::new().with_id_codec(IdCodecKind::Digest));
    }
}
