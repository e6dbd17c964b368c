//! Transforms between logical ticket identifiers and physical storage keys.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
#[cfg(feature = "config")]
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};

/// Maps ticket identifiers to storage keys and back.
///
/// A `None` from either direction is a cache miss, never an error.
pub trait TicketIdCodec: fmt::Debug + Send + Sync {
    /// Encodes a ticket identifier into its physical storage key.
    fn encode(&self, ticket_id: &str) -> Option<String>;

    /// Recovers the ticket identifier from a physical storage key.
    fn decode(&self, key: &str) -> Option<String>;
}

/// Stores ticket identifiers as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainIdCodec;

impl TicketIdCodec for PlainIdCodec {
    fn encode(&self, ticket_id: &str) -> Option<String> {
        (!ticket_id.is_empty()).then(|| ticket_id.to_owned())
    }

    fn decode(&self, key: &str) -> Option<String> {
        (!key.is_empty()).then(|| key.to_owned())
    }
}

/// Stores ticket identifiers as URL-safe base64 without padding.
///
/// Keeps keys within the alphabet accepted by key-value stores that restrict
/// key characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64IdCodec;

impl TicketIdCodec for Base64IdCodec {
    fn encode(&self, ticket_id: &str) -> Option<String> {
        (!ticket_id.is_empty()).then(|| URL_SAFE_NO_PAD.encode(ticket_id))
    }

    fn decode(&self, key: &str) -> Option<String> {
        let bytes = URL_SAFE_NO_PAD.decode(key).ok()?;
        String::from_utf8(bytes).ok().filter(|id| !id.is_empty())
    }
}

/// Stores the SHA-256 digest of ticket identifiers.
///
/// Storage keys cannot be traced back to live ticket identifiers, so
/// [`decode`](TicketIdCodec::decode) always misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestIdCodec;

impl TicketIdCodec for DigestIdCodec {
    fn encode(&self, ticket_id: &str) -> Option<String> {
        if ticket_id.is_empty() {
            return None;
        }
        Some(hex::encode(Sha256::digest(ticket_id.as_bytes())))
    }

    fn decode(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Selects one of the built-in codecs from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[derive(Display, EnumString)]
#[cfg_attr(feature = "config", derive(ValueEnum))]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IdCodecKind {
    /// [`PlainIdCodec`].
    #[default]
    Plain,
    /// [`Base64IdCodec`].
    Base64,
    /// [`DigestIdCodec`].
    Digest,
}

impl IdCodecKind {
    /// Builds the codec.
    pub fn build(self) -> Arc<dyn TicketIdCodec> {
        match self {
            Self::Plain => Arc::new(PlainIdCodec),
            Self::Base64 => Arc::new(Base64IdCodec),
            Self::Digest => Arc::new(DigestIdCodec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_codec() {
        let codec = PlainIdCodec;
        assert_eq!(codec.encode("ST-1").as_deref(), Some("ST-1"));
        assert_eq!(codec.decode("ST-1").as_deref(), Some("ST-1"));
        assert_eq!(codec.encode(""), None);
    }

    #[test]
    fn test_base64_codec_inverse() {
        let codec = Base64IdCodec;
        let key = codec.encode("TGT-1-a+b/c").unwrap();
        assert!(key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(codec.decode(&key).as_deref(), Some("TGT-1-a+b/c"));
    }

    #[test]
    fn test_base64_codec_miss() {
        let codec = Base64IdCodec;
        assert_eq!(codec.decode("!!not base64!!"), None);
        // 0xff is not valid UTF-8
        assert_eq!(codec.decode(&URL_SAFE_NO_PAD.encode([0xffu8])), None);
    }

    #[test]
    fn test_digest_codec() {
        let codec = DigestIdCodec;
        let key = codec.encode("ST-1").unwrap();
        assert_eq!(key.len(), 64);
        assert_eq!(codec.encode("ST-1"), Some(key.clone()));
        assert_ne!(codec.encode("ST-2"), Some(key.clone()));
        assert_eq!(codec.decode(&key), None);
    }

    #[test]
    fn test_codec_kind_parse() {
        assert_eq!("digest".parse::<IdCodecKind>().unwrap(), IdCodecKind::Digest);
        assert_eq!(IdCodecKind::Base64.to_string(), "base64");
        assert_eq!("plain".parse::<IdCodecKind>().unwrap(), IdCodecKind::Plain);
        assert_eq!(IdCodecKind::Digest.to_string(), "digest");
        assert_eq!(
            "rot13".parse::<IdCodecKind>(),
            Err(strum::ParseError::VariantNotFound)
        );
    }

    #[test]
    fn test_codec_kind_build() {
        let codec = IdCodecKind::Base64.build();
        let key = codec.encode("ST-1").unwrap();
        assert_eq!(codec.decode(&key).as_deref(), Some("ST-1"));
    }
}
