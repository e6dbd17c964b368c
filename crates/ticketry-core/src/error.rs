//! Common error type definitions.

use strum::{AsRefStr, IntoStaticStr};
use thiserror::Error;

/// Type alias for boxed dynamic errors that can be sent across threads.
///
/// Backend crates wrap their own error types in this when converting into
/// [`Error`], so the facade never leaks a raw backend error to its callers.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Type alias for Results with our custom Error type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categories of errors that can occur in ticket storage operations.
///
/// A missing ticket, an undecodable identifier or a ticket type without a
/// catalog definition is never an error: those surface as `None`, `false`
/// or `0` from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// The physical store could not be reached or timed out.
    Transient,
    /// The physical store rejected a write (duplicate primary key,
    /// conflicting index definition).
    Conflict,
    /// A ticket type is not registered, or the configuration is invalid.
    Configuration,
    /// A ticket could not be converted to or from its stored payload.
    Serialization,
    /// A storage location could not be provisioned at startup.
    Provisioning,
}

/// A structured error type for ticket storage operations.
#[derive(Debug, Error)]
#[error("{kind:?}{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional error message.
    pub message: Option<String>,
    /// Optional source error.
    #[source]
    pub source: Option<BoxedError>,
}

impl Error {
    /// Creates a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
        }
    }

    /// Adds a message to this error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Adds a source error to this error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Adds an already boxed source error to this error.
    pub fn with_boxed_source(mut self, source: BoxedError) -> Self {
        self.source = Some(source);
        self
    }

    /// Creates a new transient backend error.
    pub fn transient() -> Self {
        Self::new(ErrorKind::Transient)
    }

    /// Creates a new conflict error.
    pub fn conflict() -> Self {
        Self::new(ErrorKind::Conflict)
    }

    /// Creates a new configuration error.
    pub fn configuration() -> Self {
        Self::new(ErrorKind::Configuration)
    }

    /// Creates a new serialization error.
    pub fn serialization() -> Self {
        Self::new(ErrorKind::Serialization)
    }

    /// Creates a new provisioning error.
    pub fn provisioning() -> Self {
        Self::new(ErrorKind::Provisioning)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error kind as a string.
    pub fn kind_str(&self) -> &'static str {
        self.kind.into()
    }

    /// Returns true if the physical store could not be reached.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization().with_source(err)
    }
}

/// Converts registry results into the availability-favoring shape.
///
/// Transient backend failures become the empty result (`None`, `false`, `0`,
/// an empty `Vec`), so an authentication flow treats the ticket as absent
/// instead of failing. Conflicts, configuration, serialization and
/// provisioning errors still propagate.
pub trait Degrade<T> {
    /// Replaces a transient failure with `T::default()`.
    fn degrade(self) -> Result<T>;
}

impl<T: Default> Degrade<T> for Result<T> {
    fn degrade(self) -> Result<T> {
        match self {
            Err(err) if err.is_transient() => Ok(T::default()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::transient().with_message("bucket unreachable");
        assert_eq!(err.to_string(), "Transient: bucket unreachable");
        assert_eq!(Error::configuration().to_string(), "Configuration");
    }

    #[test]
    fn test_kind_str() {
        assert_eq!(Error::provisioning().kind_str(), "provisioning");
        assert_eq!(ErrorKind::Serialization.as_ref(), "serialization");
    }

    #[test]
    fn test_degrade_swallows_transient() {
        let res: Result<Option<u32>> = Err(Error::transient());
        assert_eq!(res.degrade().unwrap(), None);

        let res: Result<u64> = Err(Error::transient().with_message("timed out"));
        assert_eq!(res.degrade().unwrap(), 0);
    }

    #[test]
    fn test_degrade_keeps_conflicts() {
        let err = Error::conflict().with_message("duplicate key");
        assert!(!err.is_transient());

        let res: Result<bool> = Err(err);
        assert_eq!(res.degrade().unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_degrade_keeps_configuration_errors() {
        let res: Result<bool> = Err(Error::configuration().with_message("unregistered"));
        let err = res.degrade().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(std::error::Error::source(&err).is_some());
    }
}
