//! Error types for flush planning.

use std::fmt;

/// The primary error type for ormflush operations.
#[derive(Debug)]
pub enum Error {
    /// Row identity errors (bad transitions, unresolved keys)
    Identity(IdentityError),
    /// Entity metadata errors (invalid names, unknown entities)
    Metadata(MetadataError),
    /// Configuration errors
    Config(ConfigError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug, Clone)]
pub struct IdentityError {
    pub kind: IdentityErrorKind,
    pub entity: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityErrorKind {
    /// A pending identity has no key values to resolve to
    Unresolved,
    /// The transition only applies to pending identities
    AlreadyPermanent,
    /// A key value was rejected (e.g. NULL primary key)
    InvalidKey,
}

#[derive(Debug, Clone)]
pub struct MetadataError {
    pub kind: MetadataErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorKind {
    /// Entity, column or foreign key name is not a valid identifier
    InvalidName,
    /// Entity declares no primary key
    MissingPrimaryKey,
    /// Entity with this name is already registered
    DuplicateEntity,
    /// No entity with this name is registered
    UnknownEntity,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl IdentityError {
    pub fn new(kind: IdentityErrorKind, entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            entity: entity.into(),
            message: message.into(),
        }
    }
}

impl MetadataError {
    pub fn new(kind: MetadataErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Is this a caller bug rather than a data problem?
    ///
    /// Identity transition misuse and malformed metadata are programming
    /// errors; configuration and serialization problems come from input.
    pub fn is_precondition_violation(&self) -> bool {
        match self {
            Error::Identity(e) => matches!(e.kind, IdentityErrorKind::AlreadyPermanent),
            Error::Metadata(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Identity(e) => write!(f, "Identity error for '{}': {}", e.entity, e.message),
            Error::Metadata(e) => write!(f, "Metadata error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.entity)
    }
}

impl std::error::Error for IdentityError {}

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MetadataError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<IdentityError> for Error {
    fn from(err: IdentityError) -> Self {
        Error::Identity(err)
    }
}

impl From<MetadataError> for Error {
    fn from(err: MetadataError) -> Self {
        Error::Metadata(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for ormflush operations.
pub type Result<T> = std::result::Result<T, Error>;
