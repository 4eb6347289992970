//! Errors raised while merging and planning row ops.

use ormflush_core::{Error, IdentityError};

use crate::identity::RowIdentity;

/// Error produced by the flush pipeline.
#[derive(Debug, Clone)]
pub enum FlushError {
    /// Two ops with different canonical identities were asked to merge.
    IdentityMismatch {
        /// Canonical identity of the earlier op.
        earlier: RowIdentity,
        /// Canonical identity of the later op.
        later: RowIdentity,
    },
    /// An identity transition failed.
    Identity(IdentityError),
}

impl std::fmt::Display for FlushError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushError::IdentityMismatch { earlier, later } => {
                write!(f, "Cannot merge row ops for different rows: {} vs {}", earlier, later)
            }
            FlushError::Identity(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FlushError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlushError::Identity(e) => Some(e),
            FlushError::IdentityMismatch { .. } => None,
        }
    }
}

impl From<IdentityError> for FlushError {
    fn from(e: IdentityError) -> Self {
        FlushError::Identity(e)
    }
}

impl From<FlushError> for Error {
    fn from(e: FlushError) -> Self {
        match e {
            FlushError::Identity(inner) => Error::Identity(inner),
            other @ FlushError::IdentityMismatch { .. } => Error::Custom(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormflush_core::IdentityErrorKind;

    #[test]
    fn test_mismatch_display() {
        let err = FlushError::IdentityMismatch {
            earlier: RowIdentity::single("artist", "id", 1i64),
            later: RowIdentity::single("artist", "id", 2i64),
        };
        assert_eq!(
            err.to_string(),
            "Cannot merge row ops for different rows: artist{id: 1} vs artist{id: 2}"
        );
        assert!(matches!(Error::from(err), Error::Custom(_)));
    }

    #[test]
    fn test_identity_error_converts() {
        let inner = IdentityError::new(IdentityErrorKind::Unresolved, "artist", "no key");
        let err = FlushError::from(inner);
        assert!(std::error::Error::source(&err).is_some());
        assert!(matches!(Error::from(err), Error::Identity(_)));
    }
}
