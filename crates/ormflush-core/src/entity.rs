//! Entity metadata consumed by the flush engine.
//!
//! An [`EntityInfo`] describes one table: its name, primary-key columns and
//! the foreign keys it holds. The flush engine never mutates metadata; it is
//! shared between row operations as an [`EntityRef`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MetadataError, MetadataErrorKind};

/// Shared handle to entity metadata.
pub type EntityRef = Arc<EntityInfo>;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)*$";

fn identifier_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(IDENTIFIER_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "Identifier pattern failed to compile; skipping name checks");
                None
            }
        })
        .as_ref()
}

/// Check whether a name is usable as a (possibly schema-qualified) SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_regex().is_none_or(|regex| regex.is_match(name))
}

/// A foreign key held by an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Column on the referencing (owning) entity
    pub column: String,
    /// Referenced entity name
    pub target_entity: String,
    /// Referenced column (normally the target's primary key)
    pub target_column: String,
}

impl ForeignKeyInfo {
    pub fn new(
        column: impl Into<String>,
        target_entity: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            target_entity: target_entity.into(),
            target_column: target_column.into(),
        }
    }

    /// Parse a `table.column` reference.
    ///
    /// The last `.` separates the column, so schema-qualified targets such as
    /// `public.artist.id` keep their schema.
    pub fn parse(column: impl Into<String>, reference: &str) -> Result<Self, MetadataError> {
        let column = column.into();
        let Some((target, target_column)) = reference.rsplit_once('.') else {
            return Err(MetadataError::new(
                MetadataErrorKind::InvalidName,
                format!(
                    "foreign key '{}' must reference 'table.column', got '{}'",
                    column, reference
                ),
            ));
        };
        Ok(Self::new(column, target, target_column))
    }
}

/// Metadata about one entity (table).
///
/// Equality and hashing use the entity name only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInfo {
    name: String,
    primary_key: Vec<String>,
    foreign_keys: Vec<ForeignKeyInfo>,
}

impl EntityInfo {
    /// Start describing an entity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Set the primary-key columns (builder pattern).
    #[must_use]
    pub fn primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a foreign key (builder pattern).
    #[must_use]
    pub fn foreign_key(
        mut self,
        column: impl Into<String>,
        target_entity: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys
            .push(ForeignKeyInfo::new(column, target_entity, target_column));
        self
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> EntityRef {
        Arc::new(self)
    }

    /// Entity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary-key column names.
    pub fn primary_key_columns(&self) -> &[String] {
        &self.primary_key
    }

    /// Check whether a column is part of the primary key.
    pub fn is_primary_key(&self, column: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == column)
    }

    /// Foreign keys held by this entity.
    pub fn foreign_keys(&self) -> &[ForeignKeyInfo] {
        &self.foreign_keys
    }

    /// Names of the entities this one references, without duplicates.
    pub fn referenced_entities(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            if !targets.contains(&fk.target_entity.as_str()) {
                targets.push(&fk.target_entity);
            }
        }
        targets
    }

    /// Check whether the entity holds a foreign key to itself.
    pub fn references_itself(&self) -> bool {
        self.foreign_keys.iter().any(|fk| fk.target_entity == self.name)
    }

    /// Validate names and the primary key.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if !is_valid_identifier(&self.name) {
            return Err(MetadataError::new(
                MetadataErrorKind::InvalidName,
                format!("invalid entity name '{}'", self.name),
            ));
        }
        if self.primary_key.is_empty() {
            return Err(MetadataError::new(
                MetadataErrorKind::MissingPrimaryKey,
                format!("entity '{}' declares no primary key", self.name),
            ));
        }
        let columns = self
            .primary_key
            .iter()
            .chain(self.foreign_keys.iter().map(|fk| &fk.column))
            .chain(self.foreign_keys.iter().map(|fk| &fk.target_column));
        for column in columns {
            if !is_valid_identifier(column) {
                return Err(MetadataError::new(
                    MetadataErrorKind::InvalidName,
                    format!("invalid column name '{}' on entity '{}'", column, self.name),
                ));
            }
        }
        for fk in &self.foreign_keys {
            if !is_valid_identifier(&fk.target_entity) {
                return Err(MetadataError::new(
                    MetadataErrorKind::InvalidName,
                    format!(
                        "foreign key '{}' on entity '{}' targets invalid entity name '{}'",
                        fk.column, self.name, fk.target_entity
                    ),
                ));
            }
        }
        Ok(())
    }
}

impl PartialEq for EntityInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityInfo {}

impl Hash for EntityInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn painting() -> EntityInfo {
        EntityInfo::new("painting")
            .primary_key(["id"])
            .foreign_key("artist_id", "artist", "id")
            .foreign_key("gallery_id", "gallery", "id")
            .foreign_key("second_artist_id", "artist", "id")
    }

    #[test]
    fn test_builder_and_accessors() {
        let entity = painting();
        assert_eq!(entity.name(), "painting");
        assert!(entity.is_primary_key("id"));
        assert!(!entity.is_primary_key("artist_id"));
        assert_eq!(entity.foreign_keys().len(), 3);
        assert_eq!(entity.referenced_entities(), vec!["artist", "gallery"]);
        assert!(!entity.references_itself());
        assert!(entity.validate().is_ok());
    }

    #[test]
    fn test_self_reference() {
        let entity = EntityInfo::new("category")
            .primary_key(["id"])
            .foreign_key("parent_id", "category", "id");
        assert!(entity.references_itself());
    }

    #[test]
    fn test_equality_by_name() {
        let a = EntityInfo::new("artist").primary_key(["id"]);
        let b = EntityInfo::new("artist").primary_key(["artist_id"]);
        assert_eq!(a, b);
        assert_ne!(a, EntityInfo::new("gallery"));
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        let err = EntityInfo::new("bad name")
            .primary_key(["id"])
            .validate()
            .unwrap_err();
        assert_eq!(err.kind, MetadataErrorKind::InvalidName);

        let err = EntityInfo::new("artist")
            .primary_key(["id;drop"])
            .validate()
            .unwrap_err();
        assert_eq!(err.kind, MetadataErrorKind::InvalidName);
    }

    #[test]
    fn test_validate_requires_primary_key() {
        let err = EntityInfo::new("artist").validate().unwrap_err();
        assert_eq!(err.kind, MetadataErrorKind::MissingPrimaryKey);
    }

    #[test]
    fn test_schema_qualified_names() {
        assert!(is_valid_identifier("public.artist"));
        assert!(is_valid_identifier("_tmp$1"));
        assert!(!is_valid_identifier("1artist"));
        assert!(!is_valid_identifier("artist."));
    }

    #[test]
    fn test_parse_foreign_key() {
        let fk = ForeignKeyInfo::parse("artist_id", "public.artist.id").unwrap();
        assert_eq!(fk.target_entity, "public.artist");
        assert_eq!(fk.target_column, "id");

        let err = ForeignKeyInfo::parse("artist_id", "artist").unwrap_err();
        assert_eq!(err.kind, MetadataErrorKind::InvalidName);
    }
}
