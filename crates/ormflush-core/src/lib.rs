//! Core types for ormflush.
//!
//! This crate provides the foundational pieces shared by the flush engine:
//!
//! - `Value` and `KeyValues` for column bindings and primary-key snapshots
//! - `EntityInfo` metadata describing tables, primary keys and foreign keys
//! - `Error` and `Result` used across the workspace

pub mod entity;
pub mod error;
pub mod value;

pub use entity::{EntityInfo, EntityRef, ForeignKeyInfo, is_valid_identifier};
pub use error::{
    ConfigError, Error, IdentityError, IdentityErrorKind, MetadataError, MetadataErrorKind, Result,
};
pub use value::{KeyValues, Value};
