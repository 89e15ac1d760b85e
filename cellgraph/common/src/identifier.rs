//! Validation of caller supplied identifiers.
//!
//! Storage keys are built by joining identifiers with reserved separator characters, so no
//! identifier may contain them.

use std::fmt;

use thiserror::Error;

use crate::constants::RESERVED_CHARACTERS;

/// What kind of identifier failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    ElementId,
    PropertyKey,
    PropertyName,
    MetadataName,
    EdgeLabel,
    TableName,
    RowId,
    ColumnName,
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IdentifierKind::ElementId => "element id",
            IdentifierKind::PropertyKey => "property key",
            IdentifierKind::PropertyName => "property name",
            IdentifierKind::MetadataName => "metadata name",
            IdentifierKind::EdgeLabel => "edge label",
            IdentifierKind::TableName => "table name",
            IdentifierKind::RowId => "row id",
            IdentifierKind::ColumnName => "column name",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} {value:?}: contains a reserved separator character")]
pub struct InvalidIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

/// Fails when `value` contains one of the reserved separator characters.
pub fn validate_identifier(kind: IdentifierKind, value: &str) -> Result<(), InvalidIdentifier> {
    if value.contains(RESERVED_CHARACTERS) {
        return Err(InvalidIdentifier {
            kind,
            value: value.to_string(),
        });
    }
    Ok(())
}
