use cellgraph_common::error::NotSupported;
use cellgraph_common::identifier::InvalidIdentifier;
use cellgraph_common::types::{Direction, ElementId, ElementKey, Name};
use cellgraph_security::VisibilityError;
use cellgraph_version::TimestampError;
use miette::Diagnostic;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    #[error("security violation: {0}")]
    SecurityViolation(String),
    #[error("invalid visibility: {0}")]
    InvalidVisibility(#[from] VisibilityError),
    #[error(transparent)]
    InvalidIdentifier(#[from] InvalidIdentifier),
    #[error("property {name:?} (key {key:?}) was given a null value")]
    NullPropertyValue { key: Name, name: Name },
    #[error("{0} was not included in the fetch hints")]
    FetchHintsMismatch(String),
    #[error("property definition not found: {0}")]
    PropertyDefinitionNotFound(Name),
    #[error(transparent)]
    #[diagnostic(transparent)]
    NotSupported(#[from] NotSupported),
    #[error("NotFoundError: {0}")]
    NotFound(#[from] NotFoundError),
    #[error("invalid fetch hints: {0}")]
    InvalidFetchHints(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}

#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("element {0} not found")]
    Element(ElementKey),
    #[error("property {name:?} (key {key:?}) not found on {element}")]
    Property {
        element: ElementKey,
        key: Name,
        name: Name,
    },
    #[error("{direction:?} vertex id of edge {edge_id} was not fetched")]
    VertexId {
        edge_id: ElementId,
        direction: Direction,
    },
}

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checksum mismatch")]
    ChecksumMismatch,
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}
