use thiserror::Error;

pub type VisibilityResult<T> = Result<T, VisibilityError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VisibilityError {
    #[error("invalid visibility {expression:?}: unexpected input at offset {offset}")]
    Invalid { expression: String, offset: usize },
}
