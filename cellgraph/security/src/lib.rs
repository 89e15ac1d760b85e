//! Visibility expressions and caller authorizations.
//!
//! A [`Visibility`] is a boolean expression over authorization labels such as `a&(b|c)`. It is
//! evaluated against the [`Authorizations`] a caller presents with each request. Evaluation is
//! pure, so concurrent readers can share parsed visibilities without locking.

pub mod authorizations;
pub mod error;
pub mod parser;
pub mod visibility;

pub use authorizations::Authorizations;
pub use error::{VisibilityError, VisibilityResult};
pub use visibility::{Visibility, VisibilityExpr, is_visibility_valid};
